use nalgebra::Point3;

/// Returns a point with every coordinate set to NaN.
///
/// This is how an unresolved 3d position is represented in all outputs so that
/// downstream consumers can interpolate over it.
pub fn undefined_point() -> Point3<f64> {
    Point3::new(f64::NAN, f64::NAN, f64::NAN)
}

/// Returns `true` if no coordinate of the point is NaN or infinite.
pub fn is_defined(point: &Point3<f64>) -> bool {
    point.coords.iter().all(|n| n.is_finite())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn undefined_points() {
        assert!(!is_defined(&undefined_point()));
        assert!(!is_defined(&Point3::new(1.0, f64::INFINITY, 0.0)));
        assert!(is_defined(&Point3::new(1.0, 2.0, 5.0)));
    }
}
