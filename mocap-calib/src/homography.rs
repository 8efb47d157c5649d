use crate::CalibrationError;
use float_ord::FloatOrd;
use nalgebra::{DMatrix, Matrix3, Point2};

/// Estimates the homography `H` that maps `source` onto `target`, `target ~ H * source`.
///
/// This is the normalized direct linear transform: both point sets are moved to their centroid
/// and scaled to an average distance of `√2` before the linear system is solved, which keeps it
/// well conditioned for pixel coordinates. The result is scaled so that `H[(2, 2)] == 1`.
pub fn find_homography(
    source: &[Point2<f64>],
    target: &[Point2<f64>],
) -> Result<Matrix3<f64>, CalibrationError> {
    if source.len() != target.len() {
        return Err(CalibrationError::InvalidInput(format!(
            "{} source points for {} target points",
            source.len(),
            target.len()
        )));
    }
    if source.len() < 4 {
        return Err(CalibrationError::NotEnoughPoints {
            required: 4,
            found: source.len(),
        });
    }
    let (source_norm, _) = normalization(source).ok_or(CalibrationError::Degenerate(
        "all source points coincide",
    ))?;
    let (target_norm, target_denorm) = normalization(target).ok_or(
        CalibrationError::Degenerate("all target points coincide"),
    )?;

    // The SVD needs at least as many rows as columns to return all right singular vectors.
    let rows = (2 * source.len()).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (i, (s, t)) in source.iter().zip(target).enumerate() {
        let s = source_norm.transform_point(s);
        let t = target_norm.transform_point(t);
        let (x, y, u, v) = (s.x, s.y, t.x, t.y);
        let r = 2 * i;
        a.row_mut(r)
            .copy_from_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]);
        a.row_mut(r + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]);
    }

    let svd = a
        .try_svd(false, true, f64::EPSILON, 0)
        .ok_or(CalibrationError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(CalibrationError::SvdFailed)?;
    let (ix, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by_key(|&(_, &s)| FloatOrd(s))
        .ok_or(CalibrationError::SvdFailed)?;
    let normalized = Matrix3::from_fn(|r, c| v_t[(ix, 3 * r + c)]);
    let h = target_denorm * normalized * source_norm;

    let scale = if h[(2, 2)].abs() > f64::EPSILON {
        h[(2, 2)]
    } else {
        h.norm()
    };
    let h = h / scale;
    if h.iter().all(|n| n.is_finite()) {
        Ok(h)
    } else {
        Err(CalibrationError::Degenerate("homography is not finite"))
    }
}

/// The similarity that moves `points` to their centroid with an average distance of `√2`,
/// together with its inverse.
fn normalization(points: &[Point2<f64>]) -> Option<(Matrix3<f64>, Matrix3<f64>)> {
    let n = points.len() as f64;
    let centroid = points.iter().map(|p| p.coords).sum::<nalgebra::Vector2<f64>>() / n;
    let spread = points.iter().map(|p| (p.coords - centroid).norm()).sum::<f64>() / n;
    if !(spread > f64::EPSILON) {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / spread;
    #[rustfmt::skip]
    let forward = Matrix3::new(
        s, 0.0, -s * centroid.x,
        0.0, s, -s * centroid.y,
        0.0, 0.0, 1.0,
    );
    #[rustfmt::skip]
    let inverse = Matrix3::new(
        1.0 / s, 0.0, centroid.x,
        0.0, 1.0 / s, centroid.y,
        0.0, 0.0, 1.0,
    );
    Some((forward, inverse))
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn apply(h: &Matrix3<f64>, p: &Point2<f64>) -> Point2<f64> {
        Point2::from_homogeneous(h * p.to_homogeneous()).unwrap()
    }

    #[test]
    fn recovers_known_homography() {
        #[rustfmt::skip]
        let truth = Matrix3::new(
            820.0, 35.0, 610.0,
            -20.0, 790.0, 340.0,
            0.05, -0.02, 1.0,
        );
        let source: Vec<_> = (0..5)
            .flat_map(|i| (0..4).map(move |j| Point2::new(i as f64 * 0.1, j as f64 * 0.1)))
            .collect();
        let target: Vec<_> = source.iter().map(|p| apply(&truth, p)).collect();
        let h = find_homography(&source, &target).unwrap();
        assert_relative_eq!(h, truth, max_relative = 1e-8);
    }

    #[test]
    fn four_points_are_enough() {
        let source = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let target = [
            Point2::new(10.0, 10.0),
            Point2::new(30.0, 12.0),
            Point2::new(28.0, 35.0),
            Point2::new(9.0, 30.0),
        ];
        let h = find_homography(&source, &target).unwrap();
        for (s, t) in source.iter().zip(&target) {
            assert_relative_eq!(apply(&h, s), *t, epsilon = 1e-8);
        }
    }

    #[test]
    fn rejects_coincident_points() {
        let source = [Point2::new(1.0, 1.0); 4];
        assert!(matches!(
            find_homography(&source, &source),
            Err(CalibrationError::Degenerate(_))
        ));
    }
}
