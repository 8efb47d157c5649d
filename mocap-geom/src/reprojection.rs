use mocap_core::nalgebra::{Matrix3x4, Point2, Point3};
use mocap_core::ImagePoint;
use ndarray::Array2;

/// Projects a 3d point with a projection matrix and performs the homogeneous divide.
///
/// Returns `None` for points on the camera plane (homogeneous coordinate exactly zero)
/// and for undefined (NaN) points.
pub fn project(projection: &Matrix3x4<f64>, point: &Point3<f64>) -> Option<Point2<f64>> {
    let image = projection * point.to_homogeneous();
    if image.z == 0.0 {
        return None;
    }
    Some(Point2::new(image.x / image.z, image.y / image.z))
        .filter(|p| p.x.is_finite() && p.y.is_finite())
}

/// Reprojects `point` into every view and returns the pixel distance to each observation.
///
/// The result has one entry per view. Views the point cannot be projected into, and every
/// view of an undefined point, get NaN.
pub fn reprojection_error<P>(
    point: &Point3<f64>,
    observations: &[P],
    projections: &[Matrix3x4<f64>],
) -> Vec<f64>
where
    P: ImagePoint,
{
    observations
        .iter()
        .zip(projections)
        .map(|(observation, projection)| {
            project(projection, point)
                .map(|projected| (projected - observation.image_point()).norm())
                .unwrap_or(f64::NAN)
        })
        .collect()
}

/// The reprojection error of a set of points, one row per point and one column per view.
///
/// `observations[view][point]` is the observation of `points[point]` in `view`.
pub fn reprojection_error_matrix<P>(
    points: &[Point3<f64>],
    observations: &[Vec<P>],
    projections: &[Matrix3x4<f64>],
) -> Array2<f64>
where
    P: ImagePoint,
{
    let views = observations.len().min(projections.len());
    Array2::from_shape_fn((points.len(), views), |(point, view)| {
        observations[view]
            .get(point)
            .and_then(|observation| {
                project(&projections[view], &points[point])
                    .map(|projected| (projected - observation.image_point()).norm())
            })
            .unwrap_or(f64::NAN)
    })
}

/// Root-mean-square of the finite errors. Returns NaN if there are none.
pub fn rmse(errors: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = errors
        .into_iter()
        .filter(|e| e.is_finite())
        .fold((0.0, 0usize), |(sum, count), e| (sum + e * e, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        (sum / count as f64).sqrt()
    }
}
