use crate::reprojection::reprojection_error;
use float_ord::FloatOrd;
use log::*;
use mocap_core::nalgebra::{DMatrix, Matrix3x4, Point3, RowVector4, Vector4};
use mocap_core::{undefined_point, Observation};

/// A triangulated keypoint together with the views that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct TriangulatedPoint {
    /// The 3d position, NaN in every coordinate when the point could not be resolved.
    pub position: Point3<f64>,
    /// Indices of the views whose observation passed the confidence threshold.
    pub views: Vec<usize>,
    /// Pixel reprojection error of `position` in each of `views`, in the same order.
    pub reprojection_errors: Vec<f64>,
}

impl TriangulatedPoint {
    fn unresolved(views: Vec<usize>) -> Self {
        let reprojection_errors = vec![f64::NAN; views.len()];
        Self {
            position: undefined_point(),
            views,
            reprojection_errors,
        }
    }

    /// Returns `false` when the point is NaN.
    pub fn is_defined(&self) -> bool {
        mocap_core::is_defined(&self.position)
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// Root-mean-square reprojection error over the contributing views.
    pub fn rmse(&self) -> f64 {
        crate::rmse(self.reprojection_errors.iter().copied())
    }
}

/// Triangulates a point from any number of views with the direct linear transform.
///
/// Every view whose observation reaches the confidence threshold adds the two rows
/// `x * P[2] - P[0]` and `y * P[2] - P[1]` to a system `A X = 0` in the homogeneous point `X`.
/// The solution is the right singular vector of `A` belonging to the smallest singular value.
///
/// The result is undefined (NaN) when fewer than two views pass the threshold, when `A` has an
/// effective rank below 3 (for instance all views share one optical center), or when the
/// homogeneous coordinate of the solution is exactly zero.
///
/// ```
/// use mocap_core::nalgebra::{Matrix3, Matrix3x4, Point3, Rotation3, Vector3};
/// use mocap_core::Observation;
/// use mocap_geom::{project, DltTriangulator};
///
/// let k = Matrix3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0);
/// let camera = |rotation: Rotation3<f64>, translation: Vector3<f64>| {
///     let mut rt = Matrix3x4::zeros();
///     rt.fixed_slice_mut::<3, 3>(0, 0).copy_from(rotation.matrix());
///     rt.set_column(3, &translation);
///     k * rt
/// };
/// let projections = [
///     camera(Rotation3::identity(), Vector3::zeros()),
///     camera(Rotation3::new(Vector3::new(0.0, -0.3, 0.0)), Vector3::new(-1.0, 0.0, 0.2)),
/// ];
/// let point = Point3::new(0.3, 0.1, 4.0);
/// let observations: Vec<Observation> = projections
///     .iter()
///     .map(|p| Observation::certain(project(p, &point).unwrap()))
///     .collect();
/// let triangulated = DltTriangulator::new().triangulate_point(&observations, &projections);
/// assert!((triangulated - point).norm() < 1e-6);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct DltTriangulator {
    confidence_threshold: f64,
    epsilon: f64,
    max_iterations: usize,
    rank_tolerance: f64,
}

impl DltTriangulator {
    /// Creates a `DltTriangulator` with default values.
    ///
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the minimum confidence for an observation to take part in the solve.
    ///
    /// Default is `0.5`.
    #[must_use]
    pub fn confidence_threshold(self, confidence_threshold: f64) -> Self {
        Self {
            confidence_threshold,
            ..self
        }
    }

    /// Set the epsilon used in the singular value decomposition.
    ///
    /// Default is `1e-12`.
    #[must_use]
    pub fn epsilon(self, epsilon: f64) -> Self {
        Self { epsilon, ..self }
    }

    /// Set the maximum number of iterations for the singular value decomposition.
    ///
    /// Default is `1000`.
    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Set the tolerance, relative to the largest singular value, below which a singular
    /// value does not count towards the rank of the system.
    ///
    /// Default is `1e-12`.
    #[must_use]
    pub fn rank_tolerance(self, rank_tolerance: f64) -> Self {
        Self {
            rank_tolerance,
            ..self
        }
    }

    /// Triangulates one point. The result is NaN when the point is unresolved.
    ///
    /// `observations[i]` must be the observation made by the camera with `projections[i]`.
    pub fn triangulate_point(
        &self,
        observations: &[Observation],
        projections: &[Matrix3x4<f64>],
    ) -> Point3<f64> {
        let views = self.confident_views(observations, projections);
        self.solve(&views, observations, projections)
            .unwrap_or_else(undefined_point)
    }

    /// Triangulates one point and reports which views contributed and how well the point
    /// reprojects into each of them.
    pub fn triangulate(
        &self,
        observations: &[Observation],
        projections: &[Matrix3x4<f64>],
    ) -> TriangulatedPoint {
        let views = self.confident_views(observations, projections);
        let position = match self.solve(&views, observations, projections) {
            Some(position) => position,
            None => return TriangulatedPoint::unresolved(views),
        };
        let contributing: Vec<Observation> = views.iter().map(|&v| observations[v]).collect();
        let contributing_projections: Vec<Matrix3x4<f64>> =
            views.iter().map(|&v| projections[v]).collect();
        let reprojection_errors =
            reprojection_error(&position, &contributing, &contributing_projections);
        TriangulatedPoint {
            position,
            views,
            reprojection_errors,
        }
    }

    fn confident_views(
        &self,
        observations: &[Observation],
        projections: &[Matrix3x4<f64>],
    ) -> Vec<usize> {
        if observations.len() != projections.len() {
            warn!(
                "{} observations for {} projection matrices, ignoring the surplus",
                observations.len(),
                projections.len()
            );
        }
        observations
            .iter()
            .zip(projections)
            .enumerate()
            .filter(|(_, (observation, _))| observation.is_confident(self.confidence_threshold))
            .map(|(ix, _)| ix)
            .collect()
    }

    fn solve(
        &self,
        views: &[usize],
        observations: &[Observation],
        projections: &[Matrix3x4<f64>],
    ) -> Option<Point3<f64>> {
        if views.len() < 2 {
            return None;
        }

        let rows = views.iter().flat_map(|&v| {
            let p = &projections[v];
            let point = observations[v].point;
            let last: RowVector4<f64> = p.row(2).into_owned();
            [
                point.x * last - p.row(0),
                point.y * last - p.row(1),
            ]
        });
        let rows: Vec<RowVector4<f64>> = rows.collect();
        let design = DMatrix::from_fn(rows.len(), 4, |r, c| rows[r][c]);

        let svd = match design.try_svd(false, true, self.epsilon, self.max_iterations) {
            Some(svd) => svd,
            None => {
                warn!("triangulation SVD did not converge");
                return None;
            }
        };
        let v_t = svd.v_t?;

        let largest = svd.singular_values.max();
        let rank = svd
            .singular_values
            .iter()
            .filter(|&&s| s > largest * self.rank_tolerance)
            .count();
        if rank < 3 {
            warn!(
                "ill-conditioned triangulation from {} views (rank {}), leaving point undefined",
                views.len(),
                rank
            );
            return None;
        }

        // The null space direction belongs to the smallest singular value.
        let (ix, _) = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by_key(|&(_, &s)| FloatOrd(s))?;
        let homogeneous = Vector4::from_fn(|r, _| v_t[(ix, r)]);
        if homogeneous.w == 0.0 {
            warn!("triangulated point lies at infinity, leaving point undefined");
            return None;
        }
        Point3::from_homogeneous(homogeneous).filter(mocap_core::is_defined)
    }
}

impl Default for DltTriangulator {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            epsilon: 1e-12,
            max_iterations: 1000,
            rank_tolerance: 1e-12,
        }
    }
}

/// Triangulates a point from confident views with a [`DltTriangulator`] using the given
/// confidence threshold. Returns NaN when the point is unresolved.
pub fn triangulate_point(
    observations: &[Observation],
    projections: &[Matrix3x4<f64>],
    confidence_threshold: f64,
) -> Point3<f64> {
    DltTriangulator::new()
        .confidence_threshold(confidence_threshold)
        .triangulate_point(observations, projections)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{project, reprojection_error};
    use mocap_core::nalgebra::{Matrix3, Rotation3, Vector3};
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;

    fn camera(rotation: Vector3<f64>, translation: Vector3<f64>) -> Matrix3x4<f64> {
        let k = Matrix3::new(1200.0, 0.0, 960.0, 0.0, 1200.0, 540.0, 0.0, 0.0, 1.0);
        let mut rt = Matrix3x4::zeros();
        rt.fixed_slice_mut::<3, 3>(0, 0)
            .copy_from(Rotation3::new(rotation).matrix());
        rt.set_column(3, &translation);
        k * rt
    }

    fn observe(projections: &[Matrix3x4<f64>], point: &Point3<f64>) -> Vec<Observation> {
        projections
            .iter()
            .map(|p| Observation::certain(project(p, point).unwrap()))
            .collect()
    }

    /// Cameras on a ring around the origin, all looking at it from 6 units away.
    fn ring(n: usize) -> Vec<Matrix3x4<f64>> {
        (0..n)
            .map(|i| {
                let angle = i as f64 * 0.5;
                let rotation = Rotation3::new(Vector3::new(0.0, -angle, 0.0));
                let center = Vector3::new(-6.0 * angle.sin(), 0.3, -6.0 * angle.cos());
                camera(rotation.scaled_axis(), -(rotation * center))
            })
            .collect()
    }

    #[test]
    fn recovers_random_points() {
        let mut rng = Pcg64::from_seed([5; 32]);
        let projections = ring(4);
        for _ in 0..100 {
            let point = Point3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            let observations = observe(&projections, &point);
            let triangulated = DltTriangulator::new().triangulate_point(&observations, &projections);
            assert!((triangulated - point).norm() < 1e-6);
        }
    }

    #[test]
    fn two_views_suffice() {
        let projections = ring(2);
        let point = Point3::new(0.2, -0.4, 0.1);
        let observations = observe(&projections, &point);
        let triangulated = triangulate_point(&observations, &projections, 0.5);
        assert!((triangulated - point).norm() < 1e-6);
    }

    #[test]
    fn three_cameras_in_front_of_a_point() {
        let projections = [
            camera(Vector3::zeros(), Vector3::zeros()),
            camera(Vector3::new(0.0, 0.2, 0.0), Vector3::new(-1.0, 0.0, 0.0)),
            camera(Vector3::new(-0.1, 0.0, 0.05), Vector3::new(0.0, -1.0, 0.5)),
        ];
        let point = Point3::new(1.0, 2.0, 5.0);
        let observations = observe(&projections, &point);
        let triangulated = DltTriangulator::new().triangulate_point(&observations, &projections);
        assert!((triangulated - point).norm() < 1e-6);
        let errors = reprojection_error(&triangulated, &observations, &projections);
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|&e| e < 1e-6));
    }

    #[test]
    fn fewer_than_two_confident_views_is_nan() {
        let projections = ring(3);
        let point = Point3::new(0.2, -0.4, 0.1);
        let mut observations = observe(&projections, &point);
        for observation in &mut observations {
            observation.confidence = 0.2;
        }
        assert!(DltTriangulator::new()
            .triangulate_point(&observations, &projections)
            .iter()
            .all(|n| n.is_nan()));
        observations[1].confidence = 0.9;
        let result = DltTriangulator::new().triangulate(&observations, &projections);
        assert!(!result.is_defined());
        assert_eq!(result.views, vec![1]);
        assert!(DltTriangulator::new()
            .triangulate_point(&[], &[])
            .iter()
            .all(|n| n.is_nan()));
    }

    #[test]
    fn low_confidence_views_are_ignored() {
        let projections = ring(3);
        let point = Point3::new(0.5, 0.5, -0.5);
        let mut observations = observe(&projections, &point);
        // Corrupt a view, but mark it as unreliable.
        observations[2].point.0.x += 300.0;
        observations[2].confidence = 0.1;
        let result = DltTriangulator::new().triangulate(&observations, &projections);
        assert_eq!(result.views, vec![0, 1]);
        assert!((result.position - point).norm() < 1e-6);
        assert!(result.rmse() < 1e-6);
    }

    #[test]
    fn coincident_cameras_are_undefined() {
        // Two identical cameras: the rays coincide and the system is rank deficient.
        let p = camera(Vector3::zeros(), Vector3::new(0.0, 0.0, 5.0));
        let projections = [p, p];
        let observations = observe(&projections, &Point3::new(0.1, 0.2, 0.3));
        assert!(!DltTriangulator::new()
            .triangulate(&observations, &projections)
            .is_defined());
    }
}
