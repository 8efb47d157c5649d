use crate::{CameraConfig, CameraError, CameraIntrinsics, Distortion, ImageSize, NormalizedKeyPoint};
use log::*;
use mocap_core::nalgebra::{Matrix3, Matrix3x4, Point2, Point3, Rotation3, Vector3};
use mocap_core::{KeyPoint, Skew3};

/// Absolute tolerance of the projection matrix cross-check.
pub const PROJECTION_ABSOLUTE_TOLERANCE: f64 = 1e-6;
/// Relative tolerance of the projection matrix cross-check.
pub const PROJECTION_RELATIVE_TOLERANCE: f64 = 1e-5;

/// Number of grid samples per image axis used to find the undistorted image extent.
const OPTIMAL_GRID: usize = 9;

/// Raised when a projection matrix exported by another tool disagrees with `K [R | t]`,
/// even after retrying with the inverse extrinsic convention.
///
/// This is not fatal. The derived matrix is used and the exported one is discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationConsistencyWarning {
    pub camera: String,
    /// Largest absolute entry-wise difference between the derived and the supplied matrix.
    pub max_deviation: f64,
    pub supplied: Matrix3x4<f64>,
}

/// The outcome of cross-checking the derived projection matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum Consistency {
    /// No projection matrix was supplied, so there was nothing to check.
    Derived,
    /// The supplied projection matrix matches `K [R | t]`.
    Verified,
    /// The supplied projection matrix matched only after inverting the extrinsics
    /// (`R' = R^T`, `t' = -R' t`). The model stores the inverted extrinsics.
    CorrectedInverse,
    /// The supplied projection matrix does not match either convention.
    Inconsistent(CalibrationConsistencyWarning),
}

/// A calibrated camera.
///
/// The extrinsics transform world coordinates into the camera frame, `x_cam = R x_world + t`,
/// so the projection matrix is `P = K [R | t]`. The model is immutable; recalibrating a camera
/// produces a new model.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    id: String,
    size: ImageSize,
    intrinsics: CameraIntrinsics,
    distortion: Distortion,
    rotation: Skew3,
    rotation_matrix: Rotation3<f64>,
    translation: Vector3<f64>,
    projection: Matrix3x4<f64>,
    consistency: Consistency,
}

impl CameraModel {
    /// Builds a model and derives its projection matrix.
    pub fn new(
        id: impl Into<String>,
        size: ImageSize,
        intrinsics: CameraIntrinsics,
        distortion: Distortion,
        rotation: Skew3,
        translation: Vector3<f64>,
    ) -> Self {
        let rotation_matrix = rotation.rotation();
        let projection = projection_matrix(&intrinsics.matrix(), &rotation_matrix, &translation);
        Self {
            id: id.into(),
            size,
            intrinsics,
            distortion,
            rotation,
            rotation_matrix,
            translation,
            projection,
            consistency: Consistency::Derived,
        }
    }

    /// Cross-checks a projection matrix exported by another tool against the derived one.
    ///
    /// If it disagrees beyond [`PROJECTION_ABSOLUTE_TOLERANCE`], the check is repeated with the
    /// inverse extrinsic convention `R' = R^T, t' = -R' t`, which some calibration tools use
    /// in their exports. If that matches, the model keeps the inverted extrinsics. Otherwise the
    /// model keeps its own extrinsics and derived matrix and records a
    /// [`CalibrationConsistencyWarning`], which is also logged.
    #[must_use]
    pub fn with_supplied_projection(self, supplied: Matrix3x4<f64>) -> Self {
        if projections_match(&self.projection, &supplied) {
            return Self {
                consistency: Consistency::Verified,
                ..self
            };
        }

        let inverse_rotation = self.rotation_matrix.inverse();
        let inverse_translation = -(inverse_rotation * self.translation);
        let inverse_projection = projection_matrix(
            &self.intrinsics.matrix(),
            &inverse_rotation,
            &inverse_translation,
        );
        if projections_match(&inverse_projection, &supplied) {
            info!(
                "camera {}: supplied projection matrix uses the inverse extrinsic convention, correcting",
                self.id
            );
            return Self {
                rotation: inverse_rotation.into(),
                rotation_matrix: inverse_rotation,
                translation: inverse_translation,
                projection: inverse_projection,
                consistency: Consistency::CorrectedInverse,
                ..self
            };
        }

        let max_deviation = (self.projection - supplied).amax();
        warn!(
            "camera {}: supplied projection matrix deviates from K [R | t] by up to {:e}, using the derived matrix",
            self.id, max_deviation
        );
        let warning = CalibrationConsistencyWarning {
            camera: self.id.clone(),
            max_deviation,
            supplied,
        };
        Self {
            consistency: Consistency::Inconsistent(warning),
            ..self
        }
    }

    /// Builds a model from a persisted config, validating every field.
    pub fn from_config(config: &CameraConfig) -> Result<Self, CameraError> {
        let name = config.name.as_str();
        let [width, height] = config.size;
        if width == 0 || height == 0 {
            return Err(CameraError::invalid(name, "image size must be non-zero"));
        }
        let matrix = Matrix3::from_fn(|r, c| config.matrix[r][c]);
        if matrix.iter().any(|n| !n.is_finite()) {
            return Err(CameraError::invalid(name, "intrinsic matrix is not finite"));
        }
        if matrix[(1, 0)] != 0.0 || matrix[(2, 0)] != 0.0 || matrix[(2, 1)] != 0.0 {
            return Err(CameraError::invalid(
                name,
                "intrinsic matrix must be upper triangular",
            ));
        }
        if matrix[(2, 2)] != 1.0 {
            return Err(CameraError::invalid(
                name,
                "intrinsic matrix must have a 1 in the bottom right corner",
            ));
        }
        let intrinsics = CameraIntrinsics::from_matrix(&matrix);
        if !intrinsics.is_valid() {
            return Err(CameraError::SingularIntrinsics {
                camera: name.to_owned(),
            });
        }
        let distortion = Distortion::from_coefficients(&config.distortions, config.fisheye)
            .ok_or_else(|| CameraError::DistortionLength {
                camera: name.to_owned(),
                expected: if config.fisheye { "4" } else { "4 or 5" },
                count: config.distortions.len(),
            })?;
        if config.distortions.iter().any(|n| !n.is_finite()) {
            return Err(CameraError::invalid(name, "distortion is not finite"));
        }
        let rotation = Vector3::from(config.rotation);
        let translation = Vector3::from(config.translation);
        if rotation.iter().chain(translation.iter()).any(|n| !n.is_finite()) {
            return Err(CameraError::invalid(name, "extrinsics are not finite"));
        }

        let model = Self::new(
            name,
            ImageSize::from(config.size),
            intrinsics,
            distortion,
            Skew3(rotation),
            translation,
        );
        Ok(match config.projection_matrix {
            Some(supplied) => {
                let supplied = Matrix3x4::from_fn(|r, c| supplied[r][c]);
                if supplied.iter().any(|n| !n.is_finite()) {
                    return Err(CameraError::invalid(name, "projection matrix is not finite"));
                }
                model.with_supplied_projection(supplied)
            }
            None => model,
        })
    }

    /// Converts the model back into its persisted form.
    ///
    /// The derived projection matrix is written alongside the parameters.
    pub fn to_config(&self) -> CameraConfig {
        let k = self.intrinsics.matrix();
        let p = self.projection;
        CameraConfig {
            name: self.id.clone(),
            size: self.size.into(),
            matrix: [0, 1, 2].map(|r| [0, 1, 2].map(|c| k[(r, c)])),
            distortions: self.distortion.coefficients(),
            rotation: [self.rotation.x, self.rotation.y, self.rotation.z],
            translation: [self.translation.x, self.translation.y, self.translation.z],
            projection_matrix: Some([0, 1, 2].map(|r| [0, 1, 2, 3].map(|c| p[(r, c)]))),
            fisheye: self.distortion.is_fisheye(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn intrinsics(&self) -> CameraIntrinsics {
        self.intrinsics
    }

    /// The intrinsic matrix `K`.
    pub fn intrinsic_matrix(&self) -> Matrix3<f64> {
        self.intrinsics.matrix()
    }

    /// `K^-1`. Returns `None` if the intrinsics are singular.
    pub fn inverse_intrinsic_matrix(&self) -> Option<Matrix3<f64>> {
        self.intrinsics.matrix().try_inverse()
    }

    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }

    pub fn is_fisheye(&self) -> bool {
        self.distortion.is_fisheye()
    }

    /// The rotation as a Rodrigues vector.
    pub fn rotation_vector(&self) -> Skew3 {
        self.rotation
    }

    pub fn rotation_matrix(&self) -> Rotation3<f64> {
        self.rotation_matrix
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    /// The position of the optical center in world coordinates, `-R^T t`.
    pub fn center(&self) -> Point3<f64> {
        Point3::from(-(self.rotation_matrix.inverse() * self.translation))
    }

    /// The projection matrix `P = K [R | t]` derived when the model was built.
    pub fn projection(&self) -> &Matrix3x4<f64> {
        &self.projection
    }

    pub fn consistency(&self) -> &Consistency {
        &self.consistency
    }

    /// Computes the projection matrix.
    ///
    /// With `undistort == false` this is `K [R | t]`. With `undistort == true`, `K` is
    /// replaced by [`CameraModel::optimal_intrinsics`], the intrinsics of an undistorted
    /// image that keeps every source pixel, so the matrix projects into undistorted images.
    ///
    /// ```
    /// use mocap_core::nalgebra::{Point2, Vector2, Vector3};
    /// use mocap_core::Skew3;
    /// use mocap_pinhole::{CameraIntrinsics, CameraModel, Distortion, ImageSize};
    ///
    /// let intrinsics = CameraIntrinsics::identity()
    ///     .focal(1000.0)
    ///     .principal_point(Point2::new(959.5, 539.5));
    /// let camera = CameraModel::new(
    ///     "cam0",
    ///     ImageSize::new(1920, 1080),
    ///     intrinsics,
    ///     Distortion::none(),
    ///     Skew3::new(0.1, -0.2, 0.05),
    ///     Vector3::new(0.3, 0.1, 2.0),
    /// );
    /// let p = camera.compute_projection_matrix(false);
    /// let x = mocap_core::nalgebra::Point3::new(0.2, -0.1, 3.0);
    /// let in_camera = camera.rotation_matrix() * x.coords + camera.translation();
    /// let expected = intrinsics.matrix() * in_camera;
    /// let projected = p * x.to_homogeneous();
    /// assert!((projected - expected).amax() < 1e-9);
    /// ```
    pub fn compute_projection_matrix(&self, undistort: bool) -> Matrix3x4<f64> {
        if undistort {
            projection_matrix(
                &self.optimal_intrinsics().matrix(),
                &self.rotation_matrix,
                &self.translation,
            )
        } else {
            projection_matrix(
                &self.intrinsics.matrix(),
                &self.rotation_matrix,
                &self.translation,
            )
        }
    }

    /// The intrinsics of the undistorted image that retains all source pixels.
    ///
    /// A grid spanning the whole source image is undistorted and the intrinsics are chosen so
    /// that the bounding rectangle of the result maps exactly onto an image of the same size.
    /// Without distortion this returns the original intrinsics.
    pub fn optimal_intrinsics(&self) -> CameraIntrinsics {
        if self.distortion.is_zero() {
            return self.intrinsics;
        }
        let w = self.size.width as f64 - 1.0;
        let h = self.size.height as f64 - 1.0;
        let step = (OPTIMAL_GRID - 1) as f64;
        let mut min = Point2::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for row in 0..OPTIMAL_GRID {
            for col in 0..OPTIMAL_GRID {
                let pixel = Point2::new(col as f64 * w / step, row as f64 * h / step);
                let ideal = match self.undistort_normalized(pixel) {
                    Some(ideal) => ideal,
                    None => continue,
                };
                min = min.inf(&ideal);
                max = max.sup(&ideal);
            }
        }
        let extent = max - min;
        if !(extent.x > 0.0 && extent.y > 0.0 && extent.iter().all(|n| n.is_finite())) {
            warn!(
                "camera {}: could not compute the undistorted image extent, keeping the original intrinsics",
                self.id
            );
            return self.intrinsics;
        }
        let fx = w / extent.x;
        let fy = h / extent.y;
        CameraIntrinsics::identity()
            .focals([fx, fy].into())
            .principal_point(Point2::new(-fx * min.x, -fy * min.y))
    }

    /// Projects a world point into the distorted image.
    ///
    /// Returns `None` for points on or behind the camera plane.
    pub fn project_point(&self, point: &Point3<f64>) -> Option<KeyPoint> {
        let camera = self.rotation_matrix * point.coords + self.translation;
        if camera.z <= 0.0 {
            return None;
        }
        let normalized = Point2::new(camera.x / camera.z, camera.y / camera.z);
        let distorted = self.distortion.distort(normalized);
        Some(self.intrinsics.uncalibrate(NormalizedKeyPoint(distorted)))
    }

    /// Removes the lens distortion from a pixel, returning the pixel an ideal pinhole camera
    /// with the same intrinsics would have seen.
    pub fn undistort_point(&self, pixel: Point2<f64>) -> Option<KeyPoint> {
        let ideal = self.undistort_normalized(pixel)?;
        Some(self.intrinsics.uncalibrate(NormalizedKeyPoint(ideal)))
    }

    fn undistort_normalized(&self, pixel: Point2<f64>) -> Option<Point2<f64>> {
        let NormalizedKeyPoint(distorted) = self.intrinsics.calibrate(pixel);
        self.distortion.undistort(distorted)
    }
}

/// Computes `P = K [R | t]` by homogenizing both factors: `[K | 0] * [R t; 0 0 0 1]`.
pub fn projection_matrix(
    intrinsics: &Matrix3<f64>,
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
) -> Matrix3x4<f64> {
    let kh = intrinsics.insert_column(3, 0.0);
    let mut rt = rotation.matrix().to_homogeneous();
    rt.fixed_slice_mut::<3, 1>(0, 3).copy_from(translation);
    kh * rt
}

/// Entry-wise comparison with an absolute and a relative tolerance.
pub fn projections_match(derived: &Matrix3x4<f64>, supplied: &Matrix3x4<f64>) -> bool {
    derived.iter().zip(supplied.iter()).all(|(&a, &b)| {
        (a - b).abs() <= PROJECTION_ABSOLUTE_TOLERANCE + PROJECTION_RELATIVE_TOLERANCE * b.abs()
    })
}
