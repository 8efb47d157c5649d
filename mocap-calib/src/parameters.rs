use mocap_pinhole::{CameraIntrinsics, Distortion, ImageSize};
use nalgebra::{IsometryMatrix3, Matrix3, Point2, Point3, Rotation3, Translation3, Vector3, Vector5};
use serde::{Deserialize, Serialize};

/// The intrinsic calibration of one camera.
///
/// `distortion` holds the radial-tangential coefficients `[k1, k2, p1, p2, k3]`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraParameters {
    pub intrinsics: Matrix3<f64>,
    pub distortion: Vector5<f64>,
    pub image_size: ImageSize,
}

impl CameraParameters {
    pub fn new(intrinsics: Matrix3<f64>, distortion: Vector5<f64>, image_size: ImageSize) -> Self {
        Self {
            intrinsics,
            distortion,
            image_size,
        }
    }

    /// An ideal camera with focal length `focal`, the principal point at the image center and
    /// no distortion.
    pub fn ideal(focal: f64, image_size: ImageSize) -> Self {
        let (cx, cy) = image_size.center();
        Self::new(
            Matrix3::new(focal, 0.0, cx, 0.0, focal, cy, 0.0, 0.0, 1.0),
            Vector5::zeros(),
            image_size,
        )
    }

    pub fn focals(&self) -> (f64, f64) {
        (self.intrinsics[(0, 0)], self.intrinsics[(1, 1)])
    }

    pub fn principal_point(&self) -> Point2<f64> {
        Point2::new(self.intrinsics[(0, 2)], self.intrinsics[(1, 2)])
    }

    pub fn camera_intrinsics(&self) -> CameraIntrinsics {
        CameraIntrinsics::from_matrix(&self.intrinsics)
    }

    pub fn lens_distortion(&self) -> Distortion {
        Distortion::radial_tangential(self.distortion)
    }

    /// Projects a point given in this camera's frame to pixels.
    ///
    /// Returns `None` for points on or behind the camera plane.
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        if !(point.z > f64::EPSILON) {
            return None;
        }
        let normalized = Point2::new(point.x / point.z, point.y / point.z);
        let distorted = self.lens_distortion().distort(normalized);
        let k = &self.intrinsics;
        Some(Point2::new(
            k[(0, 0)] * distorted.x + k[(0, 1)] * distorted.y + k[(0, 2)],
            k[(1, 1)] * distorted.y + k[(1, 2)],
        ))
    }

    /// Maps a pixel to undistorted normalized image coordinates.
    ///
    /// Falls back to the distorted normalized point where the distortion cannot be inverted.
    pub fn normalize(&self, pixel: &Point2<f64>) -> Point2<f64> {
        let normalized = self.camera_intrinsics().calibrate(*pixel).0;
        self.lens_distortion()
            .undistort(normalized)
            .unwrap_or(normalized)
    }

    /// The same camera with its principal point moved by `(dx, dy)`.
    #[must_use]
    pub fn shift_principal_point(mut self, dx: f64, dy: f64) -> Self {
        self.intrinsics[(0, 2)] += dx;
        self.intrinsics[(1, 2)] += dy;
        self
    }
}

/// The pose of the second camera of a stereo pair relative to the first:
/// `x_1 = rotation * x_0 + translation`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StereoExtrinsics {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl StereoExtrinsics {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn isometry(&self) -> IsometryMatrix3<f64> {
        IsometryMatrix3::from_parts(Translation3::from(self.translation), self.rotation)
    }

    pub fn from_isometry(isometry: &IsometryMatrix3<f64>) -> Self {
        Self::new(isometry.rotation, isometry.translation.vector)
    }
}

/// The outcome of one calibration solve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub cameras: Vec<CameraParameters>,
    /// Present when two cameras were calibrated together.
    pub extrinsics: Option<StereoExtrinsics>,
    /// RMS reprojection error over all image points, in pixels.
    pub rms: f64,
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn project_and_normalize_agree() {
        let mut camera = CameraParameters::ideal(800.0, ImageSize::new(640, 480));
        camera.distortion = Vector5::new(-0.2, 0.05, 0.001, -0.002, 0.0);
        let point = Point3::new(0.3, -0.2, 2.0);
        let pixel = camera.project(&point).unwrap();
        let normalized = camera.normalize(&pixel);
        assert_relative_eq!(normalized, Point2::new(0.15, -0.1), epsilon = 1e-9);
        assert!(camera.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn stereo_isometry_round_trip() {
        let extrinsics = StereoExtrinsics::new(
            Rotation3::new(Vector3::new(0.0, 0.3, 0.0)),
            Vector3::new(-0.5, 0.0, 0.1),
        );
        let back = StereoExtrinsics::from_isometry(&extrinsics.isometry());
        assert_eq!(back, extrinsics);
    }
}
