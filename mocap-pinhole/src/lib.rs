//! This crate provides the pinhole camera model used throughout the motion capture pipeline.
//!
//! A [`CameraModel`] holds one camera's calibration: intrinsics, lens [`Distortion`] and
//! the world to camera extrinsics. It derives the camera's projection matrix `P = K [R | t]`
//! and verifies it against any projection matrix another tool may have exported alongside it.
//!
//! Calibrations are persisted as TOML files containing one [`CameraConfig`] table per camera.
//! A [`CameraSystem`] loads and saves those files. The [`legacy`] module reads the older
//! sectioned plain-text exports into the same config type.

mod camera;
mod config;
mod distortion;
mod error;
pub mod legacy;
mod root;
mod system;

pub use camera::*;
pub use config::*;
pub use distortion::*;
pub use error::*;
pub use system::*;

use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use mocap_core::nalgebra::{Matrix3, Point2, Vector2};
use mocap_core::{ImagePoint, KeyPoint};
use serde::{Deserialize, Serialize};

/// A point in normalized image coordinates. This keypoint has been normalized based on the
/// camera intrinsic matrix, but it may still be distorted by the lens.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct NormalizedKeyPoint(pub Point2<f64>);

/// This contains intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    /// This would imply that the pixel positions have an origin at `0,0`,
    /// the pixel distance unit is the focal length, pixels are square,
    /// and there is no skew.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            skew: 0.0,
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    /// Reads the intrinsics back out of an upper triangular intrinsic matrix.
    ///
    /// The bottom row is assumed to be `[0, 0, 1]`.
    pub fn from_matrix(matrix: &Matrix3<f64>) -> Self {
        Self {
            focals: Vector2::new(matrix[(0, 0)], matrix[(1, 1)]),
            principal_point: Point2::new(matrix[(0, 2)], matrix[(1, 2)]),
            skew: matrix[(0, 1)],
        }
    }

    #[must_use]
    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    #[must_use]
    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    #[must_use]
    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    #[must_use]
    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// Returns `true` if the intrinsic matrix can be inverted and all values are finite.
    pub fn is_valid(&self) -> bool {
        let values = [
            self.focals.x,
            self.focals.y,
            self.principal_point.x,
            self.principal_point.y,
            self.skew,
        ];
        values.iter().all(|n| n.is_finite()) && self.focals.x != 0.0 && self.focals.y != 0.0
    }

    /// Takes in a point from an image in pixel coordinates and
    /// converts it to a [`NormalizedKeyPoint`].
    ///
    /// ```
    /// use mocap_core::KeyPoint;
    /// use mocap_core::nalgebra::{Point2, Vector2};
    /// use mocap_pinhole::CameraIntrinsics;
    ///
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let kp = KeyPoint(Point2::new(471.0, 322.0));
    /// let nkp = intrinsics.calibrate(kp);
    /// let distance = (kp.to_homogeneous() - intrinsics.matrix() * nkp.to_homogeneous()).norm();
    /// assert!(distance < 0.1);
    /// ```
    pub fn calibrate<P>(&self, point: P) -> NormalizedKeyPoint
    where
        P: ImagePoint,
    {
        let centered = point.image_point() - self.principal_point;
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        NormalizedKeyPoint(Point2::new(x, y))
    }

    /// Converts a [`NormalizedKeyPoint`] back into pixel coordinates.
    ///
    /// ```
    /// use mocap_core::KeyPoint;
    /// use mocap_core::nalgebra::{Point2, Vector2};
    /// use mocap_pinhole::CameraIntrinsics;
    ///
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let kp = KeyPoint(Point2::new(471.0, 322.0));
    /// let ukp = intrinsics.uncalibrate(intrinsics.calibrate(kp));
    /// assert!((kp.0 - ukp.0).norm() < 1e-6);
    /// ```
    pub fn uncalibrate(&self, projection: NormalizedKeyPoint) -> KeyPoint {
        let y = projection.y * self.focals.y;
        let x = projection.x * self.focals.x + self.skew * projection.y;
        let centered = Point2::new(x, y);
        KeyPoint(centered + self.principal_point.coords)
    }
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self::identity()
    }
}
