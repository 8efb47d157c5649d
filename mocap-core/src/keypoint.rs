use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::Point2;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Allows the retrieval of the point on the image the feature came from.
pub trait ImagePoint {
    /// Retrieves the point on the image
    fn image_point(&self) -> Point2<f64>;
}

impl ImagePoint for Point2<f64> {
    fn image_point(&self) -> Point2<f64> {
        *self
    }
}

/// A point on an image frame. This type should be used when
/// the point location is on the image frame in pixel coordinates.
/// This means the keypoint is neither undistorted nor normalized.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct KeyPoint(pub Point2<f64>);

impl ImagePoint for KeyPoint {
    fn image_point(&self) -> Point2<f64> {
        self.0
    }
}

/// A keypoint reported by a 2d detector together with the detector's confidence in `[0, 1]`.
///
/// Pose detectors report a position for every keypoint on every frame, even when the keypoint
/// is occluded. The confidence is what tells consumers whether the position can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Observation {
    pub point: KeyPoint,
    pub confidence: f64,
}

impl Observation {
    pub fn new(x: f64, y: f64, confidence: f64) -> Self {
        Self {
            point: KeyPoint(Point2::new(x, y)),
            confidence,
        }
    }

    /// An observation with full confidence.
    pub fn certain(point: Point2<f64>) -> Self {
        Self {
            point: KeyPoint(point),
            confidence: 1.0,
        }
    }

    /// Returns `true` if the confidence reaches `threshold` and the position is finite.
    ///
    /// A NaN confidence is never confident.
    pub fn is_confident(&self, threshold: f64) -> bool {
        self.confidence >= threshold && self.point.x.is_finite() && self.point.y.is_finite()
    }
}

impl ImagePoint for Observation {
    fn image_point(&self) -> Point2<f64> {
        self.point.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn confidence_threshold_is_inclusive() {
        assert!(Observation::new(1.0, 2.0, 0.5).is_confident(0.5));
        assert!(!Observation::new(1.0, 2.0, 0.49).is_confident(0.5));
        assert!(!Observation::new(1.0, 2.0, f64::NAN).is_confident(0.5));
        assert!(!Observation::new(f64::NAN, 2.0, 1.0).is_confident(0.5));
    }
}
