use crate::CalibrationError;
use nalgebra::{Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

/// The homography of a sample needs four correspondences.
pub const MIN_POINTS: usize = 4;

/// The correspondences captured at one synchronized instant.
///
/// `object_points` are the known positions of the pattern's corners in the pattern's own frame,
/// which must lie on its `z = 0` plane. `image_points[camera][i]` is where `camera` saw
/// `object_points[i]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub object_points: Vec<Point3<f64>>,
    pub image_points: Vec<Vec<Point2<f64>>>,
}

impl CalibrationSample {
    pub fn new(object_points: Vec<Point3<f64>>, image_points: Vec<Vec<Point2<f64>>>) -> Self {
        Self {
            object_points,
            image_points,
        }
    }

    pub fn cameras(&self) -> usize {
        self.image_points.len()
    }

    pub fn len(&self) -> usize {
        self.object_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_points.is_empty()
    }

    /// Checks that the sample can be used to calibrate `cameras` cameras.
    pub fn validate(&self, cameras: usize) -> Result<(), CalibrationError> {
        if self.cameras() != cameras {
            return Err(CalibrationError::InvalidInput(format!(
                "sample has image points for {} cameras, expected {}",
                self.cameras(),
                cameras
            )));
        }
        if self.len() < MIN_POINTS {
            return Err(CalibrationError::NotEnoughPoints {
                required: MIN_POINTS,
                found: self.len(),
            });
        }
        for (camera, points) in self.image_points.iter().enumerate() {
            if points.len() != self.len() {
                return Err(CalibrationError::InvalidInput(format!(
                    "camera {} has {} image points for {} object points",
                    camera,
                    points.len(),
                    self.len()
                )));
            }
            if points.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
                return Err(CalibrationError::InvalidInput(format!(
                    "camera {} has non-finite image points",
                    camera
                )));
            }
        }
        if self
            .object_points
            .iter()
            .any(|p| !(p.x.is_finite() && p.y.is_finite()) || p.z.abs() > 1e-9)
        {
            return Err(CalibrationError::NonPlanarPattern);
        }
        Ok(())
    }

    /// The same sample with the image points of each camera moved by that camera's offset.
    #[must_use]
    pub fn shifted(&self, offsets: &[Vector2<f64>]) -> Self {
        Self {
            object_points: self.object_points.clone(),
            image_points: self
                .image_points
                .iter()
                .zip(offsets)
                .map(|(points, offset)| points.iter().map(|p| p + offset).collect())
                .collect(),
        }
    }

    /// The object points of the pattern as 2d points on its plane.
    pub(crate) fn plane_points(&self) -> Vec<Point2<f64>> {
        self.object_points.iter().map(|p| p.xy()).collect()
    }
}

/// The inner corners of a checkerboard with `columns` x `rows` corners spaced `square` apart,
/// row by row, on the `z = 0` plane.
///
/// ```
/// let corners = mocap_calib::checkerboard(3, 2, 0.5);
/// assert_eq!(corners.len(), 6);
/// assert_eq!(corners[4], mocap_calib::nalgebra::Point3::new(0.5, 0.5, 0.0));
/// ```
pub fn checkerboard(columns: usize, rows: usize, square: f64) -> Vec<Point3<f64>> {
    (0..rows)
        .flat_map(|row| {
            (0..columns).map(move |column| {
                Point3::new(column as f64 * square, row as f64 * square, 0.0)
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> CalibrationSample {
        let object_points = checkerboard(3, 2, 1.0);
        let image_points = vec![object_points.iter().map(|p| p.xy() * 10.0).collect()];
        CalibrationSample::new(object_points, image_points)
    }

    #[test]
    fn accepts_planar_sample() {
        assert_eq!(sample().validate(1), Ok(()));
        assert!(matches!(
            sample().validate(2),
            Err(CalibrationError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_bad_samples() {
        let mut few = sample();
        few.object_points.truncate(3);
        few.image_points[0].truncate(3);
        assert_eq!(
            few.validate(1),
            Err(CalibrationError::NotEnoughPoints {
                required: 4,
                found: 3
            })
        );

        let mut lifted = sample();
        lifted.object_points[2].z = 0.1;
        assert_eq!(lifted.validate(1), Err(CalibrationError::NonPlanarPattern));

        let mut short = sample();
        short.image_points[0].pop();
        assert!(matches!(
            short.validate(1),
            Err(CalibrationError::InvalidInput(_))
        ));
    }

    #[test]
    fn shifting_moves_each_camera() {
        let mut sample = sample();
        sample.image_points.push(sample.image_points[0].clone());
        let shifted = sample.shifted(&[Vector2::zeros(), Vector2::new(2.0, -1.0)]);
        assert_eq!(shifted.image_points[0], sample.image_points[0]);
        assert_eq!(
            shifted.image_points[1][1],
            sample.image_points[1][1] + Vector2::new(2.0, -1.0)
        );
    }
}
