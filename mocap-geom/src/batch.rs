//! Triangulation of whole keypoint sequences.
//!
//! Pose detectors produce one tensor per recording with the layout
//! `(views, frames, keypoints, 2)` for positions and `(views, frames, keypoints)` for
//! confidences. Triangulating it yields `(frames, keypoints, 3)`.

use crate::triangulation::{DltTriangulator, TriangulatedPoint};
use log::*;
use mocap_core::nalgebra::Matrix3x4;
use mocap_core::Observation;
use ndarray::{Array2, Array3, ArrayView3, ArrayView4, Axis};
use thiserror::Error;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("keypoints have {views} views but {projections} projection matrices were given")]
    ViewCount { views: usize, projections: usize },
    #[error("keypoint tensor must have a trailing dimension of 2, got {0}")]
    PointDimension(usize),
    #[error("confidence shape {confidences:?} does not match keypoint shape {keypoints:?}")]
    ConfidenceShape {
        keypoints: (usize, usize, usize),
        confidences: (usize, usize, usize),
    },
}

/// The result of triangulating a keypoint sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchTriangulation {
    /// `(frames, keypoints, 3)`, NaN where a point could not be resolved.
    pub points: Array3<f64>,
    /// `(frames, keypoints)`, the number of views that passed the confidence threshold.
    pub view_counts: Array2<usize>,
    /// `(frames, keypoints)`, RMS reprojection error over the contributing views, NaN where
    /// the point is unresolved.
    pub rmse: Array2<f64>,
}

impl BatchTriangulation {
    pub fn frames(&self) -> usize {
        self.points.len_of(Axis(0))
    }

    pub fn keypoints(&self) -> usize {
        self.points.len_of(Axis(1))
    }

    /// The number of points that could not be resolved.
    pub fn unresolved(&self) -> usize {
        self.points
            .lanes(Axis(2))
            .into_iter()
            .filter(|p| p.iter().any(|n| n.is_nan()))
            .count()
    }
}

/// Triangulates every keypoint of every frame.
///
/// Without `confidences` every observation counts as fully confident. Points are independent,
/// so a failure to resolve one point never affects the others; it shows up as NaN.
pub fn triangulate_batch(
    triangulator: &DltTriangulator,
    projections: &[Matrix3x4<f64>],
    keypoints: ArrayView4<f64>,
    confidences: Option<ArrayView3<f64>>,
) -> Result<BatchTriangulation, BatchError> {
    let (views, frames, joints, dim) = keypoints.dim();
    if dim != 2 {
        return Err(BatchError::PointDimension(dim));
    }
    if views != projections.len() {
        return Err(BatchError::ViewCount {
            views,
            projections: projections.len(),
        });
    }
    if let Some(confidences) = &confidences {
        if confidences.dim() != (views, frames, joints) {
            return Err(BatchError::ConfidenceShape {
                keypoints: (views, frames, joints),
                confidences: confidences.dim(),
            });
        }
    }

    let process_frame = |frame: usize| -> Vec<TriangulatedPoint> {
        (0..joints)
            .map(|joint| {
                let observations: Vec<Observation> = (0..views)
                    .map(|view| {
                        Observation::new(
                            keypoints[[view, frame, joint, 0]],
                            keypoints[[view, frame, joint, 1]],
                            confidences
                                .as_ref()
                                .map_or(1.0, |c| c[[view, frame, joint]]),
                        )
                    })
                    .collect();
                triangulator.triangulate(&observations, projections)
            })
            .collect()
    };

    #[cfg(not(feature = "rayon"))]
    let results: Vec<Vec<TriangulatedPoint>> = (0..frames).map(process_frame).collect();
    #[cfg(feature = "rayon")]
    let results: Vec<Vec<TriangulatedPoint>> = (0..frames).into_par_iter().map(process_frame).collect();

    let mut points = Array3::from_elem((frames, joints, 3), f64::NAN);
    let mut view_counts = Array2::zeros((frames, joints));
    let mut rmse = Array2::from_elem((frames, joints), f64::NAN);
    for (frame, row) in results.iter().enumerate() {
        for (joint, point) in row.iter().enumerate() {
            for axis in 0..3 {
                points[[frame, joint, axis]] = point.position[axis];
            }
            view_counts[[frame, joint]] = point.view_count();
            rmse[[frame, joint]] = point.rmse();
        }
    }

    let batch = BatchTriangulation {
        points,
        view_counts,
        rmse,
    };
    debug!(
        "triangulated {} frames x {} keypoints from {} views, {} unresolved",
        frames,
        joints,
        views,
        batch.unresolved()
    );
    Ok(batch)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::project;
    use mocap_core::nalgebra::{Matrix3, Point3, Rotation3, Vector3};
    use ndarray::{Array3, Array4};

    fn projections() -> Vec<Matrix3x4<f64>> {
        let k = Matrix3::new(1000.0, 0.0, 640.0, 0.0, 1000.0, 360.0, 0.0, 0.0, 1.0);
        [(0.0, -3.0), (0.4, -2.0), (-0.4, 2.0)]
            .iter()
            .map(|&(yaw, x)| {
                let r = Rotation3::new(Vector3::new(0.0, yaw, 0.0));
                let mut rt = Matrix3x4::zeros();
                rt.fixed_slice_mut::<3, 3>(0, 0).copy_from(r.matrix());
                rt.set_column(3, &Vector3::new(x * 0.1, 0.0, 5.0));
                k * rt
            })
            .collect()
    }

    fn synthetic(points: &[Vec<Point3<f64>>]) -> Array4<f64> {
        let projections = projections();
        let frames = points.len();
        let joints = points[0].len();
        Array4::from_shape_fn((projections.len(), frames, joints, 2), |(v, f, j, d)| {
            let p = project(&projections[v], &points[f][j]).unwrap();
            p[d]
        })
    }

    #[test]
    fn triangulates_every_point() {
        let points: Vec<Vec<Point3<f64>>> = (0..4)
            .map(|f| {
                (0..5)
                    .map(|j| Point3::new(0.1 * j as f64, -0.05 * f as f64, 0.2 * j as f64))
                    .collect()
            })
            .collect();
        let keypoints = synthetic(&points);
        let batch = triangulate_batch(&DltTriangulator::new(), &projections(), keypoints.view(), None)
            .unwrap();
        assert_eq!(batch.points.dim(), (4, 5, 3));
        for f in 0..4 {
            for j in 0..5 {
                for a in 0..3 {
                    assert!((batch.points[[f, j, a]] - points[f][j][a]).abs() < 1e-6);
                }
                assert_eq!(batch.view_counts[[f, j]], 3);
                assert!(batch.rmse[[f, j]] < 1e-6);
            }
        }
        assert_eq!(batch.unresolved(), 0);
    }

    #[test]
    fn low_confidence_points_are_nan() {
        let points = vec![vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.3, 0.2, 0.1)]];
        let keypoints = synthetic(&points);
        let mut confidences = Array3::from_elem((3, 1, 2), 0.9);
        confidences[[0, 0, 1]] = 0.1;
        confidences[[1, 0, 1]] = 0.3;
        let batch = triangulate_batch(
            &DltTriangulator::new(),
            &projections(),
            keypoints.view(),
            Some(confidences.view()),
        )
        .unwrap();
        assert!(batch.points[[0, 0, 0]].is_finite());
        assert!(batch.points[[0, 1, 0]].is_nan());
        assert_eq!(batch.view_counts[[0, 1]], 1);
        assert_eq!(batch.unresolved(), 1);
    }

    #[test]
    fn shape_errors() {
        let keypoints = Array4::<f64>::zeros((2, 1, 1, 2));
        assert_eq!(
            triangulate_batch(&DltTriangulator::new(), &projections(), keypoints.view(), None),
            Err(BatchError::ViewCount {
                views: 2,
                projections: 3
            })
        );
        let keypoints = Array4::<f64>::zeros((3, 1, 1, 2));
        let confidences = Array3::<f64>::zeros((3, 2, 1));
        assert!(matches!(
            triangulate_batch(
                &DltTriangulator::new(),
                &projections(),
                keypoints.view(),
                Some(confidences.view())
            ),
            Err(BatchError::ConfidenceShape { .. })
        ));
    }
}
