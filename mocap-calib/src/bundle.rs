//! Joint Levenberg-Marquardt refinement of intrinsics, distortion, the stereo relation and the
//! pattern poses.

use crate::{CalibrationSample, CameraParameters, SolverFlags};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::*;
use mocap_core::Skew3;
use mocap_pinhole::ImageSize;
use nalgebra::{
    storage::Owned, DMatrix, DVector, Dynamic, IsometryMatrix3, Matrix3, Translation3, Vector3,
    Vector5,
};

/// `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`
const INTRINSIC_PARAMETERS: usize = 9;
/// `[rx, ry, rz, tx, ty, tz]`, a rotation vector followed by a translation.
const POSE_PARAMETERS: usize = 6;
/// Relative step of the central difference Jacobian.
const DIFFERENCE_STEP: f64 = 1e-6;
/// Residual of a point that ends up behind the camera.
const BEHIND_CAMERA: f64 = 1e4;

/// Which parameter groups the refinement may change.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Freedom {
    pub intrinsics: bool,
    pub relative: bool,
    pub poses: bool,
    pub flags: SolverFlags,
}

impl Freedom {
    pub fn everything(flags: SolverFlags) -> Self {
        Self {
            intrinsics: true,
            relative: true,
            poses: true,
            flags,
        }
    }

    pub fn extrinsics(flags: SolverFlags) -> Self {
        Self {
            intrinsics: false,
            ..Self::everything(flags)
        }
    }

    pub fn poses_only(flags: SolverFlags) -> Self {
        Self {
            intrinsics: false,
            relative: false,
            ..Self::everything(flags)
        }
    }
}

/// The reprojection problem of one or two cameras observing a planar pattern in several poses.
///
/// The parameter vector holds the intrinsics of every camera, then the pose of camera 1
/// relative to camera 0 when there are two cameras, then one pattern pose per sample, expressed
/// in the frame of camera 0. Only the indices in `free` are exposed to the optimizer.
#[derive(Clone)]
pub(crate) struct BundleAdjustment<'a> {
    samples: &'a [&'a CalibrationSample],
    /// `views[camera]` is the index into [`CalibrationSample::image_points`] of each camera.
    views: Vec<usize>,
    sizes: Vec<ImageSize>,
    values: DVector<f64>,
    free: Vec<usize>,
    /// `fy / fx` for cameras with a fixed aspect ratio.
    aspect: Vec<Option<f64>>,
    observations: usize,
}

impl<'a> BundleAdjustment<'a> {
    pub fn new(
        samples: &'a [&'a CalibrationSample],
        views: Vec<usize>,
        cameras: &[CameraParameters],
        relative: Option<&IsometryMatrix3<f64>>,
        poses: &[IsometryMatrix3<f64>],
        freedom: Freedom,
    ) -> Self {
        let stereo = cameras.len() == 2;
        let mut values = Vec::with_capacity(
            cameras.len() * INTRINSIC_PARAMETERS
                + usize::from(stereo) * POSE_PARAMETERS
                + poses.len() * POSE_PARAMETERS,
        );
        let mut free = vec![];
        let mut aspect = vec![];
        for camera in cameras {
            let base = values.len();
            let mut packed = pack_camera(camera);
            if freedom.intrinsics && freedom.flags.zero_tangential {
                packed[6] = 0.0;
                packed[7] = 0.0;
            }
            values.extend(packed);
            if freedom.intrinsics {
                free.push(base);
                if !freedom.flags.fix_aspect_ratio {
                    free.push(base + 1);
                }
                if !freedom.flags.fix_principal_point {
                    free.extend([base + 2, base + 3]);
                }
                free.extend([base + 4, base + 5]);
                if !freedom.flags.zero_tangential {
                    free.extend([base + 6, base + 7]);
                }
                free.push(base + 8);
            }
            aspect.push(
                (freedom.intrinsics && freedom.flags.fix_aspect_ratio)
                    .then(|| packed[1] / packed[0]),
            );
        }
        if stereo {
            let base = values.len();
            values.extend(pack_pose(&relative.copied().unwrap_or_else(IsometryMatrix3::identity)));
            if freedom.relative {
                free.extend(base..base + POSE_PARAMETERS);
            }
        }
        for pose in poses {
            let base = values.len();
            values.extend(pack_pose(pose));
            if freedom.poses {
                free.extend(base..base + POSE_PARAMETERS);
            }
        }
        let observations = samples.iter().map(|s| s.len()).sum::<usize>() * views.len();
        Self {
            samples,
            views,
            sizes: cameras.iter().map(|c| c.image_size).collect(),
            values: DVector::from_vec(values),
            free,
            aspect,
            observations,
        }
    }

    /// Runs Levenberg-Marquardt on the free parameters.
    #[must_use]
    pub fn refine(self) -> Self {
        if self.free.is_empty() {
            return self;
        }
        let parameters = self.free.len();
        let (refined, report) = LevenbergMarquardt::new()
            .with_ftol(1e-12)
            .with_xtol(1e-12)
            .with_gtol(1e-12)
            .minimize(self);
        debug!(
            "refined {} parameters in {} evaluations, rms {:.4}, {:?}",
            parameters,
            report.number_of_evaluations,
            refined.rms(),
            report.termination
        );
        refined
    }

    fn cameras(&self) -> usize {
        self.views.len()
    }

    fn pose_offset(&self, sample: usize) -> usize {
        let relative = if self.cameras() == 2 {
            POSE_PARAMETERS
        } else {
            0
        };
        self.cameras() * INTRINSIC_PARAMETERS + relative + sample * POSE_PARAMETERS
    }

    fn camera_at(&self, values: &DVector<f64>, camera: usize) -> CameraParameters {
        let base = camera * INTRINSIC_PARAMETERS;
        let mut packed = [0.0; INTRINSIC_PARAMETERS];
        packed.copy_from_slice(&values.as_slice()[base..base + INTRINSIC_PARAMETERS]);
        if let Some(ratio) = self.aspect[camera] {
            packed[1] = packed[0] * ratio;
        }
        unpack_camera(&packed, self.sizes[camera])
    }

    fn relative_at(&self, values: &DVector<f64>) -> IsometryMatrix3<f64> {
        if self.cameras() == 2 {
            let base = 2 * INTRINSIC_PARAMETERS;
            unpack_pose(&values.as_slice()[base..base + POSE_PARAMETERS])
        } else {
            IsometryMatrix3::identity()
        }
    }

    fn residuals_at(&self, values: &DVector<f64>) -> DVector<f64> {
        let cameras: Vec<CameraParameters> =
            (0..self.cameras()).map(|c| self.camera_at(values, c)).collect();
        let relative = self.relative_at(values);
        let mut residuals = Vec::with_capacity(2 * self.observations);
        for (s, sample) in self.samples.iter().enumerate() {
            let base = self.pose_offset(s);
            let board = unpack_pose(&values.as_slice()[base..base + POSE_PARAMETERS]);
            for (c, camera) in cameras.iter().enumerate() {
                let to_camera = if c == 0 { board } else { relative * board };
                for (object, observed) in sample
                    .object_points
                    .iter()
                    .zip(&sample.image_points[self.views[c]])
                {
                    match camera.project(&(to_camera * object)) {
                        Some(projected) => {
                            residuals.push(projected.x - observed.x);
                            residuals.push(projected.y - observed.y);
                        }
                        None => residuals.extend([BEHIND_CAMERA; 2]),
                    }
                }
            }
        }
        DVector::from_vec(residuals)
    }

    /// RMS reprojection error over all image points, in pixels.
    pub fn rms(&self) -> f64 {
        if self.observations == 0 {
            return f64::NAN;
        }
        (self.residuals_at(&self.values).norm_squared() / self.observations as f64).sqrt()
    }

    pub fn camera(&self, camera: usize) -> CameraParameters {
        self.camera_at(&self.values, camera)
    }

    pub fn relative(&self) -> IsometryMatrix3<f64> {
        self.relative_at(&self.values)
    }

    pub fn poses(&self) -> Vec<IsometryMatrix3<f64>> {
        (0..self.samples.len())
            .map(|s| {
                let base = self.pose_offset(s);
                unpack_pose(&self.values.as_slice()[base..base + POSE_PARAMETERS])
            })
            .collect()
    }
}

impl LeastSquaresProblem<f64, Dynamic, Dynamic> for BundleAdjustment<'_> {
    type ResidualStorage = Owned<f64, Dynamic>;
    type JacobianStorage = Owned<f64, Dynamic, Dynamic>;
    type ParameterStorage = Owned<f64, Dynamic>;

    fn set_params(&mut self, params: &DVector<f64>) {
        for (&ix, &value) in self.free.iter().zip(params.iter()) {
            self.values[ix] = value;
        }
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_iterator(self.free.len(), self.free.iter().map(|&ix| self.values[ix]))
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals_at(&self.values)).filter(|r| r.iter().all(|n| n.is_finite()))
    }

    /// Central differences on the free parameters.
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let mut jacobian = DMatrix::zeros(2 * self.observations, self.free.len());
        let mut values = self.values.clone();
        for (column, &ix) in self.free.iter().enumerate() {
            let x = values[ix];
            let h = DIFFERENCE_STEP * x.abs().max(1.0);
            values[ix] = x + h;
            let forward = self.residuals_at(&values);
            values[ix] = x - h;
            let backward = self.residuals_at(&values);
            values[ix] = x;
            jacobian.set_column(column, &((forward - backward) / (2.0 * h)));
        }
        Some(jacobian).filter(|j| j.iter().all(|n| n.is_finite()))
    }
}

fn pack_camera(camera: &CameraParameters) -> [f64; INTRINSIC_PARAMETERS] {
    let k = &camera.intrinsics;
    let d = &camera.distortion;
    [
        k[(0, 0)],
        k[(1, 1)],
        k[(0, 2)],
        k[(1, 2)],
        d[0],
        d[1],
        d[2],
        d[3],
        d[4],
    ]
}

fn unpack_camera(packed: &[f64; INTRINSIC_PARAMETERS], size: ImageSize) -> CameraParameters {
    let [fx, fy, cx, cy, k1, k2, p1, p2, k3] = *packed;
    CameraParameters::new(
        Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0),
        Vector5::new(k1, k2, p1, p2, k3),
        size,
    )
}

fn pack_pose(pose: &IsometryMatrix3<f64>) -> [f64; POSE_PARAMETERS] {
    let r = Skew3::from(pose.rotation).0;
    let t = pose.translation.vector;
    [r.x, r.y, r.z, t.x, t.y, t.z]
}

fn unpack_pose(packed: &[f64]) -> IsometryMatrix3<f64> {
    let rotation = Skew3(Vector3::new(packed[0], packed[1], packed[2])).rotation();
    let translation = Translation3::new(packed[3], packed[4], packed[5]);
    IsometryMatrix3::from_parts(translation, rotation)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::checkerboard;
    use approx::assert_relative_eq;
    use nalgebra::{Point2, Rotation3};

    fn observe(camera: &CameraParameters, pose: &IsometryMatrix3<f64>) -> CalibrationSample {
        let object_points = checkerboard(6, 5, 0.05);
        let image_points = vec![object_points
            .iter()
            .map(|p| camera.project(&(pose * p)).unwrap())
            .collect::<Vec<Point2<f64>>>()];
        CalibrationSample::new(object_points, image_points)
    }

    #[test]
    fn pose_packing_round_trip() {
        let pose = IsometryMatrix3::from_parts(
            Translation3::new(0.1, -0.2, 1.5),
            Rotation3::new(Vector3::new(0.2, -0.4, 0.1)),
        );
        assert_relative_eq!(
            unpack_pose(&pack_pose(&pose)).to_homogeneous(),
            pose.to_homogeneous(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn refines_perturbed_pose() {
        let camera = CameraParameters::ideal(700.0, ImageSize::new(640, 480));
        let truth = IsometryMatrix3::from_parts(
            Translation3::new(-0.1, -0.1, 0.8),
            Rotation3::new(Vector3::new(0.3, -0.2, 0.05)),
        );
        let samples = [observe(&camera, &truth)];
        let samples: Vec<&CalibrationSample> = samples.iter().collect();
        let start = IsometryMatrix3::from_parts(
            Translation3::new(-0.08, -0.11, 0.85),
            Rotation3::new(Vector3::new(0.28, -0.21, 0.07)),
        );
        let problem = BundleAdjustment::new(
            &samples,
            vec![0],
            &[camera],
            None,
            &[start],
            Freedom::poses_only(SolverFlags::default()),
        );
        assert!(problem.rms() > 1.0);
        let refined = problem.refine();
        assert!(refined.rms() < 1e-6);
        assert_relative_eq!(
            refined.poses()[0].to_homogeneous(),
            truth.to_homogeneous(),
            epsilon = 1e-6
        );
        assert_eq!(refined.camera(0), camera);
    }

    #[test]
    fn flags_restrict_free_parameters() {
        let camera = CameraParameters::ideal(700.0, ImageSize::new(640, 480));
        let samples = [observe(&camera, &IsometryMatrix3::translation(-0.1, -0.1, 1.0))];
        let samples: Vec<&CalibrationSample> = samples.iter().collect();
        let flags = SolverFlags {
            fix_principal_point: true,
            fix_aspect_ratio: true,
            zero_tangential: true,
            ..SolverFlags::default()
        };
        let problem = BundleAdjustment::new(
            &samples,
            vec![0],
            &[camera],
            None,
            &[IsometryMatrix3::identity()],
            Freedom::everything(flags),
        );
        // fx, k1, k2, k3 and the pose.
        assert_eq!(problem.params().len(), 4 + 6);
    }
}
