use crate::bundle::{BundleAdjustment, Freedom};
use crate::init::{initial_intrinsics, pose_from_homography};
use crate::{
    find_homography, CalibrationError, CalibrationResult, CalibrationSample, CameraParameters,
    StereoExtrinsics,
};
use log::*;
use mocap_core::{average_rotations, mean_vector};
use mocap_pinhole::ImageSize;
use nalgebra::{IsometryMatrix3, Point2};
use serde::{Deserialize, Serialize};

/// Options of the planar solver.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverFlags {
    /// Start from the guess given with [`PlanarSolver::guess`] instead of the closed form
    /// initialization.
    pub use_intrinsic_guess: bool,
    /// Keep the principal point where it was initialized.
    pub fix_principal_point: bool,
    /// Keep `fx / fy` at its initial value.
    pub fix_aspect_ratio: bool,
    /// Force the tangential distortion coefficients `p1`, `p2` to zero.
    pub zero_tangential: bool,
}

/// The per-sample reprojection errors of a final parameter set.
///
/// Each sample's pattern pose is estimated anew with the final parameters. With two cameras
/// the pose estimated from one camera is moved into the other with the stereo extrinsics, so
/// that the errors also measure how well the stereo relation holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// `per_sample[camera][sample]`, RMS over the sample's points, in pixels.
    pub per_sample: Vec<Vec<f64>>,
    /// RMS of the per-sample errors of each camera.
    pub per_camera: Vec<f64>,
    /// RMS of all per-sample errors.
    pub combined: f64,
}

impl EvaluationReport {
    pub fn from_per_sample(per_sample: Vec<Vec<f64>>) -> Self {
        let per_camera = per_sample.iter().map(|errors| rms(errors)).collect();
        let all: Vec<f64> = per_sample.iter().flatten().copied().collect();
        Self {
            per_camera,
            combined: rms(&all),
            per_sample,
        }
    }

    /// Whether any error is infinite, which means a pose could not be estimated or a point did
    /// not project.
    pub fn has_infinite(&self) -> bool {
        self.per_sample.iter().flatten().any(|e| e.is_infinite())
            || self.combined.is_infinite()
    }
}

fn rms(errors: &[f64]) -> f64 {
    if errors.is_empty() {
        return f64::NAN;
    }
    (errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64).sqrt()
}

/// Calibrates one or two cameras from a set of samples.
///
/// This is the unit of work the [`CalibrationEngine`](crate::CalibrationEngine) runs for every
/// combination of samples.
pub trait CombinationSolver: Send + Sync {
    /// Calibrates the cameras from `samples`.
    ///
    /// `sizes` has one entry per camera. If `known` is given, the intrinsics are held fixed at
    /// those values and only the extrinsics are solved for.
    fn solve(
        &self,
        samples: &[&CalibrationSample],
        sizes: &[ImageSize],
        known: Option<&[CameraParameters]>,
    ) -> Result<CalibrationResult, CalibrationError>;

    /// Evaluates a final parameter set against `samples`. Solvers without an evaluation step
    /// return `None`.
    fn evaluate(
        &self,
        _samples: &[&CalibrationSample],
        _result: &CalibrationResult,
    ) -> Result<Option<EvaluationReport>, CalibrationError> {
        Ok(None)
    }
}

/// Zhang-style calibration from a planar pattern.
///
/// Every camera is initialized from the homographies of its views with the principal point at
/// the image center, then intrinsics, five distortion coefficients and pattern poses are
/// refined with Levenberg-Marquardt. Two cameras are first calibrated independently; the
/// averaged relative pose then seeds a joint refinement of both cameras, their relation and
/// the pattern poses.
#[derive(Clone, Debug, Default)]
pub struct PlanarSolver {
    flags: SolverFlags,
    guess: Option<Vec<CameraParameters>>,
}

impl PlanarSolver {
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
    }

    #[must_use]
    pub fn flags(self, flags: SolverFlags) -> Self {
        Self { flags, ..self }
    }

    /// The starting intrinsics used when [`SolverFlags::use_intrinsic_guess`] is set.
    #[must_use]
    pub fn guess(self, guess: Vec<CameraParameters>) -> Self {
        Self {
            guess: Some(guess),
            ..self
        }
    }

    fn initial_camera(
        &self,
        samples: &[&CalibrationSample],
        view: usize,
        size: ImageSize,
    ) -> Result<CameraParameters, CalibrationError> {
        if self.flags.use_intrinsic_guess {
            if let Some(guess) = self.guess.as_ref().and_then(|guess| guess.get(view)) {
                return Ok(CameraParameters {
                    image_size: size,
                    ..*guess
                });
            }
            warn!("no intrinsic guess for camera {}, initializing from homographies", view);
        }
        let homographies = samples
            .iter()
            .map(|sample| find_homography(&sample.plane_points(), &sample.image_points[view]))
            .collect::<Result<Vec<_>, _>>()?;
        let k = initial_intrinsics(&homographies, size, self.flags.fix_aspect_ratio);
        Ok(CameraParameters::new(k, Default::default(), size))
    }

    /// Calibrates a single camera, returning its parameters and the pattern poses.
    fn calibrate_mono(
        &self,
        samples: &[&CalibrationSample],
        view: usize,
        size: ImageSize,
    ) -> Result<(CameraParameters, Vec<IsometryMatrix3<f64>>, f64), CalibrationError> {
        let initial = self.initial_camera(samples, view, size)?;
        let poses = samples
            .iter()
            .map(|sample| initial_pose(&initial, sample, view))
            .collect::<Result<Vec<_>, _>>()?;
        let refined = BundleAdjustment::new(
            samples,
            vec![view],
            &[initial],
            None,
            &poses,
            Freedom::everything(self.flags),
        )
        .refine();
        Ok((refined.camera(0), refined.poses(), refined.rms()))
    }

    fn calibrate_stereo(
        &self,
        samples: &[&CalibrationSample],
        cameras: [CameraParameters; 2],
        poses: [Vec<IsometryMatrix3<f64>>; 2],
        freedom: Freedom,
    ) -> Result<CalibrationResult, CalibrationError> {
        let relative = relative_pose(&poses[0], &poses[1])?;
        let refined = BundleAdjustment::new(
            samples,
            vec![0, 1],
            &cameras,
            Some(&relative),
            &poses[0],
            freedom,
        )
        .refine();
        Ok(CalibrationResult {
            cameras: vec![refined.camera(0), refined.camera(1)],
            extrinsics: Some(StereoExtrinsics::from_isometry(&refined.relative())),
            rms: refined.rms(),
        })
    }
}

impl CombinationSolver for PlanarSolver {
    fn solve(
        &self,
        samples: &[&CalibrationSample],
        sizes: &[ImageSize],
        known: Option<&[CameraParameters]>,
    ) -> Result<CalibrationResult, CalibrationError> {
        if samples.is_empty() {
            return Err(CalibrationError::InvalidInput("no samples".into()));
        }
        let result = match (sizes, known) {
            ([size], None) => {
                let (camera, _, rms) = self.calibrate_mono(samples, 0, *size)?;
                CalibrationResult {
                    cameras: vec![camera],
                    extrinsics: None,
                    rms,
                }
            }
            ([size0, size1], None) => {
                let (camera0, poses0, rms0) = self.calibrate_mono(samples, 0, *size0)?;
                let (camera1, poses1, rms1) = self.calibrate_mono(samples, 1, *size1)?;
                debug!("individual rms {:.4} and {:.4}", rms0, rms1);
                self.calibrate_stereo(
                    samples,
                    [camera0, camera1],
                    [poses0, poses1],
                    Freedom::everything(self.flags),
                )?
            }
            ([_], Some([camera])) => {
                let poses = estimate_poses(camera, samples, 0)?;
                let problem = BundleAdjustment::new(
                    samples,
                    vec![0],
                    &[*camera],
                    None,
                    &poses,
                    Freedom::poses_only(self.flags),
                );
                fixed_intrinsics(CalibrationResult {
                    cameras: vec![*camera],
                    extrinsics: None,
                    rms: problem.rms(),
                })?
            }
            ([_, _], Some([camera0, camera1])) => {
                let poses0 = estimate_poses(camera0, samples, 0)?;
                let poses1 = estimate_poses(camera1, samples, 1)?;
                fixed_intrinsics(self.calibrate_stereo(
                    samples,
                    [*camera0, *camera1],
                    [poses0, poses1],
                    Freedom::extrinsics(self.flags),
                )?)?
            }
            (_, Some(known)) => {
                return Err(CalibrationError::InvalidInput(format!(
                    "{} known cameras for {} image sizes",
                    known.len(),
                    sizes.len()
                )))
            }
            _ => {
                return Err(CalibrationError::InvalidInput(format!(
                    "one or two cameras can be calibrated, got {}",
                    sizes.len()
                )))
            }
        };
        if !result.rms.is_finite() {
            return Err(CalibrationError::Failed(format!(
                "reprojection error is {}",
                result.rms
            )));
        }
        Ok(result)
    }

    fn evaluate(
        &self,
        samples: &[&CalibrationSample],
        result: &CalibrationResult,
    ) -> Result<Option<EvaluationReport>, CalibrationError> {
        let cameras = &result.cameras;
        let transfer = result.extrinsics.map(|e| e.isometry());
        let mut per_sample = vec![Vec::with_capacity(samples.len()); cameras.len()];
        for sample in samples {
            for (view, camera) in cameras.iter().enumerate() {
                // The camera whose observations are compared and the pose they are compared with.
                let (target, pose) = match (transfer, view) {
                    (Some(relative), 0) => (1, estimate_pose(camera, sample, 0).map(|p| relative * p)),
                    (Some(relative), _) => (
                        0,
                        estimate_pose(camera, sample, view).map(|p| relative.inverse() * p),
                    ),
                    (None, _) => (view, estimate_pose(camera, sample, view)),
                };
                let error = match pose {
                    Ok(pose) => sample_error(&cameras[target], &pose, sample, target),
                    Err(error) => {
                        warn!("no pattern pose for camera {}: {}", view, error);
                        f64::INFINITY
                    }
                };
                per_sample[target].push(error);
            }
        }
        Ok(Some(EvaluationReport::from_per_sample(per_sample)))
    }
}

/// An exact fit with fixed intrinsics means the solve did not run.
fn fixed_intrinsics(result: CalibrationResult) -> Result<CalibrationResult, CalibrationError> {
    if result.rms == 0.0 {
        Err(CalibrationError::Failed(
            "zero reprojection error with fixed intrinsics".into(),
        ))
    } else {
        Ok(result)
    }
}

/// RMS reprojection error of one sample in one camera, infinite if a point does not project.
fn sample_error(
    camera: &CameraParameters,
    pose: &IsometryMatrix3<f64>,
    sample: &CalibrationSample,
    view: usize,
) -> f64 {
    let squared: Option<Vec<f64>> = sample
        .object_points
        .iter()
        .zip(&sample.image_points[view])
        .map(|(object, observed)| {
            camera
                .project(&(pose * object))
                .map(|projected| (projected - observed).norm_squared())
        })
        .collect();
    match squared {
        Some(squared) if !squared.is_empty() => {
            (squared.iter().sum::<f64>() / squared.len() as f64).sqrt()
        }
        _ => f64::INFINITY,
    }
}

/// The pattern pose seen by a camera with known intrinsics, from the homography of the
/// undistorted normalized image points.
fn initial_pose(
    camera: &CameraParameters,
    sample: &CalibrationSample,
    view: usize,
) -> Result<IsometryMatrix3<f64>, CalibrationError> {
    let normalized: Vec<Point2<f64>> = sample.image_points[view]
        .iter()
        .map(|p| camera.normalize(p))
        .collect();
    let h = find_homography(&sample.plane_points(), &normalized)?;
    pose_from_homography(&h).ok_or(CalibrationError::Degenerate(
        "homography does not describe a pattern pose",
    ))
}

/// [`initial_pose`] refined by minimizing the reprojection error.
fn estimate_pose(
    camera: &CameraParameters,
    sample: &CalibrationSample,
    view: usize,
) -> Result<IsometryMatrix3<f64>, CalibrationError> {
    let pose = initial_pose(camera, sample, view)?;
    let samples = [sample];
    let refined = BundleAdjustment::new(
        &samples,
        vec![view],
        &[*camera],
        None,
        &[pose],
        Freedom::poses_only(Default::default()),
    )
    .refine();
    Ok(refined.poses()[0])
}

fn estimate_poses(
    camera: &CameraParameters,
    samples: &[&CalibrationSample],
    view: usize,
) -> Result<Vec<IsometryMatrix3<f64>>, CalibrationError> {
    samples
        .iter()
        .map(|sample| estimate_pose(camera, sample, view))
        .collect()
}

/// Averages the per-sample pose of camera 1 relative to camera 0.
fn relative_pose(
    poses0: &[IsometryMatrix3<f64>],
    poses1: &[IsometryMatrix3<f64>],
) -> Result<IsometryMatrix3<f64>, CalibrationError> {
    let relatives: Vec<IsometryMatrix3<f64>> = poses0
        .iter()
        .zip(poses1)
        .map(|(pose0, pose1)| pose1 * pose0.inverse())
        .collect();
    let rotations: Vec<_> = relatives.iter().map(|r| r.rotation).collect();
    let rotation = average_rotations(&rotations).ok_or(CalibrationError::Degenerate(
        "relative rotations cannot be averaged",
    ))?;
    let translations: Vec<_> = relatives.iter().map(|r| r.translation.vector).collect();
    let translation = mean_vector(&translations)
        .ok_or(CalibrationError::Degenerate("no relative poses"))?;
    Ok(IsometryMatrix3::from_parts(translation.into(), rotation))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::checkerboard;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Translation3, Vector3, Vector5};

    fn views() -> Vec<IsometryMatrix3<f64>> {
        [
            Vector3::new(0.35, 0.05, 0.0),
            Vector3::new(-0.3, 0.3, 0.1),
            Vector3::new(0.1, -0.4, -0.15),
            Vector3::new(-0.2, -0.25, 0.3),
            Vector3::new(0.25, 0.3, -0.05),
        ]
        .iter()
        .map(|axis| {
            IsometryMatrix3::from_parts(
                Translation3::new(-0.15, -0.1, 0.9),
                Rotation3::new(*axis),
            )
        })
        .collect()
    }

    fn observe(camera: &CameraParameters, pose: &IsometryMatrix3<f64>) -> CalibrationSample {
        let object_points = checkerboard(8, 6, 0.04);
        let image_points = vec![object_points
            .iter()
            .map(|p| camera.project(&(pose * p)).unwrap())
            .collect()];
        CalibrationSample::new(object_points, image_points)
    }

    fn camera() -> CameraParameters {
        let mut camera = CameraParameters::ideal(810.0, ImageSize::new(640, 480));
        camera.intrinsics[(1, 1)] = 790.0;
        camera.intrinsics[(0, 2)] += 6.0;
        camera.intrinsics[(1, 2)] -= 4.0;
        camera.distortion = Vector5::new(-0.12, 0.03, 0.0005, -0.0008, 0.0);
        camera
    }

    #[test]
    fn calibrates_single_camera() {
        let truth = camera();
        let samples: Vec<_> = views().iter().map(|pose| observe(&truth, pose)).collect();
        let samples: Vec<&CalibrationSample> = samples.iter().collect();
        let result = PlanarSolver::new()
            .solve(&samples, &[truth.image_size], None)
            .unwrap();
        assert!(result.rms < 1e-4, "rms {}", result.rms);
        assert!(result.extrinsics.is_none());
        assert_relative_eq!(
            result.cameras[0].intrinsics,
            truth.intrinsics,
            max_relative = 1e-5
        );
        assert_relative_eq!(
            result.cameras[0].distortion,
            truth.distortion,
            epsilon = 1e-4
        );

        let report = PlanarSolver::new()
            .evaluate(&samples, &result)
            .unwrap()
            .unwrap();
        assert_eq!(report.per_sample[0].len(), samples.len());
        assert!(report.combined < 1e-3);
        assert!(!report.has_infinite());
    }

    #[test]
    fn fixed_intrinsics_need_a_residual() {
        let truth = camera();
        let samples: Vec<_> = views().iter().map(|pose| observe(&truth, pose)).collect();
        let samples: Vec<&CalibrationSample> = samples.iter().collect();
        let off = truth.shift_principal_point(15.0, 0.0);
        let result = PlanarSolver::new()
            .solve(&samples, &[truth.image_size], Some(&[off]))
            .unwrap();
        assert_eq!(result.cameras[0], off);
        assert!(result.rms > 0.1);
    }

    #[test]
    fn rejects_camera_count() {
        let truth = camera();
        let sample = observe(&truth, &views()[0]);
        let sizes = [truth.image_size; 3];
        assert!(matches!(
            PlanarSolver::new().solve(&[&sample], &sizes, None),
            Err(CalibrationError::InvalidInput(_))
        ));
        assert!(matches!(
            PlanarSolver::new().solve(&[&sample], &sizes[..1], Some(&[truth, truth])),
            Err(CalibrationError::InvalidInput(_))
        ));
    }

    #[test]
    fn report_aggregates_errors() {
        let report = EvaluationReport::from_per_sample(vec![vec![3.0, 4.0], vec![0.0, 0.0]]);
        assert_relative_eq!(report.per_camera[0], (12.5f64).sqrt());
        assert_eq!(report.per_camera[1], 0.0);
        assert_relative_eq!(report.combined, (25.0f64 / 4.0).sqrt());
    }
}
