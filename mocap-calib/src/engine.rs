use crate::{
    CalibrationError, CalibrationObserver, CalibrationParameters, CalibrationResult,
    CalibrationSample, CameraParameters, CancellationToken, ClusteringConfig, CombinationSearch,
    CombinationSolver, PlanarSolver, Progress, SolverFlags,
};
use log::*;
use mocap_pinhole::ImageSize;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Instant;

/// How the samples are turned into one parameter set.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One solve over all samples.
    Direct,
    /// Solve many subsets of the samples and average the best of them.
    Clustering(ClusteringConfig),
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Direct
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub strategy: Strategy,
    pub flags: SolverFlags,
}

impl CalibrationConfig {
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
    }

    #[must_use]
    pub fn strategy(self, strategy: Strategy) -> Self {
        Self { strategy, ..self }
    }

    #[must_use]
    pub fn clustering(self, clustering: ClusteringConfig) -> Self {
        self.strategy(Strategy::Clustering(clustering))
    }

    #[must_use]
    pub fn flags(self, flags: SolverFlags) -> Self {
        Self { flags, ..self }
    }
}

/// Calibrates one camera or a stereo pair from planar pattern samples.
///
/// Cameras with different resolutions are calibrated in a common frame the size of the
/// largest one: every camera's image points are moved so that its image is centered in that
/// frame, and the principal points are moved back once the parameters are final.
///
/// ```no_run
/// use mocap_calib::*;
/// use mocap_pinhole::ImageSize;
///
/// # fn samples() -> Vec<CalibrationSample> { vec![] }
/// let engine = CalibrationEngine::new(
///     CalibrationConfig::new().clustering(ClusteringConfig::new().subset_size(4).retained(5)),
/// );
/// let params = engine.calibrate(
///     &samples(),
///     &[ImageSize::new(1280, 720)],
///     None,
///     &mut |p: &Progress| println!("{:.0}%", 100.0 * p.fraction),
///     &CancellationToken::new(),
/// )?;
/// println!("rms {}", params.rms);
/// # Ok::<(), CalibrationError>(())
/// ```
#[derive(Clone, Debug)]
pub struct CalibrationEngine<S = PlanarSolver> {
    solver: S,
    config: CalibrationConfig,
}

impl CalibrationEngine {
    /// An engine with the [`PlanarSolver`] configured by `config.flags`.
    pub fn new(config: CalibrationConfig) -> Self {
        Self::with_solver(PlanarSolver::new().flags(config.flags), config)
    }
}

impl<S> CalibrationEngine<S>
where
    S: CombinationSolver,
{
    pub fn with_solver(solver: S, config: CalibrationConfig) -> Self {
        Self { solver, config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Runs the configured strategy.
    ///
    /// `sizes` holds the image size of each camera. With `known` intrinsics only the stereo
    /// relation is solved. The search checks `cancel` between combinations.
    pub fn calibrate<O>(
        &self,
        samples: &[CalibrationSample],
        sizes: &[ImageSize],
        known: Option<&[CameraParameters]>,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> Result<CalibrationParameters, CalibrationError>
    where
        O: CalibrationObserver + ?Sized,
    {
        validate(samples, sizes, known)?;
        let start = Instant::now();
        let frame = common_frame(sizes);
        let offsets: Vec<Vector2<f64>> = sizes
            .iter()
            .map(|size| {
                Vector2::new(
                    f64::from(frame.width - size.width) / 2.0,
                    f64::from(frame.height - size.height) / 2.0,
                )
            })
            .collect();
        let shifted = offsets.iter().any(|offset| *offset != Vector2::zeros());
        let samples: Cow<[CalibrationSample]> = if shifted {
            info!(
                "cameras differ in resolution, calibrating in a {}x{} frame",
                frame.width, frame.height
            );
            samples.iter().map(|s| s.shifted(&offsets)).collect()
        } else {
            Cow::Borrowed(samples)
        };
        let known: Option<Vec<CameraParameters>> = known.map(|known| {
            known
                .iter()
                .zip(&offsets)
                .map(|(camera, offset)| CameraParameters {
                    image_size: frame,
                    ..camera.shift_principal_point(offset.x, offset.y)
                })
                .collect()
        });
        let frame_sizes = vec![frame; sizes.len()];
        let solve = |indices: &[usize]| {
            let subset: Vec<&CalibrationSample> = indices.iter().map(|&i| &samples[i]).collect();
            self.solver.solve(&subset, &frame_sizes, known.as_deref())
        };

        let mut params = match self.config.strategy {
            Strategy::Direct => {
                if cancel.is_cancelled() {
                    return Err(CalibrationError::Cancelled);
                }
                let all: Vec<usize> = (0..samples.len()).collect();
                let result = solve(&all).map_err(|error| {
                    error!("calibration failed: {}", error);
                    error
                })?;
                observer.on_progress(&Progress::new(1, 1, 1.0, start.elapsed()));
                CalibrationParameters::direct(result, samples.len())
            }
            Strategy::Clustering(clustering) => {
                let search = CombinationSearch::new(samples.len(), &clustering)?;
                info!(
                    "searching {} of {} combinations of {} samples for the best {}",
                    search.budget(),
                    search.total(),
                    clustering.subset_size,
                    search.retained()
                );
                let retained = search.run(solve, observer, cancel).map_err(|error| {
                    if error != CalibrationError::Cancelled {
                        error!("calibration failed: {}", error);
                    }
                    error
                })?;
                CalibrationParameters::aggregate(&retained)?
            }
        };

        let all: Vec<&CalibrationSample> = samples.iter().collect();
        let final_result = CalibrationResult {
            cameras: params.cameras.clone(),
            extrinsics: params.extrinsics,
            rms: params.rms,
        };
        params.report = self.solver.evaluate(&all, &final_result)?;
        for ((camera, offset), size) in params.cameras.iter_mut().zip(&offsets).zip(sizes) {
            *camera = CameraParameters {
                image_size: *size,
                ..camera.shift_principal_point(-offset.x, -offset.y)
            };
        }

        if let Err(error) = params.check_usable() {
            error!("discarding calibration: {}", error);
            return Err(error);
        }
        info!(
            "calibrated {} camera(s) from {} samples in {:.1?}, rms {:.4}",
            sizes.len(),
            samples.len(),
            start.elapsed(),
            params.rms
        );
        if let Some(report) = &params.report {
            info!("evaluation rms {:.4} per camera {:?}", report.combined, report.per_camera);
        }
        Ok(params)
    }
}

fn validate(
    samples: &[CalibrationSample],
    sizes: &[ImageSize],
    known: Option<&[CameraParameters]>,
) -> Result<(), CalibrationError> {
    if !(1..=2).contains(&sizes.len()) {
        return Err(CalibrationError::InvalidInput(format!(
            "one or two cameras can be calibrated, got {}",
            sizes.len()
        )));
    }
    if sizes.iter().any(|size| size.width == 0 || size.height == 0) {
        return Err(CalibrationError::InvalidInput("empty image size".into()));
    }
    if samples.is_empty() {
        return Err(CalibrationError::InvalidInput("no samples".into()));
    }
    if let Some(known) = known {
        if known.len() != sizes.len() {
            return Err(CalibrationError::InvalidInput(format!(
                "{} known cameras for {} image sizes",
                known.len(),
                sizes.len()
            )));
        }
    }
    samples
        .iter()
        .try_for_each(|sample| sample.validate(sizes.len()))
}

/// The smallest frame that contains every image.
fn common_frame(sizes: &[ImageSize]) -> ImageSize {
    ImageSize::new(
        sizes.iter().map(|s| s.width).max().unwrap_or(0),
        sizes.iter().map(|s| s.height).max().unwrap_or(0),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_from_json() {
        let config: CalibrationConfig = serde_json::from_str(
            r#"{
                "strategy": {"clustering": {"subset_size": 3, "retained": 4}},
                "flags": {"zero_tangential": true}
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.strategy,
            Strategy::Clustering(ClusteringConfig::new().subset_size(3).retained(4))
        );
        assert!(config.flags.zero_tangential);
        let direct: CalibrationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(direct, CalibrationConfig::new());
    }

    #[test]
    fn common_frame_is_the_largest() {
        let frame = common_frame(&[ImageSize::new(1280, 720), ImageSize::new(640, 960)]);
        assert_eq!(frame, ImageSize::new(1280, 960));
    }

    #[test]
    fn rejects_invalid_input() {
        let engine = CalibrationEngine::new(CalibrationConfig::new());
        let size = ImageSize::new(640, 480);
        let run = |samples: &[CalibrationSample], sizes: &[ImageSize]| {
            engine.calibrate(
                samples,
                sizes,
                None,
                &mut crate::NoProgress,
                &CancellationToken::new(),
            )
        };
        assert!(matches!(
            run(&[], &[size]),
            Err(CalibrationError::InvalidInput(_))
        ));
        assert!(matches!(
            run(&[], &[size; 3]),
            Err(CalibrationError::InvalidInput(_))
        ));
        let sample = CalibrationSample::new(
            crate::checkerboard(2, 2, 1.0),
            vec![vec![nalgebra::Point2::origin(); 4]],
        );
        assert!(matches!(
            run(&[sample], &[size, size]),
            Err(CalibrationError::InvalidInput(_))
        ));
    }
}
