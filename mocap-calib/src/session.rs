use crate::{
    CalibrationConfig, CalibrationEngine, CalibrationError, CalibrationObserver,
    CalibrationParameters, CalibrationSample, CameraParameters, CancellationToken,
    CombinationSolver, PlanarSolver, Progress, ProgressSender,
};
use log::*;
use mocap_core::Skew3;
use mocap_pinhole::{CameraModel, CameraSystem, ImageSize};
use nalgebra::Vector3;
use std::sync::mpsc::{channel, Receiver};
use std::thread::{self, JoinHandle};

/// Whether a session holds usable parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum CalibrationState {
    Uncalibrated,
    Calibrated(CalibrationParameters),
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self::Uncalibrated
    }
}

impl CalibrationState {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, Self::Calibrated(_))
    }

    pub fn parameters(&self) -> Option<&CalibrationParameters> {
        match self {
            Self::Calibrated(params) => Some(params),
            Self::Uncalibrated => None,
        }
    }
}

/// The samples collected for one or two cameras and the outcome of calibrating them.
///
/// A failed run leaves the session [`Uncalibrated`](CalibrationState::Uncalibrated), a
/// cancelled run leaves the previous state alone.
///
/// ```no_run
/// use mocap_calib::*;
/// use mocap_pinhole::ImageSize;
///
/// # fn detect() -> Option<CalibrationSample> { None }
/// let mut session = CalibrationSession::new(
///     vec![ImageSize::new(1280, 720), ImageSize::new(1280, 720)],
///     CalibrationConfig::new(),
/// )?;
/// while let Some(sample) = detect() {
///     session.add_sample(sample)?;
/// }
/// let handle = session.spawn();
/// for progress in handle.progress() {
///     println!("{:.0}%", 100.0 * progress.fraction);
/// }
/// let outcome = handle.join()?;
/// let system = outcome.session.camera_system(&["left", "right"])?;
/// # Ok::<(), CalibrationError>(())
/// ```
#[derive(Debug)]
pub struct CalibrationSession<S = PlanarSolver> {
    sizes: Vec<ImageSize>,
    engine: CalibrationEngine<S>,
    samples: Vec<CalibrationSample>,
    known: Option<Vec<CameraParameters>>,
    state: CalibrationState,
}

impl CalibrationSession {
    pub fn new(sizes: Vec<ImageSize>, config: CalibrationConfig) -> Result<Self, CalibrationError> {
        Self::with_engine(sizes, CalibrationEngine::new(config))
    }
}

impl<S> CalibrationSession<S>
where
    S: CombinationSolver,
{
    pub fn with_engine(
        sizes: Vec<ImageSize>,
        engine: CalibrationEngine<S>,
    ) -> Result<Self, CalibrationError> {
        if !(1..=2).contains(&sizes.len()) {
            return Err(CalibrationError::InvalidInput(format!(
                "a session calibrates one or two cameras, got {}",
                sizes.len()
            )));
        }
        Ok(Self {
            sizes,
            engine,
            samples: vec![],
            known: None,
            state: CalibrationState::Uncalibrated,
        })
    }

    /// Holds the intrinsics of every camera fixed so that only the stereo relation is solved.
    pub fn known_intrinsics(
        &mut self,
        known: Vec<CameraParameters>,
    ) -> Result<(), CalibrationError> {
        if known.len() != self.sizes.len() {
            return Err(CalibrationError::InvalidInput(format!(
                "{} known cameras for a session of {}",
                known.len(),
                self.sizes.len()
            )));
        }
        self.known = Some(known);
        Ok(())
    }

    /// Adds a sample after checking that it fits the session's cameras.
    pub fn add_sample(&mut self, sample: CalibrationSample) -> Result<(), CalibrationError> {
        sample.validate(self.sizes.len())?;
        self.samples.push(sample);
        debug!("{} calibration samples", self.samples.len());
        Ok(())
    }

    pub fn samples(&self) -> &[CalibrationSample] {
        &self.samples
    }

    pub fn clear_samples(&mut self) {
        self.samples.clear();
    }

    pub fn sizes(&self) -> &[ImageSize] {
        &self.sizes
    }

    pub fn engine(&self) -> &CalibrationEngine<S> {
        &self.engine
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    /// Calibrates from the collected samples on the calling thread.
    pub fn run<O>(
        &mut self,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> Result<CalibrationParameters, CalibrationError>
    where
        O: CalibrationObserver + ?Sized,
    {
        let outcome = self.engine.calibrate(
            &self.samples,
            &self.sizes,
            self.known.as_deref(),
            observer,
            cancel,
        );
        match outcome {
            Ok(params) => {
                self.state = CalibrationState::Calibrated(params.clone());
                Ok(params)
            }
            Err(CalibrationError::Cancelled) => Err(CalibrationError::Cancelled),
            Err(error) => {
                self.state = CalibrationState::Uncalibrated;
                Err(error)
            }
        }
    }

    /// The calibrated cameras as [`CameraModel`]s named `names`.
    ///
    /// Camera 0 defines the world frame; camera 1 is placed at the stereo extrinsics.
    pub fn camera_models(&self, names: &[&str]) -> Result<Vec<CameraModel>, CalibrationError> {
        let params = self.state.parameters().ok_or_else(|| {
            CalibrationError::InvalidInput("the session is not calibrated".into())
        })?;
        if names.len() != params.cameras.len() {
            return Err(CalibrationError::InvalidInput(format!(
                "{} names for {} cameras",
                names.len(),
                params.cameras.len()
            )));
        }
        Ok(params
            .cameras
            .iter()
            .zip(names)
            .enumerate()
            .map(|(index, (camera, name))| {
                let (rotation, translation) = match (index, params.extrinsics) {
                    (1, Some(extrinsics)) => {
                        (Skew3::from(extrinsics.rotation), extrinsics.translation)
                    }
                    _ => (Skew3::identity(), Vector3::zeros()),
                };
                CameraModel::new(
                    *name,
                    camera.image_size,
                    camera.camera_intrinsics(),
                    camera.lens_distortion(),
                    rotation,
                    translation,
                )
            })
            .collect())
    }

    pub fn camera_system(&self, names: &[&str]) -> Result<CameraSystem, CalibrationError> {
        self.camera_models(names).map(CameraSystem::new)
    }
}

impl<S> CalibrationSession<S>
where
    S: CombinationSolver + 'static,
{
    /// Moves the session onto a worker thread and runs it there.
    ///
    /// Sample capture can go on with a new session while the search runs. Dropping the
    /// handle's progress receiver does not stop the search; [`CalibrationHandle::cancel`] does.
    pub fn spawn(mut self) -> CalibrationHandle<S> {
        let (sender, progress) = channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let thread = thread::spawn(move || {
            let result = self.run(&mut ProgressSender(sender), &token);
            SessionOutcome {
                session: self,
                result,
            }
        });
        CalibrationHandle {
            progress,
            cancel,
            thread,
        }
    }
}

/// The session handed back by a worker thread with the result of its run.
#[derive(Debug)]
pub struct SessionOutcome<S = PlanarSolver> {
    pub session: CalibrationSession<S>,
    pub result: Result<CalibrationParameters, CalibrationError>,
}

/// A calibration running on a worker thread.
#[derive(Debug)]
pub struct CalibrationHandle<S = PlanarSolver> {
    progress: Receiver<Progress>,
    cancel: CancellationToken,
    thread: JoinHandle<SessionOutcome<S>>,
}

impl<S> CalibrationHandle<S> {
    /// Progress reports, one per solved combination. The iterator ends with the run.
    pub fn progress(&self) -> &Receiver<Progress> {
        &self.progress
    }

    /// Asks the search to stop after the combination it is solving.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the run to end.
    pub fn join(self) -> Result<SessionOutcome<S>, CalibrationError> {
        self.thread.join().map_err(|_| {
            error!("calibration worker panicked");
            CalibrationError::WorkerPanicked
        })
    }
}
