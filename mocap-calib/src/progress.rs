use crate::CalibrationCombination;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

/// How far a calibration run has come.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Progress {
    /// Combinations solved so far, including failed ones.
    pub evaluated: usize,
    /// Combinations currently retained.
    pub retained: usize,
    /// Fraction of the run that is done, in `[0, 1]`.
    pub fraction: f64,
    pub elapsed: Duration,
    /// Extrapolated from `elapsed` and `fraction`; `None` before anything is done.
    pub remaining: Option<Duration>,
}

impl Progress {
    pub(crate) fn new(evaluated: usize, retained: usize, fraction: f64, elapsed: Duration) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        let remaining = (fraction > 0.0)
            .then(|| elapsed.as_secs_f64() * (1.0 / fraction - 1.0))
            .filter(|secs| secs.is_finite())
            .map(Duration::from_secs_f64);
        Self {
            evaluated,
            retained,
            fraction,
            elapsed,
            remaining,
        }
    }
}

/// Receives notifications from a running calibration.
///
/// Any `FnMut(&Progress)` closure is an observer.
pub trait CalibrationObserver {
    fn on_progress(&mut self, progress: &Progress);

    /// Called with every combination after it has been solved.
    fn on_combination(&mut self, _combination: &CalibrationCombination) {}
}

impl<F> CalibrationObserver for F
where
    F: FnMut(&Progress),
{
    fn on_progress(&mut self, progress: &Progress) {
        self(progress)
    }
}

/// An observer that ignores everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoProgress;

impl CalibrationObserver for NoProgress {
    fn on_progress(&mut self, _: &Progress) {}
}

/// Forwards progress over a channel. A disconnected receiver is ignored.
#[derive(Clone, Debug)]
pub struct ProgressSender(pub Sender<Progress>);

impl CalibrationObserver for ProgressSender {
    fn on_progress(&mut self, progress: &Progress) {
        self.0.send(*progress).ok();
    }
}

/// Cooperative cancellation of a calibration run.
///
/// Clones share the same flag. The search checks it between combinations.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
