use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    /// The configuration or the samples cannot be calibrated. Raised before any work starts.
    #[error("invalid calibration input: {0}")]
    InvalidInput(String),
    /// No usable parameters came out of the run. The session is left uncalibrated.
    #[error("calibration failed: {0}")]
    Failed(String),
    #[error("calibration was cancelled")]
    Cancelled,
    #[error("a sample needs at least {required} points, got {found}")]
    NotEnoughPoints { required: usize, found: usize },
    #[error("calibration pattern points must lie on the z = 0 plane")]
    NonPlanarPattern,
    #[error("degenerate configuration: {0}")]
    Degenerate(&'static str),
    #[error("singular value decomposition did not converge")]
    SvdFailed,
    #[error("calibration worker panicked")]
    WorkerPanicked,
}
