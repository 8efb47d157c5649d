use thiserror::Error;

/// Errors reported by capture devices.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("at least one frame source is required")]
    NoSources,
    #[error("frame rate must be positive and finite, got {0}")]
    InvalidFrameRate(f64),
    #[error("source {source_index} runs at {found} fps but source 0 runs at {expected} fps")]
    MismatchedFrameRates {
        source_index: usize,
        expected: f64,
        found: f64,
    },
    #[error("sync delta must be positive and finite, got {0}")]
    NonPositiveDelta(f64),
    #[error("frame from source {source_index}, but only {sources} sources are synchronized")]
    UnknownSource { source_index: usize, sources: usize },
    #[error("source {source_index} produced a non-finite timestamp {timestamp}")]
    InvalidTimestamp { source_index: usize, timestamp: f64 },
    #[error("source {source_index} failed")]
    Source {
        source_index: usize,
        #[source]
        error: SourceError,
    },
}
