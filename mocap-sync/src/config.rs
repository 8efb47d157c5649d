use serde::{Deserialize, Serialize};

/// Settings shared by [`FrameSynchronizer`](crate::FrameSynchronizer) and
/// [`SynchronizedCapture`](crate::SynchronizedCapture).
///
/// ```
/// use mocap_sync::SyncConfig;
///
/// let config = SyncConfig::new().sync_delta(0.01).max_frame_sets(200);
/// assert_eq!(config.delta_for(30.0), 0.01);
/// assert_eq!(SyncConfig::new().delta_for(25.0), 0.02);
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum timestamp skew inside a frame set, in seconds.
    ///
    /// Defaults to half of one frame period.
    pub sync_delta: Option<f64>,
    /// Stop capturing after this many frame sets.
    pub max_frame_sets: Option<usize>,
    /// Drop the oldest frame of a source whose buffer grows beyond this length.
    ///
    /// Unbounded when `None`.
    pub max_buffered: Option<usize>,
}

impl SyncConfig {
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
    }

    #[must_use]
    pub fn sync_delta(self, sync_delta: f64) -> Self {
        Self {
            sync_delta: Some(sync_delta),
            ..self
        }
    }

    #[must_use]
    pub fn max_frame_sets(self, max_frame_sets: usize) -> Self {
        Self {
            max_frame_sets: Some(max_frame_sets),
            ..self
        }
    }

    #[must_use]
    pub fn max_buffered(self, max_buffered: usize) -> Self {
        Self {
            max_buffered: Some(max_buffered),
            ..self
        }
    }

    /// The sync delta to use for sources running at `frame_rate`.
    pub fn delta_for(&self, frame_rate: f64) -> f64 {
        self.sync_delta.unwrap_or(0.5 / frame_rate)
    }
}
