use crate::{SyncConfig, SyncError};
use log::*;
use std::collections::VecDeque;

/// One frame per source, all captured within the sync delta of each other.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameSet<F> {
    /// Frames ordered by source index.
    pub frames: Vec<F>,
    /// Capture timestamp of each frame, in seconds.
    pub timestamps: Vec<f64>,
}

impl<F> FrameSet<F> {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The largest pairwise timestamp difference inside the set.
    pub fn max_skew(&self) -> f64 {
        let newest = self.timestamps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let oldest = self.timestamps.iter().copied().fold(f64::INFINITY, f64::min);
        if self.timestamps.is_empty() {
            0.0
        } else {
            newest - oldest
        }
    }

    /// The timestamp of the newest frame, which is the time the set is aligned to.
    pub fn timestamp(&self) -> f64 {
        self.timestamps.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn into_frames(self) -> Vec<F> {
        self.frames
    }
}

/// Aligns frames from independently clocked sources into [`FrameSet`]s.
///
/// Every source gets a FIFO buffer. Each time a frame arrives and every buffer holds at least
/// one frame, the oldest frames of all buffers are compared against the newest of them. If they
/// all lie within the sync delta they are emitted together, otherwise the ones that are too old
/// to ever be paired are discarded. This repeats until a buffer runs empty.
///
/// ```
/// use mocap_sync::FrameSynchronizer;
///
/// let mut sync = FrameSynchronizer::new(2, 0.01).unwrap();
/// assert!(sync.push(0, 0.000, "a0").unwrap().is_empty());
/// assert!(sync.push(0, 0.033, "a1").unwrap().is_empty());
/// // "a0" is too old to be paired with "b1" and gets discarded.
/// let sets = sync.push(1, 0.035, "b1").unwrap();
/// assert_eq!(sets[0].frames, vec!["a1", "b1"]);
/// assert_eq!(sync.dropped(), &[1, 0]);
/// ```
#[derive(Debug)]
pub struct FrameSynchronizer<F> {
    buffers: Vec<VecDeque<(f64, F)>>,
    sync_delta: f64,
    max_buffered: Option<usize>,
    dropped: Vec<usize>,
    emitted: usize,
}

impl<F> FrameSynchronizer<F> {
    /// Creates a synchronizer for `sources` streams with an explicit sync delta in seconds.
    pub fn new(sources: usize, sync_delta: f64) -> Result<Self, SyncError> {
        if sources == 0 {
            return Err(SyncError::NoSources);
        }
        if !(sync_delta.is_finite() && sync_delta > 0.0) {
            return Err(SyncError::NonPositiveDelta(sync_delta));
        }
        Ok(Self {
            buffers: (0..sources).map(|_| VecDeque::new()).collect(),
            sync_delta,
            max_buffered: None,
            dropped: vec![0; sources],
            emitted: 0,
        })
    }

    /// Creates a synchronizer for sources with the given nominal frame rates.
    ///
    /// All sources must share one frame rate. Without an explicit delta in `config`, half a
    /// frame period is used.
    pub fn with_config(frame_rates: &[f64], config: &SyncConfig) -> Result<Self, SyncError> {
        let frame_rate = common_frame_rate(frame_rates)?;
        let sync = Self::new(frame_rates.len(), config.delta_for(frame_rate))?;
        Ok(Self {
            max_buffered: config.max_buffered,
            ..sync
        })
    }

    /// Limit each buffer to `max_buffered` frames, dropping the oldest on overflow.
    #[must_use]
    pub fn max_buffered(self, max_buffered: Option<usize>) -> Self {
        Self {
            max_buffered,
            ..self
        }
    }

    pub fn sources(&self) -> usize {
        self.buffers.len()
    }

    pub fn sync_delta(&self) -> f64 {
        self.sync_delta
    }

    /// Frames discarded per source, either as unpairable or because of buffer overflow.
    pub fn dropped(&self) -> &[usize] {
        &self.dropped
    }

    /// The number of frame sets emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// The number of frames waiting in the buffer of `source`.
    pub fn buffered(&self, source: usize) -> Option<usize> {
        self.buffers.get(source).map(VecDeque::len)
    }

    pub fn buffered_total(&self) -> usize {
        self.buffers.iter().map(VecDeque::len).sum()
    }

    /// Discards all buffered frames.
    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
    }

    /// Adds a frame captured by `source` at `timestamp` and returns every frame set that became
    /// complete.
    pub fn push(
        &mut self,
        source: usize,
        timestamp: f64,
        frame: F,
    ) -> Result<Vec<FrameSet<F>>, SyncError> {
        let sources = self.sources();
        let buffer = self
            .buffers
            .get_mut(source)
            .ok_or(SyncError::UnknownSource {
                source_index: source,
                sources,
            })?;
        if !timestamp.is_finite() {
            return Err(SyncError::InvalidTimestamp {
                source_index: source,
                timestamp,
            });
        }
        buffer.push_back((timestamp, frame));
        if let Some(max_buffered) = self.max_buffered {
            while buffer.len() > max_buffered.max(1) {
                buffer.pop_front();
                self.dropped[source] += 1;
                warn!("buffer of source {} overflowed, dropping its oldest frame", source);
            }
        }
        Ok(self.synchronize())
    }

    fn synchronize(&mut self) -> Vec<FrameSet<F>> {
        let mut sets = vec![];
        while self.buffers.iter().all(|buffer| !buffer.is_empty()) {
            let oldest: Vec<f64> = self
                .buffers
                .iter()
                .filter_map(|buffer| buffer.front().map(|&(timestamp, _)| timestamp))
                .collect();
            let target = oldest.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if oldest.iter().all(|&t| target - t <= self.sync_delta) {
                let (timestamps, frames) = self
                    .buffers
                    .iter_mut()
                    .filter_map(VecDeque::pop_front)
                    .unzip();
                self.emitted += 1;
                sets.push(FrameSet { frames, timestamps });
            } else {
                for (source, (buffer, &t)) in self.buffers.iter_mut().zip(&oldest).enumerate() {
                    if target - t > self.sync_delta {
                        buffer.pop_front();
                        self.dropped[source] += 1;
                        debug!(
                            "dropping frame of source {} at {:.4}s, {:.4}s behind",
                            source,
                            t,
                            target - t
                        );
                    }
                }
            }
        }
        sets
    }
}

/// Checks that all sources share one nominal frame rate and returns it.
pub fn common_frame_rate(frame_rates: &[f64]) -> Result<f64, SyncError> {
    let &expected = frame_rates.first().ok_or(SyncError::NoSources)?;
    for (source_index, &found) in frame_rates.iter().enumerate() {
        if !(found.is_finite() && found > 0.0) {
            return Err(SyncError::InvalidFrameRate(found));
        }
        if (found - expected).abs() > 1e-6 * expected {
            return Err(SyncError::MismatchedFrameRates {
                source_index,
                expected,
                found,
            });
        }
    }
    Ok(expected)
}
