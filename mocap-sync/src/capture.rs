use crate::{common_frame_rate, FrameSet, FrameSource, FrameSynchronizer, SyncConfig, SyncError};
use log::*;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What happened during a capture, returned by [`SynchronizedCapture::stop`].
#[derive(Debug, Default)]
pub struct CaptureSummary {
    /// Frame sets delivered to the receiver.
    pub frame_sets: usize,
    /// Frames discarded per source.
    pub dropped: Vec<usize>,
    /// Failures, as `(source, error)`.
    pub errors: Vec<(usize, SyncError)>,
}

struct State<F> {
    synchronizer: FrameSynchronizer<F>,
    running: bool,
    frame_sets: usize,
    max_frame_sets: Option<usize>,
    ended: Vec<bool>,
    errors: Vec<(usize, SyncError)>,
}

impl<F> State<F> {
    /// No more sets can be formed once a finished source has nothing left in its buffer.
    fn exhausted(&self) -> bool {
        self.ended
            .iter()
            .enumerate()
            .any(|(source, &ended)| ended && self.synchronizer.buffered(source) == Some(0))
    }
}

struct Shared<F> {
    state: Mutex<State<F>>,
    changed: Condvar,
}

impl<F> Shared<F> {
    fn lock(&self) -> MutexGuard<'_, State<F>> {
        // A panicking producer cannot leave the buffers half updated, so keep going.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_running(&self) -> bool {
        self.lock().running
    }

    fn halt(&self) {
        self.lock().running = false;
        self.changed.notify_all();
    }
}

/// Calls [`FrameSource::release`] when the capture thread exits, however it exits.
struct SourceGuard<S: FrameSource>(S);

impl<S: FrameSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Captures from several sources at once, one thread per source, and delivers synchronized
/// [`FrameSet`]s over a channel.
///
/// Every capture thread inserts its frames into the shared [`FrameSynchronizer`] and runs the
/// synchronization check itself while holding the lock. The capture ends when
/// [`stop`](Self::stop) is called, after `max_frame_sets` sets, when a source fails, when a
/// source that reached the end of its stream has no buffered frames left, or when the receiver
/// is dropped. Sources are released in every case.
///
/// ```
/// use mocap_sync::{SimulatedSource, SyncConfig, SynchronizedCapture};
///
/// let sources = (0..3)
///     .map(|i| SimulatedSource::new(30.0).seed(i).jitter(0.002).frames(100))
///     .collect();
/// let config = SyncConfig::new().max_frame_sets(10);
/// let (mut capture, frame_sets) = SynchronizedCapture::start(sources, &config).unwrap();
/// capture.wait_until_finished();
/// let summary = capture.stop();
/// assert_eq!(summary.frame_sets, 10);
/// assert_eq!(frame_sets.iter().count(), 10);
/// ```
pub struct SynchronizedCapture<F> {
    shared: Arc<Shared<F>>,
    workers: Vec<JoinHandle<()>>,
}

impl<F: Send + 'static> SynchronizedCapture<F> {
    /// Spawns one capture thread per source.
    pub fn start<S>(
        sources: Vec<S>,
        config: &SyncConfig,
    ) -> Result<(Self, Receiver<FrameSet<F>>), SyncError>
    where
        S: FrameSource<Frame = F> + 'static,
    {
        let frame_rates: Vec<f64> = sources.iter().map(|source| source.frame_rate()).collect();
        let frame_rate = common_frame_rate(&frame_rates)?;
        let synchronizer = FrameSynchronizer::with_config(&frame_rates, config)?;
        info!(
            "starting capture from {} sources at {} fps, sync delta {:.4}s",
            sources.len(),
            frame_rate,
            synchronizer.sync_delta()
        );
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                synchronizer,
                running: true,
                frame_sets: 0,
                max_frame_sets: config.max_frame_sets,
                ended: vec![false; frame_rates.len()],
                errors: vec![],
            }),
            changed: Condvar::new(),
        });
        let (sender, receiver) = mpsc::channel();
        let workers = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                let shared = shared.clone();
                let sender = sender.clone();
                thread::spawn(move || capture_source(index, source, &shared, &sender))
            })
            .collect();
        Ok((Self { shared, workers }, receiver))
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// The number of frame sets delivered so far.
    pub fn frame_sets(&self) -> usize {
        self.shared.lock().frame_sets
    }

    /// Blocks until the capture ends on its own.
    pub fn wait_until_finished(&self) {
        let mut state = self.shared.lock();
        while state.running {
            state = self
                .shared
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the capture ends or `timeout` elapses. Returns `true` if it ended.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .changed
            .wait_timeout_while(state, timeout, |state| state.running)
            .unwrap_or_else(PoisonError::into_inner);
        !state.running
    }

    /// Stops all capture threads, waits for them to release their sources and reports.
    ///
    /// A thread blocked inside [`FrameSource::grab`] exits once that call returns.
    pub fn stop(&mut self) -> CaptureSummary {
        self.shared.halt();
        for (index, worker) in self.workers.drain(..).enumerate() {
            if worker.join().is_err() {
                error!("capture thread of source {} panicked", index);
                self.shared.lock().errors.push((
                    index,
                    SyncError::Source {
                        source_index: index,
                        error: "capture thread panicked".into(),
                    },
                ));
            }
        }
        let mut state = self.shared.lock();
        let summary = CaptureSummary {
            frame_sets: state.frame_sets,
            dropped: state.synchronizer.dropped().to_vec(),
            errors: state.errors.drain(..).collect(),
        };
        state.synchronizer.clear();
        info!(
            "capture stopped after {} frame sets, dropped frames per source {:?}",
            summary.frame_sets, summary.dropped
        );
        summary
    }
}

impl<F> Drop for SynchronizedCapture<F> {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shared.halt();
        for worker in self.workers.drain(..) {
            worker.join().ok();
        }
    }
}

fn capture_source<S>(
    index: usize,
    source: S,
    shared: &Shared<S::Frame>,
    sender: &Sender<FrameSet<S::Frame>>,
) where
    S: FrameSource,
{
    let mut source = SourceGuard(source);
    if let Err(error) = source.0.start() {
        error!("source {} failed to start: {}", index, error);
        fail(index, error, shared);
        return;
    }
    debug!("source {} started", index);
    while shared.is_running() {
        match source.0.grab() {
            Ok(Some((timestamp, frame))) => {
                if !deliver(index, timestamp, frame, shared, sender) {
                    break;
                }
            }
            Ok(None) => {
                info!("source {} reached the end of its stream", index);
                let mut state = shared.lock();
                state.ended[index] = true;
                if state.exhausted() {
                    state.running = false;
                }
                drop(state);
                shared.changed.notify_all();
                break;
            }
            Err(error) => {
                error!("source {} failed: {}", index, error);
                fail(index, error, shared);
                break;
            }
        }
    }
    debug!("source {} stopped", index);
}

/// Inserts one frame and sends every completed set. Returns `false` once the capture is over.
fn deliver<F>(
    index: usize,
    timestamp: f64,
    frame: F,
    shared: &Shared<F>,
    sender: &Sender<FrameSet<F>>,
) -> bool {
    let mut state = shared.lock();
    if !state.running {
        return false;
    }
    let sets = match state.synchronizer.push(index, timestamp, frame) {
        Ok(sets) => sets,
        Err(error) => {
            warn!("rejected frame of source {}: {}", index, error);
            return true;
        }
    };
    for set in sets {
        if sender.send(set).is_err() {
            debug!("frame set receiver dropped");
            state.running = false;
            break;
        }
        state.frame_sets += 1;
        if state
            .max_frame_sets
            .map_or(false, |max| state.frame_sets >= max)
        {
            state.running = false;
            break;
        }
    }
    if state.exhausted() {
        state.running = false;
    }
    let running = state.running;
    drop(state);
    shared.changed.notify_all();
    running
}

fn fail<F>(index: usize, error: crate::SourceError, shared: &Shared<F>) {
    let mut state = shared.lock();
    state.errors.push((
        index,
        SyncError::Source {
            source_index: index,
            error,
        },
    ));
    state.running = false;
    drop(state);
    shared.changed.notify_all();
}
