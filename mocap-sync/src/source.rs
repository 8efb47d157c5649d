use crate::SourceError;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::time::Duration;

/// A capture device that produces timestamped frames.
///
/// [`SynchronizedCapture`](crate::SynchronizedCapture) drives each source from its own thread:
/// it calls [`start`](FrameSource::start) once, then [`grab`](FrameSource::grab) until the
/// capture stops, and always finishes with [`release`](FrameSource::release), also when `start`
/// or `grab` failed.
pub trait FrameSource: Send {
    type Frame: Send;

    /// The nominal frame rate in frames per second.
    fn frame_rate(&self) -> f64;

    /// Acquires the device.
    fn start(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Blocks until the next frame is available.
    ///
    /// Returns the capture timestamp in seconds with the frame, or `None` at the end of the
    /// stream.
    fn grab(&mut self) -> Result<Option<(f64, Self::Frame)>, SourceError>;

    /// Releases the device.
    fn release(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    type Frame = S::Frame;

    fn frame_rate(&self) -> f64 {
        (**self).frame_rate()
    }

    fn start(&mut self) -> Result<(), SourceError> {
        (**self).start()
    }

    fn grab(&mut self) -> Result<Option<(f64, Self::Frame)>, SourceError> {
        (**self).grab()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// A camera stand-in that emits frame indices at a nominal rate with bounded clock jitter.
///
/// ```
/// use mocap_sync::{FrameSource, SimulatedSource};
///
/// let mut source = SimulatedSource::new(30.0).frames(2).offset(1.0);
/// assert_eq!(source.grab().unwrap(), Some((1.0, 0)));
/// assert_eq!(source.grab().unwrap().map(|(_, frame)| frame), Some(1));
/// assert_eq!(source.grab().unwrap(), None);
/// ```
#[derive(Clone, Debug)]
pub struct SimulatedSource {
    frame_rate: f64,
    offset: f64,
    jitter: f64,
    frames: Option<u64>,
    paced: bool,
    rng: Pcg64,
    index: u64,
}

impl SimulatedSource {
    pub fn new(frame_rate: f64) -> Self {
        Self {
            frame_rate,
            offset: 0.0,
            jitter: 0.0,
            frames: None,
            paced: false,
            rng: Pcg64::from_seed([0; 32]),
            index: 0,
        }
    }

    /// Clock offset of the first frame, in seconds.
    #[must_use]
    pub fn offset(self, offset: f64) -> Self {
        Self { offset, ..self }
    }

    /// Timestamps deviate from the nominal frame time by less than `jitter` seconds.
    #[must_use]
    pub fn jitter(self, jitter: f64) -> Self {
        Self {
            jitter: jitter.abs(),
            ..self
        }
    }

    /// End the stream after this many frames.
    #[must_use]
    pub fn frames(self, frames: u64) -> Self {
        Self {
            frames: Some(frames),
            ..self
        }
    }

    /// Sleep one frame period in every [`grab`](FrameSource::grab), like a real camera.
    #[must_use]
    pub fn paced(self, paced: bool) -> Self {
        Self { paced, ..self }
    }

    #[must_use]
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Pcg64::seed_from_u64(seed),
            ..self
        }
    }
}

impl FrameSource for SimulatedSource {
    type Frame = u64;

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn grab(&mut self) -> Result<Option<(f64, u64)>, SourceError> {
        if self.frames.map_or(false, |frames| self.index >= frames) {
            return Ok(None);
        }
        if self.paced {
            std::thread::sleep(Duration::from_secs_f64(1.0 / self.frame_rate));
        }
        let jitter = if self.jitter > 0.0 {
            self.rng.gen_range(-self.jitter..self.jitter)
        } else {
            0.0
        };
        let frame = self.index;
        self.index += 1;
        Ok(Some((
            self.offset + frame as f64 / self.frame_rate + jitter,
            frame,
        )))
    }
}
