//! Time alignment of independently clocked camera streams.
//!
//! Cameras in a motion capture rig run on their own clocks. Even when they share a nominal
//! frame rate, their frames arrive with a small offset and jitter, and occasionally a frame is
//! late or missing. [`FrameSynchronizer`] turns the per-camera streams into [`FrameSet`]s that
//! contain exactly one frame per camera, with all timestamps within the configured sync delta
//! of each other. Frames that can never be paired are discarded and counted.
//!
//! [`SynchronizedCapture`] drives a set of [`FrameSource`]s, one thread per source, and
//! delivers the frame sets over a channel.
//!
//! A source that stops producing frames without ending its stream stalls the output. No error
//! is raised for this; it shows up as an absence of frame sets.

mod capture;
mod config;
mod error;
mod source;
mod synchronizer;

pub use capture::*;
pub use config::*;
pub use error::*;
pub use source::*;
pub use synchronizer::*;
