//! Calibration of single cameras and stereo pairs from a planar pattern.
//!
//! A [`CalibrationSample`] holds the corners of the pattern as seen by every camera at one
//! instant. The [`CalibrationEngine`] turns a list of samples into intrinsics, distortion and,
//! for a stereo pair, the pose of the second camera relative to the first.
//!
//! Two strategies are available:
//!
//! - [`Strategy::Direct`] solves once over all samples.
//! - [`Strategy::Clustering`] solves many subsets of `R` samples, keeps the `K` subsets with the
//!   lowest reprojection error and averages their parameters. A few bad detections then only
//!   spoil the subsets that contain them instead of the whole calibration.
//!
//! Each solve is done by a [`CombinationSolver`]. The default [`PlanarSolver`] follows Zhang's
//! method: a homography per sample gives closed-form focal lengths and pattern poses, which are
//! then refined together with the lens distortion by Levenberg-Marquardt.
//!
//! [`CalibrationSession`] collects the samples of an interactive capture, runs the engine on a
//! worker thread with progress reporting and cancellation, and holds the outcome as a
//! [`CalibrationState`]. Its parameters convert into the [`CameraModel`](mocap_pinhole::CameraModel)s
//! of the rest of the pipeline.

mod aggregate;
mod bundle;
mod combination;
mod engine;
mod error;
mod homography;
mod init;
mod parameters;
mod progress;
mod sample;
mod session;
mod solver;

pub use aggregate::*;
pub use combination::*;
pub use engine::*;
pub use error::*;
pub use homography::*;
pub use init::*;
pub use parameters::*;
pub use progress::*;
pub use sample::*;
pub use session::*;
pub use solver::*;

pub use nalgebra;
