//! This crate contains the multi-view geometry of the motion capture pipeline.
//!
//! ## Triangulation
//!
//! In this problem we know the projection matrix of every camera and the pixel at which each
//! camera observed the same keypoint. We want to find the 3d point whose projections best
//! agree with all observations.
//!
//! - `p` the point we are trying to triangulate
//! - `a` the observation on camera A
//! - `b` the observation on camera B
//! - `O` the optical center of a camera
//! - `@` the image plane
//!
//! ```text
//!                        @
//!                        @
//!               p--------b--------O
//!              /         @
//!             /          @
//!            /           @
//!           /            @
//!   @@@@@@@a@@@@@
//!         /
//!        /
//!       /
//!      O
//! ```
//!
//! Each observation contributes two linear equations on the homogeneous point, which are solved
//! together with the [direct linear transform](triangulation::DltTriangulator). Pose detectors
//! report a confidence per keypoint, and views below the confidence threshold are left out.
//! When fewer than two views remain, the point is undefined and returned as NaN.
//!
//! ## Batches
//!
//! The [`batch`] module triangulates whole keypoint sequences stored as `ndarray` tensors.
//! Every point is independent, so frames are processed in parallel when the `rayon` feature
//! is enabled (the default).

pub mod batch;
pub mod reprojection;
pub mod triangulation;

pub use reprojection::*;
pub use triangulation::*;
