//! # Motion Capture Core
//!
//! This library provides the small set of types shared by every crate in the motion capture
//! workspace: image-space keypoints and their detector confidences, the NaN convention for
//! unresolved 3d points, the so(3) (Rodrigues) rotation representation used by calibration
//! files, and averaging of rotations on the SO(3) manifold.
//!
//! The crate is designed to be very small so that it adds negligable build time. Anything that
//! is only needed by one stage of the pipeline (camera models, synchronization, calibration or
//! triangulation) belongs in that stage's crate instead.
//!
//! ## Coordinate conventions
//!
//! * Image points are in pixels with the origin at the top-left corner of the image.
//! * The camera frame has positive X to the right, positive Y down and positive Z forwards.
//! * Extrinsics map world coordinates into camera coordinates: `x_cam = R * x_world + t`.
//!   A projection matrix is therefore `P = K * [R | t]`.

mod keypoint;
mod point;
mod rotation;
mod so3;

pub use keypoint::*;
pub use nalgebra;
pub use point::*;
pub use rotation::*;
pub use so3::*;
