//! # `mocap`
//!
//! Batteries-included multi-camera motion capture
//!
//! This crate gathers the motion capture crates in one place. It is handy for scripts and
//! tutorials; applications should depend on the individual crates so that they only build what
//! they use. Every component is behind a feature of the same name, all enabled by default.
//!
//! The basic types of [`mocap_core`] are included in the root of the crate.
//!
//! ## Modules
//! * [`camera`] - camera models, distortion and calibration files
//! * [`sync`] - aligning camera streams into frame sets
//! * [`calib`] - estimating camera parameters from a calibration pattern
//! * [`geom`] - triangulation and reprojection diagnostics

pub use mocap_core::*;

/// Camera models and calibration files
pub mod camera {
    #[cfg(feature = "mocap-pinhole")]
    pub use mocap_pinhole::*;
}

/// Frame synchronization and threaded capture
pub mod sync {
    #[cfg(feature = "mocap-sync")]
    pub use mocap_sync::*;
}

/// Camera calibration
pub mod calib {
    #[cfg(feature = "mocap-calib")]
    pub use mocap_calib::*;
}

/// Multiple-view geometry
pub mod geom {
    #[cfg(feature = "mocap-geom")]
    pub use mocap_geom::*;
}
