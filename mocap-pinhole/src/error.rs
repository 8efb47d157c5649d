use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera `{camera}`: {reason}")]
    InvalidConfig { camera: String, reason: String },
    #[error("camera `{camera}`: expected {expected} distortion coefficients, got {count}")]
    DistortionLength {
        camera: String,
        expected: &'static str,
        count: usize,
    },
    #[error("camera `{camera}`: intrinsic matrix is singular")]
    SingularIntrinsics { camera: String },
    #[error("camera `{camera}`: rotation is not a valid rotation matrix")]
    InvalidRotation { camera: String },
    #[error("no camera tables found in calibration file")]
    NoCameras,
    #[error("duplicate camera `{0}`")]
    DuplicateCamera(String),
    #[error("failed to access `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse calibration file")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize calibration file")]
    Serialize(#[from] toml::ser::Error),
    #[error("legacy calibration, line {line}: {reason}")]
    Legacy { line: usize, reason: String },
}

impl CameraError {
    pub(crate) fn invalid(camera: &str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            camera: camera.to_owned(),
            reason: reason.into(),
        }
    }
}
