use serde::{Deserialize, Serialize};

/// The persisted parameters of one camera, as stored in a calibration file.
///
/// Each camera is one table keyed by its name. Only `matrix` is required;
/// everything else falls back to the defaults of an uncalibrated 1080p camera
/// placed at the world origin. Values are checked once, when a
/// [`CameraModel`](crate::CameraModel) is built from the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// The camera name. When empty, the key of the table is used.
    #[serde(default)]
    pub name: String,
    /// Image size as `[width, height]` in pixels.
    #[serde(default = "default_size")]
    pub size: [u32; 2],
    /// The 3x3 intrinsic matrix, row major.
    pub matrix: [[f64; 3]; 3],
    /// Distortion coefficients: `[k1, k2, p1, p2]` or `[k1, k2, p1, p2, k3]`,
    /// or `[k1, k2, k3, k4]` for fisheye cameras.
    #[serde(default = "default_distortions")]
    pub distortions: Vec<f64>,
    /// The world to camera rotation as a Rodrigues vector.
    #[serde(default)]
    pub rotation: [f64; 3],
    /// The world to camera translation.
    #[serde(default)]
    pub translation: [f64; 3],
    /// A projection matrix exported by another tool, cross-checked against `K [R | t]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_matrix: Option<[[f64; 4]; 3]>,
    #[serde(default)]
    pub fisheye: bool,
}

fn default_size() -> [u32; 2] {
    [1920, 1080]
}

fn default_distortions() -> Vec<f64> {
    vec![0.0; 4]
}

impl CameraConfig {
    /// A config with the given name and intrinsic matrix and every other field at its default.
    pub fn new(name: impl Into<String>, matrix: [[f64; 3]; 3]) -> Self {
        Self {
            name: name.into(),
            size: default_size(),
            matrix,
            distortions: default_distortions(),
            rotation: [0.0; 3],
            translation: [0.0; 3],
            projection_matrix: None,
            fisheye: false,
        }
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The center of the pixel grid, `((w - 1) / 2, (h - 1) / 2)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.width as f64 - 1.0) * 0.5,
            (self.height as f64 - 1.0) * 0.5,
        )
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        let [width, height] = default_size();
        Self { width, height }
    }
}

impl From<[u32; 2]> for ImageSize {
    fn from([width, height]: [u32; 2]) -> Self {
        Self { width, height }
    }
}

impl From<ImageSize> for [u32; 2] {
    fn from(size: ImageSize) -> Self {
        [size.width, size.height]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_filled_in() {
        let config: CameraConfig = toml::from_str(
            r#"
            matrix = [[1000.0, 0.0, 960.0], [0.0, 1000.0, 540.0], [0.0, 0.0, 1.0]]
            "#,
        )
        .unwrap();
        assert_eq!(config.size, [1920, 1080]);
        assert_eq!(config.distortions, vec![0.0; 4]);
        assert_eq!(config.rotation, [0.0; 3]);
        assert_eq!(config.translation, [0.0; 3]);
        assert!(config.projection_matrix.is_none());
        assert!(!config.fisheye);
        assert!(config.name.is_empty());
    }

    #[test]
    fn matrix_is_required() {
        assert!(toml::from_str::<CameraConfig>("size = [640, 480]").is_err());
    }
}
