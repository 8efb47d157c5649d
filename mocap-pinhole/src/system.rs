use crate::{CameraConfig, CameraError, CameraIntrinsics, CameraModel, ImageSize};
use log::*;
use mocap_core::nalgebra::{Matrix3x4, Vector3};
use mocap_core::Skew3;
use std::path::Path;
use toml::{Table, Value};

/// Top-level tables of a calibration file that describe the capture setup, not a camera.
const NON_CAMERA_TABLES: [&str; 4] = ["metadata", "capture_volume", "charuco", "checkerboard"];

/// The ordered set of cameras of one capture setup.
///
/// Cameras keep the order they appear in the calibration file; that order is the view
/// index used everywhere else in the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSystem {
    cameras: Vec<CameraModel>,
    /// Non-camera tables, carried along so that saving does not lose them.
    extra: Table,
}

impl CameraSystem {
    pub fn new(cameras: Vec<CameraModel>) -> Self {
        Self {
            cameras,
            extra: Table::new(),
        }
    }

    /// Parses a calibration file.
    ///
    /// Every top-level table is a camera, except for tables describing the capture setup
    /// (`metadata`, `capture_volume`, `charuco`, `checkerboard`) and non-table values,
    /// which are skipped. A file without any camera is an error.
    pub fn from_toml_str(text: &str) -> Result<Self, CameraError> {
        let table: Table = text.parse()?;
        let mut cameras: Vec<CameraModel> = vec![];
        let mut extra = Table::new();
        for (key, value) in table {
            if NON_CAMERA_TABLES.contains(&key.as_str()) || !value.is_table() {
                debug!("skipping non-camera entry `{}`", key);
                extra.insert(key, value);
                continue;
            }
            let mut config: CameraConfig = value.try_into()?;
            if config.name.is_empty() {
                config.name = key;
            }
            if cameras.iter().any(|c| c.id() == config.name) {
                return Err(CameraError::DuplicateCamera(config.name));
            }
            cameras.push(CameraModel::from_config(&config)?);
        }
        if cameras.is_empty() {
            return Err(CameraError::NoCameras);
        }
        info!("loaded {} cameras", cameras.len());
        Ok(Self { cameras, extra })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CameraError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CameraError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Serializes the system into the calibration file format, one table per camera.
    pub fn to_toml_string(&self) -> Result<String, CameraError> {
        let mut table = Table::new();
        for camera in &self.cameras {
            table.insert(camera.id().to_owned(), Value::try_from(camera.to_config())?);
        }
        for (key, value) in &self.extra {
            if value.is_table() {
                table.insert(key.clone(), value.clone());
            }
        }
        Ok(toml::to_string_pretty(&table)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CameraError> {
        let path = path.as_ref();
        let text = self.to_toml_string()?;
        std::fs::write(path, text).map_err(|source| CameraError::Io {
            path: path.to_owned(),
            source,
        })
    }

    pub fn cameras(&self) -> &[CameraModel] {
        &self.cameras
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CameraModel> {
        self.cameras.iter().find(|c| c.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.cameras.iter().map(CameraModel::id).collect()
    }

    /// The projection matrices of all cameras, in view order.
    pub fn projection_matrices(&self, undistort: bool) -> Vec<Matrix3x4<f64>> {
        self.cameras
            .iter()
            .map(|c| c.compute_projection_matrix(undistort))
            .collect()
    }

    pub fn intrinsics(&self) -> Vec<CameraIntrinsics> {
        self.cameras.iter().map(CameraModel::intrinsics).collect()
    }

    pub fn distortions(&self) -> Vec<Vec<f64>> {
        self.cameras
            .iter()
            .map(|c| c.distortion().coefficients())
            .collect()
    }

    pub fn rotations(&self) -> Vec<Skew3> {
        self.cameras.iter().map(CameraModel::rotation_vector).collect()
    }

    pub fn translations(&self) -> Vec<Vector3<f64>> {
        self.cameras.iter().map(CameraModel::translation).collect()
    }

    pub fn sizes(&self) -> Vec<ImageSize> {
        self.cameras.iter().map(CameraModel::size).collect()
    }

    /// A non-camera table such as `metadata`.
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}
