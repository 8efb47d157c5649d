//! Reader for the sectioned plain-text calibration exports used by older capture setups.
//!
//! Each camera is one text file with four sections, each introduced by a label line and
//! followed by whitespace separated numbers:
//!
//! ```text
//! Camera 1 Translation
//! 0.1
//! -0.2
//! 3.0
//! Camera 1 Rotation
//! 1 0 0
//! 0 1 0
//! 0 0 1
//! Camera 1 Intrinsic Parameters
//! 1000 0 640
//! 0 1000 360
//! 0 0 1
//! Camera 1 Projection Matrix
//! ...
//! ```
//!
//! Labels are recognised by their ending, so any prefix is allowed. The German labels
//! `Intrinsische Parameter` and `Projektionsmatrix` are accepted as well. Intrinsics given
//! in image-normalized units (principal point at most `1`) are rescaled to pixels.

use crate::{CameraConfig, CameraError, CameraModel, CameraSystem, ImageSize};
use log::*;
use mocap_core::nalgebra::Matrix3;
use mocap_core::Skew3;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Translation,
    Rotation,
    Intrinsics,
    Projection,
}

impl Section {
    fn from_label(line: &str) -> Option<Self> {
        if line.ends_with("Translation") {
            Some(Self::Translation)
        } else if line.ends_with("Rotation") {
            Some(Self::Rotation)
        } else if line.ends_with("Intrinsic Parameters") || line.ends_with("Intrinsische Parameter")
        {
            Some(Self::Intrinsics)
        } else if line.ends_with("Projection Matrix") || line.ends_with("Projektionsmatrix") {
            Some(Self::Projection)
        } else {
            None
        }
    }

    fn expected_len(self) -> usize {
        match self {
            Self::Translation => 3,
            Self::Rotation | Self::Intrinsics => 9,
            Self::Projection => 12,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Translation => "translation",
            Self::Rotation => "rotation",
            Self::Intrinsics => "intrinsic parameters",
            Self::Projection => "projection matrix",
        }
    }
}

#[derive(Default)]
struct Sections {
    translation: Vec<f64>,
    rotation: Vec<f64>,
    intrinsics: Vec<f64>,
    projection: Vec<f64>,
}

impl Sections {
    fn get_mut(&mut self, section: Section) -> &mut Vec<f64> {
        match section {
            Section::Translation => &mut self.translation,
            Section::Rotation => &mut self.rotation,
            Section::Intrinsics => &mut self.intrinsics,
            Section::Projection => &mut self.projection,
        }
    }
}

/// Parses one legacy camera file into a [`CameraConfig`].
///
/// The exported projection matrix is kept as the config's `projection_matrix`, so it is
/// cross-checked (including the inverse extrinsic convention) when the model is built.
/// Distortion is not part of the format and defaults to zero.
pub fn parse(text: &str, name: &str, size: ImageSize) -> Result<CameraConfig, CameraError> {
    let mut sections = Sections::default();
    let mut current = None;
    for (ix, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(section) = Section::from_label(line) {
            current = Some(section);
            continue;
        }
        let section = current.ok_or_else(|| CameraError::Legacy {
            line: ix + 1,
            reason: "values before the first section label".to_owned(),
        })?;
        for token in line.split_whitespace() {
            let value = token.parse::<f64>().map_err(|_| CameraError::Legacy {
                line: ix + 1,
                reason: format!("`{}` is not a number", token),
            })?;
            sections.get_mut(section).push(value);
        }
    }

    for section in [
        Section::Translation,
        Section::Rotation,
        Section::Intrinsics,
        Section::Projection,
    ] {
        let len = sections.get_mut(section).len();
        if len != section.expected_len() {
            return Err(CameraError::Legacy {
                line: 0,
                reason: format!(
                    "{} has {} values, expected {}",
                    section.name(),
                    len,
                    section.expected_len()
                ),
            });
        }
    }

    let rotation = Matrix3::from_row_slice(&sections.rotation);
    let rotation = Skew3::from_matrix(&rotation).ok_or_else(|| CameraError::InvalidRotation {
        camera: name.to_owned(),
    })?;
    let mut k = Matrix3::from_row_slice(&sections.intrinsics);
    let mut projection = sections.projection;
    if k[(0, 2)] <= 1.0 && k[(1, 2)] <= 1.0 {
        debug!("camera {}: rescaling normalized intrinsics to {:?}", name, size);
        let (w, h) = (size.width as f64, size.height as f64);
        for c in 0..3 {
            k[(0, c)] *= w;
            k[(1, c)] *= h;
        }
        // P = K [R | t], so scaling the rows of K scales the rows of P.
        for value in &mut projection[0..4] {
            *value *= w;
        }
        for value in &mut projection[4..8] {
            *value *= h;
        }
    }

    let t = &sections.translation;
    Ok(CameraConfig {
        name: name.to_owned(),
        size: size.into(),
        matrix: [0, 1, 2].map(|r| [0, 1, 2].map(|c| k[(r, c)])),
        distortions: vec![0.0; 4],
        rotation: [rotation.x, rotation.y, rotation.z],
        translation: [t[0], t[1], t[2]],
        projection_matrix: Some([0, 1, 2].map(|r| [0, 1, 2, 3].map(|c| projection[r * 4 + c]))),
        fisheye: false,
    })
}

/// Loads one legacy camera file. The camera is named after the file stem.
pub fn load(path: impl AsRef<Path>, size: ImageSize) -> Result<CameraModel, CameraError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| CameraError::Io {
        path: path.to_owned(),
        source,
    })?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    CameraModel::from_config(&parse(&text, &name, size)?)
}

/// Loads every `.txt` file in a directory as a legacy camera, in file name order.
pub fn load_dir(dir: impl AsRef<Path>, size: ImageSize) -> Result<CameraSystem, CameraError> {
    let dir = dir.as_ref();
    let io_error = |source| CameraError::Io {
        path: dir.to_owned(),
        source,
    };
    let mut paths = vec![];
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.extension().map_or(false, |ext| ext == "txt") {
            paths.push(path);
        }
    }
    paths.sort();
    let cameras = paths
        .iter()
        .map(|path| load(path, size))
        .collect::<Result<Vec<_>, _>>()?;
    if cameras.is_empty() {
        return Err(CameraError::NoCameras);
    }
    Ok(CameraSystem::new(cameras))
}
