use anyhow::{bail, ensure, Context, Result};
use log::*;
use mocap_calib::nalgebra::Vector5;
use mocap_calib::{
    CalibrationConfig, CalibrationSample, CalibrationSession, CameraParameters, ClusteringConfig,
    Strategy,
};
use mocap_pinhole::{CameraModel, CameraSystem, ImageSize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use structopt::StructOpt;

#[derive(StructOpt)]
pub struct CalibrateOpt {
    /// JSON file holding a list of calibration samples.
    #[structopt(short, long, parse(from_os_str))]
    samples: PathBuf,
    /// Where to write the calibration file.
    #[structopt(short, long, parse(from_os_str))]
    output: PathBuf,
    /// Image size of each camera as `WIDTHxHEIGHT`, in camera order.
    #[structopt(long = "size", required = true, parse(try_from_str = parse_size))]
    sizes: Vec<ImageSize>,
    /// Camera names, in camera order. Defaults to `cam0`, `cam1`.
    #[structopt(long = "name")]
    names: Vec<String>,
    /// JSON file with the calibration configuration.
    ///
    /// This is in the format of `mocap_calib::CalibrationConfig`.
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,
    /// Use the clustering strategy with combinations of this many samples.
    #[structopt(long)]
    subset_size: Option<usize>,
    /// Combinations to retain with the clustering strategy.
    #[structopt(long)]
    retained: Option<usize>,
    /// Combinations to solve at least with the clustering strategy.
    #[structopt(long)]
    candidates: Option<usize>,
    /// Calibration file with intrinsics to hold fixed, so that only the stereo relation is
    /// solved.
    #[structopt(long, parse(from_os_str))]
    known: Option<PathBuf>,
}

pub fn run(opt: &CalibrateOpt) -> Result<()> {
    let config = configuration(opt)?;
    let samples: Vec<CalibrationSample> = read_json(&opt.samples)?;
    info!("read {} samples from {}", samples.len(), opt.samples.display());

    let names: Vec<String> = if opt.names.is_empty() {
        (0..opt.sizes.len()).map(|i| format!("cam{}", i)).collect()
    } else {
        opt.names.clone()
    };
    ensure!(
        names.len() == opt.sizes.len(),
        "{} names for {} cameras",
        names.len(),
        opt.sizes.len()
    );

    let mut session = CalibrationSession::new(opt.sizes.clone(), config)?;
    if let Some(path) = &opt.known {
        let system = CameraSystem::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        let known = names
            .iter()
            .map(|name| {
                system
                    .get(name)
                    .with_context(|| format!("{} has no camera `{}`", path.display(), name))
                    .and_then(parameters_of)
            })
            .collect::<Result<Vec<_>>>()?;
        session.known_intrinsics(known)?;
    }
    for (index, sample) in samples.into_iter().enumerate() {
        session
            .add_sample(sample)
            .with_context(|| format!("sample {} is invalid", index))?;
    }

    let handle = session.spawn();
    for progress in handle.progress() {
        info!(
            "{:5.1}% ({} combinations, {} retained), {:.1?} remaining",
            100.0 * progress.fraction,
            progress.evaluated,
            progress.retained,
            progress.remaining.unwrap_or_default()
        );
    }
    let outcome = handle.join()?;
    let params = outcome.result?;
    println!("rms: {:.4}", params.rms);
    if let Some(report) = &params.report {
        println!("evaluation rms: {:.4} {:?}", report.combined, report.per_camera);
    }
    if let Some(spread) = &params.spread {
        for (name, k) in names.iter().zip(&spread.intrinsics) {
            println!("{} intrinsic spread: {}", name, k);
        }
    }

    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let system = outcome.session.camera_system(&names)?;
    system
        .save(&opt.output)
        .with_context(|| format!("failed to write {}", opt.output.display()))?;
    info!("wrote {}", opt.output.display());
    Ok(())
}

fn configuration(opt: &CalibrateOpt) -> Result<CalibrationConfig> {
    let mut config = match &opt.config {
        Some(path) => read_json(path)?,
        None => CalibrationConfig::new(),
    };
    if opt.subset_size.is_some() || opt.retained.is_some() || opt.candidates.is_some() {
        let mut clustering = match config.strategy {
            Strategy::Clustering(clustering) => clustering,
            Strategy::Direct => ClusteringConfig::new(),
        };
        if let Some(subset_size) = opt.subset_size {
            clustering.subset_size = subset_size;
        }
        if let Some(retained) = opt.retained {
            clustering.retained = retained;
        }
        clustering.candidates = opt.candidates.or(clustering.candidates);
        config = config.clustering(clustering);
    }
    Ok(config)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", path.display()))
}

/// Parses `WIDTHxHEIGHT`.
pub fn parse_size(text: &str) -> Result<ImageSize> {
    let (width, height) = text
        .split_once(|c| c == 'x' || c == 'X')
        .with_context(|| format!("expected WIDTHxHEIGHT, got `{}`", text))?;
    Ok(ImageSize::new(width.trim().parse()?, height.trim().parse()?))
}

/// The intrinsics of a camera from a calibration file.
fn parameters_of(camera: &CameraModel) -> Result<CameraParameters> {
    if camera.is_fisheye() {
        bail!("camera `{}` uses the fisheye model", camera.id());
    }
    let mut distortion = Vector5::zeros();
    for (d, c) in distortion.iter_mut().zip(camera.distortion().coefficients()) {
        *d = c;
    }
    Ok(CameraParameters::new(
        camera.intrinsic_matrix(),
        distortion,
        camera.size(),
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(parse_size("1280x720").unwrap(), ImageSize::new(1280, 720));
        assert_eq!(parse_size("640X480").unwrap(), ImageSize::new(640, 480));
        assert!(parse_size("640").is_err());
        assert!(parse_size("ax480").is_err());
    }

    #[test]
    fn flags_switch_to_clustering() {
        let opt = CalibrateOpt::from_iter(&[
            "calibrate",
            "--samples",
            "samples.json",
            "--output",
            "out.toml",
            "--size",
            "640x480",
            "--retained",
            "7",
        ]);
        let config = configuration(&opt).unwrap();
        assert_eq!(
            config.strategy,
            Strategy::Clustering(ClusteringConfig::new().retained(7))
        );

        let opt = CalibrateOpt::from_iter(&[
            "calibrate", "-s", "a.json", "-o", "b.toml", "--size", "64x48", "--size", "32x24",
        ]);
        assert_eq!(configuration(&opt).unwrap(), CalibrationConfig::new());
        assert_eq!(opt.sizes.len(), 2);
    }

    #[test]
    fn known_cameras_from_a_calibration_file() {
        use mocap_calib::nalgebra::{Point2, Vector3};
        use mocap_core::Skew3;
        use mocap_pinhole::{CameraIntrinsics, Distortion};

        let size = ImageSize::new(640, 480);
        let intrinsics = CameraIntrinsics::identity()
            .focal(800.0)
            .principal_point(Point2::new(320.0, 240.0));
        let pinhole = CameraModel::new(
            "left",
            size,
            intrinsics,
            Distortion::from_coefficients(&[-0.1, 0.01, 0.001, 0.002], false).unwrap(),
            Skew3::identity(),
            Vector3::zeros(),
        );
        let fisheye = CameraModel::new(
            "wide",
            size,
            intrinsics,
            Distortion::from_coefficients(&[0.1, 0.0, 0.0, 0.0], true).unwrap(),
            Skew3::identity(),
            Vector3::zeros(),
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.toml");
        CameraSystem::new(vec![pinhole, fisheye]).save(&path).unwrap();

        let system = CameraSystem::load(&path).unwrap();
        let left = parameters_of(system.get("left").unwrap()).unwrap();
        assert_eq!(left.intrinsics, intrinsics.matrix());
        assert_eq!(left.distortion, Vector5::new(-0.1, 0.01, 0.001, 0.002, 0.0));
        assert_eq!(left.image_size, size);
        assert!(parameters_of(system.get("wide").unwrap()).is_err());
    }
}
