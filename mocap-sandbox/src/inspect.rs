use anyhow::{Context, Result};
use mocap_pinhole::{CameraSystem, Consistency};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt)]
pub struct InspectOpt {
    /// The calibration file.
    #[structopt(parse(from_os_str))]
    calibration: PathBuf,
    /// Print the projection matrices of undistorted images.
    #[structopt(long)]
    undistort: bool,
}

pub fn run(opt: &InspectOpt) -> Result<()> {
    let system = CameraSystem::load(&opt.calibration)
        .with_context(|| format!("failed to load {}", opt.calibration.display()))?;
    for camera in system.cameras() {
        let size = camera.size();
        println!("{} ({}x{})", camera.id(), size.width, size.height);
        println!("  distortion: {:?}", camera.distortion().coefficients());
        println!("  center: {}", camera.center());
        println!("  projection matrix: {}", describe(camera.consistency()));
        print!("{}", camera.compute_projection_matrix(opt.undistort));
    }
    Ok(())
}

fn describe(consistency: &Consistency) -> String {
    match consistency {
        Consistency::Derived => "derived".into(),
        Consistency::Verified => "matches the file".into(),
        Consistency::CorrectedInverse => "matches the file with inverted extrinsics".into(),
        Consistency::Inconsistent(warning) => format!(
            "differs from the file by up to {:.3e}, using the derived one",
            warning.max_deviation
        ),
    }
}
