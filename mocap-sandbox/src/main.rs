mod calibrate;
mod inspect;
mod simulate;
mod triangulate;

use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(
    name = "mocap-sandbox",
    about = "A tool for trying out the motion capture pipeline"
)]
enum Opt {
    /// Load a calibration file and print every camera.
    Inspect(inspect::InspectOpt),
    /// Calibrate one camera or a stereo pair from detected pattern corners.
    Calibrate(calibrate::CalibrateOpt),
    /// Triangulate a keypoint sequence with a calibration file.
    Triangulate(triangulate::TriangulateOpt),
    /// Run simulated cameras through the frame synchronizer.
    Simulate(simulate::SimulateOpt),
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init_timed();
    match Opt::from_args() {
        Opt::Inspect(opt) => inspect::run(&opt),
        Opt::Calibrate(opt) => calibrate::run(&opt),
        Opt::Triangulate(opt) => triangulate::run(&opt),
        Opt::Simulate(opt) => simulate::run(&opt),
    }
}
