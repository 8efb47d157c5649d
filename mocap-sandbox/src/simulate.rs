use anyhow::Result;
use log::*;
use mocap_sync::{SimulatedSource, SyncConfig, SynchronizedCapture};
use structopt::StructOpt;

#[derive(StructOpt)]
pub struct SimulateOpt {
    /// Number of simulated cameras.
    #[structopt(long, default_value = "4")]
    cameras: usize,
    /// Nominal frame rate of every camera.
    #[structopt(long, default_value = "60")]
    fps: f64,
    /// Timestamp jitter as a fraction of the sync delta.
    #[structopt(long, default_value = "0.5")]
    jitter: f64,
    /// Clock offset between consecutive cameras, in seconds.
    #[structopt(long, default_value = "0.001")]
    offset: f64,
    /// Frames produced by each camera.
    #[structopt(long, default_value = "600")]
    frames: u64,
    /// Maximum timestamp difference within a frame set. Defaults to half a frame period.
    #[structopt(long)]
    sync_delta: Option<f64>,
    /// Sleep one frame period per frame like real cameras.
    #[structopt(long)]
    paced: bool,
}

pub fn run(opt: &SimulateOpt) -> Result<()> {
    let config = SyncConfig {
        sync_delta: opt.sync_delta,
        ..SyncConfig::new()
    };
    let delta = config.delta_for(opt.fps);
    let sources: Vec<SimulatedSource> = (0..opt.cameras)
        .map(|i| {
            SimulatedSource::new(opt.fps)
                .seed(i as u64)
                .offset(opt.offset * i as f64)
                .jitter(opt.jitter * delta)
                .frames(opt.frames)
                .paced(opt.paced)
        })
        .collect();
    let (mut capture, frame_sets) = SynchronizedCapture::start(sources, &config)?;
    let mut max_skew: f64 = 0.0;
    let mut count = 0;
    for set in frame_sets.iter() {
        max_skew = max_skew.max(set.max_skew());
        count += 1;
        if count % 100 == 0 {
            debug!("{} frame sets, latest at {:.3}s", count, set.timestamp());
        }
    }
    let summary = capture.stop();
    println!("frame sets: {}", summary.frame_sets);
    println!("largest skew: {:.5}s (sync delta {:.5}s)", max_skew, delta);
    println!("dropped per camera: {:?}", summary.dropped);
    for (source, error) in &summary.errors {
        warn!("camera {}: {}", source, error);
    }
    Ok(())
}
