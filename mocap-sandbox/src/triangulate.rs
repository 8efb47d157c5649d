use anyhow::{ensure, Context, Result};
use log::*;
use mocap_geom::batch::{triangulate_batch, BatchTriangulation};
use mocap_geom::DltTriangulator;
use mocap_pinhole::CameraSystem;
use ndarray::{Array3, Array4, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt)]
pub struct TriangulateOpt {
    /// Calibration file with one camera per view, in view order.
    #[structopt(short, long, parse(from_os_str))]
    calibration: PathBuf,
    /// JSON file with the detected keypoints.
    #[structopt(short, long, parse(from_os_str))]
    keypoints: PathBuf,
    /// Where to write the points. Printed to stdout when omitted.
    #[structopt(short, long, parse(from_os_str))]
    output: Option<PathBuf>,
    /// Observations below this confidence are ignored.
    #[structopt(long, default_value = "0.5")]
    confidence_threshold: f64,
    /// Use projection matrices for undistorted keypoints.
    #[structopt(long)]
    undistort: bool,
}

/// Detected keypoints indexed by view, frame and keypoint.
#[derive(Debug, Deserialize)]
struct KeypointFile {
    keypoints: Vec<Vec<Vec<[f64; 2]>>>,
    #[serde(default)]
    confidences: Option<Vec<Vec<Vec<f64>>>>,
}

/// Points indexed by frame and keypoint. Unresolved points are `null`.
#[derive(Debug, Serialize)]
struct PointFile {
    points: Vec<Vec<Option<[f64; 3]>>>,
    view_counts: Vec<Vec<usize>>,
    rmse: Vec<Vec<Option<f64>>>,
}

pub fn run(opt: &TriangulateOpt) -> Result<()> {
    let system = CameraSystem::load(&opt.calibration)
        .with_context(|| format!("failed to load {}", opt.calibration.display()))?;
    let file = File::open(&opt.keypoints)
        .with_context(|| format!("failed to open {}", opt.keypoints.display()))?;
    let input: KeypointFile = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", opt.keypoints.display()))?;
    let (keypoints, confidences) = tensors(&input)?;
    info!(
        "triangulating {} frames x {} keypoints from {} views",
        keypoints.len_of(Axis(1)),
        keypoints.len_of(Axis(2)),
        keypoints.len_of(Axis(0))
    );

    let triangulator = DltTriangulator::new().confidence_threshold(opt.confidence_threshold);
    let batch = triangulate_batch(
        &triangulator,
        &system.projection_matrices(opt.undistort),
        keypoints.view(),
        confidences.as_ref().map(|c| c.view()),
    )?;
    let unresolved = batch.unresolved();
    if unresolved > 0 {
        warn!(
            "{} of {} points could not be resolved",
            unresolved,
            batch.frames() * batch.keypoints()
        );
    }

    let output = point_file(&batch);
    match &opt.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &output)?;
            writer.flush()?;
            info!("wrote {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            serde_json::to_writer_pretty(&mut lock, &output)?;
            writeln!(lock)?;
        }
    }
    Ok(())
}

/// Packs nested lists into `(views, frames, keypoints, 2)` and `(views, frames, keypoints)`.
fn tensors(input: &KeypointFile) -> Result<(Array4<f64>, Option<Array3<f64>>)> {
    let views = input.keypoints.len();
    ensure!(views > 0, "no views");
    let frames = input.keypoints[0].len();
    let joints = input.keypoints[0].first().map_or(0, Vec::len);
    for (view, rows) in input.keypoints.iter().enumerate() {
        ensure!(
            rows.len() == frames && rows.iter().all(|row| row.len() == joints),
            "view {} is not {} frames of {} keypoints",
            view,
            frames,
            joints
        );
    }
    let keypoints = Array4::from_shape_fn((views, frames, joints, 2), |(v, f, j, c)| {
        input.keypoints[v][f][j][c]
    });

    let confidences = match &input.confidences {
        Some(confidences) => {
            ensure!(
                confidences.len() == views
                    && confidences.iter().all(|rows| {
                        rows.len() == frames && rows.iter().all(|row| row.len() == joints)
                    }),
                "confidences do not match the keypoints"
            );
            Some(Array3::from_shape_fn((views, frames, joints), |(v, f, j)| {
                confidences[v][f][j]
            }))
        }
        None => None,
    };
    Ok((keypoints, confidences))
}

fn point_file(batch: &BatchTriangulation) -> PointFile {
    let resolved = |x: f64| x.is_finite().then(|| x);
    PointFile {
        points: batch
            .points
            .outer_iter()
            .map(|frame| {
                frame
                    .outer_iter()
                    .map(|p| p.iter().all(|x| x.is_finite()).then(|| [p[0], p[1], p[2]]))
                    .collect()
            })
            .collect(),
        view_counts: batch
            .view_counts
            .outer_iter()
            .map(|frame| frame.to_vec())
            .collect(),
        rmse: batch
            .rmse
            .outer_iter()
            .map(|frame| frame.iter().copied().map(resolved).collect())
            .collect(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{Array2, Array3};

    #[test]
    fn nested_lists_become_tensors() {
        let input: KeypointFile = serde_json::from_str(
            r#"{
                "keypoints": [
                    [[[1, 2], [3, 4], [5, 6]]],
                    [[[7, 8], [9, 10], [11, 12]]]
                ],
                "confidences": [[[1, 0.5, 0]], [[1, 1, 1]]]
            }"#,
        )
        .unwrap();
        let (keypoints, confidences) = tensors(&input).unwrap();
        assert_eq!(keypoints.dim(), (2, 1, 3, 2));
        assert_eq!(keypoints[[1, 0, 2, 0]], 11.0);
        assert_eq!(keypoints[[0, 0, 1, 1]], 4.0);
        let confidences = confidences.unwrap();
        assert_eq!(confidences.dim(), (2, 1, 3));
        assert_eq!(confidences[[0, 0, 1]], 0.5);
    }

    #[test]
    fn ragged_lists_are_rejected() {
        let ragged: KeypointFile =
            serde_json::from_str(r#"{"keypoints": [[[[1, 2]]], [[[1, 2], [3, 4]]]]}"#).unwrap();
        assert!(tensors(&ragged).is_err());
        let mismatched: KeypointFile = serde_json::from_str(
            r#"{"keypoints": [[[[1, 2]]]], "confidences": [[[1, 1]]]}"#,
        )
        .unwrap();
        assert!(tensors(&mismatched).is_err());
        let empty: KeypointFile = serde_json::from_str(r#"{"keypoints": []}"#).unwrap();
        assert!(tensors(&empty).is_err());
    }

    #[test]
    fn unresolved_points_are_null() {
        let mut points = Array3::zeros((1, 2, 3));
        points[[0, 1, 0]] = f64::NAN;
        let batch = BatchTriangulation {
            points,
            view_counts: Array2::from_shape_vec((1, 2), vec![3, 1]).unwrap(),
            rmse: Array2::from_shape_vec((1, 2), vec![0.25, f64::NAN]).unwrap(),
        };
        let file = point_file(&batch);
        assert_eq!(file.points, vec![vec![Some([0.0; 3]), None]]);
        assert_eq!(file.view_counts, vec![vec![3, 1]]);
        assert_eq!(file.rmse, vec![vec![Some(0.25), None]]);
    }
}
