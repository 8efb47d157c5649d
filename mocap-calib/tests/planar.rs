use approx::assert_relative_eq;
use mocap_calib::nalgebra::{
    IsometryMatrix3, Matrix3x4, Point2, Rotation3, Translation3, Vector2, Vector3, Vector5,
};
use mocap_calib::*;
use mocap_pinhole::ImageSize;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

fn left() -> CameraParameters {
    let mut camera = CameraParameters::ideal(820.0, ImageSize::new(640, 480));
    camera.intrinsics[(1, 1)] = 805.0;
    camera.intrinsics[(0, 2)] += 5.0;
    camera.intrinsics[(1, 2)] -= 3.0;
    camera.distortion = Vector5::new(-0.1, 0.02, 0.0004, -0.0006, 0.0);
    camera
}

fn right() -> CameraParameters {
    let mut camera = CameraParameters::ideal(760.0, ImageSize::new(640, 480));
    camera.intrinsics[(0, 2)] -= 4.0;
    camera.distortion = Vector5::new(-0.05, 0.01, 0.0, 0.0003, 0.0);
    camera
}

fn stereo() -> StereoExtrinsics {
    StereoExtrinsics::new(
        Rotation3::new(Vector3::new(0.01, 0.12, 0.005)),
        Vector3::new(-0.25, 0.01, 0.02),
    )
}

/// Pattern poses in the frame of the left camera.
fn board_poses() -> Vec<IsometryMatrix3<f64>> {
    [
        Vector3::new(0.3, 0.05, 0.0),
        Vector3::new(-0.3, 0.25, 0.1),
        Vector3::new(0.1, -0.35, -0.15),
        Vector3::new(-0.2, -0.25, 0.25),
        Vector3::new(0.25, 0.3, -0.05),
        Vector3::new(-0.1, 0.4, 0.2),
    ]
    .iter()
    .enumerate()
    .map(|(i, axis)| {
        IsometryMatrix3::from_parts(
            Translation3::new(-0.12 - 0.01 * i as f64, -0.1, 0.85 + 0.05 * i as f64),
            Rotation3::new(*axis),
        )
    })
    .collect()
}

fn observe(
    cameras: &[(CameraParameters, IsometryMatrix3<f64>)],
    noise: f64,
    rng: &mut Pcg64,
) -> Vec<CalibrationSample> {
    board_poses()
        .iter()
        .map(|pose| {
            let object_points = checkerboard(8, 6, 0.035);
            let image_points = cameras
                .iter()
                .map(|(camera, extrinsics)| {
                    object_points
                        .iter()
                        .map(|p| {
                            let pixel = camera.project(&(extrinsics * pose * p)).unwrap();
                            pixel
                                + Vector2::new(
                                    rng.gen_range(-noise..=noise),
                                    rng.gen_range(-noise..=noise),
                                )
                        })
                        .collect()
                })
                .collect();
            CalibrationSample::new(object_points, image_points)
        })
        .collect()
}

fn stereo_samples(noise: f64) -> Vec<CalibrationSample> {
    let mut rng = Pcg64::from_seed([5; 32]);
    observe(
        &[
            (left(), IsometryMatrix3::identity()),
            (right(), stereo().isometry()),
        ],
        noise,
        &mut rng,
    )
}

fn assert_camera_eq(found: &CameraParameters, truth: &CameraParameters, tolerance: f64) {
    assert_relative_eq!(found.intrinsics, truth.intrinsics, max_relative = tolerance);
    assert_relative_eq!(found.distortion, truth.distortion, epsilon = 100.0 * tolerance);
    assert_eq!(found.image_size, truth.image_size);
}

#[test]
fn direct_mono_calibration() {
    let _ = pretty_env_logger::try_init();
    let mut rng = Pcg64::from_seed([5; 32]);
    let samples = observe(&[(left(), IsometryMatrix3::identity())], 0.0, &mut rng);
    let engine = CalibrationEngine::new(CalibrationConfig::new());
    let params = engine
        .calibrate(
            &samples,
            &[left().image_size],
            None,
            &mut NoProgress,
            &CancellationToken::new(),
        )
        .unwrap();
    assert_camera_eq(&params.cameras[0], &left(), 1e-5);
    assert!(params.extrinsics.is_none());
    assert!(params.rms < 1e-4);
    let report = params.report.unwrap();
    assert_eq!(report.per_sample[0].len(), samples.len());
    assert!(report.combined < 1e-3);
}

#[test]
fn direct_stereo_calibration() {
    let samples = stereo_samples(0.0);
    let sizes = [left().image_size, right().image_size];
    let engine = CalibrationEngine::new(CalibrationConfig::new());
    let params = engine
        .calibrate(&samples, &sizes, None, &mut NoProgress, &CancellationToken::new())
        .unwrap();
    assert_camera_eq(&params.cameras[0], &left(), 1e-5);
    assert_camera_eq(&params.cameras[1], &right(), 1e-5);
    let extrinsics = params.extrinsics.unwrap();
    assert_relative_eq!(extrinsics.rotation, stereo().rotation, epsilon = 1e-6);
    assert_relative_eq!(extrinsics.translation, stereo().translation, epsilon = 1e-6);
    let report = params.report.unwrap();
    assert_eq!(report.per_camera.len(), 2);
    assert!(report.combined < 1e-3);
}

#[test]
fn stereo_cameras_with_different_resolutions() {
    let mut wide = CameraParameters::ideal(820.0, ImageSize::new(1280, 960));
    wide.intrinsics[(1, 1)] = 805.0;
    wide.intrinsics[(0, 2)] += 7.0;
    wide.distortion = Vector5::new(-0.1, 0.02, 0.0004, -0.0006, 0.0);
    let mut narrow = right();
    narrow.intrinsics[(0, 2)] += 4.0;
    narrow.intrinsics[(1, 2)] -= 5.0;

    let mut rng = Pcg64::from_seed([5; 32]);
    let samples = observe(
        &[
            (wide, IsometryMatrix3::identity()),
            (narrow, stereo().isometry()),
        ],
        0.0,
        &mut rng,
    );
    let sizes = [wide.image_size, narrow.image_size];
    let engine = CalibrationEngine::new(CalibrationConfig::new());
    let params = engine
        .calibrate(&samples, &sizes, None, &mut NoProgress, &CancellationToken::new())
        .unwrap();

    assert_camera_eq(&params.cameras[0], &wide, 1e-5);
    assert_camera_eq(&params.cameras[1], &narrow, 1e-5);
    assert_relative_eq!(
        params.cameras[0].principal_point(),
        Point2::new(646.5, 479.5),
        epsilon = 1e-4
    );
    assert_relative_eq!(
        params.cameras[1].principal_point(),
        Point2::new(319.5, 234.5),
        epsilon = 1e-4
    );
    let extrinsics = params.extrinsics.unwrap();
    assert_relative_eq!(extrinsics.rotation, stereo().rotation, epsilon = 1e-6);
    assert_relative_eq!(extrinsics.translation, stereo().translation, epsilon = 1e-6);
}

#[test]
fn clustering_stereo_calibration_with_noise() {
    let samples = stereo_samples(0.2);
    let sizes = [left().image_size, right().image_size];
    let config = CalibrationConfig::new().clustering(
        ClusteringConfig::new()
            .subset_size(4)
            .retained(3)
            .candidates(5)
            .seed(1),
    );
    let engine = CalibrationEngine::new(config);
    let params = engine
        .calibrate(&samples, &sizes, None, &mut NoProgress, &CancellationToken::new())
        .unwrap();
    assert_eq!(params.retained.len(), 3);
    assert!(params.rms < 0.5, "rms {}", params.rms);
    for (found, truth) in params.cameras.iter().zip([left(), right()]) {
        let (fx, fy) = found.focals();
        assert_relative_eq!(fx, truth.focals().0, max_relative = 0.02);
        assert_relative_eq!(fy, truth.focals().1, max_relative = 0.02);
    }
    let extrinsics = params.extrinsics.unwrap();
    assert!(extrinsics.rotation.rotation_to(&stereo().rotation).angle() < 0.01);
    assert!((extrinsics.translation - stereo().translation).norm() < 0.01);
    let spread = params.spread.unwrap();
    assert!(spread.intrinsics[0][(0, 0)] < 20.0);
}

#[test]
fn known_intrinsics_solve_only_the_stereo_relation() {
    let samples = stereo_samples(0.1);
    let mut session = CalibrationSession::new(
        vec![left().image_size, right().image_size],
        CalibrationConfig::new(),
    )
    .unwrap();
    session.known_intrinsics(vec![left(), right()]).unwrap();
    for sample in samples {
        session.add_sample(sample).unwrap();
    }
    let params = session
        .run(&mut NoProgress, &CancellationToken::new())
        .unwrap();
    assert_eq!(params.cameras, vec![left(), right()]);
    let extrinsics = params.extrinsics.unwrap();
    assert!(extrinsics.rotation.rotation_to(&stereo().rotation).angle() < 1e-3);
    assert!((extrinsics.translation - stereo().translation).norm() < 1e-3);
    assert!(params.rms > 0.0 && params.rms < 0.2);

    let models = session.camera_models(&["left", "right"]).unwrap();
    let expected = right().intrinsics
        * Matrix3x4::from_columns(&[
            extrinsics.rotation.matrix().column(0).into_owned(),
            extrinsics.rotation.matrix().column(1).into_owned(),
            extrinsics.rotation.matrix().column(2).into_owned(),
            extrinsics.translation,
        ]);
    assert_eq!(models[0].id(), "left");
    assert_relative_eq!(models[1].projection(), &expected, epsilon = 1e-9);
    assert_relative_eq!(
        models[0].center().coords,
        Vector3::zeros(),
        epsilon = 1e-12
    );
}

#[test]
fn session_results_save_as_calibration_file() {
    let mut rng = Pcg64::from_seed([5; 32]);
    let samples = observe(&[(left(), IsometryMatrix3::identity())], 0.05, &mut rng);
    let mut session = CalibrationSession::new(vec![left().image_size], CalibrationConfig::new())
        .unwrap();
    assert!(session.camera_models(&["cam"]).is_err());
    for sample in samples {
        session.add_sample(sample).unwrap();
    }
    session
        .run(&mut NoProgress, &CancellationToken::new())
        .unwrap();
    let system = session.camera_system(&["cam"]).unwrap();
    let text = system.to_toml_string().unwrap();
    let loaded = mocap_pinhole::CameraSystem::from_toml_str(&text).unwrap();
    assert_eq!(loaded.ids(), ["cam"]);
    assert_relative_eq!(
        loaded.cameras()[0].intrinsic_matrix(),
        session.state().parameters().unwrap().cameras[0].intrinsics,
        epsilon = 1e-9
    );
    let principal = loaded.cameras()[0].intrinsics().principal_point;
    assert_relative_eq!(principal, Point2::new(324.5, 236.5), epsilon = 0.5);
}
