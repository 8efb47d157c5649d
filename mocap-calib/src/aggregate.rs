use crate::{
    CalibrationCombination, CalibrationError, CalibrationResult, CameraParameters,
    EvaluationReport, StereoExtrinsics,
};
use mocap_core::{average_rotations, mean_vector};
use nalgebra::{Matrix3, Vector5};
use serde::{Deserialize, Serialize};

/// Population standard deviation of each retained parameter, per camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpread {
    pub intrinsics: Vec<Matrix3<f64>>,
    pub distortion: Vec<Vector5<f64>>,
}

/// The final outcome of a calibration run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameters {
    pub cameras: Vec<CameraParameters>,
    /// Pose of camera 1 relative to camera 0 for a stereo pair.
    pub extrinsics: Option<StereoExtrinsics>,
    /// RMS of the direct solve, or the mean RMS of the retained combinations.
    pub rms: f64,
    /// Only present for the clustering strategy.
    pub spread: Option<ParameterSpread>,
    /// Sample indices of the retained combinations, best first.
    pub retained: Vec<Vec<usize>>,
    pub report: Option<EvaluationReport>,
}

impl CalibrationParameters {
    /// The parameters of a single solve over all samples.
    pub fn direct(result: CalibrationResult, samples: usize) -> Self {
        Self {
            cameras: result.cameras,
            extrinsics: result.extrinsics,
            rms: result.rms,
            spread: None,
            retained: vec![(0..samples).collect()],
            report: None,
        }
    }

    /// Averages the retained combinations.
    ///
    /// Intrinsic matrices, distortion vectors and translations are averaged arithmetically,
    /// rotations with [`average_rotations`].
    pub fn aggregate(combinations: &[CalibrationCombination]) -> Result<Self, CalibrationError> {
        let first = combinations
            .first()
            .ok_or_else(|| CalibrationError::Failed("no combination was retained".into()))?;
        let n = combinations.len() as f64;
        let cameras = first.result.cameras.len();
        if combinations
            .iter()
            .any(|c| c.result.cameras.len() != cameras)
        {
            return Err(CalibrationError::Failed(
                "combinations calibrated different numbers of cameras".into(),
            ));
        }

        let mut averaged = Vec::with_capacity(cameras);
        let mut spread = ParameterSpread {
            intrinsics: Vec::with_capacity(cameras),
            distortion: Vec::with_capacity(cameras),
        };
        for camera in 0..cameras {
            let params = || combinations.iter().map(move |c| &c.result.cameras[camera]);
            let intrinsics = params().map(|p| p.intrinsics).sum::<Matrix3<f64>>() / n;
            let distortion = params().map(|p| p.distortion).sum::<Vector5<f64>>() / n;
            spread.intrinsics.push(
                (params()
                    .map(|p| (p.intrinsics - intrinsics).map(|e| e * e))
                    .sum::<Matrix3<f64>>()
                    / n)
                    .map(f64::sqrt),
            );
            spread.distortion.push(
                (params()
                    .map(|p| (p.distortion - distortion).map(|e| e * e))
                    .sum::<Vector5<f64>>()
                    / n)
                    .map(f64::sqrt),
            );
            averaged.push(CameraParameters::new(
                intrinsics,
                distortion,
                first.result.cameras[camera].image_size,
            ));
        }

        let extrinsics: Option<Vec<StereoExtrinsics>> =
            combinations.iter().map(|c| c.result.extrinsics).collect();
        let extrinsics = match extrinsics {
            Some(extrinsics) if !extrinsics.is_empty() => {
                let rotations: Vec<_> = extrinsics.iter().map(|e| e.rotation).collect();
                let translations: Vec<_> = extrinsics.iter().map(|e| e.translation).collect();
                let rotation = average_rotations(&rotations).ok_or(
                    CalibrationError::Degenerate("stereo rotations cannot be averaged"),
                )?;
                let translation = mean_vector(&translations)
                    .ok_or(CalibrationError::Degenerate("no stereo translations"))?;
                Some(StereoExtrinsics::new(rotation, translation))
            }
            _ => None,
        };

        Ok(Self {
            cameras: averaged,
            extrinsics,
            rms: combinations.iter().map(|c| c.rms()).sum::<f64>() / n,
            spread: Some(spread),
            retained: combinations.iter().map(|c| c.indices.clone()).collect(),
            report: None,
        })
    }

    /// Fails for parameters that cannot describe a camera: a unit or non-positive focal
    /// length, non-finite entries or an infinite RMS.
    pub fn check_usable(&self) -> Result<(), CalibrationError> {
        for (index, camera) in self.cameras.iter().enumerate() {
            let (fx, fy) = camera.focals();
            let finite = camera.intrinsics.iter().all(|e| e.is_finite())
                && camera.distortion.iter().all(|e| e.is_finite());
            if !finite || fx == 1.0 || !(fx > 0.0 && fy > 0.0) {
                return Err(CalibrationError::Failed(format!(
                    "camera {} has a degenerate camera matrix",
                    index
                )));
            }
        }
        if self.rms.is_infinite() {
            return Err(CalibrationError::Failed("reprojection error is infinite".into()));
        }
        if let Some(report) = &self.report {
            if report.has_infinite() {
                return Err(CalibrationError::Failed(
                    "a sample could not be reprojected with the final parameters".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use mocap_pinhole::ImageSize;
    use nalgebra::{Rotation3, Vector3};

    fn combination(focal: f64, angle: f64, order: usize) -> CalibrationCombination {
        let camera = CameraParameters::ideal(focal, ImageSize::new(640, 480));
        CalibrationCombination {
            indices: vec![order, order + 1, order + 2],
            result: CalibrationResult {
                cameras: vec![camera, camera],
                extrinsics: Some(StereoExtrinsics::new(
                    Rotation3::from_axis_angle(&Vector3::y_axis(), angle),
                    Vector3::new(-0.5 + angle, 0.0, 0.0),
                )),
                rms: focal / 1000.0,
            },
            order,
        }
    }

    #[test]
    fn averages_retained_combinations() {
        let retained = [
            combination(800.0, 0.1, 0),
            combination(820.0, 0.2, 1),
            combination(840.0, 0.3, 2),
        ];
        let params = CalibrationParameters::aggregate(&retained).unwrap();
        assert_eq!(params.cameras[1].focals(), (820.0, 820.0));
        assert_relative_eq!(params.rms, 0.82, epsilon = 1e-12);
        let extrinsics = params.extrinsics.unwrap();
        assert_relative_eq!(extrinsics.rotation.angle(), 0.2, epsilon = 1e-9);
        assert_relative_eq!(extrinsics.translation.x, -0.3, epsilon = 1e-12);

        let spread = params.spread.as_ref().unwrap();
        assert_relative_eq!(
            spread.intrinsics[0][(0, 0)],
            (800.0f64 / 3.0).sqrt(),
            epsilon = 1e-9
        );
        assert_eq!(spread.intrinsics[0][(0, 2)], 0.0);
        assert_eq!(params.retained.len(), 3);
        assert_eq!(params.check_usable(), Ok(()));
    }

    #[test]
    fn unit_focal_is_unusable() {
        let mut params = CalibrationParameters::aggregate(&[combination(800.0, 0.1, 0)]).unwrap();
        params.cameras[0].intrinsics[(0, 0)] = 1.0;
        assert!(matches!(
            params.check_usable(),
            Err(CalibrationError::Failed(_))
        ));
        params.cameras[0].intrinsics[(0, 0)] = 800.0;
        params.rms = f64::INFINITY;
        assert!(params.check_usable().is_err());
    }
}
