use crate::root::root;
use mocap_core::nalgebra::{Point2, Vector4, Vector5};

/// Maximum number of fixed-point iterations used when undistorting radial-tangential points.
const UNDISTORT_ITERATIONS: usize = 20;

/// Lens distortion of a camera, applied to normalized image coordinates.
///
/// Two models are supported, matching what common calibration tools export:
///
/// * The [Brown-Conrady][b71] radial-tangential model with coefficients
///   `[k1, k2, p1, p2, k3]`, where `k3` is optional in files.
/// * The Kannala-Brandt equidistant fisheye model with coefficients `[k1, k2, k3, k4]`
///   on the incidence angle `θ`.
///
/// [b71]: https://www.asprs.org/wp-content/uploads/pers/1971journal/aug/1971_aug_855-866.pdf
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distortion {
    RadialTangential {
        coefficients: Vector5<f64>,
        /// Whether `k3` was given explicitly; only affects how the coefficients are written back.
        has_k3: bool,
    },
    Fisheye(Vector4<f64>),
}

impl Default for Distortion {
    fn default() -> Self {
        Self::none()
    }
}

impl Distortion {
    /// No distortion, written as four zero coefficients.
    pub fn none() -> Self {
        Self::RadialTangential {
            coefficients: Vector5::zeros(),
            has_k3: false,
        }
    }

    /// Radial-tangential distortion from all five coefficients.
    pub fn radial_tangential(coefficients: Vector5<f64>) -> Self {
        Self::RadialTangential {
            coefficients,
            has_k3: true,
        }
    }

    /// Builds the distortion from the coefficient list stored in a calibration file.
    ///
    /// Fisheye cameras take exactly four coefficients, the others take four or five.
    /// Returns `None` for any other length.
    pub fn from_coefficients(coefficients: &[f64], fisheye: bool) -> Option<Self> {
        match (fisheye, coefficients) {
            (true, &[k1, k2, k3, k4]) => Some(Self::Fisheye(Vector4::new(k1, k2, k3, k4))),
            (false, &[k1, k2, p1, p2]) => Some(Self::RadialTangential {
                coefficients: Vector5::new(k1, k2, p1, p2, 0.0),
                has_k3: false,
            }),
            (false, &[k1, k2, p1, p2, k3]) => Some(Self::RadialTangential {
                coefficients: Vector5::new(k1, k2, p1, p2, k3),
                has_k3: true,
            }),
            _ => None,
        }
    }

    /// The coefficients in the order they are stored in calibration files.
    pub fn coefficients(&self) -> Vec<f64> {
        match *self {
            Self::RadialTangential {
                coefficients,
                has_k3,
            } => {
                let n = if has_k3 { 5 } else { 4 };
                coefficients.iter().take(n).copied().collect()
            }
            Self::Fisheye(k) => k.iter().copied().collect(),
        }
    }

    pub fn is_fisheye(&self) -> bool {
        matches!(self, Self::Fisheye(_))
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Self::RadialTangential { coefficients, .. } => coefficients.iter().all(|&k| k == 0.0),
            Self::Fisheye(k) => k.iter().all(|&k| k == 0.0),
        }
    }

    /// Applies the distortion to an ideal normalized image point `(X/Z, Y/Z)`.
    pub fn distort(&self, point: Point2<f64>) -> Point2<f64> {
        match *self {
            Self::RadialTangential { coefficients, .. } => {
                let (k1, k2, p1, p2, k3) = unpack(&coefficients);
                let (x, y) = (point.x, point.y);
                let r2 = x * x + y * y;
                let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
                let xy = x * y;
                Point2::new(
                    x * radial + 2.0 * p1 * xy + p2 * (r2 + 2.0 * x * x),
                    y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * xy,
                )
            }
            Self::Fisheye(k) => {
                let r = point.coords.norm();
                if r < 1e-12 {
                    return point;
                }
                let theta = r.atan();
                let theta_d = fisheye_theta_d(&k, theta).0;
                Point2::from(point.coords * (theta_d / r))
            }
        }
    }

    /// Inverts [`Distortion::distort`], recovering the ideal normalized point.
    ///
    /// Radial-tangential distortion has no closed form inverse, so it is solved with the same
    /// fixed-point iteration calibration tools use. The fisheye inverse solves for the
    /// incidence angle in `[0, π/2)` with a bracketed Newton method.
    ///
    /// Returns `None` if the iteration diverges or the point lies outside the valid
    /// range of the model.
    pub fn undistort(&self, point: Point2<f64>) -> Option<Point2<f64>> {
        match *self {
            Self::RadialTangential { coefficients, .. } => {
                let (k1, k2, p1, p2, k3) = unpack(&coefficients);
                let (xd, yd) = (point.x, point.y);
                let (mut x, mut y) = (xd, yd);
                for _ in 0..UNDISTORT_ITERATIONS {
                    let r2 = x * x + y * y;
                    let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
                    if radial <= 0.0 {
                        return None;
                    }
                    let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                    let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
                    let nx = (xd - dx) / radial;
                    let ny = (yd - dy) / radial;
                    let converged = (nx - x).abs() < 1e-15 && (ny - y).abs() < 1e-15;
                    x = nx;
                    y = ny;
                    if converged {
                        break;
                    }
                }
                Some(Point2::new(x, y)).filter(|p| p.coords.iter().all(|n| n.is_finite()))
            }
            Self::Fisheye(k) => {
                let theta_d = point.coords.norm();
                if theta_d < 1e-12 {
                    return Some(point);
                }
                let upper = core::f64::consts::FRAC_PI_2 - 1e-9;
                let theta = root(
                    |theta| {
                        let (value, derivative) = fisheye_theta_d(&k, theta);
                        (value - theta_d, derivative)
                    },
                    0.0,
                    upper,
                )?;
                let r = theta.tan();
                Some(Point2::from(point.coords * (r / theta_d)))
            }
        }
    }
}

fn unpack(c: &Vector5<f64>) -> (f64, f64, f64, f64, f64) {
    (c[0], c[1], c[2], c[3], c[4])
}

/// Returns `θd = θ (1 + k1 θ² + k2 θ⁴ + k3 θ⁶ + k4 θ⁸)` and its derivative in `θ`.
fn fisheye_theta_d(k: &Vector4<f64>, theta: f64) -> (f64, f64) {
    let t2 = theta * theta;
    let poly = 1.0 + t2 * (k[0] + t2 * (k[1] + t2 * (k[2] + t2 * k[3])));
    let dpoly = t2 * (3.0 * k[0] + t2 * (5.0 * k[1] + t2 * (7.0 * k[2] + t2 * 9.0 * k[3])));
    (theta * poly, 1.0 + dpoly)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn coefficient_lengths() {
        assert!(Distortion::from_coefficients(&[0.0; 4], false).is_some());
        assert!(Distortion::from_coefficients(&[0.0; 5], false).is_some());
        assert!(Distortion::from_coefficients(&[0.0; 4], true).is_some());
        assert!(Distortion::from_coefficients(&[0.0; 5], true).is_none());
        assert!(Distortion::from_coefficients(&[0.0; 3], false).is_none());
        assert_eq!(
            Distortion::from_coefficients(&[0.1, 0.2, 0.3, 0.4], false)
                .unwrap()
                .coefficients(),
            vec![0.1, 0.2, 0.3, 0.4]
        );
    }

    #[test]
    fn radial_tangential_inverse() {
        let d = Distortion::radial_tangential(Vector5::new(-0.28, 0.07, 1e-3, -5e-4, 0.01));
        for &(x, y) in &[(0.0, 0.0), (0.3, -0.2), (-0.45, 0.35), (0.1, 0.5)] {
            let p = Point2::new(x, y);
            let back = d.undistort(d.distort(p)).unwrap();
            assert_relative_eq!(p, back, epsilon = 1e-9);
        }
    }

    #[test]
    fn fisheye_inverse() {
        let d = Distortion::Fisheye(Vector4::new(0.05, -0.01, 0.002, -0.0005));
        for &(x, y) in &[(0.0, 0.0), (0.3, -0.2), (-1.2, 0.9), (2.0, 1.5)] {
            let p = Point2::new(x, y);
            let back = d.undistort(d.distort(p)).unwrap();
            assert_relative_eq!(p, back, epsilon = 1e-9, max_relative = 1e-9);
        }
    }

    #[test]
    fn zero_distortion_is_identity() {
        let p = Point2::new(0.7, -0.4);
        assert_eq!(Distortion::none().distort(p), p);
        assert_eq!(Distortion::none().undistort(p), Some(p));
    }
}
