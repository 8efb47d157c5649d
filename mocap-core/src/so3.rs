use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Matrix3, Rotation3, Unit, Vector3};
use num_traits::Float;
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Contains a member of the lie algebra so(3), a representation of the tangent space
/// of 3d rotation. This is also known as the lie algebra of the 3d rotation group SO(3).
///
/// The vector is the rotation axis scaled by the rotation angle in radians, which is the
/// same quantity calibration tools call a Rodrigues vector. Calibration files and the
/// nonlinear refinement store rotations in this form since it has exactly three
/// unconstrained degrees of freedom. In all other cases a rotation matrix should be used,
/// since the conversion to and from a rotation matrix is non-trivial.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Skew3(pub Vector3<f64>);

impl Skew3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self(Vector3::new(x, y, z))
    }

    pub fn identity() -> Self {
        Self(Vector3::zeros())
    }

    /// Converts the Skew3 to a Rotation3 matrix.
    pub fn rotation(self) -> Rotation3<f64> {
        self.into()
    }

    /// Converts the Skew3 into a Rotation3 matrix quickly, but only works when the rotation
    /// is very small.
    pub fn rotation_small(self) -> Rotation3<f64> {
        Rotation3::from_matrix_unchecked(Matrix3::identity() + self.hat())
    }

    /// Converts an arbitrary 3x3 matrix into a Skew3 by first projecting it onto the
    /// closest proper rotation (in the Frobenius sense).
    ///
    /// Rotation matrices read from text files are usually only orthonormal to the
    /// precision they were printed with, which is why the projection is needed.
    /// Returns `None` if the decomposition fails or the matrix contains non-finite values.
    pub fn from_matrix(matrix: &Matrix3<f64>) -> Option<Self> {
        if matrix.iter().any(|n| !n.is_finite()) {
            return None;
        }
        let svd = matrix.try_svd(true, true, f64::epsilon(), 0)?;
        let u = svd.u?;
        let v_t = svd.v_t?;
        let mut rotation = u * v_t;
        if rotation.determinant() < 0.0 {
            let mut u = u;
            u.column_mut(2).neg_mut();
            rotation = u * v_t;
        }
        Some(Rotation3::from_matrix_unchecked(rotation).into())
    }

    /// The rotation angle in radians.
    pub fn angle(self) -> f64 {
        self.0.norm()
    }

    /// This converts the Skew3 into its skew-symmetric matrix form.
    pub fn hat(self) -> Matrix3<f64> {
        self.0.cross_matrix()
    }
}

/// This is the exponential map.
impl From<Skew3> for Rotation3<f64> {
    fn from(w: Skew3) -> Self {
        // This check is done to avoid the degenerate case where the angle is near zero.
        let theta2 = w.0.norm_squared();
        if theta2 <= f64::epsilon() {
            w.rotation_small()
        } else {
            let theta = theta2.sqrt();
            let axis = Unit::new_unchecked(w.0 / theta);
            Self::from_axis_angle(&axis, theta)
        }
    }
}

/// This is the log map.
impl From<Rotation3<f64>> for Skew3 {
    fn from(r: Rotation3<f64>) -> Self {
        let skew3 = r.scaled_axis();
        let skew3 = if skew3.iter().any(|n| n.is_nan()) {
            Vector3::zeros()
        } else {
            skew3
        };
        Self(skew3)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn exp_log_round_trip() {
        let w = Skew3::new(0.2, -0.4, 1.1);
        let back: Skew3 = w.rotation().into();
        assert_relative_eq!(w.0, back.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_vector_is_identity() {
        let r = Skew3::identity().rotation();
        assert_relative_eq!(r.into_inner(), Matrix3::identity(), epsilon = 1e-15);
    }

    #[test]
    fn from_matrix_projects_noisy_rotation() {
        let w = Skew3::new(0.1, 0.3, -0.2);
        let mut noisy = w.rotation().into_inner();
        noisy[(0, 1)] += 1e-7;
        let recovered = Skew3::from_matrix(&noisy).unwrap();
        assert_relative_eq!(w.0, recovered.0, epsilon = 1e-6);
    }

    #[test]
    fn from_matrix_rejects_nan() {
        let mut m = Matrix3::identity();
        m[(2, 2)] = f64::NAN;
        assert!(Skew3::from_matrix(&m).is_none());
    }
}
