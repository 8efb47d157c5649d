use nalgebra::{Matrix4, Quaternion, Rotation3, UnitQuaternion, Vector3};

/// Averages rotations on the SO(3) manifold.
///
/// This is the quaternion eigenvector method of Markley et al. ("Averaging Quaternions", 2007):
/// the mean is the eigenvector of `M = sum(q * q^T)` with the largest eigenvalue. Since `M` is
/// the same for `q` and `-q`, the result does not depend on which hemisphere each input
/// quaternion was expressed in. Unlike an entrywise mean of rotation matrices, the result is
/// always a proper rotation.
///
/// Returns `None` if `rotations` is empty or the eigen decomposition does not converge.
///
/// ```
/// use mocap_core::{average_rotations, nalgebra::{Rotation3, Vector3}};
///
/// let a = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.1);
/// let b = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.3);
/// let mean = average_rotations(&[a, b]).unwrap();
/// assert!((mean.angle() - 0.2).abs() < 1e-9);
/// ```
pub fn average_rotations(rotations: &[Rotation3<f64>]) -> Option<Rotation3<f64>> {
    if rotations.is_empty() {
        return None;
    }
    let m: Matrix4<f64> = rotations
        .iter()
        .map(|rotation| {
            let q = UnitQuaternion::from_rotation_matrix(rotation).into_inner().coords;
            q * q.transpose()
        })
        .sum();
    let eigen = m.try_symmetric_eigen(1e-12, 1000)?;
    let (ix, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))?;
    // `UnitQuaternion` stores its coordinates as (i, j, k, w), which matches `Quaternion::from_vector`.
    let q = Quaternion::from_vector(eigen.eigenvectors.column(ix).into_owned());
    Some(UnitQuaternion::from_quaternion(q).to_rotation_matrix())
}

/// Arithmetic mean of a set of vectors. Returns `None` for an empty set.
pub fn mean_vector(vectors: &[Vector3<f64>]) -> Option<Vector3<f64>> {
    if vectors.is_empty() {
        return None;
    }
    Some(vectors.iter().sum::<Vector3<f64>>() / vectors.len() as f64)
}
