//! Closed-form starting points for the nonlinear refinement.

use log::*;
use mocap_core::Skew3;
use mocap_pinhole::ImageSize;
use nalgebra::{IsometryMatrix3, Matrix2, Matrix3, Translation3, Vector2};

/// Focal lengths from the homographies of a planar pattern, with the principal point fixed at
/// the image center and zero skew.
///
/// With the principal point known, every homography `H ~ K [r1 r2 t]` gives two linear
/// constraints on `(1/fx², 1/fy²)` from the orthonormality of `r1` and `r2`. They are solved in
/// the least squares sense. If that fails (for instance when all views are nearly parallel to
/// the image plane), a single focal length is fit, and failing that the larger image side is
/// used.
pub fn initial_intrinsics(
    homographies: &[Matrix3<f64>],
    size: ImageSize,
    fix_aspect_ratio: bool,
) -> Matrix3<f64> {
    let (cx, cy) = size.center();
    #[rustfmt::skip]
    let center_inverse = Matrix3::new(
        1.0, 0.0, -cx,
        0.0, 1.0, -cy,
        0.0, 0.0, 1.0,
    );
    // Rows `[a, b, c]` of `a / fx² + b / fy² + c = 0`.
    let constraints: Vec<[f64; 3]> = homographies
        .iter()
        .flat_map(|h| {
            let h = center_inverse * h;
            let (h1, h2) = (h.column(0), h.column(1));
            [
                [h1.x * h2.x, h1.y * h2.y, h1.z * h2.z],
                [
                    h1.x * h1.x - h2.x * h2.x,
                    h1.y * h1.y - h2.y * h2.y,
                    h1.z * h1.z - h2.z * h2.z,
                ],
            ]
        })
        .collect();

    let fallback = f64::from(size.width.max(size.height));
    let (fx, fy) = if fix_aspect_ratio {
        let f = common_focal(&constraints).unwrap_or(fallback);
        (f, f)
    } else {
        separate_focals(&constraints)
            .or_else(|| common_focal(&constraints).map(|f| (f, f)))
            .unwrap_or_else(|| {
                debug!("no closed form focal length, using {}", fallback);
                (fallback, fallback)
            })
    };
    Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0)
}

fn separate_focals(constraints: &[[f64; 3]]) -> Option<(f64, f64)> {
    let mut normal = Matrix2::zeros();
    let mut rhs = Vector2::zeros();
    for &[a, b, c] in constraints {
        let row = Vector2::new(a, b);
        normal += row * row.transpose();
        rhs -= row * c;
    }
    let solution = normal.try_inverse()? * rhs;
    focal(solution.x).zip(focal(solution.y))
}

fn common_focal(constraints: &[[f64; 3]]) -> Option<f64> {
    let (num, den) = constraints
        .iter()
        .fold((0.0, 0.0), |(num, den), &[a, b, c]| {
            let m = a + b;
            (num - m * c, den + m * m)
        });
    if den > 0.0 {
        focal(num / den)
    } else {
        None
    }
}

/// `f` from `1 / f²`.
fn focal(inverse_square: f64) -> Option<f64> {
    Some(inverse_square.recip().sqrt()).filter(|f| f.is_finite() && *f > 0.0)
}

/// The pose of a planar pattern from the homography mapping its plane onto normalized image
/// coordinates.
///
/// The columns of `H ~ [r1 r2 t]` are scaled to unit rotation columns, the sign is chosen so the
/// pattern lies in front of the camera, and the rotation is projected onto SO(3).
pub fn pose_from_homography(h: &Matrix3<f64>) -> Option<IsometryMatrix3<f64>> {
    let (c0, c1, c2) = (h.column(0), h.column(1), h.column(2));
    let norms = [c0.norm(), c1.norm()];
    if norms.iter().any(|&n| !(n > f64::EPSILON)) {
        return None;
    }
    let mut scale = 2.0 / (norms[0] + norms[1]);
    if c2.z * scale < 0.0 {
        scale = -scale;
    }
    let r1 = c0 * scale;
    let r2 = c1 * scale;
    let r3 = r1.cross(&r2);
    let rotation = Skew3::from_matrix(&Matrix3::from_columns(&[r1, r2, r3]))?.rotation();
    let translation = c2 * scale;
    Some(IsometryMatrix3::from_parts(
        Translation3::from(translation),
        rotation,
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Vector3};

    fn homography(k: &Matrix3<f64>, pose: &IsometryMatrix3<f64>) -> Matrix3<f64> {
        let r = pose.rotation.matrix();
        let t = pose.translation.vector;
        k * Matrix3::from_columns(&[r.column(0).into_owned(), r.column(1).into_owned(), t])
    }

    fn poses() -> Vec<IsometryMatrix3<f64>> {
        [
            Vector3::new(0.4, 0.1, 0.0),
            Vector3::new(-0.3, 0.35, 0.1),
            Vector3::new(0.1, -0.45, -0.2),
        ]
        .iter()
        .map(|axis| {
            IsometryMatrix3::from_parts(
                Translation3::new(-0.2, -0.1, 2.0),
                Rotation3::new(*axis),
            )
        })
        .collect()
    }

    #[test]
    fn focals_from_tilted_views() {
        let size = ImageSize::new(1281, 721);
        let (cx, cy) = size.center();
        let k = Matrix3::new(900.0, 0.0, cx, 0.0, 940.0, cy, 0.0, 0.0, 1.0);
        let homographies: Vec<_> = poses().iter().map(|p| homography(&k, p)).collect();
        assert_relative_eq!(
            initial_intrinsics(&homographies, size, false),
            k,
            max_relative = 1e-9
        );

        let square = Matrix3::new(920.0, 0.0, cx, 0.0, 920.0, cy, 0.0, 0.0, 1.0);
        let homographies: Vec<_> = poses().iter().map(|p| homography(&square, p)).collect();
        assert_relative_eq!(
            initial_intrinsics(&homographies, size, true),
            square,
            max_relative = 1e-9
        );
    }

    #[test]
    fn falls_back_to_image_size() {
        let size = ImageSize::new(640, 480);
        let (cx, cy) = size.center();
        let k = Matrix3::new(500.0, 0.0, cx, 0.0, 500.0, cy, 0.0, 0.0, 1.0);
        let fronto = IsometryMatrix3::translation(0.0, 0.0, 3.0);
        let h = homography(&k, &fronto);
        assert_eq!(initial_intrinsics(&[h], size, false)[(0, 0)], 640.0);
    }

    #[test]
    fn pose_round_trip() {
        for pose in poses() {
            let h = homography(&Matrix3::identity(), &pose) * -3.0;
            let recovered = pose_from_homography(&h).unwrap();
            assert_relative_eq!(
                recovered.to_homogeneous(),
                pose.to_homogeneous(),
                epsilon = 1e-9
            );
        }
    }
}
