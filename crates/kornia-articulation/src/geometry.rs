use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

use crate::{error::ArticulationError, model::check_lengths};

/// Additive floor on the scale denominator for coincident source points.
pub const SCALE_EPS: f64 = 1e-6;

/// Compute the centroid of a set of points.
///
/// Returns the zero vector for an empty set.
pub fn centroid(points: &[Vector3<f64>]) -> Vector3<f64> {
    if points.is_empty() {
        return Vector3::zeros();
    }
    points.iter().sum::<Vector3<f64>>() / points.len() as f64
}

/// Subtract the centroid from every point.
pub fn center_points(points: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
    let c = centroid(points);
    points.iter().map(|p| p - c).collect()
}

/// Recover the rotation that best aligns `source` onto `target` (Kabsch).
///
/// Both sets are centered on their own centroid, the cross-covariance
/// `M = target_cᵀ · source_c` is decomposed as `U D Vᵀ` and `R = U Vᵀ`. When the
/// decomposition yields a reflection the last column of `U` is negated, so the
/// result always has determinant +1.
///
/// PRECONDITION: at least 3 non-collinear points. Degenerate inputs produce a
/// best-effort rotation.
///
/// # Arguments
///
/// * `source` - Points before the transformation.
/// * `target` - Corresponding points after the transformation.
///
/// # Returns
///
/// A proper 3x3 rotation matrix.
///
/// Example:
///
/// ```
/// use kornia_articulation::geometry::recover_rotation;
/// use nalgebra::Vector3;
///
/// let src = vec![
///     Vector3::new(0.0, 0.0, 0.0),
///     Vector3::new(1.0, 0.0, 0.0),
///     Vector3::new(0.0, 1.0, 0.0),
/// ];
/// let r = recover_rotation(&src, &src).unwrap();
/// assert!((r.determinant() - 1.0).abs() < 1e-9);
/// ```
pub fn recover_rotation(
    source: &[Vector3<f64>],
    target: &[Vector3<f64>],
) -> Result<Matrix3<f64>, ArticulationError> {
    check_lengths(source, target)?;

    let mu_s = centroid(source);
    let mu_t = centroid(target);

    let mut m = Matrix3::<f64>::zeros();
    for (s, t) in source.iter().zip(target.iter()) {
        m += (t - mu_t) * (s - mu_s).transpose();
    }

    let svd = m.svd(true, true);
    let mut u = svd.u.ok_or(ArticulationError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(ArticulationError::SvdFailed)?;

    // det(V) == det(Vᵀ)
    if u.determinant() * v_t.determinant() < 0.0 {
        u.column_mut(2).scale_mut(-1.0);
    }

    Ok(u * v_t)
}

/// Sum over all ordered pairs of points of their Euclidean distance, flattened.
fn pairwise_distances(points: &[Vector3<f64>]) -> impl Iterator<Item = f64> + '_ {
    points
        .iter()
        .flat_map(move |a| points.iter().map(move |b| (a - b).norm()))
}

/// Recover the isotropic scale that maps `source` onto `target`.
///
/// Computes the pairwise distances `A` within `source` and `b` within `target`
/// and returns the least-squares ratio `A·b / (A·A + 1e-6)`.
pub fn recover_scale(
    source: &[Vector3<f64>],
    target: &[Vector3<f64>],
) -> Result<f64, ArticulationError> {
    check_lengths(source, target)?;

    let (ab, aa) = pairwise_distances(source)
        .zip(pairwise_distances(target))
        .fold((0.0, 0.0), |(ab, aa), (a, b)| (ab + a * b, aa + a * a));

    Ok(ab / (aa + SCALE_EPS))
}

/// Geodesic distance between two rotations, in radians within `[0, 2π)`.
///
/// The arccos argument is clamped so that rounding on nearly identical
/// rotations does not produce NaN.
pub fn rotation_angle_difference(r1: &Matrix3<f64>, r2: &Matrix3<f64>) -> f64 {
    let cos = (((r1 * r2.transpose()).trace() - 1.0) / 2.0).clamp(-1.0, 1.0);
    cos.acos().rem_euclid(2.0 * std::f64::consts::PI)
}

/// Geodesic distance between two rotations, in degrees.
pub fn rotation_angle_difference_degrees(r1: &Matrix3<f64>, r2: &Matrix3<f64>) -> f64 {
    rotation_angle_difference(r1, r2).to_degrees()
}

/// Split a rotation vector into its unit axis and angle.
///
/// A zero rotation vector yields a zero axis instead of NaN, which makes every
/// Rodrigues term but `cos θ · p` vanish.
fn axis_and_angle(rotvec: &Vector3<f64>) -> (Vector3<f64>, f64) {
    let theta = rotvec.norm();
    let axis = rotvec.map(|x| {
        let v = x / theta;
        if v.is_nan() {
            0.0
        } else {
            v
        }
    });
    (axis, theta)
}

#[inline]
fn rodrigues(p: &Vector3<f64>, v: &Vector3<f64>, sin_theta: f64, cos_theta: f64) -> Vector3<f64> {
    p * cos_theta + v.cross(p) * sin_theta + v * (p.dot(v) * (1.0 - cos_theta))
}

/// Rotate a single point with Rodrigues' rotation formula.
pub fn rotate_point_by_axis_angle(point: &Vector3<f64>, rotvec: &Vector3<f64>) -> Vector3<f64> {
    let (v, theta) = axis_and_angle(rotvec);
    let (sin_theta, cos_theta) = theta.sin_cos();
    rodrigues(point, &v, sin_theta, cos_theta)
}

/// Rotate points by a rotation vector (axis scaled by angle in radians).
///
/// Uses Rodrigues' formula `cos θ·p + sin θ·(v × p) + (1 − cos θ)(p·v)v`.
/// A zero rotation vector is the identity.
///
/// Example:
///
/// ```
/// use kornia_articulation::geometry::rotate_points_by_axis_angle;
/// use nalgebra::Vector3;
///
/// let pts = vec![Vector3::new(1.0, 2.0, 3.0)];
/// let out = rotate_points_by_axis_angle(&pts, &Vector3::zeros());
/// assert_eq!(out, pts);
/// ```
pub fn rotate_points_by_axis_angle(
    points: &[Vector3<f64>],
    rotvec: &Vector3<f64>,
) -> Vec<Vector3<f64>> {
    let (v, theta) = axis_and_angle(rotvec);
    let (sin_theta, cos_theta) = theta.sin_cos();
    points
        .iter()
        .map(|p| rodrigues(p, &v, sin_theta, cos_theta))
        .collect()
}

/// Compute the rotation matrix from a rotation vector.
///
/// # Arguments
///
/// * `rotvec` - Rotation axis scaled by the rotation angle in radians.
///
/// # Returns
///
/// The rotation matrix. The zero vector maps to the identity.
pub fn axis_angle_to_rotation_matrix(rotvec: &Vector3<f64>) -> Matrix3<f64> {
    let (axis, angle) = axis_and_angle(rotvec);

    let x = axis.x;
    let y = axis.y;
    let z = axis.z;

    let (s, c) = angle.sin_cos();
    let t = 1.0 - c;

    let tmp1 = x * y * t;
    let tmp2 = z * s;
    let tmp3 = x * z * t;
    let tmp4 = y * s;
    let tmp5 = y * z * t;
    let tmp6 = x * s;

    Matrix3::new(
        c + x * x * t,
        tmp1 - tmp2,
        tmp3 + tmp4,
        tmp1 + tmp2,
        c + y * y * t,
        tmp5 - tmp6,
        tmp3 - tmp4,
        tmp5 + tmp6,
        c + z * z * t,
    )
}

/// Compute the rotation vector of a rotation matrix.
///
/// Goes through a unit quaternion so that angles close to π keep a well
/// defined axis. The returned angle lies in `[0, π]`.
pub fn rotation_matrix_to_axis_angle(rotation: &Matrix3<f64>) -> Vector3<f64> {
    let rot = Rotation3::from_matrix_unchecked(*rotation);
    UnitQuaternion::from_rotation_matrix(&rot).scaled_axis()
}

/// Corners of an axis-aligned box with extents `scale` centred at `shift`.
///
/// Corners are ordered `(+x,+y,+z), (+x,+y,−z), (−x,+y,+z), (−x,+y,−z),
/// (+x,−y,+z), (+x,−y,−z), (−x,−y,+z), (−x,−y,−z)` in half extents.
pub fn bounding_box_corners(scale: &Vector3<f64>, shift: &Vector3<f64>) -> [Vector3<f64>; 8] {
    let h = scale / 2.0;
    let signs = [
        [1.0, 1.0, 1.0],
        [1.0, 1.0, -1.0],
        [-1.0, 1.0, 1.0],
        [-1.0, 1.0, -1.0],
        [1.0, -1.0, 1.0],
        [1.0, -1.0, -1.0],
        [-1.0, -1.0, 1.0],
        [-1.0, -1.0, -1.0],
    ];
    signs.map(|[sx, sy, sz]| Vector3::new(sx * h.x, sy * h.y, sz * h.z) + shift)
}
