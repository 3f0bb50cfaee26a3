use std::fmt;
use std::str::FromStr;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::ArticulationError;
use crate::geometry::rotate_points_by_axis_angle;
use crate::optim::LeastSquaresProblem;

/// Kind of joint linking the two parts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JointKind {
    /// Rotation about the joint axis. Both parts map the axis to the same
    /// direction.
    #[default]
    Revolute,
    /// Translation along the joint axis. Both parts share one rotation.
    Prismatic,
}

impl FromStr for JointKind {
    type Err = ArticulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "revolute" => Ok(Self::Revolute),
            "prismatic" => Ok(Self::Prismatic),
            _ => Err(ArticulationError::UnknownJointKind(s.to_string())),
        }
    }
}

impl fmt::Display for JointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Revolute => write!(f, "revolute"),
            Self::Prismatic => write!(f, "prismatic"),
        }
    }
}

fn push_difference(
    out: &mut Vec<f64>,
    lhs: &[Vector3<f64>],
    rhs: &[Vector3<f64>],
    weight: f64,
) {
    for (a, b) in lhs.iter().zip(rhs.iter()) {
        out.extend((a - b).iter().map(|x| x * weight));
    }
}

fn block_weight(weighted: bool, count: usize) -> f64 {
    if weighted {
        1.0 / count as f64
    } else {
        1.0
    }
}

/// Residual of a revolute joint.
///
/// Concatenates, row-major,
/// `target0 − rot(source0, rotvec0)`, `target1 − rot(source1, rotvec1)` and
/// `rot(joint_points, rotvec0) − rot(joint_points, rotvec1)`. With `weighted`
/// every block is divided by its own point count.
#[allow(clippy::too_many_arguments)]
pub fn revolute_residual(
    rotvec0: &Vector3<f64>,
    rotvec1: &Vector3<f64>,
    source0: &[Vector3<f64>],
    target0: &[Vector3<f64>],
    source1: &[Vector3<f64>],
    target1: &[Vector3<f64>],
    joint_points: &[Vector3<f64>],
    weighted: bool,
) -> Vec<f64> {
    let mut out = Vec::with_capacity(3 * (source0.len() + source1.len() + joint_points.len()));

    let rotated0 = rotate_points_by_axis_angle(source0, rotvec0);
    push_difference(&mut out, target0, &rotated0, block_weight(weighted, source0.len()));

    let rotated1 = rotate_points_by_axis_angle(source1, rotvec1);
    push_difference(&mut out, target1, &rotated1, block_weight(weighted, source1.len()));

    let joint0 = rotate_points_by_axis_angle(joint_points, rotvec0);
    let joint1 = rotate_points_by_axis_angle(joint_points, rotvec1);
    push_difference(&mut out, &joint0, &joint1, block_weight(weighted, joint_points.len()));

    out
}

/// Residual of a prismatic joint.
///
/// Same per-part blocks as [`revolute_residual`], followed by
/// `rotvec0 − rotvec1`, which is never weighted.
pub fn prismatic_residual(
    rotvec0: &Vector3<f64>,
    rotvec1: &Vector3<f64>,
    source0: &[Vector3<f64>],
    target0: &[Vector3<f64>],
    source1: &[Vector3<f64>],
    target1: &[Vector3<f64>],
    weighted: bool,
) -> Vec<f64> {
    let mut out = Vec::with_capacity(3 * (source0.len() + source1.len() + 1));

    let rotated0 = rotate_points_by_axis_angle(source0, rotvec0);
    push_difference(&mut out, target0, &rotated0, block_weight(weighted, source0.len()));

    let rotated1 = rotate_points_by_axis_angle(source1, rotvec1);
    push_difference(&mut out, target1, &rotated1, block_weight(weighted, source1.len()));

    out.extend((rotvec0 - rotvec1).iter());

    out
}

/// Rotation refinement problem over `[rotvec0, rotvec1]`.
///
/// Sources are expected centered and targets centered and divided by scale,
/// so that only the rotations remain to be explained.
#[derive(Debug, Clone)]
pub struct JointRotationProblem<'a> {
    /// Kind of joint, selecting the residual variant.
    pub kind: JointKind,
    /// Centered source points of body 0.
    pub source0: &'a [Vector3<f64>],
    /// Centered, unscaled target points of body 0.
    pub target0: &'a [Vector3<f64>],
    /// Centered source points of body 1.
    pub source1: &'a [Vector3<f64>],
    /// Centered, unscaled target points of body 1.
    pub target1: &'a [Vector3<f64>],
    /// Samples of the joint axis in the source frame.
    pub joint_points: &'a [Vector3<f64>],
    /// Divide every residual block by its point count.
    pub weighted: bool,
}

impl JointRotationProblem<'_> {
    /// Evaluate the residual for a pair of rotation vectors.
    pub fn evaluate(&self, rotvec0: &Vector3<f64>, rotvec1: &Vector3<f64>) -> Vec<f64> {
        match self.kind {
            JointKind::Revolute => revolute_residual(
                rotvec0,
                rotvec1,
                self.source0,
                self.target0,
                self.source1,
                self.target1,
                self.joint_points,
                self.weighted,
            ),
            JointKind::Prismatic => prismatic_residual(
                rotvec0,
                rotvec1,
                self.source0,
                self.target0,
                self.source1,
                self.target1,
                self.weighted,
            ),
        }
    }
}

impl LeastSquaresProblem for JointRotationProblem<'_> {
    fn residuals(&self, params: &[f64]) -> Vec<f64> {
        let rotvec0 = Vector3::new(params[0], params[1], params[2]);
        let rotvec1 = Vector3::new(params[3], params[4], params[5]);
        self.evaluate(&rotvec0, &rotvec1)
    }
}

/// Translation refinement problem over `[t0, t1]` for a prismatic joint.
///
/// Rotations and scales are held fixed. Residuals are
/// `target_b − (s_b R_b source_b + t_b)` for both bodies, followed by the part
/// of `t0 − t1` orthogonal to the posed joint axis: the parts may only slide
/// along the axis relative to each other.
#[derive(Debug, Clone)]
pub struct JointTranslationProblem<'a> {
    /// Source and target points of body 0.
    pub body0: (&'a [Vector3<f64>], &'a [Vector3<f64>]),
    /// Source and target points of body 1.
    pub body1: (&'a [Vector3<f64>], &'a [Vector3<f64>]),
    /// Scaled rotations `s_b R_b` of both bodies.
    pub scaled_rotations: [Matrix3<f64>; 2],
    /// Joint axis mapped into the target frame, any non-zero length.
    pub joint_axis: Vector3<f64>,
}

impl LeastSquaresProblem for JointTranslationProblem<'_> {
    fn residuals(&self, params: &[f64]) -> Vec<f64> {
        let t0 = Vector3::new(params[0], params[1], params[2]);
        let t1 = Vector3::new(params[3], params[4], params[5]);

        let mut out = Vec::with_capacity(3 * (self.body0.0.len() + self.body1.0.len() + 1));
        for ((source, target), (sr, t)) in [self.body0, self.body1]
            .into_iter()
            .zip(self.scaled_rotations.iter().zip([t0, t1]))
        {
            for (s, d) in source.iter().zip(target.iter()) {
                out.extend((d - (sr * s + t)).iter());
            }
        }

        let axis = self.joint_axis.normalize();
        let dt = t0 - t1;
        out.extend((dt - axis * dt.dot(&axis)).iter());

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::axis_angle_to_rotation_matrix;
    use approx::assert_relative_eq;

    fn points() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
            Vector3::new(0.5, 0.5, 1.0),
            Vector3::new(-1.0, 0.3, 0.2),
        ]
    }

    #[test]
    fn test_revolute_residual_zero_at_truth() {
        let axis = Vector3::new(0.0, 0.0, 1.0);
        let rotvec0 = Vector3::new(0.0, 0.0, 0.5);
        let rotvec1 = Vector3::new(0.0, 0.0, -0.3);

        let src = points();
        let dst0 = rotate_points_by_axis_angle(&src, &rotvec0);
        let dst1 = rotate_points_by_axis_angle(&src, &rotvec1);
        let joints = vec![axis; 4];

        let res = revolute_residual(&rotvec0, &rotvec1, &src, &dst0, &src, &dst1, &joints, false);
        assert_eq!(res.len(), 3 * (4 + 4 + 4));
        assert!(res.iter().all(|r| r.abs() < 1e-12));
    }

    #[test]
    fn test_revolute_residual_joint_block() {
        let src = points();
        let joints = vec![Vector3::new(1.0, 0.0, 0.0); 2];
        let rotvec0 = Vector3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let rotvec1 = Vector3::zeros();

        let res = revolute_residual(&rotvec0, &rotvec1, &src, &src, &src, &src, &joints, false);
        // x axis maps to y under rotvec0, stays under rotvec1
        let joint_block = &res[3 * 8..];
        assert_relative_eq!(joint_block[0], -1.0, epsilon = 1e-12);
        assert_relative_eq!(joint_block[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(joint_block[2], 0.0, epsilon = 1e-12);

        let weighted =
            revolute_residual(&rotvec0, &rotvec1, &src, &src, &src, &src, &joints, true);
        assert_relative_eq!(weighted[3 * 8 + 1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_prismatic_residual() {
        let src = points();
        let rotvec0 = Vector3::new(0.1, 0.2, 0.3);
        let rotvec1 = Vector3::new(0.1, 0.0, 0.3);
        let dst0 = rotate_points_by_axis_angle(&src, &rotvec0);
        let dst1 = rotate_points_by_axis_angle(&src, &rotvec1);

        let res = prismatic_residual(&rotvec0, &rotvec1, &src, &dst0, &src, &dst1, true);
        assert_eq!(res.len(), 3 * (4 + 4 + 1));
        assert!(res[..24].iter().all(|r| r.abs() < 1e-12));
        assert_relative_eq!(res[24], 0.0);
        assert_relative_eq!(res[25], 0.2, epsilon = 1e-12);
        assert_relative_eq!(res[26], 0.0);
    }

    #[test]
    fn test_rotation_problem_params_layout() {
        let src = points();
        let rotvec0 = Vector3::new(0.0, 0.3, 0.0);
        let rotvec1 = Vector3::new(0.0, 0.3, 0.0);
        let dst = rotate_points_by_axis_angle(&src, &rotvec0);
        let joints = vec![Vector3::new(0.0, 1.0, 0.0); 4];

        let problem = JointRotationProblem {
            kind: JointKind::Revolute,
            source0: &src,
            target0: &dst,
            source1: &src,
            target1: &dst,
            joint_points: &joints,
            weighted: false,
        };
        let params = [rotvec0.x, rotvec0.y, rotvec0.z, rotvec1.x, rotvec1.y, rotvec1.z];
        assert_eq!(problem.residuals(&params), problem.evaluate(&rotvec0, &rotvec1));
        assert!(problem.residuals(&params).iter().all(|r| r.abs() < 1e-12));
    }

    #[test]
    fn test_translation_problem_slides_along_axis() {
        let src = points();
        let r = axis_angle_to_rotation_matrix(&Vector3::new(0.0, 0.2, 0.0));
        let t0 = Vector3::new(1.0, 2.0, 3.0);
        let t1 = Vector3::new(1.0, 2.0, 3.5);
        let dst0: Vec<_> = src.iter().map(|p| 2.0 * (r * p) + t0).collect();
        let dst1: Vec<_> = src.iter().map(|p| 2.0 * (r * p) + t1).collect();

        let problem = JointTranslationProblem {
            body0: (src.as_slice(), dst0.as_slice()),
            body1: (src.as_slice(), dst1.as_slice()),
            scaled_rotations: [2.0 * r, 2.0 * r],
            joint_axis: Vector3::new(0.0, 0.0, 5.0),
        };
        let res = problem.residuals(&[t0.x, t0.y, t0.z, t1.x, t1.y, t1.z]);
        assert!(res.iter().all(|r| r.abs() < 1e-12));

        let res = problem.residuals(&[t0.x + 1.0, t0.y, t0.z, t1.x, t1.y, t1.z]);
        assert_relative_eq!(res[res.len() - 3], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_joint_kind_parse() -> Result<(), ArticulationError> {
        assert_eq!("revolute".parse::<JointKind>()?, JointKind::Revolute);
        assert_eq!("Prismatic".parse::<JointKind>()?, JointKind::Prismatic);
        assert!("spherical".parse::<JointKind>().is_err());
        assert_eq!(JointKind::Prismatic.to_string(), "prismatic");
        Ok(())
    }
}
