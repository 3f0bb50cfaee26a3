//! Joint similarity-transform estimation for the two parts of an articulated
//! object.

use nalgebra::{Matrix3, Vector3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ArticulationError;
use crate::geometry::{
    axis_angle_to_rotation_matrix, center_points, centroid, recover_rotation, recover_scale,
    rotation_angle_difference_degrees, rotation_matrix_to_axis_angle,
};
use crate::model::{
    Body, CorrespondenceDataset, InlierMasks, JointModel, SimilarityTransform, MIN_CORRESPONDENCES,
};
use crate::optim::LevenbergMarquardt;
use crate::residual::{JointKind, JointRotationProblem, JointTranslationProblem};

/// How the two closed-form rotations are coupled through the joint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationRefinement {
    /// Jointly refine both rotation vectors with Levenberg-Marquardt.
    #[default]
    LevenbergMarquardt,
    /// Alternately re-solve each rotation with the joint axis mapped by the
    /// other part's current rotation appended to its correspondences.
    Alternating,
}

/// Parameters of the joint transformation estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorParams {
    /// Kind of joint linking the parts.
    pub joint_kind: JointKind,
    /// Rotation coupling strategy.
    pub refinement: RotationRefinement,
    /// Solver used by the Levenberg-Marquardt refinements.
    pub solver: LevenbergMarquardt,
    /// Refine both translations jointly for prismatic joints.
    pub refine_translation: bool,
    /// Maximum rounds of the alternating refinement.
    pub alternating_max_iterations: usize,
    /// Alternating refinement stops once both rotations move less than this,
    /// in degrees.
    pub alternating_tolerance_deg: f64,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            joint_kind: JointKind::Revolute,
            refinement: RotationRefinement::LevenbergMarquardt,
            solver: LevenbergMarquardt::default(),
            refine_translation: false,
            alternating_max_iterations: 100,
            alternating_tolerance_deg: 0.1,
        }
    }
}

impl EstimatorParams {
    /// Create default estimator parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the joint kind.
    pub fn with_joint_kind(mut self, joint_kind: JointKind) -> Self {
        self.joint_kind = joint_kind;
        self
    }

    /// Set the rotation refinement strategy.
    pub fn with_refinement(mut self, refinement: RotationRefinement) -> Self {
        self.refinement = refinement;
        self
    }

    /// Set the nonlinear solver configuration.
    pub fn with_solver(mut self, solver: LevenbergMarquardt) -> Self {
        self.solver = solver;
        self
    }

    /// Enable or disable joint translation refinement.
    pub fn with_refine_translation(mut self, refine: bool) -> Self {
        self.refine_translation = refine;
        self
    }
}

/// One part expressed in the frame used for rotation refinement.
struct PartFrame {
    source: Vec<Vector3<f64>>,
    target: Vec<Vector3<f64>>,
    scale: f64,
    /// Centered source points.
    source_centered: Vec<Vector3<f64>>,
    /// Target points divided by scale, then centered.
    target_normalized: Vec<Vector3<f64>>,
    /// Closed-form rotation between the two above.
    rotation: Matrix3<f64>,
}

impl PartFrame {
    fn new(source: Vec<Vector3<f64>>, target: Vec<Vector3<f64>>) -> Result<Self, ArticulationError> {
        let scale = recover_scale(&source, &target)?;
        let scale_inv = recover_scale(&target, &source)?;

        let source_centered = center_points(&source);
        let target_scaled: Vec<_> = target.iter().map(|p| p * scale_inv).collect();
        let target_normalized = center_points(&target_scaled);

        let rotation = recover_rotation(&source_centered, &target_normalized)?;

        Ok(Self {
            source,
            target,
            scale,
            source_centered,
            target_normalized,
            rotation,
        })
    }

    /// Mean of `target − scale · R · source` over the sample.
    fn translation(&self, rotation: &Matrix3<f64>) -> Vector3<f64> {
        centroid(&self.target) - self.scale * (rotation * centroid(&self.source))
    }
}

/// Estimator of a [`JointModel`] from a sample of both correspondence sets.
#[derive(Debug, Clone, Default)]
pub struct JointTransformEstimator {
    params: EstimatorParams,
}

impl JointTransformEstimator {
    /// Create an estimator.
    pub fn new(params: EstimatorParams) -> Self {
        Self { params }
    }

    /// The estimator parameters.
    pub fn params(&self) -> &EstimatorParams {
        &self.params
    }

    /// Estimate a model from a random minimal sample, or from the inliers of
    /// `fixed_inliers` when given.
    ///
    /// # Arguments
    ///
    /// * `dataset` - Correspondences of both parts and the joint axis.
    /// * `fixed_inliers` - Optional masks selecting the correspondences to fit.
    /// * `rng` - Source of randomness for the minimal sample.
    ///
    /// # Errors
    ///
    /// Fails when a fixed mask does not match its body or selects fewer than
    /// 3 correspondences.
    pub fn estimate<R: Rng + ?Sized>(
        &self,
        dataset: &CorrespondenceDataset,
        fixed_inliers: Option<&InlierMasks>,
        rng: &mut R,
    ) -> Result<JointModel, ArticulationError> {
        match fixed_inliers {
            None => {
                let idx0 = minimal_sample(rng, dataset.nsource0());
                let idx1 = minimal_sample(rng, dataset.nsource1());
                self.estimate_from_indices(dataset, &idx0, &idx1)
            }
            Some(masks) => {
                for body in Body::ALL {
                    let mask = masks.body(body);
                    let expected = dataset.body(body).len();
                    if mask.len() != expected {
                        return Err(ArticulationError::MismatchedArrayLengths {
                            left_name: "inlier mask",
                            left_len: mask.len(),
                            right_name: "correspondences",
                            right_len: expected,
                        });
                    }
                }
                self.estimate_from_indices(
                    dataset,
                    &masks.indices(Body::First),
                    &masks.indices(Body::Second),
                )
            }
        }
    }

    /// Estimate a model from explicit correspondence indices of each body.
    ///
    /// # Errors
    ///
    /// Fails when a body gets fewer than 3 indices or an index is out of
    /// bounds for its body.
    pub fn estimate_from_indices(
        &self,
        dataset: &CorrespondenceDataset,
        indices0: &[usize],
        indices1: &[usize],
    ) -> Result<JointModel, ArticulationError> {
        for (body, indices) in Body::ALL.into_iter().zip([indices0, indices1]) {
            if indices.len() < MIN_CORRESPONDENCES {
                return Err(ArticulationError::InsufficientInliers {
                    body: body.index(),
                    required: MIN_CORRESPONDENCES,
                    actual: indices.len(),
                });
            }
        }

        let (source0, target0) = dataset.body(Body::First).select(Body::First, indices0)?;
        let (source1, target1) = dataset.body(Body::Second).select(Body::Second, indices1)?;
        let part0 = PartFrame::new(source0, target0)?;
        let part1 = PartFrame::new(source1, target1)?;

        let num_joint_points = indices0.len().min(indices1.len());
        let joint_points = vec![*dataset.joint_axis(); num_joint_points];

        let (rotation0, rotation1) = match self.params.refinement {
            RotationRefinement::LevenbergMarquardt => {
                self.refine_rotations_lm(&part0, &part1, &joint_points)?
            }
            RotationRefinement::Alternating => {
                self.refine_rotations_alternating(&part0, &part1, &joint_points)?
            }
        };

        let mut translation0 = part0.translation(&rotation0);
        let mut translation1 = part1.translation(&rotation1);

        if self.params.refine_translation && self.params.joint_kind == JointKind::Prismatic {
            let problem = JointTranslationProblem {
                body0: (part0.source.as_slice(), part0.target.as_slice()),
                body1: (part1.source.as_slice(), part1.target.as_slice()),
                scaled_rotations: [part0.scale * rotation0, part1.scale * rotation1],
                joint_axis: rotation0 * dataset.joint_axis(),
            };
            let initial = [
                translation0.x,
                translation0.y,
                translation0.z,
                translation1.x,
                translation1.y,
                translation1.z,
            ];
            let result = self.params.solver.optimize(&problem, &initial)?;
            translation0 = Vector3::new(result.params[0], result.params[1], result.params[2]);
            translation1 = Vector3::new(result.params[3], result.params[4], result.params[5]);
        }

        Ok(JointModel {
            body0: SimilarityTransform {
                rotation: rotation0,
                scale: part0.scale,
                translation: translation0,
            },
            body1: SimilarityTransform {
                rotation: rotation1,
                scale: part1.scale,
                translation: translation1,
            },
        })
    }

    fn refine_rotations_lm(
        &self,
        part0: &PartFrame,
        part1: &PartFrame,
        joint_points: &[Vector3<f64>],
    ) -> Result<(Matrix3<f64>, Matrix3<f64>), ArticulationError> {
        let rotvec0 = rotation_matrix_to_axis_angle(&part0.rotation);
        let rotvec1 = rotation_matrix_to_axis_angle(&part1.rotation);

        let problem = JointRotationProblem {
            kind: self.params.joint_kind,
            source0: &part0.source_centered,
            target0: &part0.target_normalized,
            source1: &part1.source_centered,
            target1: &part1.target_normalized,
            joint_points,
            weighted: false,
        };

        let initial = [
            rotvec0.x, rotvec0.y, rotvec0.z, rotvec1.x, rotvec1.y, rotvec1.z,
        ];
        let result = self.params.solver.optimize(&problem, &initial)?;
        if !result.converged() {
            log::trace!(
                "rotation refinement stopped without converging: {:?}",
                result.termination_reason
            );
        }

        let x = &result.params;
        Ok((
            axis_angle_to_rotation_matrix(&Vector3::new(x[0], x[1], x[2])),
            axis_angle_to_rotation_matrix(&Vector3::new(x[3], x[4], x[5])),
        ))
    }

    fn refine_rotations_alternating(
        &self,
        part0: &PartFrame,
        part1: &PartFrame,
        joint_points: &[Vector3<f64>],
    ) -> Result<(Matrix3<f64>, Matrix3<f64>), ArticulationError> {
        let mut rotation0 = part0.rotation;
        let mut rotation1 = part1.rotation;

        let source0: Vec<_> = part0.source_centered.iter().chain(joint_points).copied().collect();
        let source1: Vec<_> = part1.source_centered.iter().chain(joint_points).copied().collect();

        for i in 0..self.params.alternating_max_iterations {
            let target0: Vec<_> = part0
                .target_normalized
                .iter()
                .copied()
                .chain(joint_points.iter().map(|j| rotation1 * j))
                .collect();
            let new_rotation0 = recover_rotation(&source0, &target0)?;
            let diff0 = rotation_angle_difference_degrees(&rotation0, &new_rotation0);
            rotation0 = new_rotation0;

            let target1: Vec<_> = part1
                .target_normalized
                .iter()
                .copied()
                .chain(joint_points.iter().map(|j| rotation0 * j))
                .collect();
            let new_rotation1 = recover_rotation(&source1, &target1)?;
            let diff1 = rotation_angle_difference_degrees(&rotation1, &new_rotation1);
            rotation1 = new_rotation1;

            if diff0 <= self.params.alternating_tolerance_deg
                && diff1 <= self.params.alternating_tolerance_deg
            {
                log::debug!("alternating refinement settled after {} rounds", i + 1);
                break;
            }
        }

        Ok((rotation0, rotation1))
    }
}

/// Draw 3 distinct indices in `0..len`.
fn minimal_sample<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Vec<usize> {
    rand::seq::index::sample(rng, len, MIN_CORRESPONDENCES).into_vec()
}

/// Estimate the joint transformation of an articulated object.
///
/// Uses a random minimal sample of 3 correspondences per body, or every
/// inlier of `fixed_inliers` when given, with the default estimator
/// parameters for `kind`.
///
/// Example:
///
/// ```
/// use kornia_articulation::{estimate_joint_transform, CorrespondenceDataset, JointKind};
///
/// let pts = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
/// let dataset = CorrespondenceDataset::from_arrays(&pts, &pts, &pts, &pts, [0.0, 0.0, 1.0])?;
/// let model = estimate_joint_transform(&dataset, JointKind::Revolute, None, &mut rand::rng())?;
/// assert!((model.body0.scale - 1.0).abs() < 1e-4);
/// # Ok::<(), kornia_articulation::ArticulationError>(())
/// ```
pub fn estimate_joint_transform<R: Rng + ?Sized>(
    dataset: &CorrespondenceDataset,
    kind: JointKind,
    fixed_inliers: Option<&InlierMasks>,
    rng: &mut R,
) -> Result<JointModel, ArticulationError> {
    JointTransformEstimator::new(EstimatorParams::default().with_joint_kind(kind))
        .estimate(dataset, fixed_inliers, rng)
}
