use nalgebra::{Matrix3, Vector3};

use crate::error::ArticulationError;

/// Minimum number of correspondences needed to fit a similarity transform.
pub const MIN_CORRESPONDENCES: usize = 3;

/// One of the two rigid parts of an articulated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Body {
    /// The first part, reported as body 0.
    First,
    /// The second part, reported as body 1.
    Second,
}

impl Body {
    /// Both parts, in order.
    pub const ALL: [Body; 2] = [Body::First, Body::Second];

    /// Index of the part, 0 or 1, as used in error reports.
    pub fn index(self) -> usize {
        match self {
            Body::First => 0,
            Body::Second => 1,
        }
    }
}

/// Check that `source` and `target` hold the same number of points.
pub(crate) fn check_lengths<T>(source: &[T], target: &[T]) -> Result<(), ArticulationError> {
    if source.len() != target.len() {
        return Err(ArticulationError::MismatchedArrayLengths {
            left_name: "source points",
            left_len: source.len(),
            right_name: "target points",
            right_len: target.len(),
        });
    }
    Ok(())
}

/// Matched 3D points of one rigid part, before (`source`) and after (`target`)
/// the unknown transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrespondenceSet {
    source: Vec<Vector3<f64>>,
    target: Vec<Vector3<f64>>,
}

impl CorrespondenceSet {
    /// Create a correspondence set.
    ///
    /// # Errors
    ///
    /// Fails when `source` and `target` differ in length. Minimum size and
    /// finiteness are checked by [`CorrespondenceDataset::new`], which knows
    /// which body the set belongs to.
    pub fn new(
        source: Vec<Vector3<f64>>,
        target: Vec<Vector3<f64>>,
    ) -> Result<Self, ArticulationError> {
        check_lengths(&source, &target)?;
        Ok(Self { source, target })
    }

    /// Create a correspondence set from plain arrays.
    pub fn from_arrays(
        source: &[[f64; 3]],
        target: &[[f64; 3]],
    ) -> Result<Self, ArticulationError> {
        Self::new(
            source.iter().map(|p| Vector3::from(*p)).collect(),
            target.iter().map(|p| Vector3::from(*p)).collect(),
        )
    }

    /// Points before the transformation.
    pub fn source(&self) -> &[Vector3<f64>] {
        &self.source
    }

    /// Points after the transformation.
    pub fn target(&self) -> &[Vector3<f64>] {
        &self.target
    }

    /// Number of correspondences.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// Whether the set holds no correspondences.
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Index of the first correspondence with a NaN or infinite coordinate.
    fn first_non_finite(&self) -> Option<usize> {
        self.source
            .iter()
            .zip(self.target.iter())
            .position(|(s, t)| !s.iter().chain(t.iter()).all(|x| x.is_finite()))
    }

    /// Gather the correspondences at `indices`.
    ///
    /// # Errors
    ///
    /// Fails when an index is out of bounds; `body` only labels the error.
    pub(crate) fn select(
        &self,
        body: Body,
        indices: &[usize],
    ) -> Result<(Vec<Vector3<f64>>, Vec<Vector3<f64>>), ArticulationError> {
        if let Some(&index) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(ArticulationError::IndexOutOfBounds {
                body: body.index(),
                index,
                len: self.len(),
            });
        }
        Ok(indices
            .iter()
            .map(|&i| (self.source[i], self.target[i]))
            .unzip())
    }
}

/// The two correspondence sets of an articulated object and its joint axis.
///
/// Validated once on construction; every estimator takes it by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrespondenceDataset {
    bodies: [CorrespondenceSet; 2],
    joint_axis: Vector3<f64>,
}

impl CorrespondenceDataset {
    /// Create a dataset from both bodies and the joint axis.
    ///
    /// The axis is used as given and is not normalized.
    ///
    /// # Errors
    ///
    /// Fails when a body has fewer than 3 correspondences or a non-finite
    /// point, or when the axis is zero or not finite.
    pub fn new(
        body0: CorrespondenceSet,
        body1: CorrespondenceSet,
        joint_axis: Vector3<f64>,
    ) -> Result<Self, ArticulationError> {
        for (body, set) in Body::ALL.into_iter().zip([&body0, &body1]) {
            if set.len() < MIN_CORRESPONDENCES {
                return Err(ArticulationError::InsufficientCorrespondences {
                    body: body.index(),
                    required: MIN_CORRESPONDENCES,
                    actual: set.len(),
                });
            }
            if let Some(index) = set.first_non_finite() {
                return Err(ArticulationError::NonFinitePoint {
                    body: body.index(),
                    index,
                });
            }
        }
        if !joint_axis.iter().all(|x| x.is_finite()) || joint_axis.norm() == 0.0 {
            return Err(ArticulationError::InvalidJointAxis);
        }
        Ok(Self {
            bodies: [body0, body1],
            joint_axis,
        })
    }

    /// Create a dataset from plain arrays.
    pub fn from_arrays(
        source0: &[[f64; 3]],
        target0: &[[f64; 3]],
        source1: &[[f64; 3]],
        target1: &[[f64; 3]],
        joint_axis: [f64; 3],
    ) -> Result<Self, ArticulationError> {
        Self::new(
            CorrespondenceSet::from_arrays(source0, target0)?,
            CorrespondenceSet::from_arrays(source1, target1)?,
            Vector3::from(joint_axis),
        )
    }

    /// Correspondences of `body`.
    pub fn body(&self, body: Body) -> &CorrespondenceSet {
        &self.bodies[body.index()]
    }

    /// Both correspondence sets.
    pub fn bodies(&self) -> &[CorrespondenceSet; 2] {
        &self.bodies
    }

    /// Number of correspondences of body 0.
    pub fn nsource0(&self) -> usize {
        self.bodies[0].len()
    }

    /// Number of correspondences of body 1.
    pub fn nsource1(&self) -> usize {
        self.bodies[1].len()
    }

    /// Direction of the joint shared by both bodies.
    pub fn joint_axis(&self) -> &Vector3<f64> {
        &self.joint_axis
    }
}

/// Similarity transform `x ↦ scale · R · x + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    /// Proper rotation matrix.
    pub rotation: Matrix3<f64>,
    /// Isotropic scale.
    pub scale: f64,
    /// Translation vector.
    pub translation: Vector3<f64>,
}

impl SimilarityTransform {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            scale: 1.0,
            translation: Vector3::zeros(),
        }
    }

    /// Apply the transform to a point.
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.scale * (self.rotation * point) + self.translation
    }

    /// Apply the transform to a set of points.
    pub fn transform_points(&self, points: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        points.iter().map(|p| self.transform_point(p)).collect()
    }

    /// Euclidean distance between `target` and the transformed `source`.
    pub fn residual_distance(&self, source: &Vector3<f64>, target: &Vector3<f64>) -> f64 {
        (target - self.transform_point(source)).norm()
    }
}

/// One similarity transform per body of the articulated object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointModel {
    /// Transform of body 0.
    pub body0: SimilarityTransform,
    /// Transform of body 1.
    pub body1: SimilarityTransform,
}

impl JointModel {
    /// Transform of `body`.
    pub fn body(&self, body: Body) -> &SimilarityTransform {
        match body {
            Body::First => &self.body0,
            Body::Second => &self.body1,
        }
    }
}

/// Per-correspondence inlier flags for both bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlierMasks {
    /// Inlier flags of body 0.
    pub body0: Vec<bool>,
    /// Inlier flags of body 1.
    pub body1: Vec<bool>,
}

impl InlierMasks {
    /// Mask of `body`.
    pub fn body(&self, body: Body) -> &[bool] {
        match body {
            Body::First => &self.body0,
            Body::Second => &self.body1,
        }
    }

    /// Indices flagged as inliers in `body`.
    pub fn indices(&self, body: Body) -> Vec<usize> {
        self.body(body)
            .iter()
            .enumerate()
            .filter_map(|(i, &inlier)| inlier.then_some(i))
            .collect()
    }

    /// Number of inliers in `body`.
    pub fn count(&self, body: Body) -> usize {
        self.body(body).iter().filter(|&&inlier| inlier).count()
    }

    /// Fraction of inliers in `body`, zero for an empty mask.
    pub fn ratio(&self, body: Body) -> f64 {
        let mask = self.body(body);
        if mask.is_empty() {
            return 0.0;
        }
        self.count(body) as f64 / mask.len() as f64
    }
}
