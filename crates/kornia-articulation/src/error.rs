use thiserror::Error;

use crate::optim::OptimizerError;

/// Error types for the articulation pose estimators.
#[derive(Debug, Error)]
pub enum ArticulationError {
    /// Invalid input data - mismatched array lengths with descriptive labels.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Label for the left-hand slice.
        left_name: &'static str,
        /// Length of the left-hand slice.
        left_len: usize,
        /// Label for the right-hand slice.
        right_name: &'static str,
        /// Length of the right-hand slice.
        right_len: usize,
    },

    /// A body carries fewer correspondences than a similarity transform needs.
    #[error("Body {body} requires at least {required} correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Index of the body (0 or 1).
        body: usize,
        /// Minimum number of correspondences.
        required: usize,
        /// Actual number of correspondences provided.
        actual: usize,
    },

    /// A fixed inlier mask selects too few correspondences to refit a body.
    #[error("Body {body} requires at least {required} inliers, got {actual}")]
    InsufficientInliers {
        /// Index of the body (0 or 1).
        body: usize,
        /// Minimum number of inliers.
        required: usize,
        /// Actual number of inliers.
        actual: usize,
    },

    /// A correspondence contains a NaN or infinite coordinate.
    #[error("Body {body} has a non-finite point at index {index}")]
    NonFinitePoint {
        /// Index of the body (0 or 1).
        body: usize,
        /// Index of the offending correspondence.
        index: usize,
    },

    /// An inlier index points past the end of a body's correspondences.
    #[error("Body {body} has {len} correspondences, got index {index}")]
    IndexOutOfBounds {
        /// Index of the body (0 or 1).
        body: usize,
        /// The offending index.
        index: usize,
        /// Number of correspondences in the body.
        len: usize,
    },

    /// The joint axis is zero or not finite.
    #[error("The joint axis must be a finite, non-zero vector")]
    InvalidJointAxis,

    /// The inlier threshold is not a finite positive number.
    #[error("The inlier threshold must be finite and positive, got {0}")]
    InvalidThreshold(f64),

    /// Unknown joint kind name.
    #[error("Unknown joint kind '{0}', expected 'revolute' or 'prismatic'")]
    UnknownJointKind(String),

    /// Every RANSAC hypothesis failed to produce a model.
    #[error("No model hypothesis succeeded in {iterations} RANSAC iterations")]
    NoHypothesis {
        /// Number of iterations attempted.
        iterations: usize,
    },

    /// Singular value decomposition failed.
    #[error("SVD computation failed")]
    SvdFailed,

    /// The nonlinear least-squares solver failed.
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),
}
