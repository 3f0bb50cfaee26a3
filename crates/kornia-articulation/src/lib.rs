#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Kornia Articulation
//!
//! Pose estimation for two-part articulated objects linked by a revolute or
//! prismatic joint, from 3D point correspondences with outliers.
//!
//! ## Key Features
//!
//! - **Closed-form similarity alignment**: SVD rotation with reflection fix and
//!   pairwise-distance scale recovery
//! - **Joint-constrained refinement**: Levenberg-Marquardt over both rotation
//!   vectors, or alternating Procrustes
//! - **RANSAC**: minimal-sample hypotheses, consensus refit, optional rayon
//!   parallelism with deterministic seeding
//!
//! ## Example
//!
//! ```rust
//! use kornia_articulation::{ransac_fit, CorrespondenceDataset, JointKind};
//!
//! let source = [
//!     [0.0, 0.0, 0.0],
//!     [1.0, 0.0, 0.0],
//!     [0.0, 1.0, 0.0],
//!     [0.0, 0.0, 1.0],
//!     [1.0, 1.0, 1.0],
//! ];
//! // both parts translated by (1, 0, 0)
//! let target: Vec<[f64; 3]> = source.iter().map(|p| [p[0] + 1.0, p[1], p[2]]).collect();
//!
//! let dataset = CorrespondenceDataset::from_arrays(
//!     &source, &target, &source, &target, [0.0, 0.0, 1.0],
//! )?;
//! let result = ransac_fit(&dataset, JointKind::Revolute, 0.01, 100)?;
//!
//! assert_eq!(result.score, 1.0);
//! assert!((result.model.body0.translation.x - 1.0).abs() < 1e-4);
//! # Ok::<(), kornia_articulation::ArticulationError>(())
//! ```

mod error;
pub use error::ArticulationError;

/// Closed-form alignment and rotation utilities.
pub mod geometry;
pub use geometry::{
    axis_angle_to_rotation_matrix, bounding_box_corners, recover_rotation, recover_scale,
    rotate_points_by_axis_angle, rotation_angle_difference, rotation_matrix_to_axis_angle,
};

mod model;
pub use model::{
    Body, CorrespondenceDataset, CorrespondenceSet, InlierMasks, JointModel, SimilarityTransform,
    MIN_CORRESPONDENCES,
};

/// Dense nonlinear least-squares solver.
pub mod optim;

/// Joint residual functions and refinement problems.
pub mod residual;
pub use residual::JointKind;

mod estimator;
pub use estimator::{
    estimate_joint_transform, EstimatorParams, JointTransformEstimator, RotationRefinement,
};

mod verifier;
pub use verifier::{verify_model, Verification};

mod ransac;
pub use ransac::{ransac_fit, ransac_fit_with_params, RansacParams, RansacResult};
