//! RANSAC-based robust estimation of articulated joint poses.

use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ArticulationError;
use crate::estimator::{EstimatorParams, JointTransformEstimator};
use crate::model::{Body, CorrespondenceDataset, InlierMasks, JointModel, MIN_CORRESPONDENCES};
use crate::residual::JointKind;
use crate::verifier::{check_threshold, verify_model, Verification};

/// Parameters for RANSAC over the joint transformation estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Number of minimal-sample hypotheses to score.
    pub max_iterations: usize,
    /// Distance below which a correspondence counts as an inlier.
    pub inlier_threshold: f64,
    /// Optional fixed seed for reproducible sampling.
    pub random_seed: Option<u64>,
    /// Stop sampling once every correspondence of both bodies is an inlier.
    pub stop_on_full_consensus: bool,
    /// Score hypotheses on the rayon thread pool.
    pub parallel: bool,
    /// Parameters of the estimator used for hypotheses and the final refit.
    pub estimator: EstimatorParams,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            inlier_threshold: 0.01,
            random_seed: None,
            stop_on_full_consensus: true,
            parallel: false,
            estimator: EstimatorParams::default(),
        }
    }
}

impl RansacParams {
    /// Set the number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the inlier distance threshold.
    pub fn with_inlier_threshold(mut self, threshold: f64) -> Self {
        self.inlier_threshold = threshold;
        self
    }

    /// Fix the random seed.
    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Enable or disable the parallel iteration mode.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set the estimator parameters.
    pub fn with_estimator(mut self, estimator: EstimatorParams) -> Self {
        self.estimator = estimator;
        self
    }
}

/// RANSAC result for an articulated object.
#[derive(Debug, Clone)]
pub struct RansacResult {
    /// Model refit on the best consensus set, or the best minimal-sample
    /// model when that set was too small to refit.
    pub model: JointModel,
    /// Inlier masks of the best hypothesis.
    pub inliers: InlierMasks,
    /// Score of the best hypothesis.
    pub score: f64,
    /// Number of hypotheses drawn.
    pub iterations: usize,
    /// Whether `model` comes from the consensus refit.
    pub refined: bool,
}

/// A scored minimal-sample hypothesis.
#[derive(Debug, Clone)]
struct Hypothesis {
    iteration: usize,
    model: JointModel,
    verification: Verification,
}

/// Keep the higher-scoring hypothesis, the earlier one on ties.
///
/// A total order on `(score, -iteration)`, so it may be used both as a
/// sequential fold and as a parallel reduction.
fn keep_best(a: Option<Hypothesis>, b: Option<Hypothesis>) -> Option<Hypothesis> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(a), Some(b)) => {
            let (sa, sb) = (a.verification.score, b.verification.score);
            if sb > sa || (sb == sa && b.iteration < a.iteration) {
                Some(b)
            } else {
                Some(a)
            }
        }
    }
}

/// Random stream of one iteration, independent of scheduling order.
fn iteration_rng(base_seed: u64, iteration: usize) -> StdRng {
    StdRng::seed_from_u64(base_seed ^ (iteration as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn draw_hypothesis(
    estimator: &JointTransformEstimator,
    dataset: &CorrespondenceDataset,
    threshold: f64,
    base_seed: u64,
    iteration: usize,
) -> Option<Hypothesis> {
    let mut rng = iteration_rng(base_seed, iteration);
    let scored = estimator
        .estimate(dataset, None, &mut rng)
        .and_then(|model| Ok((model, verify_model(dataset, &model, threshold)?)));
    match scored {
        Ok((model, verification)) => Some(Hypothesis {
            iteration,
            model,
            verification,
        }),
        Err(e) => {
            log::trace!("ransac iteration {iteration}: hypothesis failed: {e}");
            None
        }
    }
}

/// Fit a joint model robustly with RANSAC.
///
/// Scores `iterations` random minimal-sample hypotheses, keeps the one with
/// the strictly greatest inlier score and refits it on its consensus set.
///
/// # Arguments
///
/// * `dataset` - Correspondences of both parts and the joint axis.
/// * `kind` - Kind of joint linking the parts.
/// * `threshold` - Inlier distance threshold.
/// * `iterations` - Number of hypotheses to draw.
///
/// # Returns
///
/// The refined model, the best inlier masks and their score.
pub fn ransac_fit(
    dataset: &CorrespondenceDataset,
    kind: JointKind,
    threshold: f64,
    iterations: usize,
) -> Result<RansacResult, ArticulationError> {
    let params = RansacParams::default()
        .with_max_iterations(iterations)
        .with_inlier_threshold(threshold)
        .with_estimator(EstimatorParams::default().with_joint_kind(kind));
    ransac_fit_with_params(dataset, &params)
}

/// Fit a joint model robustly with RANSAC and explicit parameters.
///
/// With a fixed `random_seed` the result is deterministic and does not depend
/// on `parallel`: every iteration draws from its own seeded stream and the
/// best hypothesis is selected by score, then by iteration index.
///
/// # Errors
///
/// Fails when the threshold is not finite and positive, or when no hypothesis
/// could be estimated at all.
pub fn ransac_fit_with_params(
    dataset: &CorrespondenceDataset,
    params: &RansacParams,
) -> Result<RansacResult, ArticulationError> {
    check_threshold(params.inlier_threshold)?;

    let estimator = JointTransformEstimator::new(params.estimator.clone());
    let threshold = params.inlier_threshold;
    let base_seed = params
        .random_seed
        .unwrap_or_else(|| rand::rng().random::<u64>());

    let (best, iterations) = if params.parallel {
        let best = (0..params.max_iterations)
            .into_par_iter()
            .map(|i| draw_hypothesis(&estimator, dataset, threshold, base_seed, i))
            .reduce(|| None, keep_best);
        (best, params.max_iterations)
    } else {
        let mut best: Option<Hypothesis> = None;
        let mut iterations = 0;
        for i in 0..params.max_iterations {
            iterations += 1;
            let hypothesis = draw_hypothesis(&estimator, dataset, threshold, base_seed, i);
            let previous = best.as_ref().map(|h| h.verification.score);
            best = keep_best(best, hypothesis);

            if let Some(h) = &best {
                if previous != Some(h.verification.score) {
                    log::debug!(
                        "ransac iteration {}: best score {:.4}",
                        i,
                        h.verification.score
                    );
                }
                if params.stop_on_full_consensus && h.verification.score >= 1.0 {
                    break;
                }
            }
        }
        (best, iterations)
    };

    let best = best.ok_or(ArticulationError::NoHypothesis { iterations })?;
    let Hypothesis {
        model: sample_model,
        verification: Verification { score, inliers },
        ..
    } = best;

    let too_small = Body::ALL
        .into_iter()
        .find(|&b| inliers.count(b) < MIN_CORRESPONDENCES);
    let (model, refined) = match too_small {
        Some(body) => {
            log::warn!(
                "body {} has only {} inliers, skipping the consensus refit",
                body.index(),
                inliers.count(body)
            );
            (sample_model, false)
        }
        None => {
            let mut rng = iteration_rng(base_seed, iterations);
            let model = estimator.estimate(dataset, Some(&inliers), &mut rng)?;
            (model, true)
        }
    };

    log::debug!(
        "ransac finished after {} iterations with score {:.4} ({} + {} inliers)",
        iterations,
        score,
        inliers.count(Body::First),
        inliers.count(Body::Second)
    );

    Ok(RansacResult {
        model,
        inliers,
        score,
        iterations,
        refined,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::axis_angle_to_rotation_matrix;
    use crate::model::{CorrespondenceSet, SimilarityTransform};
    use nalgebra::Vector3;

    fn scattered_points(offset: Vector3<f64>) -> Vec<Vector3<f64>> {
        [
            [0.0, 0.0, 0.0],
            [1.0, 0.1, 0.2],
            [0.2, 0.9, 0.1],
            [0.1, 0.3, 1.0],
            [0.8, 0.7, 0.3],
            [0.6, 0.2, 0.9],
            [0.3, 0.8, 0.7],
            [0.9, 0.9, 0.9],
            [0.5, 0.4, 0.1],
            [0.15, 0.55, 0.45],
            [0.7, 0.05, 0.6],
            [0.4, 0.65, 0.95],
        ]
        .iter()
        .map(|p| Vector3::from(*p) + offset)
        .collect()
    }

    fn dataset(noise: f64) -> Result<CorrespondenceDataset, ArticulationError> {
        let r0 = axis_angle_to_rotation_matrix(&Vector3::new(0.0, 0.0, 0.4));
        let r1 = r0 * axis_angle_to_rotation_matrix(&Vector3::new(0.0, 0.0, -0.7));
        let t0 = SimilarityTransform {
            rotation: r0,
            scale: 1.5,
            translation: Vector3::new(0.2, 0.0, 1.0),
        };
        let t1 = SimilarityTransform {
            rotation: r1,
            scale: 1.5,
            translation: Vector3::new(0.2, 0.3, 1.0),
        };

        let make = |t: &SimilarityTransform, offset: Vector3<f64>| {
            let src = scattered_points(offset);
            let dst = src
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let i = i as f64;
                    let jitter = Vector3::new((1.3 * i).sin(), (2.1 * i).cos(), (0.7 * i).sin());
                    t.transform_point(p) + noise * jitter
                })
                .collect();
            CorrespondenceSet::new(src, dst)
        };

        let mut body1 = make(&t1, Vector3::new(0.0, 0.0, 1.0))?;
        let mut target = body1.target().to_vec();
        target[4] += Vector3::new(3.0, -2.0, 1.0);
        body1 = CorrespondenceSet::new(body1.source().to_vec(), target)?;

        CorrespondenceDataset::new(
            make(&t0, Vector3::zeros())?,
            body1,
            Vector3::new(0.0, 0.0, 1.0),
        )
    }

    #[test]
    fn test_ransac_flags_outlier() -> Result<(), ArticulationError> {
        let dataset = dataset(0.0)?;
        let res = ransac_fit_with_params(
            &dataset,
            &RansacParams::default()
                .with_max_iterations(50)
                .with_random_seed(1),
        )?;

        assert!(res.refined);
        assert!(!res.inliers.body1[4]);
        assert_eq!(res.inliers.count(Body::First), 12);
        assert_eq!(res.inliers.count(Body::Second), 11);
        assert!((res.score - 0.5 * (1.0 + 11.0 / 12.0)).abs() < 1e-12);
        // a perfect score is never reached, so every iteration runs
        assert_eq!(res.iterations, 50);
        Ok(())
    }

    #[test]
    fn test_ransac_parallel_matches_sequential() -> Result<(), ArticulationError> {
        let dataset = dataset(0.001)?;
        let params = RansacParams::default()
            .with_max_iterations(40)
            .with_inlier_threshold(0.01)
            .with_random_seed(7);

        let sequential = ransac_fit_with_params(&dataset, &params)?;
        let parallel = ransac_fit_with_params(&dataset, &params.clone().with_parallel(true))?;

        assert_eq!(sequential.inliers, parallel.inliers);
        assert_eq!(sequential.score, parallel.score);
        assert_eq!(sequential.model, parallel.model);
        Ok(())
    }

    #[test]
    fn test_ransac_stops_on_full_consensus() -> Result<(), ArticulationError> {
        let r = axis_angle_to_rotation_matrix(&Vector3::new(0.0, 0.0, 0.4));
        let t = SimilarityTransform {
            rotation: r,
            scale: 1.0,
            translation: Vector3::zeros(),
        };
        let src = scattered_points(Vector3::zeros());
        let set = CorrespondenceSet::new(src.clone(), t.transform_points(&src))?;
        let dataset = CorrespondenceDataset::new(set.clone(), set, Vector3::new(0.0, 0.0, 1.0))?;

        let res = ransac_fit(&dataset, JointKind::Revolute, 0.01, 1000)?;
        assert_eq!(res.iterations, 1);
        assert_eq!(res.score, 1.0);
        Ok(())
    }

    #[test]
    fn test_ransac_falls_back_without_consensus() -> Result<(), ArticulationError> {
        let dataset = dataset(0.05)?;
        let params = RansacParams::default()
            .with_max_iterations(5)
            .with_inlier_threshold(1e-6)
            .with_random_seed(3);

        let res = ransac_fit_with_params(&dataset, &params)?;
        assert!(!res.refined);
        assert_eq!(res.score, 0.0);
        Ok(())
    }

    #[test]
    fn test_ransac_errors() -> Result<(), ArticulationError> {
        let dataset = dataset(0.0)?;
        assert!(matches!(
            ransac_fit(&dataset, JointKind::Revolute, -0.1, 10),
            Err(ArticulationError::InvalidThreshold(_))
        ));
        assert!(matches!(
            ransac_fit(&dataset, JointKind::Revolute, 0.1, 0),
            Err(ArticulationError::NoHypothesis { iterations: 0 })
        ));
        Ok(())
    }

    #[test]
    fn test_keep_best_prefers_earliest_on_ties() {
        let hypothesis = |iteration, score| {
            Some(Hypothesis {
                iteration,
                model: JointModel {
                    body0: SimilarityTransform::identity(),
                    body1: SimilarityTransform::identity(),
                },
                verification: Verification {
                    score,
                    inliers: InlierMasks::default(),
                },
            })
        };

        let best = keep_best(hypothesis(3, 0.5), hypothesis(1, 0.5));
        assert_eq!(best.map(|h| h.iteration), Some(1));
        let best = keep_best(hypothesis(1, 0.5), hypothesis(3, 0.5));
        assert_eq!(best.map(|h| h.iteration), Some(1));
        let best = keep_best(hypothesis(1, 0.5), hypothesis(3, 0.75));
        assert_eq!(best.map(|h| h.iteration), Some(3));
        assert!(keep_best(None, None).is_none());
    }

    #[test]
    fn test_params_from_json() -> Result<(), serde_json::Error> {
        let params: RansacParams = serde_json::from_str(
            r#"{
                "max_iterations": 200,
                "inlier_threshold": 0.05,
                "random_seed": 42,
                "estimator": { "joint_kind": "prismatic" }
            }"#,
        )?;
        assert_eq!(params.max_iterations, 200);
        assert_eq!(params.random_seed, Some(42));
        assert_eq!(params.estimator.joint_kind, JointKind::Prismatic);
        assert!(params.stop_on_full_consensus);
        assert!(!params.parallel);
        Ok(())
    }
}
