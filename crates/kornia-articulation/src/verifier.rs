use crate::error::ArticulationError;
use crate::model::{Body, CorrespondenceDataset, InlierMasks, JointModel};

/// Outcome of checking a [`JointModel`] against every correspondence.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    /// Mean of the per-body inlier ratios, in `[0, 1]`.
    pub score: f64,
    /// Inlier flags of both bodies.
    pub inliers: InlierMasks,
}

pub(crate) fn check_threshold(threshold: f64) -> Result<(), ArticulationError> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(())
    } else {
        Err(ArticulationError::InvalidThreshold(threshold))
    }
}

/// Classify every correspondence of both bodies under `model`.
///
/// A correspondence is an inlier when the distance between its target and
/// its transformed source is strictly below `threshold`. The score is the
/// unweighted mean of the two bodies' inlier ratios.
///
/// # Errors
///
/// Fails when `threshold` is not finite and positive.
pub fn verify_model(
    dataset: &CorrespondenceDataset,
    model: &JointModel,
    threshold: f64,
) -> Result<Verification, ArticulationError> {
    check_threshold(threshold)?;

    let classify = |body: Body| -> Vec<bool> {
        let set = dataset.body(body);
        let transform = model.body(body);
        set.source()
            .iter()
            .zip(set.target())
            .map(|(s, t)| transform.residual_distance(s, t) < threshold)
            .collect()
    };

    let inliers = InlierMasks {
        body0: classify(Body::First),
        body1: classify(Body::Second),
    };
    let score = 0.5 * (inliers.ratio(Body::First) + inliers.ratio(Body::Second));

    Ok(Verification { score, inliers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SimilarityTransform;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn dataset() -> Result<CorrespondenceDataset, ArticulationError> {
        let src = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        // last target of body 0 is off by 0.5
        let dst0 = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.5],
        ];
        let src1 = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let dst1 = [[1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [1.0, 1.0, 0.0]];
        CorrespondenceDataset::from_arrays(&src, &dst0, &src1, &dst1, [0.0, 0.0, 1.0])
    }

    fn model() -> JointModel {
        JointModel {
            body0: SimilarityTransform::identity(),
            body1: SimilarityTransform {
                translation: Vector3::new(1.0, 0.0, 0.0),
                ..SimilarityTransform::identity()
            },
        }
    }

    #[test]
    fn test_verify_model() -> Result<(), ArticulationError> {
        let v = verify_model(&dataset()?, &model(), 0.1)?;
        assert_eq!(v.inliers.body0, vec![true, true, true, false]);
        assert_eq!(v.inliers.body1, vec![true, true, true]);
        assert_relative_eq!(v.score, 0.5 * (0.75 + 1.0));

        // distance exactly at the threshold is an outlier
        let v = verify_model(&dataset()?, &model(), 0.5)?;
        assert!(!v.inliers.body0[3]);
        let v = verify_model(&dataset()?, &model(), 0.51)?;
        assert_relative_eq!(v.score, 1.0);
        Ok(())
    }

    #[test]
    fn test_verify_model_without_inliers() -> Result<(), ArticulationError> {
        let far = SimilarityTransform {
            translation: Vector3::new(10.0, 0.0, 0.0),
            ..SimilarityTransform::identity()
        };
        let model = JointModel {
            body0: far,
            body1: far,
        };
        let v = verify_model(&dataset()?, &model, 0.5)?;
        assert_eq!(v.inliers.body0, vec![false; 4]);
        assert_eq!(v.inliers.body1, vec![false; 3]);
        assert_eq!(v.score, 0.0);
        Ok(())
    }

    #[test]
    fn test_verify_rejects_bad_threshold() -> Result<(), ArticulationError> {
        let dataset = dataset()?;
        for threshold in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                verify_model(&dataset, &model(), threshold),
                Err(ArticulationError::InvalidThreshold(_))
            ));
        }
        Ok(())
    }
}
