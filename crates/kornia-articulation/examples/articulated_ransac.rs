use argh::FromArgs;
use kornia_articulation::{
    axis_angle_to_rotation_matrix, bounding_box_corners, geometry::rotation_angle_difference_degrees,
    ransac_fit_with_params, Body, CorrespondenceDataset, CorrespondenceSet, JointKind, RansacParams,
    SimilarityTransform,
};
use nalgebra::Vector3;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Fits the pose of a synthetic two-part articulated object
#[derive(Debug, FromArgs)]
struct Args {
    /// joint kind: revolute or prismatic
    #[argh(option, short = 'j', default = "JointKind::Revolute")]
    joint: JointKind,

    /// number of correspondences per part
    #[argh(option, short = 'n', default = "100")]
    num_points: usize,

    /// fraction of corrupted correspondences
    #[argh(option, short = 'o', default = "0.2")]
    outlier_ratio: f64,

    /// number of RANSAC iterations
    #[argh(option, short = 'i', default = "1000")]
    iterations: usize,

    /// inlier distance threshold
    #[argh(option, short = 't', default = "0.01")]
    threshold: f64,

    /// random seed
    #[argh(option, short = 's', default = "0")]
    seed: u64,

    /// score hypotheses in parallel
    #[argh(switch, short = 'p')]
    parallel: bool,

    /// optional JSON file with RANSAC parameters, overriding the flags above
    #[argh(option, short = 'c')]
    config: Option<std::path::PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut params = match &args.config {
        Some(path) => serde_json::from_str::<RansacParams>(&std::fs::read_to_string(path)?)?,
        None => RansacParams::default()
            .with_max_iterations(args.iterations)
            .with_inlier_threshold(args.threshold)
            .with_parallel(args.parallel),
    };
    params.random_seed.get_or_insert(args.seed);
    if args.config.is_none() {
        params.estimator.joint_kind = args.joint;
    }
    let joint = params.estimator.joint_kind;

    // ground truth: a unit box per part, the second articulated about z
    let axis = Vector3::new(0.0, 0.0, 1.0);
    let body0 = SimilarityTransform {
        rotation: axis_angle_to_rotation_matrix(&Vector3::new(0.1, -0.2, 0.6)),
        scale: 1.5,
        translation: Vector3::new(0.5, -0.2, 2.0),
    };
    let body1 = match joint {
        JointKind::Revolute => SimilarityTransform {
            rotation: body0.rotation * axis_angle_to_rotation_matrix(&(0.7 * axis)),
            ..body0
        },
        JointKind::Prismatic => SimilarityTransform {
            translation: body0.translation + body0.scale * (body0.rotation * (0.4 * axis)),
            ..body0
        },
    };

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut sample_part = |transform: &SimilarityTransform, center: Vector3<f64>| {
        let source: Vec<_> = (0..args.num_points)
            .map(|_| {
                center
                    + Vector3::new(
                        rng.random_range(-0.5..0.5),
                        rng.random_range(-0.5..0.5),
                        rng.random_range(-0.5..0.5),
                    )
            })
            .collect();
        let target = source
            .iter()
            .map(|p| {
                let mut q = transform.transform_point(p);
                if rng.random_bool(args.outlier_ratio) {
                    q += Vector3::new(
                        rng.random_range(-2.0..2.0),
                        rng.random_range(-2.0..2.0),
                        rng.random_range(-2.0..2.0),
                    );
                }
                q
            })
            .collect();
        CorrespondenceSet::new(source, target)
    };

    let center0 = Vector3::zeros();
    let center1 = Vector3::new(0.0, 0.0, 1.0);
    let dataset = CorrespondenceDataset::new(
        sample_part(&body0, center0)?,
        sample_part(&body1, center1)?,
        axis,
    )?;

    let res = ransac_fit_with_params(&dataset, &params)?;

    println!(
        "{} joint: score {:.4} after {} iterations (refined: {})",
        joint, res.score, res.iterations, res.refined
    );
    let truths = [(&body0, center0), (&body1, center1)];
    for (part, (truth, center)) in Body::ALL.into_iter().zip(truths) {
        let est = res.model.body(part);
        println!(
            "part {}: {} inliers, rotation error {:.4} deg, scale {:.4} (gt {:.4}), translation error {:.2e}",
            part.index(),
            res.inliers.count(part),
            rotation_angle_difference_degrees(&est.rotation, &truth.rotation),
            est.scale,
            truth.scale,
            (est.translation - truth.translation).norm(),
        );
        let corners = bounding_box_corners(&Vector3::new(1.0, 1.0, 1.0), &center);
        println!("  posed box: {:?}", est.transform_points(&corners));
    }

    Ok(())
}
