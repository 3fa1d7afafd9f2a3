use av_vision::transforms::{CenterCrop, Normalize, TransformOperation, TransformPipeline};
use av_vision::ImageTensor;

fn checkerboard(side: usize) -> ImageTensor {
    let data: Vec<f32> = (0..3 * side * side)
        .map(|k| ((k / side + k % side) % 2) as f32)
        .collect();
    ImageTensor::new(3, side, side, data).unwrap()
}

#[test]
fn pipeline_matches_a_manual_application_of_the_same_operations() {
    let mut pipeline = TransformPipeline::with_seed(3);
    pipeline
        .add(TransformOperation::CenterCrop(CenterCrop::new(4, 4).unwrap()))
        .unwrap()
        .add(TransformOperation::Normalize(
            Normalize::new(vec![0.5, 0.5, 0.5], vec![0.5, 0.5, 0.5]).unwrap(),
        ))
        .unwrap();

    let mut transformed = checkerboard(6);
    pipeline.apply(&mut transformed).unwrap();
    assert_eq!(transformed.shape(), (3, 4, 4));
    // A 0/1 checkerboard normalised by (x - 0.5) / 0.5 lands on ±1.
    assert!(transformed
        .as_slice()
        .iter()
        .all(|v| (*v - 1.0).abs() < 1e-6 || (*v + 1.0).abs() < 1e-6));
}

#[test]
fn reseeded_pipelines_produce_independent_views_reproducibly() {
    let mut prototype = TransformPipeline::with_seed(0);
    prototype
        .add(TransformOperation::RandomHorizontalFlip(0.5))
        .unwrap()
        .add(TransformOperation::RandomTranslate {
            horizontal: 0.25,
            vertical: 0.25,
        })
        .unwrap();

    let render = |seed: u64| {
        let mut image = checkerboard(8);
        prototype.reseeded(seed).apply(&mut image).unwrap();
        image
    };

    // Same per-view seed, same perturbation; the prototype RNG is unused.
    assert_eq!(render(7), render(7));
    // Distinct seeds are free to diverge; at least one of these must.
    let base = render(1);
    assert!((2u64..6).any(|seed| render(seed) != base));
}
