use av_align::contrastive::{
    contrastive_loss, multiview_contrastive_loss, ContrastiveView, DEFAULT_TEMPERATURE,
};
use av_align::AlignError;
use av_tensor::Tensor;

fn scaled_basis(batch: usize, dim: usize, scale: f32) -> Tensor {
    Tensor::from_fn(batch, dim, |r, c| if r == c { scale } else { 0.0 }).unwrap()
}

fn synthetic_batch(seed: u64, batch: usize, dim: usize) -> Tensor {
    Tensor::random_uniform(batch, dim, -1.0, 1.0, Some(seed)).unwrap()
}

#[test]
fn matched_orthogonal_pairs_approach_the_theoretical_minimum() {
    // image[i] == audio[i] on an orthogonal basis; the loss must shrink
    // monotonically toward zero as the similarity scale grows.
    let mut losses = Vec::new();
    for scale in [0.5f32, 1.0, 2.0, 4.0, 8.0] {
        let embeddings = scaled_basis(6, 8, scale);
        let term = contrastive_loss(
            ContrastiveView {
                name: "paired",
                visual: &embeddings,
                audio: &embeddings,
            },
            1.0,
        )
        .unwrap();
        losses.push(term.loss);
    }
    for pair in losses.windows(2) {
        assert!(pair[1] < pair[0]);
    }
    assert!(losses.last().unwrap() < &1e-5);
}

#[test]
fn loss_is_reproducible_for_identical_inputs() {
    let visual = synthetic_batch(42, 4, 8);
    let audio = synthetic_batch(1337, 4, 8);
    let view = ContrastiveView {
        name: "paired",
        visual: &visual,
        audio: &audio,
    };
    let first = contrastive_loss(view, 0.1).unwrap();
    let second = contrastive_loss(view, 0.1).unwrap();
    assert!((first.loss - second.loss).abs() < 1e-6);
    assert_eq!(first.logits, second.logits);
}

#[test]
fn extra_views_add_their_terms_without_reweighting() {
    let paired = synthetic_batch(7, 5, 6);
    let audio = synthetic_batch(17, 5, 6);
    let hard_positive = synthetic_batch(27, 5, 6);
    let augmented = synthetic_batch(37, 5, 6);

    let solo = contrastive_loss(
        ContrastiveView {
            name: "paired",
            visual: &paired,
            audio: &audio,
        },
        DEFAULT_TEMPERATURE,
    )
    .unwrap();
    let bundle = multiview_contrastive_loss(
        &[
            ContrastiveView {
                name: "paired",
                visual: &paired,
                audio: &audio,
            },
            ContrastiveView {
                name: "hard_positive",
                visual: &hard_positive,
                audio: &audio,
            },
            ContrastiveView {
                name: "augmented",
                visual: &augmented,
                audio: &audio,
            },
        ],
        DEFAULT_TEMPERATURE,
    )
    .unwrap();

    assert_eq!(bundle.views.len(), 3);
    assert!((bundle.views[0].loss - solo.loss).abs() < 1e-6);
    let summed: f32 = bundle.views.iter().map(|view| view.loss).sum();
    assert!((bundle.total - summed).abs() < 1e-6);
}

#[test]
fn single_sample_batches_are_a_configuration_error() {
    let lonely = synthetic_batch(3, 1, 4);
    let err = contrastive_loss(
        ContrastiveView {
            name: "paired",
            visual: &lonely,
            audio: &lonely,
        },
        DEFAULT_TEMPERATURE,
    )
    .unwrap_err();
    assert!(matches!(err, AlignError::DegenerateBatch { batch: 1 }));
}
