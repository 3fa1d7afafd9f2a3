use std::collections::HashMap;

use av_align::evaluator::{co_occurrence_map, recall_at_k, score_localization, LabelTable};
use av_align::similarity::tiled_similarity;
use av_tensor::Tensor;

/// Four validation items whose visual and audio embeddings are identical
/// unit vectors along orthogonal axes: the similarity matrix is exactly
/// the 4x4 identity.
fn orthonormal_embeddings() -> Tensor {
    Tensor::from_fn(4, 8, |r, c| if r == c { 1.0 } else { 0.0 }).unwrap()
}

#[test]
fn orthonormal_validation_set_scores_perfect_recall() {
    let embeddings = orthonormal_embeddings();
    let similarity = tiled_similarity(&embeddings, &embeddings, 2).unwrap();
    for (i, row) in similarity.data().chunks(4).enumerate() {
        for (j, value) in row.iter().enumerate() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((value - expected).abs() < 1e-6);
        }
    }
    assert_eq!(recall_at_k(&similarity, 1).unwrap(), 1.0);
    // K larger than the set is capped at the available columns.
    assert_eq!(recall_at_k(&similarity, 10).unwrap(), 1.0);
}

#[test]
fn recall_is_monotone_in_k_for_random_matrices() {
    let similarity = Tensor::random_uniform(12, 12, -1.0, 1.0, Some(99)).unwrap();
    let mut previous = 0.0f32;
    for k in 1..=12 {
        let recall = recall_at_k(&similarity, k).unwrap();
        assert!(recall >= previous, "recall regressed at k={k}");
        previous = recall;
    }
    assert_eq!(previous, 1.0);
}

#[test]
fn localization_pass_scores_label_overlap_ground_truth() {
    // Two "dog" clips and two "engine" clips; embeddings cluster per
    // label so each row's top half matches its co-occurrence row.
    let ids: Vec<String> = ["dog-a", "dog-b", "engine-a", "engine-b"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut labels = HashMap::new();
    labels.insert("dog-a".to_string(), vec!["dog".to_string()]);
    labels.insert("dog-b".to_string(), vec!["dog".to_string()]);
    labels.insert("engine-a".to_string(), vec!["engine".to_string()]);
    labels.insert("engine-b".to_string(), vec!["engine".to_string()]);
    let table = LabelTable::from_entries(labels);

    let ground_truth = co_occurrence_map(&ids, &table).unwrap();
    #[rustfmt::skip]
    assert_eq!(
        ground_truth.data(),
        &[
            1.0, 1.0, 0.0, 0.0,
            1.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 1.0,
            0.0, 0.0, 1.0, 1.0,
        ]
    );

    // Similarity mirrors the clusters exactly, so every row binarises
    // back onto its ground truth and cIoU is perfect.
    let similarity = ground_truth.clone();
    let report = score_localization(&similarity, &ground_truth, 16).unwrap();
    assert_eq!(report.per_row, vec![1.0; 4]);
    assert_eq!(report.mean_ciou, 1.0);
    assert!((report.auc - 1.0).abs() < 1e-6);

    // Anti-correlated similarity misses every ground-truth pixel.
    let inverted = Tensor::from_fn(4, 4, |r, c| {
        1.0 - ground_truth.data()[r * 4 + c]
    })
    .unwrap();
    let report = score_localization(&inverted, &ground_truth, 16).unwrap();
    assert_eq!(report.per_row, vec![0.0; 4]);
}

#[test]
fn unlabelled_ids_still_match_themselves() {
    let ids: Vec<String> = ["known", "unknown"].iter().map(|s| s.to_string()).collect();
    let mut labels = HashMap::new();
    labels.insert("known".to_string(), vec!["speech".to_string()]);
    let table = LabelTable::from_entries(labels);
    let ground_truth = co_occurrence_map(&ids, &table).unwrap();
    assert_eq!(ground_truth.data(), &[1.0, 0.0, 0.0, 1.0]);
}
