use std::collections::HashMap;

use av_align::checkpoint::{self, StateDict, StoredTensor};
use av_align::config::RunConfig;
use av_align::contrastive::LossBundle;
use av_align::dataset::SyntheticSource;
use av_align::evaluator::EvalMode;
use av_align::model::{AudioVisualEmbedder, EmbedderState, FeatureBatch};
use av_align::trainer::{CpuDevice, Trainer, TrainingDevice};
use av_align::{AlignError, AlignResult};
use av_tensor::{FeatureMap, Tensor};
use av_vision::ImageTensor;

const IMAGE_SIDE: usize = 4;
const SPEC_BINS: usize = 6;
const SPEC_FRAMES: usize = 5;
const EMBED_DIM: usize = 8;

/// Fixed random projections for both towers; `backward` only counts its
/// invocations, which is all the loop contract requires of it here.
struct ProjectionEmbedder {
    visual_weights: Tensor,
    audio_weights: Tensor,
    backward_calls: usize,
    spatial_output: bool,
}

impl ProjectionEmbedder {
    fn new(seed: u64) -> Self {
        let visual_dim = 3 * IMAGE_SIDE * IMAGE_SIDE;
        let audio_dim = SPEC_BINS * SPEC_FRAMES;
        Self {
            visual_weights: Tensor::random_uniform(visual_dim, EMBED_DIM, -0.5, 0.5, Some(seed))
                .unwrap(),
            audio_weights: Tensor::random_uniform(
                audio_dim,
                EMBED_DIM,
                -0.5,
                0.5,
                Some(seed.wrapping_add(1)),
            )
            .unwrap(),
            backward_calls: 0,
            spatial_output: false,
        }
    }

    fn spatial(seed: u64) -> Self {
        let mut embedder = Self::new(seed);
        embedder.spatial_output = true;
        embedder
    }

    fn project(weights: &Tensor, rows: Vec<Vec<f32>>) -> AlignResult<Tensor> {
        let stacked: Vec<Tensor> = rows
            .into_iter()
            .map(|row| Tensor::from_vec(1, row.len(), row))
            .collect::<Result<_, _>>()?;
        Ok(Tensor::cat_rows(&stacked)?.matmul(weights)?)
    }
}

impl AudioVisualEmbedder for ProjectionEmbedder {
    fn extract_features(
        &mut self,
        visuals: &[ImageTensor],
        spectrograms: &[Tensor],
    ) -> AlignResult<(FeatureBatch, FeatureBatch)> {
        let visual = Self::project(
            &self.visual_weights,
            visuals.iter().map(|v| v.as_slice().to_vec()).collect(),
        )?;
        let audio = Self::project(
            &self.audio_weights,
            spectrograms.iter().map(|s| s.data().to_vec()).collect(),
        )?;
        let visual = if self.spatial_output {
            // Replicate each embedding over a 2x2 grid; pooling must
            // recover the flat values exactly.
            let (batch, dim) = visual.shape();
            let mut data = Vec::with_capacity(batch * dim * 4);
            for row in 0..batch {
                for &value in visual.row(row)? {
                    data.extend_from_slice(&[value, value, value, value]);
                }
            }
            FeatureBatch::Spatial(FeatureMap::new(batch, dim, 2, 2, data)?)
        } else {
            FeatureBatch::Flat(visual)
        };
        Ok((visual, FeatureBatch::Flat(audio)))
    }

    fn backward(&mut self, bundle: &LossBundle, device: &dyn TrainingDevice) -> AlignResult<()> {
        assert!(bundle.total.is_finite());
        let mut probe = vec![bundle.total];
        device.synchronize_gradients(&mut probe)?;
        self.backward_calls += 1;
        Ok(())
    }

    fn state(&self) -> AlignResult<EmbedderState> {
        let mut model = StateDict::new();
        model.insert(
            "visual_projection.weight".to_string(),
            StoredTensor::from_tensor(&self.visual_weights),
        );
        model.insert(
            "audio_projection.weight".to_string(),
            StoredTensor::from_tensor(&self.audio_weights),
        );
        let mut optimizer = StateDict::new();
        optimizer.insert(
            "sgd.steps".to_string(),
            StoredTensor::from_tensor(&Tensor::from_vec(
                1,
                1,
                vec![self.backward_calls as f32],
            )?),
        );
        Ok(EmbedderState { model, optimizer })
    }

    fn load_state(&mut self, state: &EmbedderState) -> AlignResult<()> {
        let fetch = |dict: &StateDict, key: &str| -> AlignResult<Tensor> {
            dict.get(key)
                .cloned()
                .ok_or_else(|| AlignError::InvalidArgument(format!("missing parameter {key}")))?
                .into_tensor()
                .map_err(AlignError::from)
        };
        self.visual_weights = fetch(&state.model, "visual_projection.weight")?;
        self.audio_weights = fetch(&state.model, "audio_projection.weight")?;
        self.backward_calls = fetch(&state.optimizer, "sgd.steps")?.data()[0] as usize;
        Ok(())
    }
}

fn retrieval_config(run_dir: std::path::PathBuf, epochs: usize) -> RunConfig {
    RunConfig {
        epochs,
        batch_size: 4,
        run_dir,
        temperature: 0.07,
        block_size: None,
        eval: EvalMode::Retrieval,
        recall_k: 3,
        heatmap_side: 16,
        print_freq: 10,
        seed: Some(11),
        hard_positive_index: None,
        label_file: None,
        augment: true,
    }
}

fn sources() -> (SyntheticSource, SyntheticSource) {
    (
        SyntheticSource::new(20, IMAGE_SIDE, SPEC_BINS, SPEC_FRAMES, 4).unwrap(),
        SyntheticSource::new(10, IMAGE_SIDE, SPEC_BINS, SPEC_FRAMES, 4).unwrap(),
    )
}

#[test]
fn loop_trains_evaluates_and_persists_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let (train, val) = sources();
    let mut model = ProjectionEmbedder::new(3);
    let device = CpuDevice::new();

    let report = Trainer::new(&mut model, &device, retrieval_config(dir.path().into(), 2))
        .unwrap()
        .run(&train, &val)
        .unwrap();

    assert_eq!(report.start_epoch, 0);
    assert_eq!(report.epochs_run, 2);
    assert!(report.best_metric >= 0.0 && report.best_metric <= 1.0);
    assert!(report.final_eval.is_some());
    // 20 samples in batches of 4, twice over.
    assert_eq!(model.backward_calls, 10);

    let latest = checkpoint::load(&checkpoint::latest_path(dir.path())).unwrap();
    assert_eq!(latest.epoch, 2);
    assert_eq!(latest.best_metric, report.best_metric);
    assert!(checkpoint::best_path(dir.path()).exists());
}

#[test]
fn resume_restores_epoch_and_best_metric_before_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let (train, val) = sources();
    let device = CpuDevice::new();

    let first_report = {
        let mut model = ProjectionEmbedder::new(3);
        Trainer::new(&mut model, &device, retrieval_config(dir.path().into(), 2))
            .unwrap()
            .run(&train, &val)
            .unwrap()
    };

    // Same epoch budget: the resume point already satisfies it, so no
    // epochs run and the restored best survives untouched.
    let mut resumed = ProjectionEmbedder::new(999);
    let report = Trainer::new(&mut resumed, &device, retrieval_config(dir.path().into(), 2))
        .unwrap()
        .run(&train, &val)
        .unwrap();
    assert_eq!(report.start_epoch, 2);
    assert_eq!(report.epochs_run, 0);
    assert_eq!(report.best_metric, first_report.best_metric);
    assert!(report.final_eval.is_none());
    // The restored weights came from the checkpoint, not from seed 999.
    assert_eq!(resumed.backward_calls, 10);

    // A larger budget trains the remaining epochs only.
    let mut extended = ProjectionEmbedder::new(999);
    let report = Trainer::new(&mut extended, &device, retrieval_config(dir.path().into(), 3))
        .unwrap()
        .run(&train, &val)
        .unwrap();
    assert_eq!(report.start_epoch, 2);
    assert_eq!(report.epochs_run, 1);
}

#[test]
fn corrupt_checkpoints_abort_the_resume() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(checkpoint::latest_path(dir.path()), b"garbage").unwrap();
    let (train, val) = sources();
    let mut model = ProjectionEmbedder::new(3);
    let device = CpuDevice::new();
    let err = Trainer::new(&mut model, &device, retrieval_config(dir.path().into(), 1))
        .unwrap()
        .run(&train, &val)
        .unwrap_err();
    assert!(matches!(err, AlignError::Serialization { .. }));
}

#[test]
fn hard_positive_mining_joins_the_objective_when_an_index_is_present() {
    let dir = tempfile::tempdir().unwrap();
    let (train, val) = sources();

    // Every training id maps to a couple of in-range candidates.
    let mut index = HashMap::new();
    for i in 0..train_len() {
        index.insert(
            format!("clip-{i:05}"),
            serde_json::json!({
                "video_id": format!("video-{i:05}"),
                "indices": [(i + 1) % train_len(), (i + 3) % train_len()],
            }),
        );
    }
    let index_path = dir.path().join("hard_positives.json");
    std::fs::write(&index_path, serde_json::to_string(&index).unwrap()).unwrap();

    let mut config = retrieval_config(dir.path().into(), 1);
    config.hard_positive_index = Some(index_path);

    let mut model = ProjectionEmbedder::new(5);
    let device = CpuDevice::new();
    let report = Trainer::new(&mut model, &device, config)
        .unwrap()
        .run(&train, &val)
        .unwrap();
    assert_eq!(report.epochs_run, 1);
    assert_eq!(model.backward_calls, 5);
}

#[test]
fn spatial_feature_maps_are_pooled_transparently() {
    let dir = tempfile::tempdir().unwrap();
    let (train, val) = sources();
    let mut model = ProjectionEmbedder::spatial(3);
    let device = CpuDevice::new();
    let report = Trainer::new(&mut model, &device, retrieval_config(dir.path().into(), 1))
        .unwrap()
        .run(&train, &val)
        .unwrap();
    assert_eq!(report.epochs_run, 1);
}

fn train_len() -> usize {
    20
}
