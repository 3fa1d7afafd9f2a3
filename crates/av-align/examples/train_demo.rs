//! End-to-end demo: train a linear two-tower embedder on the synthetic
//! source and evaluate retrieval per epoch, with TensorBoard export and
//! checkpoint resume.
//!
//! ```sh
//! cargo run --example train_demo
//! ```

use std::error::Error;

use av_align::checkpoint::{StateDict, StoredTensor};
use av_align::config::RunConfig;
use av_align::contrastive::LossBundle;
use av_align::dataset::SyntheticSource;
use av_align::evaluator::EvalMode;
use av_align::metrics::{register_training_descriptors, TensorBoardExporter};
use av_align::model::{AudioVisualEmbedder, EmbedderState, FeatureBatch};
use av_align::trainer::{CpuDevice, Trainer, TrainingDevice};
use av_align::{AlignError, AlignResult};
use av_tensor::Tensor;
use av_vision::ImageTensor;

const IMAGE_SIDE: usize = 8;
const SPEC_BINS: usize = 12;
const SPEC_FRAMES: usize = 10;
const EMBED_DIM: usize = 16;

/// Linear projections for both towers with plain SGD on the paired view.
struct LinearEmbedder {
    visual_weights: Tensor,
    audio_weights: Tensor,
    temperature: f32,
    learning_rate: f32,
    steps: usize,
    cache: Option<ForwardCache>,
}

struct ForwardCache {
    visual_inputs: Tensor,
    audio_inputs: Tensor,
    visual_embeddings: Tensor,
    audio_embeddings: Tensor,
}

impl LinearEmbedder {
    fn new(temperature: f32, learning_rate: f32, seed: u64) -> AlignResult<Self> {
        let visual_dim = 3 * IMAGE_SIDE * IMAGE_SIDE;
        let audio_dim = SPEC_BINS * SPEC_FRAMES;
        let scale = 1.0 / (EMBED_DIM as f32).sqrt();
        Ok(Self {
            visual_weights: Tensor::random_uniform(visual_dim, EMBED_DIM, -scale, scale, Some(seed))?,
            audio_weights: Tensor::random_uniform(
                audio_dim,
                EMBED_DIM,
                -scale,
                scale,
                Some(seed.wrapping_add(1)),
            )?,
            temperature,
            learning_rate,
            steps: 0,
            cache: None,
        })
    }

    fn stack_visuals(visuals: &[ImageTensor]) -> AlignResult<Tensor> {
        let rows: Vec<Tensor> = visuals
            .iter()
            .map(|image| Tensor::from_vec(1, image.as_slice().len(), image.as_slice().to_vec()))
            .collect::<Result<_, _>>()?;
        Ok(Tensor::cat_rows(&rows)?)
    }

    fn stack_spectrograms(spectrograms: &[Tensor]) -> AlignResult<Tensor> {
        let rows: Vec<Tensor> = spectrograms
            .iter()
            .map(|spec| Tensor::from_vec(1, spec.len(), spec.data().to_vec()))
            .collect::<Result<_, _>>()?;
        Ok(Tensor::cat_rows(&rows)?)
    }

    /// `(softmax(logits) - I) / B`, the cross-entropy gradient at the
    /// scaled logits.
    fn logit_gradient(logits: &Tensor) -> AlignResult<Tensor> {
        let (batch, _) = logits.shape();
        let mut gradient = Tensor::zeros(batch, batch)?;
        for i in 0..batch {
            let row = logits.row(i)?;
            let max_logit = row.iter().fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
            let exp_row: Vec<f32> = row.iter().map(|&v| (v - max_logit).exp()).collect();
            let denom: f32 = exp_row.iter().sum();
            let out = gradient.data_mut();
            for j in 0..batch {
                let softmax = exp_row[j] / denom;
                let target = if i == j { 1.0 } else { 0.0 };
                out[i * batch + j] = (softmax - target) / batch as f32;
            }
        }
        Ok(gradient)
    }

    fn apply_sgd(weights: &mut Tensor, gradients: &[f32], learning_rate: f32) {
        for (weight, gradient) in weights.data_mut().iter_mut().zip(gradients.iter()) {
            *weight -= learning_rate * gradient;
        }
    }
}

impl AudioVisualEmbedder for LinearEmbedder {
    fn extract_features(
        &mut self,
        visuals: &[ImageTensor],
        spectrograms: &[Tensor],
    ) -> AlignResult<(FeatureBatch, FeatureBatch)> {
        let visual_inputs = Self::stack_visuals(visuals)?;
        let audio_inputs = Self::stack_spectrograms(spectrograms)?;
        let visual_embeddings = visual_inputs.matmul(&self.visual_weights)?;
        let audio_embeddings = audio_inputs.matmul(&self.audio_weights)?;
        self.cache = Some(ForwardCache {
            visual_inputs,
            audio_inputs,
            visual_embeddings: visual_embeddings.clone(),
            audio_embeddings: audio_embeddings.clone(),
        });
        Ok((
            FeatureBatch::Flat(visual_embeddings),
            FeatureBatch::Flat(audio_embeddings),
        ))
    }

    fn backward(&mut self, bundle: &LossBundle, device: &dyn TrainingDevice) -> AlignResult<()> {
        let paired = bundle
            .views
            .iter()
            .find(|view| view.name == "paired")
            .ok_or_else(|| AlignError::InvalidArgument("missing paired view".to_string()))?;
        let cache = self
            .cache
            .take()
            .ok_or_else(|| AlignError::InvalidArgument("backward before forward".to_string()))?;

        let logit_grad = Self::logit_gradient(&paired.logits)?;
        let inv_temperature = 1.0 / self.temperature;

        // dL/dV = (1/τ) G A, dL/dA = (1/τ) Gᵗ V, then through the linear maps.
        let mut visual_grad = logit_grad.matmul(&cache.audio_embeddings)?;
        for value in visual_grad.data_mut() {
            *value *= inv_temperature;
        }
        let mut audio_grad = logit_grad.transpose().matmul(&cache.visual_embeddings)?;
        for value in audio_grad.data_mut() {
            *value *= inv_temperature;
        }
        let visual_weight_grad = cache.visual_inputs.transpose().matmul(&visual_grad)?;
        let audio_weight_grad = cache.audio_inputs.transpose().matmul(&audio_grad)?;

        let mut flat: Vec<f32> = visual_weight_grad
            .data()
            .iter()
            .chain(audio_weight_grad.data().iter())
            .copied()
            .collect();
        device.synchronize_gradients(&mut flat)?;

        let split = visual_weight_grad.len();
        Self::apply_sgd(&mut self.visual_weights, &flat[..split], self.learning_rate);
        Self::apply_sgd(&mut self.audio_weights, &flat[split..], self.learning_rate);
        self.steps += 1;
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
            StoredTensor::from_tensor(&Tensor::from_vec(1, 1, vec![self.steps as f32])?),
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
        self.steps = fetch(&state.optimizer, "sgd.steps")?.data()[0] as usize;
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    av_config::tracing::init_tracing(0)?;
    register_training_descriptors();

    let run_dir = std::env::var("AVALIGN_RUN_DIR").unwrap_or_else(|_| "runs/train_demo".into());
    let config = RunConfig {
        epochs: 5,
        batch_size: 8,
        run_dir: run_dir.clone().into(),
        temperature: 0.07,
        block_size: None,
        eval: EvalMode::Retrieval,
        recall_k: 10,
        heatmap_side: 224,
        print_freq: 10,
        seed: Some(42),
        hard_positive_index: None,
        label_file: None,
        augment: false,
    };

    let train_source = SyntheticSource::new(128, IMAGE_SIDE, SPEC_BINS, SPEC_FRAMES, 8)?;
    let val_source = SyntheticSource::new(32, IMAGE_SIDE, SPEC_BINS, SPEC_FRAMES, 8)?;

    let mut model = LinearEmbedder::new(config.temperature, 0.05, 7)?;
    let device = CpuDevice::new();
    let exporter = TensorBoardExporter::new(format!("{run_dir}/tensorboard"));

    let report = Trainer::new(&mut model, &device, config)?
        .with_exporter(exporter)
        .run(&train_source, &val_source)?;

    println!(
        "trained epochs {}..{} — best metric {:.4}",
        report.start_epoch,
        report.start_epoch + report.epochs_run,
        report.best_metric
    );
    println!("checkpoints and TensorBoard events under {run_dir}");
    Ok(())
}
