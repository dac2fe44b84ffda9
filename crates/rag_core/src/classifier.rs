//! Learned routing classifier: a linear softmax head over sentence
//! embeddings, trained with AdamW and persisted as safetensors.

use std::fs;
use std::path::Path;

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::init::Init;
use candle_nn::{AdamW, Linear, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::embed::{embed_all, embed_normalized, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::model::{LabeledExample, Route};

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Classification model provider.
pub trait BaseClassifier: Send + Sync {
    fn fit(&mut self, examples: &[LabeledExample]) -> Result<()>;

    /// Fails with [`RagError::ModelNotTrained`] before `fit` or `load`.
    fn predict(&self, text: &str) -> Result<Route>;

    fn is_trained(&self) -> bool;
}

/// A classifier whose fitted state lives in a directory of artifacts.
pub trait PersistentClassifier: BaseClassifier {
    /// Artifact names this classifier writes into its directory.
    fn artifacts(&self) -> &'static [&'static str];

    fn save(&self, dir: &Path) -> Result<()>;

    fn load(&mut self, dir: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainParams {
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    /// Seeds the per-epoch batch shuffle.
    pub seed: u64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            epochs: 200,
            learning_rate: 0.1,
            batch_size: 16,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeadConfig {
    embedding_model: String,
    dim: usize,
    labels: Vec<Route>,
    params: TrainParams,
    trained_at: DateTime<Utc>,
}

struct Head {
    varmap: VarMap,
    linear: Linear,
    config: HeadConfig,
}

pub struct LinearProbe<E> {
    embedder: E,
    params: TrainParams,
    device: Device,
    head: Option<Head>,
}

impl<E: EmbeddingProvider> LinearProbe<E> {
    pub fn new(embedder: E, params: TrainParams) -> Self {
        Self {
            embedder,
            params,
            device: Device::Cpu,
            head: None,
        }
    }
}

// Zero-initialised so training is a pure function of data, params and seed.
fn build_head(varmap: &VarMap, dim: usize, device: &Device) -> Result<Linear> {
    let vb = VarBuilder::from_varmap(varmap, DType::F32, device).pp("head");
    let classes = Route::ALL.len();
    let weight = vb.get_with_hints((classes, dim), "weight", Init::Const(0.0))?;
    let bias = vb.get_with_hints(classes, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

impl<E: EmbeddingProvider> BaseClassifier for LinearProbe<E> {
    fn fit(&mut self, examples: &[LabeledExample]) -> Result<()> {
        let texts: Vec<String> = examples.iter().map(|e| e.text.clone()).collect();
        let features = embed_all(&self.embedder, &texts)?;
        let Some(dim) = features.first().map(Vec::len) else {
            return Err(RagError::InvalidInput("no training examples".into()));
        };
        let n = examples.len();
        let labels: Vec<u32> = examples.iter().map(|e| e.label.index()).collect();

        let xs = Tensor::from_vec(features.concat(), (n, dim), &self.device)?;
        let ys = Tensor::from_vec(labels, n, &self.device)?;

        let varmap = VarMap::new();
        let linear = build_head(&varmap, dim, &self.device)?;
        let mut optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: self.params.learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        let mut order: Vec<u32> = (0..n as u32).collect();
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let batch_size = self.params.batch_size.max(1);

        for epoch in 1..=self.params.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0f32;
            let mut batches = 0usize;

            for batch in order.chunks(batch_size) {
                let idx = Tensor::new(batch, &self.device)?;
                let logits = linear.forward(&xs.index_select(&idx, 0)?)?;
                let loss = candle_nn::loss::cross_entropy(&logits, &ys.index_select(&idx, 0)?)?;
                optimizer.backward_step(&loss)?;
                epoch_loss += loss.to_scalar::<f32>()?;
                batches += 1;
            }

            if epoch % 50 == 0 || epoch == self.params.epochs {
                tracing::debug!(
                    epoch,
                    loss = epoch_loss / batches.max(1) as f32,
                    "router head training"
                );
            }
        }

        self.head = Some(Head {
            varmap,
            linear,
            config: HeadConfig {
                embedding_model: self.embedder.model_id(),
                dim,
                labels: Route::ALL.to_vec(),
                params: self.params,
                trained_at: Utc::now(),
            },
        });
        Ok(())
    }

    fn predict(&self, text: &str) -> Result<Route> {
        let head = self.head.as_ref().ok_or(RagError::ModelNotTrained)?;
        let features = embed_normalized(&self.embedder, text)?;
        if features.len() != head.config.dim {
            return Err(RagError::EmbeddingFailure(format!(
                "expected {}-dimensional embedding, got {}",
                head.config.dim,
                features.len()
            )));
        }

        let x = Tensor::from_vec(features, (1, head.config.dim), &self.device)?;
        let class = head
            .linear
            .forward(&x)?
            .argmax(D::Minus1)?
            .to_vec1::<u32>()?;

        class
            .first()
            .copied()
            .and_then(Route::from_index)
            .ok_or_else(|| RagError::InvalidInput("classifier produced no label".into()))
    }

    fn is_trained(&self) -> bool {
        self.head.is_some()
    }
}

impl<E: EmbeddingProvider> PersistentClassifier for LinearProbe<E> {
    fn artifacts(&self) -> &'static [&'static str] {
        &[CONFIG_FILE, WEIGHTS_FILE]
    }

    fn save(&self, dir: &Path) -> Result<()> {
        let head = self.head.as_ref().ok_or(RagError::ModelNotTrained)?;
        fs::create_dir_all(dir)?;

        head.varmap.save(dir.join(WEIGHTS_FILE))?;
        fs::write(
            dir.join(CONFIG_FILE),
            serde_json::to_string_pretty(&head.config)?,
        )?;

        tracing::debug!(dir = %dir.display(), "saved router head");
        Ok(())
    }

    fn load(&mut self, dir: &Path) -> Result<()> {
        let raw = fs::read_to_string(dir.join(CONFIG_FILE))?;
        let config: HeadConfig = serde_json::from_str(&raw)?;

        let active = self.embedder.model_id();
        if config.embedding_model != active {
            return Err(RagError::EmbeddingSpaceMismatch {
                expected: config.embedding_model,
                actual: active,
            });
        }
        if config.labels != Route::ALL {
            return Err(RagError::InvalidInput(format!(
                "persisted label space {:?} is not the router's",
                config.labels
            )));
        }

        let mut varmap = VarMap::new();
        let linear = build_head(&varmap, config.dim, &self.device)?;
        varmap.load(dir.join(WEIGHTS_FILE))?;

        self.head = Some(Head {
            varmap,
            linear,
            config,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbeddingProvider;

    fn examples() -> Vec<LabeledExample> {
        let retrieval = [
            "weather forecast for tomorrow",
            "is it raining in the city now",
            "current weather and temperature",
            "latest exchange rate today",
            "weather warning this weekend",
        ];
        let direct = [
            "explain how recursion works",
            "what is a binary tree",
            "explain the borrow checker",
            "what is a closure",
            "explain dynamic programming",
        ];
        retrieval
            .iter()
            .map(|t| LabeledExample::seed(*t, Route::NeedsRetrieval))
            .chain(direct.iter().map(|t| LabeledExample::seed(*t, Route::DirectAnswer)))
            .collect()
    }

    fn probe(dim: usize) -> LinearProbe<HashEmbeddingProvider> {
        let params = TrainParams {
            epochs: 100,
            ..TrainParams::default()
        };
        LinearProbe::new(HashEmbeddingProvider::new(dim), params)
    }

    #[test]
    fn predict_before_training_fails() {
        let probe = probe(64);
        assert!(!probe.is_trained());
        assert!(matches!(probe.predict("anything"), Err(RagError::ModelNotTrained)));
    }

    #[test]
    fn fits_a_separable_training_set() {
        let mut probe = probe(256);
        let data = examples();
        probe.fit(&data).unwrap();

        for example in &data {
            assert_eq!(probe.predict(&example.text).unwrap(), example.label, "{}", example.text);
        }
    }

    #[test]
    fn training_is_deterministic() {
        let data = examples();
        let mut a = probe(128);
        let mut b = probe(128);
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();

        for text in ["weather tomorrow", "explain closures", "something unrelated"] {
            assert_eq!(a.predict(text).unwrap(), b.predict(text).unwrap());
        }
    }

    #[test]
    fn save_and_load_restore_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let data = examples();
        let mut trained = probe(128);
        trained.fit(&data).unwrap();
        trained.save(dir.path()).unwrap();

        for name in trained.artifacts() {
            assert!(dir.path().join(name).exists(), "{name} missing");
        }

        let mut restored = probe(128);
        restored.load(dir.path()).unwrap();
        for example in &data {
            assert_eq!(
                restored.predict(&example.text).unwrap(),
                trained.predict(&example.text).unwrap()
            );
        }
    }

    #[test]
    fn load_rejects_a_different_embedding_space() {
        let dir = tempfile::tempdir().unwrap();
        let mut trained = probe(128);
        trained.fit(&examples()).unwrap();
        trained.save(dir.path()).unwrap();

        let mut other = probe(64);
        let err = other.load(dir.path()).unwrap_err();
        assert!(matches!(err, RagError::EmbeddingSpaceMismatch { .. }));
        assert!(!other.is_trained());
    }
}
