use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::augment::{Augmenter, DEFAULT_DELETION_PROBABILITY, DEFAULT_EDITS_PER_VARIANT};
use crate::classifier::TrainParams;
use crate::embed::DEFAULT_EMBEDDING_DIM;
use crate::error::{RagError, Result};
use crate::retrieval::{DEFAULT_THRESHOLD, DEFAULT_TOP_K};
use crate::router::SplitConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub threshold: f32,
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dim: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dim: DEFAULT_EMBEDDING_DIM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Variants requested per seed.
    pub times: usize,
    /// Edits per variant for substitution, insertion and swap.
    pub n: usize,
    pub deletion_p: f64,
    pub seed: u64,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            times: 3,
            n: DEFAULT_EDITS_PER_VARIANT,
            deletion_p: DEFAULT_DELETION_PROBABILITY,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub validation_ratio: f64,
    pub split_seed: u64,
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        let split = SplitConfig::default();
        let params = TrainParams::default();
        Self {
            validation_ratio: split.validation_ratio,
            split_seed: split.seed,
            epochs: params.epochs,
            learning_rate: params.learning_rate,
            batch_size: params.batch_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub model_dir: PathBuf,
    pub index: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/router"),
            index: PathBuf::from("index.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub augment: AugmentConfig,
    pub train: TrainConfig,
    pub paths: PathsConfig,
}

impl RagConfig {
    /// Read a TOML file. No path, or a path that does not exist, gives the
    /// defaults; a file that exists must parse and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let config: Self = match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(err) => return Err(err.into()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(RagError::InvalidInput(msg)) };

        if !(-1.0..=1.0).contains(&self.retrieval.threshold) {
            return invalid(format!(
                "retrieval.threshold must be in [-1, 1], got {}",
                self.retrieval.threshold
            ));
        }
        if self.retrieval.top_k == 0 {
            return invalid("retrieval.top_k must be at least 1".into());
        }
        if self.embedding.dim == 0 {
            return invalid("embedding.dim must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.augment.deletion_p) {
            return invalid(format!(
                "augment.deletion_p must be in [0, 1], got {}",
                self.augment.deletion_p
            ));
        }
        if !(0.0..1.0).contains(&self.train.validation_ratio) {
            return invalid(format!(
                "train.validation_ratio must be in [0, 1), got {}",
                self.train.validation_ratio
            ));
        }
        if self.train.batch_size == 0 {
            return invalid("train.batch_size must be at least 1".into());
        }
        if self.train.learning_rate <= 0.0 {
            return invalid("train.learning_rate must be positive".into());
        }

        Ok(())
    }

    pub fn split(&self) -> SplitConfig {
        SplitConfig {
            validation_ratio: self.train.validation_ratio,
            seed: self.train.split_seed,
        }
    }

    pub fn train_params(&self) -> TrainParams {
        TrainParams {
            epochs: self.train.epochs,
            learning_rate: self.train.learning_rate,
            batch_size: self.train.batch_size,
            seed: self.train.split_seed,
        }
    }

    /// The default-table augmenter with this config's edit parameters.
    pub fn augmenter(&self) -> Result<Augmenter> {
        Ok(Augmenter::with_default_table()?.with_params(self.augment.n, self.augment.deletion_p))
    }
}
