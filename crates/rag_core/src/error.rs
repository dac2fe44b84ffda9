use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("system not ready: router model has not been trained or loaded")]
    ModelNotTrained,

    #[error("document has no non-empty paragraphs")]
    EmptyCorpus,

    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("system not ready: vector index has not been built")]
    IndexNotReady,

    #[error("persisted model is incomplete, missing: {}", missing.join(", "))]
    PersistedModelIncomplete { missing: Vec<String> },

    #[error("embedding space mismatch: built with '{expected}', queried with '{actual}'")]
    EmbeddingSpaceMismatch { expected: String, actual: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("document error: {0}")]
    Document(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

impl RagError {
    /// Query operations were called before initialization finished.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, RagError::ModelNotTrained | RagError::IndexNotReady)
    }

    pub(crate) fn embedding(err: impl std::fmt::Display) -> Self {
        RagError::EmbeddingFailure(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_is_distinct_from_other_failures() {
        assert!(RagError::ModelNotTrained.is_not_ready());
        assert!(RagError::IndexNotReady.is_not_ready());
        assert!(!RagError::EmptyCorpus.is_not_ready());
        assert!(!RagError::EmbeddingFailure("down".into()).is_not_ready());
    }

    #[test]
    fn incomplete_model_lists_missing_artifacts() {
        let err = RagError::PersistedModelIncomplete {
            missing: vec!["config.json".into(), "metrics.json".into()],
        };
        assert_eq!(
            err.to_string(),
            "persisted model is incomplete, missing: config.json, metrics.json"
        );
    }
}
