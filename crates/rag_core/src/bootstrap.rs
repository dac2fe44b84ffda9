//! Startup for the router's persisted model.
//!
//! `CheckPersisted -> {Load | Retrain} -> Ready`, with at most one retrain
//! per call: the training set is produced by an `FnOnce` that is consumed the
//! first time a retrain is needed.

use std::path::Path;

use tracing::{info, warn};

use crate::classifier::PersistentClassifier;
use crate::error::{RagError, Result};
use crate::model::LabeledExample;
use crate::router::{OverridePolicy, Router, SplitConfig, TrainReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootSource {
    Loaded,
    Retrained { reason: String },
}

#[derive(Debug, Clone)]
pub struct BootOutcome {
    pub source: BootSource,
    pub report: TrainReport,
}

enum State {
    CheckPersisted,
    Load,
    Retrain { reason: String },
    Ready(BootSource),
}

/// Bring `router` to a trained state from `dir`, retraining and overwriting
/// the directory when the persisted model is incomplete or unusable.
/// `force` skips straight to retraining.
pub fn bootstrap<C, P, F>(
    router: &mut Router<C, P>,
    dir: &Path,
    split: SplitConfig,
    force: bool,
    training_set: F,
) -> Result<BootOutcome>
where
    C: PersistentClassifier,
    P: OverridePolicy,
    F: FnOnce() -> Result<Vec<LabeledExample>>,
{
    let mut training_set = Some(training_set);
    let mut state = if force {
        State::Retrain {
            reason: "retrain requested".to_string(),
        }
    } else {
        State::CheckPersisted
    };

    loop {
        state = match state {
            State::CheckPersisted => {
                let missing = router.missing_artifacts(dir);
                if missing.is_empty() {
                    State::Load
                } else {
                    let err = RagError::PersistedModelIncomplete { missing };
                    warn!(dir = %dir.display(), error = %err, "falling back to retraining");
                    State::Retrain {
                        reason: err.to_string(),
                    }
                }
            }
            State::Load => match router.load(dir) {
                Ok(()) => State::Ready(BootSource::Loaded),
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "persisted model unusable, retraining");
                    State::Retrain {
                        reason: err.to_string(),
                    }
                }
            },
            State::Retrain { reason } => {
                let build = training_set.take().ok_or_else(|| {
                    RagError::InvalidInput("router retrain already attempted".into())
                })?;
                let examples = build()?;
                router.train(examples, split)?;
                router.save(dir)?;
                info!(dir = %dir.display(), %reason, "router retrained");
                State::Ready(BootSource::Retrained { reason })
            }
            State::Ready(source) => {
                let report = router.report().cloned().ok_or(RagError::ModelNotTrained)?;
                return Ok(BootOutcome { source, report });
            }
        };
    }
}
