//! Query router: a learned base classifier followed by a fixed override
//! policy. The policy always runs last and only ever forces
//! [`Route::NeedsRetrieval`].

use std::fs;
use std::path::Path;
use std::sync::Arc;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::classifier::{BaseClassifier, PersistentClassifier};
use crate::dataset::split_train_val;
use crate::error::{RagError, Result};
use crate::model::{LabeledExample, Route};

pub const METRICS_FILE: &str = "metrics.json";

/// Terms that signal live or time-sensitive information.
pub const OVERRIDE_KEYWORDS: &[&str] = &[
    "天气",
    "温度",
    "气温",
    "下雨",
    "最新情况",
    "最近",
    "目前",
    "weather",
    "temperature",
    "raining",
    "latest",
    "recently",
    "currently",
];

pub trait OverridePolicy: Send + Sync {
    fn apply(&self, text: &str, predicted: Route) -> Route;
}

/// Forces retrieval for any text containing one of its keywords
/// (ASCII case-insensitive substring match).
#[derive(Debug, Clone)]
pub struct KeywordOverride {
    matcher: AhoCorasick,
    keywords: Vec<String>,
}

impl KeywordOverride {
    /// The router's fixed policy over [`OVERRIDE_KEYWORDS`].
    pub fn fixed() -> Result<Self> {
        Self::new(OVERRIDE_KEYWORDS)
    }

    pub fn new<I, S>(keywords: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        let matcher = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build(&keywords)
            .map_err(|e| RagError::InvalidInput(format!("build override keywords: {e}")))?;

        Ok(Self { matcher, keywords })
    }

    /// First keyword found in `text`, if any.
    pub fn matched(&self, text: &str) -> Option<&str> {
        self.matcher
            .find(text)
            .map(|m| self.keywords[m.pattern().as_usize()].as_str())
    }
}

impl OverridePolicy for KeywordOverride {
    fn apply(&self, text: &str, predicted: Route) -> Route {
        match self.matched(text) {
            Some(keyword) => {
                if predicted != Route::NeedsRetrieval {
                    debug!(keyword, "override forced retrieval");
                }
                Route::NeedsRetrieval
            }
            None => predicted,
        }
    }
}

/// Passes the base prediction through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverride;

impl OverridePolicy for NoOverride {
    fn apply(&self, _text: &str, predicted: Route) -> Route {
        predicted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    pub validation_ratio: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            validation_ratio: 0.2,
            seed: 42,
        }
    }
}

/// Training diagnostics, persisted as `metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub train_size: usize,
    pub validation_size: usize,
    /// `None` when the validation partition is empty.
    pub validation_accuracy: Option<f32>,
    pub trained_at: DateTime<Utc>,
}

/// Share of `examples` the raw classifier labels correctly.
pub fn accuracy<C: BaseClassifier + ?Sized>(
    classifier: &C,
    examples: &[LabeledExample],
) -> Result<Option<f32>> {
    if examples.is_empty() {
        return Ok(None);
    }

    let mut correct = 0usize;
    for example in examples {
        if classifier.predict(&example.text)? == example.label {
            correct += 1;
        }
    }

    Ok(Some(correct as f32 / examples.len() as f32))
}

pub struct Router<C, P> {
    classifier: C,
    policy: P,
    report: Option<TrainReport>,
}

impl<C: BaseClassifier, P: OverridePolicy> Router<C, P> {
    pub fn new(classifier: C, policy: P) -> Self {
        Self {
            classifier,
            policy,
            report: None,
        }
    }

    /// Split the combined seed + augmented set, fit on the training side and
    /// score the validation side. Accuracy is reported, never gated on.
    pub fn train(&mut self, examples: Vec<LabeledExample>, split: SplitConfig) -> Result<TrainReport> {
        if examples.is_empty() {
            return Err(RagError::InvalidInput("no training examples".into()));
        }

        info!(examples = examples.len(), "training router");
        let (train, validation) = split_train_val(examples, split.validation_ratio, split.seed);

        if let Err(err) = self.classifier.fit(&train) {
            error!(error = %err, "router fit failed");
            return Err(err);
        }

        let report = TrainReport {
            train_size: train.len(),
            validation_size: validation.len(),
            validation_accuracy: accuracy(&self.classifier, &validation)?,
            trained_at: Utc::now(),
        };

        match report.validation_accuracy {
            Some(acc) => info!(
                train = report.train_size,
                validation = report.validation_size,
                accuracy = acc,
                "router trained"
            ),
            None => info!(train = report.train_size, "router trained without validation"),
        }

        self.report = Some(report.clone());
        Ok(report)
    }

    pub fn predict(&self, text: &str) -> Result<Route> {
        let raw = self.classifier.predict(text)?;
        let route = self.policy.apply(text, raw);
        debug!(%raw, %route, "routed query");
        Ok(route)
    }

    /// Base classifier output, before the override policy.
    pub fn predict_raw(&self, text: &str) -> Result<Route> {
        self.classifier.predict(text)
    }

    pub fn is_trained(&self) -> bool {
        self.classifier.is_trained()
    }

    pub fn report(&self) -> Option<&TrainReport> {
        self.report.as_ref()
    }
}

impl<C: PersistentClassifier, P: OverridePolicy> Router<C, P> {
    pub fn required_artifacts(&self) -> Vec<&'static str> {
        let mut names = self.classifier.artifacts().to_vec();
        names.push(METRICS_FILE);
        names
    }

    pub fn missing_artifacts(&self, dir: &Path) -> Vec<String> {
        self.required_artifacts()
            .into_iter()
            .filter(|name| !dir.join(name).is_file())
            .map(str::to_string)
            .collect()
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let report = self.report.as_ref().ok_or(RagError::ModelNotTrained)?;
        self.classifier.save(dir)?;
        fs::write(dir.join(METRICS_FILE), serde_json::to_string_pretty(report)?)?;

        info!(dir = %dir.display(), "router model saved");
        Ok(())
    }

    /// Load a persisted model. Never attempts a partial load: any missing
    /// artifact fails with [`RagError::PersistedModelIncomplete`].
    pub fn load(&mut self, dir: &Path) -> Result<()> {
        let missing = self.missing_artifacts(dir);
        if !missing.is_empty() {
            return Err(RagError::PersistedModelIncomplete { missing });
        }

        let report: TrainReport = serde_json::from_str(&fs::read_to_string(dir.join(METRICS_FILE))?)?;
        self.classifier.load(dir)?;
        self.report = Some(report);

        info!(dir = %dir.display(), "router model loaded");
        Ok(())
    }
}

/// Read-only routing, shared by query-time callers.
pub trait RoutePredictor: Send + Sync {
    fn route(&self, text: &str) -> Result<Route>;
}

impl<C: BaseClassifier, P: OverridePolicy> RoutePredictor for Router<C, P> {
    fn route(&self, text: &str) -> Result<Route> {
        self.predict(text)
    }
}

impl<T: RoutePredictor + ?Sized> RoutePredictor for &T {
    fn route(&self, text: &str) -> Result<Route> {
        (**self).route(text)
    }
}

impl<T: RoutePredictor + ?Sized> RoutePredictor for Arc<T> {
    fn route(&self, text: &str) -> Result<Route> {
        (**self).route(text)
    }
}
