use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed message the transport shows when retrieval finds nothing usable.
pub const NOT_FOUND_MESSAGE: &str = "No relevant answer found.";

/// Whether a query can be answered directly or needs corpus retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    DirectAnswer,
    NeedsRetrieval,
}

impl Route {
    /// Label space of every router model, in class-index order.
    pub const ALL: [Route; 2] = [Route::DirectAnswer, Route::NeedsRetrieval];

    pub fn index(self) -> u32 {
        match self {
            Route::DirectAnswer => 0,
            Route::NeedsRetrieval => 1,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Route::DirectAnswer => "direct_answer",
            Route::NeedsRetrieval => "needs_retrieval",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub text: String,
    pub label: Route,
    /// `false` for hand-authored seeds.
    pub augmented: bool,
}

impl LabeledExample {
    pub fn seed(text: impl Into<String>, label: Route) -> Self {
        Self {
            text: text.into(),
            label,
            augmented: false,
        }
    }

    /// A variant derived from `parent`. Always inherits the parent's label.
    pub fn derived(parent: &LabeledExample, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: parent.label,
            augmented: true,
        }
    }
}

/// The atomic retrievable span of a corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    /// Position in corpus order, also the row in the vector index.
    pub position: usize,
    /// Index of the non-empty paragraph the sentence came from.
    pub paragraph: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Hit,
    Miss,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSentence {
    pub sentence: Sentence,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Set only when the best score clears the similarity threshold.
    pub matched: Option<Sentence>,
    /// Best candidate's score, kept on a miss for diagnostics.
    pub score: f32,
    pub decision: Decision,
    /// Top-k candidates in rank order.
    pub candidates: Vec<ScoredSentence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub route: Route,
    pub passage: Option<Sentence>,
    pub score: Option<f32>,
}

impl Answer {
    pub fn direct() -> Self {
        Self {
            route: Route::DirectAnswer,
            passage: None,
            score: None,
        }
    }

    pub fn retrieved(result: RetrievalResult) -> Self {
        Self {
            route: Route::NeedsRetrieval,
            passage: result.matched,
            score: Some(result.score),
        }
    }

    /// Retrieval was attempted but produced no scored candidate.
    pub fn degraded() -> Self {
        Self {
            route: Route::NeedsRetrieval,
            passage: None,
            score: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.route == Route::NeedsRetrieval && self.passage.is_none()
    }

    /// Text the transport shows for this answer.
    pub fn display_text(&self) -> Option<&str> {
        match (&self.route, &self.passage) {
            (Route::DirectAnswer, _) => None,
            (Route::NeedsRetrieval, Some(sentence)) => Some(&sentence.text),
            (Route::NeedsRetrieval, None) => Some(NOT_FOUND_MESSAGE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_index_round_trips_the_two_labels() {
        for route in Route::ALL {
            assert_eq!(Route::from_index(route.index()), Some(route));
        }
        assert_eq!(Route::from_index(2), None);
    }

    #[test]
    fn derived_examples_keep_the_parent_label() {
        let seed = LabeledExample::seed("北京明天天气怎么样？", Route::NeedsRetrieval);
        let variant = LabeledExample::derived(&seed, "北京明天气候怎么样？");
        assert_eq!(variant.label, seed.label);
        assert!(variant.augmented);
        assert!(!seed.augmented);
    }

    #[test]
    fn direct_answers_are_not_reported_as_not_found() {
        assert!(!Answer::direct().is_not_found());
        assert_eq!(Answer::direct().display_text(), None);
        assert!(Answer::degraded().is_not_found());
        assert_eq!(Answer::degraded().display_text(), Some(NOT_FOUND_MESSAGE));
    }
}
