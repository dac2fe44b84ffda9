use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::corpus::DocumentCorpus;
use crate::embed::{embed_normalized, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::model::{Decision, RetrievalResult, ScoredSentence};

pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const DEFAULT_TOP_K: usize = 1;

/// Gate the best of the top `k` neighbours on `threshold`. A match needs a
/// score strictly above it.
pub fn decide(
    query_embedding: &[f32],
    index: &VectorIndex,
    threshold: f32,
    k: usize,
) -> Result<RetrievalResult> {
    let candidates: Vec<ScoredSentence> = index
        .search(query_embedding, k.max(1))?
        .into_iter()
        .filter_map(|n| {
            index.sentence(n.position).map(|s| ScoredSentence {
                sentence: s.clone(),
                score: n.score,
            })
        })
        .collect();

    let result = match candidates.first() {
        Some(best) if best.score > threshold => RetrievalResult {
            matched: Some(best.sentence.clone()),
            score: best.score,
            decision: Decision::Hit,
            candidates,
        },
        Some(best) => RetrievalResult {
            matched: None,
            score: best.score,
            decision: Decision::Miss,
            candidates,
        },
        None => RetrievalResult {
            matched: None,
            score: 0.0,
            decision: Decision::Miss,
            candidates,
        },
    };

    Ok(result)
}

/// Query-time retrieval as seen by the pipeline.
pub trait PassageRetriever: Send + Sync {
    fn retrieve(&self, query: &str) -> Result<RetrievalResult>;
}

impl<T: PassageRetriever + ?Sized> PassageRetriever for &T {
    fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        (**self).retrieve(query)
    }
}

impl<T: PassageRetriever + ?Sized> PassageRetriever for Arc<T> {
    fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        (**self).retrieve(query)
    }
}

/// Retrieval engine over a published [`VectorIndex`].
///
/// Indexes are built off to the side and swapped in whole by
/// [`Retriever::publish`]; queries hold an `Arc` to whichever index was
/// current when they started.
pub struct Retriever<E> {
    embedder: E,
    threshold: f32,
    top_k: usize,
    index: RwLock<Option<Arc<VectorIndex>>>,
}

impl<E: EmbeddingProvider> Retriever<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            threshold: DEFAULT_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            index: RwLock::new(None),
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Swap in a fully built index. Refuses an index built by a different
    /// embedding model, since its scores would be meaningless.
    pub fn publish(&self, index: VectorIndex) -> Result<()> {
        let active = self.embedder.model_id();
        if index.model_id() != active {
            return Err(RagError::EmbeddingSpaceMismatch {
                expected: index.model_id().to_string(),
                actual: active,
            });
        }

        let sentences = index.len();
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(index));
        info!(sentences, "vector index published");
        Ok(())
    }

    /// Build from `corpus` and publish. On failure the current index, if
    /// any, stays in place.
    pub fn rebuild(&self, corpus: &DocumentCorpus) -> Result<usize> {
        let index = VectorIndex::build(corpus, &self.embedder)?;
        let sentences = index.len();
        self.publish(index)?;
        Ok(sentences)
    }

    pub fn index(&self) -> Option<Arc<VectorIndex>> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn search(&self, query: &str, top_k: usize) -> Result<RetrievalResult> {
        let index = self.index().ok_or(RagError::IndexNotReady)?;
        let query_embedding = embed_normalized(&self.embedder, query)?;
        let result = decide(&query_embedding, &index, self.threshold, top_k)?;

        debug!(
            score = result.score,
            decision = ?result.decision,
            position = result.matched.as_ref().map(|s| s.position),
            "retrieval"
        );
        Ok(result)
    }
}

impl<E: EmbeddingProvider> PassageRetriever for Retriever<E> {
    fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        self.search(query, self.top_k)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use anyhow::anyhow;

    use super::*;
    use crate::model::Sentence;

    /// Embedder backed by a fixed text -> vector table; unknown text fails.
    pub(crate) struct TableEmbedder {
        pub(crate) id: String,
        pub(crate) vectors: HashMap<String, Vec<f32>>,
    }

    impl TableEmbedder {
        pub(crate) fn new(id: &str, entries: &[(&str, Vec<f32>)]) -> Self {
            Self {
                id: id.to_string(),
                vectors: entries
                    .iter()
                    .map(|(text, v)| (text.to_string(), v.clone()))
                    .collect(),
            }
        }
    }

    impl EmbeddingProvider for TableEmbedder {
        fn model_id(&self) -> String {
            self.id.clone()
        }

        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.vectors
                .get(text)
                .cloned()
                .ok_or_else(|| anyhow!("no vector for '{text}'"))
        }
    }

    fn one_sentence_index(id: &str) -> VectorIndex {
        let sentence = Sentence {
            position: 0,
            paragraph: 0,
            text: "known".to_string(),
        };
        VectorIndex::from_parts(id, vec![sentence], vec![vec![1.0, 0.0, 0.0, 0.0]]).unwrap()
    }

    fn boundary_embedder() -> TableEmbedder {
        TableEmbedder::new(
            "table",
            &[
                ("at threshold", vec![0.5, 0.5, 0.5, 0.5]),
                ("above threshold", vec![0.6, 0.8, 0.0, 0.0]),
            ],
        )
    }

    #[test]
    fn search_before_publish_is_not_ready() {
        let retriever = Retriever::new(boundary_embedder());
        let err = retriever.search("at threshold", 1).unwrap_err();
        assert!(matches!(err, RagError::IndexNotReady));
    }

    #[test]
    fn score_exactly_at_threshold_is_a_miss() {
        let retriever = Retriever::new(boundary_embedder());
        retriever.publish(one_sentence_index("table")).unwrap();

        let result = retriever.search("at threshold", 1).unwrap();
        assert_eq!(result.score, 0.5);
        assert_eq!(result.decision, Decision::Miss);
        assert!(result.matched.is_none());

        let result = retriever.search("above threshold", 1).unwrap();
        assert_eq!(result.decision, Decision::Hit);
        assert_eq!(result.matched.map(|s| s.text).as_deref(), Some("known"));
    }

    #[test]
    fn score_just_above_threshold_is_a_hit() {
        let retriever = Retriever::new(boundary_embedder()).with_threshold(0.5 - 1e-4);
        retriever.publish(one_sentence_index("table")).unwrap();

        let result = retriever.search("at threshold", 1).unwrap();
        assert_eq!(result.decision, Decision::Hit);
    }

    #[test]
    fn equal_scores_return_the_first_sentence() {
        let sentences: Vec<Sentence> = (0..3)
            .map(|position| Sentence {
                position,
                paragraph: 0,
                text: format!("s{position}"),
            })
            .collect();
        let index = VectorIndex::from_parts(
            "table",
            sentences,
            vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]],
        )
        .unwrap();

        let embedder = TableEmbedder::new("table", &[("q", vec![1.0, 0.0])]);
        let retriever = Retriever::new(embedder).with_top_k(3);
        retriever.publish(index).unwrap();

        for _ in 0..5 {
            let result = retriever.retrieve("q").unwrap();
            assert_eq!(result.matched.as_ref().map(|s| s.position), Some(1));
            assert_eq!(result.candidates.len(), 3);
            assert_eq!(result.candidates[1].sentence.position, 2);
        }
    }

    #[test]
    fn query_embedding_failure_is_reported() {
        let retriever = Retriever::new(boundary_embedder());
        retriever.publish(one_sentence_index("table")).unwrap();

        let err = retriever.search("unknown query", 1).unwrap_err();
        assert!(matches!(err, RagError::EmbeddingFailure(_)));
    }

    #[test]
    fn publish_rejects_a_foreign_index() {
        let retriever = Retriever::new(boundary_embedder());
        let err = retriever.publish(one_sentence_index("other-model")).unwrap_err();
        assert!(matches!(err, RagError::EmbeddingSpaceMismatch { .. }));
        assert!(retriever.index().is_none());
    }

    #[test]
    fn failed_rebuild_keeps_the_published_index() {
        let retriever = Retriever::new(boundary_embedder());
        retriever.publish(one_sentence_index("table")).unwrap();

        let corpus = DocumentCorpus::from_paragraphs(["没有向量的句子。"]).unwrap();
        assert!(retriever.rebuild(&corpus).is_err());
        assert_eq!(retriever.index().map(|i| i.len()), Some(1));
    }
}
