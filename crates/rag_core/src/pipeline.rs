//! Route first, retrieve only when the route asks for it.

use tracing::warn;

use crate::error::{RagError, Result};
use crate::model::{Answer, Route};
use crate::retrieval::PassageRetriever;
use crate::router::RoutePredictor;

pub struct QueryPipeline<R, S> {
    router: R,
    retriever: S,
}

impl<R: RoutePredictor, S: PassageRetriever> QueryPipeline<R, S> {
    pub fn new(router: R, retriever: S) -> Self {
        Self { router, retriever }
    }

    /// A direct-answer route never touches the retriever. A query embedding
    /// failure during retrieval is answered as not found; not-ready errors
    /// propagate.
    pub fn answer(&self, query: &str) -> Result<Answer> {
        let route = self.router.route(query)?;
        if route == Route::DirectAnswer {
            return Ok(Answer::direct());
        }

        match self.retriever.retrieve(query) {
            Ok(result) => Ok(Answer::retrieved(result)),
            Err(RagError::EmbeddingFailure(reason)) => {
                warn!(%reason, "query embedding failed, answering not found");
                Ok(Answer::degraded())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::classifier::BaseClassifier;
    use crate::index::VectorIndex;
    use crate::model::{Decision, LabeledExample, RetrievalResult, Sentence, NOT_FOUND_MESSAGE};
    use crate::retrieval::tests::TableEmbedder;
    use crate::retrieval::Retriever;
    use crate::router::{KeywordOverride, Router, SplitConfig};

    struct Always(Route);

    impl RoutePredictor for Always {
        fn route(&self, _text: &str) -> Result<Route> {
            Ok(self.0)
        }
    }

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl PassageRetriever for Counting {
        fn retrieve(&self, _query: &str) -> Result<RetrievalResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RetrievalResult {
                matched: None,
                score: 0.0,
                decision: Decision::Miss,
                candidates: Vec::new(),
            })
        }
    }

    struct AlwaysDirect;

    impl BaseClassifier for AlwaysDirect {
        fn fit(&mut self, _examples: &[LabeledExample]) -> Result<()> {
            Ok(())
        }

        fn predict(&self, _text: &str) -> Result<Route> {
            Ok(Route::DirectAnswer)
        }

        fn is_trained(&self) -> bool {
            true
        }
    }

    fn sentence(position: usize, text: &str) -> Sentence {
        Sentence {
            position,
            paragraph: 0,
            text: text.to_string(),
        }
    }

    fn scenario_retriever() -> Retriever<TableEmbedder> {
        let embedder = TableEmbedder::new(
            "table",
            &[
                ("related", vec![0.9, 0.435_889_9, 0.0]),
                ("unrelated", vec![0.1, 0.0, 0.994_987_4]),
            ],
        );
        let index = VectorIndex::from_parts(
            "table",
            vec![sentence(0, "北京是首都。"), sentence(1, "上海是港口。")],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
        )
        .unwrap();

        let retriever = Retriever::new(embedder);
        retriever.publish(index).unwrap();
        retriever
    }

    #[test]
    fn direct_answers_skip_retrieval() {
        let retriever = Counting::default();
        let pipeline = QueryPipeline::new(Always(Route::DirectAnswer), &retriever);

        for query in ["what is rust", "explain traits", ""] {
            let answer = pipeline.answer(query).unwrap();
            assert_eq!(answer, Answer::direct());
        }
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn retrieval_routes_call_the_retriever_once() {
        let retriever = Counting::default();
        let pipeline = QueryPipeline::new(Always(Route::NeedsRetrieval), &retriever);

        let answer = pipeline.answer("weather").unwrap();
        assert!(answer.is_not_found());
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn keyword_override_reaches_retrieval() {
        let mut router = Router::new(AlwaysDirect, KeywordOverride::fixed().unwrap());
        router
            .train(vec![LabeledExample::seed("x", Route::DirectAnswer)], SplitConfig::default())
            .unwrap();
        let retriever = Counting::default();
        let pipeline = QueryPipeline::new(&router, &retriever);

        assert_eq!(pipeline.answer("明天天气如何").unwrap().route, Route::NeedsRetrieval);
        assert_eq!(pipeline.answer("什么是闭包").unwrap().route, Route::DirectAnswer);
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn high_scores_answer_and_low_scores_are_not_found() {
        let pipeline = QueryPipeline::new(Always(Route::NeedsRetrieval), scenario_retriever());

        let hit = pipeline.answer("related").unwrap();
        assert_eq!(hit.passage.as_ref().map(|s| s.text.as_str()), Some("北京是首都。"));
        assert!((hit.score.unwrap() - 0.9).abs() < 1e-3);

        let miss = pipeline.answer("unrelated").unwrap();
        assert!(miss.is_not_found());
        assert_eq!(miss.display_text(), Some(NOT_FOUND_MESSAGE));
        assert!((miss.score.unwrap() - 0.1).abs() < 1e-3);
    }

    #[test]
    fn query_embedding_failure_degrades_to_not_found() {
        let pipeline = QueryPipeline::new(Always(Route::NeedsRetrieval), scenario_retriever());
        let answer = pipeline.answer("no vector for this").unwrap();
        assert_eq!(answer, Answer::degraded());
    }

    #[test]
    fn missing_index_is_not_ready_rather_than_not_found() {
        let retriever = Retriever::new(TableEmbedder::new("table", &[]));
        let pipeline = QueryPipeline::new(Always(Route::NeedsRetrieval), retriever);

        let err = pipeline.answer("anything").unwrap_err();
        assert!(err.is_not_ready());
    }

    #[test]
    fn repeated_queries_give_identical_answers() {
        let pipeline = QueryPipeline::new(Always(Route::NeedsRetrieval), scenario_retriever());
        let first = pipeline.answer("related").unwrap();
        for _ in 0..5 {
            assert_eq!(pipeline.answer("related").unwrap(), first);
        }
    }
}
