pub mod augment;
pub mod bootstrap;
pub mod classifier;
pub mod config;
pub mod corpus;
pub mod dataset;
pub mod embed;
pub mod error;
pub mod history;
pub mod index;
pub mod model;
pub mod pipeline;
pub mod retrieval;
pub mod router;
pub mod tokenize;

pub use augment::{AugmentationStrategy, Augmenter, DEFAULT_SYNONYMS};
pub use bootstrap::{bootstrap, BootOutcome, BootSource};
pub use classifier::{BaseClassifier, LinearProbe, PersistentClassifier, TrainParams};
pub use config::RagConfig;
pub use corpus::{
    source_for_path, split_into_sentences, DocumentCorpus, DocumentSource, DocxSource,
    TextFileSource,
};
pub use dataset::{
    augment_examples, load_seeds_csv, parse_seeds_csv, seeded_training_set, split_train_val,
};
pub use embed::{EmbeddingProvider, HashEmbeddingProvider, DEFAULT_EMBEDDING_DIM};
pub use error::{RagError, Result};
pub use history::{ChatLog, ChatTurn, Role};
pub use index::{Neighbor, VectorIndex};
pub use model::{
    Answer, Decision, LabeledExample, RetrievalResult, Route, ScoredSentence, Sentence,
    NOT_FOUND_MESSAGE,
};
pub use pipeline::QueryPipeline;
pub use retrieval::{decide, PassageRetriever, Retriever, DEFAULT_THRESHOLD, DEFAULT_TOP_K};
pub use router::{
    KeywordOverride, NoOverride, OverridePolicy, RoutePredictor, Router, SplitConfig, TrainReport,
    OVERRIDE_KEYWORDS,
};
