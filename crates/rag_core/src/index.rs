//! Exact inner-product index over unit-normalized sentence embeddings.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::corpus::DocumentCorpus;
use crate::embed::{embed_all, normalize, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::model::Sentence;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexHeader {
    model_id: String,
    dim: usize,
    count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexRow {
    position: usize,
    paragraph: usize,
    text: String,
    embedding: Vec<f32>,
}

/// Row `i` of the index is the sentence at corpus position `i`.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model_id: String,
    dim: usize,
    vectors: Vec<f32>,
    sentences: Vec<Sentence>,
}

impl VectorIndex {
    /// Embed every sentence of `corpus`. Any provider failure aborts the
    /// whole build.
    pub fn build<E>(corpus: &DocumentCorpus, embedder: &E) -> Result<Self>
    where
        E: EmbeddingProvider + ?Sized,
    {
        let texts: Vec<String> = corpus.sentences().iter().map(|s| s.text.clone()).collect();
        let vectors = embed_all(embedder, &texts)?;
        let index = Self::from_parts(embedder.model_id(), corpus.sentences().to_vec(), vectors)?;

        tracing::info!(
            sentences = index.len(),
            dim = index.dim,
            model = %index.model_id,
            "vector index built"
        );
        Ok(index)
    }

    /// Assemble an index from precomputed vectors, normalizing each one.
    pub fn from_parts(
        model_id: impl Into<String>,
        sentences: Vec<Sentence>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if sentences.is_empty() {
            return Err(RagError::EmptyCorpus);
        }
        if sentences.len() != vectors.len() {
            return Err(RagError::InvalidInput(format!(
                "{} sentences but {} vectors",
                sentences.len(),
                vectors.len()
            )));
        }
        if let Some((row, bad)) = sentences.iter().enumerate().find(|(i, s)| s.position != *i) {
            return Err(RagError::InvalidInput(format!(
                "sentence at row {row} has position {}",
                bad.position
            )));
        }

        let dim = vectors[0].len();
        if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
            return Err(RagError::InvalidInput("index vectors must share a non-zero dimension".into()));
        }

        let mut flat = Vec::with_capacity(dim * vectors.len());
        for mut v in vectors {
            normalize(&mut v);
            flat.extend_from_slice(&v);
        }

        Ok(Self {
            model_id: model_id.into(),
            dim,
            vectors: flat,
            sentences,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    pub fn sentence(&self, position: usize) -> Option<&Sentence> {
        self.sentences.get(position)
    }

    /// Top `k` rows by inner product with `query`, best first. Equal scores
    /// keep corpus order, so the earliest position wins a tie.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dim {
            return Err(RagError::EmbeddingFailure(format!(
                "query has dimension {}, index has {}",
                query.len(),
                self.dim
            )));
        }

        let mut scored: Vec<Neighbor> = self
            .vectors
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(position, row)| Neighbor {
                position,
                score: dot(row, query),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.position.cmp(&b.position))
        });
        scored.truncate(k);
        Ok(scored)
    }

    pub fn save_jsonl(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = IndexHeader {
            model_id: self.model_id.clone(),
            dim: self.dim,
            count: self.len(),
        };
        serde_json::to_writer(&mut writer, &header)?;
        writer.write_all(b"\n")?;

        for (sentence, embedding) in self.sentences.iter().zip(self.vectors.chunks_exact(self.dim)) {
            let row = IndexRow {
                position: sentence.position,
                paragraph: sentence.paragraph,
                text: sentence.text.clone(),
                embedding: embedding.to_vec(),
            };
            serde_json::to_writer(&mut writer, &row)?;
            writer.write_all(b"\n")?;
        }

        writer.flush()?;
        tracing::debug!(path = %path.display(), rows = self.len(), "index saved");
        Ok(())
    }

    pub fn load_jsonl(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();

        let header: IndexHeader = loop {
            match lines.next() {
                Some(line) => {
                    let line = line?;
                    if !line.trim().is_empty() {
                        break serde_json::from_str(&line)?;
                    }
                }
                None => return Err(RagError::InvalidInput(format!("{}: empty index file", path.display()))),
            }
        };

        let mut sentences = Vec::with_capacity(header.count);
        let mut vectors = Vec::with_capacity(header.count);
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row: IndexRow = serde_json::from_str(&line)?;
            sentences.push(Sentence {
                position: row.position,
                paragraph: row.paragraph,
                text: row.text,
            });
            vectors.push(row.embedding);
        }

        if sentences.len() != header.count {
            return Err(RagError::InvalidInput(format!(
                "{}: header says {} sentences, found {}",
                path.display(),
                header.count,
                sentences.len()
            )));
        }

        let index = Self::from_parts(header.model_id, sentences, vectors)?;
        if index.dim != header.dim {
            return Err(RagError::InvalidInput(format!(
                "{}: header says dimension {}, rows have {}",
                path.display(),
                header.dim,
                index.dim
            )));
        }
        Ok(index)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
