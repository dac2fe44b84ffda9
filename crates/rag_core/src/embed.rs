use std::sync::Arc;

use anyhow::Result;
use rayon::prelude::*;

use crate::error::RagError;

pub const DEFAULT_EMBEDDING_DIM: usize = 768;

/// External embedding model. Implementations must be deterministic for a
/// fixed `model_id`; vectors built by two different ids are not comparable.
pub trait EmbeddingProvider: Send + Sync {
    fn model_id(&self) -> String;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

impl<E: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<E> {
    fn model_id(&self) -> String {
        (**self).model_id()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text)
    }
}

impl<E: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<E> {
    fn model_id(&self) -> String {
        (**self).model_id()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text)
    }
}

/// Scale `v` to unit length in place. Zero vectors are left as they are.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Embed one text and unit-normalize it, mapping provider errors into the
/// crate taxonomy.
pub fn embed_normalized<E>(embedder: &E, text: &str) -> crate::Result<Vec<f32>>
where
    E: EmbeddingProvider + ?Sized,
{
    let mut v = embedder.embed(text).map_err(RagError::embedding)?;
    if v.is_empty() {
        return Err(RagError::EmbeddingFailure(format!(
            "provider '{}' returned an empty vector",
            embedder.model_id()
        )));
    }
    normalize(&mut v);
    Ok(v)
}

/// Embed every text in order. Fails as a whole on the first provider error or
/// on a dimension change between texts.
pub fn embed_all<E>(embedder: &E, texts: &[String]) -> crate::Result<Vec<Vec<f32>>>
where
    E: EmbeddingProvider + ?Sized,
{
    let vectors = texts
        .par_iter()
        .map(|text| embed_normalized(embedder, text))
        .collect::<crate::Result<Vec<_>>>()?;

    if let Some(first) = vectors.first() {
        let dim = first.len();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(RagError::EmbeddingFailure(format!(
                "inconsistent embedding dimension: {} vs {}",
                dim,
                bad.len()
            )));
        }
    }

    Ok(vectors)
}

/// Bag-of-features hashing embedder. Needs no model files, which makes it the
/// default provider and the one used in tests.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dim: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self {
            dim: DEFAULT_EMBEDDING_DIM,
        }
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn model_id(&self) -> String {
        format!("hash-{}", self.dim)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dim];

        for feature in hash_features(text) {
            let mut h: u64 = 1469598103934665603;
            for b in feature.as_bytes() {
                h ^= *b as u64;
                h = h.wrapping_mul(1099511628211);
            }
            let idx = (h as usize) % self.dim;
            v[idx] += 1.0;
        }

        normalize(&mut v);
        Ok(v)
    }
}

// ASCII words are features as a whole; runs of other scripts (CJK has no
// spaces) contribute every character and every adjacent character pair.
fn hash_features(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut out = Vec::new();

    for run in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        if run.is_ascii() {
            out.push(run.to_string());
            continue;
        }
        let chars: Vec<char> = run.chars().collect();
        for (i, c) in chars.iter().enumerate() {
            out.push(c.to_string());
            if let Some(next) = chars.get(i + 1) {
                out.push(format!("{c}{next}"));
            }
        }
    }

    out
}
