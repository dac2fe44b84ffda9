use std::fs::File;
use std::io::Read;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::augment::Augmenter;
use crate::error::{RagError, Result};
use crate::model::{LabeledExample, Route};

#[derive(Debug, Deserialize)]
struct RawSeed {
    text: String,
    label: u32,
}

/// Parse `text,label` CSV rows (label 0 = direct answer, 1 = needs retrieval).
pub fn parse_seeds_csv<R: Read>(reader: R) -> Result<Vec<LabeledExample>> {
    let mut rows = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut seeds = Vec::new();

    for (row, record) in rows.deserialize::<RawSeed>().enumerate() {
        let raw = record?;
        let label = Route::from_index(raw.label).ok_or_else(|| {
            RagError::InvalidInput(format!("seed row {}: label must be 0 or 1, got {}", row + 1, raw.label))
        })?;
        if raw.text.is_empty() {
            return Err(RagError::InvalidInput(format!("seed row {}: empty text", row + 1)));
        }
        seeds.push(LabeledExample::seed(raw.text, label));
    }

    Ok(seeds)
}

pub fn load_seeds_csv(path: &Path) -> Result<Vec<LabeledExample>> {
    let file = File::open(path)?;
    parse_seeds_csv(file)
}

/// Every seed followed by up to `times` of its variants, each carrying the
/// seed's label.
pub fn augment_examples<R: Rng + ?Sized>(
    seeds: &[LabeledExample],
    augmenter: &Augmenter,
    times: usize,
    rng: &mut R,
) -> Vec<LabeledExample> {
    let mut out = Vec::with_capacity(seeds.len() * (times + 1));

    for seed in seeds {
        out.push(seed.clone());
        for variant in augmenter.generate(&seed.text, times, rng) {
            out.push(LabeledExample::derived(seed, variant));
        }
    }

    tracing::debug!(
        seeds = seeds.len(),
        total = out.len(),
        times,
        "augmented training set"
    );
    out
}

/// [`augment_examples`] driven by a fresh `StdRng` seeded with `seed`.
pub fn seeded_training_set(
    seeds: &[LabeledExample],
    augmenter: &Augmenter,
    times: usize,
    seed: u64,
) -> Vec<LabeledExample> {
    let mut rng = StdRng::seed_from_u64(seed);
    augment_examples(seeds, augmenter, times, &mut rng)
}

/// Shuffle with a fixed seed and split into (train, validation).
///
/// The validation share is rounded up, but the training side always keeps at
/// least one sample when there is any.
pub fn split_train_val<T>(mut samples: Vec<T>, validation_ratio: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total = samples.len();
    let share = (total as f64) * validation_ratio.clamp(0.0, 1.0);
    let wanted = (share - 1e-9).ceil().max(0.0) as usize;
    let val_len = wanted.min(total.saturating_sub(1));

    let val = samples.split_off(total - val_len);

    tracing::debug!(
        train = samples.len(),
        validation = val.len(),
        "dataset split"
    );

    (samples, val)
}
