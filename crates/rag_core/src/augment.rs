//! Label-preserving text augmentation.
//!
//! Every strategy tokenizes with a [`Segmenter`] that knows the synonym table,
//! edits the token sequence, and reassembles by plain concatenation. All
//! randomness comes from the caller's RNG, so a seeded RNG gives reproducible
//! variants.

use std::collections::HashMap;

use rand::seq::{index, SliceRandom};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tokenize::Segmenter;

/// Closed synonym table. Only these trigger words are ever substituted or
/// used as an insertion source.
pub const DEFAULT_SYNONYMS: &[(&str, &[&str])] = &[
    ("怎么", &["如何", "怎样", "咋"]),
    ("天气", &["气候", "气象"]),
    ("安装", &["设置", "配置", "装载"]),
    ("下雨", &["降雨", "落雨"]),
    ("分析", &["解析", "剖析", "研究"]),
    ("最近", &["近期", "近来", "近日"]),
    ("爆发", &["发生", "引发", "产生"]),
    ("谁", &["何人", "什么人"]),
    ("提出", &["发明", "创立", "发现"]),
    ("how", &["in what way"]),
    ("weather", &["climate", "forecast"]),
    ("install", &["set up", "configure"]),
    ("analyze", &["examine", "study"]),
    ("recent", &["latest", "current"]),
    ("who", &["which person"]),
];

pub const DEFAULT_EDITS_PER_VARIANT: usize = 1;
pub const DEFAULT_DELETION_PROBABILITY: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AugmentationStrategy {
    SynonymSubstitution,
    RandomInsertion,
    RandomSwap,
    RandomDeletion,
}

impl AugmentationStrategy {
    pub const ALL: [AugmentationStrategy; 4] = [
        AugmentationStrategy::SynonymSubstitution,
        AugmentationStrategy::RandomInsertion,
        AugmentationStrategy::RandomSwap,
        AugmentationStrategy::RandomDeletion,
    ];

    fn pick<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

#[derive(Debug, Clone)]
pub struct Augmenter {
    synonyms: HashMap<String, Vec<String>>,
    segmenter: Segmenter,
    edits: usize,
    deletion_p: f64,
}

impl Augmenter {
    pub fn new<I, K, V>(table: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        let synonyms: HashMap<String, Vec<String>> = table
            .into_iter()
            .map(|(k, vs)| {
                let word: String = k.into();
                let alternatives: Vec<String> = vs.into_iter().map(Into::into).collect();
                (word, alternatives)
            })
            .filter(|(word, alternatives)| !word.is_empty() && !alternatives.is_empty())
            .collect();
        let segmenter = Segmenter::new(synonyms.keys())?;

        Ok(Self {
            synonyms,
            segmenter,
            edits: DEFAULT_EDITS_PER_VARIANT,
            deletion_p: DEFAULT_DELETION_PROBABILITY,
        })
    }

    /// Augmenter over [`DEFAULT_SYNONYMS`].
    pub fn with_default_table() -> Result<Self> {
        Self::new(
            DEFAULT_SYNONYMS
                .iter()
                .map(|(word, alts)| (*word, alts.to_vec())),
        )
    }

    /// `edits` is the `n` of substitution, insertion and swap; `deletion_p` the
    /// per-token drop probability of deletion.
    pub fn with_params(mut self, edits: usize, deletion_p: f64) -> Self {
        self.edits = edits;
        self.deletion_p = deletion_p.clamp(0.0, 1.0);
        self
    }

    /// Up to `count` distinct variants of `text`, none equal to `text`.
    /// Degenerate attempts are dropped, not retried.
    pub fn generate<R: Rng + ?Sized>(&self, text: &str, count: usize, rng: &mut R) -> Vec<String> {
        let mut variants: Vec<String> = Vec::with_capacity(count);

        for _ in 0..count {
            let strategy = AugmentationStrategy::pick(rng);
            let candidate = self.apply(strategy, text, rng);
            if candidate == text || variants.contains(&candidate) {
                continue;
            }
            variants.push(candidate);
        }

        variants
    }

    pub fn apply<R: Rng + ?Sized>(
        &self,
        strategy: AugmentationStrategy,
        text: &str,
        rng: &mut R,
    ) -> String {
        match strategy {
            AugmentationStrategy::SynonymSubstitution => {
                self.synonym_substitution(text, self.edits, rng)
            }
            AugmentationStrategy::RandomInsertion => self.random_insertion(text, self.edits, rng),
            AugmentationStrategy::RandomSwap => self.random_swap(text, self.edits, rng),
            AugmentationStrategy::RandomDeletion => {
                self.random_deletion(text, self.deletion_p, rng)
            }
        }
    }

    fn tokens(&self, text: &str) -> Vec<String> {
        self.segmenter
            .segment(text)
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    /// Picks up to `n` table words present in `text` and replaces every
    /// occurrence of each with a random alternative.
    pub fn synonym_substitution<R: Rng + ?Sized>(&self, text: &str, n: usize, rng: &mut R) -> String {
        let mut words = self.tokens(text);
        let mut replaceable: Vec<String> = words
            .iter()
            .filter(|w| self.synonyms.contains_key(w.as_str()))
            .cloned()
            .collect();

        if replaceable.is_empty() {
            return text.to_string();
        }

        replaceable.shuffle(rng);
        for word in replaceable.iter().take(n) {
            let Some(alternatives) = self.synonyms.get(word) else {
                continue;
            };
            for w in words.iter_mut().filter(|w| w.as_str() == word.as_str()) {
                if let Some(alt) = alternatives.choose(rng) {
                    *w = alt.clone();
                }
            }
        }

        words.concat()
    }

    /// `n` times, takes a random table word of the current sequence and
    /// inserts one of its alternatives at a random position.
    pub fn random_insertion<R: Rng + ?Sized>(&self, text: &str, n: usize, rng: &mut R) -> String {
        let mut words = self.tokens(text);
        if words.len() < 2 {
            return text.to_string();
        }

        for _ in 0..n {
            let eligible: Vec<usize> = words
                .iter()
                .enumerate()
                .filter(|(_, w)| self.synonyms.contains_key(w.as_str()))
                .map(|(i, _)| i)
                .collect();
            let Some(&source) = eligible.choose(rng) else {
                return text.to_string();
            };
            let Some(alt) = self
                .synonyms
                .get(&words[source])
                .and_then(|alts| alts.choose(rng))
                .cloned()
            else {
                continue;
            };
            let position = rng.gen_range(0..=words.len());
            words.insert(position, alt);
        }

        words.concat()
    }

    /// `n` times, exchanges the tokens at two distinct random positions.
    pub fn random_swap<R: Rng + ?Sized>(&self, text: &str, n: usize, rng: &mut R) -> String {
        let mut words = self.tokens(text);
        if words.len() < 2 {
            return text.to_string();
        }

        for _ in 0..n {
            let picked = index::sample(rng, words.len(), 2);
            words.swap(picked.index(0), picked.index(1));
        }

        words.concat()
    }

    /// Drops each token with probability `p`. Never returns an empty string for
    /// non-empty input: if everything is dropped the first character survives.
    pub fn random_deletion<R: Rng + ?Sized>(&self, text: &str, p: f64, rng: &mut R) -> String {
        let kept: Vec<String> = self
            .tokens(text)
            .into_iter()
            .filter(|_| rng.gen::<f64>() > p)
            .collect();

        if kept.is_empty() {
            return text.chars().next().map(String::from).unwrap_or_default();
        }

        kept.concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn augmenter() -> Augmenter {
        Augmenter::with_default_table().unwrap()
    }

    #[test]
    fn substitution_only_touches_table_words() {
        let aug = augmenter();
        let mut rng = StdRng::seed_from_u64(1);
        let out = aug.synonym_substitution("北京天气好", 1, &mut rng);

        assert!(out.starts_with("北京"));
        assert!(out.ends_with('好'));
        let middle = &out["北京".len()..out.len() - "好".len()];
        assert!(["气候", "气象"].contains(&middle), "got {out}");
    }

    #[test]
    fn substitution_without_table_words_is_identity() {
        let aug = augmenter();
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(aug.synonym_substitution("红烧肉的做法", 3, &mut rng), "红烧肉的做法");
        assert_eq!(aug.random_insertion("红烧肉的做法", 3, &mut rng), "红烧肉的做法");
    }

    #[test]
    fn insertion_adds_one_alternative() {
        let aug = augmenter();
        let mut rng = StdRng::seed_from_u64(3);
        let out = aug.random_insertion("怎么办", 1, &mut rng);

        assert!(out.chars().count() > "怎么办".chars().count());
        assert!(["如何", "怎样", "咋"].iter().any(|alt| out.contains(alt)), "got {out}");
    }

    #[test]
    fn short_inputs_are_untouched_by_swap_and_insertion() {
        let aug = augmenter();
        let mut rng = StdRng::seed_from_u64(4);
        assert_eq!(aug.random_swap("谁", 1, &mut rng), "谁");
        assert_eq!(aug.random_insertion("天气", 1, &mut rng), "天气");
    }

    #[test]
    fn swap_permutes_tokens() {
        let aug = augmenter();
        let mut rng = StdRng::seed_from_u64(5);
        let text = "上海明天的气温";
        let out = aug.random_swap(text, 1, &mut rng);

        let mut a: Vec<char> = text.chars().collect();
        let mut b: Vec<char> = out.chars().collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
    }

    #[test]
    fn deletion_never_empties_the_text() {
        let aug = augmenter();
        let mut rng = StdRng::seed_from_u64(6);
        for text in ["谁", "天气", "如何安装Python环境？", "a b c"] {
            for _ in 0..200 {
                assert!(!aug.random_deletion(text, 0.9, &mut rng).is_empty());
            }
        }
        assert_eq!(aug.random_deletion("如何安装", 1.0, &mut rng), "如");
    }

    #[test]
    fn generate_yields_distinct_non_identical_variants() {
        let aug = augmenter();
        let mut rng = StdRng::seed_from_u64(7);
        let text = "最近北京怎么下雨了？";
        let variants = aug.generate(text, 10, &mut rng);

        assert!(!variants.is_empty());
        assert!(variants.len() <= 10);
        assert!(variants.iter().all(|v| v != text));
        for (i, v) in variants.iter().enumerate() {
            assert!(!variants[i + 1..].contains(v));
        }
    }

    #[test]
    fn every_strategy_eventually_changes_eligible_text() {
        let aug = augmenter();
        let mut rng = StdRng::seed_from_u64(8);
        let text = "最近怎么安装天气插件";

        for strategy in AugmentationStrategy::ALL {
            let changed = (0..50).any(|_| aug.apply(strategy, text, &mut rng) != text);
            assert!(changed, "{strategy:?} never changed the input");
        }
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        let aug = augmenter();
        let text = "如何分析最近爆发的疫情？";
        let a = aug.generate(text, 5, &mut StdRng::seed_from_u64(42));
        let b = aug.generate(text, 5, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn english_table_words_are_substituted_whole() {
        let aug = augmenter();
        let mut rng = StdRng::seed_from_u64(9);
        let out = aug.synonym_substitution("how do I install it", 2, &mut rng);
        assert_ne!(out, "how do I install it");
        assert!(out.contains(" do I "), "got {out}");
    }
}
