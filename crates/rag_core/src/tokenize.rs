//! Word segmentation for the augmenter.
//!
//! Dictionary words are recognised first (leftmost-longest), everything else
//! falls back to runs of ASCII alphanumerics, runs of whitespace, and single
//! characters. Segments always concatenate back to the input, which is what
//! lets the augmenter reassemble text with no separator.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, Input, MatchKind};

use crate::error::{RagError, Result};

#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    automaton: Option<AhoCorasick>,
}

impl Segmenter {
    pub fn new<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = words
            .into_iter()
            .map(|w| w.as_ref().to_string())
            .filter(|w| !w.is_empty())
            .collect();

        if patterns.is_empty() {
            return Ok(Self { automaton: None });
        }

        let automaton = AhoCorasickBuilder::new()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&patterns)
            .map_err(|e| RagError::InvalidInput(format!("build segmenter dictionary: {e}")))?;

        Ok(Self {
            automaton: Some(automaton),
        })
    }

    pub fn segment<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut out = Vec::new();
        let mut cursor = 0;

        if let Some(automaton) = &self.automaton {
            let mut pos = 0;
            while let Some(mat) = automaton.find(Input::new(text).span(pos..text.len())) {
                if !on_word_boundary(text, mat.start(), mat.end()) {
                    // Rescan one character on so an overlapping word is still found.
                    pos = next_char_boundary(text, mat.start());
                    continue;
                }
                split_plain(&text[cursor..mat.start()], &mut out);
                out.push(&text[mat.start()..mat.end()]);
                cursor = mat.end();
                pos = mat.end();
            }
        }

        split_plain(&text[cursor..], &mut out);
        out
    }
}

// An ASCII dictionary word must not be cut out of a longer ASCII word
// ("how" inside "show").
fn on_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let is_word = |c: char| c.is_ascii_alphanumeric();
    let matched = &text[start..end];

    let starts_word = matched.chars().next().is_some_and(is_word);
    let ends_word = matched.chars().next_back().is_some_and(is_word);

    let before_ok = !starts_word || !text[..start].chars().next_back().is_some_and(is_word);
    let after_ok = !ends_word || !text[end..].chars().next().is_some_and(is_word);

    before_ok && after_ok
}

fn next_char_boundary(text: &str, at: usize) -> usize {
    text[at..].chars().next().map_or(text.len(), |c| at + c.len_utf8())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Class {
    Word,
    Space,
    Other,
}

fn class_of(c: char) -> Class {
    if c.is_ascii_alphanumeric() || c == '_' || c == '\'' {
        Class::Word
    } else if c.is_whitespace() {
        Class::Space
    } else {
        Class::Other
    }
}

fn split_plain<'a>(text: &'a str, out: &mut Vec<&'a str>) {
    let mut start = 0;
    let mut current: Option<Class> = None;

    for (i, c) in text.char_indices() {
        let class = class_of(c);
        match current {
            Some(prev) if prev == class && class != Class::Other => {}
            Some(_) => {
                out.push(&text[start..i]);
                start = i;
            }
            None => {}
        }
        current = Some(class);
    }

    if start < text.len() {
        out.push(&text[start..]);
    }
}
