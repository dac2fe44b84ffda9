//! Document sources and sentence splitting.

use std::fs;
use std::path::{Path, PathBuf};

use docx_rs::{read_docx, DocumentChild, Paragraph, ParagraphChild, RunChild};

use crate::error::{RagError, Result};
use crate::model::Sentence;

/// Marks that end a sentence. `.` only counts when followed by whitespace or
/// the end of the paragraph, so decimals and abbreviations stay intact.
pub const SENTENCE_TERMINATORS: &[char] = &['。', '！', '？', '!', '?', '.'];

/// Yields a document's paragraphs in order. Empty paragraphs are allowed and
/// skipped by [`DocumentCorpus`].
pub trait DocumentSource {
    fn paragraphs(&self) -> Result<Vec<String>>;
}

impl DocumentSource for Vec<String> {
    fn paragraphs(&self) -> Result<Vec<String>> {
        Ok(self.clone())
    }
}

/// UTF-8 text file, one paragraph per line.
#[derive(Debug, Clone)]
pub struct TextFileSource {
    path: PathBuf,
}

impl TextFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DocumentSource for TextFileSource {
    fn paragraphs(&self) -> Result<Vec<String>> {
        let raw = fs::read_to_string(&self.path)?;
        Ok(raw.lines().map(str::to_string).collect())
    }
}

/// Body paragraphs of a `.docx` file. Tables and images are ignored.
#[derive(Debug, Clone)]
pub struct DocxSource {
    path: PathBuf,
}

impl DocxSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DocumentSource for DocxSource {
    fn paragraphs(&self) -> Result<Vec<String>> {
        let bytes = fs::read(&self.path)?;
        let docx = read_docx(&bytes).map_err(|e| {
            RagError::Document(format!("parse '{}': {e:?}", self.path.display()))
        })?;

        Ok(docx
            .document
            .children
            .iter()
            .filter_map(|child| match child {
                DocumentChild::Paragraph(p) => Some(paragraph_text(p)),
                _ => None,
            })
            .collect())
    }
}

// Runs of one paragraph are pieces of the same text; join with no separator.
fn paragraph_text(paragraph: &Paragraph) -> String {
    let mut text = String::new();
    for child in &paragraph.children {
        if let ParagraphChild::Run(run) = child {
            for rc in &run.children {
                if let RunChild::Text(t) = rc {
                    text.push_str(&t.text);
                }
            }
        }
    }
    text
}

/// Pick a source by file extension: `.docx` is parsed as Word, anything else
/// is read as plain text.
pub fn source_for_path(path: &Path) -> Box<dyn DocumentSource> {
    let is_docx = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("docx"));

    if is_docx {
        Box::new(DocxSource::new(path))
    } else {
        Box::new(TextFileSource::new(path))
    }
}

fn is_terminator(c: char) -> bool {
    SENTENCE_TERMINATORS.contains(&c)
}

/// Split one paragraph on terminal punctuation. A run of marks (`？！`,
/// `...`) stays with its sentence; sentences are trimmed and empty ones
/// dropped. Trailing text with no terminator is kept as a final sentence.
pub fn split_into_sentences(paragraph: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }

        let mut end = i + c.len_utf8();
        let mut only_dots = c == '.';
        while let Some(&(j, next)) = chars.peek() {
            if !is_terminator(next) {
                break;
            }
            only_dots &= next == '.';
            end = j + next.len_utf8();
            chars.next();
        }

        let at_break = chars.peek().map_or(true, |&(_, next)| next.is_whitespace());
        if only_dots && !at_break {
            continue;
        }

        push_trimmed(&paragraph[start..end], &mut out);
        start = end;
    }

    push_trimmed(&paragraph[start..], &mut out);
    out
}

fn push_trimmed(piece: &str, out: &mut Vec<String>) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
}

/// Non-empty paragraphs of one document and their sentences in corpus order.
#[derive(Debug, Clone)]
pub struct DocumentCorpus {
    paragraphs: Vec<String>,
    sentences: Vec<Sentence>,
}

impl DocumentCorpus {
    /// Fails with [`RagError::EmptyCorpus`] when no paragraph has content.
    pub fn from_paragraphs<I, S>(paragraphs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paragraphs: Vec<String> = paragraphs
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        if paragraphs.is_empty() {
            return Err(RagError::EmptyCorpus);
        }

        let mut sentences = Vec::new();
        for (paragraph, text) in paragraphs.iter().enumerate() {
            for sentence in split_into_sentences(text) {
                sentences.push(Sentence {
                    position: sentences.len(),
                    paragraph,
                    text: sentence,
                });
            }
        }

        tracing::debug!(
            paragraphs = paragraphs.len(),
            sentences = sentences.len(),
            "corpus split"
        );

        Ok(Self {
            paragraphs,
            sentences,
        })
    }

    pub fn from_source(source: &dyn DocumentSource) -> Result<Self> {
        Self::from_paragraphs(source.paragraphs()?)
    }

    pub fn paragraphs(&self) -> &[String] {
        &self.paragraphs
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}
