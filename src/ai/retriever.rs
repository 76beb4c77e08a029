//! In-process business-context retriever.
//!
//! Documents are loaded once from a directory and split into paragraph
//! segments of at most [`MAX_SEGMENT_CHARS`] characters, consecutive segments
//! sharing up to [`SEGMENT_OVERLAP_CHARS`] characters. Each segment is
//! prefixed with its file name so the model knows where a rule came from.
//!
//! Ranking is lexical: term-frequency vectors compared by cosine similarity.
//! ASCII letters and digits form words; every other alphanumeric character
//! (CJK text has no word separators) is a term on its own.

use crate::ai::{ContextRetriever, ContextSegment};
use crate::config::{DEFAULT_MAX_RESULTS, DEFAULT_MIN_SCORE};
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

pub const MAX_SEGMENT_CHARS: usize = 300;
pub const SEGMENT_OVERLAP_CHARS: usize = 80;

type TermVector = HashMap<String, f64>;

#[derive(Debug, Clone)]
struct IndexedSegment {
    text: String,
    terms: TermVector,
    norm: f64,
}

#[derive(Debug, Clone)]
pub struct DocumentRetriever {
    segments: Vec<IndexedSegment>,
    min_score: f64,
    max_results: usize,
}

impl DocumentRetriever {
    /// Build a retriever over already loaded `(file_name, content)` pairs.
    pub fn from_documents<I, N, C>(documents: I, min_score: f64, max_results: usize) -> Self
    where
        I: IntoIterator<Item = (N, C)>,
        N: AsRef<str>,
        C: AsRef<str>,
    {
        let mut segments = Vec::new();
        for (name, content) in documents {
            for chunk in split_paragraphs(content.as_ref(), MAX_SEGMENT_CHARS, SEGMENT_OVERLAP_CHARS) {
                let text = format!("{}\n{}", name.as_ref(), chunk);
                let terms = term_vector(&text);
                let norm = norm(&terms);
                segments.push(IndexedSegment { text, terms, norm });
            }
        }

        Self {
            segments,
            min_score,
            max_results,
        }
    }

    /// Load every readable UTF-8 file in `dir`, in file name order.
    ///
    /// A missing directory yields an empty retriever.
    pub fn load(dir: &Path, min_score: f64, max_results: usize) -> DbResult<Self> {
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "Documents directory not found, retrieval disabled");
            return Ok(Self::from_documents(Vec::<(String, String)>::new(), min_score, max_results));
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| {
                DbError::invalid_input(format!(
                    "Cannot read documents directory {}: {}",
                    dir.display(),
                    e
                ))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match std::fs::read_to_string(&path) {
                Ok(content) => documents.push((name, content)),
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping unreadable document"),
            }
        }

        let retriever = Self::from_documents(documents, min_score, max_results);
        info!(
            dir = %dir.display(),
            segments = retriever.segment_count(),
            "Loaded business documents"
        );
        Ok(retriever)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Rank segments against `question`, best first.
    pub fn search(&self, question: &str) -> Vec<ContextSegment> {
        let query = term_vector(question);
        let query_norm = norm(&query);
        if query_norm == 0.0 {
            return Vec::new();
        }

        let mut hits: Vec<ContextSegment> = self
            .segments
            .iter()
            .filter(|s| s.norm > 0.0)
            .map(|s| ContextSegment {
                text: s.text.clone(),
                score: dot(&query, &s.terms) / (query_norm * s.norm),
            })
            .filter(|hit| hit.score >= self.min_score)
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(self.max_results);
        hits
    }
}

impl Default for DocumentRetriever {
    fn default() -> Self {
        Self::from_documents(Vec::<(String, String)>::new(), DEFAULT_MIN_SCORE, DEFAULT_MAX_RESULTS)
    }
}

#[async_trait]
impl ContextRetriever for DocumentRetriever {
    async fn retrieve(&self, question: &str) -> DbResult<Vec<ContextSegment>> {
        let hits = self.search(question);
        debug!(hits = hits.len(), "Retrieved business context");
        Ok(hits)
    }
}

/// Split `text` into paragraph-aligned chunks of at most `max_chars`.
///
/// Paragraphs are packed greedily. A paragraph longer than `max_chars` is cut
/// at word boundaries (or hard-cut when a single word is too long). Each new
/// chunk starts with the last words of the previous one, up to
/// `overlap_chars`, as long as the combination still fits.
pub fn split_paragraphs(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let pieces: Vec<String> = normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .flat_map(|p| split_long(p, max_chars))
        .collect();

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for piece in pieces {
        if current.is_empty() {
            current = piece;
            continue;
        }
        if char_len(&current) + 2 + char_len(&piece) <= max_chars {
            current.push_str("\n\n");
            current.push_str(&piece);
            continue;
        }

        let overlap = tail_words(&current, overlap_chars);
        chunks.push(std::mem::take(&mut current));
        current = if !overlap.is_empty() && char_len(&overlap) + 1 + char_len(&piece) <= max_chars {
            format!("{} {}", overlap, piece)
        } else {
            piece
        };
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_long(paragraph: &str, max_chars: usize) -> Vec<String> {
    if char_len(paragraph) <= max_chars {
        return vec![paragraph.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    for word in paragraph.split_whitespace() {
        let mut word = word.to_string();
        while char_len(&word) > max_chars {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            let split_at = word
                .char_indices()
                .nth(max_chars)
                .map_or(word.len(), |(i, _)| i);
            let rest = word.split_off(split_at);
            parts.push(word);
            word = rest;
        }
        if word.is_empty() {
            continue;
        }
        let needed = usize::from(!current.is_empty()) + char_len(&word);
        if char_len(&current) + needed > max_chars {
            parts.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// The longest run of trailing whole words that fits in `max_chars`.
fn tail_words(text: &str, max_chars: usize) -> String {
    let mut words: Vec<&str> = Vec::new();
    let mut len = 0;
    for word in text.split_whitespace().rev() {
        let added = char_len(word) + usize::from(!words.is_empty());
        if len + added > max_chars {
            break;
        }
        len += added;
        words.push(word);
    }
    words.reverse();
    words.join(" ")
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn term_vector(text: &str) -> TermVector {
    fn flush(word: &mut String, terms: &mut TermVector) {
        if !word.is_empty() {
            *terms.entry(std::mem::take(word)).or_insert(0.0) += 1.0;
        }
    }

    let mut terms = TermVector::new();
    let mut word = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            word.push(c.to_ascii_lowercase());
        } else {
            flush(&mut word, &mut terms);
            if c.is_alphanumeric() {
                for lower in c.to_lowercase() {
                    *terms.entry(lower.to_string()).or_insert(0.0) += 1.0;
                }
            }
        }
    }
    flush(&mut word, &mut terms);
    terms
}

fn norm(terms: &TermVector) -> f64 {
    terms.values().map(|v| v * v).sum::<f64>().sqrt()
}

fn dot(a: &TermVector, b: &TermVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(term, weight)| large.get(term).map(|other| weight * other))
        .sum()
}
