//! Chunking strategies.
//!
//! Turns a cleaned document (a sequence of [`TextUnit`]s) into an ordered
//! list of [`Chunk`]s. Ids are `{stem}_{tag}{index}` where `tag` is fixed per
//! strategy and `index` counts from 0 across the whole document, so
//! re-chunking unchanged text reproduces the same ids and two strategies
//! never share an id namespace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Metadata, TextUnit};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMethod {
    /// One chunk per loader unit (PDF page, worksheet, whole text file).
    Page,
    /// One chunk per sentence (UAX #29 boundaries).
    #[default]
    Sentence,
    /// One chunk per blank-line-delimited paragraph.
    Paragraph,
    /// Character windows of `chunk_size` sharing `chunk_overlap` characters.
    Fixed,
}

impl ChunkMethod {
    /// Id infix distinguishing strategies.
    pub fn tag(&self) -> &'static str {
        match self {
            ChunkMethod::Page => "page",
            ChunkMethod::Sentence => "sent",
            ChunkMethod::Paragraph => "para",
            ChunkMethod::Fixed => "fixed",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkMethod::Page => "page",
            ChunkMethod::Sentence => "sentence",
            ChunkMethod::Paragraph => "paragraph",
            ChunkMethod::Fixed => "fixed",
        }
    }
}

impl fmt::Display for ChunkMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "page" => Ok(ChunkMethod::Page),
            "sentence" | "sent" => Ok(ChunkMethod::Sentence),
            "paragraph" | "para" => Ok(ChunkMethod::Paragraph),
            "fixed" | "fixed_length" | "fixed-length" => Ok(ChunkMethod::Fixed),
            other => Err(format!(
                "unknown chunk method '{}' (expected page, sentence, paragraph or fixed)",
                other
            )),
        }
    }
}

/// Split a cleaned document into chunks.
///
/// `source_file` is recorded in every chunk's metadata alongside the
/// loader-provided fields of the unit the chunk came from.
pub fn chunk_document(
    stem: &str,
    source_file: &str,
    units: &[TextUnit],
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    let method = config.method;
    let mut chunks = Vec::new();

    for (unit_index, unit) in units.iter().enumerate() {
        let pieces = match method {
            ChunkMethod::Page => split_page(&unit.text),
            ChunkMethod::Sentence => split_sentences(&unit.text),
            ChunkMethod::Paragraph => split_paragraphs(&unit.text),
            ChunkMethod::Fixed => {
                split_fixed(&unit.text, config.chunk_size, config.chunk_overlap)
            }
        };

        for piece in pieces {
            let index = chunks.len();
            let chunk_id = format!("{}_{}{}", stem, method.tag(), index);

            let mut metadata: Metadata = unit.metadata.clone();
            metadata.insert("source_file".into(), Value::from(source_file));
            metadata.insert("chunk_id".into(), Value::from(chunk_id.clone()));
            metadata.insert("chunk_method".into(), Value::from(method.as_str()));
            metadata.insert("chunk_index".into(), Value::from(index));
            metadata.insert("unit_index".into(), Value::from(unit_index));

            chunks.push(Chunk {
                chunk_id,
                chunk_text: piece,
                metadata,
            });
        }
    }

    chunks
}

fn split_page(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![trimmed.to_string()]
    }
}

pub fn split_sentences(text: &str) -> Vec<String> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
}

/// Character windows: `size` chars each, starting every `size - overlap` chars.
/// Windows that are only whitespace are dropped.
pub fn split_fixed(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if size == 0 || chars.is_empty() {
        return Vec::new();
    }
    let step = size.saturating_sub(overlap).max(1);

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        if !window.trim().is_empty() {
            windows.push(window);
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    windows
}
