
use std::sync::LazyLock;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Sentence boundary: terminal punctuation followed by a whitespace run.
/// Known to misfire on abbreviations and decimals.
static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<=[.!?])\s+").expect("valid regex"));

/// Represents a chunk of a document ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    /// The chunk text
    pub content: String,
    /// Ordinal position of this chunk within its document
    pub chunk_index: usize,
    /// Length of the chunk in characters
    pub char_count: usize,
}

/// Configuration for content chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Soft upper bound on chunk length, in characters
    pub max_length: usize,
    /// Number of trailing characters carried into the next chunk
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_length: 500,
            overlap: 50,
        }
    }
}

/// Split text into trimmed, non-empty sentences
#[inline]
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in SENTENCE_BOUNDARY.find_iter(text) {
        match boundary {
            Ok(m) => {
                push_sentence(&mut sentences, text.get(start..m.start()));
                start = m.end();
            }
            Err(e) => {
                warn!("Sentence boundary scan aborted: {}", e);
                break;
            }
        }
    }
    push_sentence(&mut sentences, text.get(start..));

    sentences
}

fn push_sentence<'a>(sentences: &mut Vec<&'a str>, sentence: Option<&'a str>) {
    if let Some(sentence) = sentence.map(str::trim).filter(|s| !s.is_empty()) {
        sentences.push(sentence);
    }
}

/// Split text into sentence-aligned chunks of roughly `max_length` characters.
///
/// Sentences are accumulated into a buffer (joined by single spaces) until the
/// next one would push the buffer past `max_length`. The buffer is then
/// flushed, and the next buffer is seeded with the last `overlap` characters
/// of the flushed chunk when that chunk is longer than `overlap`. The sentence
/// that caused the flush always goes into the new buffer, so a sentence longer
/// than `max_length` is emitted whole.
#[inline]
pub fn chunk_text(text: &str, max_length: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0;

    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();
        let joined_len = if buffer.is_empty() {
            sentence_len
        } else {
            buffer_len + 1 + sentence_len
        };

        if joined_len > max_length && !buffer.is_empty() {
            let flushed = std::mem::take(&mut buffer);
            let flushed_len = buffer_len;
            buffer_len = 0;

            if overlap > 0 && flushed_len > overlap {
                buffer = tail_chars(&flushed, flushed_len, overlap);
                buffer_len = overlap;
            }
            chunks.push(flushed);
        }

        if !buffer.is_empty() {
            buffer.push(' ');
            buffer_len += 1;
        }
        buffer.push_str(sentence);
        buffer_len += sentence_len;
    }

    if !buffer.is_empty() {
        chunks.push(buffer);
    }

    chunks
}

/// Last `count` characters of `text`, where `text_len` is its length in characters
fn tail_chars(text: &str, text_len: usize, count: usize) -> String {
    text.chars().skip(text_len.saturating_sub(count)).collect()
}

/// Chunk a document and attach ordinal positions
#[inline]
pub fn chunk_document(text: &str, config: &ChunkingConfig) -> Vec<ContentChunk> {
    let chunks: Vec<ContentChunk> = chunk_text(text, config.max_length, config.overlap)
        .into_iter()
        .enumerate()
        .map(|(chunk_index, content)| ContentChunk {
            char_count: content.chars().count(),
            content,
            chunk_index,
        })
        .collect();

    debug!(
        "Chunked document into {} chunks (avg {} chars)",
        chunks.len(),
        chunks.iter().map(|c| c.char_count).sum::<usize>() / chunks.len().max(1)
    );

    chunks
}
