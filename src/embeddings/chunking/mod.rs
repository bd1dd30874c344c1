#[cfg(test)]
mod tests;

mod timestamps;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{LensError, Result};

pub use timestamps::timestamp_range;

/// A bounded span of log text, the atomic retrievable unit.
///
/// Line numbers are 1-indexed and inclusive; `chunk_id` is deterministic
/// from the source file and line range so that identical input always
/// produces identical ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_file: String,
    pub line_start: usize,
    pub line_end: usize,
    pub text: String,
    pub content_hash: String,
    /// Earliest and latest timestamp found in the chunk, ISO-8601.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_range: Option<(String, String)>,
}

/// Configuration for log chunking, both sizes in characters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Character count at which a chunk is closed.
    pub chunk_size: usize,
    /// Characters of trailing context repeated at the start of the next
    /// chunk, approximated in whole lines. Must be less than `chunk_size`.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 800,
            overlap: 100,
        }
    }
}

/// SHA-256 hex digest of chunk text, the content-addressed cache key.
#[inline]
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Split one log file's text into overlapping line-aligned chunks.
///
/// Whole lines accumulate until the running character count reaches
/// `chunk_size`; the next chunk starts `overlap` characters (rounded down
/// to whole lines) before the previous chunk's end, so every line lands in
/// at least one chunk. Chunking never crosses files: callers invoke this
/// once per source file. Pure and deterministic.
#[inline]
pub fn chunk_log(source_file: &str, raw_text: &str, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    if config.overlap >= config.chunk_size {
        return Err(LensError::Config(format!(
            "overlap ({}) must be strictly less than chunk_size ({})",
            config.overlap, config.chunk_size
        )));
    }

    if raw_text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let lines: Vec<&str> = raw_text.lines().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < lines.len() {
        let mut end = start;
        let mut char_count = 0usize;
        while end < lines.len() {
            // +1 for the newline the line boundary consumed
            char_count += lines[end].chars().count() + 1;
            end += 1;
            if char_count >= config.chunk_size {
                break;
            }
        }

        let text = lines[start..end].join("\n");
        if !text.trim().is_empty() {
            chunks.push(make_chunk(source_file, start + 1, end, text));
        }

        if end >= lines.len() {
            break;
        }

        // Rewind whole lines from the tail of this chunk until the overlap
        // budget is spent, always leaving at least one line of progress.
        let mut back = 0usize;
        let mut overlap_chars = 0usize;
        while back + 1 < end - start {
            let line_len = lines[end - 1 - back].chars().count() + 1;
            if overlap_chars + line_len > config.overlap {
                break;
            }
            overlap_chars += line_len;
            back += 1;
        }
        start = end - back;
    }

    debug!(
        source_file,
        lines = lines.len(),
        chunks = chunks.len(),
        "chunked log file"
    );

    Ok(chunks)
}

fn make_chunk(source_file: &str, line_start: usize, line_end: usize, text: String) -> Chunk {
    let hash = content_hash(&text);
    let timestamp_range = timestamps::timestamp_range(&text);
    Chunk {
        chunk_id: format!("{source_file}:{line_start}-{line_end}"),
        source_file: source_file.to_string(),
        line_start,
        line_end,
        content_hash: hash,
        timestamp_range,
        text,
    }
}
