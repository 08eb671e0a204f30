//! Text chunking module
//!
//! Splits page text into overlapping, sentence-aware chunks for embedding.
//! Sizes are configured in tokens and converted to characters.

use docchat_common::errors::{AppError, Result};
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

/// Rough approximation used for token budgeting
pub const CHARS_PER_TOKEN: usize = 4;

/// Configuration for text chunking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens
    pub chunk_size_tokens: usize,
    /// Overlap between consecutive chunks in tokens
    pub chunk_overlap_tokens: usize,
    /// Chunks shorter than this many characters are dropped
    pub min_chunk_chars: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size_tokens: usize, chunk_overlap_tokens: usize) -> Self {
        Self {
            chunk_size_tokens,
            chunk_overlap_tokens,
            min_chunk_chars: 20,
        }
    }

    fn capacity_chars(&self) -> usize {
        (self.chunk_size_tokens * CHARS_PER_TOKEN).max(1)
    }

    fn overlap_chars(&self) -> usize {
        // text-splitter rejects overlap >= capacity
        (self.chunk_overlap_tokens * CHARS_PER_TOKEN).min(self.capacity_chars().saturating_sub(1))
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::new(1024, 20)
    }
}

/// A text chunk with its position in the source text
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub content: String,
    /// Index of this chunk within the text it was cut from
    pub index: usize,
    /// Approximate token count
    pub token_count: usize,
    /// Byte offset of the chunk in the source text
    pub start_pos: usize,
}

/// Split text into chunks for embedding
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>> {
    let chunk_config = ChunkConfig::new(config.capacity_chars())
        .with_overlap(config.overlap_chars())
        .map_err(|e| AppError::Configuration {
            message: format!("invalid chunking configuration: {}", e),
        })?;
    let splitter = TextSplitter::new(chunk_config);

    let chunks: Vec<TextChunk> = splitter
        .chunk_indices(text)
        .filter(|(_, chunk)| chunk.len() >= config.min_chunk_chars)
        .enumerate()
        .map(|(index, (start_pos, chunk))| TextChunk {
            content: chunk.to_string(),
            index,
            token_count: chunk.len() / CHARS_PER_TOKEN,
            start_pos,
        })
        .collect();

    debug!(
        input_len = text.len(),
        chunk_count = chunks.len(),
        chunk_size_tokens = config.chunk_size_tokens,
        "Text chunked"
    );

    Ok(chunks)
}
