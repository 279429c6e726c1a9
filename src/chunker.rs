//! Overlapping, separator-aware chunking of a corpus string.
//!
//! Sizes are measured in characters (Unicode scalar values). Chunk ends prefer
//! the largest separator that fits the window: paragraph break, then line
//! break, then word boundary, and only then a raw character position.

use serde::Serialize;
use thiserror::Error;

/// Default maximum characters per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
/// Default characters shared between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 1_000;

/// Invalid chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// `chunk_size` must be positive.
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
    /// The window could never advance.
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge {
        /// Requested chunk size.
        chunk_size: usize,
        /// Requested overlap.
        overlap: usize,
    },
}

/// Chunking tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkerConfig {
    /// Validates and builds a config.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::ZeroChunkSize);
        }
        if overlap >= chunk_size {
            return Err(ChunkError::OverlapTooLarge {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Maximum characters per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Minimum characters shared with the previous chunk.
    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Contiguous slice of the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Position in the chunk sequence.
    pub chunk_id: usize,
    /// Chunk text, an exact substring of the corpus.
    pub text: String,
    /// Character offset of the first character.
    pub char_start: usize,
    /// Exclusive character end offset.
    pub char_end: usize,
}

impl Chunk {
    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }
}

/// Boundary kinds in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    Paragraph,
    Line,
    Word,
}

const SEPARATORS: [Separator; 3] = [Separator::Paragraph, Separator::Line, Separator::Word];

impl Separator {
    /// True when a boundary of this kind sits right before `chars[idx]`.
    fn splits_before(self, chars: &[char], idx: usize) -> bool {
        if idx == 0 || idx >= chars.len() {
            return false;
        }
        match self {
            Self::Paragraph => idx >= 2 && chars[idx - 1] == '\n' && chars[idx - 2] == '\n',
            Self::Line => chars[idx - 1] == '\n',
            Self::Word => chars[idx - 1].is_whitespace() && !chars[idx].is_whitespace(),
        }
    }
}

/// Stateless splitter producing overlapping chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Builds a chunker from validated config.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Returns the underlying config.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Splits `text` into chunks. An empty input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let offsets = byte_offsets(text);
        let total = chars.len();
        let size = self.config.chunk_size;
        let overlap = self.config.overlap;

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut prev_end = 0usize;
        while start < total {
            if total - start <= size {
                push_chunk(&mut chunks, text, &offsets, start, total);
                break;
            }
            let end = chunk_end(&chars, start, prev_end, size, overlap);
            push_chunk(&mut chunks, text, &offsets, start, end);
            start = next_start(&chars, start, end, overlap);
            prev_end = end;
        }
        chunks
    }

    /// Convenience wrapper returning only the chunk texts.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split(text).into_iter().map(|chunk| chunk.text).collect()
    }
}

/// Picks the end of a chunk starting at `start`; the remaining text is known
/// to exceed `size`. The end always lies past `prev_end`, the previous
/// chunk's end, so every chunk contributes new text.
fn chunk_end(chars: &[char], start: usize, prev_end: usize, size: usize, overlap: usize) -> usize {
    let limit = start + size;
    // next start must land after `start`; start > prev start keeps prev_end < limit
    let floor = (start + overlap + 1).max(prev_end + 1);
    for separator in SEPARATORS {
        if let Some(end) = (floor..=limit)
            .rev()
            .find(|&idx| separator.splits_before(chars, idx))
        {
            return end;
        }
    }
    limit
}

/// Picks where the next chunk starts so that it shares at least `overlap`
/// characters with `[start, end)`.
fn next_start(chars: &[char], start: usize, end: usize, overlap: usize) -> usize {
    if overlap == 0 {
        return end;
    }
    let latest = end - overlap;
    ((start + 1)..=latest)
        .rev()
        .find(|&idx| Separator::Word.splits_before(chars, idx) || Separator::Line.splits_before(chars, idx))
        .unwrap_or(latest)
}

fn push_chunk(chunks: &mut Vec<Chunk>, text: &str, offsets: &[usize], start: usize, end: usize) {
    chunks.push(Chunk {
        chunk_id: chunks.len(),
        text: text[offsets[start]..offsets[end]].to_string(),
        char_start: start,
        char_end: end,
    });
}

/// Byte offset of every character plus the terminal offset.
fn byte_offsets(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(text.len()))
        .collect()
}
