//! Overlapping, boundary-aware text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters
//! where each chunk shares its last `chunk_overlap` characters with the
//! first `chunk_overlap` characters of the next one. Sizes are counted in
//! Unicode scalar values, never bytes, so multi-byte text is never cut
//! inside a character.
//!
//! # Algorithm
//!
//! 1. If the remaining text fits in `chunk_size`, emit it and stop.
//! 2. Otherwise look for the latest split point inside the window that
//!    still leaves more than `chunk_overlap` characters in the chunk,
//!    trying in order: after a paragraph break (`\n\n`), after a line
//!    break, after any whitespace.
//! 3. Fall back to a hard cut at `chunk_size`.
//! 4. The next chunk starts `chunk_overlap` characters before the split.
//!
//! Concatenating the first chunk with every later chunk minus its first
//! `chunk_overlap` characters reconstructs the input exactly.
//!
//! # Example
//!
//! ```rust
//! use secure_rag_core::chunk::{chunk_text, ChunkParams};
//!
//! let params = ChunkParams::new(512, 128).unwrap();
//! let chunks = chunk_text("notes.md", "Hello world.\n\nSecond paragraph.", &params);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use uuid::Uuid;

use crate::error::{Result, RetrievalError};
use crate::models::{sha256_hex, Chunk};

/// Validated chunk length and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkParams {
    /// Validate and build chunking parameters.
    ///
    /// # Errors
    ///
    /// [`RetrievalError::Configuration`] if `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RetrievalError::Configuration(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RetrievalError::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

/// Split boundaries, highest priority first.
#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Whitespace,
}

const BOUNDARY_PRIORITY: [Boundary; 3] = [Boundary::Paragraph, Boundary::Line, Boundary::Whitespace];

impl Boundary {
    /// Whether a chunk ending right before `chars[end]` ends on this boundary.
    fn ends_at(self, chars: &[char], end: usize) -> bool {
        match self {
            Boundary::Paragraph => end >= 2 && chars[end - 2] == '\n' && chars[end - 1] == '\n',
            Boundary::Line => end >= 1 && chars[end - 1] == '\n',
            Boundary::Whitespace => end >= 1 && chars[end - 1].is_whitespace(),
        }
    }
}

/// Split `text` into overlapping chunks owned by `document_id`.
///
/// Empty text yields no chunks. Text no longer than `chunk_size` yields
/// exactly one chunk equal to the whole text. Chunk indices are
/// contiguous from 0 and chunk order is document order.
pub fn chunk_text(document_id: &str, text: &str, params: &ChunkParams) -> Vec<Chunk> {
    split_spans(text, params)
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| make_chunk(document_id, i as u32, &text[start..end]))
        .collect()
}

/// Compute chunk boundaries as byte ranges into `text`.
pub fn split_spans(text: &str, params: &ChunkParams) -> Vec<(usize, usize)> {
    if text.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = chars.len();

    let mut spans = Vec::new();
    let mut start = 0usize;
    loop {
        if total - start <= params.chunk_size {
            spans.push((offsets[start], offsets[total]));
            break;
        }
        let end = find_split(&chars, start, params);
        spans.push((offsets[start], offsets[end]));
        start = end - params.chunk_overlap;
    }
    spans
}

/// Pick the end (exclusive, in chars) of the chunk starting at `start`.
///
/// The end always lies in `(start + overlap, start + size]` so every
/// chunk contributes at least one new character.
fn find_split(chars: &[char], start: usize, params: &ChunkParams) -> usize {
    let hard_end = start + params.chunk_size;
    let min_end = start + params.chunk_overlap + 1;

    for boundary in BOUNDARY_PRIORITY {
        if let Some(end) = (min_end..=hard_end)
            .rev()
            .find(|&end| boundary.ends_at(chars, end))
        {
            return end;
        }
    }
    hard_end
}

/// Create a single [`Chunk`] with a UUID and SHA-256 content hash.
fn make_chunk(document_id: &str, index: u32, text: &str) -> Chunk {
    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: sha256_hex(text),
    }
}
