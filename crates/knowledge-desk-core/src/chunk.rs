//! Paragraph- and list-aware text chunker with block overlap.
//!
//! Splits document text into ordered [`Chunk`]s on blank-line boundaries,
//! keeping bullet and numbered lists together, and prefixes every chunk
//! after the first with the tail of the preceding block so a concept that
//! straddles a boundary is visible from both sides.
//!
//! # Algorithm
//!
//! 1. Normalize `\r\n` and lone `\r` to `\n`.
//! 2. Split on runs of blank lines, trim each block, drop empty blocks.
//! 3. Merge consecutive list blocks (`-`, `*`, `+`, or `N.` markers) into
//!    one block joined by a blank line.
//! 4. No blocks → no chunks. One block → that block alone, unmodified.
//! 5. For block `i > 0`, prepend an overlap taken from the end of block
//!    `i - 1`: half of it (floored) when it is shorter than `overlap_size`,
//!    otherwise its last `overlap_size` characters, then a blank line.
//!
//! Lengths are measured in characters, never bytes, so overlaps never cut
//! through a multi-byte code point.
//!
//! # Example
//!
//! ```rust
//! use knowledge_desk_core::chunk::{chunk_text, ChunkOptions};
//!
//! let opts = ChunkOptions { max_chunk_size: 2000, overlap_size: 1 };
//! let chunks = chunk_text("A\n\nB\n\nC", &opts);
//! let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
//! assert_eq!(texts, vec!["A", "A\n\nB", "B\n\nC"]);
//! ```

use crate::models::Chunk;

pub const DEFAULT_MAX_CHUNK_SIZE: usize = 2000;
pub const DEFAULT_OVERLAP_SIZE: usize = 200;

/// Chunking parameters, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Soft target for chunk length. Merged blocks are never truncated to
    /// fit; see [`oversized_chunks`].
    pub max_chunk_size: usize,
    pub overlap_size: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            overlap_size: DEFAULT_OVERLAP_SIZE,
        }
    }
}

/// Split text into overlapping chunks on paragraph and list boundaries.
///
/// # Guarantees
///
/// - Indices are contiguous: `0, 1, 2, …, N-1`.
/// - No chunk is empty.
/// - Blank or whitespace-only input yields an empty vector.
/// - A list is never split across chunks.
pub fn chunk_text(text: &str, options: &ChunkOptions) -> Vec<Chunk> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let paragraphs: Vec<&str> = normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let blocks = merge_list_blocks(&paragraphs);

    match blocks.len() {
        0 => return Vec::new(),
        1 => {
            return vec![Chunk {
                content: blocks[0].clone(),
                index: 0,
            }]
        }
        _ => {}
    }

    blocks
        .iter()
        .enumerate()
        .map(|(index, block)| {
            let content = if index == 0 {
                block.clone()
            } else {
                let overlap = overlap_fragment(&blocks[index - 1], options.overlap_size);
                if overlap.is_empty() {
                    block.clone()
                } else {
                    format!("{}\n\n{}", overlap, block)
                }
            };
            Chunk { content, index }
        })
        .collect()
}

/// Whether a block starts with a bullet (`-`, `*`, `+`) or numbered (`N.`)
/// list marker followed by whitespace.
pub fn is_list_item(block: &str) -> bool {
    let trimmed = block.trim();
    let mut chars = trimmed.chars();

    match chars.next() {
        Some('-' | '*' | '+') => chars.next().is_some_and(char::is_whitespace),
        Some(c) if c.is_ascii_digit() => {
            let rest = trimmed.trim_start_matches(|c: char| c.is_ascii_digit());
            let mut rest = rest.chars();
            rest.next() == Some('.') && rest.next().is_some_and(char::is_whitespace)
        }
        _ => false,
    }
}

/// Merge runs of consecutive list blocks into single blocks.
fn merge_list_blocks(paragraphs: &[&str]) -> Vec<String> {
    let mut merged = Vec::with_capacity(paragraphs.len());
    let mut current_list: Vec<&str> = Vec::new();

    for &paragraph in paragraphs {
        if is_list_item(paragraph) {
            current_list.push(paragraph);
            continue;
        }
        if !current_list.is_empty() {
            merged.push(current_list.join("\n\n"));
            current_list.clear();
        }
        merged.push(paragraph.to_string());
    }

    if !current_list.is_empty() {
        merged.push(current_list.join("\n\n"));
    }

    merged
}

/// The tail of `previous` that is carried into the next chunk.
///
/// Returns the last `floor(len / 2)` characters when `previous` is shorter
/// than `overlap_size`, otherwise the last `overlap_size` characters.
pub fn overlap_fragment(previous: &str, overlap_size: usize) -> &str {
    let len = previous.chars().count();
    let take = if len < overlap_size {
        len / 2
    } else {
        overlap_size
    };
    if take == 0 {
        return "";
    }

    let start = previous
        .char_indices()
        .nth(len - take)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &previous[start..]
}

/// Indices of chunks longer than `max_chunk_size` characters.
///
/// The chunker treats the limit as a soft target; callers decide whether to
/// warn, reject, or accept. A limit of `0` disables the check.
pub fn oversized_chunks(chunks: &[Chunk], max_chunk_size: usize) -> Vec<usize> {
    if max_chunk_size == 0 {
        return Vec::new();
    }
    chunks
        .iter()
        .filter(|c| c.content.chars().count() > max_chunk_size)
        .map(|c| c.index)
        .collect()
}
