//! Deterministic sliding-window text chunker.
//!
//! Splits normalized content text into bounded-length chunks with a fixed
//! overlap between neighbours, so that a sentence cut at a window boundary
//! still appears whole in at least one chunk.
//!
//! # Algorithm
//!
//! 1. Walk the text in character (not byte) positions.
//! 2. If the remainder fits in `max_chars`, emit it and stop.
//! 3. Otherwise look inside the next `max_chars` window for the last
//!    paragraph break, then the last newline, then the last space. A break
//!    is only taken if it advances more than `overlap_chars` characters;
//!    failing that the window is cut hard at `max_chars`.
//! 4. The next window starts `overlap_chars` before the cut, moved forward
//!    to the next word start when one exists before the cut.
//! 5. Chunks are trimmed; empty chunks are dropped.
//!
//! Identical input text and policy always yield the identical ordered
//! chunk sequence, which makes reprocessing idempotent.
//!
//! # Example
//!
//! ```rust
//! use knowledge_harness_core::chunk::{chunk_text, ChunkingPolicy};
//!
//! let policy = ChunkingPolicy::new(1000, 200).unwrap();
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", &policy);
//! assert_eq!(chunks.len(), 1);
//! ```

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Chunk size and overlap, both measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingPolicy {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkingPolicy {
    /// Build a policy. `max_chars` must be positive and strictly greater
    /// than `overlap_chars`, otherwise the window could never advance.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(Error::validation("chunking.max_chars must be > 0"));
        }
        if overlap_chars >= max_chars {
            return Err(Error::validation(
                "chunking.overlap_chars must be smaller than chunking.max_chars",
            ));
        }
        Ok(Self {
            max_chars,
            overlap_chars,
        })
    }
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            overlap_chars: 200,
        }
    }
}

/// Normalize extracted text before chunking.
///
/// Line endings become `\n`, every line is trimmed and has its inner
/// whitespace runs collapsed to one space, and any run of blank lines
/// becomes a single blank line (a paragraph break).
pub fn normalize_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(text.len());
    let mut pending_blank = false;

    for line in text.split('\n') {
        let collapsed = collapse_inline_whitespace(line.trim());
        if collapsed.is_empty() {
            pending_blank = true;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_blank { "\n\n" } else { "\n" });
        }
        pending_blank = false;
        out.push_str(&collapsed);
    }

    out
}

fn collapse_inline_whitespace(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut last_was_space = false;
    for c in line.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

/// SHA-256 hex digest of a text, used as a content fingerprint.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split text into overlapping chunks according to `policy`.
///
/// Returns an empty vector for blank input; callers that require at least
/// one chunk must reject blank text beforehand.
///
/// # Guarantees
///
/// - Every chunk has at most `policy.max_chars` characters.
/// - Chunks appear in text order.
/// - With `overlap_chars == 0` the chunks partition the text (modulo the
///   whitespace trimmed at each cut).
pub fn chunk_text(text: &str, policy: &ChunkingPolicy) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    // bounds[k] is the byte offset of char k; bounds[n] == text.len().
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = bounds.len() - 1;
    let max = policy.max_chars.max(1);
    let overlap = policy.overlap_chars.min(max - 1);

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        if total_chars - start <= max {
            push_trimmed(&mut chunks, &text[bounds[start]..]);
            break;
        }

        let hard_end = start + max;
        let window = &text[bounds[start]..bounds[hard_end]];
        let end = match find_break(window, overlap) {
            Some(chars_in) => start + chars_in,
            None => hard_end,
        };

        push_trimmed(&mut chunks, &text[bounds[start]..bounds[end]]);

        let mut next = end - overlap;
        if overlap > 0 && !starts_word(text, &bounds, next) {
            if let Some(ws) = (next..end).find(|&k| char_at(text, &bounds, k).is_whitespace()) {
                if ws + 1 < end {
                    next = ws + 1;
                }
            }
        }
        start = next;
    }

    chunks
}

/// Character length of the preferred cut inside `window`, if that cut
/// advances more than `overlap` characters.
fn find_break(window: &str, overlap: usize) -> Option<usize> {
    let candidate = window
        .rfind("\n\n")
        .map(|i| i + 2)
        .or_else(|| window.rfind('\n').map(|i| i + 1))
        .or_else(|| window.rfind(' ').map(|i| i + 1))?;
    let chars_in = window[..candidate].chars().count();
    (chars_in > overlap).then_some(chars_in)
}

fn char_at(text: &str, bounds: &[usize], k: usize) -> char {
    text[bounds[k]..].chars().next().unwrap_or(' ')
}

fn starts_word(text: &str, bounds: &[usize], k: usize) -> bool {
    k == 0 || char_at(text, bounds, k - 1).is_whitespace()
}

fn push_trimmed(chunks: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        chunks.push(piece.to_string());
    }
}
