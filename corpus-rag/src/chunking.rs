//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`RecursiveCharacterChunker`],
//! which splits each page into overlapping windows of roughly `chunk_size`
//! characters. Cut points are searched in priority order: paragraph breaks
//! (`\n\n`), line breaks (`\n`), spaces, and finally raw character positions.

use std::ops::Range;

use crate::document::{Chunk, Document};

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s in reading order with provenance but
/// no embeddings. Embeddings are attached later by the pipeline.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if every page is empty.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// The default separator hierarchy: paragraph, line, word, character.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splits text recursively by a separator hierarchy, then merges the pieces
/// into windows of at most `chunk_size` characters that overlap by up to
/// `chunk_overlap` characters.
///
/// Separators stay attached to the start of the piece that follows them, so
/// every chunk is a contiguous (whitespace-trimmed) slice of its page. Each
/// page is split independently and chunks record the page they came from.
///
/// Lengths are measured in `char`s, not bytes.
///
/// # Example
///
/// ```rust,ignore
/// use corpus_rag::RecursiveCharacterChunker;
///
/// let chunker = RecursiveCharacterChunker::new(1000, 200);
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveCharacterChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveCharacterChunker {
    /// Create a new chunker with the default separator hierarchy.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: target maximum number of characters per chunk
    /// * `chunk_overlap`: maximum number of characters shared with the previous chunk
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the separator hierarchy. An empty string means "any character boundary".
    pub fn with_separators<I, S>(mut self, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.separators = separators.into_iter().map(Into::into).collect();
        self
    }

    /// Split `text` into byte ranges of `text`, one per chunk, in order.
    ///
    /// Every range is trimmed of surrounding whitespace and non-empty.
    pub fn split_ranges(&self, text: &str) -> Vec<Range<usize>> {
        let separators: Vec<&str> = self.separators.iter().map(String::as_str).collect();
        let mut out = Vec::new();
        self.split_recursive(text, 0..text.len(), &separators, &mut out);
        out
    }

    /// Split `text` into chunk strings.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_ranges(text).into_iter().map(|r| text[r].to_string()).collect()
    }

    fn split_recursive(
        &self,
        text: &str,
        range: Range<usize>,
        separators: &[&str],
        out: &mut Vec<Range<usize>>,
    ) {
        let slice = &text[range.clone()];

        // No separator applies: the whole slice is one unsplittable piece.
        let (pieces, remaining) =
            match separators.iter().position(|sep| sep.is_empty() || slice.contains(sep)) {
                Some(i) => (
                    split_keeping_separator(slice, range.start, separators[i]),
                    &separators[i + 1..],
                ),
                None => (vec![range.clone()], &separators[..0]),
            };

        let mut pending: Vec<Piece> = Vec::new();
        for piece in pieces {
            let len = text[piece.clone()].chars().count();
            if len < self.chunk_size {
                pending.push(Piece { range: piece, len });
                continue;
            }
            if !pending.is_empty() {
                self.merge(text, &pending, out);
                pending.clear();
            }
            if remaining.is_empty() {
                push_trimmed(text, piece, out);
            } else {
                self.split_recursive(text, piece, remaining, out);
            }
        }
        if !pending.is_empty() {
            self.merge(text, &pending, out);
        }
    }

    /// Merge adjacent pieces into windows, carrying up to `chunk_overlap`
    /// characters of trailing pieces into the next window.
    fn merge(&self, text: &str, pieces: &[Piece], out: &mut Vec<Range<usize>>) {
        let mut window_start = 0;
        let mut total = 0;

        for (i, piece) in pieces.iter().enumerate() {
            if total + piece.len > self.chunk_size && i > window_start {
                push_trimmed(text, pieces[window_start].range.start..pieces[i - 1].range.end, out);
                while window_start < i
                    && (total > self.chunk_overlap || total + piece.len > self.chunk_size)
                {
                    total -= pieces[window_start].len;
                    window_start += 1;
                }
            }
            total += piece.len;
        }

        if window_start < pieces.len() {
            let last = pieces.len() - 1;
            push_trimmed(text, pieces[window_start].range.start..pieces[last].range.end, out);
        }
    }
}

impl Default for RecursiveCharacterChunker {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

impl Chunker for RecursiveCharacterChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for page in &document.pages {
            for range in self.split_ranges(&page.text) {
                chunks.push(Chunk {
                    text: page.text[range].to_string(),
                    source_document: document.name.clone(),
                    page: page.number,
                    chunk_index: chunks.len(),
                    doc_type: None,
                });
            }
        }
        chunks
    }
}

#[derive(Debug, Clone)]
struct Piece {
    range: Range<usize>,
    len: usize,
}

/// Cut `slice` (which starts at byte `offset` of the full text) before every
/// occurrence of `separator`, so each separator leads the piece after it.
/// An empty separator cuts at every character boundary. Empty pieces are dropped.
fn split_keeping_separator(slice: &str, offset: usize, separator: &str) -> Vec<Range<usize>> {
    if separator.is_empty() {
        return slice
            .char_indices()
            .map(|(i, c)| offset + i..offset + i + c.len_utf8())
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    let mut search_from = 0;
    while let Some(pos) = slice[search_from..].find(separator) {
        let cut = search_from + pos;
        if cut > start {
            pieces.push(offset + start..offset + cut);
        }
        start = cut;
        search_from = cut + separator.len();
    }
    if start < slice.len() {
        pieces.push(offset + start..offset + slice.len());
    }
    pieces
}

fn push_trimmed(text: &str, range: Range<usize>, out: &mut Vec<Range<usize>>) {
    let slice = &text[range.clone()];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    if leading == slice.len() {
        return;
    }
    out.push(range.start + leading..range.end - trailing);
}
