//! Data types for documents, pages, chunks, vector records, and query results.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The page a piece of text came from.
///
/// Page numbers are 1-based. Extractors that cannot tell which page text
/// came from use [`PageNumber::Unknown`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(untagged)]
pub enum PageNumber {
    /// A 1-based page number.
    Known(u32),
    /// The page could not be determined.
    Unknown,
}

impl PageNumber {
    /// Return the page number if known.
    pub fn get(self) -> Option<u32> {
        match self {
            PageNumber::Known(n) => Some(n),
            PageNumber::Unknown => None,
        }
    }
}

impl From<Option<u32>> for PageNumber {
    fn from(value: Option<u32>) -> Self {
        value.map_or(PageNumber::Unknown, PageNumber::Known)
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageNumber::Known(n) => write!(f, "{n}"),
            PageNumber::Unknown => f.write_str("N/A"),
        }
    }
}

/// A single page of extracted text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    /// The raw extracted text.
    pub text: String,
    /// The page number within the owning document.
    pub number: PageNumber,
    /// The identifier of the owning [`Document`].
    pub document: String,
}

/// A source document: a file name and its pages in reading order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// The document identifier (its file name).
    pub name: String,
    /// The pages of the document in reading order.
    pub pages: Vec<Page>,
}

impl Document {
    /// Create a document from page texts, numbering pages from 1.
    pub fn from_pages<I, S>(name: impl Into<String>, pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| Page {
                text: text.into(),
                number: PageNumber::Known(i as u32 + 1),
                document: name.clone(),
            })
            .collect();
        Self { name, pages }
    }

    /// Total number of characters across all pages.
    pub fn char_count(&self) -> usize {
        self.pages.iter().map(|p| p.text.chars().count()).sum()
    }
}

/// A contiguous span of text from one document, ready for embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// The chunk text.
    pub text: String,
    /// The file name of the owning document.
    pub source_document: String,
    /// The page the chunk starts on.
    pub page: PageNumber,
    /// Position of the chunk within its document, in reading order.
    pub chunk_index: usize,
    /// Free-form document classification inherited from the pipeline config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
}

/// A [`Chunk`] with its embedding vector. Identity is its position in the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    /// The chunk and its provenance.
    pub chunk: Chunk,
    /// The embedding of `chunk.text`.
    pub vector: Vec<f32>,
}

/// A [`VectorRecord`] returned from a search, annotated with its distance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    /// The matched record.
    pub record: VectorRecord,
    /// Distance to the query vector (lower is more relevant).
    pub score: f32,
}

/// The externally visible shape of one retrieval hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    /// The chunk text.
    pub text: String,
    /// The file name of the source document.
    pub source_document: String,
    /// The page the chunk starts on.
    pub page: PageNumber,
    /// Distance to the query (lower is more relevant).
    pub score: f32,
}

impl From<ScoredRecord> for QueryResult {
    fn from(scored: ScoredRecord) -> Self {
        let chunk = scored.record.chunk;
        Self {
            text: chunk.text,
            source_document: chunk.source_document,
            page: chunk.page,
            score: scored.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pages_numbers_from_one() {
        let doc = Document::from_pages("guide.pdf", ["first", "second"]);
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[0].number, PageNumber::Known(1));
        assert_eq!(doc.pages[1].number, PageNumber::Known(2));
        assert!(doc.pages.iter().all(|p| p.document == "guide.pdf"));
        assert_eq!(doc.char_count(), 11);
    }

    #[test]
    fn page_number_serializes_as_number_or_null() {
        assert_eq!(serde_json::to_string(&PageNumber::Known(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&PageNumber::Unknown).unwrap(), "null");
        let parsed: PageNumber = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, PageNumber::Unknown);
        assert_eq!(PageNumber::Unknown.to_string(), "N/A");
    }
}
