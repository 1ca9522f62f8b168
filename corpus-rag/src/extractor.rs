//! Document text extraction.
//!
//! The [`Extractor`] trait turns a file into a [`Document`] with ordered,
//! numbered pages. Two implementations are provided:
//!
//! - [`PdfExtractor`]: page-by-page PDF text via `lopdf` (feature `pdf`)
//! - [`TextExtractor`]: plain UTF-8 text, pages separated by form feeds

use std::path::Path;

use tracing::debug;

use crate::document::Document;
use crate::error::{RagError, Result};

/// A capability that extracts page text from a document file.
///
/// Extraction is blocking work; callers on an async runtime should run it
/// on a blocking thread.
pub trait Extractor: Send + Sync {
    /// File extensions (lower-case, without the dot) this extractor accepts.
    fn extensions(&self) -> &[&str];

    /// Extract the pages of the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Extraction`] if the file is unreadable, corrupt,
    /// or cannot be parsed.
    fn extract(&self, path: &Path) -> Result<Document>;

    /// Whether `path` has an extension this extractor accepts.
    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions().iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

/// The identifier used for a document: its file name.
pub(crate) fn document_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn extraction_error(path: &Path, message: impl Into<String>) -> RagError {
    RagError::Extraction { document: document_name(path), message: message.into() }
}

/// Extracts plain UTF-8 text files.
///
/// Form feed characters (`\x0c`) separate pages, matching the page breaks
/// emitted by `pdftotext`. A file without form feeds is a single page.
#[derive(Debug, Clone, Default)]
pub struct TextExtractor {
    extensions: Vec<&'static str>,
}

impl TextExtractor {
    /// Create an extractor accepting `.txt` files.
    pub fn new() -> Self {
        Self { extensions: vec!["txt"] }
    }

    /// Accept a different set of extensions.
    pub fn with_extensions(mut self, extensions: &[&'static str]) -> Self {
        self.extensions = extensions.to_vec();
        self
    }
}

impl Extractor for TextExtractor {
    fn extensions(&self) -> &[&str] {
        &self.extensions
    }

    fn extract(&self, path: &Path) -> Result<Document> {
        let content =
            std::fs::read_to_string(path).map_err(|e| extraction_error(path, e.to_string()))?;
        let document = Document::from_pages(document_name(path), content.split('\x0c'));
        debug!(document = %document.name, pages = document.pages.len(), "extracted text file");
        Ok(document)
    }
}

#[cfg(feature = "pdf")]
pub use pdf::PdfExtractor;

#[cfg(feature = "pdf")]
mod pdf {
    use std::path::Path;

    use tracing::{debug, warn};

    use super::{Extractor, document_name, extraction_error};
    use crate::document::{Document, Page, PageNumber};
    use crate::error::Result;

    /// Extracts PDF text page by page using `lopdf`.
    ///
    /// Pages whose content streams cannot be decoded are logged and skipped.
    /// A PDF that yields no text at all is an extraction error.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct PdfExtractor;

    impl PdfExtractor {
        /// Create a new PDF extractor.
        pub fn new() -> Self {
            Self
        }
    }

    impl Extractor for PdfExtractor {
        fn extensions(&self) -> &[&str] {
            &["pdf"]
        }

        fn extract(&self, path: &Path) -> Result<Document> {
            let name = document_name(path);
            let pdf = lopdf::Document::load(path)
                .map_err(|e| extraction_error(path, format!("failed to parse PDF: {e}")))?;

            let mut pages = Vec::new();
            for page_number in pdf.get_pages().into_keys() {
                match pdf.extract_text(&[page_number]) {
                    Ok(text) => pages.push(Page {
                        text,
                        number: PageNumber::Known(page_number),
                        document: name.clone(),
                    }),
                    Err(e) => {
                        warn!(
                            document = %name,
                            page = page_number,
                            error = %e,
                            "skipping unreadable page"
                        );
                    }
                }
            }

            if pages.iter().all(|p| p.text.trim().is_empty()) {
                return Err(extraction_error(path, "no extractable text"));
            }

            debug!(document = %name, pages = pages.len(), "extracted PDF");
            Ok(Document { name, pages })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::document::PageNumber;

    #[test]
    fn text_extractor_splits_pages_on_form_feed() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("notes.txt");
        fs::write(&path, "page one\x0cpage two\x0cpage three").unwrap();

        let doc = TextExtractor::new().extract(&path).unwrap();
        assert_eq!(doc.name, "notes.txt");
        assert_eq!(doc.pages.len(), 3);
        assert_eq!(doc.pages[2].text, "page three");
        assert_eq!(doc.pages[2].number, PageNumber::Known(3));
    }

    #[test]
    fn text_extractor_reports_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        let err = TextExtractor::new().extract(&temp.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, RagError::Extraction { document, .. } if document == "absent.txt"));
    }

    #[test]
    fn accepts_matches_extension_case_insensitively() {
        let extractor = TextExtractor::new().with_extensions(&["pdf", "txt"]);
        assert!(extractor.accepts(Path::new("a/Guide.PDF")));
        assert!(extractor.accepts(Path::new("notes.txt")));
        assert!(!extractor.accepts(Path::new("image.png")));
        assert!(!extractor.accepts(Path::new("README")));
    }

    #[cfg(feature = "pdf")]
    #[test]
    fn pdf_extractor_rejects_corrupt_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("broken.pdf");
        fs::write(&path, b"not a pdf at all").unwrap();

        let err = PdfExtractor::new().extract(&path).unwrap_err();
        assert!(matches!(err, RagError::Extraction { document, .. } if document == "broken.pdf"));
    }
}
