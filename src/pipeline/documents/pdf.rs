use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

/// Byte stream in, per-page text out.
pub trait TextSource: Send + Sync {
    /// Whether this source can read the given file.
    fn accepts(&self, path: &Path) -> bool;

    /// Extract text per page. `Err` carries a human-readable reason.
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, String>;
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// PDF text extractor using the pdf-extract crate.
/// Handles digital PDFs with embedded text layers.
pub struct PdfTextExtractor;

impl TextSource for PdfTextExtractor {
    fn accepts(&self, path: &Path) -> bool {
        has_extension(path, "pdf")
    }

    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, String> {
        // pdf-extract panics on some malformed inputs.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(bytes)
        }));
        match result {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(format!("PDF parsing failed: {e}")),
            Err(_) => Err("PDF parser aborted on malformed input".into()),
        }
    }
}

/// Pre-extracted statement text. Pages are separated by form feeds.
pub struct PlainTextSource;

impl TextSource for PlainTextSource {
    fn accepts(&self, path: &Path) -> bool {
        has_extension(path, "txt")
    }

    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, String> {
        let text = std::str::from_utf8(bytes).map_err(|e| format!("Invalid UTF-8: {e}"))?;
        Ok(text.split('\u{c}').map(str::to_string).collect())
    }
}

/// Sources used by default: PDFs first, then plain text.
pub fn default_sources() -> Vec<Box<dyn TextSource>> {
    vec![Box::new(PdfTextExtractor), Box::new(PlainTextSource)]
}

/// Keep only the pages that carry the statement heading.
///
/// Returns the selected text and whether the marker was found. Without a
/// marker, or when no page carries it, the whole document is returned.
pub fn select_statement_pages(pages: &[String], marker: Option<&str>) -> (String, bool) {
    let whole = || pages.join("\n");
    let Some(marker) = marker.map(str::to_lowercase).filter(|m| !m.is_empty()) else {
        return (whole(), false);
    };

    let matching: Vec<&str> = pages
        .iter()
        .filter(|p| p.to_lowercase().contains(&marker))
        .map(String::as_str)
        .collect();

    if matching.is_empty() {
        (whole(), false)
    } else {
        (matching.join("\n"), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let result = PdfTextExtractor.extract_pages(b"not a pdf at all");
        assert!(result.is_err());
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        assert!(PdfTextExtractor.accepts(Path::new("a/30062022.PDF")));
        assert!(!PdfTextExtractor.accepts(Path::new("a/30062022.txt")));
        assert!(PlainTextSource.accepts(Path::new("a/30062022.txt")));
    }

    #[test]
    fn plain_text_splits_on_form_feed() {
        let out = PlainTextSource
            .extract_pages("cover\u{c}STATEMENT OF PROFIT OR LOSS\nRevenue 10".as_bytes())
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[1].starts_with("STATEMENT"));
    }

    #[test]
    fn plain_text_rejects_invalid_utf8() {
        assert!(PlainTextSource.extract_pages(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn selects_only_marker_pages() {
        let doc = pages(&[
            "Chairman's review",
            "Consolidated Income Statements\nRevenue 2,767,931",
            "Balance sheet",
        ]);
        let (text, matched) = select_statement_pages(&doc, Some("consolidated income statements"));
        assert!(matched);
        assert!(text.contains("Revenue 2,767,931"));
        assert!(!text.contains("Balance sheet"));
    }

    #[test]
    fn falls_back_to_whole_document_without_match() {
        let doc = pages(&["page one", "page two"]);
        let (text, matched) = select_statement_pages(&doc, Some("STATEMENT OF PROFIT OR LOSS"));
        assert!(!matched);
        assert_eq!(text, "page one\npage two");
    }
}
