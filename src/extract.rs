//! Source text extraction.
//!
//! Turns a file on disk into the plain UTF-8 text that gets chunked. PDF
//! screenplays go through `pdf-extract`, one `--- PAGE n ---` marker before
//! each page so retrieved chunks keep a page reference. Everything else must
//! already be UTF-8 text.

use std::path::Path;

use script_rag_core::error::{RagError, RagResult};

/// Read `path` and return its text.
///
/// # Errors
///
/// `IoFailure` if the file cannot be read, `Extraction` for a PDF that
/// cannot be parsed or a file that is not valid UTF-8.
pub fn extract_text_from_path(path: &Path) -> RagResult<String> {
    let bytes = std::fs::read(path).map_err(|e| RagError::io(path, e))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "extracting text");

    match extension.as_str() {
        "pdf" => extract_pdf(&bytes),
        _ => decode_utf8(path, bytes),
    }
}

/// Extract text from PDF bytes, marking each page.
pub fn extract_pdf(bytes: &[u8]) -> RagResult<String> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| RagError::Extraction(format!("PDF extraction failed: {}", e)))?;
    Ok(join_pages(&pages))
}

fn join_pages(pages: &[String]) -> String {
    let mut out = String::new();
    for (i, page) in pages.iter().enumerate() {
        let page = page.trim();
        if page.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("--- PAGE {} ---\n", i + 1));
        out.push_str(page);
        out.push('\n');
    }
    out
}

fn decode_utf8(path: &Path, bytes: Vec<u8>) -> RagResult<String> {
    String::from_utf8(bytes).map_err(|_| {
        RagError::Extraction(format!(
            "{} is not UTF-8 text; supported inputs are PDF and plain text",
            path.display()
        ))
    })
}
