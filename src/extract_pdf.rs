//! Text extraction for base64-encoded PDF uploads.
//!
//! Text comes from `pdf-extract`; the page count is read from the page
//! tree with `lopdf`, which also rejects malformed files before text
//! extraction runs.

use base64::Engine;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("PDF payload is empty")]
    Empty,
    #[error("invalid base64 PDF payload: {0}")]
    InvalidBase64(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PdfText {
    pub text: String,
    pub num_pages: usize,
}

/// Decode a base64 payload, accepting an optional `data:...;base64,` prefix.
pub fn decode_base64_pdf(payload: &str) -> Result<Vec<u8>, PdfError> {
    let trimmed = payload.trim();
    let data = match trimmed.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => trimmed,
    };
    if data.is_empty() {
        return Err(PdfError::Empty);
    }
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| PdfError::InvalidBase64(e.to_string()))
}

pub fn extract_pdf_text(bytes: &[u8]) -> Result<PdfText, PdfError> {
    if bytes.is_empty() {
        return Err(PdfError::Empty);
    }
    let document =
        lopdf::Document::load_mem(bytes).map_err(|e| PdfError::Pdf(e.to_string()))?;
    let num_pages = document.get_pages().len();
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| PdfError::Pdf(e.to_string()))?;
    Ok(PdfText { text, num_pages })
}

/// Decode and extract in one step.
pub fn parse_pdf_base64(payload: &str) -> Result<PdfText, PdfError> {
    let bytes = decode_base64_pdf(payload)?;
    extract_pdf_text(&bytes)
}
