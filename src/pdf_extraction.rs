use lopdf::Document;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("could not read PDF: {0}")]
    ExtractionFailed(String),

    #[error("PDF contains no extractable text")]
    NoTextFound,
}

impl ExtractionError {
    pub fn user_message(&self) -> String {
        match self {
            ExtractionError::ExtractionFailed(_) => {
                "The uploaded file could not be read as a PDF. Please upload a valid, unencrypted PDF.".to_string()
            }
            ExtractionError::NoTextFound => {
                "No text could be extracted from the PDF. Scanned or image-only documents are not supported."
                    .to_string()
            }
        }
    }
}

/// Extract plain text from every page of a PDF
pub fn extract_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let document = Document::load_mem(bytes).map_err(|e| {
        warn!(error = %e, size_bytes = bytes.len(), "Failed to parse PDF");
        ExtractionError::ExtractionFailed(e.to_string())
    })?;

    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(ExtractionError::NoTextFound);
    }

    let text = document
        .extract_text(&page_numbers)
        .map_err(|e| ExtractionError::ExtractionFailed(e.to_string()))?;

    let text = text.trim();
    if text.is_empty() {
        return Err(ExtractionError::NoTextFound);
    }

    debug!(
        pages = page_numbers.len(),
        text_length = text.len(),
        "Extracted text from PDF"
    );
    Ok(text.to_string())
}

/// `extract_text` on the blocking thread pool
pub async fn extract_text_blocking(bytes: Vec<u8>) -> Result<String, ExtractionError> {
    tokio::task::spawn_blocking(move || extract_text(&bytes))
        .await
        .map_err(|e| ExtractionError::ExtractionFailed(format!("extraction task failed: {}", e)))?
}
