//! Patient-name extraction from report PDFs.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ExtractError;
use crate::reports::names::{self, NameSource};
use crate::reports::recognizer::{PersonRecognizer, RuleRecognizer};

/// Result of a name extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub patient_name: String,
    pub source: NameSource,
}

/// Extracts the patient name from a report PDF and its original file name.
#[derive(Clone)]
pub struct NameExtractor {
    recognizer: Arc<dyn PersonRecognizer>,
}

impl NameExtractor {
    pub fn new(recognizer: Arc<dyn PersonRecognizer>) -> Self {
        Self { recognizer }
    }

    /// Rule recogniser, plus the given-name lexicon at `model_path` if present.
    pub fn with_model(model_path: &Path) -> Self {
        Self::new(Arc::new(RuleRecognizer::from_optional_lexicon(model_path)))
    }

    /// Extract from PDF bytes. CPU-bound; callers on the runtime should use
    /// [`NameExtractor::extract_blocking`].
    pub fn extract(&self, pdf: &[u8], original_filename: &str) -> Extraction {
        if names::is_ag_diagnostics_name(original_filename) {
            let (patient_name, source) =
                names::extract_patient_name(None, original_filename, self.recognizer.as_ref());
            return Extraction {
                patient_name,
                source,
            };
        }

        let pages = match pdf_pages(pdf) {
            Ok(pages) => Some(pages),
            Err(e) => {
                warn!(file = original_filename, error = %e, "PDF text unreadable, using file name");
                None
            }
        };

        let (patient_name, source) = names::extract_patient_name(
            pages.as_deref(),
            original_filename,
            self.recognizer.as_ref(),
        );
        Extraction {
            patient_name,
            source,
        }
    }

    /// Run [`NameExtractor::extract`] on the blocking pool.
    pub async fn extract_blocking(
        &self,
        pdf: Vec<u8>,
        original_filename: String,
    ) -> Result<Extraction, ExtractError> {
        let extractor = self.clone();
        tokio::task::spawn_blocking(move || extractor.extract(&pdf, &original_filename))
            .await
            .map_err(|e| ExtractError::Task(e.to_string()))
    }
}

/// Text of each page, split on form feeds emitted between pages.
fn pdf_pages(pdf: &[u8]) -> Result<Vec<String>, ExtractError> {
    // pdf-extract panics on some malformed font tables.
    let text = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(pdf)
    }))
    .map_err(|_| ExtractError::Pdf("PDF parser panicked".into()))?
    .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let pages: Vec<String> = text.split('\u{c}').map(str::to_string).collect();
    debug!(pages = pages.len(), chars = text.len(), "Extracted PDF text");
    Ok(pages)
}
