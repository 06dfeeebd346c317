//! Text extraction for pdf, docx and txt documents.
//!
//! Each format produces one text blob plus image counts. Embedded images are
//! handed to the OCR fallback and accepted text is appended as tagged blocks.
//! A document whose effective content is empty fails with
//! [`KnowledgeError::EmptyDocument`] instead of yielding an empty string.

mod docx;
mod pdf;
mod txt;

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::ocr::{has_meaningful_content, tag_ocr_text, OcrFallback};
use crate::types::DocumentFormat;

/// Separator between pages, paragraphs and blocks.
pub(crate) const BLOCK_SEPARATOR: &str = "\n\n";

/// Output of a successful extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Full text, OCR blocks carrying the marker
    pub text: String,
    /// Tables flattened into the text
    pub tables: usize,
    pub images_found: usize,
    pub images_recognized: usize,
    /// Page count, for paged formats
    pub pages: Option<usize>,
}

impl Extraction {
    /// Run one image through OCR, appending accepted text as a tagged block.
    pub(crate) fn recognize_image(&mut self, ocr: &OcrFallback, image: &[u8], label: &str) {
        self.images_found += 1;
        if let Some(text) = ocr.recognize(image, label) {
            self.images_recognized += 1;
            self.push_block(&tag_ocr_text(&text));
        }
    }

    /// Count an image that cannot be handed to OCR.
    pub(crate) fn skip_image(&mut self, label: &str, reason: &str) {
        self.images_found += 1;
        tracing::warn!(image = label, "Skipping OCR: {}", reason);
    }

    pub(crate) fn push_block(&mut self, block: &str) {
        if block.trim().is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push_str(BLOCK_SEPARATOR);
        }
        self.text.push_str(block);
    }
}

/// Extract a document, detecting the format from its name.
pub fn extract_file(name: &str, bytes: &[u8], ocr: &OcrFallback) -> KnowledgeResult<Extraction> {
    let format = DocumentFormat::from_name(name)?;
    extract(name, bytes, format, ocr)
}

/// Extract a document of a declared format.
pub fn extract(
    name: &str,
    bytes: &[u8],
    format: DocumentFormat,
    ocr: &OcrFallback,
) -> KnowledgeResult<Extraction> {
    let extraction = match format {
        DocumentFormat::Pdf => pdf::extract_pdf(name, bytes, ocr)?,
        DocumentFormat::Docx => docx::extract_docx(name, bytes, ocr)?,
        DocumentFormat::Txt => txt::extract_txt(bytes),
    };

    if !has_meaningful_content(&extraction.text) {
        return Err(KnowledgeError::EmptyDocument {
            name: name.to_string(),
            reason: empty_reason(format, &extraction, ocr),
        });
    }

    tracing::debug!(
        document = name,
        format = format.as_str(),
        chars = extraction.text.chars().count(),
        tables = extraction.tables,
        images_found = extraction.images_found,
        images_recognized = extraction.images_recognized,
        "Extracted document"
    );

    Ok(extraction)
}

fn empty_reason(format: DocumentFormat, extraction: &Extraction, ocr: &OcrFallback) -> String {
    let base = match format {
        DocumentFormat::Pdf => "No readable text found in PDF",
        DocumentFormat::Docx => "No readable text found in DOCX",
        DocumentFormat::Txt => "Text file is empty",
    };

    if extraction.images_found == 0 {
        base.to_string()
    } else if !ocr.is_enabled() {
        format!(
            "{} ({} image(s) found, OCR is disabled)",
            base, extraction.images_found
        )
    } else {
        format!(
            "{} ({} image(s) found, none produced usable OCR text)",
            base, extraction.images_found
        )
    }
}
