//! OCR fallback for image-only content.
//!
//! Images are recognized under an ordered list of page segmentation profiles.
//! Each attempt goes through a quality gate and the first passing profile
//! wins. An image whose every attempt fails contributes no text; that is
//! logged and never fails the document.
//!
//! Accepted text is tagged with [`OCR_MARKER`]. Anything that measures text
//! (chunk planning, emptiness checks) must go through [`strip_ocr_markers`]
//! or [`effective_len`] so the marker is never counted as content.

mod tesseract;

pub use tesseract::TesseractEngine;

use crate::config::OcrConfig;
use crate::error::KnowledgeResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Prefix for every block of OCR-derived text.
pub const OCR_MARKER: &str = "=== Text extracted from images using OCR ===\n";

/// Page segmentation profile, tried in [`OcrProfile::ORDERED`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrProfile {
    /// Fully automatic page segmentation
    Default,
    /// A single uniform block of text
    SingleBlock,
    /// A single column of text of variable sizes
    VariableColumn,
    /// As much text as possible in no particular order
    SparseText,
}

impl OcrProfile {
    pub const ORDERED: [OcrProfile; 4] = [
        OcrProfile::Default,
        OcrProfile::SingleBlock,
        OcrProfile::VariableColumn,
        OcrProfile::SparseText,
    ];

    /// Tesseract `--psm` value.
    pub fn page_segmentation_mode(&self) -> u8 {
        match self {
            OcrProfile::Default => 3,
            OcrProfile::SingleBlock => 6,
            OcrProfile::VariableColumn => 4,
            OcrProfile::SparseText => 11,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OcrProfile::Default => "default",
            OcrProfile::SingleBlock => "single_block",
            OcrProfile::VariableColumn => "variable_column",
            OcrProfile::SparseText => "sparse_text",
        }
    }
}

impl fmt::Display for OcrProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recognizer that turns encoded image bytes into text.
///
/// Called from blocking extraction threads, so implementations are synchronous.
pub trait OcrEngine: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn recognize(&self, image: &[u8], profile: OcrProfile) -> KnowledgeResult<String>;
}

/// Whether recognized text is usable: enough non-whitespace length and at
/// least one alphanumeric character.
pub fn passes_quality_gate(text: &str, min_text_chars: usize) -> bool {
    let trimmed = text.trim();
    trimmed.chars().count() >= min_text_chars && trimmed.chars().any(char::is_alphanumeric)
}

/// Prefix OCR output with the marker.
pub fn tag_ocr_text(text: &str) -> String {
    format!("{}{}", OCR_MARKER, text)
}

/// Remove every OCR marker from a text.
pub fn strip_ocr_markers(text: &str) -> String {
    text.replace(OCR_MARKER, "")
}

/// Length in characters, markers excluded.
pub fn effective_len(text: &str) -> usize {
    let markers = text.matches(OCR_MARKER).count();
    text.chars().count() - markers * OCR_MARKER.chars().count()
}

/// Whether anything besides markers and whitespace is present.
pub fn has_meaningful_content(text: &str) -> bool {
    !strip_ocr_markers(text).trim().is_empty()
}

/// Runs the profile sequence against an optional engine.
#[derive(Debug, Clone)]
pub struct OcrFallback {
    engine: Option<Arc<dyn OcrEngine>>,
    min_text_chars: usize,
}

impl OcrFallback {
    pub fn new(engine: Arc<dyn OcrEngine>, min_text_chars: usize) -> Self {
        Self {
            engine: Some(engine),
            min_text_chars,
        }
    }

    /// Images are still counted but never recognized.
    pub fn disabled() -> Self {
        Self {
            engine: None,
            min_text_chars: 0,
        }
    }

    /// Build from a base's `ocr` section, backed by the tesseract CLI.
    pub fn from_config(config: &OcrConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        Self::new(
            Arc::new(TesseractEngine::from_config(config)),
            config.min_text_chars,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.engine.is_some()
    }

    /// Recognize one image. Returns the accepted text, untagged, or `None`.
    pub fn recognize(&self, image: &[u8], label: &str) -> Option<String> {
        let engine = self.engine.as_ref()?;

        for profile in OcrProfile::ORDERED {
            match engine.recognize(image, profile) {
                Ok(text) if passes_quality_gate(&text, self.min_text_chars) => {
                    let text = text.trim().to_string();
                    tracing::debug!(
                        image = label,
                        profile = %profile,
                        chars = text.chars().count(),
                        "OCR accepted"
                    );
                    return Some(text);
                }
                Ok(text) => {
                    tracing::debug!(
                        image = label,
                        profile = %profile,
                        chars = text.trim().chars().count(),
                        "OCR output rejected by quality gate"
                    );
                }
                Err(e) => {
                    tracing::debug!(image = label, profile = %profile, "OCR attempt failed: {}", e);
                }
            }
        }

        tracing::warn!(
            image = label,
            engine = engine.name(),
            "No OCR profile produced usable text; image skipped"
        );
        None
    }
}
