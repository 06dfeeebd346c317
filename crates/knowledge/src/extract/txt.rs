//! Plain text decoding.

use super::Extraction;

/// Decode as UTF-8, falling back to Latin-1 so no byte sequence is rejected.
pub(super) fn extract_txt(bytes: &[u8]) -> Extraction {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            tracing::debug!("Text is not valid UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    };

    Extraction {
        text,
        ..Default::default()
    }
}
