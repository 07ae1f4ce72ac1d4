use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::types::DocumentKind;
use super::PipelineError;

/// Namespace for deterministic document ids (UUID v5 over content bytes).
const DOCUMENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a7e_93d4_4b0a_8e5f_1d2c_3b4a_5968);

/// Longest filename kept in metadata.
const MAX_FILENAME_CHARS: usize = 120;

/// Container format recognized from magic bytes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SniffedFormat {
    Pdf,
    Jpeg,
    Png,
    Tiff,
    Unknown,
}

impl SniffedFormat {
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Png | Self::Tiff)
    }
}

/// Detect the container format from magic bytes (NOT the declared type).
pub fn sniff_format(bytes: &[u8]) -> SniffedFormat {
    match &bytes[..bytes.len().min(8)] {
        // PDF: starts with %PDF
        [0x25, 0x50, 0x44, 0x46, ..] => SniffedFormat::Pdf,
        // JPEG: starts with FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => SniffedFormat::Jpeg,
        // PNG: starts with 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => SniffedFormat::Png,
        // TIFF: little-endian (49 49 2A 00) or big-endian (4D 4D 00 2A)
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => SniffedFormat::Tiff,
        _ => SniffedFormat::Unknown,
    }
}

/// Map a declared MIME type to the document family that handles it.
///
/// Parameters (`; charset=...`) and case are ignored. Anything other than
/// `image/*` or `application/pdf` is rejected.
pub fn classify_mime(mime_type: &str) -> Result<DocumentKind, PipelineError> {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "application/pdf" => Ok(DocumentKind::Pdf),
        m if m.starts_with("image/") && m.len() > "image/".len() => Ok(DocumentKind::Image),
        _ => Err(PipelineError::UnsupportedFormat(mime_type.to_string())),
    }
}

/// Compute SHA-256 content hash, base64-encoded
pub fn compute_content_hash(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Deterministic document id: identical bytes always get the same id.
pub fn document_id(bytes: &[u8]) -> Uuid {
    Uuid::new_v5(&DOCUMENT_ID_NAMESPACE, bytes)
}

/// Reduce an upload filename to a safe display name.
///
/// Keeps only the final path component, replaces spaces with underscores and
/// drops everything outside `[A-Za-z0-9_.-]`.
pub fn sanitize_filename(original: &str) -> String {
    let name = Path::new(original.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let clean: String = name
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .take(MAX_FILENAME_CHARS)
        .collect();

    if clean.trim_matches('.').is_empty() {
        "document".to_string()
    } else {
        clean
    }
}
