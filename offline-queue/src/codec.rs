//! Reversible transform between captured photo bytes and the text kept in the queue

use crate::error::{QueueError, QueueResult};
use crate::models::PendingPhoto;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Binary upload payload reconstructed from a queued photo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPhoto {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

/// Encodes binary data as standard base64
pub fn encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Lowercase hex SHA-256 of `data`
pub fn checksum(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Decodes text produced by [`encode`]. A `data:<mime>;base64,` prefix is tolerated.
pub fn decode_text(text: &str) -> QueueResult<Vec<u8>> {
    let payload = match text.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| QueueError::CorruptEncoding("data URL without payload".to_string()))?,
        None => text,
    };

    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| QueueError::CorruptEncoding(format!("invalid base64: {}", e)))
}

/// Rebuilds the upload payload of a queued photo
pub fn decode(photo: &PendingPhoto) -> QueueResult<DecodedPhoto> {
    let bytes = decode_text(&photo.encoded_payload)?;

    if let Some(expected) = &photo.checksum {
        let actual = checksum(&bytes);
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(QueueError::CorruptEncoding(format!(
                "checksum mismatch for {}: expected {}, got {}",
                photo.id, expected, actual
            )));
        }
    }

    Ok(DecodedPhoto {
        bytes,
        file_name: photo.file_name.clone(),
        mime_type: photo.mime_type.clone(),
    })
}
