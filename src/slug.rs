//! Task id slugs.
//!
//! The task runtime names tasks by a 22-character slug: the 16 bytes of a
//! UUID in URL-safe base64 without padding. Job guids carry the UUID in
//! its hyphenated form instead, so both directions are needed.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};

/// Length of an encoded slug.
pub const SLUG_LEN: usize = 22;

/// Encode a task UUID as a slug.
pub fn encode(id: &Uuid) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

/// Decode a slug into the task UUID.
pub fn decode(slug: &str) -> IngestResult<Uuid> {
    if slug.len() != SLUG_LEN {
        return Err(IngestError::InvalidTaskId(slug.to_string()));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(slug)
        .map_err(|_| IngestError::InvalidTaskId(slug.to_string()))?;
    Uuid::from_slice(&bytes).map_err(|_| IngestError::InvalidTaskId(slug.to_string()))
}

/// Check if a string looks like a slug without decoding it.
pub fn is_slug(s: &str) -> bool {
    s.len() == SLUG_LEN
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
