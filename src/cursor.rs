//! Opaque list cursors.
//!
//! A cursor is the URL-safe, unpadded base64 encoding of the name of the last
//! function on a page. Listing resumes strictly after that name, whether or
//! not it still exists.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("cursor is not valid base64: {0}")]
    Encoding(String),

    #[error("cursor does not decode to a function name")]
    NotUtf8,
}

pub fn encode(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

pub fn decode(token: &str) -> Result<String, CursorError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| CursorError::Encoding(e.to_string()))?;
    String::from_utf8(bytes).map_err(|_| CursorError::NotUtf8)
}
