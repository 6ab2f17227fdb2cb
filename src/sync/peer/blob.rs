use base64::Engine;
use thiserror::Error;

/// Why a pasted connection blob could not be used
#[derive(Debug, Error)]
pub enum SignalBlobError {
    #[error("nothing was pasted")]
    Empty,

    #[error("blob is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("blob is not valid UTF-8")]
    NotUtf8,

    #[error("blob does not contain a session description")]
    NotDescription,
}

/// Encode a session description as a single line for copy/paste
pub fn encode_blob(description: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(description)
}

/// Decode a pasted blob back into the session description JSON.
///
/// Raw JSON is accepted as well, so a description copied from elsewhere
/// can be pasted directly. Whitespace picked up by chat clients is ignored.
pub fn decode_blob(blob: &str) -> Result<String, SignalBlobError> {
    let trimmed = blob.trim();
    if trimmed.is_empty() {
        return Err(SignalBlobError::Empty);
    }

    let json = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
        String::from_utf8(bytes).map_err(|_| SignalBlobError::NotUtf8)?
    };

    let looks_like_description = serde_json::from_str::<serde_json::Value>(&json)
        .ok()
        .and_then(|v| v.get("sdp").map(serde_json::Value::is_string))
        .unwrap_or(false);

    if !looks_like_description {
        return Err(SignalBlobError::NotDescription);
    }

    Ok(json)
}
