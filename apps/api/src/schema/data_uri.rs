//! `data:` URI parsing for media inputs (recorded audio).

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataUriError {
    #[error("missing 'data:' prefix")]
    MissingScheme,
    #[error("missing ',' separating header and payload")]
    MissingPayloadSeparator,
    #[error("payload is not base64-encoded")]
    NotBase64,
    #[error("invalid MIME type '{0}'")]
    InvalidMimeType(String),
    #[error("payload is empty")]
    EmptyPayload,
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// A parsed `data:<mime>[;param]*;base64,<payload>` URI.
///
/// Borrows from the source string; the payload stays base64 so it can be
/// forwarded to the model without a decode/encode round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUri<'a> {
    pub mime_type: &'a str,
    pub parameters: Vec<&'a str>,
    pub payload: &'a str,
    /// Size of the decoded payload.
    pub byte_len: usize,
}

impl<'a> DataUri<'a> {
    pub fn parse(input: &'a str) -> Result<Self, DataUriError> {
        let rest = input
            .strip_prefix("data:")
            .ok_or(DataUriError::MissingScheme)?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or(DataUriError::MissingPayloadSeparator)?;

        let mut parts: Vec<&str> = header.split(';').collect();
        if parts.last().map(|p| p.trim()) != Some("base64") {
            return Err(DataUriError::NotBase64);
        }
        parts.pop();

        let mime_type = parts.first().copied().unwrap_or_default().trim();
        if !is_mime_type(mime_type) {
            return Err(DataUriError::InvalidMimeType(mime_type.to_string()));
        }

        if payload.is_empty() {
            return Err(DataUriError::EmptyPayload);
        }
        let byte_len = STANDARD.decode(payload)?.len();

        Ok(Self {
            mime_type,
            parameters: parts[1..].to_vec(),
            payload,
            byte_len,
        })
    }
}

fn is_mime_type(s: &str) -> bool {
    let Some((kind, subtype)) = s.split_once('/') else {
        return false;
    };
    let token = |t: &str| {
        !t.is_empty()
            && t.chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$&^_.+-".contains(c))
    };
    token(kind) && token(subtype)
}
