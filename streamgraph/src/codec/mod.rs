//! Payload codecs.
//!
//! A codec turns a raw payload plus a content-type tag into structured JSON
//! data. Codecs must tell malformed input apart from I/O failures so the
//! driver can skip the former and retry the latter.

use serde_json::Value;

use crate::errors::CodecError;

/// Pluggable deserializer for record payloads.
#[cfg_attr(test, mockall::automock)]
pub trait Codec: Send + Sync {
    /// Returns true if the codec understands `content_type`.
    fn supports(&self, content_type: &str) -> bool;

    /// Decodes `payload` according to `content_type`.
    fn decode(&self, payload: &[u8], content_type: &str) -> Result<Value, CodecError>;
}

/// JSON codec accepting plain JSON, JSON-LD and Activity Streams media types.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Media types this codec decodes.
    pub const CONTENT_TYPES: [&'static str; 3] = [
        "application/json",
        "application/ld+json",
        "application/activity+json",
    ];

    /// Creates a new JSON codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Strips media type parameters (`; charset=utf-8`, `; profile=...`).
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

impl Codec for JsonCodec {
    fn supports(&self, content_type: &str) -> bool {
        let essence = essence(content_type);
        Self::CONTENT_TYPES.iter().any(|ct| *ct == essence)
    }

    fn decode(&self, payload: &[u8], content_type: &str) -> Result<Value, CodecError> {
        if !self.supports(content_type) {
            return Err(CodecError::Malformed(format!(
                "unsupported content type '{content_type}'"
            )));
        }
        serde_json::from_slice(payload).map_err(|e| {
            if e.is_io() {
                CodecError::Io(e.to_string())
            } else {
                CodecError::Malformed(e.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_supports_media_types() {
        let codec = JsonCodec::new();
        assert!(codec.supports("application/json"));
        assert!(codec.supports("application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\""));
        assert!(codec.supports("Application/Activity+JSON"));
        assert!(!codec.supports("text/turtle"));
    }

    #[test]
    fn test_decode_valid_json() {
        let value = JsonCodec.decode(br#"{"a": [1, 2]}"#, "application/json").unwrap();
        assert_eq!(value, json!({"a": [1, 2]}));
    }

    #[test]
    fn test_decode_malformed_json() {
        let err = JsonCodec.decode(b"{\"a\": ", "application/json").unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_unsupported_content_type_is_malformed() {
        let err = JsonCodec.decode(b"{}", "text/turtle").unwrap_err();
        assert!(matches!(err, CodecError::Malformed(ref m) if m.contains("text/turtle")));
    }
}
