//! Key/value codecs selected per cluster.
//!
//! Requests and responses carry keys and payloads in text form. The cluster's configured
//! [`SerdeFormat`] decides how that text maps to the bytes stored on the broker.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The closed set of supported record formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerdeFormat {
    /// UTF-8 text stored as-is
    #[default]
    String,
    /// Arbitrary bytes, exchanged as standard base64 text
    Binary,
    /// JSON documents, stored compact
    Json,
}

impl SerdeFormat {
    pub fn codec(self) -> &'static dyn Codec {
        match self {
            SerdeFormat::String => &StringCodec,
            SerdeFormat::Binary => &BinaryCodec,
            SerdeFormat::Json => &JsonCodec,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SerdeFormat::String => "string",
            SerdeFormat::Binary => "binary",
            SerdeFormat::Json => "json",
        }
    }
}

impl fmt::Display for SerdeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of a record a codec was applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageField {
    Key,
    Payload,
    /// Header values, always exchanged as UTF-8 text
    Headers,
}

impl MessageField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageField::Key => "key",
            MessageField::Payload => "payload",
            MessageField::Headers => "headers",
        }
    }
}

impl fmt::Display for MessageField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} is not valid {format}: {reason}")]
pub struct CodecError {
    pub field: MessageField,
    pub format: SerdeFormat,
    pub reason: String,
}

impl CodecError {
    fn new(field: MessageField, format: SerdeFormat, reason: impl fmt::Display) -> Self {
        Self {
            field,
            format,
            reason: reason.to_string(),
        }
    }

    pub fn root_cause(&self) -> String {
        format!("serialization.{}", self.format)
    }
}

/// Converts between the text exchanged with callers and the bytes stored on the broker
pub trait Codec: Send + Sync {
    fn format(&self) -> SerdeFormat;

    fn serialize(&self, field: MessageField, text: &str) -> Result<Vec<u8>, CodecError>;

    fn deserialize(&self, field: MessageField, bytes: &[u8]) -> Result<String, CodecError>;
}

pub struct StringCodec;

impl Codec for StringCodec {
    fn format(&self) -> SerdeFormat {
        SerdeFormat::String
    }

    fn serialize(&self, _field: MessageField, text: &str) -> Result<Vec<u8>, CodecError> {
        Ok(text.as_bytes().to_vec())
    }

    fn deserialize(&self, field: MessageField, bytes: &[u8]) -> Result<String, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::new(field, self.format(), e))
    }
}

pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn format(&self) -> SerdeFormat {
        SerdeFormat::Binary
    }

    fn serialize(&self, field: MessageField, text: &str) -> Result<Vec<u8>, CodecError> {
        STANDARD
            .decode(text)
            .map_err(|e| CodecError::new(field, self.format(), e))
    }

    fn deserialize(&self, _field: MessageField, bytes: &[u8]) -> Result<String, CodecError> {
        Ok(STANDARD.encode(bytes))
    }
}

pub struct JsonCodec;

impl Codec for JsonCodec {
    fn format(&self) -> SerdeFormat {
        SerdeFormat::Json
    }

    fn serialize(&self, field: MessageField, text: &str) -> Result<Vec<u8>, CodecError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| CodecError::new(field, self.format(), e))?;
        serde_json::to_vec(&value).map_err(|e| CodecError::new(field, self.format(), e))
    }

    fn deserialize(&self, field: MessageField, bytes: &[u8]) -> Result<String, CodecError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| CodecError::new(field, self.format(), e))?;
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_codec_rejects_invalid_utf8_on_read() {
        let codec = SerdeFormat::String.codec();
        let err = codec
            .deserialize(MessageField::Key, &[0xff, 0xfe])
            .unwrap_err();

        assert_eq!(err.field, MessageField::Key);
        assert_eq!(err.root_cause(), "serialization.string");
    }

    #[test]
    fn binary_codec_exchanges_base64() {
        let codec = SerdeFormat::Binary.codec();

        let bytes = codec.serialize(MessageField::Payload, "AAEC/w==").unwrap();
        assert_eq!(bytes, vec![0x00, 0x01, 0x02, 0xff]);
        assert_eq!(
            codec.deserialize(MessageField::Payload, &bytes).unwrap(),
            "AAEC/w=="
        );

        let err = codec
            .serialize(MessageField::Payload, "not base64!")
            .unwrap_err();
        assert_eq!(err.field, MessageField::Payload);
        assert_eq!(err.format, SerdeFormat::Binary);
    }

    #[test]
    fn json_codec_compacts_and_validates() {
        let codec = SerdeFormat::Json.codec();

        let bytes = codec
            .serialize(MessageField::Payload, "{ \"id\" : 7 }")
            .unwrap();
        assert_eq!(bytes, br#"{"id":7}"#.to_vec());

        let err = codec.serialize(MessageField::Key, "{broken").unwrap_err();
        assert_eq!(err.root_cause(), "serialization.json");
        assert!(err.to_string().starts_with("key is not valid json"));
    }

    #[test]
    fn format_names_match_configuration_spelling() {
        let format: SerdeFormat = serde_json::from_str("\"binary\"").unwrap();
        assert_eq!(format, SerdeFormat::Binary);
        assert_eq!(SerdeFormat::default(), SerdeFormat::String);
    }
}
