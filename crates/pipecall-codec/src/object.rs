use bincode::Options;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CodecError, Result};

/// Strategy that turns typed values into frame payloads and back.
///
/// Client and server must use the same codec; nothing on the wire identifies it.
pub trait ObjectCodec: Send + Sync + 'static {
    /// Short name used in errors and log events.
    fn name(&self) -> &'static str;

    /// Serialize `value` into a frame payload.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes>;

    /// Deserialize a frame payload into `T`.
    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T>;

    /// Emit a debug event describing a payload that was just read or written.
    fn log_payload(&self, op: &'static str, payload: &[u8]) {
        tracing::debug!(
            codec = self.name(),
            op,
            length = payload.len(),
            bytes = ?payload,
            "object payload"
        );
    }
}

/// Opaque binary payloads produced by `bincode`.
///
/// Integers use fixed-width little-endian encoding and trailing bytes are
/// rejected, so decoding into the wrong type fails instead of silently
/// reading a prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    const NAME: &'static str = "binary";

    fn options() -> impl Options {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .reject_trailing_bytes()
    }
}

impl ObjectCodec for BinaryCodec {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        Self::options()
            .serialize(value)
            .map(Bytes::from)
            .map_err(|err| CodecError::serialize(Self::NAME, err))
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        Self::options()
            .deserialize(payload)
            .map_err(|err| CodecError::deserialize(Self::NAME, err))
    }
}

/// Character encoding used for JSON text on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
        }
    }

    /// Encode `text` into bytes. No byte-order mark is written.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            TextEncoding::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
        }
    }

    /// Decode bytes produced by [`TextEncoding::encode`].
    pub fn decode(&self, bytes: &[u8]) -> std::result::Result<String, String> {
        let from_units = |to_unit: fn([u8; 2]) -> u16| {
            if bytes.len() % 2 != 0 {
                return Err(format!(
                    "odd byte count ({}) for {}",
                    bytes.len(),
                    self.as_str()
                ));
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| to_unit([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units).map_err(|err| err.to_string())
        };

        match self {
            TextEncoding::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|err| err.to_string()),
            TextEncoding::Utf16Le => from_units(u16::from_le_bytes),
            TextEncoding::Utf16Be => from_units(u16::from_be_bytes),
        }
    }
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "utf-16le" | "utf16le" | "utf-16" | "utf16" => Ok(TextEncoding::Utf16Le),
            "utf-16be" | "utf16be" => Ok(TextEncoding::Utf16Be),
            other => Err(format!("unsupported text encoding: {other}")),
        }
    }
}

/// Compact JSON text in a configurable character encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    encoding: TextEncoding,
}

impl JsonCodec {
    const NAME: &'static str = "json";

    /// JSON codec with UTF-8 text.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoding(encoding: TextEncoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }
}

impl ObjectCodec for JsonCodec {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        let json =
            serde_json::to_string(value).map_err(|err| CodecError::serialize(Self::NAME, err))?;
        Ok(Bytes::from(self.encoding.encode(&json)))
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        let json = self
            .encoding
            .decode(payload)
            .map_err(|err| CodecError::deserialize(Self::NAME, err))?;
        serde_json::from_str(&json).map_err(|err| CodecError::deserialize(Self::NAME, err))
    }

    fn log_payload(&self, op: &'static str, payload: &[u8]) {
        match self.encoding.decode(payload) {
            Ok(json) => tracing::debug!(
                codec = Self::NAME,
                op,
                length = payload.len(),
                encoding = %self.encoding,
                json = %json,
                "object payload"
            ),
            Err(_) => tracing::debug!(
                codec = Self::NAME,
                op,
                length = payload.len(),
                bytes = ?payload,
                "object payload (undecodable text)"
            ),
        }
    }
}
