//! Values which can be sent, and how they turn into text on the wire.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One argument to a send.
///
/// Each variant is turned into text, the texts are joined by a separator,
/// and the result (plus a line ending) is written as utf8.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Raw bytes, decoded as utf8 (lossily) and trimmed.
    Bytes(Vec<u8>),

    /// A list of values, sent as a JSON array.
    Sequence(Vec<Value>),

    /// Key value pairs, sent as a JSON object.
    Mapping(Map<String, Value>),

    /// Anything else, sent as its trimmed text form.
    Scalar(String),
}

impl Payload {
    /// The text this payload is sent as.
    pub fn normalize(&self) -> String {
        match self {
            Payload::Bytes(bytes) => String::from_utf8_lossy(bytes).trim().to_owned(),
            Payload::Sequence(values) => Value::Array(values.clone()).to_string(),
            Payload::Mapping(map) => Value::Object(map.clone()).to_string(),
            Payload::Scalar(text) => text.trim().to_owned(),
        }
    }

    /// A scalar from anything printable.
    pub fn scalar<T: ToString>(value: T) -> Self {
        Self::Scalar(value.to_string())
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Scalar(text.into())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Scalar(text)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Payload {
    fn from(bytes: &[u8; N]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(values) => Self::Sequence(values),
            Value::Object(map) => Self::Mapping(map),
            Value::String(text) => Self::Scalar(text),
            other => Self::Scalar(other.to_string()),
        }
    }
}

/// How the payloads of one send are put together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Appended after the joined payloads.
    pub ending: String,

    /// Put between payloads.
    pub separator: String,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            ending: "\r\n".into(),
            separator: " ".into(),
        }
    }
}

impl SendOptions {
    /// Default separator, but a custom line ending.
    pub fn ending<S: AsRef<str>>(ending: S) -> Self {
        Self {
            ending: ending.as_ref().into(),
            ..Default::default()
        }
    }

    /// Turn payloads into the bytes to put on the wire.
    pub fn encode(&self, payloads: &[Payload]) -> Vec<u8> {
        let mut line = payloads.iter().map(Payload::normalize).join(&self.separator);
        line += &self.ending;

        line.into_bytes()
    }
}
