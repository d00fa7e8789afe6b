use serde::{Deserialize, Serialize};

use crate::serial::{ReadOptions, SerialMessage, SerialMessageBytes};

/// How a blocking read should present what it got.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Decode {
    /// As the raw bytes.
    #[default]
    Bytes,

    /// As text, see [`ReadOptions`].
    Text(ReadOptions),
}

impl Decode {
    /// Text, cut at the given terminator and trimmed.
    pub fn text_until<S: AsRef<str>>(terminator: S) -> Self {
        Self::Text(ReadOptions::until(terminator))
    }

    pub(crate) fn apply(&self, bytes: &[u8]) -> Response {
        match self {
            Decode::Bytes => Response::Bytes(bytes.to_vec()),
            Decode::Text(read) => Response::Text(SerialMessage::decode(bytes, read).into_string()),
        }
    }
}

/// What a blocking read got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Raw bytes.
    Bytes(SerialMessageBytes),

    /// Decoded text.
    Text(String),
}

impl Response {
    /// Borrow the response as bytes, whichever form it has.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Response::Bytes(bytes) => bytes,
            Response::Text(text) => text.as_bytes(),
        }
    }

    /// Attempt to borrow the response as text.
    pub fn as_text(&self) -> Option<&str> {
        if let Self::Text(v) = self {
            Some(v)
        } else {
            None
        }
    }

    /// Unwrap the response as text, else panic.
    pub fn into_text(self) -> String {
        if let Self::Text(v) = self {
            v
        } else {
            panic!("Was not `Text`: {self:?}")
        }
    }

    /// Unwrap the response as bytes, else panic.
    pub fn into_bytes(self) -> SerialMessageBytes {
        if let Self::Bytes(v) = self {
            v
        } else {
            panic!("Was not `Bytes`: {self:?}")
        }
    }
}

/// A response being waited for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expected {
    /// Matches a frame with exactly these bytes.
    Bytes(SerialMessageBytes),

    /// Matches a frame which decodes to exactly this text.
    Text(String),
}

impl Expected {
    /// Expect some text.
    pub fn text<S: AsRef<str>>(text: S) -> Self {
        Self::Text(text.as_ref().into())
    }

    pub(crate) fn matches(&self, bytes: &[u8], read: &ReadOptions) -> bool {
        match self {
            Expected::Bytes(expected) => expected.as_slice() == bytes,
            Expected::Text(expected) => SerialMessage::decode(bytes, read).as_str() == expected,
        }
    }
}
