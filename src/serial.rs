use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Serial port related errors.
pub mod error;

/// The transport primitives the engine drives: opening, reading, writing, listing ports.
pub mod transport;

/// The message data type used for serial bytes.
pub type SerialMessageBytes = Vec<u8>;

/// The message data type used for serial text.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Deserialize, Serialize)]
pub struct SerialMessage(String);

impl SerialMessage {
    /// Create a serial message from bytes, ignoring any bad utf8 bytes.
    pub fn new_lossy<B: AsRef<[u8]>>(bytes: B) -> Self {
        Self(String::from_utf8_lossy(bytes.as_ref()).to_string())
    }

    /// Decode bytes the way received frames are presented as text.
    ///
    /// If a terminator is given and found, everything from its first occurrence onwards is cut.
    /// If `trim` is set, surrounding whitespace is removed afterwards.
    pub fn decode<B: AsRef<[u8]>>(bytes: B, read: &ReadOptions) -> Self {
        let Self(mut text) = Self::new_lossy(bytes);

        if let Some(terminator) = &read.terminator {
            if let Some(position) = text.find(terminator.as_str()) {
                text.truncate(position);
            }
        }

        if read.trim {
            text = text.trim().to_owned();
        }

        Self(text)
    }

    /// Turn the message (utf8) into bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0.into_bytes()
    }

    /// Turn the message into the contained string.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Borrowed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T: AsRef<str>> From<T> for SerialMessage {
    fn from(string_like: T) -> Self {
        Self(string_like.as_ref().into())
    }
}

impl Display for SerialMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0.chars().take(48).collect::<String>();

        write!(f, "{}", s.trim())
    }
}

/// How received bytes are turned into text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Cut the text at the first occurrence of this, excluding it.
    /// If `None` or not present, the entire text is kept.
    pub terminator: Option<String>,

    /// Strip whitespace and newlines from both ends.
    pub trim: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            terminator: None,
            trim: true,
        }
    }
}

impl ReadOptions {
    /// Read until the given terminator, then trim.
    pub fn until<S: AsRef<str>>(terminator: S) -> Self {
        Self {
            terminator: Some(terminator.as_ref().into()),
            trim: true,
        }
    }

    /// Keep the text exactly as received.
    pub fn raw() -> Self {
        Self {
            terminator: None,
            trim: false,
        }
    }
}
