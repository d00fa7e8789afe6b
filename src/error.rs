use std::io;

use thiserror::Error;

use crate::serial::error::TransportError;

/// Errors thay may occur in this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation needs a connected port, but there is none.
    #[error("No connection established")]
    NotConnected,

    /// Tried to connect while already connected.
    #[error("Connection already established")]
    AlreadyConnected,

    /// None of the candidate ports are present on the system.
    #[error("No port found, tried: {candidates:?}")]
    NoPortFound {
        /// The configured candidates, in the order they were tried.
        candidates: Vec<String>,
    },

    /// A port is present, but opening it failed.
    #[error("Could not open port at `{address}`")]
    Open {
        /// The port.
        address: String,

        /// Why.
        #[source]
        source: TransportError,
    },

    /// The port misbehaved outside of the IO thread, e.g. when listing ports.
    #[error("Transport problem")]
    Transport(#[from] TransportError),

    /// A configuration which can't be used.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// A route with this path is already registered.
    #[error("The route `{0}` already exists")]
    RouteExists(String),

    /// Starting a thread failed.
    #[error("Could not spawn thread")]
    Spawn(#[source] io::Error),
}

impl Error {
    /// Whether this means the device is not (yet) there.
    /// Reconnecting keeps retrying through these.
    pub fn is_device_absent(&self) -> bool {
        matches!(self, Self::NoPortFound { .. } | Self::Open { .. })
    }

    /// Get the message of a [`Error::BadConfig`], or the error itself if it's something else.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }
}

/// Results in this library.
pub type Result<T, E = Error> = std::result::Result<T, E>;
