use std::io;

use thiserror::Error;

/// Anything that can go wrong while talking to a port.
///
/// Seeing one of these inside the IO thread ends the current connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// IO related errors.
    #[error("Underlying IO problem")]
    IO(#[from] io::Error),

    /// The serial port driver reported a problem.
    #[error("Serial port driver problem: {0}")]
    Serial(#[from] serialport::Error),

    /// Serial port disconnected.
    #[error("Serial port disconnected")]
    Disconnected,

    /// The handle was closed, so it may not be used anymore.
    #[error("Serial port handle is closed")]
    Closed,
}
