#![deny(missing_docs)]

//! This crate manages access to a serial port shared by many threads.
//!
//! A [`Connection`] finds and opens one of several candidate ports,
//! then hands all reads and writes to a background IO thread.
//! Callers queue frames for sending and look through a bounded history of
//! received frames, without ever blocking on the port itself.
//!
//! Sends are rate limited, blocking reads give up after a timeout,
//! and a port going away is noticed by the IO thread, which tears the connection down.
//! The supervisors in [`reconnect`] bring such connections back once the device reappears.
//!
//! For testing without hardware, see [`mock`].

/// Connection configuration.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Timestamps, and the send and receive queues.
pub mod queue;

/// Turning caller data into frames.
pub mod payload;

/// Serial port messages and access to the ports themselves.
pub mod serial;

/// One round of port IO.
pub mod cycle;

/// The managed connection.
pub mod connection;

mod worker;

/// Keeping connections connected.
pub mod reconnect;

/// A table of named operations.
pub mod routes;

/// Mock ports for testing.
pub mod mock;

/// Logging setup.
pub mod logging;

/// The command line interface.
pub mod cli;

pub use config::Config;
pub use connection::{Connection, ConnectionBuilder, Decode, Expected, Response, State};
pub use error::{Error, Result};
pub use payload::{Payload, SendOptions};
pub use queue::{ReceivedFrame, Timestamp};
pub use serial::{transport::SerialDriver, ReadOptions};
