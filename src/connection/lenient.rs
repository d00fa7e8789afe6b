use std::time::Duration;

use tracing::debug;

use crate::{
    error::Result,
    payload::{Payload, SendOptions},
    queue::{ReceivedFrame, Timestamp},
    serial::ReadOptions,
};

use super::{Connection, Decode, Expected, Response};

/// A [`Connection`] where errors become "nothing".
///
/// Every operation returns `None`, `false` or `0` where the strict
/// version would return an error, for example when not connected.
/// Errors are still logged at debug level.
#[derive(Debug, Clone, Copy)]
pub struct Lenient<'a> {
    connection: &'a Connection,
}

fn or_nothing<T: Default>(result: Result<T>) -> T {
    result.unwrap_or_else(|e| {
        debug!(%e, "Ignored");
        T::default()
    })
}

impl<'a> Lenient<'a> {
    pub(crate) fn new(connection: &'a Connection) -> Self {
        Self { connection }
    }

    /// See [`Connection::connect`].
    pub fn connect(&self) -> bool {
        self.connection.connect().is_ok()
    }

    /// See [`Connection::reconnect`].
    pub fn reconnect(&self, timeout: Option<Duration>) -> bool {
        or_nothing(self.connection.reconnect(timeout))
    }

    /// See [`Connection::send`].
    pub fn send(&self, data: &[Payload], options: &SendOptions) -> bool {
        or_nothing(self.connection.send(data, options))
    }

    /// See [`Connection::receive`].
    pub fn receive(&self, offset: usize) -> Option<ReceivedFrame> {
        or_nothing(self.connection.receive(offset))
    }

    /// See [`Connection::receive_str`].
    pub fn receive_str(&self, offset: usize, read: &ReadOptions) -> Option<(Timestamp, String)> {
        or_nothing(self.connection.receive_str(offset, read))
    }

    /// See [`Connection::received_after`].
    pub fn received_after(&self, cursor: Timestamp) -> Vec<ReceivedFrame> {
        or_nothing(self.connection.received_after(cursor))
    }

    /// See [`Connection::available`].
    pub fn available(&self) -> usize {
        or_nothing(self.connection.available())
    }

    /// See [`Connection::get`].
    pub fn get(&self, decode: &Decode) -> Option<Response> {
        or_nothing(self.connection.get(decode))
    }

    /// See [`Connection::get_first_response`].
    pub fn get_first_response(
        &self,
        data: &[Payload],
        options: &SendOptions,
        decode: &Decode,
    ) -> Option<Response> {
        or_nothing(self.connection.get_first_response(data, options, decode))
    }

    /// See [`Connection::wait_for_response`].
    pub fn wait_for_response(&self, expected: &Expected, after: Timestamp, read: &ReadOptions) -> bool {
        or_nothing(self.connection.wait_for_response(expected, after, read))
    }

    /// See [`Connection::send_for_response`].
    pub fn send_for_response(
        &self,
        expected: &Expected,
        data: &[Payload],
        options: &SendOptions,
        read: &ReadOptions,
    ) -> bool {
        or_nothing(
            self.connection
                .send_for_response(expected, data, options, read),
        )
    }
}
