//! One round of port IO, as run repeatedly by the IO thread.
//!
//! The default cycle reads everything available into the receive history
//! and writes queued frames for a bounded amount of time.
//! Implement [`Cycle`] to talk to a device some other way,
//! while keeping the IO thread's locking and lifecycle.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::{
    queue::{ReceiveHistory, SendQueue, Timestamp},
    serial::{error::TransportError, transport::Transport, SerialMessage, SerialMessageBytes},
};

/// Where a cycle puts what it read.
///
/// Frames pushed here are appended to the connection's receive history once the cycle ends.
pub struct Incoming<'a> {
    history: &'a mut ReceiveHistory,
}

impl<'a> Incoming<'a> {
    pub(crate) fn new(history: &'a mut ReceiveHistory) -> Self {
        Self { history }
    }

    /// Store a received frame, timestamped now.
    pub fn push(&mut self, bytes: SerialMessageBytes) {
        self.history.push(Timestamp::now(), bytes);
    }

    /// The number of frames pushed during this cycle.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether nothing was pushed during this cycle.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Where a cycle takes frames to write from.
///
/// Only frames taken via [`Outgoing::pop`] are removed from the connection's send queue.
pub struct Outgoing<'a> {
    queue: &'a mut SendQueue,
    consumed: usize,
}

impl<'a> Outgoing<'a> {
    pub(crate) fn new(queue: &'a mut SendQueue) -> Self {
        Self { queue, consumed: 0 }
    }

    /// Borrow the oldest pending frame, without taking it.
    pub fn front(&self) -> Option<&SerialMessageBytes> {
        self.queue.front()
    }

    /// Take the oldest pending frame.
    pub fn pop(&mut self) -> Option<SerialMessageBytes> {
        let frame = self.queue.pop_front()?;
        self.consumed += 1;

        Some(frame)
    }

    /// The number of frames still pending.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// How many frames were taken so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

/// One round of IO against an open port.
///
/// Returning an error ends the connection.
pub trait Cycle: Send + Sync {
    /// Do one round of IO.
    fn run_cycle(
        &self,
        transport: &mut dyn Transport,
        incoming: &mut Incoming<'_>,
        outgoing: &mut Outgoing<'_>,
    ) -> Result<(), TransportError>;
}

/// Reads everything available as one frame, then writes queued frames for at most `send_slice`.
#[derive(Debug, Clone)]
pub struct DefaultCycle {
    send_slice: Duration,
}

impl DefaultCycle {
    /// A cycle spending at most `send_slice` on writing per round.
    pub fn new(send_slice: Duration) -> Self {
        Self { send_slice }
    }
}

impl Default for DefaultCycle {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl Cycle for DefaultCycle {
    fn run_cycle(
        &self,
        transport: &mut dyn Transport,
        incoming: &mut Incoming<'_>,
        outgoing: &mut Outgoing<'_>,
    ) -> Result<(), TransportError> {
        transport.flush()?;

        if transport.bytes_available()? > 0 {
            // Keep reading while more shows up, so one message is not split across cycles.
            let mut received = vec![];
            loop {
                let chunk = transport.read_available()?;
                if chunk.is_empty() {
                    break;
                }
                received.extend(chunk);
            }

            if !received.is_empty() {
                trace!("Message from port: `{}`", SerialMessage::new_lossy(&received));
                incoming.push(received);
            }
        }

        let started = Instant::now();
        while started.elapsed() < self.send_slice {
            let Some(frame) = outgoing.pop() else {
                break;
            };

            transport.write(&frame)?;
            transport.flush()?;
        }

        Ok(())
    }
}
