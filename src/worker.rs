//! The IO thread.
//!
//! One is spawned per successful connect.
//! It owns all reads and writes on the port and runs until the port
//! is closed by a disconnect, or until the port fails.
//! It never holds the connection's lock while doing IO.

use std::{
    io,
    sync::{Arc, PoisonError, Weak},
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, error, info_span, warn};

use crate::{
    connection::{Shared, SharedTransport},
    cycle::{Incoming, Outgoing},
    queue::ReceiveHistory,
    serial::error::TransportError,
};

/// How long the IO thread rests between cycles if asked to rest the CPU.
const REST: Duration = Duration::from_millis(10);

pub(crate) struct IoWorker {
    shared: Weak<Shared>,
    transport: SharedTransport,
    generation: u64,
}

/// What ended the IO thread.
#[derive(Debug)]
enum Exit {
    /// The connection moved on without us (disconnected, or reconnected).
    Superseded,

    /// Everyone holding the connection is gone.
    Dropped,

    /// The port failed.
    Fault(TransportError),
}

impl IoWorker {
    pub(crate) fn spawn(
        shared: &Arc<Shared>,
        transport: SharedTransport,
        generation: u64,
        port: &str,
    ) -> io::Result<JoinHandle<()>> {
        let worker = Self {
            shared: Arc::downgrade(shared),
            transport,
            generation,
        };

        let span = info_span!("io", %port);

        thread::Builder::new()
            .name("serial-io".into())
            .spawn(move || {
                let _span = span.entered();
                worker.run()
            })
    }

    fn run(self) {
        debug!("IO thread started");

        let exit = loop {
            match self.iteration() {
                Ok(()) => continue,
                Err(exit) => break exit,
            }
        };

        match exit {
            Exit::Superseded => debug!("Connection closed, IO thread exiting"),
            Exit::Dropped => {
                debug!("Connection dropped, closing port");
                self.close_transport();
            }
            Exit::Fault(e) => self.fault(e),
        }
    }

    fn iteration(&self) -> Result<(), Exit> {
        let shared = self.shared.upgrade().ok_or(Exit::Dropped)?;

        let (mut received, mut pending) = {
            let inner = shared.lock();
            if !inner.is_current(self.generation) {
                return Err(Exit::Superseded);
            }

            (
                ReceiveHistory::new(inner.history.capacity()),
                inner.send_queue.clone(),
            )
        };

        let consumed = {
            let mut transport = self
                .transport
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if !transport.is_open() {
                return Err(Exit::Superseded);
            }

            let mut incoming = Incoming::new(&mut received);
            let mut outgoing = Outgoing::new(&mut pending);

            shared
                .cycle
                .run_cycle(transport.as_mut(), &mut incoming, &mut outgoing)
                .map_err(Exit::Fault)?;

            outgoing.consumed()
        };

        {
            let mut inner = shared.lock();
            if !inner.is_current(self.generation) {
                return Err(Exit::Superseded);
            }

            for frame in received.iter() {
                inner.history.push(frame.timestamp, frame.bytes.clone());
            }

            // Callers may have queued more while we were busy, keep those.
            inner.send_queue.drop_front(consumed);
        }

        if shared.config.rest_cpu {
            thread::sleep(REST);
        }

        Ok(())
    }

    fn fault(&self, e: TransportError) {
        let Some(shared) = self.shared.upgrade() else {
            self.close_transport();
            return;
        };

        if !shared.lose(self.generation, &e) {
            // A disconnect raced the cycle, the handle was closed under us.
            debug!(?e, "Port closed during cycle, IO thread exiting");
        }
    }

    fn close_transport(&self) {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
    }
}

#[cfg(unix)]
pub(crate) fn terminate_process() {
    use nix::{
        sys::signal::{kill, Signal},
        unistd::Pid,
    };

    warn!("Port lost and configured to exit on disconnect, sending SIGTERM");

    if let Err(e) = kill(Pid::this(), Signal::SIGTERM) {
        error!(?e, "Could not signal own process");
    }
}

#[cfg(not(unix))]
pub(crate) fn terminate_process() {
    warn!("Exiting on disconnect is not supported on this platform");
}
