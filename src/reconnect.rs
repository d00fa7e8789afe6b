//! Background supervision keeping connections connected.
//!
//! A supervisor polls its connections and reconnects whichever is found disconnected,
//! including after an explicit [`Connection::disconnect`].
//! The multi supervisor gives each attempt its own thread, so one absent device
//! never delays the others.
//!
//! Every [`PRESENCE_CHECK`] the supervisors also check that connected ports are still listed,
//! since some devices vanish without any read or write failing.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    connection::{Connection, POLL_INTERVAL},
    error::{Error, Result},
};

/// How long a single reconnect attempt keeps trying before the supervisor looks again.
const ATTEMPT: Duration = Duration::from_secs(1);

/// How often supervisors check that connected ports are still listed.
pub const PRESENCE_CHECK: Duration = Duration::from_secs(2);

/// Paces [`Connection::check_port_present`] calls.
struct PresenceCheck {
    last: Instant,
}

impl PresenceCheck {
    fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    fn due(&mut self) -> bool {
        if self.last.elapsed() < PRESENCE_CHECK {
            return false;
        }
        self.last = Instant::now();
        true
    }
}

fn check_present(connection: &Connection) {
    if let Err(e) = connection.check_port_present() {
        warn!(%connection, %e, "Could not list ports");
    }
}

/// Handle to a running supervisor.
///
/// Dropping the handle leaves the supervisor running.
#[derive(Debug)]
pub struct ReconnectorHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ReconnectorHandle {
    /// Whether the supervisor is still running.
    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Stop supervising and wait for the supervisor to exit.
    ///
    /// Reconnect attempts already in flight run to completion on their own.
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);

        if self.thread.join().is_err() {
            error!("Reconnector panicked");
        }
    }
}

fn spawn_supervisor<F>(run: F) -> Result<ReconnectorHandle>
where
    F: FnOnce(Arc<AtomicBool>) + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = stop.clone();

    let span = info_span!("reconnector");
    let thread = thread::Builder::new()
        .name("serial-reconnector".into())
        .spawn(move || {
            let _span = span.entered();
            run(stop_thread);
            debug!("Stopped");
        })
        .map_err(Error::Spawn)?;

    Ok(ReconnectorHandle { stop, thread })
}

/// Keeps one connection connected.
///
/// Reconnects on the supervising thread itself.
#[derive(Debug)]
pub struct Reconnector;

impl Reconnector {
    /// Start supervising the connection.
    pub fn spawn(connection: Connection) -> Result<ReconnectorHandle> {
        spawn_supervisor(move |stop| {
            debug!(%connection, "Supervising");
            let mut presence = PresenceCheck::new();

            while !stop.load(Ordering::Relaxed) {
                if presence.due() {
                    check_present(&connection);
                }

                if !connection.is_connected() {
                    warn!(%connection, "disconnected");
                    attempt(&connection, &stop);
                }

                thread::sleep(POLL_INTERVAL);
            }
        })
    }
}

/// Keeps several connections connected.
#[derive(Debug)]
pub struct MultiReconnector;

impl MultiReconnector {
    /// Start supervising the connections.
    pub fn spawn(connections: Vec<Connection>) -> Result<ReconnectorHandle> {
        spawn_supervisor(move |stop| {
            Supervisor {
                connections,
                in_flight: Arc::default(),
                stop,
            }
            .run()
        })
    }
}

struct Supervisor {
    connections: Vec<Connection>,

    /// Connections with a reconnect attempt running.
    in_flight: Arc<Mutex<HashSet<Uuid>>>,

    stop: Arc<AtomicBool>,
}

impl Supervisor {
    fn run(self) {
        debug!(connections = self.connections.len(), "Supervising");
        let mut presence = PresenceCheck::new();

        while !self.stop.load(Ordering::Relaxed) {
            if presence.due() {
                self.connections.iter().for_each(check_present);
            }

            for connection in &self.connections {
                if !connection.is_connected() {
                    self.start_attempt(connection);
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn start_attempt(&self, connection: &Connection) {
        let id = connection.id();

        if !self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
        {
            return;
        }

        warn!(%connection, "disconnected");

        let connection = connection.clone();
        let in_flight = self.in_flight.clone();
        let stop = self.stop.clone();
        let span = info_span!("attempt", %id);

        let spawned = thread::Builder::new()
            .name("serial-reconnect".into())
            .spawn(move || {
                let _span = span.entered();
                attempt(&connection, &stop);

                in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
            });

        if let Err(e) = spawned {
            error!(?e, "Could not spawn reconnect attempt");
            self.in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        }
    }
}

fn attempt(connection: &Connection, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        match connection.reconnect(Some(ATTEMPT)) {
            Ok(true) | Err(Error::AlreadyConnected) => {
                info!(
                    "reconnected at {}",
                    connection.port().unwrap_or_else(|| "?".into())
                );
                return;
            }
            Ok(false) => continue,
            Err(e) => {
                warn!(%e, "Reconnect failed, retrying");
                thread::sleep(ATTEMPT);
            }
        }
    }
}
