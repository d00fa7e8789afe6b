//! A managed connection to a single serial port.
//!
//! Callers on any number of threads share one [`Connection`] (it is cheap to clone).
//! Sends go onto a bounded queue and received frames land in a bounded history,
//! both drained and filled by a background IO thread.
//! The connection's lock is only ever held to copy frames in or out,
//! never while talking to the port or while sleeping.

use std::{
    fmt::Display,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    cycle::{Cycle, DefaultCycle},
    error::{Error, Result},
    payload::{Payload, SendOptions},
    queue::{ReceiveHistory, ReceivedFrame, SendQueue, Timestamp},
    serial::{
        error::TransportError,
        transport::{Driver, PortInfo, SerialDriver, Transport},
        ReadOptions, SerialMessage,
    },
    worker::{terminate_process, IoWorker},
};

mod lenient;
mod response;

pub use lenient::Lenient;
pub use response::{Decode, Expected, Response};

/// How long blocking calls sleep between looking at the receive history.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// An open port, shared between the connection and its IO thread.
pub(crate) type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    /// No port is open.
    Disconnected,

    /// A connect is probing for and opening a port.
    Connecting,

    /// A port is open and an IO thread is running.
    Connected,
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Disconnected => write!(f, "disconnected"),
            State::Connecting => write!(f, "connecting"),
            State::Connected => write!(f, "connected"),
        }
    }
}

/// Everything behind the connection's lock.
pub(crate) struct Inner {
    pub(crate) state: State,

    /// Present iff connected.
    pub(crate) transport: Option<SharedTransport>,

    /// Bumped on every connect, so a stale IO thread can tell it is stale.
    pub(crate) generation: u64,

    /// The port in use, or the last one used.
    pub(crate) port: Option<String>,

    pub(crate) send_queue: SendQueue,
    pub(crate) history: ReceiveHistory,

    /// When the last send was accepted.
    pub(crate) last_sent: Option<Instant>,

    /// When [`Connection::send_for_response`] was last let through.
    pub(crate) last_send_for_response: Option<Instant>,

    /// The timestamp of the last frame handed out by [`Connection::receive`].
    pub(crate) last_received: Option<Timestamp>,
}

impl Inner {
    fn new(config: &Config) -> Self {
        Self {
            state: State::Disconnected,
            transport: None,
            generation: 0,
            port: None,
            send_queue: SendQueue::new(config.send_queue_capacity),
            history: ReceiveHistory::new(config.queue_size),
            last_sent: None,
            last_send_for_response: None,
            last_received: None,
        }
    }

    /// Whether the IO thread of the given generation still owns the port.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.state == State::Connected && self.generation == generation && self.transport.is_some()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state == State::Connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn reset_io(&mut self) {
        self.send_queue.clear();
        self.history.clear();
        self.last_sent = None;
        self.last_send_for_response = None;
        self.last_received = None;
    }

    /// Forget the port and everything queued.
    /// Returns the transport, which the caller should close outside the lock.
    pub(crate) fn teardown(&mut self) -> Option<SharedTransport> {
        self.state = State::Disconnected;
        self.reset_io();

        self.transport.take()
    }
}

pub(crate) struct Shared {
    pub(crate) id: Uuid,
    pub(crate) config: Config,
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) cycle: Arc<dyn Cycle>,
    inner: Mutex<Inner>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves `Inner` consistent, so a panic elsewhere does not spoil it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The port of the given generation is gone: tear down, close it,
    /// and exit the process if configured to.
    ///
    /// Returns `false` if that generation was no longer current, and nothing was done.
    pub(crate) fn lose(&self, generation: u64, reason: &TransportError) -> bool {
        let transport = {
            let mut inner = self.lock();
            if !inner.is_current(generation) {
                return false;
            }
            inner.teardown()
        };

        error!(%reason, "Serial port lost");

        if let Some(transport) = transport {
            close(&transport);
        }

        if self.config.exit_on_disconnect {
            terminate_process();
        }

        true
    }
}

/// A point in time after which waiting stops.
#[derive(Debug, Clone, Copy)]
struct Deadline(Option<Instant>);

impl Deadline {
    /// `None` never expires.
    fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|timeout| Instant::now() + timeout))
    }

    fn expired(&self) -> bool {
        matches!(self.0, Some(deadline) if Instant::now() >= deadline)
    }

    fn min(self, other: Self) -> Self {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Self(Some(a.min(b))),
            (a, b) => Self(a.or(b)),
        }
    }
}

/// Builder for a [`Connection`].
pub struct ConnectionBuilder {
    config: Config,
    driver: Option<Arc<dyn Driver>>,
    cycle: Option<Arc<dyn Cycle>>,
}

impl ConnectionBuilder {
    /// Start a new builder.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            driver: None,
            cycle: None,
        }
    }

    /// Set the [`Driver`] used to find and open ports.
    /// Uses real serial ports if not set.
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Replace the IO thread's [`Cycle`].
    /// Uses [`DefaultCycle`] if not set.
    pub fn cycle(mut self, cycle: Arc<dyn Cycle>) -> Self {
        self.cycle = Some(cycle);
        self
    }

    /// Validate the configuration and create the (disconnected) connection.
    pub fn build(self) -> Result<Connection> {
        self.config.validate()?;

        let cycle = self
            .cycle
            .unwrap_or_else(|| Arc::new(DefaultCycle::new(self.config.send_slice)));

        Ok(Connection {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                driver: self.driver.unwrap_or_else(|| Arc::new(SerialDriver)),
                cycle,
                inner: Mutex::new(Inner::new(&self.config)),
                config: self.config,
            }),
        })
    }
}

/// A managed connection to a serial port.
///
/// Starts out disconnected, see [`Connection::connect`].
/// Operations needing a port return [`Error::NotConnected`] when there is none;
/// [`Connection::lenient`] gives the same operations returning "nothing" instead.
#[derive(Clone)]
pub struct Connection {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();

        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("state", &inner.state)
            .field("port", &inner.port)
            .field("timeout", &self.shared.config.timeout)
            .field("queue_size", &self.shared.config.queue_size)
            .field("send_interval", &self.shared.config.send_interval)
            .finish()
    }
}

impl Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();

        match &inner.port {
            Some(port) => write!(f, "{port} ({})", inner.state),
            None => write!(f, "{:?} ({})", self.shared.config.ports, inner.state),
        }
    }
}

impl Connection {
    /// A connection to real serial ports with the default IO cycle.
    pub fn new(config: Config) -> Result<Self> {
        ConnectionBuilder::new(config).build()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.lock()
    }

    /// Identifies this connection (and its clones).
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// The configuration this connection was built with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Where the connection is in its lifecycle.
    pub fn state(&self) -> State {
        self.lock().state
    }

    /// Whether a port is open.
    ///
    /// May turn false at any time without a call to [`Connection::disconnect`],
    /// if the port fails.
    pub fn is_connected(&self) -> bool {
        self.state() == State::Connected
    }

    /// The port in use, or the one last used.
    pub fn port(&self) -> Option<String> {
        self.lock().port.clone()
    }

    /// The ports currently present on the system.
    pub fn list_ports(&self) -> Result<Vec<PortInfo>> {
        Ok(self.shared.driver.list_ports()?)
    }

    /// The number of frames waiting to be written.
    pub fn send_queue_len(&self) -> usize {
        self.lock().send_queue.len()
    }

    /// The number of frames in the receive history.
    pub fn receive_history_len(&self) -> usize {
        self.lock().history.len()
    }

    /// A view of this connection where misuse gives "nothing" instead of errors.
    pub fn lenient(&self) -> Lenient<'_> {
        Lenient::new(self)
    }

    /// Open the first candidate port which is present, and start the IO thread.
    ///
    /// Blocks for the configured warmup after opening.
    pub fn connect(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.state != State::Disconnected {
                return Err(Error::AlreadyConnected);
            }
            inner.state = State::Connecting;
        }

        match self.open() {
            Ok((address, transport)) => self.start(address, transport),
            Err(e) => {
                self.lock().state = State::Disconnected;
                Err(e)
            }
        }
    }

    fn pick_port(&self) -> Result<String> {
        let present = self.shared.driver.list_ports()?;
        let candidates = &self.shared.config.ports;

        candidates
            .iter()
            .find(|candidate| present.iter().any(|port| &port.address == *candidate))
            .cloned()
            .ok_or_else(|| Error::NoPortFound {
                candidates: candidates.clone(),
            })
    }

    fn open(&self) -> Result<(String, Box<dyn Transport>)> {
        let config = &self.shared.config;
        let address = self.pick_port()?;

        let open_error = |source| Error::Open {
            address: address.clone(),
            source,
        };

        let mut transport = self
            .shared
            .driver
            .open(&address, config.baud, config.timeout)
            .map_err(open_error)?;

        transport.clear_buffers().map_err(open_error)?;

        debug!(%address, warmup = ?config.warmup, "Port open, warming up");
        thread::sleep(config.warmup);

        Ok((address, transport))
    }

    fn start(&self, address: String, transport: Box<dyn Transport>) -> Result<()> {
        let transport: SharedTransport = Arc::new(Mutex::new(transport));

        let generation = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.reset_io();
            inner.transport = Some(transport.clone());
            inner.port = Some(address.clone());
            inner.state = State::Connected;
            inner.generation
        };

        if let Err(e) = IoWorker::spawn(&self.shared, transport.clone(), generation, &address) {
            self.lock().teardown();
            close(&transport);
            return Err(Error::Spawn(e));
        }

        info!(%address, "Connected");
        Ok(())
    }

    /// Close the port and clear both queues.
    /// Does nothing if not connected.
    ///
    /// The IO thread notices the closed port and exits by itself.
    pub fn disconnect(&self) {
        let transport = self.lock().teardown();

        if let Some(transport) = transport {
            close(&transport);
            info!(port = ?self.port(), "Disconnected");
        }
    }

    /// Check that the port in use is still enumerated by the driver.
    ///
    /// Some devices vanish without any read or write failing.
    /// If the port is no longer listed, the connection is torn down as if the port had failed
    /// (including [`Config::exit_on_disconnect`]).
    /// Returns `false` if it was torn down. Not being connected counts as present.
    pub fn check_port_present(&self) -> Result<bool> {
        let (port, generation) = {
            let inner = self.lock();
            match (&inner.port, inner.state) {
                (Some(port), State::Connected) => (port.clone(), inner.generation),
                _ => return Ok(true),
            }
        };

        let listed = self
            .shared
            .driver
            .list_ports()?
            .iter()
            .any(|info| info.address == port);

        if listed {
            return Ok(true);
        }

        warn!(%port, "Port no longer listed");
        Ok(!self.shared.lose(generation, &TransportError::Disconnected))
    }

    /// Try to connect until it works or `timeout` passes (`None` tries forever).
    ///
    /// Only "the device is not there" kinds of failures are retried.
    /// Returns `false` on timeout.
    pub fn reconnect(&self, timeout: Option<Duration>) -> Result<bool> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        let deadline = Deadline::after(timeout);

        loop {
            match self.connect() {
                Ok(()) => return Ok(true),
                Err(e) if e.is_device_absent() => trace!(%e, "Not there yet"),
                Err(e) => return Err(e),
            }

            if deadline.expired() {
                return Ok(false);
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Queue the payloads for sending.
    ///
    /// The payloads are joined by the separator, the ending is appended,
    /// and the result is queued as one utf8 frame.
    ///
    /// Returns `false` without queueing if the previous accepted send was
    /// less than the send interval ago, or if the send queue is full.
    /// Returning `true` means queued, not yet written.
    pub fn send(&self, data: &[Payload], options: &SendOptions) -> Result<bool> {
        Ok(self.send_at(data, options)?.is_some())
    }

    /// Like [`Connection::send`], but returns when the send was accepted.
    fn send_at(&self, data: &[Payload], options: &SendOptions) -> Result<Option<Timestamp>> {
        let frame = options.encode(data);
        let interval = self.shared.config.send_interval;

        let mut inner = self.lock();
        inner.ensure_connected()?;

        let now = Instant::now();
        if let Some(last_sent) = inner.last_sent {
            if now.duration_since(last_sent) < interval {
                trace!("Send refused, previous send too recent");
                return Ok(None);
            }
        }

        let timestamp = Timestamp::now();
        if !inner.send_queue.push(frame) {
            warn!(
                capacity = inner.send_queue.capacity(),
                "Send queue full, dropping frame"
            );
            return Ok(None);
        }
        inner.last_sent = Some(now);

        Ok(Some(timestamp))
    }

    /// A received frame: 0 is the most recent, 1 the one before it, and so on.
    /// Does not block.
    pub fn receive(&self, offset: usize) -> Result<Option<ReceivedFrame>> {
        let mut inner = self.lock();
        inner.ensure_connected()?;

        let frame = inner.history.at(offset).cloned();
        if let Some(frame) = &frame {
            inner.last_received = Some(frame.timestamp);
        }

        Ok(frame)
    }

    /// Like [`Connection::receive`], but decoded as text.
    pub fn receive_str(
        &self,
        offset: usize,
        read: &ReadOptions,
    ) -> Result<Option<(Timestamp, String)>> {
        Ok(self.receive(offset)?.map(|frame| {
            (
                frame.timestamp,
                SerialMessage::decode(&frame.bytes, read).into_string(),
            )
        }))
    }

    /// Every frame received strictly after `cursor`, oldest first. Does not block.
    ///
    /// Passing the last returned frame's timestamp as the next cursor
    /// visits each frame exactly once, however slowly the caller consumes them.
    pub fn received_after(&self, cursor: Timestamp) -> Result<Vec<ReceivedFrame>> {
        let inner = self.lock();
        inner.ensure_connected()?;

        Ok(inner.history.after(cursor).cloned().collect())
    }

    /// How many frames arrived after the last one handed out by [`Connection::receive`].
    pub fn available(&self) -> Result<usize> {
        let inner = self.lock();
        inner.ensure_connected()?;

        let len = inner.history.len();
        let available = match inner.last_received {
            Some(timestamp) => match inner.history.find_index_of(timestamp) {
                Some(index) => len - index - 1,
                None => len,
            },
            None => len,
        };

        Ok(available)
    }

    /// Block until a frame arrives which was received after this call was made.
    ///
    /// Returns `None` if nothing arrives within the configured timeout.
    /// Unlike [`Connection::receive`], this never gives out data which was already there.
    pub fn get(&self, decode: &Decode) -> Result<Option<Response>> {
        let started = Timestamp::now();

        let frame = self.next_after(started, Deadline::after(self.shared.config.timeout))?;

        Ok(frame.map(|frame| decode.apply(&frame.bytes)))
    }

    /// Send, then block until the first frame received after the send.
    ///
    /// Returns `None` if the send was refused or if nothing arrives within the configured timeout.
    pub fn get_first_response(
        &self,
        data: &[Payload],
        options: &SendOptions,
        decode: &Decode,
    ) -> Result<Option<Response>> {
        let Some(sent) = self.send_at(data, options)? else {
            return Ok(None);
        };

        let frame = self.next_after(sent, Deadline::after(self.shared.config.timeout))?;

        Ok(frame.map(|frame| decode.apply(&frame.bytes)))
    }

    fn next_after(&self, after: Timestamp, deadline: Deadline) -> Result<Option<ReceivedFrame>> {
        loop {
            {
                let inner = self.lock();
                inner.ensure_connected()?;

                if let Some(frame) = inner.history.first_after(after) {
                    return Ok(Some(frame.clone()));
                }
            }

            if deadline.expired() {
                return Ok(None);
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Block until a frame matching `expected` is received at or after `after`.
    ///
    /// Text is compared after decoding with `read`, bytes are compared exactly.
    /// Returns `false` if no such frame arrives within the configured timeout.
    pub fn wait_for_response(
        &self,
        expected: &Expected,
        after: Timestamp,
        read: &ReadOptions,
    ) -> Result<bool> {
        self.wait_matching(
            expected,
            after,
            read,
            Deadline::after(self.shared.config.timeout),
        )
    }

    fn wait_matching(
        &self,
        expected: &Expected,
        after: Timestamp,
        read: &ReadOptions,
        deadline: Deadline,
    ) -> Result<bool> {
        loop {
            {
                let inner = self.lock();
                inner.ensure_connected()?;

                if inner
                    .history
                    .since(after)
                    .any(|frame| expected.matches(&frame.bytes, read))
                {
                    return Ok(true);
                }
            }

            if deadline.expired() {
                return Ok(false);
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Keep sending until a frame matching `expected` comes back.
    ///
    /// Each send waits for the response until another send is allowed, then sends again.
    /// A matching frame received any time after the first send counts.
    /// Gives up with `false` after the configured timeout.
    /// Also returns `false` right away if called again within the send interval.
    pub fn send_for_response(
        &self,
        expected: &Expected,
        data: &[Payload],
        options: &SendOptions,
        read: &ReadOptions,
    ) -> Result<bool> {
        let interval = self.shared.config.send_interval;

        {
            let mut inner = self.lock();
            inner.ensure_connected()?;

            let now = Instant::now();
            if let Some(last) = inner.last_send_for_response {
                if now.duration_since(last) < interval {
                    trace!("Send for response refused, previous call too recent");
                    return Ok(false);
                }
            }
            inner.last_send_for_response = Some(now);
        }

        let deadline = Deadline::after(self.shared.config.timeout);
        let mut first_sent = None;

        loop {
            if let Some(sent) = self.send_at(data, options)? {
                // A late answer to an earlier send counts too.
                let since = *first_sent.get_or_insert(sent);
                let resend = Deadline::after(Some(interval.max(POLL_INTERVAL)));

                if self.wait_matching(expected, since, read, resend.min(deadline))? {
                    return Ok(true);
                }
            }

            if deadline.expired() {
                return Ok(false);
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn close(transport: &SharedTransport) {
    transport
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .close();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_none_never_expires() {
        assert!(!Deadline::after(None).expired());
    }

    #[test]
    fn deadline_zero_expires_immediately() {
        assert!(Deadline::after(Some(Duration::ZERO)).expired());
    }

    #[test]
    fn deadline_min_picks_earliest() {
        let soon = Deadline::after(Some(Duration::ZERO));
        let never = Deadline::after(None);

        assert!(soon.min(never).expired());
        assert!(never.min(soon).expired());
        assert!(!never.min(never).expired());
    }

    #[test]
    fn bad_config_is_refused() {
        let result = Connection::new(Config::default());

        assert!(matches!(result, Err(Error::BadConfig(_))));
    }

    #[test]
    fn cold_connection_refuses_io() {
        let connection = Connection::new(Config::new(9600, &["/dev/ttyDoesNotExist"])).unwrap();

        assert!(!connection.is_connected());
        assert!(matches!(
            connection.send(&["hi".into()], &SendOptions::default()),
            Err(Error::NotConnected)
        ));
        assert!(matches!(connection.receive(0), Err(Error::NotConnected)));
        assert!(matches!(connection.available(), Err(Error::NotConnected)));
        assert!(matches!(
            connection.get(&Decode::Bytes),
            Err(Error::NotConnected)
        ));

        // Disconnecting something not connected is fine.
        connection.disconnect();
    }
}
