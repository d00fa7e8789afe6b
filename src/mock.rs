//! A mock, useful to test connections without actual serial ports.
//!
//! Ports are virtual: they can be plugged in and unplugged at will,
//! and by default answer every line written to them with `Got: "<line>"`.

use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tracing::{debug, trace};

use crate::serial::{
    error::TransportError,
    transport::{Driver, PortInfo, Transport},
    SerialMessageBytes,
};

/// How a virtual port reacts to what is written to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Responder {
    /// Each non-empty line written is answered by `Got: "<line>"\n`.
    #[default]
    Echo,

    /// Nothing is ever answered.
    /// Use [`MockDriver::inject`] to make data appear.
    Silent,
}

impl Responder {
    fn respond(&self, written: &[u8]) -> Option<Vec<u8>> {
        match self {
            Responder::Echo => {
                let written = String::from_utf8_lossy(written);

                let mut response = String::new();
                for line in written.lines().map(str::trim).filter(|line| !line.is_empty()) {
                    response += &format!("Got: \"{line}\"\n");
                }

                (!response.is_empty()).then(|| response.into_bytes())
            }
            Responder::Silent => None,
        }
    }
}

#[derive(Debug, Default)]
struct VirtualPort {
    present: bool,

    /// Left out of listings while open handles keep working.
    hidden: bool,

    /// Bumped on every unplug, so handles opened earlier go stale.
    generation: u64,

    open: bool,
    responder: Responder,

    /// Bytes waiting to be read by the host.
    pending: VecDeque<u8>,

    /// Everything the host wrote, one entry per write.
    written: Vec<SerialMessageBytes>,
}

#[derive(Debug, Default)]
struct MockState {
    ports: HashMap<String, VirtualPort>,

    /// Insertion order, so listing is stable.
    order: Vec<String>,
}

/// A [`Driver`] handing out virtual ports.
///
/// Clones share the same ports, so a test can keep one clone
/// to poke at the ports a connection is using.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockDriver {
    /// A driver with no ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver with the given ports plugged in, all echoing.
    pub fn with_ports<S: AsRef<str>>(addresses: &[S]) -> Self {
        let driver = Self::new();
        for address in addresses {
            driver.add_port(address.as_ref());
        }
        driver
    }

    fn with_port<T>(&self, address: &str, f: impl FnOnce(&mut VirtualPort) -> T) -> Option<T> {
        lock(&self.state).ports.get_mut(address).map(f)
    }

    /// Add a plugged in, echoing port.
    /// Adding an existing port plugs it in.
    pub fn add_port(&self, address: &str) {
        let mut state = lock(&self.state);

        if !state.ports.contains_key(address) {
            state.order.push(address.to_owned());
        }

        state.ports.entry(address.to_owned()).or_default().present = true;
    }

    /// Change how a port reacts to writes.
    pub fn set_responder(&self, address: &str, responder: Responder) {
        self.with_port(address, |port| port.responder = responder);
    }

    /// Make the port disappear.
    /// Any open handle to it fails from now on.
    pub fn unplug(&self, address: &str) {
        self.with_port(address, |port| {
            port.present = false;
            port.open = false;
            port.generation += 1;
            port.pending.clear();
        });
        debug!(%address, "Unplugged");
    }

    /// Make an unplugged port appear again.
    pub fn plug(&self, address: &str) {
        self.with_port(address, |port| port.present = true);
        debug!(%address, "Plugged");
    }

    /// Leave the port out of listings without breaking open handles,
    /// as some devices do when they vanish without an IO error.
    pub fn hide(&self, address: &str) {
        self.with_port(address, |port| port.hidden = true);
        debug!(%address, "Hidden");
    }

    /// List a hidden port again.
    pub fn show(&self, address: &str) {
        self.with_port(address, |port| port.hidden = false);
        debug!(%address, "Shown");
    }

    /// Make bytes available for reading, as if the device sent them.
    pub fn inject<B: AsRef<[u8]>>(&self, address: &str, bytes: B) {
        self.with_port(address, |port| port.pending.extend(bytes.as_ref()));
    }

    /// Everything written to the port so far, one entry per write.
    pub fn written(&self, address: &str) -> Vec<SerialMessageBytes> {
        self.with_port(address, |port| port.written.clone())
            .unwrap_or_default()
    }

    /// Whether someone holds an open handle to the port.
    pub fn is_open(&self, address: &str) -> bool {
        self.with_port(address, |port| port.open)
            .unwrap_or_default()
    }
}

impl Driver for MockDriver {
    fn open(
        &self,
        address: &str,
        _baud: u32,
        _timeout: Option<Duration>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let generation = self
            .with_port(address, |port| {
                if !port.present {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        "mock port is unplugged",
                    ));
                }
                if port.open {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        "mock port is already open",
                    ));
                }

                port.open = true;
                Ok(port.generation)
            })
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::NotFound, "no such mock port")))?;

        trace!(%address, "Opened");

        Ok(Box::new(MockTransport {
            state: self.state.clone(),
            address: address.to_owned(),
            generation,
            open: true,
        }))
    }

    fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError> {
        let state = lock(&self.state);

        Ok(state
            .order
            .iter()
            .filter(|address| state.ports.get(*address).map_or(false, |port| port.present && !port.hidden))
            .map(|address| PortInfo {
                address: address.clone(),
                description: "Mock port".into(),
                technical_description: "n/a".into(),
            })
            .collect())
    }
}

/// An open handle to a virtual port.
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    address: String,
    generation: u64,
    open: bool,
}

impl MockTransport {
    fn port<T>(&self, f: impl FnOnce(&mut VirtualPort) -> T) -> Result<T, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }

        let mut state = lock(&self.state);

        match state.ports.get_mut(&self.address) {
            Some(port) if port.present && port.generation == self.generation => Ok(f(port)),
            _ => Err(TransportError::Disconnected),
        }
    }
}

impl Transport for MockTransport {
    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        self.port(|port| port.pending.len())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        self.port(|port| port.pending.drain(..).collect())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port(|port| {
            port.written.push(bytes.to_vec());

            if let Some(response) = port.responder.respond(bytes) {
                port.pending.extend(response);
            }
        })
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.port(|_| ())
    }

    fn clear_buffers(&mut self) -> Result<(), TransportError> {
        self.port(|port| port.pending.clear())
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let mut state = lock(&self.state);
        if let Some(port) = state.ports.get_mut(&self.address) {
            if port.generation == self.generation {
                port.open = false;
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.close();
    }
}
