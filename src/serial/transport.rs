use std::{
    fmt::Display,
    io::{Read, Write},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use tracing::{debug, trace};

use crate::serial::error::TransportError;

/// How long a read may block when no timeout is configured.
const NO_TIMEOUT_READ: Duration = Duration::from_secs(60 * 60);

/// An open handle to a port.
///
/// Only the IO thread reads and writes through this.
/// Any error returned is treated as the port being gone.
pub trait Transport: Send {
    /// How many bytes can be read right now without blocking.
    fn bytes_available(&mut self) -> Result<usize, TransportError>;

    /// Read whatever is currently available.
    /// Returns an empty vector if nothing is.
    fn read_available(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Write all of the given bytes.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Flush any buffered output onto the wire.
    fn flush(&mut self) -> Result<(), TransportError>;

    /// Discard anything buffered in either direction.
    fn clear_buffers(&mut self) -> Result<(), TransportError>;

    /// Close the handle. Closing twice is fine.
    fn close(&mut self);

    /// Whether [`Transport::close`] has not been called yet.
    fn is_open(&self) -> bool;
}

/// Opens transports and lists the ports which could be opened.
pub trait Driver: Send + Sync {
    /// Open the port at `address`.
    fn open(
        &self,
        address: &str,
        baud: u32,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn Transport>, TransportError>;

    /// The ports currently present on the system.
    fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError>;
}

/// A port as enumerated by a [`Driver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Likely "/dev/ttyACMx" or "COMx".
    pub address: String,

    /// Human readable description, e.g. the USB product name.
    pub description: String,

    /// Hardware identification, e.g. `USB VID:PID=2341:0043 SER=1234`.
    pub technical_description: String,
}

impl PortInfo {
    /// A port with no descriptions.
    pub fn new(address: &str) -> Self {
        Self {
            address: address.into(),
            description: "n/a".into(),
            technical_description: "n/a".into(),
        }
    }
}

impl Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} [{}]",
            self.address, self.description, self.technical_description
        )
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let (description, technical_description) = match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let description = usb
                    .product
                    .clone()
                    .or_else(|| usb.manufacturer.clone())
                    .unwrap_or_else(|| "USB serial port".into());

                let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
                if let Some(serial_number) = &usb.serial_number {
                    hwid += &format!(" SER={serial_number}");
                }

                (description, hwid)
            }
            SerialPortType::PciPort => ("PCI serial port".into(), "PCI".into()),
            SerialPortType::BluetoothPort => ("Bluetooth serial port".into(), "BLUETOOTH".into()),
            SerialPortType::Unknown => ("n/a".into(), "n/a".into()),
        };

        Self {
            address: info.port_name,
            description,
            technical_description,
        }
    }
}

/// The [`Driver`] for real serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialDriver;

impl Driver for SerialDriver {
    fn open(
        &self,
        address: &str,
        baud: u32,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        debug!(%address, %baud, ?timeout, "Opening port");

        let port = serialport::new(address, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout.unwrap_or(NO_TIMEOUT_READ))
            .open()?;

        Ok(Box::new(SerialTransport { port: Some(port) }))
    }

    fn list_ports(&self) -> Result<Vec<PortInfo>, TransportError> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(PortInfo::from)
            .collect())
    }
}

/// A real serial port.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for SerialTransport {
    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        let available = self.bytes_available()?;
        if available == 0 {
            return Ok(vec![]);
        }

        let mut buffer = vec![0; available];
        let read = self.port()?.read(&mut buffer)?;

        // A readable port yielding nothing is how a vanished USB device looks on some platforms.
        if read == 0 {
            return Err(TransportError::Disconnected);
        }

        buffer.truncate(read);
        trace!("Read {read} byte(s)");

        Ok(buffer)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port()?.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.port()?.flush()?;
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<(), TransportError> {
        self.port()?.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(port) = self.port.take() {
            debug!(name = ?port.name(), "Closing port");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
