use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A slow but very common baud rate.
pub const NORMAL_BAUD_RATE: u32 = 9600;

/// A fast baud rate.
pub const FAST_BAUD_RATE: u32 = 115_200;

/// A very small receive history.
pub const RCV_QUEUE_SIZE_XSMALL: usize = 32;
/// A small receive history.
pub const RCV_QUEUE_SIZE_SMALL: usize = 128;
/// The default receive history size.
pub const RCV_QUEUE_SIZE_NORMAL: usize = 256;
/// A large receive history.
pub const RCV_QUEUE_SIZE_LARGE: usize = 512;
/// A very large receive history.
pub const RCV_QUEUE_SIZE_XLARGE: usize = 1024;

/// The largest receive history allowed.
pub const RCV_QUEUE_SIZE_MAX: usize = 8192;

/// How many frames may wait to be sent before further sends are dropped.
pub const SEND_QUEUE_MAX_SIZE: usize = 65536;

/// The configuration of a single connection.
///
/// Fixed once the connection is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// The baud rate of the port.
    pub baud: u32,

    /// Candidate port addresses, likely "/dev/ttyACMx" or "COMx".
    ///
    /// When connecting, the first one in this list which is currently present is used.
    pub ports: Vec<String>,

    /// How long blocking calls wait, and the read timeout of the port.
    /// `None` waits forever.
    pub timeout: Option<Duration>,

    /// A send is refused if the previous accepted send was less than this long ago.
    pub send_interval: Duration,

    /// How many received frames are kept.
    pub queue_size: usize,

    /// How many frames may be waiting to be sent.
    pub send_queue_capacity: usize,

    /// The longest the IO thread spends writing queued frames in one cycle.
    pub send_slice: Duration,

    /// How long to wait after opening a port before using it.
    /// Many boards reset when their port is opened.
    pub warmup: Duration,

    /// Rest the IO thread a little after each cycle.
    /// Turning this off makes the IO thread spin.
    pub rest_cpu: bool,

    /// Send `SIGTERM` to this process when the port goes away.
    /// Unix only.
    pub exit_on_disconnect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baud: NORMAL_BAUD_RATE,
            ports: vec![],
            timeout: Some(Duration::from_secs(1)),
            send_interval: Duration::from_secs(1),
            queue_size: RCV_QUEUE_SIZE_NORMAL,
            send_queue_capacity: SEND_QUEUE_MAX_SIZE,
            send_slice: Duration::from_millis(500),
            warmup: Duration::from_secs(2),
            rest_cpu: true,
            exit_on_disconnect: false,
        }
    }
}

impl Config {
    /// A default configuration using the given baud rate and candidate ports.
    pub fn new<S: AsRef<str>>(baud: u32, ports: &[S]) -> Self {
        Self {
            baud,
            ports: ports.iter().map(|port| port.as_ref().to_owned()).collect(),
            ..Default::default()
        }
    }

    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Could not parse configuration: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            baud: FAST_BAUD_RATE,
            ports: vec!["/dev/ttyACM0".into(), "/dev/ttyUSB0".into(), "COM3".into()],
            timeout: Some(Duration::from_secs(2)),
            send_interval: Duration::from_millis(100),
            queue_size: RCV_QUEUE_SIZE_LARGE,
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::BadConfig(format!("Could not serialize configuration: {e}")))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let path = p.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::BadConfig(format!("Could not read {path:?}: {e}")))?;

        Self::deserialize(&s)
    }

    fn check_ports(&self) -> Result<(), Error> {
        if self.ports.is_empty() {
            Err(Error::BadConfig(
                "`ports` is empty. Please give at least one candidate port.".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn check_queue_sizes(&self) -> Result<(), Error> {
        if self.queue_size == 0 || self.queue_size > RCV_QUEUE_SIZE_MAX {
            return Err(Error::BadConfig(format!(
                "`queue_size` is {}, but must be between 1 and {RCV_QUEUE_SIZE_MAX}.",
                self.queue_size
            )));
        }

        if self.send_queue_capacity == 0 {
            return Err(Error::BadConfig(
                "`send_queue_capacity` is 0, so nothing could ever be sent.".into(),
            ));
        }

        Ok(())
    }

    fn check_platform(&self) -> Result<(), Error> {
        if self.exit_on_disconnect && !cfg!(unix) {
            Err(Error::BadConfig(
                "`exit_on_disconnect` is only supported on unix platforms.".into(),
            ))
        } else {
            Ok(())
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        self.check_ports()?;
        self.check_queue_sizes()?;
        self.check_platform()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn serialize() {
        let c = Config::example();

        println!("{}", c.serialize_pretty().unwrap());
    }

    #[test]
    fn round_trips_through_ron() {
        let c = Config::example();

        assert_eq!(Config::deserialize(&c.serialize_pretty().unwrap()).unwrap(), c);
    }

    #[test]
    fn deserialize() {
        let input = r#"
(
    baud: 115200,
    ports: ["/dev/ttyACM0", "COM3"],
    timeout: (secs: 3, nanos: 0),
    send_interval: (secs: 0, nanos: 50000000),
    queue_size: 32,
    send_queue_capacity: 1024,
    send_slice: (secs: 0, nanos: 500000000),
    warmup: (secs: 0, nanos: 0),
    rest_cpu: false,
    exit_on_disconnect: false,
)
"#;
        let config = Config::deserialize(input).unwrap();

        assert_eq!(config.ports, vec!["/dev/ttyACM0", "COM3"]);
        assert_eq!(config.timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.send_interval, Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_garbage_is_bad_config() {
        let err = Config::deserialize("(baud: \"fast\")").unwrap_err();

        assert!(err.try_into_bad_config().is_ok());
    }

    #[test]
    fn bad_config_no_ports() {
        let c = Config::default();

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();

        assert!(err.contains("ports"));
    }

    #[test]
    fn bad_config_queue_size() {
        for queue_size in [0, RCV_QUEUE_SIZE_MAX + 1] {
            let c = Config {
                queue_size,
                ..Config::new(NORMAL_BAUD_RATE, &["COM1"])
            };

            let err = c.validate().unwrap_err().try_into_bad_config().unwrap();

            // Error message mentions the bad value
            assert!(err.contains(&queue_size.to_string()));
        }

        let c = Config {
            queue_size: RCV_QUEUE_SIZE_MAX,
            ..Config::new(NORMAL_BAUD_RATE, &["COM1"])
        };
        assert!(c.validate().is_ok());
    }

    #[test]
    fn bad_config_send_queue_capacity() {
        let c = Config {
            send_queue_capacity: 0,
            ..Config::new(NORMAL_BAUD_RATE, &["COM1"])
        };

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();

        assert!(err.contains("send_queue_capacity"));
    }

    #[cfg(unix)]
    #[test]
    fn exit_on_disconnect_is_fine_on_unix() {
        let c = Config {
            exit_on_disconnect: true,
            ..Config::new(NORMAL_BAUD_RATE, &["/dev/ttyACM0"])
        };

        assert!(c.validate().is_ok());
    }
}
