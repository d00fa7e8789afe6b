#![allow(dead_code)]

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use serial_relay::{mock::MockDriver, Config, Connection, ConnectionBuilder};

pub const PORT: &str = "/dev/ttyMOCK0";

/// A configuration suited for mock ports: no warmup, short waits.
pub fn config(send_interval: Duration) -> Config {
    Config {
        send_interval,
        timeout: Some(Duration::from_secs(1)),
        warmup: Duration::ZERO,
        ..Config::new(9600, &[PORT])
    }
}

pub fn connection_with(driver: &MockDriver, config: Config) -> Connection {
    ConnectionBuilder::new(config)
        .driver(Arc::new(driver.clone()))
        .build()
        .expect("Config should be valid")
}

/// A connected connection to a single echoing mock port.
pub fn connected(send_interval: Duration) -> (MockDriver, Connection) {
    let driver = MockDriver::with_ports(&[PORT]);
    let connection = connection_with(&driver, config(send_interval));

    connection.connect().expect("Mock port should connect");

    (driver, connection)
}

/// Poll until the condition holds, or panic after a while.
pub fn wait_until<F: FnMut() -> bool>(what: &str, mut condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);

    while !condition() {
        assert!(Instant::now() < deadline, "Timed out waiting for: {what}");
        thread::sleep(Duration::from_millis(10));
    }
}
