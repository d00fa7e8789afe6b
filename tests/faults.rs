use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use color_eyre::Result;
use pretty_assertions::assert_eq;
use serial_relay::{
    cycle::{Cycle, DefaultCycle, Incoming, Outgoing},
    logging,
    mock::MockDriver,
    reconnect::{MultiReconnector, Reconnector},
    serial::{error::TransportError, transport::Transport},
    Config, ConnectionBuilder, Error, SendOptions, State,
};
use tracing::Level;

mod common;
use common::*;

#[test]
fn unplugging_disconnects() -> Result<()> {
    let (driver, connection) = connected(Duration::ZERO);

    driver.unplug(PORT);

    wait_until("fault noticed", || !connection.is_connected());
    assert_eq!(connection.state(), State::Disconnected);
    assert!(matches!(
        connection.send(&["hi".into()], &SendOptions::default()),
        Err(Error::NotConnected)
    ));

    Ok(())
}

#[test]
fn reconnect_waits_for_the_device() -> Result<()> {
    let (driver, connection) = connected(Duration::ZERO);

    driver.unplug(PORT);
    wait_until("fault noticed", || !connection.is_connected());

    let started = Instant::now();
    assert!(!connection.reconnect(Some(Duration::from_millis(200)))?);
    assert!(started.elapsed() >= Duration::from_millis(200));

    let plugger = driver.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        plugger.plug(PORT);
    });

    assert!(connection.reconnect(Some(Duration::from_secs(2)))?);
    assert!(connection.is_connected());
    assert_eq!(connection.port().as_deref(), Some(PORT));

    Ok(())
}

#[test]
fn fresh_io_after_reconnect() -> Result<()> {
    let (driver, connection) = connected(Duration::ZERO);

    assert!(connection.send(&["before".into()], &SendOptions::default())?);
    wait_until("echo received", || connection.receive_history_len() == 1);

    driver.unplug(PORT);
    wait_until("fault noticed", || !connection.is_connected());
    driver.plug(PORT);
    assert!(connection.reconnect(Some(Duration::from_secs(2)))?);

    assert_eq!(connection.receive_history_len(), 0);
    assert!(connection.send(&["after".into()], &SendOptions::default())?);
    wait_until("echo received", || connection.receive_history_len() == 1);

    let frame = connection.receive(0)?.expect("A frame");
    assert_eq!(frame.bytes, b"Got: \"after\"\n".to_vec());

    Ok(())
}

#[test]
fn reconnector_brings_it_back() -> Result<()> {
    logging::init(Level::DEBUG, None);

    let (driver, connection) = connected(Duration::ZERO);
    let supervisor = Reconnector::spawn(connection.clone())?;

    driver.unplug(PORT);
    wait_until("fault noticed", || !connection.is_connected());

    driver.plug(PORT);
    wait_until("reconnected", || connection.is_connected());

    // Also after an explicit disconnect.
    connection.disconnect();
    wait_until("reconnected", || connection.is_connected());

    assert!(supervisor.is_running());
    supervisor.stop();

    Ok(())
}

#[test]
fn unlisted_port_is_torn_down() -> Result<()> {
    let (driver, connection) = connected(Duration::ZERO);
    assert!(connection.check_port_present()?);

    // The handle keeps working, only the listing changes.
    driver.hide(PORT);
    assert!(!connection.check_port_present()?);

    assert_eq!(connection.state(), State::Disconnected);
    assert!(!driver.is_open(PORT));

    // Not connected counts as present.
    assert!(connection.check_port_present()?);

    Ok(())
}

#[test]
fn reconnector_notices_unlisted_port() -> Result<()> {
    logging::init(Level::DEBUG, None);

    let (driver, connection) = connected(Duration::ZERO);
    let supervisor = Reconnector::spawn(connection.clone())?;

    driver.hide(PORT);
    wait_until("vanished port noticed", || !connection.is_connected());

    driver.show(PORT);
    wait_until("reconnected", || connection.is_connected());
    assert_eq!(connection.port().as_deref(), Some(PORT));

    supervisor.stop();

    Ok(())
}

#[test]
fn multi_reconnector_handles_each() -> Result<()> {
    logging::init(Level::DEBUG, None);

    let driver = MockDriver::with_ports(&["mock0", "mock1"]);
    let connections = ["mock0", "mock1"]
        .into_iter()
        .map(|port| {
            connection_with(
                &driver,
                Config {
                    ports: vec![port.into()],
                    ..config(Duration::ZERO)
                },
            )
        })
        .collect::<Vec<_>>();

    // Never connected before, the supervisor takes care of it.
    let supervisor = MultiReconnector::spawn(connections.clone())?;
    wait_until("both connected", || connections.iter().all(|c| c.is_connected()));

    driver.unplug("mock0");
    driver.unplug("mock1");
    wait_until("both faulted", || connections.iter().all(|c| !c.is_connected()));

    // One device coming back is enough for its connection.
    driver.plug("mock1");
    wait_until("mock1 back", || connections[1].is_connected());
    assert!(!connections[0].is_connected());

    driver.plug("mock0");
    wait_until("mock0 back", || connections[0].is_connected());

    supervisor.stop();

    Ok(())
}

#[test]
fn stopped_supervisor_does_nothing() -> Result<()> {
    let (_driver, connection) = connected(Duration::ZERO);

    let supervisor = Reconnector::spawn(connection.clone())?;
    supervisor.stop();

    connection.disconnect();
    thread::sleep(Duration::from_millis(200));

    assert!(!connection.is_connected());

    Ok(())
}

/// A cycle taking its time, as when writing a lot at a low baud rate.
struct Slow(DefaultCycle);

impl Cycle for Slow {
    fn run_cycle(
        &self,
        transport: &mut dyn Transport,
        incoming: &mut Incoming<'_>,
        outgoing: &mut Outgoing<'_>,
    ) -> Result<(), TransportError> {
        thread::sleep(Duration::from_millis(300));
        self.0.run_cycle(transport, incoming, outgoing)
    }
}

#[test]
fn callers_do_not_wait_for_the_port() -> Result<()> {
    let driver = MockDriver::with_ports(&[PORT]);
    let connection = ConnectionBuilder::new(config(Duration::ZERO))
        .driver(Arc::new(driver.clone()))
        .cycle(Arc::new(Slow(DefaultCycle::default())))
        .build()?;
    connection.connect()?;

    // Let the IO thread get into a cycle.
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    for index in 0..5 {
        assert!(connection.send(&[index.to_string().into()], &SendOptions::default())?);
    }
    let _ = connection.receive(0)?;
    let _ = connection.available()?;
    assert!(started.elapsed() < Duration::from_millis(200));

    wait_until("all written", || driver.written(PORT).len() == 5);

    let written = driver.written(PORT);
    let expected = (0..5)
        .map(|index| format!("{index}\r\n").into_bytes())
        .collect::<Vec<_>>();
    assert_eq!(written, expected);

    Ok(())
}

#[test]
fn sends_from_many_threads() -> Result<()> {
    let (driver, connection) = connected(Duration::ZERO);

    let handles = (0..4)
        .map(|thread_index| {
            let connection = connection.clone();
            thread::spawn(move || {
                for index in 0..10 {
                    connection
                        .send(&[format!("{thread_index}-{index}").into()], &SendOptions::default())
                        .expect("Connected");
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().expect("Sender thread");
    }

    wait_until("all written", || driver.written(PORT).len() == 40);

    Ok(())
}

#[test]
fn dropping_every_handle_closes_the_port() -> Result<()> {
    let (driver, connection) = connected(Duration::ZERO);
    assert!(driver.is_open(PORT));

    drop(connection);

    wait_until("port closed", || !driver.is_open(PORT));

    Ok(())
}
