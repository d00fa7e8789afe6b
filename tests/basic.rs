use std::time::Duration;

use color_eyre::Result;
use pretty_assertions::assert_eq;
use serial_relay::{
    mock::{MockDriver, Responder},
    Config, Error, Payload, ReadOptions, SendOptions, State,
};

mod common;
use common::*;

#[test]
fn connect_and_disconnect() -> Result<()> {
    let (driver, connection) = connected(Duration::ZERO);

    assert!(connection.is_connected());
    assert_eq!(connection.state(), State::Connected);
    assert_eq!(connection.port().as_deref(), Some(PORT));
    assert!(driver.is_open(PORT));

    connection.disconnect();

    assert!(!connection.is_connected());
    assert!(!driver.is_open(PORT));

    // The last used port is remembered.
    assert_eq!(connection.port().as_deref(), Some(PORT));

    Ok(())
}

#[test]
fn connect_twice() -> Result<()> {
    let (_driver, connection) = connected(Duration::ZERO);

    assert!(matches!(connection.connect(), Err(Error::AlreadyConnected)));
    assert!(matches!(
        connection.reconnect(None),
        Err(Error::AlreadyConnected)
    ));

    Ok(())
}

#[test]
fn no_port_present() -> Result<()> {
    let driver = MockDriver::with_ports(&["/dev/ttyOTHER"]);
    let connection = connection_with(&driver, config(Duration::ZERO));

    let err = connection.connect().unwrap_err();

    assert!(matches!(err, Error::NoPortFound { ref candidates } if candidates == &[PORT]));
    assert!(err.is_device_absent());
    assert_eq!(connection.state(), State::Disconnected);

    Ok(())
}

#[test]
fn first_present_candidate_wins() -> Result<()> {
    let driver = MockDriver::with_ports(&["b", "c"]);
    let connection = connection_with(
        &driver,
        Config {
            ports: vec!["a".into(), "c".into(), "b".into()],
            ..config(Duration::ZERO)
        },
    );

    connection.connect()?;

    assert_eq!(connection.port().as_deref(), Some("c"));

    Ok(())
}

#[test]
fn busy_candidate_is_an_open_error() -> Result<()> {
    let (driver, _first) = connected(Duration::ZERO);
    let second = connection_with(&driver, config(Duration::ZERO));

    let err = second.connect().unwrap_err();

    assert!(matches!(err, Error::Open { ref address, .. } if address == PORT));
    assert!(!second.is_connected());

    Ok(())
}

#[test]
fn ping_is_echoed() -> Result<()> {
    let (driver, connection) = connected(Duration::ZERO);

    assert!(connection.send(&["PING".into()], &SendOptions::default())?);

    wait_until("echo received", || connection.receive_history_len() == 1);

    let (_, text) = connection
        .receive_str(0, &ReadOptions::default())?
        .expect("A frame");

    assert_eq!(text, "Got: \"PING\"");
    assert_eq!(driver.written(PORT), vec![b"PING\r\n".to_vec()]);

    Ok(())
}

#[test]
fn payloads_are_joined() -> Result<()> {
    let (driver, connection) = connected(Duration::ZERO);
    driver.set_responder(PORT, Responder::Silent);

    let data: [Payload; 3] = [
        "set".into(),
        serde_json::json!({"led": 1}).into(),
        b" on \n".into(),
    ];
    assert!(connection.send(&data, &SendOptions::ending("\n"))?);

    wait_until("frame written", || !driver.written(PORT).is_empty());

    assert_eq!(driver.written(PORT), vec![b"set {\"led\":1} on\n".to_vec()]);

    Ok(())
}

#[test]
fn sends_are_rate_limited() -> Result<()> {
    let interval = Duration::from_millis(300);
    let (_driver, connection) = connected(interval);
    let options = SendOptions::default();

    assert!(connection.send(&["first".into()], &options)?);
    assert!(!connection.send(&["too soon".into()], &options)?);

    std::thread::sleep(interval + Duration::from_millis(50));

    assert!(connection.send(&["later".into()], &options)?);

    Ok(())
}

#[test]
fn disconnect_resets_everything() -> Result<()> {
    let (driver, connection) = connected(Duration::from_secs(10));
    driver.set_responder(PORT, Responder::Silent);

    driver.inject(PORT, "hello\n");
    wait_until("frame received", || connection.receive_history_len() == 1);
    assert!(connection.send(&["queued".into()], &SendOptions::default())?);

    connection.disconnect();

    assert_eq!(connection.receive_history_len(), 0);
    assert_eq!(connection.send_queue_len(), 0);
    assert!(matches!(connection.receive(0), Err(Error::NotConnected)));

    // Also the rate limit starts over.
    connection.connect()?;
    assert!(connection.send(&["again".into()], &SendOptions::default())?);

    Ok(())
}

#[test]
fn receive_offsets_and_available() -> Result<()> {
    let (driver, connection) = connected(Duration::ZERO);
    driver.set_responder(PORT, Responder::Silent);

    for (index, line) in ["a", "b"].into_iter().enumerate() {
        driver.inject(PORT, line);
        wait_until("frame received", || {
            connection.receive_history_len() == index + 1
        });
    }

    assert_eq!(connection.available()?, 2);

    let newest = connection.receive(0)?.expect("Newest frame");
    assert_eq!(newest.bytes, b"b".to_vec());
    assert_eq!(connection.available()?, 0);

    let oldest = connection.receive(1)?.expect("Oldest frame");
    assert_eq!(oldest.bytes, b"a".to_vec());
    assert!(oldest.timestamp < newest.timestamp);
    assert_eq!(connection.available()?, 1);

    assert!(connection.receive(2)?.is_none());

    driver.inject(PORT, "c");
    wait_until("frame received", || connection.receive_history_len() == 3);
    assert_eq!(connection.available()?, 2);

    Ok(())
}

#[test]
fn history_is_bounded() -> Result<()> {
    let driver = MockDriver::with_ports(&[PORT]);
    driver.set_responder(PORT, Responder::Silent);
    let connection = connection_with(
        &driver,
        Config {
            queue_size: 2,
            ..config(Duration::ZERO)
        },
    );
    connection.connect()?;

    for (index, line) in ["1", "2", "3"].into_iter().enumerate() {
        driver.inject(PORT, line);
        wait_until("frame received", || {
            connection
                .receive(0)
                .ok()
                .flatten()
                .map_or(false, |frame| frame.bytes == line.as_bytes())
        });
        assert_eq!(connection.receive_history_len(), (index + 1).min(2));
    }

    assert_eq!(connection.receive(1)?.expect("A frame").bytes, b"2".to_vec());
    assert!(connection.receive(2)?.is_none());

    Ok(())
}

#[test]
fn large_frames() -> Result<()> {
    let (driver, connection) = connected(Duration::ZERO);
    driver.set_responder(PORT, Responder::Silent);

    let text = lipsum::lipsum(2000);

    assert!(connection.send(&[text.as_str().into()], &SendOptions::ending("\n"))?);
    wait_until("frame written", || !driver.written(PORT).is_empty());
    assert_eq!(driver.written(PORT)[0], format!("{}\n", text.trim()).into_bytes());

    driver.inject(PORT, &text);
    wait_until("frame received", || connection.receive_history_len() == 1);
    assert_eq!(connection.receive(0)?.expect("A frame").bytes, text.into_bytes());

    Ok(())
}

#[test]
fn lenient_when_connected() -> Result<()> {
    let (_driver, connection) = connected(Duration::ZERO);
    let lenient = connection.lenient();

    assert!(lenient.send(&["PING".into()], &SendOptions::default()));

    wait_until("echo received", || lenient.available() == 1);
    assert!(lenient.receive(0).is_some());
    assert!(!lenient.connect());

    connection.disconnect();

    assert!(!lenient.send(&["PING".into()], &SendOptions::default()));
    assert!(lenient.receive(0).is_none());
    assert_eq!(lenient.available(), 0);

    Ok(())
}
