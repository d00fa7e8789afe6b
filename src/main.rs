use std::{thread, time::Duration};

use clap::Parser;
use color_eyre::Result;
use serial_relay::{
    cli, logging,
    reconnect::Reconnector,
    serial::{transport::Driver, SerialMessage},
    Connection, ReadOptions, SerialDriver, Timestamp,
};
use tracing::{debug, info, warn, Level};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Commands::Ports => {
            for port in SerialDriver.list_ports()? {
                println!("{port}");
            }
        }
        cli::Commands::Examples(example) => example.show()?,
        cli::Commands::Monitor {
            config,
            baud,
            ports,
        } => {
            // Before any thread is spawned, so they all inherit the mask.
            #[cfg(unix)]
            let signals = block_signals()?;

            logging::init(cli.log_level, cli.log_dir.map(|dir| (Level::DEBUG, dir)));

            let config = cli::monitor_config(config, baud, ports)?;
            debug!(?config, "Monitoring");

            let connection = Connection::new(config)?;
            let supervisor = Reconnector::spawn(connection.clone())?;

            thread::Builder::new()
                .name("monitor".into())
                .spawn(move || monitor(connection))?;

            #[cfg(unix)]
            {
                let signal = signals.wait()?;
                info!(%signal, "Quitting");
                supervisor.stop();
            }

            // Runs until killed.
            #[cfg(not(unix))]
            {
                let _supervisor = supervisor;
                loop {
                    thread::park();
                }
            }
        }
    }

    Ok(())
}

#[cfg(unix)]
fn block_signals() -> Result<nix::sys::signal::SigSet> {
    use nix::sys::signal::{SigSet, Signal};

    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.add(Signal::SIGHUP);
    signals.thread_block()?;

    Ok(signals)
}

fn monitor(connection: Connection) {
    let read = ReadOptions::default();
    let mut cursor = Timestamp::now();

    loop {
        if !connection.is_connected() {
            thread::sleep(Duration::from_millis(100));
            continue;
        }

        match connection.received_after(cursor) {
            Ok(frames) if frames.is_empty() => thread::sleep(Duration::from_millis(10)),
            Ok(frames) => {
                for frame in frames {
                    info!("{}", SerialMessage::decode(&frame.bytes, &read));
                    cursor = frame.timestamp;
                }
            }
            Err(e) => {
                warn!(%e, "Receiving stopped");
                thread::sleep(Duration::from_millis(100));
            }
        }
    }
}
