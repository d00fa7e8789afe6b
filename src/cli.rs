use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{config::Config, error::Result};

/// The command line interface for serial relay.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Log level on stdout
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Also log to daily rotated files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// List the serial ports present on this system.
    Ports,

    /// Connect to a port, keep it connected, and log everything it sends.
    Monitor {
        /// Path to a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the configured baud rate
        #[arg(long)]
        baud: Option<u32>,

        /// Candidate ports, overriding the configured ones
        ports: Vec<String>,
    },

    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,
}

impl Examples {
    /// Print the example to stdout.
    pub fn show(&self) -> Result<()> {
        match self {
            Examples::Config => println!("{}", Config::example().serialize_pretty()?),
        }

        Ok(())
    }
}

/// Put together the configuration a monitor runs with.
///
/// Arguments given on the command line win over the file.
pub fn monitor_config(
    path: Option<PathBuf>,
    baud: Option<u32>,
    ports: Vec<String>,
) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::new_from_path(path)?,
        None => Config::default(),
    };

    if let Some(baud) = baud {
        config.baud = baud;
    }

    if !ports.is_empty() {
        config.ports = ports;
    }

    config.validate()?;

    Ok(config)
}
