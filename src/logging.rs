use std::{path::PathBuf, sync::Once};

use tracing::Level;
use tracing::{debug, info, metadata::LevelFilter};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{prelude::*, EnvFilter};

fn do_init(stdout_level: Level, file_level: Option<(Level, PathBuf)>) {
    let mut message = String::from("Logging with:");

    // stdout
    message += " stdout";

    // RUST_LOG wins over the given level.
    let stdout_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(stdout_level.to_string()));
    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(stdout_filter);

    let registry = tracing_subscriber::registry().with(stdout_layer);

    #[cfg(feature = "use-tracy")]
    let registry = {
        message += ", tracy";

        let filter = LevelFilter::DEBUG;
        let layer = tracing_tracy::TracyLayer::new();
        registry.with(layer.with_filter(filter))
    };

    let maybe_file_layer = if let Some((level, output_dir)) = file_level {
        message += &format!(", file (in dir {output_dir:?})");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, output_dir, "relay.log");

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_filter(LevelFilter::from(level));
        Some(file_layer)
    } else {
        None
    };

    // Something else (e.g. a test harness) may have installed a subscriber already.
    if registry.with(maybe_file_layer).try_init().is_ok() {
        debug!(message);
    }
}

/// Initialize tracing.
///
/// Will only initialize once, so tests may call this.
pub fn init(stdout_level: Level, file_logging: Option<(Level, PathBuf)>) {
    static TRACING_IS_INITIALIZED: Once = Once::new();

    TRACING_IS_INITIALIZED.call_once(|| do_init(stdout_level, file_logging));

    info!("Logging initialized");
}
