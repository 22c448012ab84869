use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Base log level: `debug` directive gives `debug`, otherwise `info`; each
/// `-v` goes one level further.
pub fn level_for(debug: bool, verbose: u8) -> &'static str {
    match verbose.saturating_add(u8::from(debug)) {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Installs the stderr subscriber. `RUST_LOG` wins when set.
pub fn init_tracing(debug: bool, verbose: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(debug, verbose)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
