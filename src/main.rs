//! Demo producer: logs a synthetic training curve with streaming enabled.
//!
//! Usage: `exp_logger [OUTPUT_FILE] [STEPS]`. Connect a subscriber to
//! 127.0.0.1:5557 to watch entries arrive; an `.lz4` suffix on the output
//! file turns compression on.

use std::env;
use std::thread;
use std::time::Duration;

use exp_logger::{log_entry, Capacity, Logger, LoggerConfig, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(writer)
        .init();

    let mut args = env::args().skip(1);
    let output = args.next();
    let steps = args.next().and_then(|s| s.parse::<u64>().ok()).unwrap_or(100);

    let mut config = LoggerConfig::default()
        .with_maxlen(Capacity::Bounded(1_000))
        .with_stream(true)
        .with_stream_maxlen(Capacity::Bounded(500))
        .with_echo(true);
    if let Some(path) = output.as_deref() {
        config = config.with_filename(path);
    }

    let mut logger = Logger::open(config)?;
    if let Some(addr) = logger.stream_addr() {
        info!(%addr, "streaming entries");
    }

    for step in 0..steps {
        let t = step as f64;
        let loss = 2.0 * (-t / 30.0).exp() + 0.05 * (t / 3.0).sin().abs();
        let accuracy = 1.0 - loss / 2.5;
        log_entry!(logger, "step": step, "loss": loss, "accuracy": accuracy)?;
        thread::sleep(Duration::from_millis(50));
    }

    info!(retained = logger.len(), written = logger.records_written(), "run finished");
    logger.close()
}
