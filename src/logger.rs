//! The logger: single entry point that fans each entry out to its consumers.
//!
//! On every [`Logger::log`] call the entry goes, in order, to
//!
//! 1. the echo side channel (optional, failures ignored),
//! 2. the retention buffer (never fails),
//! 3. the durable writer (optional, failures are fatal and close the logger),
//! 4. the broadcast hub (optional, fire and forget).
//!
//! The first three happen synchronously on the caller's thread. The hub only
//! enqueues; its network I/O runs on its own runtime.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::broadcast_hub::{BroadcastHub, HubConfig};
use crate::codec::{Codec, JsonCodec};
use crate::config::{Compression, LoggerConfig};
use crate::durable_writer::{DurableWriter, RecordSink};
use crate::entry::{to_entry, Entry};
use crate::error::{CodecError, LogError, Result};
use crate::formatter::{DefaultFormatter, Echo, Formatter};
use crate::ring_buffer::RingBuffer;

/// Lifecycle of a [`Logger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerState {
    Open,
    Closed,
}

/// Experiment logger with in-memory retention, durable persistence and live
/// broadcast.
///
/// # Thread Safety
///
/// A logger has exactly one producer. It is `Send`, so it can be moved to the
/// thread that drives the experiment, but `log` takes `&mut self`.
///
/// The broadcast hub owns a tokio runtime, so a streaming logger must be
/// opened from synchronous code; inside an async task `open` fails with
/// [`LogError::Bind`]. Dropping it there is allowed.
///
/// # Teardown
///
/// Dropping the logger closes it: the sink is flushed and released and the
/// hub stops listening. That covers early returns through `?` and unwinding
/// panics alike. Call [`close`](Logger::close) explicitly to observe
/// teardown errors.
///
/// # Examples
///
/// ```
/// # use exp_logger::{entry, Capacity, Logger, LoggerConfig};
/// let mut logger = Logger::open(LoggerConfig::default().with_maxlen(Capacity::Bounded(2)))?;
/// for i in 0..3 {
///     logger.log(entry! { "i": i })?;
/// }
/// assert_eq!(logger.len(), 2);
/// assert_eq!(logger.get(-1)?["i"], 2);
/// assert!(logger.get(-3).is_err());
/// # Ok::<(), exp_logger::LogError>(())
/// ```
pub struct Logger {
    state: LoggerState,
    buffer: RingBuffer<Entry>,
    writer: Option<DurableWriter>,
    hub: Option<BroadcastHub>,
    echo: Option<Echo>,
    codec: Arc<dyn Codec>,
    written: u64,
}

impl Logger {
    /// Opens a logger with the default codec and formatter.
    pub fn open(config: LoggerConfig) -> Result<Self> {
        LoggerBuilder::new(config).open()
    }

    /// Starts a builder for injecting a codec, formatter or custom sink.
    pub fn builder(config: LoggerConfig) -> LoggerBuilder {
        LoggerBuilder::new(config)
    }

    /// Logs one entry.
    ///
    /// Returns `Serialization` when the codec rejects the entry; it is still
    /// retained in memory but neither written nor published, and the logger
    /// stays open. Returns `Io` when the durable write fails; the logger is
    /// closed before the error is returned.
    pub fn log(&mut self, entry: Entry) -> Result<()> {
        if self.state == LoggerState::Closed {
            return Err(LogError::Closed);
        }

        if let Some(echo) = self.echo.as_mut() {
            echo.emit(&entry);
        }

        // memory-only loggers never need the encoded form
        if self.writer.is_none() && self.hub.is_none() {
            self.buffer.push(entry);
            return Ok(());
        }

        let encoded = self.encode(&entry);
        self.buffer.push(entry);
        let record = encoded?;

        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.write(&record) {
                warn!(error = %e, "durable write failed, closing logger");
                self.teardown();
                return Err(e);
            }
            self.written += 1;
        }

        if let Some(hub) = self.hub.as_ref() {
            hub.publish(&record);
        }
        Ok(())
    }

    /// Logs any record that serializes to a mapping.
    ///
    /// ```
    /// # use exp_logger::{Logger, LoggerConfig};
    /// #[derive(serde::Serialize)]
    /// struct Step { epoch: u32, loss: f64 }
    ///
    /// let mut logger = Logger::open(LoggerConfig::default())?;
    /// logger.log_serialize(&Step { epoch: 1, loss: 0.5 })?;
    /// assert_eq!(logger.get(0)?["loss"], 0.5);
    /// # Ok::<(), exp_logger::LogError>(())
    /// ```
    pub fn log_serialize<T: Serialize + ?Sized>(&mut self, record: &T) -> Result<()> {
        if self.state == LoggerState::Closed {
            return Err(LogError::Closed);
        }
        self.log(to_entry(record)?)
    }

    fn encode(&self, entry: &Entry) -> Result<Vec<u8>> {
        let record = self.codec.encode(entry)?;
        if record.contains(&b'\n') {
            return Err(CodecError::EmbeddedNewline.into());
        }
        Ok(record)
    }

    /// Entry at `index` in the retention window; negative counts from the newest.
    pub fn get(&self, index: isize) -> Result<&Entry> {
        self.buffer.get(index)
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = &Entry> + DoubleEndedIterator + '_ {
        self.buffer.iter()
    }

    pub fn state(&self) -> LoggerState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == LoggerState::Closed
    }

    /// Address subscribers connect to, when streaming is enabled.
    pub fn stream_addr(&self) -> Option<SocketAddr> {
        self.hub.as_ref().map(BroadcastHub::local_addr)
    }

    /// The broadcast hub, when streaming is enabled.
    pub fn hub(&self) -> Option<&BroadcastHub> {
        self.hub.as_ref()
    }

    /// Records persisted since the logger was opened.
    pub fn records_written(&self) -> u64 {
        self.written
    }

    pub fn codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&self.codec)
    }

    /// Flushes and releases the sink and stops the hub. Idempotent.
    ///
    /// Retained entries stay readable after closing.
    pub fn close(&mut self) -> Result<()> {
        if self.state == LoggerState::Closed {
            return Ok(());
        }
        self.state = LoggerState::Closed;

        if let Some(mut hub) = self.hub.take() {
            hub.close();
        }
        if let Some(mut writer) = self.writer.take() {
            writer.close()?;
            debug!(records = writer.records(), "durable writer closed");
        }
        Ok(())
    }

    /// Close on a failure path, where the original error wins.
    fn teardown(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error while closing logger");
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Assembles a [`Logger`] from a config plus runtime strategies.
///
/// ```
/// # use std::sync::Arc;
/// # use exp_logger::{Logger, LoggerConfig, JsonCodec, Entry};
/// let logger = Logger::builder(LoggerConfig::default().with_echo(true))
///     .codec(Arc::new(JsonCodec::new()))
///     .formatter(|e: &Entry| format!("{} fields", e.len()))
///     .echo_to(std::io::sink())
///     .open()?;
/// # Ok::<(), exp_logger::LogError>(())
/// ```
pub struct LoggerBuilder {
    config: LoggerConfig,
    codec: Arc<dyn Codec>,
    formatter: Box<dyn Formatter>,
    echo_out: Option<Box<dyn Write + Send>>,
    sink: Option<Box<dyn RecordSink>>,
}

impl LoggerBuilder {
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            codec: Arc::new(JsonCodec::new()),
            formatter: Box::new(DefaultFormatter),
            echo_out: None,
            sink: None,
        }
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Formatter used when `echo` is enabled.
    pub fn formatter<F: Formatter + 'static>(mut self, formatter: F) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    /// Sends the echo somewhere other than stdout.
    pub fn echo_to<W: Write + Send + 'static>(mut self, out: W) -> Self {
        self.echo_out = Some(Box::new(out));
        self
    }

    /// Persists through `sink` instead of opening `filename`.
    pub fn sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Opens the sink and starts the hub as configured.
    pub fn open(self) -> Result<Logger> {
        let LoggerBuilder {
            config,
            codec,
            formatter,
            echo_out,
            sink,
        } = self;

        let writer = match (sink, config.filename.as_deref()) {
            (Some(sink), _) => Some(DurableWriter::with_sink(sink)),
            (None, Some(path)) => {
                let compression = config
                    .compression
                    .unwrap_or_else(|| Compression::from_path(path));
                Some(DurableWriter::open(path, compression, config.flush)?)
            }
            (None, None) => None,
        };

        let hub = if config.stream {
            Some(BroadcastHub::start(HubConfig {
                addr: config.stream_addr,
                replay: config.stream_maxlen,
                send_queue: config.send_queue,
                send_timeout: config.send_timeout(),
            })?)
        } else {
            None
        };

        let echo = config.echo.then(|| match echo_out {
            Some(out) => Echo::new(formatter, out),
            None => Echo::stdout(formatter),
        });

        Ok(Logger {
            state: LoggerState::Open,
            buffer: RingBuffer::new(config.maxlen),
            writer,
            hub,
            echo,
            codec,
            written: 0,
        })
    }
}

/// Logs an entry written in `json!` object syntax.
///
/// Expands to `logger.log(entry! { ... })` and returns its `Result`.
///
/// # Examples
///
/// ```
/// # use exp_logger::{log_entry, Logger, LoggerConfig};
/// let mut logger = Logger::open(LoggerConfig::default())?;
/// let loss = 0.25;
/// log_entry!(logger, "epoch": 1, "loss": loss)?;
/// assert_eq!(logger.get(-1)?["epoch"], 1);
/// # Ok::<(), exp_logger::LogError>(())
/// ```
#[macro_export]
macro_rules! log_entry {
    ($logger:expr, $($body:tt)*) => {
        $logger.log($crate::entry! { $($body)* })
    };
}
