//! # Experiment Logger
//!
//! A logging facility for long-running experiments. Callers emit structured
//! key/value entries; each one is fanned out to three independent consumers:
//!
//! * **Retention buffer**: bounded in-memory window of recent entries,
//!   indexable from either end
//! * **Durable writer**: append-only, newline-delimited log on disk,
//!   optionally LZ4-compressed, flushed on every write and safe to resume
//!   after a crash
//! * **Broadcast hub**: live TCP stream to any number of subscribers, with a
//!   bounded replay backlog for late joiners; slow subscribers are dropped,
//!   never waited on
//!
//! ## Main Components
//!
//! * `Logger`: single entry point orchestrating the consumers
//! * `Codec` / `JsonCodec`: pluggable serialization with hook chains
//! * `RingBuffer`: the bounded FIFO behind retention and replay
//! * `DurableWriter` / `RecordSink`: persistence, plain or LZ4
//! * `BroadcastHub` / `Subscriber`: the live stream, server and client side
//! * `LogReader`: reads persisted logs back for analysis
//!
//! ## Quick Start
//!
//! ```no_run
//! use exp_logger::{log_entry, Capacity, Logger, LoggerConfig};
//!
//! let config = LoggerConfig::default()
//!     .with_maxlen(Capacity::Bounded(1000))
//!     .with_filename("run.jsonl.lz4")
//!     .with_stream(true);
//!
//! let mut logger = Logger::open(config)?;
//! for epoch in 0..10 {
//!     let loss = 1.0 / (epoch as f64 + 1.0);
//!     log_entry!(logger, "epoch": epoch, "loss": loss)?;
//! }
//! println!("last: {:?}", logger.get(-1)?);
//! logger.close()?;
//! # Ok::<(), exp_logger::LogError>(())
//! ```

pub mod broadcast_hub;
pub mod codec;
pub mod config;
pub mod durable_writer;
pub mod entry;
pub mod error;
pub mod formatter;
pub mod log_reader;
pub mod logger;
pub mod lz4_frame;
pub mod ring_buffer;
pub mod subscriber;

pub use broadcast_hub::{BroadcastHub, HubConfig};
pub use codec::{Codec, JsonCodec};
pub use config::{Compression, FlushPolicy, LoggerConfig};
pub use durable_writer::{DurableWriter, RecordSink};
pub use entry::Entry;
pub use error::{CodecError, LogError, Result};
pub use formatter::{DefaultFormatter, Echo, Formatter};
pub use log_reader::{read_log, LogReader};
pub use logger::{Logger, LoggerBuilder, LoggerState};
pub use ring_buffer::{Capacity, RingBuffer};
pub use subscriber::Subscriber;

#[doc(hidden)]
pub use serde_json;
