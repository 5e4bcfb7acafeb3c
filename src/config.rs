//! Construction-time configuration for a [`Logger`](crate::Logger).

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ring_buffer::Capacity;

/// Port the broadcast hub listens on unless told otherwise.
pub const DEFAULT_STREAM_PORT: u16 = 5557;

/// File suffix that selects LZ4 compression.
pub const LZ4_SUFFIX: &str = "lz4";

/// On-disk encoding of the durable log.
///
/// The only compressed encoding is LZ4, in place of gzip. A crash-safe gzip
/// log has to rewrite its trailer and length fields on every append, while
/// LZ4 frames carry a checksum per block and can be resumed by appending.
/// The output is a series of standard frames that the `lz4` command line
/// tool decompresses. A `.gz` path is not special and is written uncompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Newline-delimited records written as is.
    None,
    /// Linked LZ4 blocks, one per durable write.
    Lz4,
}

impl Compression {
    /// Picks the mode from the file suffix: `.lz4` compresses, anything else does not.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case(LZ4_SUFFIX) => Compression::Lz4,
            _ => Compression::None,
        }
    }
}

/// How hard the writer pushes each record towards the disk before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// `fsync` after every write; survives power loss.
    Fsync,
    /// Hand the bytes to the OS; survives a crash of this process only.
    OsBuffer,
}

/// Options recognised when opening a logger.
///
/// Deserializes with every field optional, so a partial document only
/// overrides what it names.
///
/// # Examples
///
/// ```
/// # use exp_logger::{Capacity, LoggerConfig};
/// let config = LoggerConfig::default()
///     .with_maxlen(Capacity::Bounded(2))
///     .with_filename("run.jsonl.lz4")
///     .with_stream(true);
/// assert!(config.stream);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Retention window kept in memory.
    pub maxlen: Capacity,
    /// Durable log path; `None` disables writing.
    pub filename: Option<PathBuf>,
    /// Overrides the suffix-based choice of compression.
    pub compression: Option<Compression>,
    pub flush: FlushPolicy,
    /// Enables the broadcast hub.
    pub stream: bool,
    pub stream_addr: SocketAddr,
    /// Replay backlog handed to subscribers when they join.
    pub stream_maxlen: Capacity,
    /// Records a subscriber may have queued before it is dropped.
    pub send_queue: usize,
    /// Longest a single socket write may take before the subscriber is dropped.
    pub send_timeout_ms: u64,
    /// Echo every entry through the formatter.
    pub echo: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            maxlen: Capacity::Bounded(10_000),
            filename: None,
            compression: None,
            flush: FlushPolicy::Fsync,
            stream: false,
            stream_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_STREAM_PORT)),
            stream_maxlen: Capacity::Bounded(1_000),
            send_queue: 1024,
            send_timeout_ms: 1_000,
            echo: false,
        }
    }
}

impl LoggerConfig {
    pub fn with_maxlen(mut self, maxlen: Capacity) -> Self {
        self.maxlen = maxlen;
        self
    }

    pub fn with_filename<P: AsRef<Path>>(mut self, filename: P) -> Self {
        self.filename = Some(filename.as_ref().to_path_buf());
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn with_flush(mut self, flush: FlushPolicy) -> Self {
        self.flush = flush;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_stream_addr(mut self, addr: SocketAddr) -> Self {
        self.stream_addr = addr;
        self
    }

    pub fn with_stream_maxlen(mut self, stream_maxlen: Capacity) -> Self {
        self.stream_maxlen = stream_maxlen;
        self
    }

    pub fn with_send_queue(mut self, send_queue: usize) -> Self {
        self.send_queue = send_queue;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Compression actually used for `filename`, if writing is enabled.
    pub fn effective_compression(&self) -> Option<Compression> {
        self.filename
            .as_deref()
            .map(|path| self.compression.unwrap_or_else(|| Compression::from_path(path)))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_from_suffix() {
        assert_eq!(Compression::from_path(Path::new("run.jsonl.lz4")), Compression::Lz4);
        assert_eq!(Compression::from_path(Path::new("RUN.LZ4")), Compression::Lz4);
        assert_eq!(Compression::from_path(Path::new("run.jsonl")), Compression::None);
        assert_eq!(Compression::from_path(Path::new("lz4")), Compression::None);
        assert_eq!(Compression::from_path(Path::new("run.jsonl.gz")), Compression::None);
    }

    #[test]
    fn test_explicit_compression_wins() {
        let config = LoggerConfig::default()
            .with_filename("run.jsonl.lz4")
            .with_compression(Compression::None);
        assert_eq!(config.effective_compression(), Some(Compression::None));
        assert_eq!(LoggerConfig::default().effective_compression(), None);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: LoggerConfig = serde_json::from_str(
            r#"{"maxlen":{"bounded":2},"filename":"out.jsonl.lz4","stream":true,"stream_maxlen":"unbounded"}"#,
        )
        .unwrap();
        assert_eq!(config.maxlen, Capacity::Bounded(2));
        assert_eq!(config.stream_maxlen, Capacity::Unbounded);
        assert_eq!(config.effective_compression(), Some(Compression::Lz4));
        assert_eq!(config.flush, FlushPolicy::Fsync);
        assert_eq!(config.send_queue, 1024);
        assert_eq!(config.stream_addr.port(), DEFAULT_STREAM_PORT);
    }
}
