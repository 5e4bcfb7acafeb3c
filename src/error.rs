use std::io;

use thiserror::Error;

/// Errors raised while turning entries into bytes and back.
///
/// A codec failure only ever affects the single `log` call that triggered it;
/// the logger stays open.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The JSON layer rejected the value or the input bytes.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The decoded or converted value was not a key/value mapping.
    #[error("expected a mapping at the top level, found {0}")]
    NotAMapping(&'static str),

    /// The encoded record contains a raw newline and cannot be framed as a line.
    #[error("encoded record contains a raw newline")]
    EmbeddedNewline,

    /// A user supplied serialization hook refused a value.
    #[error("serialization hook failed: {0}")]
    Hook(String),
}

/// Errors surfaced to the producer by the logger and its components.
///
/// Durability problems (`Io`) are fatal and close the logger. Broadcast
/// problems never show up here: slow or broken subscribers are dropped
/// silently by the hub.
#[derive(Debug, Error)]
pub enum LogError {
    /// The entry could not be encoded; nothing was written or published.
    #[error("serialization failed: {0}")]
    Serialization(#[from] CodecError),

    /// The durable sink could not be opened or written.
    #[error("durable sink failure: {0}")]
    Io(#[from] io::Error),

    /// The logger was used after it was closed.
    #[error("logger is closed")]
    Closed,

    /// Positional access outside `[-len, len - 1]`.
    #[error("index {index} out of range for buffer of length {len}")]
    OutOfRange { index: isize, len: usize },

    /// The broadcast hub could not start its runtime or bind its listener.
    #[error("broadcast hub failed to start: {0}")]
    Bind(io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LogError>;
