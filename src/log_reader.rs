//! Reading persisted logs back.
//!
//! Analysis happens outside the logger, on the persisted file. This module
//! is the inverse of the durable writer: it undoes the compression (if any),
//! splits the stream into lines and decodes each line with a [`Codec`].
//! Compressed logs are decoded one block at a time while reading, so memory
//! use does not grow with the file.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::codec::Codec;
use crate::config::Compression;
use crate::entry::Entry;
use crate::error::Result;
use crate::lz4_frame::{scan_stream, FrameStream};

/// Sequential reader over a persisted log.
///
/// A record cut short by a crash (a final line without its newline, or a
/// torn final LZ4 block) is skipped rather than reported, since it was never
/// acknowledged to the producer.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use exp_logger::{JsonCodec, LogReader};
/// let reader = LogReader::open("run.jsonl.lz4", Arc::new(JsonCodec::new()))?;
/// for entry in reader {
///     let entry = entry?;
///     println!("{:?}", entry.get("loss"));
/// }
/// # Ok::<(), exp_logger::LogError>(())
/// ```
pub struct LogReader {
    lines: Box<dyn BufRead + Send>,
    codec: Arc<dyn Codec>,
    line: Vec<u8>,
    line_no: u64,
}

impl LogReader {
    /// Opens `path`, choosing the decompression from its suffix.
    pub fn open<P: AsRef<Path>>(path: P, codec: Arc<dyn Codec>) -> Result<Self> {
        let path = path.as_ref();
        Self::open_with(path, Compression::from_path(path), codec)
    }

    /// Opens `path` with an explicit compression mode.
    pub fn open_with(path: &Path, compression: Compression, codec: Arc<dyn Codec>) -> Result<Self> {
        let file = File::open(path)?;
        let lines: Box<dyn BufRead + Send> = match compression {
            Compression::None => Box::new(BufReader::new(file)),
            Compression::Lz4 => Box::new(lz4_lines(file)?),
        };
        Ok(Self::from_lines(lines, codec))
    }

    /// Reads from an in-memory copy of a log.
    pub fn from_bytes(data: &[u8], compression: Compression, codec: Arc<dyn Codec>) -> Result<Self> {
        let lines: Box<dyn BufRead + Send> = match compression {
            Compression::None => Box::new(Cursor::new(data.to_vec())),
            Compression::Lz4 => Box::new(lz4_lines(Cursor::new(data.to_vec()))?),
        };
        Ok(Self::from_lines(lines, codec))
    }

    fn from_lines(lines: Box<dyn BufRead + Send>, codec: Arc<dyn Codec>) -> Self {
        Self {
            lines,
            codec,
            line: Vec::new(),
            line_no: 0,
        }
    }

    /// Reads the next complete entry, or `None` at the end of the log.
    pub fn read_entry(&mut self) -> Result<Option<Entry>> {
        loop {
            self.line.clear();
            if self.lines.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            if self.line.last() != Some(&b'\n') {
                warn!(line = self.line_no, bytes = self.line.len(), "skipping torn final record");
                return Ok(None);
            }
            let record = &self.line[..self.line.len() - 1];
            if record.is_empty() {
                continue;
            }
            return Ok(Some(self.codec.decode(record)?));
        }
    }

    /// Lines consumed so far.
    pub fn line_number(&self) -> u64 {
        self.line_no
    }
}

impl Iterator for LogReader {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_entry().transpose()
    }
}

/// Reads every entry of the log at `path` into memory.
pub fn read_log<P: AsRef<Path>>(path: P, codec: Arc<dyn Codec>) -> Result<Vec<Entry>> {
    LogReader::open(path, codec)?.collect()
}

/// Decoded lines of an LZ4 log, up to the last complete block.
fn lz4_lines<R: Read + Seek>(mut inner: R) -> io::Result<FrameStream<BufReader<io::Take<R>>>> {
    let scan = scan_stream(&mut inner)?;
    if scan.has_torn_tail() {
        warn!(
            dropped_bytes = scan.total_len - scan.valid_len,
            "ignoring torn trailing lz4 block"
        );
    }
    inner.seek(SeekFrom::Start(0))?;
    Ok(FrameStream::new(
        BufReader::new(inner.take(scan.valid_len)),
        0,
        scan.valid_len,
    ))
}
