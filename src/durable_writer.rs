//! Append-only durable persistence of encoded entries.
//!
//! The [`DurableWriter`] frames each record as one line and hands it to a
//! [`RecordSink`], which owns the actual file handle. Two sinks ship with the
//! crate:
//!
//! * [`PlainSink`]: newline-delimited records appended to a regular file.
//! * [`Lz4Sink`]: records are compressed into linked LZ4 blocks, one block
//!   per write, so the file is valid up to the last finished write even if
//!   the process dies mid-block.
//!
//! Durability is a hard guarantee: a failed append poisons the writer and
//! every later write fails too.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;
use std::path::{Path, PathBuf};

use lz4::liblz4::BlockChecksum;
use lz4::{BlockMode, BlockSize, ContentChecksum, Encoder, EncoderBuilder};
use tracing::{debug, warn};

use crate::config::{Compression, FlushPolicy};
use crate::error::{LogError, Result};
use crate::lz4_frame::{last_line_end, scan_stream, END_MARK};

/// Destination for framed records.
///
/// Implementations decide how bytes reach storage. `append` must not return
/// until the record is as durable as the sink promises; a record that was
/// only partially stored must not be visible after a restart.
///
/// # Examples
///
/// ```
/// # use exp_logger::durable_writer::RecordSink;
/// // Keeps everything in memory, e.g. for tests.
/// #[derive(Default)]
/// struct MemorySink(Vec<u8>);
///
/// impl RecordSink for MemorySink {
///     fn append(&mut self, line: &[u8]) -> std::io::Result<()> {
///         self.0.extend_from_slice(line);
///         Ok(())
///     }
///     fn durable_len(&self) -> u64 {
///         self.0.len() as u64
///     }
/// }
/// ```
pub trait RecordSink: Send {
    /// Stores one newline-terminated record.
    fn append(&mut self, line: &[u8]) -> io::Result<()>;

    /// Bytes known to be durably stored.
    fn durable_len(&self) -> u64;

    /// Releases the underlying handle after a final flush.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn sync(file: &File, policy: FlushPolicy) -> io::Result<()> {
    match policy {
        FlushPolicy::Fsync => file.sync_data(),
        FlushPolicy::OsBuffer => Ok(()),
    }
}

/// Newline-delimited records appended to a regular file.
pub struct PlainSink {
    file: File,
    len: u64,
    policy: FlushPolicy,
}

impl PlainSink {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// A torn final line left by an earlier crash is cut off first, so new
    /// records never get glued onto a partial one.
    pub fn open(path: &Path, policy: FlushPolicy) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let total = file.metadata()?.len();
        let len = complete_lines_len(&mut file, total)?;
        if len < total {
            warn!(
                path = %path.display(),
                dropped_bytes = total - len,
                "truncating torn trailing record"
            );
            file.set_len(len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(len))?;

        Ok(Self { file, len, policy })
    }
}

/// Offset just past the last newline in the first `total` bytes of `file`.
fn complete_lines_len(file: &mut File, total: u64) -> io::Result<u64> {
    const CHUNK: u64 = 8 * 1024;
    let mut buf = vec![0u8; CHUNK as usize];
    let mut end = total;

    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

impl RecordSink for PlainSink {
    fn append(&mut self, line: &[u8]) -> io::Result<()> {
        self.file.write_all(line)?;
        sync(&self.file, self.policy)?;
        self.len += line.len() as u64;
        Ok(())
    }

    fn durable_len(&self) -> u64 {
        self.len
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// Uncompressed bytes after which the open frame is finished and a new one
/// started. Bounds how much a resuming writer has to verify.
pub const DEFAULT_FRAME_LIMIT: u64 = 4 << 20;

/// File handle that knows its write position.
struct CountingFile {
    file: File,
    pos: u64,
}

impl Write for CountingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

enum FrameState {
    Idle(CountingFile),
    Open(Encoder<CountingFile>),
    Failed,
}

/// LZ4-compressed records in standard, linked-block frames.
///
/// Each append is compressed against the preceding 64 KiB of the frame and
/// flushed as one block carrying its own checksum, so the file is always a
/// valid stream up to the last complete block. Frames are finished after
/// [`DEFAULT_FRAME_LIMIT`] uncompressed bytes and on close.
pub struct Lz4Sink {
    state: FrameState,
    builder: EncoderBuilder,
    frame_bytes: u64,
    frame_limit: u64,
    durable_len: u64,
    policy: FlushPolicy,
}

impl Lz4Sink {
    /// Opens `path`, resuming after the last complete block.
    ///
    /// Only headers are read to find the resume point, and only the final
    /// frame is decoded to check its blocks. Blocks cut short by a crash, or
    /// holding the start of a record whose end never reached the disk, are
    /// truncated away, and a frame left without its end mark is closed.
    /// Anything else that does not parse or verify fails with `InvalidData`
    /// and leaves the file untouched.
    pub fn open(path: &Path, policy: FlushPolicy) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let scan = scan_stream(&mut file)?;
        let mut valid_len = scan.valid_len;
        let mut open_tail = scan.open_tail;
        if let Some(start) = scan.last_frame {
            let line_end = last_line_end(&mut file, start, scan.valid_len)?;
            if open_tail {
                // blocks holding the head of a record that never finished
                match line_end {
                    Some(end) => valid_len = end,
                    None => {
                        valid_len = start;
                        open_tail = false;
                    }
                }
            }
        }

        if valid_len < scan.total_len {
            warn!(
                path = %path.display(),
                dropped_bytes = scan.total_len - valid_len,
                "truncating torn trailing lz4 block"
            );
            file.set_len(valid_len)?;
        }
        file.seek(SeekFrom::Start(valid_len))?;
        if open_tail {
            debug!(path = %path.display(), "closing lz4 frame left open");
            file.write_all(&END_MARK)?;
        }
        if valid_len < scan.total_len || open_tail {
            file.sync_all()?;
        }
        if open_tail {
            valid_len += END_MARK.len() as u64;
        }

        let mut builder = EncoderBuilder::new();
        builder
            .block_size(BlockSize::Max64KB)
            .block_mode(BlockMode::Linked)
            .block_checksum(BlockChecksum::BlockChecksumEnabled)
            .checksum(ContentChecksum::NoChecksum);

        Ok(Self {
            state: FrameState::Idle(CountingFile {
                file,
                pos: valid_len,
            }),
            builder,
            frame_bytes: 0,
            frame_limit: DEFAULT_FRAME_LIMIT,
            durable_len: valid_len,
            policy,
        })
    }

    /// Finishes frames after `bytes` of uncompressed input instead of the default.
    pub fn with_frame_limit(mut self, bytes: u64) -> Self {
        self.frame_limit = bytes.max(1);
        self
    }

    fn finish_frame(&mut self, encoder: Encoder<CountingFile>) -> io::Result<()> {
        let (out, result) = encoder.finish();
        result?;
        sync(&out.file, self.policy)?;
        self.durable_len = out.pos;
        self.frame_bytes = 0;
        self.state = FrameState::Idle(out);
        Ok(())
    }
}

impl RecordSink for Lz4Sink {
    fn append(&mut self, line: &[u8]) -> io::Result<()> {
        let mut encoder = match mem::replace(&mut self.state, FrameState::Failed) {
            FrameState::Idle(out) => self.builder.build(out)?,
            FrameState::Open(encoder) => encoder,
            FrameState::Failed => {
                return Err(io::Error::new(io::ErrorKind::Other, "lz4 sink failed earlier"));
            }
        };

        encoder.write_all(line)?;
        encoder.flush()?;
        sync(&encoder.writer().file, self.policy)?;
        self.durable_len = encoder.writer().pos;
        self.frame_bytes += line.len() as u64;

        if self.frame_bytes >= self.frame_limit {
            self.finish_frame(encoder)
        } else {
            self.state = FrameState::Open(encoder);
            Ok(())
        }
    }

    fn durable_len(&self) -> u64 {
        self.durable_len
    }

    fn close(&mut self) -> io::Result<()> {
        match mem::replace(&mut self.state, FrameState::Failed) {
            FrameState::Open(encoder) => self.finish_frame(encoder)?,
            other => self.state = other,
        }
        match &self.state {
            FrameState::Idle(out) => out.file.sync_all(),
            _ => Ok(()),
        }
    }
}

/// Persists encoded records through a [`RecordSink`].
pub struct DurableWriter {
    path: Option<PathBuf>,
    sink: Box<dyn RecordSink>,
    records: u64,
    poisoned: bool,
    line: Vec<u8>,
}

impl DurableWriter {
    /// Opens the sink matching `compression` at `path`.
    pub fn open(path: &Path, compression: Compression, policy: FlushPolicy) -> Result<Self> {
        let sink: Box<dyn RecordSink> = match compression {
            Compression::None => Box::new(PlainSink::open(path, policy)?),
            Compression::Lz4 => Box::new(Lz4Sink::open(path, policy)?),
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            ..Self::with_sink(sink)
        })
    }

    /// Wraps a caller-provided sink.
    pub fn with_sink(sink: Box<dyn RecordSink>) -> Self {
        Self {
            path: None,
            sink,
            records: 0,
            poisoned: false,
            line: Vec::new(),
        }
    }

    /// Appends `record` plus a newline and waits for the sink to make it durable.
    ///
    /// The first failure poisons the writer.
    pub fn write(&mut self, record: &[u8]) -> Result<()> {
        if self.poisoned {
            return Err(LogError::Io(io::Error::new(
                io::ErrorKind::Other,
                "durable writer is poisoned by an earlier failure",
            )));
        }

        self.line.clear();
        self.line.reserve(record.len() + 1);
        self.line.extend_from_slice(record);
        self.line.push(b'\n');

        if let Err(e) = self.sink.append(&self.line) {
            self.poisoned = true;
            return Err(LogError::Io(e));
        }
        self.records += 1;
        Ok(())
    }

    /// Final flush and release of the sink.
    pub fn close(&mut self) -> Result<()> {
        self.sink.close()?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Records written through this writer since it was opened.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn durable_len(&self) -> u64 {
        self.sink.durable_len()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}
