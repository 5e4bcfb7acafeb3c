//! Structural walk over LZ4 frame streams.
//!
//! The compressed log is a concatenation of standard LZ4 frames. Inside a
//! frame every durable write is one block, so a crash can leave the last
//! frame without its end mark, or cut its last block short. This module walks
//! frame and block headers with seeks, never holding more than one read
//! buffer, to find where the intact part of a stream ends. Only the final
//! frame is decoded when resuming, to verify the blocks a writer builds on.
//!
//! Frame layout (all integers little endian):
//!
//! ```text
//! magic(4) FLG(1) BD(1) [content size(8)] [dict id(4)] HC(1)
//! { block size(4) data(n) [block checksum(4)] }*
//! end mark(4) = 0   [content checksum(4)]
//! ```

use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};

use lz4_flex::frame::FrameDecoder;

const FRAME_MAGIC: u32 = 0x184D_2204;
const SKIPPABLE_MAGIC_MIN: u32 = 0x184D_2A50;
const SKIPPABLE_MAGIC_MAX: u32 = 0x184D_2A5F;

const FLG_VERSION_MASK: u8 = 0b1100_0000;
const FLG_VERSION: u8 = 0b0100_0000;
const FLG_BLOCK_CHECKSUM: u8 = 0b0001_0000;
const FLG_CONTENT_SIZE: u8 = 0b0000_1000;
const FLG_CONTENT_CHECKSUM: u8 = 0b0000_0100;
const FLG_DICT_ID: u8 = 0b0000_0001;

const UNCOMPRESSED_BLOCK_BIT: u32 = 0x8000_0000;

/// Closes a frame that has no content checksum.
pub const END_MARK: [u8; 4] = [0; 4];

/// What a walk over a stream found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamScan {
    /// Frames with at least their header intact.
    pub frames: usize,
    /// End of the last complete block or frame.
    pub valid_len: u64,
    /// Length of the stream that was walked.
    pub total_len: u64,
    /// Offset of the last retained data frame.
    pub last_frame: Option<u64>,
    /// The last frame has no end mark yet; appending [`END_MARK`] at
    /// `valid_len` completes it.
    pub open_tail: bool,
}

impl StreamScan {
    /// Returns true when bytes past the intact part were found.
    pub fn has_torn_tail(&self) -> bool {
        self.valid_len < self.total_len
    }
}

fn corrupt(offset: u64, what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("corrupt lz4 stream at byte {}: {}", offset, what),
    )
}

enum FrameEnd {
    Closed,
    /// Ran out of input after the last complete block, which ends here.
    Open(u64),
    Torn,
}

struct Walker<R> {
    reader: BufReader<R>,
    pos: u64,
    total: u64,
}

impl<R: Read + Seek> Walker<R> {
    fn remaining(&self) -> u64 {
        self.total - self.pos
    }

    /// Fills `buf`, or returns false when the stream ends first.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        if self.remaining() < buf.len() as u64 {
            return Ok(false);
        }
        self.reader.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(true)
    }

    fn u32(&mut self) -> io::Result<Option<u32>> {
        let mut b = [0u8; 4];
        Ok(self.fill(&mut b)?.then(|| u32::from_le_bytes(b)))
    }

    fn skip(&mut self, n: u64) -> io::Result<bool> {
        if self.remaining() < n {
            return Ok(false);
        }
        self.reader.seek_relative(n as i64)?;
        self.pos += n;
        Ok(true)
    }

    fn skippable(&mut self) -> io::Result<FrameEnd> {
        Ok(match self.u32()? {
            Some(size) if self.skip(size as u64)? => FrameEnd::Closed,
            _ => FrameEnd::Torn,
        })
    }

    fn frame(&mut self, start: u64) -> io::Result<FrameEnd> {
        let mut descriptor = [0u8; 2];
        if !self.fill(&mut descriptor)? {
            return Ok(FrameEnd::Torn);
        }
        let [flg, bd] = descriptor;
        if flg & FLG_VERSION_MASK != FLG_VERSION {
            return Err(corrupt(start + 4, "unsupported frame version"));
        }
        let max_block: u64 = match (bd >> 4) & 0x7 {
            4 => 64 << 10,
            5 => 256 << 10,
            6 => 1 << 20,
            7 => 4 << 20,
            _ => return Err(corrupt(start + 5, "bad block size id")),
        };

        // optional content size and dict id, then HC
        let mut rest = 1;
        if flg & FLG_CONTENT_SIZE != 0 {
            rest += 8;
        }
        if flg & FLG_DICT_ID != 0 {
            rest += 4;
        }
        if !self.skip(rest)? {
            return Ok(FrameEnd::Torn);
        }

        let block_checksum = if flg & FLG_BLOCK_CHECKSUM != 0 { 4 } else { 0 };
        let content_checksum = flg & FLG_CONTENT_CHECKSUM != 0;
        // a frame that promises a content checksum cannot be closed after the fact
        let torn = |last_good| {
            if content_checksum {
                FrameEnd::Torn
            } else {
                FrameEnd::Open(last_good)
            }
        };

        let mut last_good = self.pos;
        loop {
            let block_at = self.pos;
            let Some(raw) = self.u32()? else {
                return Ok(torn(last_good));
            };
            if raw == 0 {
                if content_checksum && !self.skip(4)? {
                    return Ok(FrameEnd::Torn);
                }
                return Ok(FrameEnd::Closed);
            }
            let size = (raw & !UNCOMPRESSED_BLOCK_BIT) as u64;
            if size > max_block {
                return Err(corrupt(block_at, "block larger than the frame allows"));
            }
            if !self.skip(size + block_checksum)? {
                return Ok(torn(last_good));
            }
            last_good = self.pos;
        }
    }
}

/// Walks the frame and block headers of `inner` from the start.
///
/// Running out of input inside a frame is a torn write and is reported
/// through [`StreamScan::valid_len`]. Anything that is not a frame header
/// where one is expected, or a block larger than its frame allows, is
/// `InvalidData`.
pub fn scan_stream<R: Read + Seek>(inner: &mut R) -> io::Result<StreamScan> {
    let total = inner.seek(SeekFrom::End(0))?;
    inner.seek(SeekFrom::Start(0))?;
    let mut walker = Walker {
        reader: BufReader::new(inner),
        pos: 0,
        total,
    };
    let mut scan = StreamScan {
        total_len: total,
        ..StreamScan::default()
    };

    while walker.remaining() > 0 {
        let start = walker.pos;
        if walker.remaining() < 4 {
            let mut tail = [0u8; 4];
            let tail = &mut tail[..walker.remaining() as usize];
            walker.reader.read_exact(tail)?;
            if !FRAME_MAGIC.to_le_bytes().starts_with(tail) {
                return Err(corrupt(start, "bad magic"));
            }
            break;
        }

        let magic = walker.u32()?.unwrap_or_default();
        let skippable = (SKIPPABLE_MAGIC_MIN..=SKIPPABLE_MAGIC_MAX).contains(&magic);
        let end = if skippable {
            walker.skippable()?
        } else if magic == FRAME_MAGIC {
            walker.frame(start)?
        } else {
            return Err(corrupt(start, "bad magic"));
        };

        match end {
            FrameEnd::Closed => {
                scan.valid_len = walker.pos;
                if !skippable {
                    scan.frames += 1;
                    scan.last_frame = Some(start);
                }
            }
            FrameEnd::Open(last_good) => {
                scan.frames += 1;
                scan.valid_len = last_good;
                scan.last_frame = Some(start);
                scan.open_tail = true;
                break;
            }
            FrameEnd::Torn => break,
        }
    }

    Ok(scan)
}

struct CountingReader<R> {
    inner: R,
    pos: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// Decoded view of a run of frames.
///
/// `FrameDecoder` reports end of input after every frame; this keeps going
/// until the underlying range is used up, so concatenated frames read as
/// one stream.
pub struct FrameStream<R: Read> {
    decoder: FrameDecoder<CountingReader<R>>,
    end: u64,
}

impl<R: Read> FrameStream<R> {
    /// Decodes `inner`, which is positioned at offset `start` and yields
    /// nothing past offset `end`.
    pub fn new(inner: R, start: u64, end: u64) -> Self {
        Self {
            decoder: FrameDecoder::new(CountingReader { inner, pos: start }),
            end,
        }
    }
}

impl<R: Read> BufRead for FrameStream<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        loop {
            let before = self.decoder.get_ref().pos;
            if !self.decoder.fill_buf()?.is_empty() || before >= self.end {
                break;
            }
            // a frame just ended; stop only if nothing was consumed
            if self.decoder.get_ref().pos == before {
                break;
            }
        }
        self.decoder.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.decoder.consume(amt)
    }
}

impl<R: Read> Read for FrameStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

/// Decodes the frame in `start..end` of `inner`, checking block checksums.
///
/// Returns the offset just past the last block whose output ends with a
/// newline, or `None` if no block does. The range may stop after any
/// complete block.
pub fn last_line_end<R: Read + Seek>(inner: &mut R, start: u64, end: u64) -> io::Result<Option<u64>> {
    inner.seek(SeekFrom::Start(start))?;
    let counting = CountingReader {
        inner: BufReader::new(inner.by_ref().take(end - start)),
        pos: start,
    };
    let mut decoder = FrameDecoder::new(counting);

    let mut line_end = None;
    loop {
        let block = decoder.fill_buf().map_err(|e| corrupt(start, &e.to_string()))?;
        if block.is_empty() {
            break;
        }
        let ends_line = block.last() == Some(&b'\n');
        let len = block.len();
        decoder.consume(len);
        if ends_line {
            line_end = Some(decoder.get_ref().pos);
        }
    }
    Ok(line_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lz4::liblz4::BlockChecksum;
    use lz4::{BlockMode, ContentChecksum, EncoderBuilder};
    use std::io::{Cursor, Write};

    /// One linked frame, one flushed block per record, left open.
    fn open_frame(records: &[&[u8]]) -> (Vec<u8>, Vec<usize>) {
        let mut encoder = EncoderBuilder::new()
            .block_mode(BlockMode::Linked)
            .block_checksum(BlockChecksum::BlockChecksumEnabled)
            .checksum(ContentChecksum::NoChecksum)
            .build(Vec::new())
            .unwrap();
        let mut ends = Vec::new();
        for record in records {
            encoder.write_all(record).unwrap();
            encoder.flush().unwrap();
            ends.push(encoder.writer().len());
        }
        (encoder.writer().clone(), ends)
    }

    fn closed_frame(data: &[u8]) -> Vec<u8> {
        let mut encoder = EncoderBuilder::new().build(Vec::new()).unwrap();
        encoder.write_all(data).unwrap();
        let (out, result) = encoder.finish();
        result.unwrap();
        out
    }

    fn scan(bytes: &[u8]) -> io::Result<StreamScan> {
        scan_stream(&mut Cursor::new(bytes))
    }

    #[test]
    fn test_closed_frames_are_fully_valid() {
        let mut stream = closed_frame(b"a\n");
        stream.extend(closed_frame(&vec![7u8; 200_000]));
        let s = scan(&stream).unwrap();
        assert_eq!(s.frames, 2);
        assert_eq!(s.valid_len, stream.len() as u64);
        assert!(!s.open_tail);
        assert!(!s.has_torn_tail());

        let mut out = Vec::new();
        FrameStream::new(Cursor::new(&stream), 0, s.valid_len)
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out.len(), 200_002);
        assert_eq!(&out[..2], b"a\n");
    }

    #[test]
    fn test_open_frame_ends_after_last_block() {
        let (stream, ends) = open_frame(&[b"{\"i\":0}\n", b"{\"i\":1}\n"]);
        let s = scan(&stream).unwrap();
        assert_eq!(s.valid_len, ends[1] as u64);
        assert_eq!(s.last_frame, Some(0));
        assert!(s.open_tail);
        let end = last_line_end(&mut Cursor::new(&stream), 0, s.valid_len).unwrap();
        assert_eq!(end, Some(ends[1] as u64));
    }

    #[test]
    fn test_block_without_newline_is_not_a_line_end() {
        let (stream, ends) = open_frame(&[b"{\"i\":0}\n", b"{\"i\":1,\"par"]);
        let end = last_line_end(&mut Cursor::new(&stream), 0, ends[1] as u64).unwrap();
        assert_eq!(end, Some(ends[0] as u64));

        let (stream, ends) = open_frame(&[b"{\"i\":1,\"par"]);
        let end = last_line_end(&mut Cursor::new(&stream), 0, ends[0] as u64).unwrap();
        assert_eq!(end, None);
    }

    #[test]
    fn test_stream_continues_across_frames() {
        let (mut stream, _) = open_frame(&[b"a\n"]);
        stream.extend_from_slice(&END_MARK);
        stream.extend(closed_frame(b"b\n"));
        let (open, ends) = open_frame(&[b"c\n", b"d\n"]);
        stream.extend(open);

        let s = scan(&stream).unwrap();
        assert_eq!(s.frames, 3);
        assert!(s.open_tail);
        assert_eq!(s.valid_len, stream.len() as u64);
        assert_eq!(s.last_frame, Some((stream.len() - ends[1]) as u64));

        let mut text = String::new();
        FrameStream::new(Cursor::new(&stream), 0, s.valid_len)
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "a\nb\nc\nd\n");
    }

    #[test]
    fn test_every_cut_inside_a_block_rolls_back_to_previous_block() {
        let (stream, ends) = open_frame(&[b"{\"i\":0}\n", b"{\"i\":1}\n"]);
        for cut in ends[0] + 1..ends[1] {
            let s = scan(&stream[..cut]).unwrap();
            assert_eq!(s.valid_len, ends[0] as u64, "cut at {}", cut);
            assert!(s.has_torn_tail());
        }
    }

    #[test]
    fn test_torn_header_drops_the_frame() {
        let first = closed_frame(b"a\n");
        let second = closed_frame(b"b\n");
        for cut in 1..7 {
            let mut stream = first.clone();
            stream.extend_from_slice(&second[..cut]);
            let s = scan(&stream).unwrap();
            assert_eq!(s.valid_len, first.len() as u64, "cut at {}", cut);
            assert_eq!(s.last_frame, Some(0));
        }
    }

    #[test]
    fn test_garbage_is_invalid_data() {
        let err = scan(b"{\"plain\":true}\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(scan(b"{").unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_flipped_block_checksum_fails_verification() {
        let (mut stream, ends) = open_frame(&[b"some payload that compresses\n"]);
        stream[ends[0] - 1] ^= 0xFF;
        let s = scan(&stream).unwrap();
        let err = last_line_end(&mut Cursor::new(&stream), 0, s.valid_len).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
