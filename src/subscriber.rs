//! Blocking client for the broadcast protocol.
//!
//! Connects to a hub and turns the newline-delimited stream back into
//! entries. Plotting front ends and tests sit on top of this.

use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::codec::Codec;
use crate::entry::Entry;
use crate::error::Result;

pub struct Subscriber {
    reader: BufReader<TcpStream>,
    codec: Arc<dyn Codec>,
    line: Vec<u8>,
}

impl Subscriber {
    /// Connects to the hub at `addr`.
    ///
    /// The hub first replays its backlog, then forwards entries as they are
    /// published.
    pub fn connect(addr: SocketAddr, codec: Arc<dyn Codec>) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            reader: BufReader::new(stream),
            codec,
            line: Vec::new(),
        })
    }

    /// Bounds how long [`recv`](Self::recv) waits for the next entry.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    /// Waits for the next entry. `Ok(None)` means the hub closed the connection.
    ///
    /// A read timeout surfaces as an `Io` error of kind `WouldBlock` or
    /// `TimedOut`, depending on the platform. Bytes of a line that was
    /// interrupted by the timeout are kept for the next call.
    pub fn recv(&mut self) -> Result<Option<Entry>> {
        self.reader.read_until(b'\n', &mut self.line)?;
        if self.line.last() != Some(&b'\n') {
            return Ok(None);
        }
        let decoded = self.codec.decode(&self.line[..self.line.len() - 1]);
        self.line.clear();
        Ok(Some(decoded?))
    }
}

impl Iterator for Subscriber {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv().transpose()
    }
}
