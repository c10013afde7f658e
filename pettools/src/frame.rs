//! Framing: keeping an arbitrary byte stream aligned on record boundaries
//!
//! Records carry no length or checksum, only a sync word in the top five
//! bits of their first byte. The scanner keeps a window of at most one
//! record. When the window does not start on a sync word it is shifted to
//! the next candidate inside the window, and failing that, the stream is
//! read a byte at a time until one turns up. Discarded bytes are counted
//! but are never an error.

use std::io::{self, ErrorKind, Read};
use tracing::debug;

use crate::bit::is_header;
use crate::RECORD_SIZE;

/// A one-record sliding window over a byte stream
#[derive(Clone, Debug, Default)]
pub struct Scanner {
    buf: [u8; RECORD_SIZE],
    /// Bytes of `buf` currently holding stream data
    len: usize,
    resyncs: u64,
    dropped: u64,
}

impl Scanner {
    pub fn new() -> Self {
        Scanner::default()
    }

    /// Number of times alignment was lost
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Number of bytes thrown away while realigning
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Bytes read but not yet part of a complete record
    pub fn pending(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The aligned record in the window, if the window is full and aligned
    pub fn record(&self) -> Option<&[u8; RECORD_SIZE]> {
        if self.len == RECORD_SIZE && is_header(self.buf[0]) {
            Some(&self.buf)
        } else {
            None
        }
    }

    /// Ensure the window holds a full record starting with a sync word.
    ///
    /// Returns `Ok(false)` once the stream runs dry, including when it ends
    /// part way through a record or while hunting for a sync word.
    pub fn align<R: Read + ?Sized>(&mut self, src: &mut R) -> io::Result<bool> {
        loop {
            if !self.fill(src)? {
                return Ok(false);
            }
            if is_header(self.buf[0]) {
                return Ok(true);
            }

            self.resyncs += 1;
            match self.buf[1..].iter().position(|&b| is_header(b)) {
                Some(i) => {
                    debug!(skipped = i + 1, "realigning record stream");
                    self.shift(i + 1);
                }
                None => {
                    self.shift(RECORD_SIZE);
                    let before = self.dropped;
                    if !self.hunt(src)? {
                        return Ok(false);
                    }
                    debug!(
                        skipped = RECORD_SIZE as u64 + self.dropped - before,
                        "resynchronized record stream"
                    );
                }
            }
        }
    }

    /// Align, then hand out the record and empty the window
    pub fn next_record<R: Read + ?Sized>(
        &mut self,
        src: &mut R,
    ) -> io::Result<Option<[u8; RECORD_SIZE]>> {
        if self.align(src)? {
            self.len = 0;
            Ok(Some(self.buf))
        } else {
            Ok(None)
        }
    }

    /// Read until the window is full. Partial reads are fine; only a read
    /// of zero bytes means the stream is done.
    fn fill<R: Read + ?Sized>(&mut self, src: &mut R) -> io::Result<bool> {
        while self.len < RECORD_SIZE {
            match src.read(&mut self.buf[self.len..]) {
                Ok(0) => return Ok(false),
                Ok(n) => self.len += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Discard the first `n` bytes of the window
    fn shift(&mut self, n: usize) {
        self.buf.copy_within(n..self.len, 0);
        self.len -= n;
        self.dropped += n as u64;
    }

    /// Read single bytes until a sync word, which becomes the start of an
    /// otherwise empty window
    fn hunt<R: Read + ?Sized>(&mut self, src: &mut R) -> io::Result<bool> {
        let mut byte = [0u8; 1];
        loop {
            match src.read(&mut byte) {
                Ok(0) => return Ok(false),
                Ok(_) if is_header(byte[0]) => {
                    self.buf[0] = byte[0];
                    self.len = 1;
                    return Ok(true);
                }
                Ok(_) => self.dropped += 1,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}
