//! Peekable reader for sniffing uploads.
//!
//! Thin wrapper around [`Read::take`], [`Cursor`] and [`Chain`] for the
//! peek-decide-stream pattern: read a few header bytes, pick a decoder, then
//! replay those bytes in front of the rest of the stream.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io::{Chain, Cursor, Read};

/// A resumable [`Read`]er for peek-decide-stream workflows.
pub struct PeekableReader<R> {
    inner: R,
    buffer: Vec<u8>,
}

impl<R: Read> PeekableReader<R> {
    /// Wrap any reader for peeking.
    pub fn new(inner: R) -> Self {
        Self { inner, buffer: Vec::new() }
    }

    /// Read up to `limit` bytes from the start of the stream.
    ///
    /// Successive calls do not accumulate: `peek(2)` followed by `peek(8)`
    /// returns the first 8 bytes (or fewer, if the stream is shorter).
    pub fn peek(&mut self, limit: usize) -> Result<&[u8]> {
        if self.buffer.len() >= limit {
            return Ok(&self.buffer[..limit]);
        }
        let needed = (limit - self.buffer.len()) as u64;
        (&mut self.inner).take(needed).read_to_end(&mut self.buffer).or_raise(|| ErrorKind::Io)?;
        Ok(&self.buffer[..self.buffer.len().min(limit)])
    }

    /// Convert into a [`Read`]er that replays the peeked bytes, then streams
    /// the remainder.
    pub fn into_reader(self) -> Chain<Cursor<Vec<u8>>, R> {
        Cursor::new(self.buffer).chain(self.inner)
    }
}
