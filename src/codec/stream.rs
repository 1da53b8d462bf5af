//! Buffered reading of a response body delivered as a sequence of byte chunks.

use crate::error::DapError;

use bytes::{Buf, Bytes, BytesMut};
use std::fmt;

/// Chunks of a response body, in order.
pub type ChunkIter = Box<dyn Iterator<Item = Result<Bytes, DapError>> + Send>;

/// Reader over a chunked byte stream.
///
/// Chunk boundaries are invisible to callers: reads, peeks and delimiter searches span any
/// number of chunks, and bytes past the requested range stay buffered for the next call.
pub struct StreamReader {
    chunks: ChunkIter,
    buffer: BytesMut,
    /// Bytes handed out so far
    position: usize,
}

impl fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader")
            .field("buffered", &self.buffer.len())
            .field("position", &self.position)
            .finish()
    }
}

impl StreamReader {
    /// Return a new StreamReader.
    ///
    /// # Arguments
    ///
    /// * `chunks`: Iterator over the body chunks
    pub fn new(chunks: ChunkIter) -> Self {
        StreamReader {
            chunks,
            buffer: BytesMut::new(),
            position: 0,
        }
    }

    /// A reader over a complete in-memory body.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::new(Box::new(std::iter::once(Ok(bytes))))
    }

    /// Number of bytes consumed since the start of the stream.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Buffer chunks until at least `n` bytes are available.
    ///
    /// Returns false if the stream ends first.
    fn fill(&mut self, n: usize) -> Result<bool, DapError> {
        while self.buffer.len() < n {
            match self.chunks.next() {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    fn eof(&self, needed: usize) -> DapError {
        DapError::UnexpectedEof {
            needed,
            available: self.buffer.len(),
        }
    }

    /// Consume exactly `n` bytes.
    pub fn read(&mut self, n: usize) -> Result<Bytes, DapError> {
        if !self.fill(n)? {
            return Err(self.eof(n));
        }
        self.position += n;
        Ok(self.buffer.split_to(n).freeze())
    }

    /// Return the next `n` bytes without consuming them.
    pub fn peek(&mut self, n: usize) -> Result<&[u8], DapError> {
        if !self.fill(n)? {
            return Err(self.eof(n));
        }
        Ok(&self.buffer[..n])
    }

    /// Consume a big-endian 32-bit unsigned integer.
    pub fn read_u32(&mut self) -> Result<u32, DapError> {
        Ok(self.read(4)?.get_u32())
    }

    /// Consume everything up to and including `delimiter`.
    ///
    /// Returns the bytes before the delimiter. The delimiter may be split across chunks.
    #[tracing::instrument(level = "DEBUG", skip_all)]
    pub fn read_until(&mut self, delimiter: &[u8]) -> Result<Bytes, DapError> {
        if delimiter.is_empty() {
            return Ok(Bytes::new());
        }
        let mut searched = 0;
        loop {
            let found = self.buffer[searched..]
                .windows(delimiter.len())
                .position(|window| window == delimiter);
            if let Some(offset) = found {
                let end = searched + offset;
                let out = self.buffer.split_to(end).freeze();
                self.buffer.advance(delimiter.len());
                self.position += end + delimiter.len();
                return Ok(out);
            }
            // A partial delimiter may sit at the end of the buffer.
            searched = self.buffer.len().saturating_sub(delimiter.len() - 1);
            match self.chunks.next() {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => {
                    return Err(DapError::Framing(format!(
                        "delimiter {:?} not found after {} bytes",
                        String::from_utf8_lossy(delimiter),
                        self.position + self.buffer.len()
                    )))
                }
            }
        }
    }

    /// Whether the stream has no more bytes.
    pub fn is_exhausted(&mut self) -> Result<bool, DapError> {
        Ok(!self.fill(1)?)
    }
}
