//! In-memory byte streams.
//!
//! The redaction core runs synchronously over owned memory: the whole input
//! is read once at the edges and every parser works on bounded views of it.
//! A [`Stream`] is a window `[start, end)` into shared bytes with its own
//! cursor; sub-views share the underlying allocation.

use super::error::{RedactError, RedactResult};
use std::sync::Arc;

/// A positioned view into shared bytes.
#[derive(Debug, Clone)]
pub struct Stream {
    data: Arc<Vec<u8>>,
    start: usize,
    end: usize,
    pos: usize,
}

impl Stream {
    /// Creates a stream over shared bytes.
    pub fn new(data: Arc<Vec<u8>>) -> Self {
        let end = data.len();
        Stream {
            data,
            start: 0,
            end,
            pos: 0,
        }
    }

    /// Creates a stream that owns its bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(Arc::new(bytes))
    }

    /// Creates a bounded sub-view `[begin, begin + length)` of this stream.
    ///
    /// Offsets are relative to this view. The sub-view shares the backing
    /// bytes and starts with its cursor at 0.
    pub fn view(&self, begin: usize, length: usize) -> RedactResult<Stream> {
        let abs_begin = self.start + begin;
        let abs_end = abs_begin + length;
        if abs_end > self.end {
            return Err(RedactError::InvalidByteRange {
                begin,
                end: begin + length,
            });
        }
        Ok(Stream {
            data: Arc::clone(&self.data),
            start: abs_begin,
            end: abs_end,
            pos: abs_begin,
        })
    }

    /// Length of this view in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Current cursor position, relative to the view start.
    pub fn pos(&self) -> usize {
        self.pos - self.start
    }

    /// Moves the cursor, relative to the view start.
    pub fn set_pos(&mut self, pos: usize) -> RedactResult<()> {
        if pos > self.len() {
            return Err(RedactError::InvalidPosition {
                pos,
                length: self.len(),
            });
        }
        self.pos = self.start + pos;
        Ok(())
    }

    /// Reads one byte and advances the cursor.
    pub fn get_byte(&mut self) -> RedactResult<u8> {
        if self.pos >= self.end {
            return Err(RedactError::UnexpectedEndOfStream);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Reads the byte at the cursor without advancing.
    pub fn peek_byte(&self) -> RedactResult<u8> {
        if self.pos >= self.end {
            return Err(RedactError::UnexpectedEndOfStream);
        }
        Ok(self.data[self.pos])
    }

    /// Reads exactly `n` bytes and advances the cursor.
    pub fn read_bytes(&mut self, n: usize) -> RedactResult<Vec<u8>> {
        if self.pos + n > self.end {
            return Err(RedactError::UnexpectedEndOfStream);
        }
        let out = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    /// The full byte slice of this view.
    pub fn bytes(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// The shared backing bytes (whole allocation, not just this view).
    pub fn backing(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.data)
    }

    /// Bytes from the cursor to the end of the view.
    pub fn remaining_bytes(&self) -> &[u8] {
        &self.data[self.pos..self.end]
    }
}
