//! Per-connection request accumulation.
//!
//! Each connection owns one `ConnectionBuffer`. Every successful read is
//! appended to it, and the configured `Framing` decides after each append
//! whether a complete request has arrived.
//!
//! ## Framing
//!
//! - `ShortRead`: a read returning fewer bytes than the chunk size ends the
//!   message. This only holds when the peer's writes line up with the read
//!   size; a request that is an exact multiple of the chunk size never
//!   completes until the peer half-closes.
//! - `BlankLine`: the message ends at the first `\r\n\r\n`.
//! - `EndOfStream`: the message ends when the peer half-closes.
//!
//! Under every policy a zero-length read on a non-empty buffer completes
//! the message.

use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use std::io;

const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Policy used to detect the end of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// A read shorter than the chunk size ends the message.
    ShortRead,
    /// A blank line (`\r\n\r\n`) ends the message.
    #[default]
    BlankLine,
    /// Only the peer closing its write half ends the message.
    EndOfStream,
}

/// Outcome of feeding bytes into a `ConnectionBuffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// More bytes are needed.
    Pending,
    /// The accumulated bytes form a complete message.
    Complete,
    /// The peer closed before sending anything.
    Empty,
}

/// Bytes accumulated for one connection between read events.
#[derive(Debug)]
pub struct ConnectionBuffer {
    data: BytesMut,
    chunk_size: usize,
    max_len: usize,
    framing: Framing,
}

impl ConnectionBuffer {
    /// Create an empty buffer.
    ///
    /// # Arguments
    /// * `chunk_size` - Bytes requested per read call
    /// * `max_len` - Upper bound on accumulated bytes
    /// * `framing` - End-of-message policy
    pub fn new(chunk_size: usize, max_len: usize, framing: Framing) -> Self {
        Self {
            data: BytesMut::with_capacity(chunk_size),
            chunk_size,
            max_len,
            framing,
        }
    }

    /// Append the first `read` bytes of `chunk`.
    ///
    /// Returns an `InvalidData` error once the accumulated request would
    /// exceed `max_len`.
    pub fn append(&mut self, chunk: &[u8], read: usize) -> io::Result<Completion> {
        let read = read.min(chunk.len());
        if self.data.len() + read > self.max_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("request exceeds {} bytes", self.max_len),
            ));
        }

        let scan_from = self.data.len().saturating_sub(TERMINATOR.len() - 1);
        self.data.extend_from_slice(&chunk[..read]);

        let complete = match self.framing {
            Framing::ShortRead => read < self.chunk_size,
            Framing::BlankLine => contains_terminator(&self.data[scan_from..]),
            Framing::EndOfStream => false,
        };

        Ok(if complete {
            Completion::Complete
        } else {
            Completion::Pending
        })
    }

    /// Record that the peer closed its write half.
    pub fn end_of_stream(&self) -> Completion {
        if self.data.is_empty() {
            Completion::Empty
        } else {
            Completion::Complete
        }
    }

    /// Hand the accumulated bytes off, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    /// Bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }
}

fn contains_terminator(data: &[u8]) -> bool {
    data.windows(TERMINATOR.len()).any(|w| w == TERMINATOR)
}
