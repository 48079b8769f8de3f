// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stream framing: one JSON value per read, no length prefix.

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::Outbound;

/// Largest single JSON value accepted from a peer (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Transport-tier errors. All of them are fatal to the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection closed mid-message")]
    Truncated,

    #[error("Message exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
}

/// Decodes successive JSON values from a buffered byte stream.
///
/// Bytes past the end of the decoded value stay buffered for the next call.
pub struct EnvelopeReader<R> {
    inner: R,
    buf: Vec<u8>,
    scan: Scan,
    max_frame_len: usize,
}

impl<R> EnvelopeReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(inner: R, max_frame_len: usize) -> Self {
        Self { inner, buf: Vec::new(), scan: Scan::default(), max_frame_len }
    }

    /// Read the next complete JSON value.
    ///
    /// Each byte is scanned once to find where the value ends; it is only
    /// parsed when complete. Returns [`ProtocolError::ConnectionClosed`] on
    /// EOF between values.
    pub async fn next_value(&mut self) -> Result<Value, ProtocolError> {
        loop {
            if self.scan.pos == 0 {
                let blank = self.buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
                self.buf.drain(..blank);
            }

            if let Some(end) = self.scan.advance(&self.buf) {
                if end > self.max_frame_len {
                    return Err(ProtocolError::FrameTooLarge { limit: self.max_frame_len });
                }
                self.scan = Scan::default();
                let parsed = serde_json::from_slice(&self.buf[..end]);
                self.buf.drain(..end);
                return Ok(parsed?);
            }
            if self.buf.len() > self.max_frame_len {
                return Err(ProtocolError::FrameTooLarge { limit: self.max_frame_len });
            }

            let chunk = self.inner.fill_buf().await?;
            if chunk.is_empty() {
                return self.finish();
            }
            let n = chunk.len();
            self.buf.extend_from_slice(chunk);
            self.inner.consume(n);
        }
    }

    /// EOF: a trailing bare scalar is still a value; anything else is cut off.
    fn finish(&mut self) -> Result<Value, ProtocolError> {
        if self.buf.is_empty() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.scan = Scan::default();
        let parsed = serde_json::from_slice(&self.buf);
        self.buf.clear();
        match parsed {
            Ok(value) => Ok(value),
            Err(e) if e.is_eof() => Err(ProtocolError::Truncated),
            Err(e) => Err(ProtocolError::Json(e)),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Resumable search for the end of the value at the front of the buffer.
#[derive(Debug, Default)]
struct Scan {
    /// Bytes already examined
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Scan {
    /// Length of the leading value, once its last byte has arrived.
    ///
    /// Objects, arrays and strings end at their closing byte. Numbers and
    /// literals end at the first delimiter after them.
    fn advance(&mut self, buf: &[u8]) -> Option<usize> {
        let bare = !matches!(buf.first().copied()?, b'{' | b'[' | b'"');
        while let Some(&b) = buf.get(self.pos) {
            self.pos += 1;
            if bare {
                if is_delimiter(b) {
                    return Some((self.pos - 1).max(1));
                }
            } else if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Some(self.pos);
                    }
                }
            } else {
                match b {
                    b'"' => self.in_string = true,
                    b'{' | b'[' => self.depth += 1,
                    b'}' | b']' => {
                        self.depth = self.depth.saturating_sub(1);
                        if self.depth == 0 {
                            return Some(self.pos);
                        }
                    }
                    _ => {}
                }
            }
        }
        None
    }
}

fn is_delimiter(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'{' | b'}' | b'[' | b']' | b',' | b':' | b'"')
}

/// Serialize an envelope as newline-terminated JSON.
pub fn encode(message: &Outbound) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Write one envelope and flush.
pub async fn write_envelope<W>(writer: &mut W, message: &Outbound) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode(message)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
