// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection classification.
//!
//! Decides from the first meaningful byte whether a new connection speaks
//! the agent protocol (`{` or `[`) or is foreign traffic for the HTTP
//! upstream. Bytes read while deciding are replayed to whichever consumer
//! takes the connection.

use std::io::Cursor;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, Chain};

use crate::proxy_protocol::{self, ProxyError, ProxyHeader, MAX_LINE_LEN, SIGNATURE};

/// A stream with already-inspected bytes put back in front.
pub type Replay<R> = Chain<Cursor<Vec<u8>>, R>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// JSON-framed agent protocol.
    Protocol,
    /// Anything else; carries the first non-whitespace byte.
    Foreign(u8),
}

/// Outcome of classifying a connection.
#[derive(Debug)]
pub struct Classified<R> {
    pub kind: StreamKind,
    pub proxy: Option<ProxyHeader>,
    /// The connection, starting at the first non-whitespace byte.
    pub stream: Replay<R>,
}

/// Reasons to drop a connection before any reply is written.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad PROXY preamble: {0}")]
    Proxy(#[from] ProxyError),

    #[error("connection closed before classification")]
    Closed,
}

/// Classify a freshly accepted connection.
///
/// Consumes an optional PROXY preamble and leading whitespace, nothing else.
pub async fn classify<R>(stream: R) -> Result<Classified<R>, ClassifyError>
where
    R: AsyncRead + Unpin,
{
    let mut peek = Peek { inner: stream, buf: Vec::new(), eof: false };

    let proxy = peek.proxy_preamble().await?;

    loop {
        peek.fill_to(1).await?;
        let blank =
            peek.buf.iter().take_while(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r')).count();
        peek.buf.drain(..blank);
        match peek.buf.first().copied() {
            None if peek.eof => return Err(ClassifyError::Closed),
            None => {}
            Some(first) => {
                let kind = match first {
                    b'{' | b'[' => StreamKind::Protocol,
                    other => StreamKind::Foreign(other),
                };
                let stream = Cursor::new(peek.buf).chain(peek.inner);
                return Ok(Classified { kind, proxy, stream });
            }
        }
    }
}

/// Look-ahead buffer over the raw connection.
struct Peek<R> {
    inner: R,
    buf: Vec<u8>,
    eof: bool,
}

impl<R> Peek<R>
where
    R: AsyncRead + Unpin,
{
    /// Read until at least `n` bytes are buffered or the stream ends.
    async fn fill_to(&mut self, n: usize) -> std::io::Result<()> {
        let mut chunk = [0u8; 512];
        while self.buf.len() < n && !self.eof {
            let read = self.inner.read(&mut chunk).await?;
            if read == 0 {
                self.eof = true;
            } else {
                self.buf.extend_from_slice(&chunk[..read]);
            }
        }
        Ok(())
    }

    /// Strip a PROXY preamble if the stream starts with one.
    ///
    /// Only reads further while the buffered bytes could still be the
    /// signature, so a short `{}` is never held waiting for more input.
    async fn proxy_preamble(&mut self) -> Result<Option<ProxyHeader>, ClassifyError> {
        loop {
            let have = self.buf.len().min(SIGNATURE.len());
            if !SIGNATURE.starts_with(&self.buf[..have]) {
                return Ok(None);
            }
            if have == SIGNATURE.len() {
                break;
            }
            if self.eof {
                return Ok(None);
            }
            self.fill_to(self.buf.len() + 1).await?;
        }

        let line_end = loop {
            let window = &self.buf[..self.buf.len().min(MAX_LINE_LEN)];
            if let Some(pos) = window.windows(2).position(|w| w == b"\r\n") {
                break pos;
            }
            if self.buf.len() >= MAX_LINE_LEN {
                return Err(ProxyError::TooLong.into());
            }
            if self.eof {
                return Err(ProxyError::Unterminated.into());
            }
            self.fill_to(self.buf.len() + 1).await?;
        };

        let header = proxy_protocol::parse_proxy_line(&self.buf[..line_end])?;
        self.buf.drain(..line_end + 2);
        Ok(Some(header))
    }
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
