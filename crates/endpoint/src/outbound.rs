// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-writer outbound queue.
//!
//! Every byte written to a connection goes through one queue drained by one
//! task, whether it is a hook's reply or a proactive request.

use ae_wire::{write_envelope, Outbound, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why an envelope could not be queued.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum OutboxError {
    /// The connection's writer has stopped; nothing more can be sent.
    #[error("connection writer has stopped")]
    Closed,

    /// The peer is not reading and the queue is at capacity.
    #[error("outbound queue is full")]
    Full,
}

/// Non-owning handle to a connection's outbound queue.
///
/// The queue is bounded so a peer that stops reading cannot make the
/// endpoint buffer without limit.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Outbound>,
}

impl Outbox {
    /// Create a queue holding at most `capacity` envelopes; the receiver
    /// belongs to the writer task.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue an envelope behind everything already queued, without waiting.
    pub fn push(&self, message: impl Into<Outbound>) -> Result<(), OutboxError> {
        self.tx.try_send(message.into()).map_err(|e| match e {
            TrySendError::Full(_) => OutboxError::Full,
            TrySendError::Closed(_) => OutboxError::Closed,
        })
    }

    /// Enqueue an envelope, waiting for the writer to make room.
    pub async fn send(&self, message: impl Into<Outbound>) -> Result<(), OutboxError> {
        self.tx.send(message.into()).await.map_err(|_| OutboxError::Closed)
    }

    /// Wait until `slots` envelopes (at most the capacity) can be pushed.
    pub async fn wait_for_room(&self, slots: usize) -> Result<(), OutboxError> {
        let slots = slots.clamp(1, self.tx.max_capacity());
        // Dropping the permits hands the slots back
        self.tx.reserve_many(slots).await.map(drop).map_err(|_| OutboxError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Drain the queue onto `writer` in FIFO order.
///
/// Runs until the queue closes, a write fails, or `close` fires. On `close`,
/// envelopes already queued are still written before returning.
pub async fn run_writer<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Outbound>,
    close: CancellationToken,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let result = drain(&mut writer, &mut rx, &close).await;

    // Later pushes must fail fast rather than queue into the void
    rx.close();
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "writer shutdown failed");
    }
    result
}

async fn drain<W>(
    writer: &mut W,
    rx: &mut mpsc::Receiver<Outbound>,
    close: &CancellationToken,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            message = rx.recv() => match message {
                Some(message) => write_envelope(writer, &message).await?,
                None => return Ok(()),
            },
            _ = close.cancelled() => {
                rx.close();
                while let Some(message) = rx.recv().await {
                    write_envelope(writer, &message).await?;
                }
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
#[path = "outbound_tests.rs"]
mod tests;
