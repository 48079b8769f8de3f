// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection dispatch loop.

use std::ops::ControlFlow;
use std::sync::Arc;

use ae_wire::{
    codes, Envelope, EnvelopeReader, ErrorBody, Outbound, ProtocolError, Request, Response,
};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AuthError, Authenticator, HookConn, HookError, Hub};
use crate::context::ConnContext;
use crate::outbound::{self, Outbox, OutboxError};
use crate::requester::Requester;

/// Why a connection stopped being served.
#[derive(Debug)]
enum Disconnect {
    Transport(ProtocolError),
    Unauthenticated(AuthError),
    HookClosed,
    WriterGone,
    /// A hook could not queue its reply because the agent stopped reading.
    Backlogged,
}

/// Free outbound slots awaited before a hook chain or the authenticator runs.
const HOOK_HEADROOM: usize = 16;

/// Owns the connection's registry entry; dropping it (even while unwinding
/// from a panicking hook) marks the requester dead and releases it.
struct Session {
    hub: Arc<Hub>,
    ctx: ConnContext,
    outbox: Outbox,
    requester: Option<Requester>,
}

pub(super) async fn run<R, W>(hub: Arc<Hub>, reader: R, writer: W, ctx: ConnContext)
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbox, rx) = Outbox::channel(hub.config.outbound_capacity);
    let close = CancellationToken::new();
    let writer_task = tokio::spawn(outbound::run_writer(writer, rx, close.clone()));
    let close_guard = close.drop_guard();

    debug!(conn = %ctx.id, remote = %ctx.remote_addr, "serving agent connection");
    let mut reader = EnvelopeReader::new(reader, hub.config.max_frame_len);
    let mut session = Session { hub, ctx, outbox, requester: None };

    let reason = loop {
        let value = match reader.next_value().await {
            Ok(value) => value,
            Err(e) => break Disconnect::Transport(e),
        };
        if let ControlFlow::Break(reason) = session.dispatch_value(value).await {
            break reason;
        }
    };

    let ctx = session.ctx;
    log_disconnect(&ctx, &reason);
    drop(session);

    drop(close_guard);
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(conn = %ctx.id, error = %e, "writer stopped with error"),
        Err(e) => warn!(conn = %ctx.id, error = %e, "writer task failed"),
    }
}

fn log_disconnect(ctx: &ConnContext, reason: &Disconnect) {
    match reason {
        Disconnect::Transport(ProtocolError::ConnectionClosed) => {
            info!(conn = %ctx.id, "agent disconnected")
        }
        Disconnect::Transport(e) => warn!(conn = %ctx.id, error = %e, "dropping connection"),
        Disconnect::Unauthenticated(e) => {
            warn!(conn = %ctx.id, remote = %ctx.remote_addr, error = %e, "authentication failed")
        }
        Disconnect::HookClosed => info!(conn = %ctx.id, "connection closed by hook"),
        Disconnect::WriterGone => debug!(conn = %ctx.id, "writer stopped, closing connection"),
        Disconnect::Backlogged => {
            warn!(conn = %ctx.id, remote = %ctx.remote_addr, "agent stopped reading replies")
        }
    }
}

impl Session {
    fn version(&self) -> &str {
        &self.hub.config.version
    }

    fn conn(&self) -> HookConn {
        HookConn::new(self.ctx, self.outbox.clone(), self.requester.clone(), self.version().into())
    }

    /// Queue a protocol reply, waiting for the writer if the queue is full.
    async fn reply(&self, message: impl Into<Outbound>) -> ControlFlow<Disconnect> {
        match self.outbox.send(message).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => ControlFlow::Break(outbox_disconnect(e)),
        }
    }

    /// Stall dispatch until hooks have room to queue their replies.
    async fn headroom(&self) -> ControlFlow<Disconnect> {
        match self.outbox.wait_for_room(HOOK_HEADROOM).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => ControlFlow::Break(outbox_disconnect(e)),
        }
    }

    /// Dispatch one decoded JSON value; arrays are batches handled in order.
    async fn dispatch_value(&mut self, value: Value) -> ControlFlow<Disconnect> {
        match value {
            Value::Array(batch) => {
                debug!(conn = %self.ctx.id, len = batch.len(), "received batch");
                for item in batch {
                    self.dispatch_one(item).await?;
                }
                ControlFlow::Continue(())
            }
            value => self.dispatch_one(value).await,
        }
    }

    async fn dispatch_one(&mut self, value: Value) -> ControlFlow<Disconnect> {
        let envelope = match Envelope::from_value(value) {
            Ok(envelope) => envelope,
            Err(rejected) => {
                warn!(conn = %self.ctx.id, error = %rejected, "invalid envelope");
                return self.reply(Response::invalid(&rejected, self.version())).await;
            }
        };

        if envelope.version() != self.version() {
            debug!(
                conn = %self.ctx.id,
                id = envelope.id(),
                got = envelope.version(),
                "version mismatch"
            );
            return self.reply(Response::version_mismatch(&envelope, self.version())).await;
        }

        if self.requester.is_none() {
            match self.hub.authenticator() {
                Some(authenticator) => {
                    return self.authenticate(authenticator.as_ref(), envelope.into_request()).await
                }
                // No gate configured: admit and dispatch this envelope normally
                None => self.admit(envelope.source(), envelope.target()),
            }
        }

        match envelope {
            Envelope::Request(request) => self.run_hooks(request).await,
            Envelope::Response(response) => {
                self.deliver(response);
                ControlFlow::Continue(())
            }
        }
    }

    async fn authenticate(
        &mut self,
        authenticator: &dyn Authenticator,
        request: Request,
    ) -> ControlFlow<Disconnect> {
        debug!(
            conn = %self.ctx.id,
            agent = %request.source,
            method = %request.method,
            "authenticating"
        );
        self.headroom().await?;
        match authenticator.authenticate(&request, &self.conn()).await {
            Ok(()) => {
                self.admit(&request.source, &request.target);
                ControlFlow::Continue(())
            }
            Err(AuthError::Outbox(e)) => ControlFlow::Break(outbox_disconnect(e)),
            Err(e) => ControlFlow::Break(Disconnect::Unauthenticated(e)),
        }
    }

    fn admit(&mut self, agent: &str, local: &str) {
        let requester = Requester::new(
            self.outbox.clone(),
            agent.to_string(),
            local.to_string(),
            self.version().to_string(),
            self.ctx,
        );
        info!(conn = %self.ctx.id, agent, remote = %self.ctx.remote_addr, "agent authenticated");
        self.requester = Some(requester.clone());
        self.hub.admit(requester);
    }

    async fn run_hooks(&self, request: Request) -> ControlFlow<Disconnect> {
        let chain = self.hub.chain(&request.method);
        if chain.is_empty() {
            debug!(conn = %self.ctx.id, id = request.id, method = %request.method, "no handler");
            let message = format!("no handler for method {:?}", request.method);
            let error = ErrorBody::new(codes::NO_SUCH_HANDLER, message).with_field("method");
            return self.reply(request.reply_error(error)).await;
        }

        debug!(
            conn = %self.ctx.id,
            id = request.id,
            method = %request.method,
            hooks = chain.len(),
            "dispatching request"
        );
        self.headroom().await?;
        let conn = self.conn();
        let mut close = false;
        for hook in chain {
            match hook.call(&request, &conn).await {
                Ok(()) => {}
                Err(HookError::Close) => close = true,
                Err(HookError::Outbox(e)) => return ControlFlow::Break(outbox_disconnect(e)),
                Err(HookError::Failed(e)) => {
                    warn!(conn = %self.ctx.id, method = %request.method, error = %e, "hook failed")
                }
            }
        }

        if close {
            ControlFlow::Break(Disconnect::HookClosed)
        } else {
            ControlFlow::Continue(())
        }
    }

    fn deliver(&self, response: Response) {
        match &self.requester {
            Some(requester) => {
                requester.deliver(response);
            }
            None => warn!(conn = %self.ctx.id, id = response.id, "reply before authentication"),
        }
    }

}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(requester) = self.requester.take() {
            requester.mark_dead();
            self.hub.release(&requester);
        }
    }
}

fn outbox_disconnect(e: OutboxError) -> Disconnect {
    match e {
        OutboxError::Closed => Disconnect::WriterGone,
        OutboxError::Full => Disconnect::Backlogged,
    }
}
