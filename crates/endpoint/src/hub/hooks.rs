// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Callback traits for authentication and per-method hooks.

use ae_wire::{ErrorBody, Outbound, Request};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::context::ConnContext;
use crate::outbound::{Outbox, OutboxError};
use crate::requester::Requester;

/// Outcome of a hook other than success.
#[derive(Debug, Error)]
pub enum HookError {
    /// Stop serving this connection once the current chain has run.
    #[error("hook requested connection close")]
    Close,

    #[error(transparent)]
    Outbox(#[from] OutboxError),

    /// Logged; the rest of the chain still runs.
    #[error("{0}")]
    Failed(String),
}

/// Why an authenticator turned a connection away.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

/// What a hook sees of the connection it is serving.
///
/// Writes go through the connection's bounded outbound queue; hooks never
/// touch the socket. The hub waits for free slots before a chain runs, so a
/// write only fails with [`OutboxError::Full`] when the agent has stopped
/// reading.
#[derive(Debug, Clone)]
pub struct HookConn {
    ctx: ConnContext,
    outbox: Outbox,
    requester: Option<Requester>,
    version: String,
}

impl HookConn {
    pub(crate) fn new(
        ctx: ConnContext,
        outbox: Outbox,
        requester: Option<Requester>,
        version: String,
    ) -> Self {
        Self { ctx, outbox, requester, version }
    }

    pub fn context(&self) -> &ConnContext {
        &self.ctx
    }

    /// The connection's requester; `None` until authentication succeeds.
    pub fn requester(&self) -> Option<&Requester> {
        self.requester.as_ref()
    }

    /// Protocol version this endpoint speaks.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Queue any envelope for the connection's writer.
    pub fn send(&self, message: impl Into<Outbound>) -> Result<(), OutboxError> {
        self.outbox.push(message)
    }

    /// Queue a successful reply to `request`.
    pub fn reply(&self, request: &Request, result: Value) -> Result<(), OutboxError> {
        self.outbox.push(request.reply(result))
    }

    /// Queue an error reply to `request`.
    pub fn reply_error(&self, request: &Request, error: ErrorBody) -> Result<(), OutboxError> {
        self.outbox.push(request.reply_error(error))
    }
}

/// Gate for the first envelope on every connection.
///
/// The authenticator writes its own reply. Returning `Ok` admits the agent;
/// an error drops the connection.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &Request, conn: &HookConn) -> Result<(), AuthError>;
}

#[async_trait]
impl<F> Authenticator for F
where
    F: Fn(&Request, &HookConn) -> Result<(), AuthError> + Send + Sync + 'static,
{
    async fn authenticate(&self, request: &Request, conn: &HookConn) -> Result<(), AuthError> {
        (self)(request, conn)
    }
}

/// Handler for inbound requests naming one method.
///
/// Every hook registered for a method runs, in priority order, and each
/// writes its own replies (zero, one or several).
#[async_trait]
pub trait Hook: Send + Sync {
    async fn call(&self, request: &Request, conn: &HookConn) -> Result<(), HookError>;
}

#[async_trait]
impl<F> Hook for F
where
    F: Fn(&Request, &HookConn) -> Result<(), HookError> + Send + Sync + 'static,
{
    async fn call(&self, request: &Request, conn: &HookConn) -> Result<(), HookError> {
        (self)(request, conn)
    }
}
