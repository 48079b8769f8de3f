// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proactive calls from the endpoint to an authenticated agent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ae_wire::{Request, Response};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::context::{ConnContext, ConnId};
use crate::outbound::{Outbox, OutboxError};

/// Errors from [`Requester::send`] and [`Requester::call`].
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("requester is dead; the agent has probably disconnected")]
    Dead,

    #[error("failed to serialize params: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("connection closed before a reply arrived")]
    Closed,

    #[error("agent is not reading; outbound queue is full")]
    Backlogged,
}

/// Handle for sending requests to one connected agent.
///
/// Cloning is cheap; every clone shares the same pending-reply table. The
/// handle holds only the connection's outbound queue, never the hub.
#[derive(Debug, Clone)]
pub struct Requester {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    outbox: Outbox,
    /// Guards `dead` transitions as well, so an entry is never inserted
    /// after teardown has drained the table.
    pending: Mutex<HashMap<i64, oneshot::Sender<Response>>>,
    next_id: AtomicI64,
    dead: AtomicBool,
    agent: String,
    local: String,
    version: String,
    ctx: ConnContext,
}

impl Requester {
    pub(crate) fn new(
        outbox: Outbox,
        agent: String,
        local: String,
        version: String,
        ctx: ConnContext,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                outbox,
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(0),
                dead: AtomicBool::new(false),
                agent,
                local,
                version,
                ctx,
            }),
        }
    }

    /// Name the agent gave as `source` when it authenticated.
    pub fn agent_name(&self) -> &str {
        &self.inner.agent
    }

    /// Name the agent addressed the endpoint by.
    pub fn local_name(&self) -> &str {
        &self.inner.local
    }

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    pub fn agent_addr(&self) -> SocketAddr {
        self.inner.ctx.remote_addr
    }

    pub fn conn_id(&self) -> ConnId {
        self.inner.ctx.id
    }

    pub fn context(&self) -> &ConnContext {
        &self.inner.ctx
    }

    pub fn is_dead(&self) -> bool {
        self.inner.dead.load(Ordering::Acquire)
    }

    /// Whether both handles belong to the same connection.
    pub(crate) fn same(&self, other: &Requester) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of requests still awaiting a reply.
    pub fn pending(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Send a request to the agent.
    ///
    /// Returns a single-slot channel that receives the correlated reply. The
    /// channel closes without a value if the connection drops first. Fails
    /// immediately, without queueing anything, once the agent has gone.
    pub fn send<P>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<oneshot::Receiver<Response>, RequestError>
    where
        P: Serialize + ?Sized,
    {
        self.send_tracked(method, params).map(|(_, rx)| rx)
    }

    /// Send a request and wait up to `timeout` for the reply.
    pub async fn call<P>(
        &self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<Response, RequestError>
    where
        P: Serialize + ?Sized,
    {
        let (id, rx) = self.send_tracked(method, params)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RequestError::Closed),
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                Err(RequestError::Timeout(timeout))
            }
        }
    }

    fn send_tracked<P>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<(i64, oneshot::Receiver<Response>), RequestError>
    where
        P: Serialize + ?Sized,
    {
        if self.is_dead() {
            return Err(RequestError::Dead);
        }
        let params = serde_json::to_value(params)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            if self.is_dead() {
                return Err(RequestError::Dead);
            }
            pending.insert(id, tx);
        }

        let request = Request {
            version: self.inner.version.clone(),
            id,
            target: self.inner.agent.clone(),
            source: self.inner.local.clone(),
            method: method.to_string(),
            params,
        };
        if let Err(e) = self.inner.outbox.push(request) {
            self.inner.pending.lock().remove(&id);
            return Err(match e {
                OutboxError::Full => RequestError::Backlogged,
                OutboxError::Closed => RequestError::Dead,
            });
        }
        debug!(conn = %self.inner.ctx.id, agent = %self.inner.agent, id, method, "sent request");
        Ok((id, rx))
    }

    /// Route a reply to whoever is waiting on its id.
    ///
    /// Returns false when no request with that id is pending; the reply is
    /// dropped since the agent cannot be told about a problem with a reply.
    pub(crate) fn deliver(&self, response: Response) -> bool {
        let id = response.id;
        let Some(tx) = self.inner.pending.lock().remove(&id) else {
            warn!(
                conn = %self.inner.ctx.id,
                agent = %self.inner.agent,
                id,
                "dropping reply with no pending request"
            );
            return false;
        };
        if tx.send(response).is_err() {
            debug!(conn = %self.inner.ctx.id, id, "caller stopped waiting for reply");
        }
        true
    }

    /// Flag the requester dead and release every pending caller.
    pub(crate) fn mark_dead(&self) {
        let abandoned = {
            let mut pending = self.inner.pending.lock();
            self.inner.dead.store(true, Ordering::Release);
            std::mem::take(&mut *pending)
        };
        if !abandoned.is_empty() {
            debug!(
                conn = %self.inner.ctx.id,
                agent = %self.inner.agent,
                count = abandoned.len(),
                "abandoning pending requests"
            );
        }
        // Dropping the senders wakes every waiter with a closed channel
        drop(abandoned);
    }
}

#[cfg(test)]
#[path = "requester_tests.rs"]
mod tests;
