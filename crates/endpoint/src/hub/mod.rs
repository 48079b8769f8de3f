// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hook dispatch for agent protocol connections.
//!
//! The Hub holds method → hook chains and the authenticator, runs the
//! per-connection dispatch loop, and keeps a registry of the requesters of
//! currently authenticated agents.

mod hooks;
mod session;

pub use hooks::{AuthError, Authenticator, Hook, HookConn, HookError};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::config::HubConfig;
use crate::context::{ConnContext, ConnId};
use crate::requester::Requester;

/// Requesters of newly authenticated agents, in authentication order.
pub type AgentStream = mpsc::UnboundedReceiver<Requester>;

struct Registration {
    priority: i32,
    hook: Arc<dyn Hook>,
}

/// Authentication and method dispatch shared by all protocol connections.
pub struct Hub {
    config: HubConfig,
    hooks: RwLock<HashMap<String, Vec<Registration>>>,
    authenticator: RwLock<Option<Arc<dyn Authenticator>>>,
    agents: Mutex<HashMap<ConnId, Requester>>,
    announce: mpsc::UnboundedSender<Requester>,
    next_conn: AtomicU64,
}

impl Hub {
    /// Create a hub and the stream on which it announces authenticated agents.
    pub fn new(config: HubConfig) -> (Arc<Self>, AgentStream) {
        let (announce, agents_rx) = mpsc::unbounded_channel();
        let hub = Self {
            config,
            hooks: RwLock::new(HashMap::new()),
            authenticator: RwLock::new(None),
            agents: Mutex::new(HashMap::new()),
            announce,
            next_conn: AtomicU64::new(0),
        };
        (Arc::new(hub), agents_rx)
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    /// Mint a connection id, unique across every endpoint serving this hub.
    pub fn next_conn_id(&self) -> ConnId {
        ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Install the authenticator, replacing any previous one.
    pub fn set_authenticator(&self, authenticator: impl Authenticator + 'static) {
        *self.authenticator.write() = Some(Arc::new(authenticator));
    }

    /// Register a hook for `method`.
    ///
    /// Lower priorities run first; equal priorities run in registration order.
    pub fn hook(&self, method: impl Into<String>, hook: impl Hook + 'static, priority: i32) {
        let mut hooks = self.hooks.write();
        let chain = hooks.entry(method.into()).or_default();
        let at = chain.partition_point(|r| r.priority <= priority);
        chain.insert(at, Registration { priority, hook: Arc::new(hook) });
    }

    /// Requester for a connected, authenticated agent.
    pub fn requester(&self, conn: ConnId) -> Option<Requester> {
        self.agents.lock().get(&conn).cloned()
    }

    /// Requesters of every currently authenticated agent.
    pub fn agents(&self) -> Vec<Requester> {
        let mut agents: Vec<Requester> = self.agents.lock().values().cloned().collect();
        agents.sort_by_key(Requester::conn_id);
        agents
    }

    /// Serve one protocol connection until it closes.
    ///
    /// `reader` must be positioned at the first envelope. Replies are written
    /// by a dedicated writer task that owns `writer`.
    pub async fn serve_conn<R, W>(self: &Arc<Self>, reader: R, writer: W, ctx: ConnContext)
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        session::run(Arc::clone(self), reader, writer, ctx).await
    }

    fn authenticator(&self) -> Option<Arc<dyn Authenticator>> {
        self.authenticator.read().clone()
    }

    /// Snapshot of the chain for `method`, taken so no lock is held while
    /// hooks run.
    fn chain(&self, method: &str) -> Vec<Arc<dyn Hook>> {
        self.hooks
            .read()
            .get(method)
            .map(|chain| chain.iter().map(|r| Arc::clone(&r.hook)).collect())
            .unwrap_or_default()
    }

    fn admit(&self, requester: Requester) {
        self.agents.lock().insert(requester.conn_id(), requester.clone());
        if self.announce.send(requester).is_err() {
            tracing::debug!("nobody is listening for new agents");
        }
    }

    /// Forget `requester`, unless its slot already holds another connection.
    fn release(&self, requester: &Requester) {
        let mut agents = self.agents.lock();
        if agents.get(&requester.conn_id()).is_some_and(|current| current.same(requester)) {
            agents.remove(&requester.conn_id());
        }
    }
}

#[cfg(test)]
#[path = "../hub_tests.rs"]
mod tests;
