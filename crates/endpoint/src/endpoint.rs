// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP listener for agent connections.
//!
//! Every accepted connection runs on its own task: it is classified, then
//! served by the [`Hub`] or bridged to the HTTP upstream. `destroy` stops
//! accepting and waits for those tasks to finish on their own.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::classify::{classify, StreamKind};
use crate::config::EndpointConfig;
use crate::context::{ConnContext, ConnId};
use crate::hub::Hub;
use crate::upgrade;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, #[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Accepts agent connections and dispatches them.
pub struct Endpoint {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    started: AtomicBool,
}

/// State the accept loop and connection tasks hold on to.
struct Shared {
    config: EndpointConfig,
    hub: Arc<Hub>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Endpoint {
    /// Bind the listening socket. Nothing is accepted until [`Endpoint::start`].
    pub async fn bind(config: EndpointConfig, hub: Arc<Hub>) -> Result<Self, EndpointError> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|e| EndpointError::Bind(config.listen_addr.clone(), e))?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, version = hub.version(), "agent endpoint bound");

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                hub,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
            local_addr,
            listener: Mutex::new(Some(listener)),
            started: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.shared.hub
    }

    /// Start the accept loop. Only the first call has any effect.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(listener) = self.listener.lock().take() else {
            debug!("endpoint already destroyed, not starting");
            return;
        };
        let shared = Arc::clone(&self.shared);
        self.shared.tracker.spawn(accept_loop(listener, shared));
    }

    /// Stop accepting and wait for every connection task to finish.
    ///
    /// Open connections are not cut; this returns once their peers hang up.
    pub async fn destroy(&self) {
        info!(addr = %self.local_addr, "shutting down agent endpoint");
        self.shared.shutdown.cancel();
        // Never started: the listener is still ours to close
        drop(self.listener.lock().take());
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        info!(addr = %self.local_addr, "agent endpoint stopped");
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    let id = shared.hub.next_conn_id();
                    debug!(conn = %id, %peer, "accepted connection");
                    let conn_shared = Arc::clone(&shared);
                    shared.tracker.spawn(serve_conn(conn_shared, stream, peer, id));
                }
                Err(e) => error!("accept error: {}", e),
            },
        }
    }
    // Dropping the listener refuses further connections
    drop(listener);
    debug!("accept loop stopped");
}

async fn serve_conn(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr, id: ConnId) {
    let local = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(conn = %id, error = %e, "connection lost before classification");
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(conn = %id, error = %e, "failed to set TCP_NODELAY");
    }
    let (read, write) = stream.into_split();

    let classified =
        match tokio::time::timeout(shared.config.handshake_timeout, classify(read)).await {
            Ok(Ok(classified)) => classified,
            Ok(Err(e)) => {
                debug!(conn = %id, %peer, error = %e, "dropping unclassifiable connection");
                return;
            }
            Err(_) => {
                debug!(conn = %id, %peer, "handshake timed out");
                return;
            }
        };

    let mut ctx = ConnContext::new(id, local, peer);
    if let Some(source) = classified.proxy.as_ref().and_then(|p| p.source) {
        ctx = ctx.with_remote(source);
    }

    match classified.kind {
        StreamKind::Protocol => {
            shared.hub.serve_conn(BufReader::new(classified.stream), write, ctx).await;
        }
        StreamKind::Foreign(first) => match &shared.config.upstream_addr {
            Some(upstream) => {
                debug!(conn = %id, upstream = %upstream, first, "forwarding to upstream");
                if let Err(e) = upgrade::forward(classified.stream, write, upstream).await {
                    let remote = ctx.remote_addr;
                    warn!(conn = %id, %remote, error = %e, "upstream bridge failed");
                }
            }
            None => debug!(conn = %id, first, "no upstream configured, closing"),
        },
    }
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
