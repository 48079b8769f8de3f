// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::net::SocketAddr;

/// Endpoint-assigned identifier for one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Immutable per-connection facts, fixed at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnContext {
    pub id: ConnId,
    pub local_addr: SocketAddr,
    /// The agent's address. Taken from the PROXY preamble when one was sent.
    pub remote_addr: SocketAddr,
    /// The socket peer, which differs from `remote_addr` behind a load balancer.
    pub peer_addr: SocketAddr,
}

impl ConnContext {
    pub fn new(id: ConnId, local_addr: SocketAddr, peer_addr: SocketAddr) -> Self {
        Self { id, local_addr, remote_addr: peer_addr, peer_addr }
    }

    pub fn with_remote(mut self, remote_addr: SocketAddr) -> Self {
        self.remote_addr = remote_addr;
        self
    }

    pub fn is_proxied(&self) -> bool {
        self.remote_addr != self.peer_addr
    }
}
