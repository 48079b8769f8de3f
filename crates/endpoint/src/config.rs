// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Explicit configuration values for the endpoint and hub.
//!
//! Nothing here reads the environment; the embedding process decides where
//! values come from.

use std::time::Duration;

use ae_wire::DEFAULT_MAX_FRAME_LEN;

/// Time allowed for the proxy preamble and the first byte to arrive.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages that may wait for a connection's writer before dispatch stalls.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Address to listen on, e.g. "localhost:9999" or ":9999"
    pub listen_addr: String,
    /// File server that non-protocol (HTTP) connections are forwarded to.
    /// Without one, such connections are closed.
    pub upstream_addr: Option<String>,
    /// Bound on classifying a new connection
    pub handshake_timeout: Duration,
}

impl EndpointConfig {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: normalize_listen_addr(listen_addr.into()),
            upstream_addr: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_upstream(mut self, addr: impl Into<String>) -> Self {
        self.upstream_addr = Some(addr.into());
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// `":9999"` means every interface.
fn normalize_listen_addr(addr: String) -> String {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => addr,
    }
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Protocol version every envelope's `v` must match exactly
    pub version: String,
    /// Largest single JSON value accepted from an agent
    pub max_frame_len: usize,
    /// Bound on each connection's outbound queue
    pub outbound_capacity: usize,
}

impl HubConfig {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }
}
