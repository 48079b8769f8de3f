// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon.
//!
//! Listen address, upstream and protocol version are CLI arguments with
//! env fallbacks (see `main.rs`); the knobs below are env-only.

use std::time::Duration;

use ae_endpoint::DEFAULT_OUTBOUND_CAPACITY;
use ae_wire::DEFAULT_MAX_FRAME_LEN;

/// Protocol version spoken when neither `--version` nor `AE_PROTOCOL_VERSION` is set.
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.0";

/// Time allowed for a new connection to be classified (default 5s).
pub fn handshake_timeout() -> Duration {
    millis(std::env::var("AE_HANDSHAKE_TIMEOUT_MS").ok()).unwrap_or(Duration::from_secs(5))
}

/// Largest JSON value accepted from an agent (default 1 MiB).
pub fn max_frame_bytes() -> usize {
    std::env::var("AE_MAX_FRAME_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_FRAME_LEN)
}

/// Replies queued per connection before dispatch waits on the agent (default 256).
pub fn outbound_capacity() -> usize {
    std::env::var("AE_OUTBOUND_CAPACITY")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_OUTBOUND_CAPACITY)
}

/// Shared secret agents must present in `handshake.hello`.
/// Unset or empty means every agent is admitted.
pub fn auth_token() -> Option<String> {
    std::env::var("AE_AUTH_TOKEN").ok().filter(|s| !s.is_empty())
}

/// How long a proactive call waits for the agent's reply (default 10s).
pub fn proactive_timeout() -> Duration {
    millis(std::env::var("AE_PROACTIVE_TIMEOUT_MS").ok()).unwrap_or(Duration::from_secs(10))
}

/// How long shutdown waits for agents to hang up (default 5s).
pub fn drain_timeout() -> Duration {
    millis(std::env::var("AE_DRAIN_TIMEOUT_MS").ok()).unwrap_or(Duration::from_secs(5))
}

fn millis(value: Option<String>) -> Option<Duration> {
    value.and_then(|s| s.trim().parse::<u64>().ok()).map(Duration::from_millis)
}
