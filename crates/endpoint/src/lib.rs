// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent endpoint: a TCP listener that speaks the agent JSON protocol and
//! hands everything else to an HTTP upstream.
//!
//! The [`Endpoint`] accepts and classifies connections, the [`Hub`] runs
//! authentication and hook dispatch for protocol connections, and a
//! [`Requester`] lets embedding code call an authenticated agent over the
//! same socket.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod classify;
mod config;
mod context;
mod endpoint;
mod hub;
mod outbound;
mod proxy_protocol;
mod requester;
mod upgrade;

pub use classify::{classify, Classified, ClassifyError, Replay, StreamKind};
pub use config::{
    EndpointConfig, HubConfig, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_OUTBOUND_CAPACITY,
};
pub use context::{ConnContext, ConnId};
pub use endpoint::{Endpoint, EndpointError};
pub use hub::{AgentStream, AuthError, Authenticator, Hook, HookConn, HookError, Hub};
pub use outbound::{run_writer, Outbox, OutboxError};
pub use proxy_protocol::{parse_proxy_line, ProxyError, ProxyFamily, ProxyHeader};
pub use requester::{RequestError, Requester};
pub use upgrade::{forward, UpgradeError};

pub use ae_wire::{codes, ErrorBody, Request, Response};
