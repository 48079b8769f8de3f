// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monitoring hooks served to agents.

mod auth;
mod heartbeat;
mod metrics;
mod schedule;

use ae_endpoint::Hub;

/// Priority of the hook that acknowledges a metrics post; runs after
/// everything else in the chain.
pub const FINALIZE_PRIORITY: i32 = 8;

/// Install the authenticator and every method hook on `hub`.
pub fn register(hub: &Hub, auth_token: Option<String>) {
    hub.set_authenticator(auth::TokenAuthenticator::new(auth_token));
    hub.hook("handshake.hello", auth::rehello, 0);
    hub.hook("heartbeat.post", heartbeat::post, 0);
    hub.hook("check_schedule.get", schedule::get, 0);
    hub.hook("check_metrics.post", metrics::record, 0);
    hub.hook("check_metrics.post", metrics::finalize, FINALIZE_PRIORITY);
}

#[cfg(test)]
#[path = "../handlers_tests.rs"]
mod tests;
