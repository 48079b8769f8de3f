// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Calls the endpoint makes on its own initiative.
//!
//! Every newly authenticated agent is asked for its host info once.

use std::time::Duration;

use ae_endpoint::{AgentStream, RequestError, Requester};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const HOST_INFO_METHOD: &str = "host_info.get";

#[derive(Debug, Serialize)]
struct HostInfoQuery {
    types: &'static [&'static str],
}

const HOST_INFO_TYPES: &[&str] = &["system", "cpus", "memory", "filesystems"];

/// Drain `agents` until shutdown, querying each one on its own task.
pub async fn run(mut agents: AgentStream, timeout: Duration, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = agents.recv() => match next {
                Some(requester) => {
                    tokio::spawn(query_host_info(requester, timeout));
                }
                None => break,
            },
        }
    }
}

async fn query_host_info(requester: Requester, timeout: Duration) {
    let query = HostInfoQuery { types: HOST_INFO_TYPES };
    let agent = requester.agent_name().to_string();
    let addr = requester.agent_addr();
    match requester.call(HOST_INFO_METHOD, &query, timeout).await {
        Ok(response) => match response.error {
            Some(error) => warn!(
                agent = %agent,
                %addr,
                code = error.code,
                message = %error.message,
                "agent refused host info"
            ),
            None => {
                info!(agent = %agent, %addr, host_info = %response.result, "host info received")
            }
        },
        Err(RequestError::Dead | RequestError::Closed) => {
            info!(agent = %agent, %addr, "agent left before answering host info")
        }
        Err(e) => warn!(agent = %agent, %addr, error = %e, "host info request failed"),
    }
}

#[cfg(test)]
#[path = "proactive_tests.rs"]
mod tests;
