// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent endpoint daemon (aed)
//!
//! Accepts agent connections, serves the monitoring hooks, and forwards
//! plain HTTP to an upstream file server.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod env;
mod handlers;
mod logging;
mod proactive;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use ae_endpoint::{Endpoint, EndpointConfig, Hub, HubConfig};
use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Agent endpoint daemon.
#[derive(Parser, Debug)]
#[command(name = "aed", about = "Serve the agent protocol and forward HTTP upstream")]
struct Cli {
    /// Address to accept agents on, e.g. ":50041" or "127.0.0.1:50041"
    #[arg(env = "AE_LISTEN_ADDR")]
    listen_addr: String,

    /// File server that non-protocol (HTTP) connections are forwarded to
    #[arg(env = "AE_UPSTREAM_ADDR")]
    upstream_addr: Option<String>,

    /// Protocol version every envelope must carry
    #[arg(
        long = "version",
        env = "AE_PROTOCOL_VERSION",
        default_value = env::DEFAULT_PROTOCOL_VERSION
    )]
    protocol_version: String,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.verbose);

    let hub_config = HubConfig::new(cli.protocol_version)
        .with_max_frame_len(env::max_frame_bytes())
        .with_outbound_capacity(env::outbound_capacity());
    let (hub, agents) = Hub::new(hub_config);
    handlers::register(&hub, env::auth_token());

    let mut config =
        EndpointConfig::new(cli.listen_addr).with_handshake_timeout(env::handshake_timeout());
    if let Some(upstream) = cli.upstream_addr {
        config = config.with_upstream(upstream);
    }
    let upstream = config.upstream_addr.clone();
    let endpoint = Endpoint::bind(config, Arc::clone(&hub))
        .await
        .context("failed to start agent endpoint")?;

    let shutdown = CancellationToken::new();
    let proactive =
        tokio::spawn(proactive::run(agents, env::proactive_timeout(), shutdown.clone()));

    endpoint.start();
    info!(
        addr = %endpoint.local_addr(),
        upstream = upstream.as_deref().unwrap_or("none"),
        version = hub.version(),
        "aed ready"
    );

    shutdown_signal().await;
    info!("shutdown requested");
    shutdown.cancel();

    let drain = env::drain_timeout();
    if tokio::time::timeout(drain, endpoint.destroy()).await.is_err() {
        warn!(
            agents = hub.agents().len(),
            "agents still connected after {:?}, exiting anyway", drain
        );
    }
    if let Err(e) = proactive.await {
        error!(error = %e, "proactive task failed");
    }

    info!("aed stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
