// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::{SystemTime, UNIX_EPOCH};

use ae_endpoint::{HookConn, HookError, Request};
use serde_json::json;
use tracing::debug;

/// Answers with the endpoint's clock so agents can estimate skew.
pub fn post(request: &Request, conn: &HookConn) -> Result<(), HookError> {
    let timestamp = now_ms();
    debug!(agent = %request.source, timestamp, "heartbeat");
    conn.reply(request, json!({ "timestamp": timestamp }))?;
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
