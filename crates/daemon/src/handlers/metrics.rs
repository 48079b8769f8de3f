// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use ae_endpoint::{HookConn, HookError, Request};
use serde_json::{json, Value};
use tracing::info;

/// Log what the agent reported. Writes nothing back.
pub fn record(request: &Request, conn: &HookConn) -> Result<(), HookError> {
    let count = match &request.params {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.get("metrics").and_then(Value::as_array).map_or(1, Vec::len),
        _ => 0,
    };
    info!(
        agent = %request.source,
        conn = %conn.context().id,
        id = request.id,
        count,
        "check metrics received"
    );
    Ok(())
}

/// Acknowledge the post once every earlier hook has run.
pub fn finalize(request: &Request, conn: &HookConn) -> Result<(), HookError> {
    conn.reply(request, json!({}))?;
    Ok(())
}
