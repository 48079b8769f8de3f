// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use ae_endpoint::{HookConn, HookError, Request};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Default, Serialize)]
struct Schedule {
    checks: Vec<Value>,
}

/// No checks are scheduled by this daemon; agents get an empty list.
pub fn get(request: &Request, conn: &HookConn) -> Result<(), HookError> {
    let schedule = serde_json::to_value(Schedule::default())
        .map_err(|e| HookError::Failed(format!("encode schedule: {}", e)))?;
    conn.reply(request, schedule)?;
    Ok(())
}
