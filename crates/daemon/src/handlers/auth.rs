// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use ae_endpoint::{codes, AuthError, Authenticator, ErrorBody, HookConn, HookError, Request};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
struct HelloParams {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    agent_name: Option<String>,
}

/// Admits connections whose first envelope is a `handshake.hello` carrying
/// the configured token. With no token configured any hello is admitted.
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    token: Option<String>,
}

impl TokenAuthenticator {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    fn check(&self, request: &Request) -> Result<HelloParams, ErrorBody> {
        if request.method != "handshake.hello" {
            let message = "connections must start with handshake.hello";
            return Err(ErrorBody::new(codes::UNAUTHENTICATED, message).with_field("method"));
        }
        let params = if request.params.is_null() {
            HelloParams::default()
        } else {
            serde_json::from_value::<HelloParams>(request.params.clone()).map_err(|e| {
                ErrorBody::new(codes::UNAUTHENTICATED, format!("bad hello params: {}", e))
                    .with_field("params")
            })?
        };
        match &self.token {
            Some(expected) if params.token.as_deref() != Some(expected.as_str()) => {
                Err(ErrorBody::new(codes::UNAUTHENTICATED, "unauthorized").with_field("token"))
            }
            _ => Ok(params),
        }
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, request: &Request, conn: &HookConn) -> Result<(), AuthError> {
        match self.check(request) {
            Ok(params) => {
                info!(
                    agent = %request.source,
                    name = params.agent_name.as_deref().unwrap_or_default(),
                    remote = %conn.context().remote_addr,
                    "agent said hello"
                );
                conn.reply(request, json!({}))?;
                Ok(())
            }
            Err(error) => {
                let reason = error.message.clone();
                conn.reply_error(request, error)?;
                Err(AuthError::Rejected(reason))
            }
        }
    }
}

/// A hello after authentication is acknowledged and otherwise ignored.
pub fn rehello(request: &Request, conn: &HookConn) -> Result<(), HookError> {
    conn.reply(request, json!({}))?;
    Ok(())
}
