// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request and response envelopes exchanged with agents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Stable error codes carried in [`ErrorBody::code`].
pub mod codes {
    /// The envelope's `v` differs from the endpoint's protocol version.
    pub const VERSION_MISMATCH: i64 = 1;
    /// No hook is registered for the requested method.
    pub const NO_SUCH_HANDLER: i64 = 2;
    /// The connection has not been (or could not be) authenticated.
    pub const UNAUTHENTICATED: i64 = 3;
    /// The envelope is not a well-formed request or response.
    pub const INVALID_ENVELOPE: i64 = 4;
    /// A handler failed internally.
    pub const INTERNAL: i64 = 5;
}

/// Call from one side of a connection to the other.
///
/// `id` is scoped to the connection that issued it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(rename = "v", default)]
    pub version: String,
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Reply to a [`Request`], correlated by `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    #[serde(rename = "v", default)]
    pub version: String,
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

/// Structured error carried by a [`Response`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    #[serde(default)]
    pub field: String,
    pub code: i64,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { field: String::new(), code, message: message.into() }
    }

    /// Attach the name of the offending field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }
}

impl Request {
    /// Build a successful reply: same `id` and `v`, `source`/`target` swapped.
    pub fn reply(&self, result: Value) -> Response {
        Response {
            version: self.version.clone(),
            id: self.id,
            target: self.source.clone(),
            source: self.target.clone(),
            result,
            error: None,
        }
    }

    /// Build an error reply addressed back to the sender.
    pub fn reply_error(&self, error: ErrorBody) -> Response {
        Response {
            version: self.version.clone(),
            id: self.id,
            target: self.source.clone(),
            source: self.target.clone(),
            result: Value::Null,
            error: Some(error),
        }
    }
}

impl Response {
    /// Whether this response carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Error reply to any envelope, stamped with the server's version.
    pub fn error_to(envelope: &Envelope, version: &str, error: ErrorBody) -> Self {
        Self {
            version: version.to_string(),
            id: envelope.id(),
            target: envelope.source().to_string(),
            source: envelope.target().to_string(),
            result: Value::Null,
            error: Some(error),
        }
    }

    /// Protocol-level reply for an envelope whose `v` does not match.
    pub fn version_mismatch(envelope: &Envelope, version: &str) -> Self {
        let message = format!(
            "protocol version mismatch: got {:?}, endpoint speaks {:?}",
            envelope.version(),
            version
        );
        let error = ErrorBody::new(codes::VERSION_MISMATCH, message).with_field("v");
        Self::error_to(envelope, version, error)
    }

    /// Reply for a JSON value that could not be read as an envelope.
    pub fn invalid(rejected: &Rejected, version: &str) -> Self {
        Self {
            version: version.to_string(),
            id: rejected.id,
            target: rejected.source.clone(),
            source: rejected.target.clone(),
            result: Value::Null,
            error: Some(ErrorBody::new(codes::INVALID_ENVELOPE, rejected.to_string())),
        }
    }
}

/// One decoded message unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(Request),
    /// Reply shape: an object without a non-empty `method`.
    Response(Response),
}

/// Errors turning a JSON value into an [`Envelope`].
///
/// These are per-envelope and never fatal to the connection.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope must be a JSON object")]
    NotAnObject,

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A value that could not be decoded, with whatever addressing it carried.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Rejected {
    pub id: i64,
    pub source: String,
    pub target: String,
    #[source]
    pub error: EnvelopeError,
}

impl Rejected {
    fn unaddressed(error: EnvelopeError) -> Self {
        Self { id: 0, source: String::new(), target: String::new(), error }
    }
}

impl Envelope {
    /// Classify a JSON object as a request (non-empty `method`) or a reply.
    pub fn from_value(value: Value) -> Result<Self, Rejected> {
        let Value::Object(map) = &value else {
            return Err(Rejected::unaddressed(EnvelopeError::NotAnObject));
        };
        let is_request =
            map.get("method").and_then(Value::as_str).is_some_and(|m| !m.is_empty());
        // Lifted up front so a malformed envelope can still be answered.
        let text = |name: &str| map.get(name).and_then(Value::as_str).unwrap_or_default();
        let rejected = |error| Rejected {
            id: map.get("id").and_then(Value::as_i64).unwrap_or_default(),
            source: text("source").to_string(),
            target: text("target").to_string(),
            error,
        };

        let decoded = if is_request {
            Request::deserialize(&value).map(Envelope::Request)
        } else {
            Response::deserialize(&value).map(Envelope::Response)
        };
        decoded.map_err(|e| rejected(EnvelopeError::Malformed(e)))
    }

    pub fn version(&self) -> &str {
        match self {
            Envelope::Request(r) => &r.version,
            Envelope::Response(r) => &r.version,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Envelope::Request(r) => r.id,
            Envelope::Response(r) => r.id,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Envelope::Request(r) => &r.source,
            Envelope::Response(r) => &r.source,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Envelope::Request(r) => &r.target,
            Envelope::Response(r) => &r.target,
        }
    }

    /// View the envelope as a request, as the authenticator sees it.
    ///
    /// A reply-shaped envelope becomes a request with an empty method.
    pub fn into_request(self) -> Request {
        match self {
            Envelope::Request(r) => r,
            Envelope::Response(r) => Request {
                version: r.version,
                id: r.id,
                target: r.target,
                source: r.source,
                method: String::new(),
                params: r.result,
            },
        }
    }
}

/// Anything the single connection writer may put on the wire.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Outbound {
    Request(Request),
    Response(Response),
}

impl Outbound {
    pub fn id(&self) -> i64 {
        match self {
            Outbound::Request(r) => r.id,
            Outbound::Response(r) => r.id,
        }
    }
}

impl From<Request> for Outbound {
    fn from(request: Request) -> Self {
        Outbound::Request(request)
    }
}

impl From<Response> for Outbound {
    fn from(response: Response) -> Self {
        Outbound::Response(response)
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
