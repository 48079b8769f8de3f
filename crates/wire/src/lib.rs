// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent endpoint wire protocol.
//!
//! Wire format: a stream of JSON objects with no length prefix. Each read
//! consumes exactly one JSON value; a top-level array carries a batch of
//! envelopes.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod codec;
mod envelope;

pub use codec::{encode, write_envelope, EnvelopeReader, ProtocolError, DEFAULT_MAX_FRAME_LEN};
pub use envelope::{
    codes, Envelope, EnvelopeError, ErrorBody, Outbound, Rejected, Request, Response,
};
