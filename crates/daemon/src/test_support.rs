// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loopback fixtures shared by the daemon's tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ae_endpoint::{AgentStream, Endpoint, EndpointConfig, Hub, HubConfig};
use ae_wire::{EnvelopeReader, ProtocolError, DEFAULT_MAX_FRAME_LEN};
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

/// Endpoint on an ephemeral loopback port with the daemon's hooks installed.
pub async fn daemon(auth_token: Option<&str>) -> (Endpoint, AgentStream) {
    let (hub, agents) = Hub::new(HubConfig::new("1.0"));
    crate::handlers::register(&hub, auth_token.map(str::to_string));
    let endpoint = Endpoint::bind(EndpointConfig::new("127.0.0.1:0"), Arc::clone(&hub))
        .await
        .unwrap();
    endpoint.start();
    (endpoint, agents)
}

pub fn request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "v": "1.0",
        "id": id,
        "source": "agent-7f3a",
        "target": "endpoint",
        "method": method,
        "params": params,
    })
}

pub struct Agent {
    reader: EnvelopeReader<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Agent {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (read, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Self { reader: EnvelopeReader::new(BufReader::new(read), DEFAULT_MAX_FRAME_LEN), writer }
    }

    pub async fn send(&mut self, value: Value) {
        self.writer.write_all(value.to_string().as_bytes()).await.unwrap();
    }

    pub async fn recv(&mut self) -> Value {
        timeout(WAIT, self.reader.next_value()).await.unwrap().unwrap()
    }

    pub async fn expect_closed(&mut self) {
        let next = timeout(WAIT, self.reader.next_value()).await.unwrap();
        assert!(matches!(next, Err(ProtocolError::ConnectionClosed)), "got {:?}", next);
    }

    pub async fn hang_up(mut self) {
        self.writer.shutdown().await.unwrap();
    }
}
