// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ae_wire::{codes, EnvelopeReader, ErrorBody, ProtocolError, Request, DEFAULT_MAX_FRAME_LEN};
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::*;
use crate::requester::RequestError;

const WAIT: Duration = Duration::from_secs(5);

/// Client side of an in-memory connection served by the hub.
struct Agent {
    reader: EnvelopeReader<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
    served: JoinHandle<()>,
}

impl Agent {
    fn connect(hub: &Arc<Hub>) -> Self {
        Self::with_buffer(hub, 64 * 1024)
    }

    /// Connect through a pipe holding at most `buffer` bytes each way.
    fn with_buffer(hub: &Arc<Hub>, buffer: usize) -> Self {
        let (client, server) = tokio::io::duplex(buffer);
        let (server_read, server_write) = tokio::io::split(server);
        let ctx = ConnContext::new(
            ConnId(1),
            "127.0.0.1:6500".parse().unwrap(),
            "10.0.0.7:41000".parse().unwrap(),
        );
        let hub = Arc::clone(hub);
        let served = tokio::spawn(async move {
            hub.serve_conn(BufReader::new(server_read), server_write, ctx).await
        });
        let (read, writer) = tokio::io::split(client);
        Self {
            reader: EnvelopeReader::new(BufReader::new(read), DEFAULT_MAX_FRAME_LEN),
            writer,
            served,
        }
    }

    async fn send(&mut self, value: Value) {
        self.send_raw(&value.to_string()).await;
    }

    async fn send_raw(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        timeout(WAIT, self.reader.next_value()).await.unwrap().unwrap()
    }

    async fn expect_closed(&mut self) {
        let next = timeout(WAIT, self.reader.next_value()).await.unwrap();
        assert!(matches!(next, Err(ProtocolError::ConnectionClosed)), "got {:?}", next);
    }

    /// Close the client's write side and wait for the hub to finish.
    async fn hang_up(mut self) {
        self.writer.shutdown().await.unwrap();
        timeout(WAIT, self.served).await.unwrap().unwrap();
    }
}

fn request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "v": "1.0",
        "id": id,
        "source": "agent1",
        "target": "hub",
        "method": method,
        "params": params,
    })
}

fn hub() -> (Arc<Hub>, AgentStream) {
    Hub::new(HubConfig::new("1.0"))
}

fn labelled(label: &'static str) -> impl Hook {
    move |req: &Request, conn: &HookConn| -> Result<(), HookError> {
        conn.reply(req, json!(label))?;
        Ok(())
    }
}

fn counting(count: &Arc<AtomicUsize>) -> impl Hook {
    let count = Arc::clone(count);
    move |req: &Request, conn: &HookConn| -> Result<(), HookError> {
        count.fetch_add(1, Ordering::SeqCst);
        conn.reply(req, json!({}))?;
        Ok(())
    }
}

#[tokio::test]
async fn hooks_run_in_priority_order_with_ties_in_registration_order() {
    let (hub, _agents) = hub();
    hub.hook("check_metrics.post", labelled("late-a"), 5);
    hub.hook("check_metrics.post", labelled("first"), 0);
    hub.hook("check_metrics.post", labelled("late-b"), 5);
    hub.hook("check_metrics.post", labelled("earliest"), -1);

    let mut agent = Agent::connect(&hub);
    agent.send(request(1, "check_metrics.post", json!([]))).await;

    let mut results = Vec::new();
    for _ in 0..4 {
        let reply = agent.recv().await;
        assert_eq!(reply["id"], 1);
        results.push(reply["result"].as_str().unwrap().to_string());
    }
    assert_eq!(results, ["earliest", "first", "late-a", "late-b"]);
    agent.hang_up().await;
}

#[tokio::test]
async fn version_mismatch_is_answered_with_server_version_and_skips_hooks() {
    let (hub, _agents) = hub();
    let count = Arc::new(AtomicUsize::new(0));
    hub.hook("heartbeat.post", counting(&count), 0);

    let mut agent = Agent::connect(&hub);
    let mut stale = request(3, "heartbeat.post", json!({}));
    stale["v"] = json!("0.9");
    agent.send(stale).await;

    let reply = agent.recv().await;
    assert_eq!(reply["v"], "1.0");
    assert_eq!(reply["id"], 3);
    assert_eq!(reply["target"], "agent1");
    assert_eq!(reply["source"], "hub");
    assert_eq!(reply["error"]["code"], codes::VERSION_MISMATCH);
    assert_eq!(reply["error"]["field"], "v");
    assert!(!reply["error"]["message"].as_str().unwrap().is_empty());

    // The connection stays usable
    agent.send(request(4, "heartbeat.post", json!({}))).await;
    let reply = agent.recv().await;
    assert_eq!(reply["id"], 4);
    assert_eq!(reply["error"], Value::Null);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    agent.hang_up().await;
}

#[tokio::test]
async fn unknown_method_gets_no_such_handler() {
    let (hub, _agents) = hub();
    let count = Arc::new(AtomicUsize::new(0));
    hub.hook("heartbeat.post", counting(&count), 0);

    let mut agent = Agent::connect(&hub);
    agent.send(request(8, "nope.get", json!({}))).await;

    let reply = agent.recv().await;
    assert_eq!(reply["id"], 8);
    assert_eq!(reply["source"], "hub");
    assert_eq!(reply["target"], "agent1");
    assert_eq!(reply["error"]["code"], codes::NO_SUCH_HANDLER);
    assert_eq!(reply["error"]["field"], "method");
    assert_eq!(count.load(Ordering::SeqCst), 0);
    agent.hang_up().await;
}

#[tokio::test]
async fn invalid_envelope_is_answered_and_connection_survives() {
    let (hub, _agents) = hub();
    hub.hook("heartbeat.post", labelled("ok"), 0);

    let mut agent = Agent::connect(&hub);
    let mut bad = request(5, "heartbeat.post", json!({}));
    bad["target"] = json!(7);
    agent.send(bad).await;
    let reply = agent.recv().await;
    assert_eq!(reply["id"], 5);
    assert_eq!(reply["error"]["code"], codes::INVALID_ENVELOPE);

    agent.send(request(6, "heartbeat.post", json!({}))).await;
    assert_eq!(agent.recv().await["result"], "ok");
    agent.hang_up().await;
}

#[tokio::test]
async fn authenticated_agent_has_requester_before_second_envelope() {
    let (hub, mut agents) = hub();
    hub.set_authenticator(|req: &Request, conn: &HookConn| -> Result<(), AuthError> {
        assert!(conn.requester().is_none());
        conn.reply(req, json!({}))?;
        Ok(())
    });
    hub.hook(
        "heartbeat.post",
        |req: &Request, conn: &HookConn| -> Result<(), HookError> {
            let agent = conn.requester().map(|r| r.agent_name().to_string());
            conn.reply(req, json!({ "agent": agent }))?;
            Ok(())
        },
        0,
    );

    let mut agent = Agent::connect(&hub);
    agent.send(request(1, "handshake.hello", json!({}))).await;
    agent.send(request(2, "heartbeat.post", json!({}))).await;

    let hello = agent.recv().await;
    assert_eq!(hello["id"], 1);
    assert_eq!(hello["error"], Value::Null);
    let beat = agent.recv().await;
    assert_eq!(beat["id"], 2);
    assert_eq!(beat["result"]["agent"], "agent1");

    let requester = timeout(WAIT, agents.recv()).await.unwrap().unwrap();
    assert_eq!(requester.agent_name(), "agent1");
    assert_eq!(requester.local_name(), "hub");
    assert_eq!(requester.version(), "1.0");
    assert_eq!(hub.agents().len(), 1);
    assert!(hub.requester(ConnId(1)).is_some());
    agent.hang_up().await;
}

#[tokio::test]
async fn rejected_authentication_closes_without_running_hooks() {
    let (hub, _agents) = hub();
    hub.set_authenticator(|req: &Request, conn: &HookConn| -> Result<(), AuthError> {
        let error = ErrorBody::new(codes::UNAUTHENTICATED, "bad token").with_field("token");
        conn.reply_error(req, error)?;
        Err(AuthError::Rejected("bad token".to_string()))
    });
    let count = Arc::new(AtomicUsize::new(0));
    hub.hook("heartbeat.post", counting(&count), 0);

    let mut agent = Agent::connect(&hub);
    // One write, so the heartbeat is already buffered when the hello fails
    let hello = request(1, "handshake.hello", json!({"token": "wrong"}));
    let beat = request(2, "heartbeat.post", json!({}));
    agent.send_raw(&format!("{hello}\n{beat}\n")).await;

    let reply = agent.recv().await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["error"]["code"], codes::UNAUTHENTICATED);
    agent.expect_closed().await;
    timeout(WAIT, agent.served).await.unwrap().unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(hub.agents().is_empty());
}

#[tokio::test]
async fn requester_call_round_trips_through_the_agent() {
    let (hub, mut agents) = hub();
    hub.hook("heartbeat.post", labelled("ok"), 0);

    let mut agent = Agent::connect(&hub);
    agent.send(request(1, "heartbeat.post", json!({}))).await;
    agent.recv().await;
    let requester = timeout(WAIT, agents.recv()).await.unwrap().unwrap();

    let caller = requester.clone();
    let call = tokio::spawn(async move {
        caller.call("host_info.get", &json!({"types": ["cpu"]}), WAIT).await
    });

    let outbound = agent.recv().await;
    assert_eq!(outbound["method"], "host_info.get");
    assert_eq!(outbound["target"], "agent1");
    assert_eq!(outbound["source"], "hub");
    assert_eq!(outbound["v"], "1.0");
    assert_eq!(outbound["params"], json!({"types": ["cpu"]}));

    agent
        .send(json!({
            "v": "1.0",
            "id": outbound["id"],
            "source": "agent1",
            "target": "hub",
            "result": {"cpu": 4},
        }))
        .await;

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.result, json!({"cpu": 4}));
    assert_eq!(requester.pending(), 0);
    agent.hang_up().await;
}

#[tokio::test]
async fn unmatched_reply_is_dropped_silently() {
    let (hub, _agents) = hub();
    hub.hook("heartbeat.post", labelled("ok"), 0);

    let mut agent = Agent::connect(&hub);
    agent.send(request(1, "heartbeat.post", json!({}))).await;
    agent.recv().await;

    let stray = json!({"v": "1.0", "id": 99, "source": "agent1", "target": "hub", "result": {}});
    agent.send(stray).await;
    agent.send(request(2, "heartbeat.post", json!({}))).await;

    // Nothing was written for the stray reply
    assert_eq!(agent.recv().await["id"], 2);
    agent.hang_up().await;
}

#[tokio::test]
async fn batch_elements_are_dispatched_in_order() {
    let (hub, _agents) = hub();
    hub.hook("heartbeat.post", labelled("ok"), 0);

    let mut agent = Agent::connect(&hub);
    agent
        .send(json!([
            request(1, "heartbeat.post", json!({})),
            request(2, "missing.get", json!({})),
            "not an envelope",
        ]))
        .await;

    let first = agent.recv().await;
    assert_eq!(first["id"], 1);
    assert_eq!(first["result"], "ok");
    let second = agent.recv().await;
    assert_eq!(second["id"], 2);
    assert_eq!(second["error"]["code"], codes::NO_SUCH_HANDLER);
    let third = agent.recv().await;
    assert_eq!(third["id"], 0);
    assert_eq!(third["error"]["code"], codes::INVALID_ENVELOPE);
    agent.hang_up().await;
}

#[tokio::test]
async fn close_from_hook_finishes_chain_then_disconnects() {
    let (hub, mut agents) = hub();
    hub.hook(
        "bye.post",
        |req: &Request, conn: &HookConn| -> Result<(), HookError> {
            conn.reply(req, json!("closing"))?;
            Err(HookError::Close)
        },
        0,
    );
    hub.hook("bye.post", labelled("after"), 1);
    hub.hook(
        "bye.post",
        |_: &Request, _: &HookConn| -> Result<(), HookError> {
            Err(HookError::Failed("ignored".to_string()))
        },
        2,
    );

    let mut agent = Agent::connect(&hub);
    agent.send(request(1, "bye.post", json!({}))).await;

    assert_eq!(agent.recv().await["result"], "closing");
    assert_eq!(agent.recv().await["result"], "after");
    agent.expect_closed().await;
    timeout(WAIT, agent.served).await.unwrap().unwrap();

    let requester = agents.recv().await.unwrap();
    assert!(requester.is_dead());
    assert!(hub.agents().is_empty());
}

#[tokio::test]
async fn disconnect_fails_pending_calls_and_later_sends() {
    let (hub, mut agents) = hub();
    hub.hook("heartbeat.post", labelled("ok"), 0);

    let mut agent = Agent::connect(&hub);
    agent.send(request(1, "heartbeat.post", json!({}))).await;
    agent.recv().await;
    let requester = timeout(WAIT, agents.recv()).await.unwrap().unwrap();

    let pending = requester.send("host_info.get", &json!({})).unwrap();
    agent.recv().await;
    agent.hang_up().await;

    assert!(pending.await.is_err());
    assert!(requester.is_dead());
    assert!(matches!(requester.send("host_info.get", &()), Err(RequestError::Dead)));
    assert!(hub.requester(ConnId(1)).is_none());
}

#[tokio::test]
async fn panicking_hook_still_retires_the_connection() {
    let (hub, mut agents) = hub();
    hub.hook("heartbeat.post", labelled("ok"), 0);
    hub.hook(
        "explode.post",
        |_: &Request, _: &HookConn| -> Result<(), HookError> { panic!("hook blew up") },
        0,
    );

    let mut agent = Agent::connect(&hub);
    agent.send(request(1, "heartbeat.post", json!({}))).await;
    agent.recv().await;
    let requester = timeout(WAIT, agents.recv()).await.unwrap().unwrap();

    agent.send(request(2, "explode.post", json!({}))).await;
    let served = timeout(WAIT, &mut agent.served).await.unwrap();
    assert!(served.unwrap_err().is_panic());
    agent.expect_closed().await;

    assert!(requester.is_dead());
    assert!(hub.agents().is_empty());
    assert!(matches!(requester.send("host_info.get", &()), Err(RequestError::Dead)));
}

#[tokio::test]
async fn dispatch_stalls_while_the_agent_is_not_reading() {
    const BEATS: i64 = 2000;
    let (hub, _agents) = Hub::new(HubConfig::new("1.0").with_outbound_capacity(4));
    let count = Arc::new(AtomicUsize::new(0));
    hub.hook("heartbeat.post", counting(&count), 0);

    let Agent { mut reader, mut writer, served } = Agent::with_buffer(&hub, 256);
    let flood = tokio::spawn(async move {
        for id in 1..=BEATS {
            let beat = request(id, "heartbeat.post", json!({})).to_string();
            writer.write_all(beat.as_bytes()).await.unwrap();
        }
        writer
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let ran = count.load(Ordering::SeqCst);
    assert!(ran < 100, "{ran} hooks ran with nobody reading");
    assert!(!flood.is_finished());

    // Reading lets dispatch resume; nothing was dropped
    for id in 1..=BEATS {
        let reply = timeout(WAIT, reader.next_value()).await.unwrap().unwrap();
        assert_eq!(reply["id"], id);
    }
    assert_eq!(count.load(Ordering::SeqCst), BEATS as usize);

    let mut writer = timeout(WAIT, flood).await.unwrap().unwrap();
    writer.shutdown().await.unwrap();
    timeout(WAIT, served).await.unwrap().unwrap();
}

#[tokio::test]
async fn stale_connection_does_not_release_a_newer_one_with_the_same_id() {
    let (hub, mut agents) = hub();
    hub.hook("heartbeat.post", labelled("ok"), 0);

    // The harness gives every connection ConnId(1)
    let mut old = Agent::connect(&hub);
    old.send(request(1, "heartbeat.post", json!({}))).await;
    old.recv().await;
    let stale = timeout(WAIT, agents.recv()).await.unwrap().unwrap();

    let mut new = Agent::connect(&hub);
    new.send(request(1, "heartbeat.post", json!({}))).await;
    new.recv().await;
    let fresh = timeout(WAIT, agents.recv()).await.unwrap().unwrap();

    old.hang_up().await;

    assert!(stale.is_dead());
    assert!(!fresh.is_dead());
    let current = hub.requester(ConnId(1)).unwrap();
    assert!(current.same(&fresh));
    new.hang_up().await;
    assert!(hub.agents().is_empty());
}
