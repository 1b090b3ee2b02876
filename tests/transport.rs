mod common;

use common::FakeBackend;
use redis_gateway_transport::client::ClientReceiveOutcome;
use redis_gateway_transport::config::TransportConfig;
use redis_gateway_transport::core::{ReceiveOutcome, RedisTransportCore};
use redis_gateway_transport::queue::{redis_key, reply_queue, service_queue};
use redis_gateway_transport::{ClientTransport, ServerTransport};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("clock").as_secs_f64()
}

fn default_config() -> TransportConfig {
    TransportConfig {
        receive_timeout_in_seconds: 1,
        ..TransportConfig::default()
    }
}

/// Scenario 1: round-trip, default config.
#[tokio::test]
async fn round_trip_default_config() {
    let backend: Arc<dyn redis_gateway_transport::RedisBackend> = Arc::new(FakeBackend::single_shard());
    let client = ClientTransport::new("echo", backend.clone(), default_config());
    let server = ServerTransport::new("echo", backend.clone(), default_config()).expect("server");

    let mut meta = Map::new();
    meta.insert("app".into(), json!(52));
    client
        .send_request_message(27, meta, json!({"test": "payload"}), None)
        .await
        .expect("send");

    let (request_id, request_meta, body) = match server.receive_request_message(None).await.expect("receive") {
        ReceiveOutcome::Message { request_id, meta, body } => (request_id, meta, body),
        ReceiveOutcome::Timeout => panic!("expected a message, got a timeout"),
    };
    assert_eq!(request_id, 27);
    assert_eq!(body, json!({"test": "payload"}));
    assert!(request_meta.contains_key("reply_to"));

    server
        .send_response_message(request_id, request_meta, body)
        .await
        .expect("reply");

    match client.receive_response_message(None).await.expect("receive") {
        ClientReceiveOutcome::Message { request_id, meta, body } => {
            assert_eq!(request_id, 27);
            assert_eq!(body, json!({"test": "payload"}));
            assert_eq!(meta.get("app"), Some(&json!(52)));
            assert_eq!(meta.get("protocol_version"), Some(&json!(3)));
            assert_eq!(meta.get("serializer").and_then(Value::as_str), Some("application/msgpack"));
            let expiry = meta.get("__expiry__").and_then(Value::as_f64).expect("expiry present");
            let now = now_secs();
            assert!(expiry >= now + 59.0 && expiry <= now + 61.5, "expiry {expiry} not near now+60 ({now})");
        }
        other => panic!("expected a message, got {other:?}"),
    }
}

/// Scenario 2: queue full after exhausting retries, then recovery once a
/// slot is freed by a receive.
#[tokio::test]
async fn queue_full_then_recovers_after_receive() {
    let backend: Arc<dyn redis_gateway_transport::RedisBackend> = Arc::new(FakeBackend::single_shard());
    let config = TransportConfig {
        queue_capacity: 3,
        queue_full_retries: 1,
        receive_timeout_in_seconds: 1,
        ..TransportConfig::default()
    };
    let client = ClientTransport::new("echo", backend.clone(), config.clone());
    let server = ServerTransport::new("echo", backend.clone(), config).expect("server");

    for i in 0..3 {
        client
            .send_request_message(i, Map::new(), json!({}), None)
            .await
            .expect("send within capacity");
    }

    let err = client
        .send_request_message(3, Map::new(), json!({}), None)
        .await
        .expect_err("fourth send should fail once capacity and retries are exhausted");
    assert!(err.to_string().contains("was full"), "unexpected error: {err}");

    server.receive_request_message(None).await.expect("drain one");

    client
        .send_request_message(4, Map::new(), json!({}), None)
        .await
        .expect("send succeeds once a slot has freed up");
}

/// Scenario 5: a reply too large for one queue entry is split into ordered
/// chunks and reassembled by the client into the original body.
#[tokio::test]
async fn chunked_reply_round_trips() {
    let fake_backend = Arc::new(FakeBackend::single_shard());
    let backend: Arc<dyn redis_gateway_transport::RedisBackend> = fake_backend.clone();

    let client = ClientTransport::new("echo", backend.clone(), default_config());
    let server_config = TransportConfig {
        chunk_messages_larger_than_bytes: Some(102_400),
        maximum_message_size_in_bytes: 614_400,
        receive_timeout_in_seconds: 1,
        ..TransportConfig::default()
    };
    let server = ServerTransport::new("echo", backend.clone(), server_config).expect("server");

    client
        .send_request_message(1, Map::new(), json!({}), None)
        .await
        .expect("send small request");

    let (request_id, meta, _body) = match server.receive_request_message(None).await.expect("receive") {
        ReceiveOutcome::Message { request_id, meta, body } => (request_id, meta, body),
        ReceiveOutcome::Timeout => panic!("expected a message"),
    };

    let big_body = json!({ "blob": "x".repeat(250_000) });
    server
        .send_response_message(request_id, meta.clone(), big_body.clone())
        .await
        .expect("chunked reply send");

    let reply_to = meta.get("reply_to").and_then(Value::as_str).expect("reply_to").to_string();
    let push_key = redis_key(&reply_to);

    match client.receive_response_message(None).await.expect("receive") {
        ClientReceiveOutcome::Message { body, .. } => assert_eq!(body, big_body),
        other => panic!("expected a message, got {other:?}"),
    }

    assert_eq!(fake_backend.push_count(&push_key), 3, "expected exactly 3 chunk pushes");
}

/// Scenario 6: a peer that negotiated protocol version 1 cannot receive a
/// chunked reply; the server surfaces a message-too-large error instead of
/// silently dropping chunk headers it wouldn't understand.
#[tokio::test]
async fn chunking_rejected_for_v1_peer() {
    let backend: Arc<dyn redis_gateway_transport::RedisBackend> = Arc::new(FakeBackend::single_shard());
    let client = ClientTransport::new("echo", backend.clone(), default_config());
    let server_config = TransportConfig {
        chunk_messages_larger_than_bytes: Some(102_400),
        maximum_message_size_in_bytes: 614_400,
        receive_timeout_in_seconds: 1,
        ..TransportConfig::default()
    };
    let server = ServerTransport::new("echo", backend.clone(), server_config).expect("server");

    let mut meta = Map::new();
    meta.insert("protocol_version".into(), json!(1));
    client
        .send_request_message(1, meta, json!({}), None)
        .await
        .expect("send v1 request");

    let (request_id, meta, _) = match server.receive_request_message(None).await.expect("receive") {
        ReceiveOutcome::Message { request_id, meta, body } => (request_id, meta, body),
        ReceiveOutcome::Timeout => panic!("expected a message"),
    };
    assert_eq!(meta.get("protocol_version"), Some(&json!(1)));

    let big_body = json!({ "blob": "x".repeat(250_000) });
    let err = server
        .send_response_message(request_id, meta, big_body)
        .await
        .expect_err("v1 peer cannot receive a chunked reply");
    assert!(err.to_string().contains("client does not support chunking"), "unexpected error: {err}");
}

/// A body too large to fit even once split into the configured chunk size
/// is rejected before any chunk is sent, rather than being split into an
/// unbounded number of chunks and sent in full.
#[tokio::test]
async fn send_chunking_can_still_hit_too_large_error() {
    let fake_backend = Arc::new(FakeBackend::single_shard());
    let backend: Arc<dyn redis_gateway_transport::RedisBackend> = fake_backend.clone();

    let server_config = TransportConfig {
        chunk_messages_larger_than_bytes: Some(102_400),
        maximum_message_size_in_bytes: 614_400,
        receive_timeout_in_seconds: 1,
        ..TransportConfig::default()
    };
    let server = ServerTransport::new("echo", backend.clone(), server_config).expect("server");

    let reply_to = reply_queue("echo", "client", "threadA");
    let mut meta = Map::new();
    meta.insert("reply_to".into(), json!(reply_to));

    let huge_body = json!({ "blob": "x".repeat(900_000) });
    let err = server
        .send_response_message(1, meta, huge_body)
        .await
        .expect_err("body exceeds the cap even after chunking");
    assert!(err.to_string().contains("even after chunking"), "unexpected error: {err}");

    let push_key = redis_key(&reply_to);
    assert_eq!(fake_backend.push_count(&push_key), 0, "no chunk should have been pushed");
}

/// Scenario 7 (positive). Each reply queue is isolated by its trailing
/// thread-id suffix: two client cores on distinct reply queues each get
/// exactly their own response, driven deterministically (no real thread
/// race) since the property under test is queue-name isolation, not timing.
#[tokio::test]
async fn distinct_reply_queues_never_cross_talk() {
    let backend: Arc<dyn redis_gateway_transport::RedisBackend> = Arc::new(FakeBackend::single_shard());
    let core_a = RedisTransportCore::new_client(backend.clone(), default_config());
    let core_b = RedisTransportCore::new_client(backend.clone(), default_config());
    let server = ServerTransport::new("echo", backend.clone(), default_config()).expect("server");

    let reply_a = reply_queue("echo", "client", "threadA");
    let reply_b = reply_queue("echo", "client", "threadB");

    let mut meta_a = Map::new();
    meta_a.insert("reply_to".into(), json!(reply_a));
    core_a
        .send_message(&service_queue("echo"), 1, meta_a, json!({"who": "a"}), None)
        .await
        .expect("send a");

    let mut meta_b = Map::new();
    meta_b.insert("reply_to".into(), json!(reply_b));
    core_b
        .send_message(&service_queue("echo"), 2, meta_b, json!({"who": "b"}), None)
        .await
        .expect("send b");

    for _ in 0..2 {
        match server.receive_request_message(None).await.expect("receive") {
            ReceiveOutcome::Message { request_id, meta, body } => {
                server.send_response_message(request_id, meta, body).await.expect("reply");
            }
            ReceiveOutcome::Timeout => panic!("expected a message"),
        }
    }

    match core_a.receive_message(&reply_a, None).await.expect("receive a") {
        ReceiveOutcome::Message { body, .. } => assert_eq!(body, json!({"who": "a"})),
        ReceiveOutcome::Timeout => panic!("expected a's own reply"),
    }
    match core_b.receive_message(&reply_b, None).await.expect("receive b") {
        ReceiveOutcome::Message { body, .. } => assert_eq!(body, json!({"who": "b"})),
        ReceiveOutcome::Timeout => panic!("expected b's own reply"),
    }
}

/// Scenario 7 (negative control). With the thread-id suffix suppressed,
/// both cores share one reply queue: the second reader gets whatever
/// arrived first in FIFO order, not necessarily its own reply — the exact
/// cross-talk the per-thread suffix exists to prevent.
#[tokio::test]
async fn shared_reply_queue_cross_talks() {
    let backend: Arc<dyn redis_gateway_transport::RedisBackend> = Arc::new(FakeBackend::single_shard());
    let core_a = RedisTransportCore::new_client(backend.clone(), default_config());
    let core_b = RedisTransportCore::new_client(backend.clone(), default_config());
    let server = ServerTransport::new("echo", backend.clone(), default_config()).expect("server");

    // Same response-queue marker, no thread suffix: this is the
    // misconfiguration under test, not a realistic `ClientTransport` usage.
    let shared_reply = reply_queue("echo", "client", "");

    let mut meta_a = Map::new();
    meta_a.insert("reply_to".into(), json!(shared_reply));
    core_a
        .send_message(&service_queue("echo"), 1, meta_a, json!({"who": "a"}), None)
        .await
        .expect("send a");

    let mut meta_b = Map::new();
    meta_b.insert("reply_to".into(), json!(shared_reply));
    core_b
        .send_message(&service_queue("echo"), 2, meta_b, json!({"who": "b"}), None)
        .await
        .expect("send b");

    for _ in 0..2 {
        match server.receive_request_message(None).await.expect("receive") {
            ReceiveOutcome::Message { request_id, meta, body } => {
                server.send_response_message(request_id, meta, body).await.expect("reply");
            }
            ReceiveOutcome::Timeout => panic!("expected a message"),
        }
    }

    // b reads first from the shared queue and gets a's reply instead of its own.
    match core_b.receive_message(&shared_reply, None).await.expect("receive") {
        ReceiveOutcome::Message { body, .. } => assert_eq!(body, json!({"who": "a"}), "b received a's reply"),
        ReceiveOutcome::Timeout => panic!("expected a message"),
    }
}

/// Scenario 7, exercised through the real `ClientTransport` mechanism rather
/// than hand-built queue names: two genuinely distinct OS threads share one
/// `ClientTransport`, each sending and then receiving its own reply, and
/// neither ever observes the other's response.
#[test]
fn client_transport_isolates_replies_across_threads() {
    let backend: Arc<dyn redis_gateway_transport::RedisBackend> = Arc::new(FakeBackend::single_shard());
    let client = Arc::new(ClientTransport::new("echo", backend.clone(), default_config()));
    let server_backend = backend.clone();

    let run_thread = |client: Arc<ClientTransport>, request_id: i64, who: &'static str| {
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async move {
                let mut meta = Map::new();
                meta.insert("who".into(), json!(who));
                client
                    .send_request_message(request_id, meta, json!({"who": who}), None)
                    .await
                    .expect("send");

                match client.receive_response_message(None).await.expect("receive") {
                    ClientReceiveOutcome::Message { body, .. } => body,
                    other => panic!("expected a message, got {other:?}"),
                }
            })
        })
    };

    let handle_a = run_thread(client.clone(), 1, "a");
    let handle_b = run_thread(client.clone(), 2, "b");

    // The two client threads race to send first; drive the server from the
    // main thread until both requests have been echoed back.
    let server_runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
    server_runtime.block_on(async {
        let server = ServerTransport::new("echo", server_backend, default_config()).expect("server");
        for _ in 0..2 {
            loop {
                match server.receive_request_message(Some(Duration::from_millis(50))).await.expect("receive") {
                    ReceiveOutcome::Message { request_id, meta, body } => {
                        server.send_response_message(request_id, meta, body).await.expect("reply");
                        break;
                    }
                    ReceiveOutcome::Timeout => continue,
                }
            }
        }
    });

    let body_a = handle_a.join().expect("thread a");
    let body_b = handle_b.join().expect("thread b");
    assert_eq!(body_a, json!({"who": "a"}), "thread a must receive only its own reply");
    assert_eq!(body_b, json!({"who": "b"}), "thread b must receive only its own reply");
}
