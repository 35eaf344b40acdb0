//! End-to-end tests against a server bound to an ephemeral port.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use roomlink::config::ServerConfig;
use roomlink::server::{create_router, AppState};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(config: ServerConfig) -> (SocketAddr, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(config);
    let app = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, path_and_query: &str) -> Ws {
    let (ws, _) = connect_async(format!("ws://{}{}", addr, path_and_query))
        .await
        .unwrap();
    ws
}

/// Next text frame as JSON
async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Skip frames until one of the given type arrives
async fn next_of_type(ws: &mut Ws, kind: &str) -> Value {
    loop {
        let value = next_json(ws).await;
        if value["type"] == kind {
            return value;
        }
    }
}

async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_join_and_chat() {
    let (addr, _state) = spawn_server(ServerConfig::default()).await;

    let mut ann = connect(addr, "/ws?room=room1&name=ann").await;
    let welcome = next_json(&mut ann).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["room"], "room1");
    assert_eq!(welcome["participants"], json!(["ann"]));
    assert_eq!(next_json(&mut ann).await["action"], "joined");

    let mut bob = connect(addr, "/ws/room1?name=bob").await;
    let welcome = next_json(&mut bob).await;
    assert_eq!(welcome["participants"], json!(["ann", "bob"]));
    assert_eq!(welcome["lastSeq"], 1);

    let joined = next_of_type(&mut ann, "presence").await;
    assert_eq!(joined["name"], "bob");
    assert_eq!(joined["seq"], 2);

    send_json(&mut bob, json!({"type": "chat", "body": {"stroke": [1, 2]}})).await;

    // Everyone, the sender included, sees the same event
    for ws in [&mut ann, &mut bob] {
        let msg = next_of_type(ws, "message").await;
        assert_eq!(msg["seq"], 3);
        assert_eq!(msg["sender"], "bob");
        assert_eq!(msg["body"], json!({"stroke": [1, 2]}));
    }
}

#[tokio::test]
async fn test_defaults_applied() {
    let (addr, _state) = spawn_server(ServerConfig::default()).await;

    let mut ws = connect(addr, "/ws").await;
    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["room"], "default");
    assert_eq!(welcome["name"], "anonymous");
}

#[tokio::test]
async fn test_invalid_name_rejected_before_upgrade() {
    let (addr, _state) = spawn_server(ServerConfig::default()).await;

    let name = "x".repeat(100);
    let result = connect_async(format!("ws://{}/ws?name={}", addr, name)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_malformed_message_keeps_connection() {
    let (addr, _state) = spawn_server(ServerConfig::default()).await;

    let mut ws = connect(addr, "/ws?room=r&name=ann").await;
    next_of_type(&mut ws, "presence").await;

    ws.send(Message::Text("{not json".into())).await.unwrap();
    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "INVALID_REQUEST");

    send_json(&mut ws, json!({"type": "ping", "id": "42"})).await;
    assert_eq!(next_json(&mut ws).await, json!({"type": "pong", "id": "42"}));
}

#[tokio::test]
async fn test_topic_survives_empty_room() {
    let config = ServerConfig {
        max_topic_len: 20,
        ..Default::default()
    };
    let (addr, state) = spawn_server(config).await;

    let mut ann = connect(addr, "/ws?room=art&name=ann").await;
    next_of_type(&mut ann, "presence").await;

    send_json(&mut ann, json!({"type": "setTopic", "topic": "a".repeat(30)})).await;
    assert_eq!(next_json(&mut ann).await["code"], "TOPIC_TOO_LONG");

    send_json(&mut ann, json!({"type": "setTopic", "topic": "draw a cat"})).await;
    let update = next_of_type(&mut ann, "topicUpdate").await;
    assert_eq!(update["setBy"], "ann");

    ann.close(None).await.unwrap();
    eventually(|| state.registry().room_count() == 0).await;

    let mut bob = connect(addr, "/ws?room=art&name=bob").await;
    let welcome = next_json(&mut bob).await;
    assert_eq!(welcome["topic"], "draw a cat");
    assert_eq!(welcome["lastSeq"], 0);
}

#[tokio::test]
async fn test_leave_is_announced() {
    let (addr, state) = spawn_server(ServerConfig::default()).await;

    let mut ann = connect(addr, "/ws?room=r&name=ann").await;
    let mut bob = connect(addr, "/ws?room=r&name=bob").await;
    next_of_type(&mut bob, "presence").await;
    eventually(|| state.registry().client_count() == 2).await;

    bob.close(None).await.unwrap();

    loop {
        let presence = next_of_type(&mut ann, "presence").await;
        if presence["action"] == "left" {
            assert_eq!(presence["name"], "bob");
            break;
        }
    }
    assert_eq!(state.registry().client_count(), 1);
}

#[tokio::test]
async fn test_reconnect_replays_missed_events() {
    let (addr, _state) = spawn_server(ServerConfig::default()).await;

    let mut ann = connect(addr, "/ws?room=r&name=ann").await;
    next_of_type(&mut ann, "presence").await;

    let mut bob = connect(addr, "/ws?room=r&name=bob").await;
    let bob_seq = next_of_type(&mut bob, "presence").await["seq"].as_u64().unwrap();
    bob.close(None).await.unwrap();
    loop {
        if next_of_type(&mut ann, "presence").await["action"] == "left" {
            break;
        }
    }

    for i in 0..3 {
        send_json(&mut ann, json!({"type": "chat", "body": i})).await;
    }
    // Wait until all three were sequenced
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(next_of_type(&mut ann, "message").await["seq"].as_u64().unwrap());
    }
    let last = seen[2];

    let mut bob = connect(addr, &format!("/ws?room=r&name=bob&since={}", bob_seq)).await;
    let welcome = next_json(&mut bob).await;
    assert_eq!(welcome["type"], "welcome");

    // bob's own departure, then the three chats, then the new join
    let mut seqs = Vec::new();
    let mut bodies = Vec::new();
    loop {
        let event = next_json(&mut bob).await;
        let seq = event["seq"].as_u64().unwrap();
        seqs.push(seq);
        if event["type"] == "message" {
            bodies.push(event["body"].clone());
        }
        if seq > last {
            assert_eq!(event["action"], "joined");
            break;
        }
    }
    assert_eq!(bodies, vec![json!(0), json!(1), json!(2)]);
    assert!(seqs.windows(2).all(|w| w[0] + 1 == w[1]));
    assert_eq!(seqs[0], bob_seq + 1);
}

#[tokio::test]
async fn test_resume_into_recreated_room() {
    let (addr, state) = spawn_server(ServerConfig::default()).await;

    let mut ann = connect(addr, "/ws?room=r&name=ann").await;
    let welcome = next_json(&mut ann).await;
    let old_epoch = welcome["epoch"].as_str().unwrap().to_string();
    for i in 0..2 {
        send_json(&mut ann, json!({"type": "chat", "body": i})).await;
    }
    next_of_type(&mut ann, "message").await;
    let cursor = next_of_type(&mut ann, "message").await["seq"].as_u64().unwrap();
    assert_eq!(cursor, 3);
    ann.close(None).await.unwrap();
    eventually(|| state.registry().room_count() == 0).await;

    let mut bob = connect(addr, "/ws?room=r&name=bob").await;
    next_of_type(&mut bob, "presence").await;
    send_json(&mut bob, json!({"type": "chat", "body": "missed?"})).await;
    assert_eq!(next_of_type(&mut bob, "message").await["seq"], 2);

    let mut ann = connect(
        addr,
        &format!("/ws?room=r&name=ann&since={}&epoch={}", cursor, old_epoch),
    )
    .await;
    let welcome = next_json(&mut ann).await;
    assert_ne!(welcome["epoch"].as_str().unwrap(), old_epoch);

    let replayed = next_json(&mut ann).await;
    assert_eq!(replayed["seq"], 1);
    assert_eq!(replayed["type"], "presence");
    let replayed = next_json(&mut ann).await;
    assert_eq!(replayed["seq"], 2);
    assert_eq!(replayed["body"], "missed?");
    let joined = next_json(&mut ann).await;
    assert_eq!(joined["seq"], 3);
    assert_eq!(joined["name"], "ann");
}

#[tokio::test]
async fn test_idle_connection_closed() {
    let config = ServerConfig {
        idle_timeout_secs: 1,
        ..Default::default()
    };
    let (addr, state) = spawn_server(config).await;

    let _ws = connect(addr, "/ws?room=quiet").await;
    eventually(|| state.registry().client_count() == 1).await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    eventually(|| state.registry().room_count() == 0).await;
}
