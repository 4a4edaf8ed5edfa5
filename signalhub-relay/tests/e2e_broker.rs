use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use signalhub_relay::{build_router, AppState};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = futures::stream::SplitSink<WsStream, Message>;
type WsRead = futures::stream::SplitStream<WsStream>;

struct TestClient {
    write: WsWrite,
    read: WsRead,
}

impl TestClient {
    async fn send_json(&mut self, value: Value) {
        self.write
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("send frame");
    }

    async fn recv_json(&mut self, wait: Duration) -> Option<Value> {
        let next = timeout(wait, self.read.next()).await.ok()?;
        let message = next?.ok()?;
        match message {
            Message::Text(text) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    }

    /// The first frame after admission is always `id` (invariant 1).
    async fn recv_id(&mut self) -> String {
        let frame = self
            .recv_json(Duration::from_secs(2))
            .await
            .expect("id frame");
        assert_eq!(frame["type"], "id");
        frame["id"].as_str().expect("id string").to_owned()
    }
}

fn default_state() -> AppState {
    AppState::new(100, 50, 65_536, 1_000.0, 1_000.0, None, None)
}

async fn start_relay(state: AppState) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral socket");
    let address = listener.local_addr().expect("local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, build_router(state)).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("ws://{}", address), shutdown_tx)
}

async fn connect(base_url: &str, query: &str) -> TestClient {
    let url = if query.is_empty() {
        format!("{}/ws", base_url)
    } else {
        format!("{}/ws?{}", base_url, query)
    };
    let (stream, _) = connect_async(url).await.expect("connect websocket");
    let (write, read) = stream.split();
    TestClient { write, read }
}

async fn connect_and_admit(base_url: &str) -> (TestClient, String) {
    let mut client = connect(base_url, "").await;
    let id = client.recv_id().await;
    (client, id)
}

#[tokio::test]
async fn pairwise_isolation() {
    let (url, shutdown) = start_relay(default_state()).await;

    let (mut a, _a_id) = connect_and_admit(&url).await;
    let (mut b, b_id) = connect_and_admit(&url).await;

    a.send_json(json!({"type": "join-room", "room": "r1"})).await;
    b.send_json(json!({"type": "join-room", "room": "r2"})).await;

    let a_joined = a.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(a_joined["type"], "room-joined");
    assert_eq!(a_joined["room"], "r1");
    let a_peers = a.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(a_peers["type"], "room-peers");
    assert_eq!(a_peers["peers"], json!([]));

    let b_joined = b.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(b_joined["type"], "room-joined");
    assert_eq!(b_joined["room"], "r2");
    let b_peers = b.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(b_peers["type"], "room-peers");
    assert_eq!(b_peers["peers"], json!([]));

    a.send_json(json!({"type": "offer", "to": b_id, "offer": {"sdp": "X"}}))
        .await;

    let err = a.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(err["type"], "error");
    assert_eq!(err["message"], "target-unavailable-or-different-room");

    let nothing = b.recv_json(Duration::from_millis(300)).await;
    assert!(nothing.is_none(), "B should receive nothing from a cross-room relay");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn successful_relay_injects_from() {
    let (url, shutdown) = start_relay(default_state()).await;

    let (mut a, a_id) = connect_and_admit(&url).await;
    let (mut b, b_id) = connect_and_admit(&url).await;

    a.send_json(json!({"type": "join-room", "room": "r1"})).await;
    a.recv_json(Duration::from_secs(2)).await; // room-joined
    a.recv_json(Duration::from_secs(2)).await; // room-peers

    b.send_json(json!({"type": "join-room", "room": "r1"})).await;
    b.recv_json(Duration::from_secs(2)).await; // room-joined
    b.recv_json(Duration::from_secs(2)).await; // room-peers

    // A also receives peer-joined for B at some point; drain it.
    let a_notice = a.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(a_notice["type"], "peer-joined");
    assert_eq!(a_notice["peerId"], b_id);

    a.send_json(json!({"type": "offer", "to": b_id, "offer": {"sdp": "X"}}))
        .await;

    let received = b.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(received["type"], "offer");
    assert_eq!(received["from"], a_id);
    assert_eq!(received["to"], b_id);
    assert_eq!(received["offer"]["sdp"], "X");

    let no_error = a.recv_json(Duration::from_millis(300)).await;
    assert!(no_error.is_none(), "sender should receive no error frame");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn join_notification_ordering() {
    let (url, shutdown) = start_relay(default_state()).await;

    let (mut a, a_id) = connect_and_admit(&url).await;
    let (mut b, _b_id) = connect_and_admit(&url).await;

    a.send_json(json!({"type": "join-room", "room": "r1"})).await;
    assert_eq!(a.recv_json(Duration::from_secs(2)).await.unwrap()["type"], "room-joined");
    let a_peers = a.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(a_peers["type"], "room-peers");
    assert_eq!(a_peers["peers"], json!([]));

    b.send_json(json!({"type": "join-room", "room": "r1"})).await;

    let b_joined = b.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(b_joined["type"], "room-joined");
    let b_peers = b.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(b_peers["type"], "room-peers");
    assert_eq!(b_peers["peers"], json!([a_id]));

    let a_notice = a.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(a_notice["type"], "peer-joined");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn disconnect_announces_departure() {
    let (url, shutdown) = start_relay(default_state()).await;

    let (mut a, a_id) = connect_and_admit(&url).await;
    let (mut b, _) = connect_and_admit(&url).await;
    let (mut c, _) = connect_and_admit(&url).await;

    for client in [&mut a, &mut b, &mut c] {
        client.send_json(json!({"type": "join-room", "room": "r1"})).await;
    }
    // drain each client's own room-joined/room-peers plus any peer-joined
    for client in [&mut a, &mut b, &mut c] {
        for _ in 0..5 {
            if client.recv_json(Duration::from_millis(200)).await.is_none() {
                break;
            }
        }
    }

    drop(a);

    let b_notice = b.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(b_notice["type"], "peer-left");
    assert_eq!(b_notice["peerId"], a_id);

    let c_notice = c.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(c_notice["type"], "peer-left");
    assert_eq!(c_notice["peerId"], a_id);

    let _ = shutdown.send(());
}

#[tokio::test]
async fn empty_room_is_garbage_collected() {
    let state = default_state();
    let (url, shutdown) = start_relay(state.clone()).await;

    let (mut a, _) = connect_and_admit(&url).await;
    a.send_json(json!({"type": "join-room", "room": "r1"})).await;
    a.recv_json(Duration::from_secs(2)).await;
    a.recv_json(Duration::from_secs(2)).await;

    drop(a);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let snapshot = state.broker.read().await.snapshot();
    assert!(!snapshot.rooms.contains_key("r1"));

    let _ = shutdown.send(());
}

#[tokio::test]
async fn rate_limit_drops_excess_frames() {
    let state = AppState::new(100, 50, 65_536, 10.0, 20.0, None, None);
    let (url, shutdown) = start_relay(state).await;

    let (mut a, _) = connect_and_admit(&url).await;

    for _ in 0..25 {
        a.send_json(json!({"type": "join-room", "room": "r"})).await;
    }

    let mut rate_limit_errors = 0;
    let mut room_joined = 0;
    for _ in 0..60 {
        match a.recv_json(Duration::from_millis(200)).await {
            Some(frame) if frame["type"] == "error" && frame["message"] == "rate-limit" => {
                rate_limit_errors += 1;
            }
            Some(frame) if frame["type"] == "room-joined" => {
                room_joined += 1;
            }
            Some(_) => {}
            None => break,
        }
    }

    assert!(
        rate_limit_errors >= 5,
        "expected at least 5 rate-limit errors, got {}",
        rate_limit_errors
    );
    assert!(
        room_joined <= 20,
        "accepted joins should not exceed burst capacity, got {}",
        room_joined
    );

    let _ = shutdown.send(());
}

#[tokio::test]
async fn room_capacity_rejects_overflow_joiner_without_moving_it() {
    let state = AppState::new(100, 2, 65_536, 1_000.0, 1_000.0, None, None);
    let (url, shutdown) = start_relay(state).await;

    let (mut a, _) = connect_and_admit(&url).await;
    let (mut b, _) = connect_and_admit(&url).await;
    let (mut c, _) = connect_and_admit(&url).await;

    a.send_json(json!({"type": "join-room", "room": "full"})).await;
    a.recv_json(Duration::from_secs(2)).await;
    a.recv_json(Duration::from_secs(2)).await;

    b.send_json(json!({"type": "join-room", "room": "full"})).await;
    b.recv_json(Duration::from_secs(2)).await;
    b.recv_json(Duration::from_secs(2)).await;
    a.recv_json(Duration::from_secs(2)).await; // peer-joined for b

    c.send_json(json!({"type": "join-room", "room": "other"})).await;
    c.recv_json(Duration::from_secs(2)).await;
    c.recv_json(Duration::from_secs(2)).await;

    c.send_json(json!({"type": "join-room", "room": "full"})).await;
    let rejection = c.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(rejection["type"], "error");
    assert_eq!(rejection["message"], "room-full");

    // C must remain in its previous room, not end up in neither.
    c.send_json(json!({"type": "leave-room"})).await;
    let left = c.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(left["type"], "room-left");
    assert_eq!(left["room"], "other");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn invalid_room_name_is_rejected() {
    let (url, shutdown) = start_relay(default_state()).await;
    let (mut a, _) = connect_and_admit(&url).await;

    a.send_json(json!({"type": "join-room", "room": "has a space"}))
        .await;
    let err = a.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(err["type"], "error");
    assert_eq!(err["message"], "invalid-room-name");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn oversized_frame_is_rejected_without_crashing_connection() {
    let (url, shutdown) = start_relay(default_state()).await;
    let (mut a, _) = connect_and_admit(&url).await;

    let huge_room = "x".repeat(70_000);
    a.send_json(json!({"type": "join-room", "room": huge_room}))
        .await;

    // The connection stays usable: a well-formed frame afterward still works.
    a.send_json(json!({"type": "join-room", "room": "ok-room"}))
        .await;
    let joined = a.recv_json(Duration::from_secs(2)).await.unwrap();
    assert_eq!(joined["type"], "room-joined");

    let _ = shutdown.send(());
}
