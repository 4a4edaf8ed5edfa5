//! Connection handler (4.G): admission, the `id` frame, and the
//! read/write task split required by §5 ("one logical task per
//! connection for reading, one for writing").

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use signalhub_core::{decode_frame, encode_server_frame, error_message, DecodeError, ClientId, ServerFrame};

use crate::dispatcher::{announce_peer_left, dispatch_frame, dispatch_passthrough};
use crate::ratelimit::TokenBucket;
use crate::state::{AdmitError, AppState};

const CLOSE_OVERLOADED: u16 = 1013;
const CLOSE_ORIGIN_NOT_ALLOWED: u16 = 1008;
/// Application-defined range (RFC 6455 §7.4.2); no standard code exists
/// for "bearer token rejected".
const CLOSE_AUTH_FAILED: u16 = 4001;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    token: Option<String>,
}

/// Upper bound on a single transport frame, independent of the
/// configured `MAX_PAYLOAD`: large enough that a legitimate
/// over-`MAX_PAYLOAD` frame still reaches [`decode_frame`] and is
/// rejected there (frame discarded, connection kept per 4.A/4.F), while
/// still bounding worst-case per-message memory use against a client
/// that ignores the codec entirely.
const TRANSPORT_FRAME_CAP: usize = 4 * 1024 * 1024;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    let origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    ws.max_frame_size(TRANSPORT_FRAME_CAP)
        .on_upgrade(move |socket| async move {
            handle_socket(state, socket, origin, query.token).await;
        })
}

async fn handle_socket(
    state: AppState,
    socket: WebSocket,
    origin: Option<String>,
    token: Option<String>,
) {
    let (mut ws_sender, ws_receiver) = socket.split();

    if !origin_allowed(&state, origin.as_deref()) {
        send_close(&mut ws_sender, CLOSE_ORIGIN_NOT_ALLOWED, "origin-not-allowed").await;
        return;
    }
    if !token_allowed(&state, token.as_deref()) {
        send_close(&mut ws_sender, CLOSE_AUTH_FAILED, "auth-failed").await;
        return;
    }

    let id: ClientId = Uuid::new_v4().to_string();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
    let (admitted_tx, admitted_rx) = oneshot::channel::<bool>();

    tokio::spawn(write_loop(ws_sender, outbound_rx));

    // The read loop is spawned so its `AbortHandle` exists to hand to
    // `admit`, but it must not touch the broker until admission has
    // actually completed (§4.G: admit and send `id` precede the read
    // loop's activity) — so it waits on `admitted_rx` first. A client
    // that sends data before receiving its `id` frame is simply held in
    // the socket's receive buffer until then, never observed early.
    let read_handle = {
        let state = state.clone();
        let id = id.clone();
        tokio::spawn(async move {
            if matches!(admitted_rx.await, Ok(true)) {
                read_loop(state, id, ws_receiver).await;
            }
        })
    };
    let reader_abort = read_handle.abort_handle();

    let admitted = {
        let mut broker = state.broker.write().await;
        broker.admit(id.clone(), outbound_tx.clone(), reader_abort.clone())
    };

    match admitted {
        Ok(()) => {
            info!("client {} admitted", id);
            send_frame(&outbound_tx, &ServerFrame::Id { id: id.clone() });
            let _ = admitted_tx.send(true);
        }
        Err(AdmitError::Overloaded) => {
            warn!("rejecting client {}: registry at capacity", id);
            let _ = outbound_tx.send(close_message(CLOSE_OVERLOADED, "overloaded"));
            let _ = admitted_tx.send(false);
            reader_abort.abort();
        }
    }
}

fn origin_allowed(state: &AppState, origin: Option<&str>) -> bool {
    match &state.allowed_origins {
        None => true,
        Some(allowed) => origin.is_some_and(|value| allowed.iter().any(|entry| entry == value)),
    }
}

fn token_allowed(state: &AppState, token: Option<&str>) -> bool {
    match &state.ws_secret {
        None => true,
        Some(secret) => token == Some(secret.as_ref()),
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound_rx.recv().await {
        if sender.send(message).await.is_err() {
            break;
        }
    }
}

async fn read_loop(state: AppState, id: ClientId, mut receiver: SplitStream<WebSocket>) {
    let mut bucket = TokenBucket::new(state.message_burst, state.message_rate_per_sec);

    while let Some(next) = receiver.next().await {
        let message = match next {
            Ok(message) => message,
            Err(err) => {
                warn!("websocket receive error for {}: {}", id, err);
                break;
            }
        };

        match message {
            Message::Text(text) => {
                if !bucket.try_consume() {
                    send_error(&state, &id, error_message::RATE_LIMIT, None).await;
                    continue;
                }
                handle_text_frame(&state, &id, text).await;
            }
            Message::Close(_) => break,
            Message::Pong(_) => {
                state.broker.write().await.set_alive(&id);
            }
            Message::Ping(_) | Message::Binary(_) => {}
        }
    }

    teardown(&state, &id).await;
}

async fn handle_text_frame(state: &AppState, id: &ClientId, text: axum::extract::ws::Utf8Bytes) {
    match decode_frame(text.as_bytes(), state.max_payload) {
        Ok(frame) => dispatch_frame(state, id, frame).await,
        Err(DecodeError::NotJson) => {
            // 4.A's fall-through rule: non-JSON bytes become an opaque
            // room broadcast if the sender has a room, else are dropped.
            dispatch_passthrough(state, id, Message::Text(text)).await;
        }
        Err(_) => {
            send_error(state, id, error_message::INVALID_MESSAGE, None).await;
        }
    }
}

async fn teardown(state: &AppState, id: &ClientId) {
    let left = { state.broker.write().await.remove(id) };
    if let Some(left) = left {
        announce_peer_left(id, &left.remaining);
    }
    info!("client {} disconnected", id);
}

async fn send_error(state: &AppState, id: &ClientId, message: &'static str, to: Option<ClientId>) {
    let sender = { state.broker.read().await.sender(id) };
    if let Some(tx) = sender {
        send_frame(&tx, &ServerFrame::Error { message, to });
    }
}

fn send_frame(tx: &mpsc::UnboundedSender<Message>, frame: &ServerFrame) {
    if let Ok(encoded) = encode_server_frame(frame) {
        let _ = tx.send(Message::Text(encoded.into()));
    }
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

async fn send_close(sender: &mut SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
    let _ = sender.send(close_message(code, reason)).await;
}
