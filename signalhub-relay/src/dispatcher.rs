//! Per-frame routing decision (4.F). Consumes a classified
//! [`ClientFrame`] and turns it into zero or more enqueued outbound
//! frames, under the rules in spec.md's dispatcher table. Never writes
//! to the transport directly — every send goes through a client's
//! bounded outbound queue.

use axum::extract::ws::Message;
use tracing::warn;

use signalhub_core::{
    encode_relay_frame, encode_server_frame, error_message, ClientFrame, ClientId, RelayFrame,
    ServerFrame,
};

use crate::state::{AppState, JoinError, Outbox};

pub async fn dispatch_frame(state: &AppState, sender_id: &ClientId, frame: ClientFrame) {
    match frame {
        ClientFrame::JoinRoom { room } => dispatch_join(state, sender_id, room).await,
        ClientFrame::LeaveRoom => dispatch_leave(state, sender_id).await,
        ClientFrame::Relay(relay) => dispatch_relay(state, sender_id, relay).await,
    }
}

/// Non-JSON bytes (4.A's fall-through rule): broadcast unmodified to the
/// sender's room, or drop silently if the sender has no room.
pub async fn dispatch_passthrough(state: &AppState, sender_id: &ClientId, raw: Message) {
    let peers = state.broker.read().await.room_peers_except(sender_id);
    for (_, tx) in peers {
        let _ = tx.send(raw.clone());
    }
}

async fn dispatch_join(state: &AppState, sender_id: &ClientId, room: String) {
    let result = {
        let mut broker = state.broker.write().await;
        broker.join(sender_id, room.clone())
    };

    match result {
        Ok(peers) => {
            let Some(sender_tx) = state.broker.read().await.sender(sender_id) else {
                return;
            };

            // Ordering is load-bearing (§5): room-joined to the joiner
            // first, then peer-joined to existing members, then
            // room-peers to the joiner.
            send_frame(&sender_tx, &ServerFrame::RoomJoined { room: room.clone() });
            for (_, peer_tx) in &peers {
                send_frame(
                    peer_tx,
                    &ServerFrame::PeerJoined {
                        peer_id: sender_id.clone(),
                    },
                );
            }
            send_frame(
                &sender_tx,
                &ServerFrame::RoomPeers {
                    peers: peers.into_iter().map(|(id, _)| id).collect(),
                },
            );
        }
        Err(JoinError::InvalidRoomName) => {
            send_error(state, sender_id, error_message::INVALID_ROOM_NAME, None).await;
        }
        Err(JoinError::RoomFull) => {
            send_error(state, sender_id, error_message::ROOM_FULL, None).await;
        }
    }
}

async fn dispatch_leave(state: &AppState, sender_id: &ClientId) {
    let left = {
        let mut broker = state.broker.write().await;
        broker.leave(sender_id)
    };

    let Some(left) = left else {
        return; // silent no-op: sender was not in a room
    };

    // peer-left to remaining members first, then room-left to the leaver.
    for (_, tx) in &left.remaining {
        send_frame(
            tx,
            &ServerFrame::PeerLeft {
                peer_id: sender_id.clone(),
            },
        );
    }

    if let Some(sender_tx) = state.broker.read().await.sender(sender_id) {
        send_frame(&sender_tx, &ServerFrame::RoomLeft { room: left.room });
    }
}

async fn dispatch_relay(state: &AppState, sender_id: &ClientId, relay: RelayFrame) {
    match relay.to() {
        Some(to) => {
            let target = state.broker.read().await.resolve_same_room(sender_id, to);
            match target {
                Some(target_tx) => relay_to(&target_tx, relay.raw, sender_id),
                None => {
                    send_error(
                        state,
                        sender_id,
                        error_message::TARGET_UNAVAILABLE,
                        Some(to.to_owned()),
                    )
                    .await;
                }
            }
        }
        None => {
            let peers = state.broker.read().await.room_peers_except(sender_id);
            if peers.is_empty() {
                return; // no-op: sender has no room, or room is otherwise empty
            }
            match encode_relay_frame(relay.raw, sender_id) {
                Ok(encoded) => {
                    for (_, tx) in peers {
                        let _ = tx.send(Message::Text(encoded.clone().into()));
                    }
                }
                Err(err) => warn!("failed to encode relay fan-out: {}", err),
            }
        }
    }
}

fn relay_to(target_tx: &Outbox, raw: serde_json::Map<String, serde_json::Value>, from: &ClientId) {
    match encode_relay_frame(raw, from) {
        Ok(encoded) => {
            let _ = target_tx.send(Message::Text(encoded.into()));
        }
        Err(err) => warn!("failed to encode relay frame: {}", err),
    }
}

async fn send_error(
    state: &AppState,
    sender_id: &ClientId,
    message: &'static str,
    to: Option<ClientId>,
) {
    if let Some(tx) = state.broker.read().await.sender(sender_id) {
        send_frame(&tx, &ServerFrame::Error { message, to });
    }
}

fn send_frame(tx: &Outbox, frame: &ServerFrame) {
    match encode_server_frame(frame) {
        Ok(encoded) => {
            let _ = tx.send(Message::Text(encoded.into()));
        }
        Err(err) => warn!("failed to encode server frame: {}", err),
    }
}

/// Shared by the connection handler's own teardown and the heartbeat
/// sweep's eviction path: announce a departed client to whoever was left
/// in its room (4.F, last row of the leave-notification table).
pub fn announce_peer_left(departed: &ClientId, remaining: &[(ClientId, Outbox)]) {
    let frame = ServerFrame::PeerLeft {
        peer_id: departed.clone(),
    };
    let Ok(encoded) = encode_server_frame(&frame) else {
        return;
    };
    for (_, tx) in remaining {
        let _ = tx.send(Message::Text(encoded.clone().into()));
    }
}
