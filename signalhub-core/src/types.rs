use serde::Serialize;
use serde_json::{Map, Value};

/// Server-assigned, opaque for the life of the process (§3).
pub type ClientId = String;

/// `^[A-Za-z0-9_-]{1,64}$`, validated separately (4.C).
pub type RoomName = String;

/// A client-to-server frame, after the frame codec (4.A) has classified it.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    JoinRoom { room: RoomName },
    LeaveRoom,
    Relay(RelayFrame),
}

/// Any client frame whose `type` is not `join-room`/`leave-room`: offer,
/// answer, ice-candidate, or any other opaque type string (§6).
///
/// The full original JSON object is kept in `raw` so that relaying can
/// forward every field the sender sent, byte-for-byte in content (if not
/// in serialized form), with only `from` added.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayFrame {
    pub raw: Map<String, Value>,
}

impl RelayFrame {
    pub fn frame_type(&self) -> &str {
        self.raw.get("type").and_then(Value::as_str).unwrap_or("")
    }

    /// `None` both when the key is absent and when it is present but not a
    /// string (e.g. `null`) — both cases fall back to the room fan-out
    /// path per §6.
    pub fn to(&self) -> Option<&str> {
        self.raw.get("to").and_then(Value::as_str)
    }
}

/// Server-to-client frames the broker itself originates (§6). Relayed
/// frames are *not* represented here — they are forwarded via
/// [`crate::codec::encode_relay_frame`], which operates on the sender's
/// original JSON object instead of a fixed shape.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "id")]
    Id { id: ClientId },
    #[serde(rename = "room-joined")]
    RoomJoined { room: RoomName },
    #[serde(rename = "room-left")]
    RoomLeft { room: RoomName },
    #[serde(rename = "room-peers")]
    RoomPeers { peers: Vec<ClientId> },
    #[serde(rename = "peer-joined")]
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: ClientId,
    },
    #[serde(rename = "peer-left")]
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: ClientId,
    },
    #[serde(rename = "error")]
    Error {
        message: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<ClientId>,
    },
}

/// Stable `message` strings for [`ServerFrame::Error`] (§7).
pub mod error_message {
    pub const INVALID_MESSAGE: &str = "invalid-message";
    pub const INVALID_ROOM_NAME: &str = "invalid-room-name";
    pub const ROOM_FULL: &str = "room-full";
    pub const RATE_LIMIT: &str = "rate-limit";
    pub const TARGET_UNAVAILABLE: &str = "target-unavailable-or-different-room";
}
