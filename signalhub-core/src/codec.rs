use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::types::{ClientFrame, RelayFrame, ServerFrame};

/// Keys that would shadow `Object.prototype` members in a JS consumer of
/// this wire format. The broker itself never evaluates these frames as
/// code, but it relays them to other browser clients, so it refuses to
/// forward (or even accept) an object carrying one at the top level.
const RESERVED_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Frame codec (4.A): parse one inbound text frame.
///
/// `max_payload` is injected rather than read from a global constant so
/// that the effective cap always matches the server's configured value.
///
/// Frames that fail to parse as JSON are *not* necessarily protocol
/// errors — per 4.A's fall-through rule, the caller must check whether
/// the sender currently belongs to a room before treating
/// [`DecodeError::NotJson`] as anything more than "treat as an opaque
/// room broadcast." That decision needs the sender's room membership,
/// which this pure function deliberately has no access to.
pub fn decode_frame(bytes: &[u8], max_payload: usize) -> Result<ClientFrame, DecodeError> {
    if bytes.len() > max_payload {
        return Err(DecodeError::Oversized(max_payload));
    }

    let value: Value = serde_json::from_slice(bytes).map_err(|_| DecodeError::NotJson)?;
    let Value::Object(map) = value else {
        return Err(DecodeError::NotObject);
    };

    if let Some(&key) = RESERVED_KEYS.iter().find(|key| map.contains_key(**key)) {
        return Err(DecodeError::ReservedKey(key));
    }

    let frame_type = map
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;

    match frame_type {
        "join-room" => {
            let room = map
                .get("room")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_owned();
            Ok(ClientFrame::JoinRoom { room })
        }
        "leave-room" => Ok(ClientFrame::LeaveRoom),
        _ => Ok(ClientFrame::Relay(RelayFrame { raw: map })),
    }
}

/// Encode a broker-originated frame (§6 server-to-client table).
pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Encode a relay or room-broadcast frame: the sender's original object,
/// with `from` inserted (overwriting any client-supplied `from`, which
/// would otherwise let a client spoof another sender's identity).
///
/// All other fields are preserved as received — the broker never
/// interprets payload contents (4.F's "relay content rule").
pub fn encode_relay_frame(
    mut raw: Map<String, Value>,
    from: &str,
) -> Result<String, serde_json::Error> {
    raw.insert("from".to_owned(), Value::String(from.to_owned()));
    serde_json::to_string(&Value::Object(raw))
}
