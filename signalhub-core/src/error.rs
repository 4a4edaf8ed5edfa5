use thiserror::Error;

/// Failures from [`crate::codec::decode_frame`].
///
/// Every variant maps to a wire-level outcome decided by the caller (the
/// dispatcher): some become an `invalid-message` error frame to the
/// sender, `NotJson` is routed through the non-JSON passthrough rule
/// (4.A) instead of being treated as an error at all.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame exceeds the {0}-byte payload cap")]
    Oversized(usize),
    #[error("frame is not valid JSON")]
    NotJson,
    #[error("frame is not a JSON object")]
    NotObject,
    #[error("frame contains a reserved key: {0}")]
    ReservedKey(&'static str),
    #[error("frame is missing a string \"type\" field")]
    MissingType,
}

/// Failures from [`crate::validate::validate_room_name`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomNameError {
    #[error("room name must match ^[A-Za-z0-9_-]{{1,64}}$")]
    Invalid,
}
