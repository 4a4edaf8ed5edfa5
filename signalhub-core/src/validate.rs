use crate::error::RoomNameError;

/// Room names are bounded ASCII identifiers: `^[A-Za-z0-9_-]{1,64}$`.
///
/// No `regex` dependency: the pattern is a single character class with a
/// length bound, cheaper and clearer to check by hand than to compile.
pub fn validate_room_name(name: &str) -> Result<(), RoomNameError> {
    let len = name.len();
    if len == 0 || len > 64 {
        return Err(RoomNameError::Invalid);
    }
    if name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        Ok(())
    } else {
        Err(RoomNameError::Invalid)
    }
}
