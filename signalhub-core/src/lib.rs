//! Wire protocol and room-name validation shared by the relay binary and
//! its tests: frame decoding/encoding (4.A, 6), room name rules (4.C),
//! and the typed errors both surface.

mod codec;
mod error;
mod types;
mod validate;

pub use codec::{decode_frame, encode_relay_frame, encode_server_frame};
pub use error::{DecodeError, RoomNameError};
pub use types::{error_message, ClientFrame, ClientId, RelayFrame, RoomName, ServerFrame};
pub use validate::validate_room_name;
