//! Shared protocol definitions for the Matchpoint wire format.

pub mod message;

pub use message::{
    ClientFrame, ParseError, ROOM_CODE_LEN, RelayKind, Role, ServerMessage, encode,
    parse_client_frame,
};
