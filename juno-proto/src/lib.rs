//! Wire protocol for juno module↔host communication.
//!
//! Messages are flat JSON objects tagged by a numeric `type` and framed
//! one per line, suitable for any reliable ordered byte stream (Unix
//! socket, TCP).

mod codec;
mod message;

pub use codec::{decode, encode, read_frame, recv, send};
pub use message::{DEFAULT_SOCKET, Message, MessageType, RequestId};
