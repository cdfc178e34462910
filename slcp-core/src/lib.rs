//! SLCP (Simple Local Chat Protocol) reference implementation.
//! Host-driven: no I/O; host passes datagrams and requests, receives actions.

pub mod core;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod wire;

pub use crate::core::{Action, ChatCore, ChatError, Event, Request, StreamHeader};
pub use protocol::{Command, ImageHeader, Message, MAX_MESSAGE_LEN};
pub use registry::{PeerRecord, PeerRegistry};
pub use session::{Presence, SessionState};
pub use wire::{decode, decode_bytes, encode, encode_raw, ProtocolError};
