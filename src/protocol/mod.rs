//! Wire protocol message layer (spec §4.2, §6): message tags, the
//! handshake, and SCRAM-SHA-256 authentication.

pub mod frame;
pub mod message;
pub mod scram;
pub mod tags;

pub use frame::{FrameReader, FrameWriter};
pub use message::{AuthStatus, ClientHandshake, ServerHandshake, TransactionState};
