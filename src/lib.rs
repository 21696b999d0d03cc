//! Binary wire-protocol engine for a Gel/EdgeDB-style object-relational
//! database client: framed message codec, SCRAM-SHA-256 handshake,
//! descriptor-driven type codecs, a granular pessimistic/optimistic query
//! flow, and a bounded connection pool.
//!
//! The query-language grammar, DSN/credentials resolution, and the
//! transaction-block wrapper are external collaborators; this crate only
//! specifies their shape at the boundary it touches.

pub mod cache;
pub mod codec;
pub mod conn;
pub mod descriptor;
pub mod error;
pub mod marshal;
pub mod pool;
pub mod protocol;
pub mod query;
pub mod state_codec;
pub mod stream;
pub mod value;

pub use conn::{Connection, ConnectionOptions, ConnectionState};
pub use error::{ClientError, Result};
pub use query::{Cardinality, IoFormat, QueryKey};
