//! Query keys (spec §3): the two cache keys the granular query flow
//! consults before touching the socket.

use uuid::Uuid;

use crate::codec::registry::OutputType;
use crate::protocol::message::{Cardinality, IoFormat};

/// Keys the type-ID cache: maps a query's shape to the descriptor IDs
/// the server last reported for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
  pub command: String,
  pub io_format: IoFormat,
  pub expected_cardinality: Cardinality,
}

impl QueryKey {
  pub fn new(command: impl Into<String>, io_format: IoFormat, expected_cardinality: Cardinality) -> Self {
    Self {
      command: command.into(),
      io_format,
      expected_cardinality,
    }
  }
}

/// The descriptor IDs a `QueryKey` last resolved to, plus the output
/// binding they were built for — this is what keys the codec cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeIds {
  pub in_id: Uuid,
  pub out_id: Uuid,
  pub out_type: OutputType,
}
