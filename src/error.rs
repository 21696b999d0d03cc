//! Error taxonomy (spec §7). Kinds, not exception hierarchies: every
//! fallible operation in this crate returns one of these variants, and
//! callers match on them to decide whether a connection is still usable.

use std::io;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Server-reported error fields, per the ErrorResponse/NoticeResponse wire
/// message (severity, code, human message, and whatever else the server
/// attached).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerErrorDetail {
  pub severity: u8,
  pub code: u32,
  pub message: String,
  pub attributes: std::collections::BTreeMap<u16, String>,
}

impl std::fmt::Display for ServerErrorDetail {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "server error {:08x}: {}", self.code, self.message)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
  /// Socket EOF or reset. Non-recoverable for this connection; the pool
  /// must discard it rather than return it.
  #[error("connection closed: {0}")]
  ConnectionClosed(#[source] io::Error),

  /// Deadline exceeded mid-exchange. The connection is marked unusable.
  #[error("connection timed out")]
  ConnectionTimeout,

  /// Framing error, unknown message tag, or an unexpected state
  /// transition. Indicates a bug or an incompatible server; the connection
  /// is discarded.
  #[error("protocol error: {0}")]
  Protocol(String),

  /// SCRAM signature mismatch, or an explicit auth ErrorResponse.
  #[error("authentication failed: {0}")]
  Authentication(String),

  /// A server ErrorResponse. Does not poison the connection — a
  /// ReadyForCommand always follows.
  #[error("{0}")]
  Query(ServerErrorDetail),

  /// Caller declared at-most-one/one but the server reported `Many`, or
  /// zero rows arrived for an exactly-one query.
  #[error("cardinality mismatch: {0}")]
  CardinalityMismatch(String),

  /// Exactly-one query returned zero rows. Distinguished from
  /// `CardinalityMismatch` so single-row call sites can special-case "no
  /// row" without treating it as an error condition.
  #[error("zero results")]
  ZeroResults,

  /// The encoder rejected a supplied argument: wrong runtime type, too few
  /// positional arguments, or a missing named-tuple field. Not fatal to
  /// the connection — detected before any bytes touch the socket.
  #[error("invalid argument at {path}: {reason}")]
  ArgumentInvalid { path: String, reason: String },

  /// The output codec could not bind to the caller's receiver type. Not
  /// fatal to the connection.
  #[error("receiver mismatch at {path}: {reason}")]
  ReceiverMismatch { path: String, reason: String },
}

impl From<io::Error> for ClientError {
  fn from(err: io::Error) -> Self {
    match err.kind() {
      io::ErrorKind::TimedOut => ClientError::ConnectionTimeout,
      io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
        ClientError::ConnectionClosed(err)
      }
      _ => ClientError::Protocol(err.to_string()),
    }
  }
}

impl ClientError {
  /// Whether this error, per §7's propagation policy, must mark the
  /// connection unusable. Query-level ErrorResponses and argument/receiver
  /// errors leave the connection clean.
  pub fn poisons_connection(&self) -> bool {
    matches!(
      self,
      ClientError::ConnectionClosed(_) | ClientError::ConnectionTimeout | ClientError::Protocol(_) | ClientError::Authentication(_)
    )
  }
}
