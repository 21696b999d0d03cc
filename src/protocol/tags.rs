//! Message tag bytes (spec §6). All integers on the wire are big-endian;
//! these are just the one-byte discriminants in front of each frame.

/// Server → client tags.
pub mod server {
  pub const AUTHENTICATION: u8 = 0x52;
  pub const COMMAND_COMPLETE: u8 = 0x43;
  pub const COMMAND_DATA_DESCRIPTION: u8 = 0x54;
  pub const DATA: u8 = 0x44;
  pub const ERROR_RESPONSE: u8 = 0x45;
  pub const LOG_MESSAGE: u8 = 0x4C;
  pub const PARAMETER_STATUS: u8 = 0x53;
  pub const PARSE_COMPLETE: u8 = 0x31;
  pub const READY_FOR_COMMAND: u8 = 0x5A;
  pub const SERVER_HANDSHAKE: u8 = 0x76;
  pub const SERVER_KEY_DATA: u8 = 0x4B;
}

/// Client → server tags.
pub mod client {
  pub const CLIENT_HANDSHAKE: u8 = 0x56;
  pub const AUTH_SASL_INITIAL_RESPONSE: u8 = 0x70;
  pub const AUTH_SASL_RESPONSE: u8 = 0x72;
  pub const DESCRIBE_STATEMENT: u8 = 0x44;
  pub const EXECUTE_SCRIPT: u8 = 0x51;
  pub const EXECUTE: u8 = 0x4F;
  /// Older protocol revisions reuse the DescribeStatement tag for Execute.
  pub const EXECUTE_LEGACY: u8 = 0x45;
  /// Single-round-trip execute issued when the query-keyed cache already
  /// holds codec IDs for this command (spec §4.5).
  pub const OPTIMISTIC_EXECUTE: u8 = 0x4E;
  pub const PARSE: u8 = 0x50;
  pub const SYNC: u8 = 0x53;
  pub const FLUSH: u8 = 0x48;
  pub const TERMINATE: u8 = 0x58;
}

/// I/O format byte (spec §6).
pub const IO_FORMAT_BINARY: u8 = 0x62;
pub const IO_FORMAT_JSON: u8 = 0x6A;
pub const IO_FORMAT_NONE: u8 = 0x6E;

/// Cardinality byte (spec §6).
pub const CARDINALITY_MANY: u8 = 0x6D;
pub const CARDINALITY_AT_MOST_ONE: u8 = 0x6F;
pub const CARDINALITY_ONE: u8 = 0x41;
pub const CARDINALITY_NO_RESULT: u8 = 0x6E;
