//! Per-message encode/decode, the handshake, and the auth status codes
//! (spec §4.2, §6).

use std::collections::BTreeMap;

use bitflags::bitflags;
use uuid::Uuid;

use super::frame::{FrameWriter, WirePop};
use super::tags;
use crate::error::{ClientError, ServerErrorDetail};

pub type Result<T> = std::result::Result<T, ClientError>;

pub const PROTOCOL_MAJOR: u16 = 2;
pub const PROTOCOL_MINOR: u16 = 0;

/// Logical query cardinality (spec §6, §4.5). Maps 1:1 to a wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
  NoResult,
  AtMostOne,
  One,
  Many,
}

impl Cardinality {
  pub fn to_wire(self) -> u8 {
    match self {
      Cardinality::NoResult => tags::CARDINALITY_NO_RESULT,
      Cardinality::AtMostOne => tags::CARDINALITY_AT_MOST_ONE,
      Cardinality::One => tags::CARDINALITY_ONE,
      Cardinality::Many => tags::CARDINALITY_MANY,
    }
  }

  pub fn from_wire(b: u8) -> Result<Self> {
    match b {
      tags::CARDINALITY_MANY => Ok(Cardinality::Many),
      tags::CARDINALITY_AT_MOST_ONE => Ok(Cardinality::AtMostOne),
      tags::CARDINALITY_ONE => Ok(Cardinality::One),
      tags::CARDINALITY_NO_RESULT => Ok(Cardinality::NoResult),
      other => Err(ClientError::Protocol(format!("unknown cardinality byte {other:#04x}"))),
    }
  }
}

/// I/O format byte (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoFormat {
  Binary,
  Json,
  None,
}

impl IoFormat {
  pub fn to_wire(self) -> u8 {
    match self {
      IoFormat::Binary => tags::IO_FORMAT_BINARY,
      IoFormat::Json => tags::IO_FORMAT_JSON,
      IoFormat::None => tags::IO_FORMAT_NONE,
    }
  }
}

bitflags! {
  /// Capability mask (spec §4.5): limits what the server may allow for a
  /// given Parse/Execute, and is echoed back (the subset actually used)
  /// on CommandComplete.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct Capabilities: u64 {
    const MODIFICATIONS   = 0b0000_0001;
    const SESSION_CONFIG   = 0b0000_0010;
    const TRANSACTION      = 0b0000_0100;
    const DDL              = 0b0000_1000;
    const PERSISTENT_CONFIG = 0b0001_0000;
    const ALL = u64::MAX;
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
  Idle,
  InTransaction,
  InTransactionError,
}

impl TransactionState {
  pub fn from_wire(b: u8) -> Result<Self> {
    match b {
      b'I' => Ok(TransactionState::Idle),
      b'T' => Ok(TransactionState::InTransaction),
      b'E' => Ok(TransactionState::InTransactionError),
      other => Err(ClientError::Protocol(format!("unknown transaction state byte {other:#04x}"))),
    }
  }
}

/// Authentication status codes (spec §4.2).
#[derive(Debug, Clone)]
pub enum AuthStatus {
  Ok,
  SaslRequired { mechanisms: Vec<String> },
  SaslContinue { data: Vec<u8> },
  SaslFinal { data: Vec<u8> },
}

impl AuthStatus {
  pub fn decode(body: &mut bytes::Bytes) -> Result<Self> {
    match body.pop_u32()? {
      0x00 => Ok(AuthStatus::Ok),
      0x0A => {
        let mut mechanisms = Vec::new();
        let count = body.pop_u32()?;
        for _ in 0..count {
          mechanisms.push(body.pop_string()?);
        }
        Ok(AuthStatus::SaslRequired { mechanisms })
      }
      0x0B => Ok(AuthStatus::SaslContinue {
        data: body.pop_bytes()?.to_vec(),
      }),
      0x0C => Ok(AuthStatus::SaslFinal {
        data: body.pop_bytes()?.to_vec(),
      }),
      other => Err(ClientError::Protocol(format!("unknown authentication status {other}"))),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct ClientHandshake {
  pub major: u16,
  pub minor: u16,
  pub params: BTreeMap<String, String>,
}

impl ClientHandshake {
  pub fn new(user: &str, database: &str) -> Self {
    let mut params = BTreeMap::new();
    params.insert("user".to_string(), user.to_string());
    params.insert("database".to_string(), database.to_string());
    Self {
      major: PROTOCOL_MAJOR,
      minor: PROTOCOL_MINOR,
      params,
    }
  }

  pub fn encode(&self, w: &mut FrameWriter) {
    w.begin_message(tags::client::CLIENT_HANDSHAKE);
    w.put_u16(self.major);
    w.put_u16(self.minor);
    w.put_u16(self.params.len() as u16);
    for (k, v) in &self.params {
      w.put_string(k);
      w.put_string(v);
    }
    w.put_u16(0); // extensions: none
    w.end_message();
  }
}

#[derive(Debug, Clone)]
pub struct ServerHandshake {
  pub major: u16,
  pub minor: u16,
  pub extensions: Vec<String>,
}

impl ServerHandshake {
  pub fn decode(body: &mut bytes::Bytes) -> Result<Self> {
    let major = body.pop_u16()?;
    let minor = body.pop_u16()?;
    let count = body.pop_u16()?;
    let mut extensions = Vec::with_capacity(count as usize);
    for _ in 0..count {
      extensions.push(body.pop_string()?);
    }
    Ok(Self { major, minor, extensions })
  }

  pub fn is_compatible(&self) -> bool {
    self.major == PROTOCOL_MAJOR
  }
}

pub fn decode_error_response(body: &mut bytes::Bytes) -> Result<ServerErrorDetail> {
  let severity = body.pop_u8()?;
  let code = body.pop_u32()?;
  let message = body.pop_string()?;
  let attr_count = body.pop_u16()?;
  let mut attributes = BTreeMap::new();
  for _ in 0..attr_count {
    let key = body.pop_u16()?;
    let value = body.pop_string()?;
    attributes.insert(key, value);
  }
  Ok(ServerErrorDetail {
    severity,
    code,
    message,
    attributes,
  })
}

pub fn decode_parameter_status(body: &mut bytes::Bytes) -> Result<(String, Vec<u8>)> {
  let name = body.pop_string()?;
  let value = body.pop_bytes()?.to_vec();
  Ok((name, value))
}

pub fn decode_server_key_data(body: &mut bytes::Bytes) -> Result<[u8; 32]> {
  let mut key = [0u8; 32];
  body.copy_to_slice(&mut key);
  Ok(key)
}

use bytes::Buf;

pub fn decode_ready_for_command(body: &mut bytes::Bytes) -> Result<TransactionState> {
  let header_count = body.pop_u16()?;
  for _ in 0..header_count {
    let _code = body.pop_u16()?;
    let _value = body.pop_bytes()?;
  }
  TransactionState::from_wire(body.pop_u8()?)
}

/// Command status and data descriptor IDs returned by ParseComplete /
/// CommandDataDescription (spec §4.5 flow diagram).
#[derive(Debug, Clone)]
pub struct CommandDataDescription {
  pub capabilities: Capabilities,
  pub cardinality: Cardinality,
  pub in_id: Uuid,
  pub in_descriptor: bytes::Bytes,
  pub out_id: Uuid,
  pub out_descriptor: bytes::Bytes,
}

impl CommandDataDescription {
  pub fn decode(body: &mut bytes::Bytes) -> Result<Self> {
    let capabilities = Capabilities::from_bits_truncate(body.pop_u64()?);
    let cardinality = Cardinality::from_wire(body.pop_u8()?)?;
    let in_id = body.pop_uuid()?;
    let in_descriptor = body.pop_bytes()?;
    let out_id = body.pop_uuid()?;
    let out_descriptor = body.pop_bytes()?;
    Ok(Self {
      capabilities,
      cardinality,
      in_id,
      in_descriptor,
      out_id,
      out_descriptor,
    })
  }
}

#[derive(Debug, Clone)]
pub struct CommandComplete {
  pub capabilities: Capabilities,
  pub status: String,
}

impl CommandComplete {
  pub fn decode(body: &mut bytes::Bytes) -> Result<Self> {
    let capabilities = Capabilities::from_bits_truncate(body.pop_u64()?);
    let status = body.pop_string()?;
    Ok(Self { capabilities, status })
  }
}

/// `Data` message payload: `{count:u16 (always 1), data:length-prefixed}`.
pub fn decode_data(body: &mut bytes::Bytes) -> Result<bytes::Bytes> {
  let count = body.pop_u16()?;
  if count != 1 {
    return Err(ClientError::Protocol(format!("Data message element count must be 1, got {count}")));
  }
  body.pop_bytes()
}

pub fn encode_sync(w: &mut FrameWriter) {
  w.begin_message(tags::client::SYNC);
  w.end_message();
}

pub fn encode_flush(w: &mut FrameWriter) {
  w.begin_message(tags::client::FLUSH);
  w.end_message();
}

pub fn encode_terminate(w: &mut FrameWriter) {
  w.begin_message(tags::client::TERMINATE);
  w.end_message();
}

#[derive(Debug, Clone)]
pub struct ParseParams<'a> {
  pub capabilities: Capabilities,
  pub io_format: IoFormat,
  pub expected_cardinality: Cardinality,
  pub command: &'a str,
}

pub fn encode_parse(w: &mut FrameWriter, p: &ParseParams<'_>) {
  w.begin_message(tags::client::PARSE);
  w.put_u64(p.capabilities.bits());
  w.put_u16(0); // compilation flags: none defined at this protocol revision
  w.put_i64(0); // implicit limit: unbounded
  w.put_u8(p.io_format.to_wire());
  w.put_u8(match p.expected_cardinality {
    Cardinality::Many => tags::CARDINALITY_MANY,
    _ => tags::CARDINALITY_AT_MOST_ONE,
  });
  w.put_string(p.command);
  w.put_u16(0); // state type id count
  w.end_message();
}

pub fn encode_describe_statement(w: &mut FrameWriter) {
  w.begin_message(tags::client::DESCRIBE_STATEMENT);
  w.put_u8(0); // aspect: data description
  w.put_string(""); // unnamed statement
  w.end_message();
}

#[derive(Debug, Clone)]
pub struct ExecuteParams<'a> {
  pub capabilities: Capabilities,
  pub io_format: IoFormat,
  pub expected_cardinality: Cardinality,
  pub command: &'a str,
  pub in_id: Uuid,
  pub out_id: Uuid,
  pub arguments: &'a [u8],
}

fn encode_execute_body(w: &mut FrameWriter, tag: u8, p: &ExecuteParams<'_>) {
  w.begin_message(tag);
  w.put_u64(p.capabilities.bits());
  w.put_u16(0);
  w.put_i64(0);
  w.put_u8(p.io_format.to_wire());
  w.put_u8(match p.expected_cardinality {
    Cardinality::Many => tags::CARDINALITY_MANY,
    _ => tags::CARDINALITY_AT_MOST_ONE,
  });
  w.put_string(p.command);
  w.put_u16(0);
  w.put_uuid(&p.in_id);
  w.put_uuid(&p.out_id);
  w.put_bytes(p.arguments);
  w.end_message();
}

/// Encodes a plain `Execute`, used on cache miss (after Prepare+Describe)
/// and on the post-mismatch retry after an OptimisticExecute rejection.
pub fn encode_execute(w: &mut FrameWriter, p: &ExecuteParams<'_>) {
  encode_execute_body(w, tags::client::EXECUTE, p);
}

/// Encodes the single-round-trip `OptimisticExecute`, issued when the
/// query-keyed cache has codec IDs already. Same body shape as `Execute`
/// but its own tag, so a server response can't be misread as belonging
/// to the pessimistic path.
pub fn encode_optimistic_execute(w: &mut FrameWriter, p: &ExecuteParams<'_>) {
  encode_execute_body(w, tags::client::OPTIMISTIC_EXECUTE, p);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cardinality_round_trips_through_wire_byte() {
    for c in [Cardinality::NoResult, Cardinality::AtMostOne, Cardinality::One, Cardinality::Many] {
      assert_eq!(Cardinality::from_wire(c.to_wire()).unwrap(), c);
    }
  }

  #[test]
  fn client_handshake_encodes_user_and_database() {
    let hs = ClientHandshake::new("alice", "mydb");
    let mut w = FrameWriter::new();
    hs.encode(&mut w);
    let bytes = w.unwrap();
    assert_eq!(bytes[0], tags::client::CLIENT_HANDSHAKE);
  }

  #[test]
  fn decodes_ready_for_command_transaction_state() {
    let mut w = FrameWriter::new();
    w.put_u16(0);
    w.put_u8(b'I');
    let mut bytes = w.unwrap();
    assert_eq!(decode_ready_for_command(&mut bytes).unwrap(), TransactionState::Idle);
  }
}
