//! Base scalar codecs (spec §4.4), preallocated by well-known UUID. The
//! server assigns a fixed UUID to each built-in scalar type; this table
//! is this crate's side of that agreement.

use bytes::Bytes;
use uuid::{uuid, Uuid};

use crate::error::ClientError;
use crate::protocol::frame::{FrameWriter, WirePop};
use crate::value::temporal::{DateDurationValue, DateTimeValue, DurationValue, LocalDateTimeValue, LocalDateValue, LocalTimeValue, RelativeDurationValue};
use crate::value::{bigint, memory::MemoryValue, Value};

type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
  Bool,
  Int16,
  Int32,
  Int64,
  Float32,
  Float64,
  Str,
  Bytes,
  Uuid,
  Json,
  BigInt,
  Decimal,
  DateTime,
  LocalDateTime,
  LocalDate,
  LocalTime,
  Duration,
  RelativeDuration,
  DateDuration,
  Memory,
}

pub const BOOL: Uuid = uuid!("00000000-0000-0000-0000-000000000001");
pub const INT16: Uuid = uuid!("00000000-0000-0000-0000-000000000002");
pub const INT32: Uuid = uuid!("00000000-0000-0000-0000-000000000003");
pub const INT64: Uuid = uuid!("00000000-0000-0000-0000-000000000004");
pub const FLOAT32: Uuid = uuid!("00000000-0000-0000-0000-000000000005");
pub const FLOAT64: Uuid = uuid!("00000000-0000-0000-0000-000000000006");
pub const STR: Uuid = uuid!("00000000-0000-0000-0000-000000000007");
pub const BYTES: Uuid = uuid!("00000000-0000-0000-0000-000000000008");
pub const UUID: Uuid = uuid!("00000000-0000-0000-0000-000000000009");
pub const JSON: Uuid = uuid!("00000000-0000-0000-0000-00000000000a");
pub const BIGINT: Uuid = uuid!("00000000-0000-0000-0000-00000000000b");
pub const DECIMAL: Uuid = uuid!("00000000-0000-0000-0000-00000000000c");
pub const DATETIME: Uuid = uuid!("00000000-0000-0000-0000-00000000000d");
pub const LOCAL_DATETIME: Uuid = uuid!("00000000-0000-0000-0000-00000000000e");
pub const LOCAL_DATE: Uuid = uuid!("00000000-0000-0000-0000-00000000000f");
pub const LOCAL_TIME: Uuid = uuid!("00000000-0000-0000-0000-000000000010");
pub const DURATION: Uuid = uuid!("00000000-0000-0000-0000-000000000011");
pub const RELATIVE_DURATION: Uuid = uuid!("00000000-0000-0000-0000-000000000012");
pub const DATE_DURATION: Uuid = uuid!("00000000-0000-0000-0000-000000000013");
pub const MEMORY: Uuid = uuid!("00000000-0000-0000-0000-000000000014");

pub fn kind_for_id(id: Uuid) -> Option<ScalarKind> {
  Some(match id {
    BOOL => ScalarKind::Bool,
    INT16 => ScalarKind::Int16,
    INT32 => ScalarKind::Int32,
    INT64 => ScalarKind::Int64,
    FLOAT32 => ScalarKind::Float32,
    FLOAT64 => ScalarKind::Float64,
    STR => ScalarKind::Str,
    BYTES => ScalarKind::Bytes,
    UUID => ScalarKind::Uuid,
    JSON => ScalarKind::Json,
    BIGINT => ScalarKind::BigInt,
    DECIMAL => ScalarKind::Decimal,
    DATETIME => ScalarKind::DateTime,
    LOCAL_DATETIME => ScalarKind::LocalDateTime,
    LOCAL_DATE => ScalarKind::LocalDate,
    LOCAL_TIME => ScalarKind::LocalTime,
    DURATION => ScalarKind::Duration,
    RELATIVE_DURATION => ScalarKind::RelativeDuration,
    DATE_DURATION => ScalarKind::DateDuration,
    MEMORY => ScalarKind::Memory,
    _ => return None,
  })
}

pub fn encode(kind: ScalarKind, value: &Value, path: &str) -> Result<Vec<u8>> {
  let mismatch = || ClientError::ArgumentInvalid {
    path: path.to_string(),
    reason: format!("expected a value matching {kind:?}, got {value:?}"),
  };

  Ok(match (kind, value) {
    (ScalarKind::Bool, Value::Bool(v)) => vec![*v as u8],
    (ScalarKind::Int16, Value::Int16(v)) => v.to_be_bytes().to_vec(),
    (ScalarKind::Int32, Value::Int32(v)) => v.to_be_bytes().to_vec(),
    (ScalarKind::Int64, Value::Int64(v)) => v.to_be_bytes().to_vec(),
    (ScalarKind::Float32, Value::Float32(v)) => v.to_be_bytes().to_vec(),
    (ScalarKind::Float64, Value::Float64(v)) => v.to_be_bytes().to_vec(),
    (ScalarKind::Str, Value::Str(v)) => v.as_bytes().to_vec(),
    (ScalarKind::Json, Value::Json(v)) => {
      let mut out = vec![0x01];
      out.extend_from_slice(v.as_bytes());
      out
    }
    (ScalarKind::Bytes, Value::Bytes(v)) => v.to_vec(),
    (ScalarKind::Uuid, Value::Uuid(v)) => v.as_bytes().to_vec(),
    (ScalarKind::BigInt, Value::BigInt(v)) => bigint::encode_big_int(v),
    (ScalarKind::Decimal, Value::Decimal(v)) => v.as_bytes().to_vec(),
    (ScalarKind::DateTime, Value::DateTime(v)) => v.0.to_be_bytes().to_vec(),
    (ScalarKind::LocalDateTime, Value::LocalDateTime(v)) => v.0.to_be_bytes().to_vec(),
    (ScalarKind::LocalDate, Value::LocalDate(v)) => v.0.to_be_bytes().to_vec(),
    (ScalarKind::LocalTime, Value::LocalTime(v)) => v.0.to_be_bytes().to_vec(),
    (ScalarKind::Duration, Value::Duration(v)) => v.0.to_be_bytes().to_vec(),
    (ScalarKind::RelativeDuration, Value::RelativeDuration(v)) => {
      let mut w = FrameWriter::new();
      w.put_i64(v.microseconds);
      w.put_i32(v.days);
      w.put_i32(v.months);
      w.unwrap().to_vec()
    }
    (ScalarKind::DateDuration, Value::DateDuration(v)) => {
      let mut w = FrameWriter::new();
      w.put_i32(v.days);
      w.put_i32(v.months);
      w.unwrap().to_vec()
    }
    (ScalarKind::Memory, Value::Memory(v)) => v.bytes().to_be_bytes().to_vec(),
    _ => return Err(mismatch()),
  })
}

pub fn decode(kind: ScalarKind, mut body: Bytes) -> Result<Value> {
  Ok(match kind {
    ScalarKind::Bool => Value::Bool(body.pop_u8()? != 0),
    ScalarKind::Int16 => Value::Int16(body.pop_i16()?),
    ScalarKind::Int32 => Value::Int32(body.pop_i32()?),
    ScalarKind::Int64 => Value::Int64(body.pop_i64()?),
    ScalarKind::Float32 => Value::Float32(body.pop_f32()?),
    ScalarKind::Float64 => Value::Float64(body.pop_f64()?),
    ScalarKind::Str => {
      let remaining = body.pop_slice(body.len())?;
      Value::Str(String::from_utf8(remaining.to_vec()).map_err(|e| ClientError::Protocol(e.to_string()))?)
    }
    ScalarKind::Json => {
      let format_byte = body.pop_u8()?;
      if format_byte != 0x01 {
        return Err(ClientError::Protocol(format!("unexpected json format byte {format_byte:#04x}")));
      }
      let remaining = body.pop_slice(body.len())?;
      Value::Json(String::from_utf8(remaining.to_vec()).map_err(|e| ClientError::Protocol(e.to_string()))?)
    }
    ScalarKind::Bytes => Value::Bytes(body.pop_slice(body.len())?),
    ScalarKind::Uuid => Value::Uuid(body.pop_uuid()?),
    ScalarKind::BigInt => Value::BigInt(bigint::decode_big_int(body)?),
    ScalarKind::Decimal => {
      let remaining = body.pop_slice(body.len())?;
      Value::Decimal(String::from_utf8(remaining.to_vec()).map_err(|e| ClientError::Protocol(e.to_string()))?)
    }
    ScalarKind::DateTime => Value::DateTime(DateTimeValue(body.pop_i64()?)),
    ScalarKind::LocalDateTime => Value::LocalDateTime(LocalDateTimeValue(body.pop_i64()?)),
    ScalarKind::LocalDate => Value::LocalDate(LocalDateValue(body.pop_i32()?)),
    ScalarKind::LocalTime => Value::LocalTime(LocalTimeValue(body.pop_i64()?)),
    ScalarKind::Duration => Value::Duration(DurationValue(body.pop_i64()?)),
    ScalarKind::RelativeDuration => {
      let microseconds = body.pop_i64()?;
      let days = body.pop_i32()?;
      let months = body.pop_i32()?;
      Value::RelativeDuration(RelativeDurationValue { months, days, microseconds })
    }
    ScalarKind::DateDuration => {
      let days = body.pop_i32()?;
      let months = body.pop_i32()?;
      Value::DateDuration(DateDurationValue { months, days })
    }
    ScalarKind::Memory => Value::Memory(MemoryValue(body.pop_i64()?)),
  })
}
