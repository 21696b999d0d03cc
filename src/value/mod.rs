//! Value types (spec §4.7). The reflective "bind to caller struct by
//! field-name tag" approach the original server client uses doesn't fit
//! a statically-typed language (see the REDESIGN FLAGS note on runtime
//! reflection); instead every decoder ultimately bottoms out in this one
//! tagged-variant [`Value`] tree, and [`crate::marshal`] handles the
//! step from there into caller-supplied types.

pub mod bigint;
pub mod duration_text;
pub mod memory;
pub mod optional;
pub mod temporal;

use std::collections::BTreeMap;

use bytes::Bytes;
use num_bigint::BigInt;
use uuid::Uuid;

pub use optional::Optional;
use temporal::{DateDurationValue, DateTimeValue, DurationValue, LocalDateTimeValue, LocalDateValue, LocalTimeValue, RelativeDurationValue};

/// One endpoint of a [`Value::Range`], or `None` for an unbounded side.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeValue {
  pub lower: Option<Box<Value>>,
  pub upper: Option<Box<Value>>,
  pub inc_lower: bool,
  pub inc_upper: bool,
  pub empty: bool,
}

/// The dynamically-typed result of decoding any descriptor. Composite
/// variants hold child `Value`s rather than raw bytes — decoding is
/// eager, not lazy, matching how the codec tree is walked once per row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Bool(bool),
  Int16(i16),
  Int32(i32),
  Int64(i64),
  Float32(f32),
  Float64(f64),
  Str(String),
  Bytes(Bytes),
  Uuid(Uuid),
  Json(String),
  BigInt(BigInt),
  Decimal(String),
  DateTime(DateTimeValue),
  LocalDateTime(LocalDateTimeValue),
  LocalDate(LocalDateValue),
  LocalTime(LocalTimeValue),
  Duration(DurationValue),
  RelativeDuration(RelativeDurationValue),
  DateDuration(DateDurationValue),
  Memory(memory::MemoryValue),
  Enum(String),
  Array(Vec<Value>),
  Set(Vec<Value>),
  Tuple(Vec<Value>),
  NamedTuple(Vec<(String, Value)>),
  Object(Vec<(String, Value)>),
  SparseObject(BTreeMap<String, Value>),
  Range(RangeValue),
  Multirange(Vec<RangeValue>),
}

impl Value {
  /// Looks up a field by name on an `Object`/`NamedTuple`/`SparseObject`
  /// value. Returns `None` for scalar/collection variants and for
  /// missing fields alike — callers distinguish "wrong shape" from
  /// "field absent" themselves if they need to.
  pub fn field(&self, name: &str) -> Option<&Value> {
    match self {
      Value::Object(fields) | Value::NamedTuple(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
      Value::SparseObject(fields) => fields.get(name),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Str(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Value::Int16(v) => Some(*v as i64),
      Value::Int32(v) => Some(*v as i64),
      Value::Int64(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_uuid(&self) -> Option<Uuid> {
    match self {
      Value::Uuid(v) => Some(*v),
      _ => None,
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }
}
