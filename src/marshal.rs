//! Value marshaling (spec §4.7, REDESIGN FLAGS): binds decoded
//! [`Value`] rows into caller-supplied receiver types.
//!
//! The original client reflects over receiver struct fields by a
//! per-field tag at runtime. That doesn't fit a statically-typed
//! language: instead, every decode bottoms out in the tagged [`Value`]
//! tree, and a receiver type opts in by implementing [`FromRow`], doing
//! its own (compile-time-checked) field lookups against that tree.

use crate::error::ClientError;
use crate::value::Value;

type Result<T> = std::result::Result<T, ClientError>;

/// Implemented by a caller's row type. `from_row` receives exactly one
/// decoded row — an `Object`/`NamedTuple`/`Tuple`/scalar `Value`,
/// depending on the query's output shape — and must either bind every
/// field it needs or fail with [`ClientError::ReceiverMismatch`].
pub trait FromRow: Sized {
  fn from_row(value: &Value) -> Result<Self>;
}

/// A required field lookup: fails with `ReceiverMismatch` (not fatal to
/// the connection) rather than panicking when a receiver asks for a
/// field the query's shape doesn't have.
pub fn required_field<'a>(value: &'a Value, path: &str, name: &str) -> Result<&'a Value> {
  value.field(name).ok_or_else(|| ClientError::ReceiverMismatch {
    path: path.to_string(),
    reason: format!("field {name:?} not present on this row"),
  })
}

/// Binds every row in `rows` through `T::from_row`. The output `Vec` is
/// sized to the row count up front — no reallocation as fields stream
/// in, since decoding is already eager.
pub fn marshal_rows<T: FromRow>(rows: Vec<Value>) -> Result<Vec<T>> {
  let mut out = Vec::with_capacity(rows.len());
  for row in &rows {
    out.push(T::from_row(row)?);
  }
  Ok(out)
}

/// Binds an `AtMostOne`/`One` query's result: `Ok(None)` for zero rows
/// (the caller already knows this isn't an error for `AtMostOne` — for
/// `One` the query flow itself raises `ZeroResults` before this runs).
pub fn marshal_one<T: FromRow>(rows: Vec<Value>) -> Result<Option<T>> {
  match rows.into_iter().next() {
    Some(row) => Ok(Some(T::from_row(&row)?)),
    None => Ok(None),
  }
}

impl FromRow for Value {
  fn from_row(value: &Value) -> Result<Self> {
    Ok(value.clone())
  }
}

impl FromRow for String {
  fn from_row(value: &Value) -> Result<Self> {
    value.as_str().map(str::to_owned).ok_or_else(|| ClientError::ReceiverMismatch {
      path: "$".to_string(),
      reason: format!("expected a string row, got {value:?}"),
    })
  }
}

impl FromRow for i64 {
  fn from_row(value: &Value) -> Result<Self> {
    value.as_i64().ok_or_else(|| ClientError::ReceiverMismatch {
      path: "$".to_string(),
      reason: format!("expected an integer row, got {value:?}"),
    })
  }
}

impl FromRow for uuid::Uuid {
  fn from_row(value: &Value) -> Result<Self> {
    value.as_uuid().ok_or_else(|| ClientError::ReceiverMismatch {
      path: "$".to_string(),
      reason: format!("expected a uuid row, got {value:?}"),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Person {
    name: String,
    id: uuid::Uuid,
  }

  impl FromRow for Person {
    fn from_row(value: &Value) -> Result<Self> {
      Ok(Self {
        name: String::from_row(required_field(value, "$", "name")?)?,
        id: uuid::Uuid::from_row(required_field(value, "$", "id")?)?,
      })
    }
  }

  #[test]
  fn binds_struct_fields_by_name() {
    let id = uuid::Uuid::from_u128(7);
    let row = Value::Object(vec![("name".to_string(), Value::Str("edgedb".to_string())), ("id".to_string(), Value::Uuid(id))]);

    let rows = marshal_rows::<Person>(vec![row]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "edgedb");
    assert_eq!(rows[0].id, id);
  }

  #[test]
  fn missing_required_field_is_a_receiver_mismatch() {
    let row = Value::Object(vec![("name".to_string(), Value::Str("edgedb".to_string()))]);
    let err = Person::from_row(&row).unwrap_err();
    assert!(matches!(err, ClientError::ReceiverMismatch { .. }));
  }

  #[test]
  fn marshal_one_returns_none_for_zero_rows() {
    let rows: Vec<Value> = Vec::new();
    let bound = marshal_one::<String>(rows).unwrap();
    assert!(bound.is_none());
  }
}
