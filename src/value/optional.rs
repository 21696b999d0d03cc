//! `Optional<T>` (spec §4.7): one generic wrapper standing in for the
//! whole family of nullable-scalar marshal targets. A receiver field
//! typed `Optional<T>` accepts a wire-missing value (length `-1`)
//! without the marshaler having to special-case every scalar type's own
//! "unset" representation; an input argument left `Optional::unset()`
//! encodes as the missing sentinel instead of its zero value.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Optional<T> {
  value: Option<T>,
}

impl<T> Optional<T> {
  pub fn set(value: T) -> Self {
    Self { value: Some(value) }
  }

  pub fn unset() -> Self {
    Self { value: None }
  }

  pub fn is_set(&self) -> bool {
    self.value.is_some()
  }

  pub fn get(&self) -> Option<&T> {
    self.value.as_ref()
  }

  pub fn into_inner(self) -> Option<T> {
    self.value
  }
}

impl<T> From<Option<T>> for Optional<T> {
  fn from(value: Option<T>) -> Self {
    Self { value }
  }
}

impl<T> From<Optional<T>> for Option<T> {
  fn from(value: Optional<T>) -> Self {
    value.value
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unset_round_trips_to_none() {
    let opt: Optional<i64> = Optional::unset();
    assert!(!opt.is_set());
    assert_eq!(opt.into_inner(), None);
  }

  #[test]
  fn set_round_trips_to_some() {
    let opt = Optional::set(7i64);
    assert!(opt.is_set());
    assert_eq!(opt.get(), Some(&7));
  }
}
