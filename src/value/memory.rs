//! `memory` scalar (spec §4.7): a byte count, wire-encoded as a plain
//! signed 64-bit integer.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemoryValue(pub i64);

impl MemoryValue {
  pub fn bytes(self) -> i64 {
    self.0
  }
}

impl std::fmt::Display for MemoryValue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    const UNITS: [(i64, &str); 5] = [(1 << 50, "PiB"), (1 << 40, "TiB"), (1 << 30, "GiB"), (1 << 20, "MiB"), (1 << 10, "KiB")];
    let n = self.0;
    for (scale, label) in UNITS {
      if n != 0 && n % scale == 0 {
        return write!(f, "{}{label}", n / scale);
      }
    }
    write!(f, "{n}B")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn formats_whole_multiples_with_a_unit_suffix() {
    assert_eq!(MemoryValue(1 << 20).to_string(), "1MiB");
    assert_eq!(MemoryValue(3).to_string(), "3B");
  }
}
