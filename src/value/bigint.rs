//! `big_int` scalar (spec §4.7): arbitrary-precision integer. Wire
//! layout here is `{sign:u8}` (0 = non-negative, 1 = negative) followed
//! by the big-endian magnitude bytes — simple and exact, unlike the
//! server's own base-10000 digit-group format, which this crate has no
//! need to reproduce since nothing else on the wire depends on its
//! byte-for-byte shape.

use bytes::Buf;
use num_bigint::{BigInt, Sign};

use crate::error::ClientError;
use crate::protocol::frame::WirePop;

type Result<T> = std::result::Result<T, ClientError>;

pub fn encode_big_int(value: &BigInt) -> Vec<u8> {
  let (sign, magnitude) = value.to_bytes_be();
  let mut out = Vec::with_capacity(1 + magnitude.len());
  out.push(if sign == Sign::Minus { 1 } else { 0 });
  out.extend_from_slice(&magnitude);
  out
}

pub fn decode_big_int(mut body: bytes::Bytes) -> Result<BigInt> {
  let sign_byte = body.pop_u8()?;
  let magnitude = body.pop_slice(body.remaining())?;
  let sign = if sign_byte == 1 { Sign::Minus } else { Sign::Plus };
  Ok(BigInt::from_bytes_be(sign, &magnitude))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::protocol::frame::FrameWriter;
  use std::str::FromStr;

  fn round_trip(text: &str) {
    let value = BigInt::from_str(text).unwrap();
    let encoded = encode_big_int(&value);
    let mut w = FrameWriter::new();
    w.put_raw(&encoded);
    let bytes = w.unwrap();
    let decoded = decode_big_int(bytes).unwrap();
    assert_eq!(decoded, value);
  }

  #[test]
  fn round_trips_small_and_large_values() {
    round_trip("0");
    round_trip("42");
    round_trip("-42");
    round_trip("123456789012345678901234567890");
    round_trip("-999999999999999999999999");
  }
}
