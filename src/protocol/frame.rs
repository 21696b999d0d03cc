//! Framed byte buffer (spec §4.1): a zero-copy producer/consumer for the
//! server's length-prefixed binary protocol, decoupled from any particular
//! socket so it can be exercised with plain byte slices in tests.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::ClientError;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Helpers for popping wire primitives off anything that implements `Buf`.
/// `FrameReader::body` and the `Bytes` slices returned by `pop_slice` both
/// get this for free, which is what gives nested framing (tuples inside
/// tuples, arrays of arrays) a uniform reader interface.
pub trait WirePop: Buf {
  fn pop_u8(&mut self) -> Result<u8> {
    self.ensure(1)?;
    Ok(Buf::get_u8(self))
  }

  fn pop_i8(&mut self) -> Result<i8> {
    self.ensure(1)?;
    Ok(Buf::get_i8(self))
  }

  fn pop_u16(&mut self) -> Result<u16> {
    self.ensure(2)?;
    Ok(Buf::get_u16(self))
  }

  fn pop_i16(&mut self) -> Result<i16> {
    self.ensure(2)?;
    Ok(Buf::get_i16(self))
  }

  fn pop_u32(&mut self) -> Result<u32> {
    self.ensure(4)?;
    Ok(Buf::get_u32(self))
  }

  fn pop_i32(&mut self) -> Result<i32> {
    self.ensure(4)?;
    Ok(Buf::get_i32(self))
  }

  fn pop_u64(&mut self) -> Result<u64> {
    self.ensure(8)?;
    Ok(Buf::get_u64(self))
  }

  fn pop_i64(&mut self) -> Result<i64> {
    self.ensure(8)?;
    Ok(Buf::get_i64(self))
  }

  fn pop_f32(&mut self) -> Result<f32> {
    self.ensure(4)?;
    Ok(Buf::get_f32(self))
  }

  fn pop_f64(&mut self) -> Result<f64> {
    self.ensure(8)?;
    Ok(Buf::get_f64(self))
  }

  fn pop_uuid(&mut self) -> Result<Uuid> {
    self.ensure(16)?;
    let mut bytes = [0u8; 16];
    self.copy_to_slice(&mut bytes);
    Ok(Uuid::from_bytes(bytes))
  }

  /// A four-byte length prefix followed by that many raw bytes.
  fn pop_bytes(&mut self) -> Result<Bytes> {
    let len = self.pop_u32()? as usize;
    self.pop_slice(len)
  }

  /// A four-byte length-prefixed utf8 string.
  fn pop_string(&mut self) -> Result<String> {
    let bytes = self.pop_bytes()?;
    String::from_utf8(bytes.to_vec()).map_err(|err| ClientError::Protocol(format!("invalid utf8 in string: {err}")))
  }

  /// Returns a sub-reader over exactly `n` bytes, for nested framing
  /// (array elements, tuple fields, etc). The returned `Bytes` implements
  /// `WirePop` itself.
  fn pop_slice(&mut self, n: usize) -> Result<Bytes> {
    self.ensure(n)?;
    Ok(self.copy_to_bytes(n))
  }

  fn ensure(&self, n: usize) -> Result<()> {
    if self.remaining() < n {
      return Err(ClientError::Protocol(format!(
        "unexpected end of message: need {n} bytes, have {}",
        self.remaining()
      )));
    }
    Ok(())
  }
}

impl<T: Buf> WirePop for T {}

/// Consumes frames supplied by a socket-reader that pushes raw byte chunks
/// onto an internal queue. `feed` is the push side; `next` advances to the
/// next complete frame.
#[derive(Debug, Default)]
pub struct FrameReader {
  inbound: BytesMut,
  /// Tag of the message currently exposed through `body`/`msg_type`.
  pub msg_type: u8,
  /// Byte slice spanning exactly the current message's body. Poppers
  /// advance it; `next` refuses to move on while it still has bytes left.
  pub body: Bytes,
  sticky: bool,
}

impl FrameReader {
  pub fn new() -> Self {
    Self::default()
  }

  /// Push a raw chunk read off the socket onto the internal queue.
  pub fn feed(&mut self, chunk: &[u8]) {
    self.inbound.extend_from_slice(chunk);
  }

  /// Advance to the next message. `Ok(true)` means `msg_type`/`body` now
  /// refer to a fresh message; `Ok(false)` means the header+body for the
  /// next message isn't fully buffered yet — feed more and retry. Once an
  /// error is returned it is sticky: every subsequent call returns the
  /// same error without touching the buffer.
  pub fn next(&mut self) -> Result<bool> {
    if self.sticky {
      return Err(ClientError::Protocol("frame reader is poisoned by a prior error".into()));
    }

    if !self.body.is_empty() {
      self.sticky = true;
      return Err(ClientError::Protocol(format!(
        "{} unread bytes remaining in message {:#04x}",
        self.body.len(),
        self.msg_type
      )));
    }

    if self.inbound.len() < 5 {
      return Ok(false);
    }

    let len = u32::from_be_bytes([self.inbound[1], self.inbound[2], self.inbound[3], self.inbound[4]]) as usize;
    let total = 1 + len;
    if self.inbound.len() < total {
      return Ok(false);
    }

    let mut frame = self.inbound.split_to(total).freeze();
    self.msg_type = frame.pop_u8()?;
    frame.advance(4); // length field, already consumed to compute `total`
    self.body = frame;
    Ok(true)
  }

  /// Sets the sticky-error flag directly: used when the underlying socket
  /// read itself failed, so subsequent `next` calls keep refusing rather
  /// than silently reporting "need more data" forever.
  pub fn poison(&mut self) {
    self.sticky = true;
  }
}

/// Accumulates bytes into a message with deferred length back-patching.
pub struct FrameWriter {
  buf: BytesMut,
  open_messages: Vec<(usize, usize)>, // (length-field offset, open_bytes count at entry)
  open_bytes: Vec<usize>,             // length-field offsets for BeginBytes/EndBytes
}

impl FrameWriter {
  pub fn new() -> Self {
    Self {
      buf: BytesMut::new(),
      open_messages: Vec::new(),
      open_bytes: Vec::new(),
    }
  }

  /// Reserves the tag byte and a four-byte length slot. The length, once
  /// patched by `end_message`, counts itself but not the tag.
  pub fn begin_message(&mut self, tag: u8) {
    self.buf.put_u8(tag);
    let offset = self.buf.len();
    self.buf.put_u32(0);
    self.open_messages.push((offset, self.open_bytes.len()));
  }

  pub fn end_message(&mut self) {
    let (offset, open_bytes_at_entry) = self.open_messages.pop().expect("end_message without begin_message");
    assert_eq!(
      self.open_bytes.len(),
      open_bytes_at_entry,
      "begin_bytes not balanced by end_bytes before end_message"
    );
    let len = (self.buf.len() - offset) as u32;
    self.buf[offset..offset + 4].copy_from_slice(&len.to_be_bytes());
  }

  /// Reserves a four-byte length slot for an embedded byte blob (argument
  /// values inside Execute payloads). Unlike a message length, this one
  /// counts only the blob's own bytes, not itself.
  pub fn begin_bytes(&mut self) {
    let offset = self.buf.len();
    self.buf.put_u32(0);
    self.open_bytes.push(offset);
  }

  pub fn end_bytes(&mut self) {
    let offset = self.open_bytes.pop().expect("end_bytes without begin_bytes");
    let len = (self.buf.len() - offset - 4) as u32;
    self.buf[offset..offset + 4].copy_from_slice(&len.to_be_bytes());
  }

  /// Writes a sentinel-length missing value (`0xFFFFFFFF`), used for
  /// unset optional scalars.
  pub fn put_missing(&mut self) {
    self.buf.put_u32(0xFFFF_FFFF);
  }

  pub fn put_u8(&mut self, v: u8) {
    self.buf.put_u8(v);
  }
  pub fn put_i8(&mut self, v: i8) {
    self.buf.put_i8(v);
  }
  pub fn put_u16(&mut self, v: u16) {
    self.buf.put_u16(v);
  }
  pub fn put_i16(&mut self, v: i16) {
    self.buf.put_i16(v);
  }
  pub fn put_u32(&mut self, v: u32) {
    self.buf.put_u32(v);
  }
  pub fn put_i32(&mut self, v: i32) {
    self.buf.put_i32(v);
  }
  pub fn put_u64(&mut self, v: u64) {
    self.buf.put_u64(v);
  }
  pub fn put_i64(&mut self, v: i64) {
    self.buf.put_i64(v);
  }
  pub fn put_f32(&mut self, v: f32) {
    self.buf.put_f32(v);
  }
  pub fn put_f64(&mut self, v: f64) {
    self.buf.put_f64(v);
  }
  pub fn put_uuid(&mut self, v: &Uuid) {
    self.buf.put_slice(v.as_bytes());
  }
  pub fn put_bytes(&mut self, v: &[u8]) {
    self.buf.put_u32(v.len() as u32);
    self.buf.put_slice(v);
  }
  pub fn put_string(&mut self, v: &str) {
    self.put_bytes(v.as_bytes());
  }
  pub fn put_raw(&mut self, v: &[u8]) {
    self.buf.put_slice(v);
  }

  /// Returns the accumulated buffer and invalidates the writer.
  pub fn unwrap(self) -> Bytes {
    assert!(self.open_messages.is_empty(), "unwrap called with an open message");
    assert!(self.open_bytes.is_empty(), "unwrap called with open bytes");
    self.buf.freeze()
  }
}

impl Default for FrameWriter {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reads_back_a_written_message() {
    let mut w = FrameWriter::new();
    w.begin_message(b'X');
    w.put_i32(42);
    w.put_string("hello");
    w.end_message();
    let bytes = w.unwrap();

    let mut r = FrameReader::new();
    r.feed(&bytes);
    assert!(r.next().unwrap());
    assert_eq!(r.msg_type, b'X');
    assert_eq!(r.body.pop_i32().unwrap(), 42);
    assert_eq!(r.body.pop_string().unwrap(), "hello");
    assert!(r.body.is_empty());
  }

  #[test]
  fn feeds_incrementally() {
    let mut w = FrameWriter::new();
    w.begin_message(b'Y');
    w.put_i32(7);
    w.end_message();
    let bytes = w.unwrap();

    let mut r = FrameReader::new();
    r.feed(&bytes[..3]);
    assert!(!r.next().unwrap());
    r.feed(&bytes[3..]);
    assert!(r.next().unwrap());
    assert_eq!(r.body.pop_i32().unwrap(), 7);
  }

  #[test]
  fn unread_bytes_at_next_is_an_error() {
    let mut w = FrameWriter::new();
    w.begin_message(b'Z');
    w.put_i32(1);
    w.put_i32(2);
    w.end_message();
    w.begin_message(b'Z');
    w.put_i32(3);
    w.end_message();
    let bytes = w.unwrap();

    let mut r = FrameReader::new();
    r.feed(&bytes);
    assert!(r.next().unwrap());
    r.body.pop_i32().unwrap(); // leave one i32 unread
    assert!(r.next().is_err());
    assert!(r.next().is_err(), "error must be sticky");
  }

  #[test]
  fn nested_bytes_blob_round_trips() {
    let mut w = FrameWriter::new();
    w.begin_message(b'T');
    w.put_u32(1); // count
    w.begin_bytes();
    w.put_i64(9999);
    w.end_bytes();
    w.end_message();
    let bytes = w.unwrap();

    let mut r = FrameReader::new();
    r.feed(&bytes);
    assert!(r.next().unwrap());
    assert_eq!(r.body.pop_u32().unwrap(), 1);
    let mut elem = r.body.pop_bytes().unwrap();
    assert_eq!(elem.pop_i64().unwrap(), 9999);
  }

  #[test]
  #[should_panic(expected = "unwrap called with an open message")]
  fn unwrap_panics_on_open_message() {
    let mut w = FrameWriter::new();
    w.begin_message(b'X');
    let _ = w.unwrap();
  }
}
