//! Query keys and the granular query flow (spec §3, §4.5).

pub mod flow;
pub mod key;

pub use crate::protocol::message::{Cardinality, IoFormat};
pub use flow::{QueryCaches, QueryOutcome, QueryRequest, QueryTransport};
pub use key::{QueryKey, TypeIds};

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::registry::OutputType;
  use crate::protocol::frame::FrameWriter;
  use crate::protocol::message::Capabilities;
  use crate::protocol::tags;
  use crate::value::Value;
  use uuid::Uuid;

  /// An in-memory transport driven by a fixed script of frame bodies, so
  /// the flow can be exercised without a live server. `responses` holds
  /// `(tag, body)` pairs exactly as `QueryTransport::recv` would deliver
  /// them — no outer message framing.
  struct ScriptedTransport {
    responses: std::collections::VecDeque<(u8, bytes::Bytes)>,
  }

  impl QueryTransport for ScriptedTransport {
    async fn send(&mut self, _frame: bytes::Bytes) -> crate::error::Result<()> {
      Ok(())
    }

    async fn recv(&mut self) -> crate::error::Result<(u8, bytes::Bytes)> {
      self
        .responses
        .pop_front()
        .ok_or_else(|| crate::error::ClientError::Protocol("scripted transport exhausted".into()))
    }
  }

  fn int64_base_scalar_bytes() -> bytes::Bytes {
    let mut w = FrameWriter::new();
    w.put_u8(0x02); // BASE_SCALAR, see descriptor::mod's tag table
    w.put_uuid(&crate::codec::scalar::INT64);
    w.unwrap()
  }

  /// A zero-field `NamedTuple` descriptor — what a parameterless query's
  /// input descriptor looks like on the wire.
  fn empty_named_tuple_descriptor_bytes() -> bytes::Bytes {
    let mut w = FrameWriter::new();
    w.put_u8(0x05); // NAMED_TUPLE, see descriptor::mod's tag table
    w.put_uuid(&Uuid::from_u128(999));
    w.put_u16(0);
    w.unwrap()
  }

  #[tokio::test]
  async fn pessimistic_path_caches_type_ids_after_describe() {
    let in_id = Uuid::from_u128(1);
    let out_id = Uuid::from_u128(2);

    let mut description = FrameWriter::new();
    description.put_u64(Capabilities::empty().bits());
    description.put_u8(tags::CARDINALITY_ONE);
    description.put_uuid(&in_id);
    description.put_bytes(&empty_named_tuple_descriptor_bytes());
    description.put_uuid(&out_id);
    description.put_bytes(&int64_base_scalar_bytes());
    let description_body = description.unwrap();

    let mut data = FrameWriter::new();
    data.put_u16(1);
    data.put_bytes(&42i64.to_be_bytes());
    let data_body = data.unwrap();

    let mut complete = FrameWriter::new();
    complete.put_u64(Capabilities::empty().bits());
    complete.put_string("SELECT");
    let complete_body = complete.unwrap();

    let mut ready = FrameWriter::new();
    ready.put_u16(0);
    ready.put_u8(b'I');
    let ready_body = ready.unwrap();

    let mut transport = ScriptedTransport {
      responses: [
        (tags::server::COMMAND_DATA_DESCRIPTION, description_body),
        (tags::server::DATA, data_body),
        (tags::server::COMMAND_COMPLETE, complete_body),
        (tags::server::READY_FOR_COMMAND, ready_body),
      ]
      .into(),
    };

    let caches = QueryCaches::new();
    let req = QueryRequest {
      command: "SELECT 42",
      io_format: IoFormat::Binary,
      expected_cardinality: Cardinality::One,
      arguments: Value::NamedTuple(vec![]),
      capabilities: Capabilities::empty(),
    };

    let outcome = flow::execute(&mut transport, &caches, req).await.unwrap();
    assert_eq!(outcome.rows, vec![Value::Int64(42)]);

    let key = QueryKey::new("SELECT 42", IoFormat::Binary, Cardinality::One);
    let cached = caches.type_ids.get(&key).unwrap();
    assert_eq!(cached.in_id, in_id);
    assert_eq!(cached.out_id, out_id);
    assert_eq!(cached.out_type, OutputType::Value);
  }

  #[tokio::test]
  async fn zero_rows_for_exactly_one_cardinality_is_zero_results() {
    let in_id = Uuid::from_u128(3);
    let out_id = Uuid::from_u128(4);

    let mut description = FrameWriter::new();
    description.put_u64(Capabilities::empty().bits());
    description.put_u8(tags::CARDINALITY_ONE);
    description.put_uuid(&in_id);
    description.put_bytes(&empty_named_tuple_descriptor_bytes());
    description.put_uuid(&out_id);
    description.put_bytes(&int64_base_scalar_bytes());
    let description_body = description.unwrap();

    let mut complete = FrameWriter::new();
    complete.put_u64(Capabilities::empty().bits());
    complete.put_string("SELECT");
    let complete_body = complete.unwrap();

    let mut ready = FrameWriter::new();
    ready.put_u16(0);
    ready.put_u8(b'I');
    let ready_body = ready.unwrap();

    let mut transport = ScriptedTransport {
      responses: [
        (tags::server::COMMAND_DATA_DESCRIPTION, description_body),
        (tags::server::COMMAND_COMPLETE, complete_body),
        (tags::server::READY_FOR_COMMAND, ready_body),
      ]
      .into(),
    };

    let caches = QueryCaches::new();
    let req = QueryRequest {
      command: "SELECT <int64>{}",
      io_format: IoFormat::Binary,
      expected_cardinality: Cardinality::One,
      arguments: Value::NamedTuple(vec![]),
      capabilities: Capabilities::empty(),
    };

    let err = flow::execute(&mut transport, &caches, req).await.unwrap_err();
    assert!(matches!(err, crate::error::ClientError::ZeroResults));
  }

  #[tokio::test]
  async fn optimistic_mismatch_retries_with_a_plain_execute_not_a_second_parse() {
    let stale_in_id = Uuid::from_u128(10);
    let stale_out_id = Uuid::from_u128(11);
    let fresh_in_id = Uuid::from_u128(12);
    let fresh_out_id = Uuid::from_u128(13);

    let caches = QueryCaches::new();
    let key = QueryKey::new("SELECT 42", IoFormat::Binary, Cardinality::One);

    // Seed the caches as if a prior call had already Prepared this query,
    // so the next call takes the optimistic path.
    caches
      .codecs
      .codecs_for(
        stale_in_id,
        empty_named_tuple_descriptor_bytes(),
        stale_out_id,
        int64_base_scalar_bytes(),
        OutputType::Value,
      )
      .unwrap();
    caches.type_ids.insert(
      key.clone(),
      TypeIds {
        in_id: stale_in_id,
        out_id: stale_out_id,
        out_type: OutputType::Value,
      },
    );

    // The server reports the cached IDs are stale and sends a fresh
    // descriptor instead of executing. Only one more round trip (a plain
    // Execute, no new Parse) should follow.
    let mut description = FrameWriter::new();
    description.put_u64(Capabilities::empty().bits());
    description.put_u8(tags::CARDINALITY_ONE);
    description.put_uuid(&fresh_in_id);
    description.put_bytes(&empty_named_tuple_descriptor_bytes());
    description.put_uuid(&fresh_out_id);
    description.put_bytes(&int64_base_scalar_bytes());
    let description_body = description.unwrap();

    let mut data = FrameWriter::new();
    data.put_u16(1);
    data.put_bytes(&42i64.to_be_bytes());
    let data_body = data.unwrap();

    let mut complete = FrameWriter::new();
    complete.put_u64(Capabilities::empty().bits());
    complete.put_string("SELECT");
    let complete_body = complete.unwrap();

    let mut ready = FrameWriter::new();
    ready.put_u16(0);
    ready.put_u8(b'I');
    let ready_body = ready.unwrap();

    let mut transport = ScriptedTransport {
      responses: [
        (tags::server::COMMAND_DATA_DESCRIPTION, description_body),
        (tags::server::DATA, data_body),
        (tags::server::COMMAND_COMPLETE, complete_body),
        (tags::server::READY_FOR_COMMAND, ready_body),
      ]
      .into(),
    };

    let req = QueryRequest {
      command: "SELECT 42",
      io_format: IoFormat::Binary,
      expected_cardinality: Cardinality::One,
      arguments: Value::NamedTuple(vec![]),
      capabilities: Capabilities::empty(),
    };

    // Exactly four scripted responses are queued (one describe, one data
    // round trip); if the retry issued a second Parse it would run out of
    // responses and fail with "scripted transport exhausted" instead.
    let outcome = flow::execute(&mut transport, &caches, req).await.unwrap();
    assert_eq!(outcome.rows, vec![Value::Int64(42)]);
    assert!(transport.responses.is_empty());

    let cached = caches.type_ids.get(&key).unwrap();
    assert_eq!(cached.in_id, fresh_in_id);
    assert_eq!(cached.out_id, fresh_out_id);
  }

  #[tokio::test]
  async fn command_complete_capabilities_are_cached_per_query_key() {
    let in_id = Uuid::from_u128(20);
    let out_id = Uuid::from_u128(21);

    let mut description = FrameWriter::new();
    description.put_u64(Capabilities::empty().bits());
    description.put_u8(tags::CARDINALITY_ONE);
    description.put_uuid(&in_id);
    description.put_bytes(&empty_named_tuple_descriptor_bytes());
    description.put_uuid(&out_id);
    description.put_bytes(&int64_base_scalar_bytes());
    let description_body = description.unwrap();

    let mut data = FrameWriter::new();
    data.put_u16(1);
    data.put_bytes(&7i64.to_be_bytes());
    let data_body = data.unwrap();

    let reported_capabilities = Capabilities::from_bits_truncate(1);
    let mut complete = FrameWriter::new();
    complete.put_u64(reported_capabilities.bits());
    complete.put_string("SELECT");
    let complete_body = complete.unwrap();

    let mut ready = FrameWriter::new();
    ready.put_u16(0);
    ready.put_u8(b'I');
    let ready_body = ready.unwrap();

    let mut transport = ScriptedTransport {
      responses: [
        (tags::server::COMMAND_DATA_DESCRIPTION, description_body),
        (tags::server::DATA, data_body),
        (tags::server::COMMAND_COMPLETE, complete_body),
        (tags::server::READY_FOR_COMMAND, ready_body),
      ]
      .into(),
    };

    let caches = QueryCaches::new();
    let req = QueryRequest {
      command: "SELECT 7",
      io_format: IoFormat::Binary,
      expected_cardinality: Cardinality::One,
      arguments: Value::NamedTuple(vec![]),
      capabilities: Capabilities::empty(),
    };

    flow::execute(&mut transport, &caches, req).await.unwrap();

    let key = QueryKey::new("SELECT 7", IoFormat::Binary, Cardinality::One);
    assert_eq!(caches.capabilities.get(&key), Some(reported_capabilities));
  }
}
