//! Granular query flow (spec §4.5): the pessimistic/optimistic state
//! machine, cache lookups, codec (re)building, and the one-shot
//! optimistic-mismatch retry. Decoupled from any particular socket type
//! via [`QueryTransport`] so it can be driven in tests against an
//! in-memory double.

use bytes::Bytes;

use crate::cache::SharedLruCache;
use crate::codec::registry::{CodecPair, CodecRegistry, OutputType};
use crate::error::ClientError;
use crate::protocol::frame::FrameWriter;
use crate::protocol::message::{self, Capabilities, Cardinality, CommandComplete, CommandDataDescription, ExecuteParams, IoFormat, ParseParams};
use crate::protocol::tags;
use crate::value::Value;

use super::key::{QueryKey, TypeIds};

type Result<T> = std::result::Result<T, ClientError>;

/// What the flow needs from a connection: send one framed message, and
/// receive the next one. The flow itself owns when to Sync / how many
/// round trips to make; the transport just moves bytes.
pub trait QueryTransport {
  fn send(&mut self, frame: Bytes) -> impl std::future::Future<Output = Result<()>> + Send;
  fn recv(&mut self) -> impl std::future::Future<Output = Result<(u8, Bytes)>> + Send;
}

pub struct QueryRequest<'a> {
  pub command: &'a str,
  pub io_format: IoFormat,
  pub expected_cardinality: Cardinality,
  pub arguments: Value,
  pub capabilities: Capabilities,
}

pub struct QueryOutcome {
  pub rows: Vec<Value>,
  pub capabilities: Capabilities,
  pub status: String,
}

/// Shared, per-connection-pool-wide caches the flow consults. Owned by
/// whatever assembles a [`crate::conn::Connection`] and handed to every
/// query on it (and on every other connection sharing the same schema).
pub struct QueryCaches {
  pub codecs: CodecRegistry,
  pub type_ids: SharedLruCache<QueryKey, TypeIds>,
  pub capabilities: SharedLruCache<QueryKey, Capabilities>,
}

impl QueryCaches {
  pub fn new() -> Self {
    Self {
      codecs: CodecRegistry::new(),
      type_ids: SharedLruCache::new(crate::cache::DEFAULT_TYPE_ID_CACHE_CAPACITY),
      capabilities: SharedLruCache::new(crate::cache::DEFAULT_TYPE_ID_CACHE_CAPACITY),
    }
  }
}

impl Default for QueryCaches {
  fn default() -> Self {
    Self::new()
  }
}

pub async fn execute<T: QueryTransport>(transport: &mut T, caches: &QueryCaches, req: QueryRequest<'_>) -> Result<QueryOutcome> {
  let out_type = match req.io_format {
    IoFormat::Json => OutputType::Json,
    _ => OutputType::Value,
  };
  let key = QueryKey::new(req.command, req.io_format, req.expected_cardinality);

  if let Some(type_ids) = caches.type_ids.get(&key) {
    if let Some(pair) = caches.codecs.codecs_from_cached_bytes(type_ids.in_id, type_ids.out_id, out_type)? {
      return optimistic_execute(transport, caches, &req, &key, out_type, type_ids, &pair).await;
    }
  }

  pessimistic_execute(transport, caches, &req, &key, out_type).await
}

/// Sends one OptimisticExecute+Sync for a cached type-ID pair. If the
/// server reports the IDs are stale, it answers with a fresh
/// `CommandDataDescription` instead of executing — in that case this
/// rebuilds codecs from the new descriptors and retries with a single
/// plain Execute+Sync (never a second Parse), so the whole call costs at
/// most two round trips.
async fn optimistic_execute<T: QueryTransport>(
  transport: &mut T,
  caches: &QueryCaches,
  req: &QueryRequest<'_>,
  key: &QueryKey,
  out_type: OutputType,
  type_ids: TypeIds,
  pair: &CodecPair,
) -> Result<QueryOutcome> {
  let arguments = crate::codec::encode(&pair.input, &req.arguments, "$args")?;
  let mut w = FrameWriter::new();
  message::encode_optimistic_execute(
    &mut w,
    &ExecuteParams {
      capabilities: req.capabilities,
      io_format: req.io_format,
      expected_cardinality: req.expected_cardinality,
      command: req.command,
      in_id: type_ids.in_id,
      out_id: type_ids.out_id,
      arguments: &arguments,
    },
  );
  message::encode_sync(&mut w);
  transport.send(w.unwrap()).await?;

  let (tag, mut body) = transport.recv().await?;
  if tag == tags::server::COMMAND_DATA_DESCRIPTION {
    let description = CommandDataDescription::decode(&mut body)?;
    caches.codecs.invalidate_codec_pair(type_ids.in_id, type_ids.out_id, out_type);
    let pair = caches.codecs.codecs_for(
      description.in_id,
      description.in_descriptor.clone(),
      description.out_id,
      description.out_descriptor.clone(),
      out_type,
    )?;
    caches.type_ids.insert(
      key.clone(),
      TypeIds {
        in_id: description.in_id,
        out_id: description.out_id,
        out_type,
      },
    );

    let arguments = crate::codec::encode(&pair.input, &req.arguments, "$args")?;
    let mut w = FrameWriter::new();
    message::encode_execute(
      &mut w,
      &ExecuteParams {
        capabilities: req.capabilities,
        io_format: req.io_format,
        expected_cardinality: req.expected_cardinality,
        command: req.command,
        in_id: description.in_id,
        out_id: description.out_id,
        arguments: &arguments,
      },
    );
    message::encode_sync(&mut w);
    transport.send(w.unwrap()).await?;

    let (tag, body) = transport.recv().await?;
    let outcome = collect_rows(transport, tag, body, &pair.output, req.expected_cardinality).await?;
    caches.capabilities.insert(key.clone(), outcome.capabilities);
    return Ok(outcome);
  }

  let outcome = collect_rows(transport, tag, body, &pair.output, req.expected_cardinality).await?;
  caches.capabilities.insert(key.clone(), outcome.capabilities);
  Ok(outcome)
}

async fn pessimistic_execute<T: QueryTransport>(
  transport: &mut T,
  caches: &QueryCaches,
  req: &QueryRequest<'_>,
  key: &QueryKey,
  out_type: OutputType,
) -> Result<QueryOutcome> {
  let mut w = FrameWriter::new();
  message::encode_parse(
    &mut w,
    &ParseParams {
      capabilities: req.capabilities,
      io_format: req.io_format,
      expected_cardinality: req.expected_cardinality,
      command: req.command,
    },
  );
  message::encode_sync(&mut w);
  transport.send(w.unwrap()).await?;

  let description = read_until(transport, tags::server::COMMAND_DATA_DESCRIPTION, |mut body| CommandDataDescription::decode(&mut body)).await?;

  let pair = caches.codecs.codecs_for(
    description.in_id,
    description.in_descriptor.clone(),
    description.out_id,
    description.out_descriptor.clone(),
    out_type,
  )?;

  caches.type_ids.insert(
    key.clone(),
    TypeIds {
      in_id: description.in_id,
      out_id: description.out_id,
      out_type,
    },
  );

  let arguments = crate::codec::encode(&pair.input, &req.arguments, "$args")?;
  let mut w = FrameWriter::new();
  message::encode_execute(
    &mut w,
    &ExecuteParams {
      capabilities: req.capabilities,
      io_format: req.io_format,
      expected_cardinality: req.expected_cardinality,
      command: req.command,
      in_id: description.in_id,
      out_id: description.out_id,
      arguments: &arguments,
    },
  );
  message::encode_sync(&mut w);
  transport.send(w.unwrap()).await?;

  let (tag, body) = transport.recv().await?;
  let outcome = collect_rows(transport, tag, body, &pair.output, req.expected_cardinality).await?;
  caches.capabilities.insert(key.clone(), outcome.capabilities);
  Ok(outcome)
}

/// Reads frames until one with tag `want` arrives, decoding it with
/// `decode`. Any server error in between is surfaced immediately.
async fn read_until<T: QueryTransport, F, R>(transport: &mut T, want: u8, decode: F) -> Result<R>
where
  F: Fn(Bytes) -> message::Result<R>,
{
  loop {
    let (tag, body) = transport.recv().await?;
    if tag == tags::server::ERROR_RESPONSE {
      let mut body = body;
      let detail = message::decode_error_response(&mut body)?;
      return Err(ClientError::Query(detail));
    }
    if tag == want {
      return decode(body);
    }
    // PARSE_COMPLETE / LOG_MESSAGE / PARAMETER_STATUS frames are expected
    // noise between Parse/Sync and the description we're waiting for.
  }
}

/// Consumes `Data*` frames followed by `CommandComplete` and
/// `ReadyForCommand`, decoding each row through `output`. Enforces the
/// cardinality contract before returning.
async fn collect_rows<T: QueryTransport>(
  transport: &mut T,
  mut tag: u8,
  mut body: Bytes,
  output: &crate::codec::CodecNode,
  expected: Cardinality,
) -> Result<QueryOutcome> {
  let mut rows = Vec::new();
  let mut capabilities = Capabilities::empty();
  let mut status = String::new();

  loop {
    match tag {
      t if t == tags::server::DATA => {
        let row_bytes = message::decode_data(&mut body)?;
        rows.push(crate::codec::decode(output, row_bytes)?);
      }
      t if t == tags::server::COMMAND_COMPLETE => {
        let complete = CommandComplete::decode(&mut body)?;
        capabilities = complete.capabilities;
        status = complete.status;
      }
      t if t == tags::server::READY_FOR_COMMAND => {
        message::decode_ready_for_command(&mut body)?;
        break;
      }
      t if t == tags::server::ERROR_RESPONSE => {
        let detail = message::decode_error_response(&mut body)?;
        drain_to_ready(transport, None).await?;
        return Err(ClientError::Query(detail));
      }
      _ => {}
    }
    let next = transport.recv().await?;
    tag = next.0;
    body = next.1;
  }

  enforce_cardinality(expected, &rows)?;
  Ok(QueryOutcome { rows, capabilities, status })
}

fn enforce_cardinality(expected: Cardinality, rows: &[Value]) -> Result<()> {
  match expected {
    Cardinality::One if rows.is_empty() => Err(ClientError::ZeroResults),
    Cardinality::AtMostOne if rows.len() > 1 => Err(ClientError::CardinalityMismatch(format!(
      "expected at most one row, got {}",
      rows.len()
    ))),
    Cardinality::One if rows.len() > 1 => Err(ClientError::CardinalityMismatch(format!(
      "expected exactly one row, got {}",
      rows.len()
    ))),
    _ => Ok(()),
  }
}

/// Drains remaining frames (possibly starting from an already-read one)
/// through `ReadyForCommand`, used when a flow abandons the rest of a
/// response (stale descriptor retry, mid-stream error).
async fn drain_to_ready<T: QueryTransport>(transport: &mut T, already_read: Option<(u8, &mut Bytes)>) -> Result<()> {
  if let Some((tag, body)) = already_read {
    if tag == tags::server::READY_FOR_COMMAND {
      message::decode_ready_for_command(body)?;
      return Ok(());
    }
  }
  loop {
    let (tag, mut body) = transport.recv().await?;
    if tag == tags::server::READY_FOR_COMMAND {
      message::decode_ready_for_command(&mut body)?;
      return Ok(());
    }
  }
}
