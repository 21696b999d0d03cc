//! Codec-ID registry (spec §4.4): caches built codec pairs keyed by
//! `(in_id, out_id, out_type)`, and raw descriptor bytes keyed by UUID so
//! a query whose type IDs are already known can rebuild codecs without a
//! Describe round trip.

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::cache::{SharedLruCache, DEFAULT_CODEC_CACHE_CAPACITY, DEFAULT_DESCRIPTOR_CACHE_CAPACITY};
use crate::descriptor;
use crate::error::ClientError;

use super::CodecNode;

type Result<T> = std::result::Result<T, ClientError>;

/// Identifies the runtime type a decoder is bound to. The core only ever
/// needs two: the generic [`crate::value::Value`] tree, or the JSON
/// passthrough codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputType {
  Value,
  Json,
}

#[derive(Clone)]
pub struct CodecPair {
  pub input: Arc<CodecNode>,
  pub output: Arc<CodecNode>,
}

pub struct CodecRegistry {
  descriptor_bytes: SharedLruCache<Uuid, Bytes>,
  codec_pairs: SharedLruCache<(Uuid, Uuid, OutputType), CodecPair>,
}

impl CodecRegistry {
  pub fn new() -> Self {
    Self {
      descriptor_bytes: SharedLruCache::new(DEFAULT_DESCRIPTOR_CACHE_CAPACITY),
      codec_pairs: SharedLruCache::new(DEFAULT_CODEC_CACHE_CAPACITY),
    }
  }

  pub fn cache_descriptor_bytes(&self, id: Uuid, bytes: Bytes) {
    self.descriptor_bytes.insert(id, bytes);
  }

  pub fn descriptor_bytes(&self, id: Uuid) -> Option<Bytes> {
    self.descriptor_bytes.get(&id)
  }

  pub fn lookup_codec_pair(&self, in_id: Uuid, out_id: Uuid, out_type: OutputType) -> Option<CodecPair> {
    self.codec_pairs.get(&(in_id, out_id, out_type))
  }

  pub fn cache_codec_pair(&self, in_id: Uuid, out_id: Uuid, out_type: OutputType, pair: CodecPair) {
    self.codec_pairs.insert((in_id, out_id, out_type), pair);
  }

  /// Drops a stale entry; called on an optimistic-mismatch retry (spec
  /// §4.5) once the server signals the cached IDs no longer apply.
  pub fn invalidate_codec_pair(&self, in_id: Uuid, out_id: Uuid, out_type: OutputType) {
    self.codec_pairs.remove(&(in_id, out_id, out_type));
  }

  /// Builds (or serves from cache) the codec pair for one query's
  /// input/output descriptor bytes.
  pub fn codecs_for(&self, in_id: Uuid, in_bytes: Bytes, out_id: Uuid, out_bytes: Bytes, out_type: OutputType) -> Result<CodecPair> {
    if let Some(cached) = self.lookup_codec_pair(in_id, out_id, out_type) {
      return Ok(cached);
    }

    self.cache_descriptor_bytes(in_id, in_bytes.clone());
    self.cache_descriptor_bytes(out_id, out_bytes.clone());

    let in_set = descriptor::parse(in_bytes)?;
    let out_set = descriptor::parse(out_bytes)?;

    let in_root = in_set.root_index().ok_or_else(|| ClientError::Protocol("empty input descriptor stream".into()))?;
    let out_root = out_set.root_index().ok_or_else(|| ClientError::Protocol("empty output descriptor stream".into()))?;

    let input = super::build(&in_set, in_root)?;
    let output = match out_type {
      OutputType::Value => super::build(&out_set, out_root)?,
      OutputType::Json => Arc::new(CodecNode::Json),
    };

    let pair = CodecPair { input, output };
    self.cache_codec_pair(in_id, out_id, out_type, pair.clone());
    Ok(pair)
  }

  /// Rebuilds a codec pair purely from already-cached descriptor bytes
  /// (no fresh Describe), used when the type-ID cache hit but the codec
  /// cache was cold.
  pub fn codecs_from_cached_bytes(&self, in_id: Uuid, out_id: Uuid, out_type: OutputType) -> Result<Option<CodecPair>> {
    let (Some(in_bytes), Some(out_bytes)) = (self.descriptor_bytes(in_id), self.descriptor_bytes(out_id)) else {
      return Ok(None);
    };
    self.codecs_for(in_id, in_bytes, out_id, out_bytes, out_type).map(Some)
  }
}

impl Default for CodecRegistry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::protocol::frame::FrameWriter;

  fn base_scalar_bytes(id: Uuid, type_id: Uuid) -> Bytes {
    let mut w = FrameWriter::new();
    w.put_u8(0x02);
    w.put_uuid(&type_id);
    let _ = id;
    w.unwrap()
  }

  #[test]
  fn codec_pair_is_served_from_cache_on_second_call() {
    let registry = CodecRegistry::new();
    let in_id = Uuid::from_u128(100);
    let out_id = Uuid::from_u128(101);
    let in_bytes = base_scalar_bytes(in_id, super::super::scalar::INT64);
    let out_bytes = base_scalar_bytes(out_id, super::super::scalar::STR);

    let first = registry.codecs_for(in_id, in_bytes.clone(), out_id, out_bytes.clone(), OutputType::Value).unwrap();
    assert!(registry.lookup_codec_pair(in_id, out_id, OutputType::Value).is_some());

    let second = registry.codecs_for(in_id, in_bytes, out_id, out_bytes, OutputType::Value).unwrap();
    assert!(Arc::ptr_eq(&first.input, &second.input));
  }

  #[test]
  fn rebuilds_from_cached_descriptor_bytes_without_fresh_bytes() {
    let registry = CodecRegistry::new();
    let in_id = Uuid::from_u128(200);
    let out_id = Uuid::from_u128(201);
    let in_bytes = base_scalar_bytes(in_id, super::super::scalar::BOOL);
    let out_bytes = base_scalar_bytes(out_id, super::super::scalar::BOOL);

    registry.codecs_for(in_id, in_bytes, out_id, out_bytes, OutputType::Value).unwrap();
    registry.invalidate_codec_pair(in_id, out_id, OutputType::Value);

    let rebuilt = registry.codecs_from_cached_bytes(in_id, out_id, OutputType::Value).unwrap();
    assert!(rebuilt.is_some());
  }
}
