//! State descriptor codec (spec §9 Open Question): per-connection session
//! configuration ("shape only" per the spec's instruction), reusing the
//! same descriptor-driven codec builder as query I/O rather than hand-rolling
//! a second encoder. Unknown keys are rejected instead of guessed at.
//!
//! The object wire shape (spec §4.4) is decode-only elsewhere in this crate
//! — queries never send an `Object` as an argument — but session state is
//! the one place the client originates one, so this module writes the same
//! `{count}{reserved,length-prefixed value}*` layout by hand, field by
//! field, rather than widening `codec::encode`'s contract for every caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::codec::{self, CodecNode};
use crate::descriptor::DescriptorSet;
use crate::error::ClientError;
use crate::protocol::frame::{FrameWriter, WirePop};
use crate::value::Value;

type Result<T> = std::result::Result<T, ClientError>;

pub struct StateCodec {
  fields: Vec<(String, Arc<CodecNode>)>,
}

impl StateCodec {
  /// Builds from the server's state-descriptor stream. The root must
  /// describe an object shape — a session-config bag is fields by name,
  /// never a scalar or collection.
  pub fn build(set: &DescriptorSet) -> Result<Self> {
    let root = set
      .root_index()
      .ok_or_else(|| ClientError::Protocol("state descriptor stream is empty".into()))?;
    let node = codec::build(set, root)?;
    let fields = match node.as_ref() {
      CodecNode::Object { fields, .. } => fields.clone(),
      other => {
        return Err(ClientError::Protocol(format!(
          "state descriptor root must be an object shape, got {other:?}"
        )))
      }
    };
    Ok(Self { fields })
  }

  fn known(&self, key: &str) -> bool {
    self.fields.iter().any(|(name, _)| name == key)
  }

  /// Encodes the subset of session state the caller has set; fields it
  /// left out are written as missing (`0xFFFFFFFF` length), matching the
  /// null-as-unset convention the rest of the wire uses for optionals.
  pub fn encode(&self, state: &BTreeMap<String, Value>) -> Result<Vec<u8>> {
    for key in state.keys() {
      if !self.known(key) {
        return Err(ClientError::ArgumentInvalid {
          path: format!("state.{key}"),
          reason: "unknown session state key".to_string(),
        });
      }
    }

    let mut w = FrameWriter::new();
    w.put_u32(self.fields.len() as u32);
    for (name, field_codec) in &self.fields {
      w.put_u32(0); // reserved
      match state.get(name) {
        Some(value) => {
          let bytes = codec::encode(field_codec, value, &format!("state.{name}"))?;
          w.begin_bytes();
          w.put_raw(&bytes);
          w.end_bytes();
        }
        None => w.put_missing(),
      }
    }
    Ok(w.unwrap().to_vec())
  }

  pub fn decode(&self, mut body: Bytes) -> Result<BTreeMap<String, Value>> {
    let count = body.pop_u32()?;
    if count as usize != self.fields.len() {
      return Err(ClientError::Protocol(format!(
        "state field count mismatch: wire={count} descriptor={}",
        self.fields.len()
      )));
    }
    let mut out = BTreeMap::new();
    for (name, field_codec) in &self.fields {
      body.pop_u32()?; // reserved
      let len = body.pop_i32()?;
      if len == -1 {
        continue;
      }
      let elem_bytes = body.pop_slice(len as usize)?;
      out.insert(name.clone(), codec::decode(field_codec, elem_bytes)?);
    }
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::scalar::ScalarKind;

  fn module_state_codec() -> StateCodec {
    StateCodec {
      fields: vec![(
        "module".to_string(),
        Arc::new(CodecNode::Scalar {
          id: crate::codec::scalar::STR,
          kind: ScalarKind::Str,
        }),
      )],
    }
  }

  #[test]
  fn rejects_an_unknown_session_state_key() {
    let codec = module_state_codec();
    let mut state = BTreeMap::new();
    state.insert("not_a_real_key".to_string(), Value::Str("x".to_string()));
    let err = codec.encode(&state).unwrap_err();
    assert!(matches!(err, ClientError::ArgumentInvalid { .. }));
  }

  #[test]
  fn round_trips_a_known_key() {
    let codec = module_state_codec();
    let mut state = BTreeMap::new();
    state.insert("module".to_string(), Value::Str("default".to_string()));
    let bytes = codec.encode(&state).unwrap();
    let decoded = codec.decode(Bytes::from(bytes)).unwrap();
    assert_eq!(decoded.get("module"), Some(&Value::Str("default".to_string())));
  }

  #[test]
  fn omitted_fields_round_trip_as_absent_rather_than_present() {
    let codec = module_state_codec();
    let state = BTreeMap::new();
    let bytes = codec.encode(&state).unwrap();
    let decoded = codec.decode(Bytes::from(bytes)).unwrap();
    assert!(decoded.get("module").is_none());
  }

  #[test]
  fn build_rejects_a_non_object_root() {
    let mut w = FrameWriter::new();
    w.put_u8(0x02); // BASE_SCALAR
    w.put_uuid(&crate::codec::scalar::STR);
    let set = crate::descriptor::parse(w.unwrap()).unwrap();

    let err = StateCodec::build(&set).unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
  }
}
