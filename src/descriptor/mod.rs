//! Type descriptor parser (spec §4.3): deserializes the server's
//! type-descriptor byte stream into an in-memory forest. Descriptors
//! reference earlier descriptors by index into the same stream, so the
//! stream is just parsed into an arena (`Vec`) and references resolved as
//! `(arena, index)` — no heap allocation per back-reference, and no
//! possibility of a cycle (every index must be strictly less than the
//! position of the descriptor that holds it).

use bytes::Bytes;
use uuid::Uuid;

use crate::error::ClientError;
use crate::protocol::frame::WirePop;

type Result<T> = std::result::Result<T, ClientError>;

/// Descriptor tag bytes. The wire doesn't standardize these across every
/// server implementation; this crate's own encoder/decoder just need to
/// agree, which they do by sharing this table.
mod tag {
  pub const SET: u8 = 0x00;
  pub const OBJECT: u8 = 0x01;
  pub const BASE_SCALAR: u8 = 0x02;
  pub const SCALAR: u8 = 0x03;
  pub const TUPLE: u8 = 0x04;
  pub const NAMED_TUPLE: u8 = 0x05;
  pub const ARRAY: u8 = 0x06;
  pub const ENUM: u8 = 0x07;
  pub const INPUT_SHAPE: u8 = 0x08;
  pub const RANGE: u8 = 0x09;
  pub const MULTIRANGE: u8 = 0x0A;
  pub const SPARSE_OBJECT: u8 = 0x0B;
}

/// An index into the flat array of descriptors parsed from one stream.
/// Always strictly less than the position of the descriptor holding it —
/// enforced at parse time, never at use time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DescriptorIndex(pub u16);

#[derive(Debug, Clone)]
pub struct ObjectField {
  pub implicit: bool,
  pub link_property: bool,
  pub link: bool,
  pub name: String,
  pub type_index: DescriptorIndex,
}

#[derive(Debug, Clone)]
pub enum Descriptor {
  BaseScalar {
    id: Uuid,
  },
  Scalar {
    id: Uuid,
    subkind: u8,
    base_type: DescriptorIndex,
  },
  Set {
    id: Uuid,
    element: DescriptorIndex,
  },
  Object {
    id: Uuid,
    fields: Vec<ObjectField>,
  },
  InputShape {
    id: Uuid,
    fields: Vec<ObjectField>,
  },
  SparseObject {
    id: Uuid,
    fields: Vec<ObjectField>,
  },
  Tuple {
    id: Uuid,
    elements: Vec<DescriptorIndex>,
  },
  NamedTuple {
    id: Uuid,
    elements: Vec<(String, DescriptorIndex)>,
  },
  /// Only unbounded arrays are supported; `dimensions.len()` is the rank.
  Array {
    id: Uuid,
    element: DescriptorIndex,
    dimensions: u16,
  },
  Enum {
    id: Uuid,
    members: Vec<String>,
  },
  Range {
    id: Uuid,
    element: DescriptorIndex,
  },
  Multirange {
    id: Uuid,
    element: DescriptorIndex,
  },
}

impl Descriptor {
  pub fn id(&self) -> Uuid {
    match self {
      Descriptor::BaseScalar { id }
      | Descriptor::Scalar { id, .. }
      | Descriptor::Set { id, .. }
      | Descriptor::Object { id, .. }
      | Descriptor::InputShape { id, .. }
      | Descriptor::SparseObject { id, .. }
      | Descriptor::Tuple { id, .. }
      | Descriptor::NamedTuple { id, .. }
      | Descriptor::Array { id, .. }
      | Descriptor::Enum { id, .. }
      | Descriptor::Range { id, .. }
      | Descriptor::Multirange { id, .. } => *id,
    }
  }
}

/// The flat, topologically-sorted forest parsed from one descriptor
/// stream. The last entry is always the root.
#[derive(Debug, Clone)]
pub struct DescriptorSet {
  pub descriptors: Vec<Descriptor>,
}

impl DescriptorSet {
  pub fn get(&self, idx: DescriptorIndex) -> &Descriptor {
    &self.descriptors[idx.0 as usize]
  }

  pub fn root(&self) -> Option<&Descriptor> {
    self.descriptors.last()
  }

  pub fn root_index(&self) -> Option<DescriptorIndex> {
    if self.descriptors.is_empty() {
      None
    } else {
      Some(DescriptorIndex((self.descriptors.len() - 1) as u16))
    }
  }

  pub fn find_by_id(&self, id: Uuid) -> Option<DescriptorIndex> {
    self
      .descriptors
      .iter()
      .position(|d| d.id() == id)
      .map(|i| DescriptorIndex(i as u16))
  }
}

/// Parses every descriptor in `body` into a `DescriptorSet`. Bails with a
/// `Protocol` error the first time a descriptor references an index that
/// is not strictly less than its own position — the stream would
/// otherwise admit a forward reference or a cycle.
pub fn parse(mut body: Bytes) -> Result<DescriptorSet> {
  let mut descriptors = Vec::new();

  while !body.is_empty() {
    let position = descriptors.len() as u16;
    let tag = body.pop_u8()?;
    let id = body.pop_uuid()?;

    let check = |idx: DescriptorIndex| -> Result<DescriptorIndex> {
      if idx.0 >= position {
        Err(ClientError::Protocol(format!(
          "descriptor at position {position} references forward index {}",
          idx.0
        )))
      } else {
        Ok(idx)
      }
    };

    let descriptor = match tag {
      tag::BASE_SCALAR => Descriptor::BaseScalar { id },
      tag::SCALAR => {
        let subkind = body.pop_u8()?;
        let base_type = check(DescriptorIndex(body.pop_u16()?))?;
        Descriptor::Scalar { id, subkind, base_type }
      }
      tag::SET => {
        let element = check(DescriptorIndex(body.pop_u16()?))?;
        Descriptor::Set { id, element }
      }
      tag::OBJECT => Descriptor::Object {
        id,
        fields: parse_fields(&mut body, position, &check)?,
      },
      tag::INPUT_SHAPE => Descriptor::InputShape {
        id,
        fields: parse_fields(&mut body, position, &check)?,
      },
      tag::SPARSE_OBJECT => Descriptor::SparseObject {
        id,
        fields: parse_fields(&mut body, position, &check)?,
      },
      tag::TUPLE => {
        let count = body.pop_u16()?;
        let mut elements = Vec::with_capacity(count as usize);
        for _ in 0..count {
          elements.push(check(DescriptorIndex(body.pop_u16()?))?);
        }
        Descriptor::Tuple { id, elements }
      }
      tag::NAMED_TUPLE => {
        let count = body.pop_u16()?;
        let mut elements = Vec::with_capacity(count as usize);
        for _ in 0..count {
          let name = body.pop_string()?;
          let idx = check(DescriptorIndex(body.pop_u16()?))?;
          elements.push((name, idx));
        }
        Descriptor::NamedTuple { id, elements }
      }
      tag::ARRAY => {
        let element = check(DescriptorIndex(body.pop_u16()?))?;
        let dim_count = body.pop_u16()?;
        for _ in 0..dim_count {
          let bound = body.pop_i32()?;
          if bound != -1 {
            return Err(ClientError::Protocol(format!(
              "bounded arrays are not supported (bound={bound}); only unbounded arrays (bound=-1) are"
            )));
          }
        }
        Descriptor::Array {
          id,
          element,
          dimensions: dim_count,
        }
      }
      tag::ENUM => {
        let count = body.pop_u16()?;
        let mut members = Vec::with_capacity(count as usize);
        for _ in 0..count {
          members.push(body.pop_string()?);
        }
        Descriptor::Enum { id, members }
      }
      tag::RANGE => {
        let element = check(DescriptorIndex(body.pop_u16()?))?;
        Descriptor::Range { id, element }
      }
      tag::MULTIRANGE => {
        let element = check(DescriptorIndex(body.pop_u16()?))?;
        Descriptor::Multirange { id, element }
      }
      other => return Err(ClientError::Protocol(format!("unknown descriptor tag {other:#04x}"))),
    };

    descriptors.push(descriptor);
  }

  Ok(DescriptorSet { descriptors })
}

fn parse_fields(
  body: &mut Bytes,
  position: u16,
  check: &impl Fn(DescriptorIndex) -> Result<DescriptorIndex>,
) -> Result<Vec<ObjectField>> {
  let _ = position;
  let count = body.pop_u16()?;
  let mut fields = Vec::with_capacity(count as usize);
  for _ in 0..count {
    let flags = body.pop_u8()?;
    let name = body.pop_string()?;
    let type_index = check(DescriptorIndex(body.pop_u16()?))?;
    fields.push(ObjectField {
      implicit: flags & 0b001 != 0,
      link_property: flags & 0b010 != 0,
      link: flags & 0b100 != 0,
      name,
      type_index,
    });
  }
  Ok(fields)
}
