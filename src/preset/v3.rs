//! The V3 preset codec: a length-prefixed chunk-list layout that
//! carries a component-state blob and an optional controller-state blob,
//! addressed through a trailing chunk list rather than a fixed header.
//!
//! Bank-level V3 persistence (multiple module states in one file) is left
//! as [`CodecError::NotImplemented`]: there is no single standard layout
//! for it, and guessing one would be worse than refusing.

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::io::{Cursor, Read};

use crate::error::CodecError;

const MAGIC: [u8; 4] = *b"VST3";
const LIST_MAGIC: [u8; 4] = *b"List";
const CHUNK_ID_COMPONENT: [u8; 4] = *b"Comp";
const CHUNK_ID_CONTROLLER: [u8; 4] = *b"Cont";
const FORMAT_VERSION: i32 = 1;
const CLASS_ID_LEN: usize = 32;
const HEADER_LEN: usize = 4 + 4 + CLASS_ID_LEN + 8;
const LIST_OFFSET_FIELD_POS: usize = 4 + 4 + CLASS_ID_LEN;

#[derive(Debug, Clone, PartialEq)]
pub struct ModulePreset {
    pub class_id: [u8; CLASS_ID_LEN],
    pub component_state: Vec<u8>,
    pub controller_state: Option<Vec<u8>>,
}

struct ChunkListEntry {
    id: [u8; 4],
    offset: i64,
    size: i64,
}

/// Writing captures both stream states first, records their offsets,
/// then writes the trailing list and patches the list-offset.
pub fn encode(preset: &ModulePreset) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(&MAGIC);
    out.write_i32::<BE>(FORMAT_VERSION).unwrap();
    out.extend_from_slice(&preset.class_id);
    out.write_i64::<BE>(0).unwrap(); // patched below
    debug_assert_eq!(out.len(), HEADER_LEN);

    let mut entries = Vec::new();

    let comp_offset = out.len() as i64;
    out.extend_from_slice(&preset.component_state);
    entries.push(ChunkListEntry {
        id: CHUNK_ID_COMPONENT,
        offset: comp_offset,
        size: preset.component_state.len() as i64,
    });

    if let Some(controller_state) = &preset.controller_state {
        let cont_offset = out.len() as i64;
        out.extend_from_slice(controller_state);
        entries.push(ChunkListEntry {
            id: CHUNK_ID_CONTROLLER,
            offset: cont_offset,
            size: controller_state.len() as i64,
        });
    }

    let list_offset = out.len() as i64;
    out.extend_from_slice(&LIST_MAGIC);
    out.write_i32::<BE>(entries.len() as i32).unwrap();
    for entry in &entries {
        out.extend_from_slice(&entry.id);
        out.write_i64::<BE>(entry.offset).unwrap();
        out.write_i64::<BE>(entry.size).unwrap();
    }

    out[LIST_OFFSET_FIELD_POS..LIST_OFFSET_FIELD_POS + 8].copy_from_slice(&list_offset.to_be_bytes());

    out
}

/// Reading verifies the class id equals the plugin's unique id and
/// dispatches `'Comp'` chunks to the component, `'Cont'` chunks to the
/// controller.
pub fn decode(bytes: &[u8], expected_class_id: &[u8; CLASS_ID_LEN]) -> Result<ModulePreset, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::TooShort { expected_at_least: HEADER_LEN, got: bytes.len() });
    }

    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic).unwrap();
    if magic != MAGIC {
        return Err(CodecError::BadMagic { expected: MAGIC, got: magic });
    }

    let _version = cursor.read_i32::<BE>().unwrap();

    let mut class_id = [0u8; CLASS_ID_LEN];
    cursor.read_exact(&mut class_id).unwrap();
    if &class_id != expected_class_id {
        return Err(CodecError::ClassIdMismatch);
    }

    let list_offset = cursor.read_i64::<BE>().unwrap();
    if list_offset < 0 || list_offset as usize + 8 > bytes.len() {
        return Err(CodecError::ByteSizeExceedsInput { declared: list_offset.max(0) as usize, available: bytes.len() });
    }

    let mut list_cursor = Cursor::new(&bytes[list_offset as usize..]);
    let mut list_magic = [0u8; 4];
    list_cursor.read_exact(&mut list_magic).unwrap();
    if list_magic != LIST_MAGIC {
        return Err(CodecError::BadMagic { expected: LIST_MAGIC, got: list_magic });
    }
    let count = list_cursor.read_i32::<BE>().unwrap();

    let mut component_state = None;
    let mut controller_state = None;

    for _ in 0..count {
        let mut id = [0u8; 4];
        list_cursor.read_exact(&mut id).unwrap();
        let offset = list_cursor.read_i64::<BE>().unwrap();
        let size = list_cursor.read_i64::<BE>().unwrap();

        if offset < 0 || size < 0 || (offset as usize + size as usize) > bytes.len() {
            return Err(CodecError::ByteSizeExceedsInput {
                declared: offset.max(0) as usize + size.max(0) as usize,
                available: bytes.len(),
            });
        }
        let blob = bytes[offset as usize..offset as usize + size as usize].to_vec();

        match id {
            CHUNK_ID_COMPONENT => component_state = Some(blob),
            CHUNK_ID_CONTROLLER => controller_state = Some(blob),
            _ => {} // unrecognized chunk kinds are ignored, not rejected
        }
    }

    let component_state = component_state
        .ok_or(CodecError::TooShort { expected_at_least: HEADER_LEN, got: bytes.len() })?;

    Ok(ModulePreset { class_id, component_state, controller_state })
}

/// V3 bank persistence is not implemented; see the module doc comment.
pub fn encode_bank(_states: &[ModulePreset]) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::NotImplemented("V3 bank data write"))
}

pub fn decode_bank(_bytes: &[u8]) -> Result<Vec<ModulePreset>, CodecError> {
    Err(CodecError::NotImplemented("V3 bank data read"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_id(tag: u8) -> [u8; CLASS_ID_LEN] {
        let mut id = [0u8; CLASS_ID_LEN];
        id[0] = tag;
        id
    }

    #[test]
    fn round_trips_component_and_controller_state() {
        let preset = ModulePreset {
            class_id: class_id(7),
            component_state: vec![1, 2, 3, 4],
            controller_state: Some(vec![9, 8, 7]),
        };
        let bytes = encode(&preset);
        let decoded = decode(&bytes, &class_id(7)).unwrap();
        assert_eq!(decoded, preset);
    }

    #[test]
    fn round_trips_component_only() {
        let preset = ModulePreset { class_id: class_id(1), component_state: vec![5, 5, 5], controller_state: None };
        let bytes = encode(&preset);
        let decoded = decode(&bytes, &class_id(1)).unwrap();
        assert_eq!(decoded, preset);
    }

    #[test]
    fn rejects_class_id_mismatch() {
        let preset = ModulePreset { class_id: class_id(1), component_state: vec![1], controller_state: None };
        let bytes = encode(&preset);
        assert!(matches!(decode(&bytes, &class_id(2)), Err(CodecError::ClassIdMismatch)));
    }

    #[test]
    fn bank_write_is_not_implemented() {
        assert!(matches!(encode_bank(&[]), Err(CodecError::NotImplemented(_))));
    }
}
