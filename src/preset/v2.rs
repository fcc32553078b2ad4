//! The V2 FXP/FXB preset codec. Pure, stateless (de)serialization of
//! the program and bank containers to/from the big-endian byte stream
//! compatible with the classic FXP/FXB layout. Never touches a backend
//! directly — [`crate::host_instance`] applies the decoded payload.

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::io::{Cursor, Read, Write};

use crate::error::CodecError;

const MAGIC: [u8; 4] = *b"CcnK";
const SUB_MAGIC_PARAMS: [u8; 4] = *b"FxCk";
const SUB_MAGIC_CHUNK: [u8; 4] = *b"FPCh";
const SUB_MAGIC_BANK_PARAMS: [u8; 4] = *b"FxBk";
const SUB_MAGIC_BANK_CHUNK: [u8; 4] = *b"FBCh";
const FORMAT_VERSION: i32 = 1;
const PROGRAM_NAME_LEN: usize = 28;
const PROGRAM_HEADER_LEN: usize = 56;
const BANK_HEADER_LEN: usize = 156;
const BANK_RESERVED_LEN: usize = 124;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgramPayload {
    /// `numParameters` float32 values in plugin-declared order.
    Params(Vec<f32>),
    /// An opaque backend-defined blob, round-tripped verbatim.
    Chunk(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramPreset {
    pub plugin_id: u32,
    pub plugin_version: i32,
    pub name: String,
    pub payload: ProgramPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BankPayload {
    /// One [`ProgramPreset`] per program, in program order.
    Programs(Vec<ProgramPreset>),
    /// A single opaque bank-wide blob, round-tripped verbatim.
    Chunk(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BankPreset {
    pub plugin_id: u32,
    pub plugin_version: i32,
    pub current_program: i32,
    pub payload: BankPayload,
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    let mut bytes = name.as_bytes().to_vec();
    bytes.truncate(PROGRAM_NAME_LEN - 1);
    bytes.resize(PROGRAM_NAME_LEN, 0);
    out.extend_from_slice(&bytes);
}

fn read_name(bytes: &[u8]) -> String {
    let nul = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..nul]).into_owned()
}

/// Encode a single program to its FXP byte layout.
pub fn encode_program(preset: &ProgramPreset) -> Vec<u8> {
    let mut body = Vec::new();

    let sub_magic = match &preset.payload {
        ProgramPayload::Params(_) => SUB_MAGIC_PARAMS,
        ProgramPayload::Chunk(_) => SUB_MAGIC_CHUNK,
    };

    let num_params = match &preset.payload {
        ProgramPayload::Params(values) => values.len() as i32,
        ProgramPayload::Chunk(_) => 0,
    };

    // Header fields after the byte-size field (which excludes the first 8
    // bytes: magic + byte-size itself).
    let mut after_size = Vec::new();
    after_size.extend_from_slice(&sub_magic);
    after_size.write_i32::<BE>(FORMAT_VERSION).unwrap();
    after_size.write_u32::<BE>(preset.plugin_id).unwrap();
    after_size.write_i32::<BE>(preset.plugin_version).unwrap();
    after_size.write_i32::<BE>(num_params).unwrap();
    write_name(&mut after_size, &preset.name);

    match &preset.payload {
        ProgramPayload::Params(values) => {
            for v in values {
                after_size.write_f32::<BE>(*v).unwrap();
            }
        }
        ProgramPayload::Chunk(bytes) => {
            after_size.write_i32::<BE>(bytes.len() as i32).unwrap();
            after_size.extend_from_slice(bytes);
        }
    }

    body.extend_from_slice(&MAGIC);
    body.write_i32::<BE>(after_size.len() as i32).unwrap();
    body.extend_from_slice(&after_size);
    body
}

/// Decode a single program from its FXP byte layout.
///
/// `expects_chunk` is the plugin's `HasChunkData` flag; the payload form
/// found in `bytes` must agree with it.
pub fn decode_program(bytes: &[u8], expects_chunk: bool) -> Result<ProgramPreset, CodecError> {
    if bytes.len() < PROGRAM_HEADER_LEN {
        return Err(CodecError::TooShort { expected_at_least: PROGRAM_HEADER_LEN, got: bytes.len() });
    }

    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic).unwrap();
    if magic != MAGIC {
        return Err(CodecError::BadMagic { expected: MAGIC, got: magic });
    }

    let byte_size = cursor.read_i32::<BE>().unwrap() as usize;
    if byte_size > bytes.len() - 8 {
        return Err(CodecError::ByteSizeExceedsInput { declared: byte_size, available: bytes.len() - 8 });
    }

    let mut sub_magic = [0u8; 4];
    cursor.read_exact(&mut sub_magic).unwrap();
    let is_chunk = match sub_magic {
        SUB_MAGIC_PARAMS => false,
        SUB_MAGIC_CHUNK => true,
        other => return Err(CodecError::BadMagic { expected: SUB_MAGIC_PARAMS, got: other }),
    };
    if is_chunk != expects_chunk {
        return Err(CodecError::ChunkFormMismatch { input_is_chunk: is_chunk, plugin_expects_chunk: expects_chunk });
    }

    let _format_version = cursor.read_i32::<BE>().unwrap();
    let plugin_id = cursor.read_u32::<BE>().unwrap();
    let plugin_version = cursor.read_i32::<BE>().unwrap();
    let num_params = cursor.read_i32::<BE>().unwrap();

    let mut name_bytes = [0u8; PROGRAM_NAME_LEN];
    cursor.read_exact(&mut name_bytes).unwrap();
    let name = read_name(&name_bytes);

    let remaining = &bytes[cursor.position() as usize..];

    let payload = if is_chunk {
        let mut rest = Cursor::new(remaining);
        let chunk_size = rest.read_i32::<BE>().unwrap() as usize;
        let start = rest.position() as usize;
        if start + chunk_size > remaining.len() {
            return Err(CodecError::ByteSizeExceedsInput { declared: chunk_size, available: remaining.len() - start });
        }
        ProgramPayload::Chunk(remaining[start..start + chunk_size].to_vec())
    } else {
        if remaining.len() != num_params as usize * 4 {
            return Err(CodecError::ParamCountMismatch {
                declared_params: num_params as usize,
                remaining_bytes: remaining.len(),
            });
        }
        let mut values = Vec::with_capacity(num_params as usize);
        let mut rest = Cursor::new(remaining);
        for _ in 0..num_params {
            values.push(rest.read_f32::<BE>().unwrap());
        }
        ProgramPayload::Params(values)
    };

    Ok(ProgramPreset { plugin_id, plugin_version, name, payload })
}

/// Encode a bank to its FXB byte layout.
pub fn encode_bank(bank: &BankPreset) -> Vec<u8> {
    let mut body = Vec::new();

    let (sub_magic, num_programs) = match &bank.payload {
        BankPayload::Programs(programs) => (SUB_MAGIC_BANK_PARAMS, programs.len() as i32),
        BankPayload::Chunk(_) => (SUB_MAGIC_BANK_CHUNK, 0),
    };

    let mut after_size = Vec::new();
    after_size.extend_from_slice(&sub_magic);
    after_size.write_i32::<BE>(FORMAT_VERSION).unwrap();
    after_size.write_u32::<BE>(bank.plugin_id).unwrap();
    after_size.write_i32::<BE>(bank.plugin_version).unwrap();
    after_size.write_i32::<BE>(num_programs).unwrap();
    after_size.write_i32::<BE>(bank.current_program).unwrap();
    after_size.extend_from_slice(&[0u8; BANK_RESERVED_LEN]);

    match &bank.payload {
        BankPayload::Programs(programs) => {
            for program in programs {
                after_size.extend_from_slice(&encode_program(program));
            }
        }
        BankPayload::Chunk(bytes) => {
            after_size.write_i32::<BE>(bytes.len() as i32).unwrap();
            after_size.extend_from_slice(bytes);
        }
    }

    body.extend_from_slice(&MAGIC);
    body.write_i32::<BE>(after_size.len() as i32).unwrap();
    body.extend_from_slice(&after_size);
    body
}

/// Decode a bank from its FXB byte layout.
pub fn decode_bank(bytes: &[u8], expects_chunk: bool) -> Result<BankPreset, CodecError> {
    if bytes.len() < BANK_HEADER_LEN {
        return Err(CodecError::TooShort { expected_at_least: BANK_HEADER_LEN, got: bytes.len() });
    }

    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic).unwrap();
    if magic != MAGIC {
        return Err(CodecError::BadMagic { expected: MAGIC, got: magic });
    }

    let byte_size = cursor.read_i32::<BE>().unwrap() as usize;
    if byte_size > bytes.len() - 8 {
        return Err(CodecError::ByteSizeExceedsInput { declared: byte_size, available: bytes.len() - 8 });
    }

    let mut sub_magic = [0u8; 4];
    cursor.read_exact(&mut sub_magic).unwrap();
    let is_chunk = match sub_magic {
        SUB_MAGIC_BANK_PARAMS => false,
        SUB_MAGIC_BANK_CHUNK => true,
        other => return Err(CodecError::BadMagic { expected: SUB_MAGIC_BANK_PARAMS, got: other }),
    };
    if is_chunk != expects_chunk {
        return Err(CodecError::ChunkFormMismatch { input_is_chunk: is_chunk, plugin_expects_chunk: expects_chunk });
    }

    let _format_version = cursor.read_i32::<BE>().unwrap();
    let plugin_id = cursor.read_u32::<BE>().unwrap();
    let plugin_version = cursor.read_i32::<BE>().unwrap();
    let num_programs = cursor.read_i32::<BE>().unwrap();
    let current_program = cursor.read_i32::<BE>().unwrap();

    let mut reserved = [0u8; BANK_RESERVED_LEN];
    cursor.read_exact(&mut reserved).unwrap();

    let remaining = &bytes[cursor.position() as usize..];

    let payload = if is_chunk {
        let mut rest = Cursor::new(remaining);
        let chunk_size = rest.read_i32::<BE>().unwrap() as usize;
        let start = rest.position() as usize;
        if start + chunk_size > remaining.len() {
            return Err(CodecError::ByteSizeExceedsInput { declared: chunk_size, available: remaining.len() - start });
        }
        BankPayload::Chunk(remaining[start..start + chunk_size].to_vec())
    } else {
        let mut programs = Vec::with_capacity(num_programs as usize);
        let mut offset = 0usize;
        for _ in 0..num_programs {
            if offset + 8 > remaining.len() {
                return Err(CodecError::TooShort { expected_at_least: offset + PROGRAM_HEADER_LEN, got: remaining.len() });
            }
            let declared = i32::from_be_bytes(remaining[offset + 4..offset + 8].try_into().unwrap()) as usize;
            let program_len = 8 + declared;
            if offset + program_len > remaining.len() {
                return Err(CodecError::TooShort { expected_at_least: offset + program_len, got: remaining.len() });
            }
            programs.push(decode_program(&remaining[offset..offset + program_len], expects_chunk)?);
            offset += program_len;
        }
        BankPayload::Programs(programs)
    };

    Ok(BankPreset { plugin_id, plugin_version, current_program, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_program() -> ProgramPreset {
        ProgramPreset {
            plugin_id: 0x4142_4344,
            plugin_version: 100,
            name: "Init ".to_string(),
            payload: ProgramPayload::Params(vec![0.1, 0.2, 0.3, 0.4]),
        }
    }

    #[test]
    fn program_round_trips() {
        let preset = sample_program();
        let bytes = encode_program(&preset);
        let decoded = decode_program(&bytes, false).unwrap();
        assert_eq!(decoded, preset);
    }

    #[test]
    fn program_header_is_56_bytes_before_payload() {
        let preset = ProgramPreset {
            plugin_id: 1,
            plugin_version: 1,
            name: String::new(),
            payload: ProgramPayload::Params(vec![]),
        };
        let bytes = encode_program(&preset);
        assert_eq!(bytes.len(), 56);
    }

    #[test]
    fn chunk_program_round_trips() {
        let preset = ProgramPreset {
            plugin_id: 7,
            plugin_version: 2,
            name: "Chunky".to_string(),
            payload: ProgramPayload::Chunk(vec![1, 2, 3, 4, 5]),
        };
        let bytes = encode_program(&preset);
        let decoded = decode_program(&bytes, true).unwrap();
        assert_eq!(decoded, preset);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = encode_program(&sample_program());
        bytes[0] = b'X';
        assert!(matches!(decode_program(&bytes, false), Err(CodecError::BadMagic { .. })));
    }

    #[test]
    fn rejects_chunk_form_mismatch() {
        let bytes = encode_program(&sample_program());
        assert!(matches!(decode_program(&bytes, true), Err(CodecError::ChunkFormMismatch { .. })));
    }

    #[test]
    fn rejects_too_short_input() {
        assert!(matches!(decode_program(&[0u8; 10], false), Err(CodecError::TooShort { .. })));
    }

    #[test]
    fn rejects_param_count_mismatch() {
        let mut bytes = encode_program(&sample_program());
        bytes.push(0); // one stray byte makes the body not a multiple of 4 params
        assert!(matches!(decode_program(&bytes, false), Err(CodecError::ParamCountMismatch { .. })));
    }

    #[test]
    fn bank_of_param_programs_round_trips() {
        let bank = BankPreset {
            plugin_id: 42,
            plugin_version: 3,
            current_program: 2,
            payload: BankPayload::Programs(vec![sample_program(), sample_program(), sample_program()]),
        };
        let bytes = encode_bank(&bank);
        let decoded = decode_bank(&bytes, false).unwrap();
        assert_eq!(decoded, bank);
    }

    #[test]
    fn bank_header_is_156_bytes_before_payload() {
        let bank = BankPreset {
            plugin_id: 1,
            plugin_version: 1,
            current_program: 0,
            payload: BankPayload::Chunk(vec![]),
        };
        let bytes = encode_bank(&bank);
        assert_eq!(bytes.len(), 156 + 4); // + the chunk-size i32 (0-length chunk)
    }

    #[test]
    fn bank_chunk_round_trips() {
        let bank = BankPreset {
            plugin_id: 1,
            plugin_version: 1,
            current_program: 0,
            payload: BankPayload::Chunk(vec![9, 9, 9]),
        };
        let bytes = encode_bank(&bank);
        let decoded = decode_bank(&bytes, true).unwrap();
        assert_eq!(decoded, bank);
    }
}
