//! Input/output/patch-constant signature chunks.
//!
//! Three entry layouts exist in the wild:
//! - `ISGN`/`OSGN`/`PCSG`: 24-byte entries, no stream or precision fields;
//! - `OSG5`: 28-byte entries with a leading stream dword;
//! - `ISG1`/`OSG1`/`PSG1`: 32-byte entries with a leading stream dword and a
//!   trailing min-precision dword.

use crate::{DxbcError, FourCC};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParameter {
    pub semantic_name: String,
    pub semantic_index: u32,
    /// `D3D_NAME_*` system value id; 0 for plain user semantics.
    pub system_value_type: u32,
    /// `D3D_REGISTER_COMPONENT_*`: 1 = uint32, 2 = sint32, 3 = float32.
    pub component_type: u32,
    pub register: u32,
    pub mask: u8,
    /// For inputs: components actually read; for outputs: components never
    /// written (the compiler stores the complement there).
    pub read_write_mask: u8,
    pub stream: u32,
    pub min_precision: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub entries: Vec<SignatureParameter>,
}

impl Signature {
    pub fn find(&self, register: u32) -> Option<&SignatureParameter> {
        self.entries.iter().find(|e| e.register == register)
    }

    pub fn find_system_value(&self, system_value_type: u32) -> Option<&SignatureParameter> {
        self.entries
            .iter()
            .find(|e| e.system_value_type == system_value_type)
    }

    pub fn max_register(&self) -> u32 {
        self.entries
            .iter()
            // System-value-only entries may use register ~0.
            .filter(|e| e.register != u32::MAX)
            .map(|e| e.register + 1)
            .max()
            .unwrap_or(0)
    }
}

fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap())
}

fn read_cstr(bytes: &[u8], offset: usize, table_end: usize) -> Result<String, DxbcError> {
    if offset >= bytes.len() {
        return Err(DxbcError::InvalidChunk {
            context: format!("semantic_name offset {offset} out of bounds"),
        });
    }
    if offset < table_end {
        return Err(DxbcError::InvalidChunk {
            context: format!("semantic_name offset {offset} points into signature table"),
        });
    }
    let rest = &bytes[offset..];
    let len = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| DxbcError::InvalidChunk {
            context: "semantic_name has no null terminator".to_string(),
        })?;
    std::str::from_utf8(&rest[..len])
        .map(str::to_owned)
        .map_err(|_| DxbcError::InvalidChunk {
            context: "semantic_name is not valid UTF-8".to_string(),
        })
}

/// Parses a base-layout (24-byte-entry) signature chunk.
pub fn parse_signature_chunk(bytes: &[u8]) -> Result<Signature, DxbcError> {
    parse_signature_chunk_tagged(bytes, FourCC(*b"ISGN"))
}

pub(crate) fn parse_signature_chunk_tagged(
    bytes: &[u8],
    tag: FourCC,
) -> Result<Signature, DxbcError> {
    let (entry_size, leading_stream, trailing_precision) = match &tag.0 {
        b"OSG5" => (28usize, true, false),
        b"ISG1" | b"OSG1" | b"PSG1" => (32, true, true),
        _ => (24, false, false),
    };

    if bytes.len() < 8 {
        return Err(DxbcError::InvalidChunk {
            context: format!("signature header needs 8 bytes, got {}", bytes.len()),
        });
    }
    let param_count = read_u32(bytes, 0) as usize;
    let param_offset = read_u32(bytes, 4) as usize;
    if param_count == 0 {
        return Ok(Signature::default());
    }

    let table_end = param_offset
        .checked_add(param_count * entry_size)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| DxbcError::InvalidChunk {
            context: format!("signature table of {param_count} entries out of bounds"),
        })?;

    let mut entries = Vec::with_capacity(param_count);
    for i in 0..param_count {
        let mut pos = param_offset + i * entry_size;
        let stream = if leading_stream {
            let v = read_u32(bytes, pos);
            pos += 4;
            v
        } else {
            0
        };
        let name_offset = read_u32(bytes, pos) as usize;
        let semantic_index = read_u32(bytes, pos + 4);
        let system_value_type = read_u32(bytes, pos + 8);
        let component_type = read_u32(bytes, pos + 12);
        let register = read_u32(bytes, pos + 16);
        let mask = bytes[pos + 20];
        let read_write_mask = bytes[pos + 21];
        let min_precision = if trailing_precision {
            read_u32(bytes, pos + 24)
        } else {
            0
        };

        entries.push(SignatureParameter {
            semantic_name: read_cstr(bytes, name_offset, table_end)?,
            semantic_index,
            system_value_type,
            component_type,
            register,
            mask,
            read_write_mask,
            stream,
            min_precision,
        });
    }
    Ok(Signature { entries })
}
