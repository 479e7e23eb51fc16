//! `RDEF` resource-definition chunk: the reflection table describing the
//! constant buffers and resource bindings a shader declares.

use crate::DxbcError;

/// `D3D_SHADER_INPUT_TYPE` values we care about.
pub mod input_type {
    pub const CBUFFER: u32 = 0;
    pub const TBUFFER: u32 = 1;
    pub const TEXTURE: u32 = 2;
    pub const SAMPLER: u32 = 3;
    pub const UAV_RWTYPED: u32 = 4;
    pub const STRUCTURED: u32 = 5;
    pub const UAV_RWSTRUCTURED: u32 = 6;
    pub const BYTEADDRESS: u32 = 7;
    pub const UAV_RWBYTEADDRESS: u32 = 8;
    pub const UAV_APPEND_STRUCTURED: u32 = 9;
    pub const UAV_CONSUME_STRUCTURED: u32 = 10;
    pub const UAV_RWSTRUCTURED_WITH_COUNTER: u32 = 11;
}

#[derive(Debug, Clone)]
pub struct ResourceBindingDesc {
    pub name: String,
    pub input_type: u32,
    pub return_type: u32,
    pub dimension: u32,
    pub sample_count: u32,
    pub bind_point: u32,
    pub bind_count: u32,
    pub flags: u32,
    /// SM5.1 only; zero otherwise.
    pub register_space: u32,
    pub range_id: u32,
}

/// One node of the type tree attached to a constant-buffer variable.
#[derive(Debug, Clone)]
pub struct ShaderVariableType {
    pub class: u16,
    pub base_type: u16,
    pub rows: u16,
    pub columns: u16,
    pub elements: u16,
    pub members: Vec<(String, ShaderVariableType)>,
}

#[derive(Debug, Clone)]
pub struct ShaderVariableDesc {
    pub name: String,
    pub start_offset: u32,
    pub size: u32,
    pub flags: u32,
    pub ty: ShaderVariableType,
}

#[derive(Debug, Clone)]
pub struct ConstantBufferDesc {
    pub name: String,
    pub size: u32,
    pub flags: u32,
    pub buffer_type: u32,
    pub variables: Vec<ShaderVariableDesc>,
}

#[derive(Debug, Clone)]
pub struct RdefChunk {
    pub target: u32,
    pub flags: u32,
    pub constant_buffers: Vec<ConstantBufferDesc>,
    pub bindings: Vec<ResourceBindingDesc>,
}

fn read_u32(bytes: &[u8], pos: usize) -> Result<u32, DxbcError> {
    bytes
        .get(pos..pos + 4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| DxbcError::InvalidChunk {
            context: format!("RDEF read of 4 bytes at {pos} out of bounds"),
        })
}

fn read_u16(bytes: &[u8], pos: usize) -> Result<u16, DxbcError> {
    bytes
        .get(pos..pos + 2)
        .map(|b| u16::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| DxbcError::InvalidChunk {
            context: format!("RDEF read of 2 bytes at {pos} out of bounds"),
        })
}

fn read_cstr(bytes: &[u8], offset: usize) -> Result<String, DxbcError> {
    let rest = bytes.get(offset..).ok_or_else(|| DxbcError::InvalidChunk {
        context: format!("RDEF name offset {offset} out of bounds"),
    })?;
    let len = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| DxbcError::InvalidChunk {
            context: "RDEF name has no null terminator".to_string(),
        })?;
    std::str::from_utf8(&rest[..len])
        .map(str::to_owned)
        .map_err(|_| DxbcError::InvalidChunk {
            context: "RDEF name is not valid UTF-8".to_string(),
        })
}

fn parse_type(bytes: &[u8], offset: usize, depth: u32) -> Result<ShaderVariableType, DxbcError> {
    if depth > 16 {
        return Err(DxbcError::InvalidChunk {
            context: "RDEF type tree recursion too deep".to_string(),
        });
    }
    let class = read_u16(bytes, offset)?;
    let base_type = read_u16(bytes, offset + 2)?;
    let rows = read_u16(bytes, offset + 4)?;
    let columns = read_u16(bytes, offset + 6)?;
    let elements = read_u16(bytes, offset + 8)?;
    let member_count = read_u16(bytes, offset + 10)?;
    let member_offset = read_u32(bytes, offset + 12)? as usize;

    let mut members = Vec::with_capacity(member_count as usize);
    for i in 0..member_count as usize {
        let pos = member_offset + i * 12;
        let name_offset = read_u32(bytes, pos)? as usize;
        let type_offset = read_u32(bytes, pos + 4)? as usize;
        // Third dword is the member's byte offset within the struct; the
        // translator only needs the shape, so it is not retained.
        members.push((
            read_cstr(bytes, name_offset)?,
            parse_type(bytes, type_offset, depth + 1)?,
        ));
    }

    Ok(ShaderVariableType {
        class,
        base_type,
        rows,
        columns,
        elements,
        members,
    })
}

pub fn parse_rdef_chunk(bytes: &[u8]) -> Result<RdefChunk, DxbcError> {
    if bytes.len() < 32 {
        return Err(DxbcError::InvalidChunk {
            context: format!("RDEF header needs 32 bytes, got {}", bytes.len()),
        });
    }
    let cb_count = read_u32(bytes, 0)? as usize;
    let cb_offset = read_u32(bytes, 4)? as usize;
    let rb_count = read_u32(bytes, 8)? as usize;
    let rb_offset = read_u32(bytes, 12)? as usize;
    let target = read_u32(bytes, 16)?;
    let flags = read_u32(bytes, 20)?;

    let sm51 = (target & 0xffff) >= 0x0501;
    let rb_entry_size = if sm51 { 40 } else { 32 };
    // Variable descriptors grew by four dwords in SM5.
    let var_entry_size = if (target & 0xffff) >= 0x0500 { 40 } else { 24 };

    let mut bindings = Vec::with_capacity(rb_count);
    for i in 0..rb_count {
        let pos = rb_offset + i * rb_entry_size;
        let name_offset = read_u32(bytes, pos)? as usize;
        bindings.push(ResourceBindingDesc {
            name: read_cstr(bytes, name_offset)?,
            input_type: read_u32(bytes, pos + 4)?,
            return_type: read_u32(bytes, pos + 8)?,
            dimension: read_u32(bytes, pos + 12)?,
            sample_count: read_u32(bytes, pos + 16)?,
            bind_point: read_u32(bytes, pos + 20)?,
            bind_count: read_u32(bytes, pos + 24)?,
            flags: read_u32(bytes, pos + 28)?,
            register_space: if sm51 { read_u32(bytes, pos + 32)? } else { 0 },
            range_id: if sm51 { read_u32(bytes, pos + 36)? } else { 0 },
        });
    }

    let mut constant_buffers = Vec::with_capacity(cb_count);
    for i in 0..cb_count {
        let pos = cb_offset + i * 24;
        let name_offset = read_u32(bytes, pos)? as usize;
        let var_count = read_u32(bytes, pos + 4)? as usize;
        let var_offset = read_u32(bytes, pos + 8)? as usize;
        let size = read_u32(bytes, pos + 12)?;
        let cb_flags = read_u32(bytes, pos + 16)?;
        let buffer_type = read_u32(bytes, pos + 20)?;

        let mut variables = Vec::with_capacity(var_count);
        for j in 0..var_count {
            let vpos = var_offset + j * var_entry_size;
            let vname_offset = read_u32(bytes, vpos)? as usize;
            let start_offset = read_u32(bytes, vpos + 4)?;
            let vsize = read_u32(bytes, vpos + 8)?;
            let vflags = read_u32(bytes, vpos + 12)?;
            let type_offset = read_u32(bytes, vpos + 16)? as usize;
            variables.push(ShaderVariableDesc {
                name: read_cstr(bytes, vname_offset)?,
                start_offset,
                size: vsize,
                flags: vflags,
                ty: parse_type(bytes, type_offset, 0)?,
            });
        }

        constant_buffers.push(ConstantBufferDesc {
            name: read_cstr(bytes, name_offset)?,
            size,
            flags: cb_flags,
            buffer_type,
            variables,
        });
    }

    Ok(RdefChunk {
        target,
        flags,
        constant_buffers,
        bindings,
    })
}
