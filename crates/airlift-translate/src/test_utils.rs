//! Hand-assembled DXBC fixtures for tests: raw token builders for the
//! program chunk plus signature-chunk builders.

use crate::sm5::opcode::*;
use crate::sm5::Swizzle;

pub fn opcode_token(opcode: u32, len_dwords: u32) -> u32 {
    opcode | (len_dwords << OPCODE_LEN_SHIFT)
}

pub fn version_token(stage_type: u32, major: u32, minor: u32) -> u32 {
    (stage_type << VERSION_TYPE_SHIFT) | (major << VERSION_MAJOR_SHIFT) | minor
}

pub fn operand_token(
    ty: u32,
    num_components: u32,
    selection_mode: u32,
    component_sel: u32,
    index_dim: u32,
) -> u32 {
    let mut token = 0u32;
    token |= num_components & OPERAND_NUM_COMPONENTS_MASK;
    token |= (selection_mode & OPERAND_SELECTION_MODE_MASK) << OPERAND_SELECTION_MODE_SHIFT;
    token |= (component_sel & OPERAND_COMPONENT_SELECTION_MASK)
        << OPERAND_COMPONENT_SELECTION_SHIFT;
    token |= (ty & OPERAND_TYPE_MASK) << OPERAND_TYPE_SHIFT;
    token |= (index_dim & OPERAND_INDEX_DIMENSION_MASK) << OPERAND_INDEX_DIMENSION_SHIFT;
    token
}

pub fn swizzle_bits(swizzle: Swizzle) -> u32 {
    (swizzle.0[0] as u32)
        | ((swizzle.0[1] as u32) << 2)
        | ((swizzle.0[2] as u32) << 4)
        | ((swizzle.0[3] as u32) << 6)
}

/// Masked destination register operand with one immediate index.
pub fn dst_operand(ty: u32, index: u32, mask: u8) -> Vec<u32> {
    vec![
        operand_token(ty, 2, OPERAND_SEL_MASK, mask as u32, 1),
        index,
    ]
}

/// Swizzled source register operand with immediate indices.
pub fn src_operand(ty: u32, indices: &[u32], swizzle: Swizzle) -> Vec<u32> {
    let mut out = vec![operand_token(
        ty,
        2,
        OPERAND_SEL_SWIZZLE,
        swizzle_bits(swizzle),
        indices.len() as u32,
    )];
    out.extend_from_slice(indices);
    out
}

/// Zero-component resource-style operand (sampler/resource/uav).
pub fn resource_operand(ty: u32, slot: u32) -> Vec<u32> {
    vec![operand_token(ty, 0, OPERAND_SEL_MASK, 0xf, 1), slot]
}

/// Scalar (select-1) source operand.
pub fn src_operand_select1(ty: u32, indices: &[u32], component: u32) -> Vec<u32> {
    let mut out = vec![operand_token(ty, 2, OPERAND_SEL_SELECT1, component, indices.len() as u32)];
    out.extend_from_slice(indices);
    out
}

pub fn imm32_vec4(values: [u32; 4]) -> Vec<u32> {
    let mut out = vec![operand_token(
        OPERAND_TYPE_IMMEDIATE32,
        2,
        OPERAND_SEL_SWIZZLE,
        swizzle_bits(Swizzle::IDENTITY),
        0,
    )];
    out.extend_from_slice(&values);
    out
}

pub fn imm32_scalar(value: u32) -> Vec<u32> {
    vec![
        operand_token(OPERAND_TYPE_IMMEDIATE32, 1, OPERAND_SEL_SELECT1, 0, 0),
        value,
    ]
}

/// Wraps body tokens with the version and length header.
pub fn assemble_program(stage_type: u32, major: u32, minor: u32, body: &[u32]) -> Vec<u32> {
    let mut tokens = Vec::with_capacity(body.len() + 2);
    tokens.push(version_token(stage_type, major, minor));
    tokens.push(0);
    tokens.extend_from_slice(body);
    tokens[1] = tokens.len() as u32;
    tokens
}

pub fn tokens_to_bytes(tokens: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(tokens.len() * 4);
    for &token in tokens {
        out.extend_from_slice(&token.to_le_bytes());
    }
    out
}

/// A base-layout signature chunk from `(semantic, index, sysval,
/// component_type, register, mask)` rows.
pub fn build_signature_chunk(entries: &[(&str, u32, u32, u32, u32, u8)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&8u32.to_le_bytes());

    let table_len = entries.len() * 24;
    let mut string_offset = (8 + table_len) as u32;
    let mut name_offsets = Vec::new();
    for (name, ..) in entries {
        name_offsets.push(string_offset);
        string_offset += name.len() as u32 + 1;
    }

    for ((_, semantic_index, system_value, component_type, register, mask), name_offset) in
        entries.iter().zip(&name_offsets)
    {
        bytes.extend_from_slice(&name_offset.to_le_bytes());
        bytes.extend_from_slice(&semantic_index.to_le_bytes());
        bytes.extend_from_slice(&system_value.to_le_bytes());
        bytes.extend_from_slice(&component_type.to_le_bytes());
        bytes.extend_from_slice(&register.to_le_bytes());
        bytes.extend_from_slice(&[*mask, *mask, 0, 0]);
    }
    for (name, ..) in entries {
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
    }
    bytes
}

/* Common declaration snippets. */

pub fn dcl_temps(count: u32) -> Vec<u32> {
    vec![opcode_token(OPCODE_DCL_TEMPS, 2), count]
}

pub fn dcl_input(reg: u32, mask: u8) -> Vec<u32> {
    let mut out = vec![opcode_token(OPCODE_DCL_INPUT, 3)];
    out.extend_from_slice(&dst_operand(OPERAND_TYPE_INPUT, reg, mask));
    out
}

pub fn dcl_input_ps(reg: u32, mask: u8, interpolation: u32) -> Vec<u32> {
    let mut out = vec![
        opcode_token(OPCODE_DCL_INPUT_PS, 3) | (interpolation << INTERPOLATION_SHIFT),
    ];
    out.extend_from_slice(&dst_operand(OPERAND_TYPE_INPUT, reg, mask));
    out
}

pub fn dcl_output(reg: u32, mask: u8) -> Vec<u32> {
    let mut out = vec![opcode_token(OPCODE_DCL_OUTPUT, 3)];
    out.extend_from_slice(&dst_operand(OPERAND_TYPE_OUTPUT, reg, mask));
    out
}

pub fn dcl_resource_texture2d(slot: u32) -> Vec<u32> {
    let mut out = vec![
        opcode_token(OPCODE_DCL_RESOURCE, 4)
            | (RESOURCE_DIMENSION_TEXTURE2D << RESOURCE_DIMENSION_SHIFT),
    ];
    out.extend_from_slice(&resource_operand(OPERAND_TYPE_RESOURCE, slot));
    // float return type in all four components.
    out.push(0x5555);
    out
}

pub fn dcl_sampler(slot: u32) -> Vec<u32> {
    let mut out = vec![opcode_token(OPCODE_DCL_SAMPLER, 3)];
    out.extend_from_slice(&resource_operand(OPERAND_TYPE_SAMPLER, slot));
    out
}

pub fn dcl_tgsm_raw(slot: u32, byte_count: u32) -> Vec<u32> {
    let mut out = vec![opcode_token(OPCODE_DCL_TGSM_RAW, 4)];
    out.extend_from_slice(&resource_operand(OPERAND_TYPE_THREAD_GROUP_SHARED_MEMORY, slot));
    out.push(byte_count);
    out
}

pub fn dcl_thread_group(x: u32, y: u32, z: u32) -> Vec<u32> {
    vec![opcode_token(OPCODE_DCL_THREAD_GROUP, 4), x, y, z]
}

pub fn ret() -> Vec<u32> {
    vec![opcode_token(OPCODE_RET, 1)]
}
