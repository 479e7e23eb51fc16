use airlift_dxbc::{parse_rdef_chunk, DxbcError};

use airlift_dxbc as dxbc;

mod helpers {
    /// Builds an RDEF chunk with one cbuffer (with `var_count` variables of
    /// a float4 type) and one texture binding.
    pub fn build_rdef(cb_name: &str, cb_size: u32, bind_point: u32) -> Vec<u8> {
        let header_len = 32u32;
        let cb_offset = header_len;
        let var_offset = cb_offset + 24;
        let type_offset = var_offset + 24;
        let rb_offset = type_offset + 16;
        let string_offset = rb_offset + 2 * 32;

        let cb_name_off = string_offset;
        let var_name_off = cb_name_off + cb_name.len() as u32 + 1;
        let tex_name_off = var_name_off + "color\0".len() as u32;

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes()); // cb_count
        bytes.extend_from_slice(&cb_offset.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes()); // rb_count
        bytes.extend_from_slice(&rb_offset.to_le_bytes());
        bytes.extend_from_slice(&0xFFFE_0400u32.to_le_bytes()); // target: vs_4_0
        bytes.extend_from_slice(&0u32.to_le_bytes()); // flags
        bytes.extend_from_slice(&0u32.to_le_bytes()); // creator
        bytes.extend_from_slice(&0u32.to_le_bytes()); // interface slots

        // Constant buffer desc.
        bytes.extend_from_slice(&cb_name_off.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes()); // var_count
        bytes.extend_from_slice(&var_offset.to_le_bytes());
        bytes.extend_from_slice(&cb_size.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // flags
        bytes.extend_from_slice(&0u32.to_le_bytes()); // type

        // Variable desc (24 bytes in the SM4 layout).
        bytes.extend_from_slice(&var_name_off.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // start_offset
        bytes.extend_from_slice(&16u32.to_le_bytes()); // size
        bytes.extend_from_slice(&2u32.to_le_bytes()); // flags (used)
        bytes.extend_from_slice(&type_offset.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // default value

        // Type desc: vector class, float, 1x4, no members.
        bytes.extend_from_slice(&1u16.to_le_bytes()); // class (vector)
        bytes.extend_from_slice(&3u16.to_le_bytes()); // type (float)
        bytes.extend_from_slice(&1u16.to_le_bytes()); // rows
        bytes.extend_from_slice(&4u16.to_le_bytes()); // cols
        bytes.extend_from_slice(&0u16.to_le_bytes()); // elements
        bytes.extend_from_slice(&0u16.to_le_bytes()); // member_count
        bytes.extend_from_slice(&0u32.to_le_bytes()); // member_offset

        // Resource binding: the cbuffer slot.
        bytes.extend_from_slice(&cb_name_off.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // CBUFFER
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&bind_point.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        // Resource binding: a texture2d at t3.
        bytes.extend_from_slice(&tex_name_off.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes()); // TEXTURE
        bytes.extend_from_slice(&5u32.to_le_bytes()); // return_type (float)
        bytes.extend_from_slice(&4u32.to_le_bytes()); // dimension (2d)
        bytes.extend_from_slice(&u32::MAX.to_le_bytes()); // sample_count
        bytes.extend_from_slice(&3u32.to_le_bytes()); // bind_point
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        bytes.extend_from_slice(cb_name.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(b"color\0");
        bytes.extend_from_slice(b"diffuse_map\0");
        bytes
    }
}

#[test]
fn parses_cbuffer_and_bindings() {
    let bytes = helpers::build_rdef("globals", 64, 1);
    let rdef = parse_rdef_chunk(&bytes).expect("RDEF should parse");

    assert_eq!(rdef.constant_buffers.len(), 1);
    let cb = &rdef.constant_buffers[0];
    assert_eq!(cb.name, "globals");
    assert_eq!(cb.size, 64);
    assert_eq!(cb.variables.len(), 1);
    assert_eq!(cb.variables[0].name, "color");
    assert_eq!(cb.variables[0].ty.base_type, 3);
    assert_eq!(cb.variables[0].ty.columns, 4);

    assert_eq!(rdef.bindings.len(), 2);
    assert_eq!(rdef.bindings[0].input_type, dxbc::rdef::input_type::CBUFFER);
    assert_eq!(rdef.bindings[0].bind_point, 1);
    assert_eq!(rdef.bindings[1].input_type, dxbc::rdef::input_type::TEXTURE);
    assert_eq!(rdef.bindings[1].name, "diffuse_map");
    assert_eq!(rdef.bindings[1].bind_point, 3);
}

#[test]
fn truncated_header_is_rejected() {
    let err = parse_rdef_chunk(&[0u8; 8]).unwrap_err();
    assert!(matches!(err, DxbcError::InvalidChunk { .. }));
    assert!(err.context().contains("RDEF header"));
}

#[test]
fn binding_name_without_terminator_is_rejected() {
    let mut bytes = helpers::build_rdef("globals", 64, 0);
    // Cut the final NUL so the last string never terminates.
    bytes.pop();
    let err = parse_rdef_chunk(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::InvalidChunk { .. }));
    assert!(err.context().contains("null terminator"));
}
