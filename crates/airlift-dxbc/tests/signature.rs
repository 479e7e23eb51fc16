use airlift_dxbc::{parse_signature_chunk, test_utils, DxbcError, DxbcFile, FourCC};

/// Builds a base-layout signature chunk with POSITION (r0.xyzw) and
/// TEXCOORD0 (r1.xy).
fn build_signature_chunk() -> Vec<u8> {
    // Header: u32 param_count, u32 param_offset. Entries are 24 bytes:
    // name_off, semantic_index, system_value, component_type, register,
    // then mask/rw_mask/stream/min_precision packed one byte each.
    let mut bytes = Vec::new();

    bytes.extend_from_slice(&2u32.to_le_bytes()); // param_count
    bytes.extend_from_slice(&8u32.to_le_bytes()); // param_offset

    let string_table_offset = (8 + 24 * 2) as u32;
    let pos_name_offset = string_table_offset;
    let tex_name_offset = string_table_offset + "POSITION\0".len() as u32;

    bytes.extend_from_slice(&pos_name_offset.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes()); // semantic_index
    bytes.extend_from_slice(&0u32.to_le_bytes()); // system_value_type
    bytes.extend_from_slice(&3u32.to_le_bytes()); // component_type (float32)
    bytes.extend_from_slice(&0u32.to_le_bytes()); // register
    bytes.extend_from_slice(&[0xF, 0xF, 0, 0]); // mask / rw / pad

    bytes.extend_from_slice(&tex_name_offset.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&3u32.to_le_bytes());
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&[0x3, 0x3, 0, 0]);

    bytes.extend_from_slice(b"POSITION\0");
    bytes.extend_from_slice(b"TEXCOORD\0");
    bytes
}

/// Same two entries in the v1 (32-byte-entry) layout with stream and
/// min-precision dwords.
fn build_signature_chunk_v1() -> Vec<u8> {
    let mut bytes = Vec::new();

    bytes.extend_from_slice(&2u32.to_le_bytes());
    bytes.extend_from_slice(&8u32.to_le_bytes());

    let string_table_offset = (8 + 32 * 2) as u32;
    let pos_name_offset = string_table_offset;
    let tex_name_offset = string_table_offset + "POSITION\0".len() as u32;

    for (name_off, register, mask) in [(pos_name_offset, 0u32, 0xFu8), (tex_name_offset, 1, 0x3)] {
        bytes.extend_from_slice(&0u32.to_le_bytes()); // stream
        bytes.extend_from_slice(&name_off.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // semantic_index
        bytes.extend_from_slice(&0u32.to_le_bytes()); // system_value_type
        bytes.extend_from_slice(&3u32.to_le_bytes()); // component_type
        bytes.extend_from_slice(&register.to_le_bytes());
        bytes.extend_from_slice(&[mask, mask, 0, 0]);
        bytes.extend_from_slice(&1u32.to_le_bytes()); // min_precision
    }

    bytes.extend_from_slice(b"POSITION\0");
    bytes.extend_from_slice(b"TEXCOORD\0");
    bytes
}

#[test]
fn parse_signature_chunk_two_entries() {
    let sig = parse_signature_chunk(&build_signature_chunk()).expect("signature should parse");
    assert_eq!(sig.entries.len(), 2);

    assert_eq!(sig.entries[0].semantic_name, "POSITION");
    assert_eq!(sig.entries[0].semantic_index, 0);
    assert_eq!(sig.entries[0].register, 0);
    assert_eq!(sig.entries[0].component_type, 3);
    assert_eq!(sig.entries[0].mask, 0xF);
    assert_eq!(sig.entries[0].read_write_mask, 0xF);
    assert_eq!(sig.entries[0].stream, 0);

    assert_eq!(sig.entries[1].semantic_name, "TEXCOORD");
    assert_eq!(sig.entries[1].register, 1);
    assert_eq!(sig.entries[1].mask, 0x3);

    assert_eq!(sig.max_register(), 2);
    assert_eq!(sig.find(1).unwrap().semantic_name, "TEXCOORD");
}

#[test]
fn parse_signature_chunk_empty_is_ok() {
    // Shaders without patch constants legitimately have empty signatures.
    let sig = parse_signature_chunk(&[0u8; 8]).expect("empty signature should parse");
    assert!(sig.entries.is_empty());
}

#[test]
fn dxbc_get_signature_parses_chunk() {
    let dxbc_bytes =
        test_utils::build_container(&[(FourCC(*b"ISGN"), &build_signature_chunk())]);
    let dxbc = DxbcFile::parse(&dxbc_bytes).expect("DXBC should parse");

    let sig = dxbc
        .get_signature(FourCC(*b"ISGN"))
        .expect("missing signature chunk")
        .expect("signature should parse");
    assert_eq!(sig.entries.len(), 2);
    assert_eq!(sig.entries[0].semantic_name, "POSITION");
}

#[test]
fn dxbc_get_signature_handles_v1_chunk_id() {
    let dxbc_bytes =
        test_utils::build_container(&[(FourCC(*b"ISG1"), &build_signature_chunk_v1())]);
    let dxbc = DxbcFile::parse(&dxbc_bytes).expect("DXBC should parse");

    // Callers commonly ask for `ISGN` even when the toolchain emitted `ISG1`.
    let sig = dxbc
        .get_signature(FourCC(*b"ISGN"))
        .expect("missing signature chunk")
        .expect("signature should parse");
    assert_eq!(sig.entries.len(), 2);
    assert_eq!(sig.entries[0].semantic_name, "POSITION");
    assert_eq!(sig.entries[0].min_precision, 1);
    assert_eq!(sig.entries[1].register, 1);
}

#[test]
fn signature_chunk_table_out_of_bounds_is_rejected() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u32.to_le_bytes()); // param_count
    bytes.extend_from_slice(&8u32.to_le_bytes()); // param_offset
    bytes.extend_from_slice(&[0u8; 4]); // truncated entry

    let err = parse_signature_chunk(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::InvalidChunk { .. }));
    assert!(err.context().contains("signature table"));
}

#[test]
fn signature_chunk_bad_semantic_offset_is_rejected() {
    let mut bytes = build_signature_chunk();
    bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());

    let err = parse_signature_chunk(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::InvalidChunk { .. }));
    assert!(err.context().contains("semantic_name"));
}

#[test]
fn signature_chunk_semantic_offset_into_table_is_rejected() {
    let mut bytes = build_signature_chunk();
    bytes[8..12].copy_from_slice(&8u32.to_le_bytes());

    let err = parse_signature_chunk(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::InvalidChunk { .. }));
    assert!(err.context().contains("points into signature table"));
}

#[test]
fn signature_chunk_missing_null_terminator_is_rejected() {
    let mut bytes = build_signature_chunk();
    *bytes.last_mut().unwrap() = b'X';

    let err = parse_signature_chunk(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::InvalidChunk { .. }));
    assert!(err.context().contains("null terminator"));
}

#[test]
fn signature_chunk_invalid_utf8_is_rejected() {
    let mut bytes = build_signature_chunk();
    let needle = b"POSITION\0";
    let pos = bytes
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("expected POSITION string in test chunk");
    bytes[pos] = 0xFF;

    let err = parse_signature_chunk(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::InvalidChunk { .. }));
    assert!(err.context().contains("valid UTF-8"));
}
