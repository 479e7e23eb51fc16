use airlift_dxbc::{DxbcError, DxbcFile, FourCC};

fn build_dxbc(chunks: &[(FourCC, &[u8])]) -> Vec<u8> {
    let chunk_count = u32::try_from(chunks.len()).expect("too many chunks for test");
    let header_len = 4 + 16 + 4 + 4 + 4 + chunks.len() * 4;

    let mut offsets = Vec::with_capacity(chunks.len());
    let mut cursor = header_len;
    for (_fourcc, data) in chunks {
        offsets.push(cursor as u32);
        cursor += 8 + data.len();
    }
    let total_size = cursor as u32;

    let mut bytes = Vec::with_capacity(cursor);
    bytes.extend_from_slice(b"DXBC");
    bytes.extend_from_slice(&[0u8; 16]); // checksum (ignored by parser)
    bytes.extend_from_slice(&1u32.to_le_bytes()); // reserved
    bytes.extend_from_slice(&total_size.to_le_bytes());
    bytes.extend_from_slice(&chunk_count.to_le_bytes());
    for off in offsets {
        bytes.extend_from_slice(&off.to_le_bytes());
    }
    for (fourcc, data) in chunks {
        bytes.extend_from_slice(&fourcc.0);
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(data);
    }

    assert_eq!(bytes.len(), total_size as usize);
    bytes
}

// Start of the chunk offset table within the fixed header.
const OFFSET_TABLE_POS: usize = 4 + 16 + 4 + 4 + 4;

#[test]
fn parse_minimal_dxbc_and_iterate_chunks() {
    let bytes = build_dxbc(&[
        (FourCC(*b"SHEX"), &[1, 2, 3, 4]),
        (FourCC(*b"JUNK"), &[0xaa, 0xbb]),
    ]);

    let file = DxbcFile::parse(&bytes).expect("parse should succeed");
    assert_eq!(file.header().magic, FourCC(*b"DXBC"));
    assert_eq!(file.header().total_size as usize, bytes.len());
    assert_eq!(file.header().chunk_count, 2);

    let chunks: Vec<_> = file.chunks().collect();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].fourcc, FourCC(*b"SHEX"));
    assert_eq!(chunks[0].data, &[1, 2, 3, 4]);
    assert_eq!(chunks[1].fourcc, FourCC(*b"JUNK"));
    assert_eq!(chunks[1].data, &[0xaa, 0xbb]);

    assert_eq!(
        file.get_chunk(FourCC(*b"SHEX")).expect("missing SHEX").data,
        &[1, 2, 3, 4]
    );
    assert_eq!(file.get_chunks(FourCC(*b"JUNK")).count(), 1);
    assert_eq!(file.shader_chunk().unwrap().fourcc, FourCC(*b"SHEX"));

    let summary = file.debug_summary();
    assert!(summary.contains("SHEX"));
    assert!(summary.contains("JUNK"));
}

#[test]
fn shader_chunk_falls_back_to_legacy_tag() {
    let bytes = build_dxbc(&[(FourCC(*b"SHDR"), &[0, 0, 0, 0])]);
    let file = DxbcFile::parse(&bytes).expect("parse should succeed");
    assert_eq!(file.shader_chunk().unwrap().fourcc, FourCC(*b"SHDR"));
}

#[test]
fn malformed_bad_magic_is_error() {
    let mut bytes = build_dxbc(&[(FourCC(*b"SHEX"), &[1, 2, 3])]);
    bytes[0..4].copy_from_slice(b"NOPE");

    let err = DxbcFile::parse(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::MalformedHeader { .. }));
    assert!(err.context().contains("bad magic"));
}

#[test]
fn malformed_truncated_header_is_error() {
    let err = DxbcFile::parse(&[0u8; 10]).unwrap_err();
    assert!(matches!(err, DxbcError::MalformedHeader { .. }));
    assert!(err.context().contains("need at least"));
    assert!(err.context().contains("got"));
}

#[test]
fn malformed_total_size_smaller_than_header_is_error() {
    let mut bytes = build_dxbc(&[]);
    // total_size field lives at offset 24.
    bytes[24..28].copy_from_slice(&0u32.to_le_bytes());

    let err = DxbcFile::parse(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::MalformedHeader { .. }));
    assert!(err.context().contains("smaller than header"));
}

#[test]
fn malformed_total_size_exceeds_buffer_len_is_error() {
    let mut bytes = build_dxbc(&[]);
    let bad_total_size = bytes.len() as u32 + 1;
    bytes[24..28].copy_from_slice(&bad_total_size.to_le_bytes());

    let err = DxbcFile::parse(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::OutOfBounds { .. }));
    assert!(err.context().contains("exceeds buffer length"));
}

#[test]
fn malformed_total_size_truncates_chunk_payload_is_error() {
    // Keep the buffer length but shrink declared total_size so it cuts off
    // the final payload byte; the declared size must be authoritative.
    let mut bytes = build_dxbc(&[(FourCC(*b"SHEX"), &[1, 2, 3, 4])]);
    let bad_total_size = bytes.len() as u32 - 1;
    bytes[24..28].copy_from_slice(&bad_total_size.to_le_bytes());

    let err = DxbcFile::parse(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::OutOfBounds { .. }));
    assert!(err.context().contains("chunk 0"));
    assert!(err.context().contains("SHEX"));
    assert!(err.context().contains("outside total_size"));
}

#[test]
fn malformed_truncated_chunk_offset_table_is_error() {
    // Header declares one chunk but total_size leaves no room for the table
    // entry's chunk header.
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"DXBC");
    bytes.extend_from_slice(&[0u8; 16]);
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&32u32.to_le_bytes()); // total_size
    bytes.extend_from_slice(&1u32.to_le_bytes()); // chunk_count
    assert_eq!(bytes.len(), 32);

    let err = DxbcFile::parse(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::MalformedOffsets { .. }));
    assert!(err.context().contains("chunk offset table"));
}

#[test]
fn rejects_excessive_chunk_count() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"DXBC");
    bytes.extend_from_slice(&[0u8; 16]);
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&32u32.to_le_bytes());
    bytes.extend_from_slice(&u32::MAX.to_le_bytes()); // chunk_count

    let err = DxbcFile::parse(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::MalformedOffsets { .. }), "{err:?}");
    assert!(err.context().contains("exceeds maximum"));
}

#[test]
fn malformed_chunk_offset_points_into_header_is_error() {
    let mut bytes = build_dxbc(&[(FourCC(*b"SHEX"), &[1, 2, 3])]);
    bytes[OFFSET_TABLE_POS..OFFSET_TABLE_POS + 4].copy_from_slice(&0u32.to_le_bytes());

    let err = DxbcFile::parse(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::MalformedOffsets { .. }));
    assert!(err.context().contains("chunk 0"));
    assert!(err.context().contains("points into DXBC header"));
}

#[test]
fn malformed_chunk_offset_points_into_offset_table_is_error() {
    let mut bytes = build_dxbc(&[(FourCC(*b"SHEX"), &[1, 2, 3])]);
    // For one chunk the table spans 32..36; aim into it, misaligned.
    bytes[OFFSET_TABLE_POS..OFFSET_TABLE_POS + 4].copy_from_slice(&33u32.to_le_bytes());

    let err = DxbcFile::parse(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::MalformedOffsets { .. }));
    assert!(err.context().contains("points into chunk offset table"));
}

#[test]
fn malformed_second_chunk_offset_is_error_and_mentions_index() {
    let mut bytes = build_dxbc(&[
        (FourCC(*b"SHEX"), &[1, 2, 3, 4]),
        (FourCC(*b"JUNK"), &[0xaa]),
    ]);
    let second = OFFSET_TABLE_POS + 4;
    bytes[second..second + 4].copy_from_slice(&0u32.to_le_bytes());

    let err = DxbcFile::parse(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::MalformedOffsets { .. }));
    assert!(err.context().contains("chunk 1"));
}

#[test]
fn malformed_chunk_offset_leaves_no_room_for_chunk_header() {
    let mut bytes = build_dxbc(&[(FourCC(*b"SHEX"), &[1, 2, 3, 4])]);
    // Point at the last 4 bytes of the file, so the 8-byte chunk header
    // would run past the end.
    let bad_off = bytes.len() as u32 - 4;
    bytes[OFFSET_TABLE_POS..OFFSET_TABLE_POS + 4].copy_from_slice(&bad_off.to_le_bytes());

    let err = DxbcFile::parse(&bytes).unwrap_err();
    assert!(matches!(err, DxbcError::OutOfBounds { .. }));
    assert!(err.context().contains("chunk 0"));
    assert!(err.context().contains("header"));
}

#[test]
fn malformed_chunk_size_out_of_bounds_is_error() {
    let mut bytes = build_dxbc(&[(FourCC(*b"SHEX"), &[1, 2, 3])]);
    let chunk_offset = u32::from_le_bytes(
        bytes[OFFSET_TABLE_POS..OFFSET_TABLE_POS + 4].try_into().unwrap(),
    ) as usize;
    bytes[chunk_offset + 4..chunk_offset + 8].copy_from_slice(&u32::MAX.to_le_bytes());

    let err = DxbcFile::parse(&bytes).unwrap_err();
    // Depending on pointer width this is caught as overflow or bounds.
    assert!(matches!(
        err,
        DxbcError::MalformedOffsets { .. } | DxbcError::OutOfBounds { .. }
    ));
    assert!(err.context().contains("chunk 0"));
}

#[test]
fn malformed_chunk_offset_integer_wrap_is_error() {
    let mut bytes = build_dxbc(&[(FourCC(*b"SHEX"), &[1, 2, 3])]);
    bytes[OFFSET_TABLE_POS..OFFSET_TABLE_POS + 4].copy_from_slice(&u32::MAX.to_le_bytes());

    let err = DxbcFile::parse(&bytes).unwrap_err();
    assert!(matches!(
        err,
        DxbcError::MalformedOffsets { .. } | DxbcError::OutOfBounds { .. }
    ));
    assert!(err.context().contains("chunk 0"));
}

#[test]
fn parse_allows_misaligned_chunk_offsets() {
    // Fuzzed and some real-world containers do not keep chunk starts
    // 4-byte aligned; this must parse, not panic.
    let bytes = build_dxbc(&[
        (FourCC(*b"SHEX"), &[1]), // second chunk lands misaligned
        (FourCC(*b"JUNK"), &[2, 3]),
    ]);
    let second_off = u32::from_le_bytes(
        bytes[OFFSET_TABLE_POS + 4..OFFSET_TABLE_POS + 8].try_into().unwrap(),
    );
    assert!(second_off % 4 != 0);

    let file = DxbcFile::parse(&bytes).expect("parse should succeed");
    let chunks: Vec<_> = file.chunks().collect();
    assert_eq!(chunks[1].data, &[2, 3]);
}
