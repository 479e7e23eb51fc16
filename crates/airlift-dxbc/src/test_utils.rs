use crate::FourCC;

/// Builds a minimal `DXBC` container containing the provided chunks.
///
/// The header is structurally valid (magic, offset table, `total_size`), but
/// the 16-byte checksum is left zeroed; the parser never verifies it and
/// tests only need structural validity.
pub fn build_container(chunks: &[(FourCC, &[u8])]) -> Vec<u8> {
    let header_size = 4 + 16 + 4 + 4 + 4 + 4 * chunks.len();
    let chunk_bytes = chunks.iter().map(|(_, data)| 8 + data.len()).sum::<usize>();

    let mut out = Vec::with_capacity(header_size + chunk_bytes);

    out.extend_from_slice(b"DXBC");
    out.extend_from_slice(&[0u8; 16]); // checksum
    out.extend_from_slice(&1u32.to_le_bytes()); // reserved
    out.extend_from_slice(&0u32.to_le_bytes()); // total_size placeholder

    let chunk_count = u32::try_from(chunks.len()).expect("DXBC chunk_count does not fit in u32");
    out.extend_from_slice(&chunk_count.to_le_bytes());

    let offsets_pos = out.len();
    out.resize(out.len() + 4 * chunks.len(), 0);

    let mut offsets = Vec::with_capacity(chunks.len());
    for (fourcc, data) in chunks {
        offsets.push(u32::try_from(out.len()).expect("DXBC chunk offset does not fit in u32"));
        let chunk_size = u32::try_from(data.len()).expect("DXBC chunk size does not fit in u32");
        out.extend_from_slice(&fourcc.0);
        out.extend_from_slice(&chunk_size.to_le_bytes());
        out.extend_from_slice(data);
    }

    for (i, offset) in offsets.iter().enumerate() {
        let pos = offsets_pos + i * 4;
        out[pos..pos + 4].copy_from_slice(&offset.to_le_bytes());
    }

    let total_size = u32::try_from(out.len()).expect("DXBC total_size does not fit in u32");
    out[24..28].copy_from_slice(&total_size.to_le_bytes());

    out
}

/// `build_container` over owned chunk payloads, for callers that assemble
/// token streams into `Vec<u8>` first.
pub fn build_container_owned(chunks: &[(FourCC, Vec<u8>)]) -> Vec<u8> {
    let borrowed: Vec<(FourCC, &[u8])> =
        chunks.iter().map(|(cc, data)| (*cc, data.as_slice())).collect();
    build_container(&borrowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DxbcFile;

    #[test]
    fn build_container_roundtrips_through_parser() {
        let shex = [1u8, 2, 3, 4];
        let bytes = build_container(&[(FourCC(*b"SHEX"), &shex)]);

        let file = DxbcFile::parse(&bytes).expect("built container should parse");
        assert_eq!(file.header().magic, FourCC(*b"DXBC"));
        assert_eq!(file.header().total_size as usize, bytes.len());
        assert_eq!(file.header().chunk_count, 1);

        let chunk = file.get_chunk(FourCC(*b"SHEX")).expect("missing SHEX");
        assert_eq!(chunk.data, &shex);
    }
}
