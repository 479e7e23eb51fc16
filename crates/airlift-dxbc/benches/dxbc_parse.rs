use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// Builds a container with a handful of realistically sized chunks.
fn build_fixture() -> Vec<u8> {
    let chunks: [(&[u8; 4], Vec<u8>); 4] = [
        (b"RDEF", vec![0u8; 2 * 1024]),
        (b"ISGN", vec![0u8; 256]),
        (b"OSGN", vec![0u8; 256]),
        (b"SHEX", vec![0u8; 16 * 1024]),
    ];
    let header_len = 4 + 16 + 4 + 4 + 4 + chunks.len() * 4;
    let mut offsets = Vec::new();
    let mut cursor = header_len;
    for (_, data) in &chunks {
        offsets.push(cursor as u32);
        cursor += 8 + data.len();
    }
    let mut bytes = Vec::with_capacity(cursor);
    bytes.extend_from_slice(b"DXBC");
    bytes.extend_from_slice(&[0u8; 16]);
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&(cursor as u32).to_le_bytes());
    bytes.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    for off in offsets {
        bytes.extend_from_slice(&off.to_le_bytes());
    }
    for (fourcc, data) in &chunks {
        bytes.extend_from_slice(*fourcc);
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(data);
    }
    bytes
}

fn bench_parse(c: &mut Criterion) {
    let bytes = build_fixture();
    c.bench_function("dxbc_parse_container", |b| {
        b.iter(|| {
            let file = airlift_dxbc::DxbcFile::parse(black_box(&bytes)).unwrap();
            black_box(file.chunks().count())
        })
    });
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
