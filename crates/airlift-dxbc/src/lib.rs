//! Parser for the DXBC container format produced by the D3D shader
//! compilers (FXC/DXC).
//!
//! A container is a fixed 32-byte header (`DXBC` magic, 16-byte checksum,
//! reserved word, declared total size, chunk count) followed by a chunk
//! offset table and the chunks themselves. Each chunk is a FourCC + size +
//! payload. The declared `total_size` is authoritative: everything past it
//! is ignored, and chunks reaching past it are rejected.
//!
//! Parsing is zero-copy; [`DxbcFile`] borrows the input buffer and hands out
//! `&[u8]` chunk payloads. The 16-byte checksum is not verified.

pub mod rdef;
pub mod signature;

pub use rdef::{
    parse_rdef_chunk, ConstantBufferDesc, RdefChunk, ResourceBindingDesc, ShaderVariableDesc,
    ShaderVariableType,
};
pub use signature::{parse_signature_chunk, Signature, SignatureParameter};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use thiserror::Error;

/// A four-character chunk tag, e.g. `FourCC(*b"SHEX")`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl std::fmt::Debug for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "FourCC({s:?})"),
            Err(_) => write!(f, "FourCC({:02x?})", self.0),
        }
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "{:02x?}", self.0),
        }
    }
}

#[derive(Debug, Error)]
pub enum DxbcError {
    #[error("malformed DXBC header: {context}")]
    MalformedHeader { context: String },
    #[error("malformed DXBC chunk offset table: {context}")]
    MalformedOffsets { context: String },
    #[error("DXBC data out of bounds: {context}")]
    OutOfBounds { context: String },
    #[error("invalid DXBC chunk: {context}")]
    InvalidChunk { context: String },
}

impl DxbcError {
    /// The human-readable detail string, for matching in diagnostics.
    pub fn context(&self) -> &str {
        match self {
            DxbcError::MalformedHeader { context }
            | DxbcError::MalformedOffsets { context }
            | DxbcError::OutOfBounds { context }
            | DxbcError::InvalidChunk { context } => context,
        }
    }
}

/// Fixed container header, 32 bytes on disk.
#[derive(Debug, Clone, Copy)]
pub struct DxbcHeader {
    pub magic: FourCC,
    pub checksum: [u8; 16],
    pub reserved: u32,
    pub total_size: u32,
    pub chunk_count: u32,
}

pub const DXBC_HEADER_SIZE: usize = 32;

/// Upper bound on `chunk_count`; real containers have well under a dozen
/// chunks, and a hostile count must not make us validate a gigantic table.
pub const MAX_CHUNK_COUNT: u32 = 4096;

#[derive(Debug, Clone, Copy)]
pub struct DxbcChunk<'a> {
    pub fourcc: FourCC,
    pub data: &'a [u8],
}

#[derive(Debug)]
pub struct DxbcFile<'a> {
    bytes: &'a [u8],
    header: DxbcHeader,
    /// Offsets of each chunk header, validated against `total_size`.
    chunk_offsets: Vec<u32>,
}

fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap())
}

impl<'a> DxbcFile<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DxbcError> {
        if bytes.len() < DXBC_HEADER_SIZE {
            return Err(DxbcError::MalformedHeader {
                context: format!(
                    "need at least {DXBC_HEADER_SIZE} bytes, got {}",
                    bytes.len()
                ),
            });
        }
        let magic = FourCC(bytes[0..4].try_into().unwrap());
        if magic != FourCC(*b"DXBC") {
            return Err(DxbcError::MalformedHeader {
                context: format!("bad magic {magic:?}"),
            });
        }
        let mut checksum = [0u8; 16];
        checksum.copy_from_slice(&bytes[4..20]);
        let reserved = read_u32(bytes, 20);
        let total_size = read_u32(bytes, 24);
        let chunk_count = read_u32(bytes, 28);

        if (total_size as usize) < DXBC_HEADER_SIZE {
            return Err(DxbcError::MalformedHeader {
                context: format!("total_size {total_size} smaller than header"),
            });
        }
        if total_size as usize > bytes.len() {
            return Err(DxbcError::OutOfBounds {
                context: format!(
                    "total_size {total_size} exceeds buffer length {}",
                    bytes.len()
                ),
            });
        }
        if chunk_count > MAX_CHUNK_COUNT {
            return Err(DxbcError::MalformedOffsets {
                context: format!("chunk_count {chunk_count} exceeds maximum {MAX_CHUNK_COUNT}"),
            });
        }

        let table_start = DXBC_HEADER_SIZE;
        let table_end = table_start + chunk_count as usize * 4;
        if table_end > total_size as usize {
            return Err(DxbcError::MalformedOffsets {
                context: format!(
                    "chunk offset table ends at {table_end}, past total_size {total_size}"
                ),
            });
        }

        let mut chunk_offsets = Vec::with_capacity(chunk_count as usize);
        for i in 0..chunk_count as usize {
            let offset = read_u32(bytes, table_start + i * 4);
            // A chunk may not live inside the fixed header or the offset
            // table; both would alias the metadata we just parsed.
            if (offset as usize) < DXBC_HEADER_SIZE {
                return Err(DxbcError::MalformedOffsets {
                    context: format!("chunk {i} offset {offset} points into DXBC header"),
                });
            }
            if (offset as usize) < table_end {
                return Err(DxbcError::MalformedOffsets {
                    context: format!("chunk {i} offset {offset} points into chunk offset table"),
                });
            }
            let header_end = (offset as usize).checked_add(8).ok_or_else(|| {
                DxbcError::MalformedOffsets {
                    context: format!("chunk {i} offset {offset} overflows"),
                }
            })?;
            if header_end > total_size as usize {
                return Err(DxbcError::OutOfBounds {
                    context: format!("chunk {i} header at {offset} is outside total_size"),
                });
            }
            let fourcc = FourCC(bytes[offset as usize..offset as usize + 4].try_into().unwrap());
            let size = read_u32(bytes, offset as usize + 4);
            let data_end = header_end.checked_add(size as usize).ok_or_else(|| {
                DxbcError::MalformedOffsets {
                    context: format!("chunk {i} ({fourcc}) size {size} overflows"),
                }
            })?;
            if data_end > total_size as usize {
                return Err(DxbcError::OutOfBounds {
                    context: format!(
                        "chunk {i} ({fourcc}) data of size {size} is outside total_size"
                    ),
                });
            }
            chunk_offsets.push(offset);
        }

        tracing::trace!(total_size, chunk_count, "parsed DXBC container");

        Ok(DxbcFile {
            bytes,
            header: DxbcHeader {
                magic,
                checksum,
                reserved,
                total_size,
                chunk_count,
            },
            chunk_offsets,
        })
    }

    pub fn header(&self) -> &DxbcHeader {
        &self.header
    }

    fn chunk_at(&self, offset: u32) -> DxbcChunk<'a> {
        let offset = offset as usize;
        let fourcc = FourCC(self.bytes[offset..offset + 4].try_into().unwrap());
        let size = read_u32(self.bytes, offset + 4) as usize;
        DxbcChunk {
            fourcc,
            data: &self.bytes[offset + 8..offset + 8 + size],
        }
    }

    pub fn chunks(&self) -> impl Iterator<Item = DxbcChunk<'a>> + '_ {
        self.chunk_offsets.iter().map(|&off| self.chunk_at(off))
    }

    pub fn get_chunk(&self, fourcc: FourCC) -> Option<DxbcChunk<'a>> {
        self.chunks().find(|c| c.fourcc == fourcc)
    }

    pub fn get_chunks(&self, fourcc: FourCC) -> impl Iterator<Item = DxbcChunk<'a>> + '_ {
        self.chunks().filter(move |c| c.fourcc == fourcc)
    }

    /// The program-token chunk, whichever of the two tags it uses. `SHEX` is
    /// the SM5 tag, `SHDR` the SM4 one; both carry the same token stream.
    pub fn shader_chunk(&self) -> Option<DxbcChunk<'a>> {
        self.get_chunk(FourCC(*b"SHEX"))
            .or_else(|| self.get_chunk(FourCC(*b"SHDR")))
    }

    /// Looks up a signature chunk and parses it, falling back between the
    /// base and v1 chunk tags (`ISGN`/`ISG1`, `OSGN`/`OSG5`/`OSG1`,
    /// `PCSG`/`PSG1`) so callers may ask with either naming.
    pub fn get_signature(&self, fourcc: FourCC) -> Option<Result<Signature, DxbcError>> {
        let aliases: &[FourCC] = match &fourcc.0 {
            b"ISGN" | b"ISG1" => &[FourCC(*b"ISGN"), FourCC(*b"ISG1")],
            b"OSGN" | b"OSG5" | b"OSG1" => {
                &[FourCC(*b"OSGN"), FourCC(*b"OSG5"), FourCC(*b"OSG1")]
            }
            b"PCSG" | b"PSG1" => &[FourCC(*b"PCSG"), FourCC(*b"PSG1")],
            _ => return self.get_chunk(fourcc).map(|c| parse_signature_chunk(c.data)),
        };
        for tag in aliases {
            if let Some(chunk) = self.get_chunk(*tag) {
                return Some(signature::parse_signature_chunk_tagged(chunk.data, *tag));
            }
        }
        None
    }

    /// One-line-per-chunk summary for diagnostics.
    pub fn debug_summary(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "DXBC total_size={} chunks={}",
            self.header.total_size, self.header.chunk_count
        );
        for (i, chunk) in self.chunks().enumerate() {
            let _ = writeln!(out, "  chunk {i}: {} ({} bytes)", chunk.fourcc, chunk.data.len());
        }
        out
    }
}
