//! `.metallib` v2.7 container serialization.
//!
//! Layout: an 88-byte header, the function list (u32 count + tagged records
//! per function), an `ENDT` extended-header terminator, the public and
//! private metadata sections, and a single embedded bitcode blob shared by
//! every function record. All fields are little-endian; every function
//! record carries the SHA-256 of the bitcode.

use sha2::{Digest, Sha256};

use crate::bitcode;
use crate::ir::{MetadataId, Module};
use crate::AirError;

const MTLB_MAGIC: &[u8; 4] = b"MTLB";
const PLATFORM_MACOS: u16 = 0x8001;
const CONTAINER_VERSION: (u16, u16) = (2, 7);
const FILE_TYPE_EXECUTABLE: u8 = 0x00;
const OS_MACOS: u8 = 0x81;
const OS_VERSION: (u16, u16) = (14, 4);

/// `TYPE` tag payload per stage.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FunctionType {
    Vertex = 0x00,
    Fragment = 0x01,
    Kernel = 0x02,
    Mesh = 0x07,
    Object = 0x08,
}

const HEADER_SIZE: u64 = 88;

struct VertexAttribute {
    name: String,
    attribute: u8,
    type_code: u8,
}

struct FunctionRecord {
    name: String,
    function_type: FunctionType,
    /// `(patch type, control point count)`: 1 = triangle, 2 = quad.
    tess: Option<(u8, u8)>,
    vertex_attributes: Vec<VertexAttribute>,
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}
fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Maps an `air.arg_type_name` to the one-byte `VATY` type id.
fn vertex_attribute_type_code(type_name: &str) -> u8 {
    match type_name {
        "float4" => 0x06,
        "uint4" => 0x24,
        _ => 0x20,
    }
}

/// Walks a function's input metadata tuple collecting `air.vertex_input`
/// entries: `(location, type name, argument name)`.
fn collect_vertex_attributes(module: &Module, inputs: MetadataId) -> Vec<VertexAttribute> {
    let mut attributes = Vec::new();
    let Some(inputs) = module.md_as_tuple(inputs) else {
        return attributes;
    };
    for &input in inputs {
        let Some(fields) = module.md_as_tuple(input) else {
            continue;
        };
        if fields.len() < 2 || module.md_as_string(fields[1]) != Some("air.vertex_input") {
            continue;
        }
        let mut location = None;
        let mut type_name = None;
        let mut arg_name = None;
        let mut iter = fields.iter().peekable();
        while let Some(&field) = iter.next() {
            match module.md_as_string(field) {
                Some("air.location_index") => {
                    location = iter.peek().and_then(|&&next| module.md_as_u32(next));
                }
                Some("air.arg_type_name") => {
                    type_name = iter
                        .peek()
                        .and_then(|&&next| module.md_as_string(next))
                        .map(str::to_owned);
                }
                Some("air.arg_name") => {
                    arg_name = iter
                        .peek()
                        .and_then(|&&next| module.md_as_string(next))
                        .map(str::to_owned);
                }
                _ => {}
            }
        }
        if let (Some(location), Some(arg_name)) = (location, arg_name) {
            attributes.push(VertexAttribute {
                name: arg_name,
                attribute: location as u8,
                type_code: vertex_attribute_type_code(type_name.as_deref().unwrap_or("")),
            });
        }
    }
    attributes
}

fn collect_tess_tag(module: &Module, fn_tuple: &[MetadataId]) -> Option<(u8, u8)> {
    let patch = fn_tuple.get(3)?;
    let fields = module.md_as_tuple(*patch)?;
    if fields.len() != 3 || module.md_as_string(fields[0])? != "air.patch" {
        return None;
    }
    let patch_type = match module.md_as_string(fields[1])? {
        "triangle" => 1,
        _ => 2,
    };
    let control_points = module.md_as_u32(fields[2]).unwrap_or(0) as u8;
    Some((patch_type, control_points))
}

fn collect_functions(module: &Module) -> Result<Vec<FunctionRecord>, AirError> {
    // The five stage streams, in the container's enumeration order.
    const STREAMS: [(&str, FunctionType); 5] = [
        ("air.vertex", FunctionType::Vertex),
        ("air.fragment", FunctionType::Fragment),
        ("air.kernel", FunctionType::Kernel),
        ("air.object", FunctionType::Object),
        ("air.mesh", FunctionType::Mesh),
    ];
    let mut records = Vec::new();
    for (stream, function_type) in STREAMS {
        let Some(operands) = module.named_metadata.get(stream) else {
            continue;
        };
        for &fn_md in operands {
            let tuple = module.md_as_tuple(fn_md).ok_or_else(|| {
                AirError::Writer(format!("{stream} operand is not a tuple"))
            })?;
            let func = tuple
                .first()
                .and_then(|&f| module.md_as_function(f))
                .ok_or_else(|| {
                    AirError::Writer(format!("{stream} entry does not reference a function"))
                })?;
            let vertex_attributes = if function_type == FunctionType::Vertex {
                tuple
                    .get(2)
                    .map(|&inputs| collect_vertex_attributes(module, inputs))
                    .unwrap_or_default()
            } else {
                Vec::new()
            };
            records.push(FunctionRecord {
                name: module.func(func).name.clone(),
                function_type,
                tess: collect_tess_tag(module, tuple),
                vertex_attributes,
            });
        }
    }
    Ok(records)
}

/// Serializes `module` into a complete `.metallib` container.
pub fn write_metallib(module: &Module) -> Result<Vec<u8>, AirError> {
    let bitcode = bitcode::write_module(module);
    let hash: [u8; 32] = Sha256::digest(&bitcode).into();

    let records = collect_functions(module)?;
    tracing::debug!(
        functions = records.len(),
        bitcode_bytes = bitcode.len(),
        "writing metallib"
    );

    let mut function_list = Vec::new();
    let mut public_metadata = Vec::new();
    let mut private_metadata = Vec::new();

    for record in &records {
        function_list.extend_from_slice(b"NAME");
        let name_len = u16::try_from(record.name.len() + 1)
            .map_err(|_| AirError::Writer("function name too long".to_string()))?;
        push_u16(&mut function_list, name_len);
        function_list.extend_from_slice(record.name.as_bytes());
        function_list.push(0);

        function_list.extend_from_slice(b"TYPE");
        push_u16(&mut function_list, 1);
        function_list.push(record.function_type as u8);

        function_list.extend_from_slice(b"HASH");
        push_u16(&mut function_list, 0x20);
        function_list.extend_from_slice(&hash);

        function_list.extend_from_slice(b"MDSZ");
        push_u16(&mut function_list, 0x08);
        push_u64(&mut function_list, bitcode.len() as u64);

        function_list.extend_from_slice(b"OFFT");
        push_u16(&mut function_list, 0x18);
        push_u64(&mut function_list, public_metadata.len() as u64);
        push_u64(&mut function_list, private_metadata.len() as u64);
        push_u64(&mut function_list, 0); // all records share bitcode offset 0

        function_list.extend_from_slice(b"VERS");
        push_u16(&mut function_list, 0x08);
        push_u16(&mut function_list, 2); // AIR major
        push_u16(&mut function_list, 6); // AIR minor
        push_u16(&mut function_list, 3); // language major
        push_u16(&mut function_list, 1); // language minor

        if let Some((patch_type, control_points)) = record.tess {
            function_list.extend_from_slice(b"TESS");
            push_u16(&mut function_list, 1);
            function_list.push(patch_type | (control_points << 2));
        }

        function_list.extend_from_slice(b"ENDT");

        // Public metadata entry: u32 size + optional VATT/VATY + ENDT.
        let mut fn_public = Vec::new();
        if !record.vertex_attributes.is_empty() {
            fn_public.extend_from_slice(b"VATT");
            let size_pos = fn_public.len();
            push_u16(&mut fn_public, 0);
            push_u16(&mut fn_public, record.vertex_attributes.len() as u16);
            for attr in &record.vertex_attributes {
                fn_public.extend_from_slice(attr.name.as_bytes());
                fn_public.push(0);
                fn_public.push(attr.attribute);
                fn_public.push(0x80); // usage 0, active
            }
            let written = (fn_public.len() - size_pos) as u16;
            fn_public[size_pos..size_pos + 2].copy_from_slice(&(written - 2).to_le_bytes());

            fn_public.extend_from_slice(b"VATY");
            push_u16(&mut fn_public, 2 + record.vertex_attributes.len() as u16);
            push_u16(&mut fn_public, record.vertex_attributes.len() as u16);
            for attr in &record.vertex_attributes {
                fn_public.push(attr.type_code);
            }
        }
        fn_public.extend_from_slice(b"ENDT");

        push_u32(&mut public_metadata, fn_public.len() as u32);
        public_metadata.extend_from_slice(&fn_public);

        push_u32(&mut private_metadata, 4);
        private_metadata.extend_from_slice(b"ENDT");
    }

    let function_list_size = function_list.len() as u64 + 4;
    let public_metadata_offset = HEADER_SIZE + function_list_size + 4 + 4;
    let private_metadata_offset = public_metadata_offset + public_metadata.len() as u64;
    let bitcode_offset = private_metadata_offset + private_metadata.len() as u64;
    let file_size = HEADER_SIZE
        + 4 // function count
        + 4 // function list size
        + function_list.len() as u64
        + 4 // extended-header ENDT
        + public_metadata.len() as u64
        + private_metadata.len() as u64
        + bitcode.len() as u64;

    let mut out = Vec::with_capacity(file_size as usize);
    out.extend_from_slice(MTLB_MAGIC);
    push_u16(&mut out, PLATFORM_MACOS);
    push_u16(&mut out, CONTAINER_VERSION.0);
    push_u16(&mut out, CONTAINER_VERSION.1);
    out.push(FILE_TYPE_EXECUTABLE);
    out.push(OS_MACOS);
    push_u16(&mut out, OS_VERSION.0);
    push_u16(&mut out, OS_VERSION.1);
    push_u64(&mut out, file_size);
    push_u64(&mut out, HEADER_SIZE); // function list offset
    push_u64(&mut out, function_list_size);
    push_u64(&mut out, public_metadata_offset);
    push_u64(&mut out, public_metadata.len() as u64);
    push_u64(&mut out, private_metadata_offset);
    push_u64(&mut out, private_metadata.len() as u64);
    push_u64(&mut out, bitcode_offset);
    push_u64(&mut out, bitcode.len() as u64);
    debug_assert_eq!(out.len() as u64, HEADER_SIZE);

    push_u32(&mut out, records.len() as u32);
    push_u32(&mut out, function_list_size as u32);
    out.extend_from_slice(&function_list);
    out.extend_from_slice(b"ENDT");
    out.extend_from_slice(&public_metadata);
    out.extend_from_slice(&private_metadata);
    out.extend_from_slice(&bitcode);

    debug_assert_eq!(out.len() as u64, file_size);
    Ok(out)
}
