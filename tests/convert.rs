//! End-to-end conversions: hand-assembled DXBC containers through the
//! full pipeline, with assertions on the emitted module and the packaged
//! metallib.

use airlift::{convert, AttributeFormat, ConversionArgs, InputLayout, StepFunction, VertexAttribute};
use airlift_dxbc::{test_utils as dxbc, FourCC};
use airlift_translate::pipeline::convert_to_module;
use airlift_translate::sm5::opcode::*;
use airlift_translate::sm5::Swizzle;
use airlift_translate::test_utils::*;
use sha2::{Digest, Sha256};

fn read_u16(bytes: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes(bytes[pos..pos + 2].try_into().unwrap())
}
fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap())
}
fn read_u64(bytes: &[u8], pos: usize) -> u64 {
    u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap())
}

/// Walks the metallib function list collecting `(name, TYPE byte)` pairs.
fn function_records(metallib: &[u8]) -> Vec<(String, u8)> {
    assert_eq!(&metallib[0..4], b"MTLB");
    let list_offset = read_u64(metallib, 24) as usize;
    let count = read_u32(metallib, list_offset) as usize;
    let mut records = Vec::with_capacity(count);
    let mut pos = list_offset + 8;
    for _ in 0..count {
        assert_eq!(&metallib[pos..pos + 4], b"NAME");
        let name_len = read_u16(metallib, pos + 4) as usize;
        let name =
            String::from_utf8(metallib[pos + 6..pos + 6 + name_len - 1].to_vec()).unwrap();
        pos += 6 + name_len;
        let mut function_type = 0xff;
        loop {
            let tag = &metallib[pos..pos + 4];
            if tag == b"ENDT" {
                pos += 4;
                break;
            }
            let size = read_u16(metallib, pos + 4) as usize;
            if tag == b"TYPE" {
                function_type = metallib[pos + 6];
            }
            pos += 6 + size;
        }
        records.push((name, function_type));
    }
    records
}

/* Fixtures */

fn passthrough_vertex_dxbc() -> Vec<u8> {
    let isgn = build_signature_chunk(&[("POSITION", 0, 0, 3, 0, 0xF)]);
    // Output register 0 is SV_Position (system value 1).
    let osgn = build_signature_chunk(&[("SV_Position", 0, 1, 3, 0, 0xF)]);

    let mut body = Vec::new();
    body.extend_from_slice(&dcl_input(0, 0xF));
    body.extend_from_slice(&dcl_output(0, 0xF));
    let mut mov = vec![opcode_token(OPCODE_MOV, 1 + 2 + 2)];
    mov.extend_from_slice(&dst_operand(OPERAND_TYPE_OUTPUT, 0, 0xF));
    mov.extend_from_slice(&src_operand(OPERAND_TYPE_INPUT, &[0], Swizzle::IDENTITY));
    body.extend_from_slice(&mov);
    body.extend_from_slice(&ret());

    let tokens = assemble_program(STAGE_VERTEX, 5, 0, &body);
    dxbc::build_container(&[
        (FourCC(*b"ISGN"), &isgn),
        (FourCC(*b"OSGN"), &osgn),
        (FourCC(*b"SHEX"), &tokens_to_bytes(&tokens)),
    ])
}

fn sampling_fragment_dxbc() -> Vec<u8> {
    let isgn = build_signature_chunk(&[("TEXCOORD", 0, 0, 3, 0, 0x3)]);
    let osgn = build_signature_chunk(&[("SV_Target", 0, 0, 3, 0, 0xF)]);

    let mut body = Vec::new();
    body.extend_from_slice(&dcl_resource_texture2d(0));
    body.extend_from_slice(&dcl_sampler(0));
    body.extend_from_slice(&dcl_input_ps(0, 0x3, INTERPOLATION_LINEAR));
    body.extend_from_slice(&dcl_output(0, 0xF));
    body.extend_from_slice(&dcl_temps(1));

    // sample r0.xyzw, v0.xyxx, t0.xyzw, s0
    let mut sample = vec![opcode_token(OPCODE_SAMPLE, 1 + 2 + 2 + 2 + 2)];
    sample.extend_from_slice(&dst_operand(OPERAND_TYPE_TEMP, 0, 0xF));
    sample.extend_from_slice(&src_operand(
        OPERAND_TYPE_INPUT,
        &[0],
        Swizzle([0, 1, 0, 0]),
    ));
    sample.extend_from_slice(&resource_operand(OPERAND_TYPE_RESOURCE, 0));
    sample.extend_from_slice(&resource_operand(OPERAND_TYPE_SAMPLER, 0));
    body.extend_from_slice(&sample);

    let mut mov = vec![opcode_token(OPCODE_MOV, 1 + 2 + 2)];
    mov.extend_from_slice(&dst_operand(OPERAND_TYPE_OUTPUT, 0, 0xF));
    mov.extend_from_slice(&src_operand(OPERAND_TYPE_TEMP, &[0], Swizzle::IDENTITY));
    body.extend_from_slice(&mov);
    body.extend_from_slice(&ret());

    let tokens = assemble_program(STAGE_PIXEL, 5, 0, &body);
    dxbc::build_container(&[
        (FourCC(*b"ISGN"), &isgn),
        (FourCC(*b"OSGN"), &osgn),
        (FourCC(*b"SHEX"), &tokens_to_bytes(&tokens)),
    ])
}

fn tgsm_atomic_compute_dxbc() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&dcl_thread_group(64, 1, 1));
    body.extend_from_slice(&dcl_tgsm_raw(0, 1024));
    body.extend_from_slice(&dcl_temps(1));

    // imm_atomic_iadd r0.x, g0, l(0), l(1)
    let mut atomic = vec![opcode_token(OPCODE_IMM_ATOMIC_IADD, 1 + 2 + 2 + 2 + 2)];
    atomic.extend_from_slice(&dst_operand(OPERAND_TYPE_TEMP, 0, 0x1));
    atomic.extend_from_slice(&dst_operand(
        OPERAND_TYPE_THREAD_GROUP_SHARED_MEMORY,
        0,
        0xF,
    ));
    atomic.extend_from_slice(&imm32_scalar(0));
    atomic.extend_from_slice(&imm32_scalar(1));
    body.extend_from_slice(&atomic);

    // sync_g_t: tgsm + execution barrier.
    body.push(opcode_token(OPCODE_SYNC, 1) | SYNC_TGSM | SYNC_THREADS_IN_GROUP);
    body.extend_from_slice(&ret());

    let tokens = assemble_program(STAGE_COMPUTE, 5, 0, &body);
    dxbc::build_container(&[(FourCC(*b"SHEX"), &tokens_to_bytes(&tokens))])
}

fn discard_fragment_dxbc() -> Vec<u8> {
    let isgn = build_signature_chunk(&[("TEXCOORD", 0, 0, 3, 0, 0xF)]);
    let osgn = build_signature_chunk(&[("SV_Target", 0, 0, 3, 0, 0xF)]);

    let mut body = Vec::new();
    body.extend_from_slice(&dcl_input_ps(0, 0xF, INTERPOLATION_LINEAR));
    body.extend_from_slice(&dcl_output(0, 0xF));
    body.extend_from_slice(&dcl_temps(1));

    let mut mov = vec![opcode_token(OPCODE_MOV, 1 + 2 + 2)];
    mov.extend_from_slice(&dst_operand(OPERAND_TYPE_TEMP, 0, 0xF));
    mov.extend_from_slice(&src_operand(OPERAND_TYPE_INPUT, &[0], Swizzle::IDENTITY));
    body.extend_from_slice(&mov);

    // discard_nz r0.x
    let mut discard = vec![opcode_token(OPCODE_DISCARD, 1 + 2) | OPCODE_TEST_NONZERO_BIT];
    discard.extend_from_slice(&src_operand_select1(OPERAND_TYPE_TEMP, &[0], 0));
    body.extend_from_slice(&discard);

    let mut mov = vec![opcode_token(OPCODE_MOV, 1 + 2 + 2)];
    mov.extend_from_slice(&dst_operand(OPERAND_TYPE_OUTPUT, 0, 0xF));
    mov.extend_from_slice(&src_operand(OPERAND_TYPE_TEMP, &[0], Swizzle::IDENTITY));
    body.extend_from_slice(&mov);
    body.extend_from_slice(&ret());

    let tokens = assemble_program(STAGE_PIXEL, 5, 0, &body);
    dxbc::build_container(&[
        (FourCC(*b"ISGN"), &isgn),
        (FourCC(*b"OSGN"), &osgn),
        (FourCC(*b"SHEX"), &tokens_to_bytes(&tokens)),
    ])
}

/* Scenarios */

#[test]
fn passthrough_vertex_shader() {
    let bytecode = passthrough_vertex_dxbc();
    let module = convert_to_module(&bytecode, &ConversionArgs::default())
        .expect("conversion should succeed");
    assert!(module.get_function("vertex_main").is_some());
    assert_eq!(module.named_metadata.get("air.vertex").map(Vec::len), Some(1));

    let metallib = convert(&bytecode, &ConversionArgs::default()).unwrap();
    let records = function_records(&metallib);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, "vertex_main");
    assert_eq!(records[0].1, 0); // TYPE = vertex
}

#[test]
fn fragment_samples_a_2d_texture() {
    let bytecode = sampling_fragment_dxbc();
    let module = convert_to_module(&bytecode, &ConversionArgs::default())
        .expect("conversion should succeed");

    // The mangled symbol for a float texture2d sample.
    assert!(module.get_function("air.sample_texture_2d.f.v4f32").is_some());
    assert!(module.get_function("fragment_main").is_some());

    let metallib = convert(&bytecode, &ConversionArgs::default()).unwrap();
    let records = function_records(&metallib);
    assert_eq!(records[0].1, 1); // TYPE = fragment
}

#[test]
fn compute_with_group_shared_atomic() {
    let bytecode = tgsm_atomic_compute_dxbc();
    let module = convert_to_module(&bytecode, &ConversionArgs::default())
        .expect("conversion should succeed");

    assert!(module.get_function("air.atomic.local.add.u.i32").is_some());
    assert!(module.get_function("air.wg.barrier").is_some());

    let metallib = convert(&bytecode, &ConversionArgs::default()).unwrap();
    let records = function_records(&metallib);
    assert_eq!(records[0].1, 2); // TYPE = kernel
}

#[test]
fn pixel_discard_is_predicated() {
    let bytecode = discard_fragment_dxbc();
    let module = convert_to_module(&bytecode, &ConversionArgs::default())
        .expect("conversion should succeed");
    assert!(module.get_function("air.discard_fragment").is_some());

    // The discard call sits in its own conditional block.
    let main = module.get_function("fragment_main").unwrap();
    let body = module.func(main);
    let discard_blocks: Vec<_> = body
        .blocks
        .iter()
        .filter(|block| block.name.starts_with("discard"))
        .collect();
    assert!(discard_blocks.len() >= 2, "discard needs its own block and join");
}

#[test]
fn vertex_pulling_with_bgra_attribute() {
    let bytecode = passthrough_vertex_dxbc();
    let args = ConversionArgs {
        input_layout: Some(InputLayout {
            index_format: None,
            attributes: vec![VertexAttribute {
                slot: 0,
                format: AttributeFormat::UChar4NormalizedBgra,
                aligned_byte_offset: 0,
                step_function: StepFunction::PerVertex,
                step_rate: 0,
                reg: 0,
                mask: 0xF,
            }],
        }),
        ..ConversionArgs::default()
    };
    let module = convert_to_module(&bytecode, &args).expect("conversion should succeed");
    // Normalized BGRA pulls through the unorm unpack with a channel
    // shuffle; the null binding branch is part of the pulling prologue.
    assert!(module.get_function("air.unpack.unorm4x8.v4f32").is_some());
    let main = module.get_function("vertex_main").unwrap();
    let has_pull_blocks = module
        .func(main)
        .blocks
        .iter()
        .any(|block| block.name.starts_with("pull_vertex"));
    assert!(has_pull_blocks, "vertex pulling must guard the null binding");
}

#[test]
fn conversion_is_deterministic() {
    for bytecode in [
        passthrough_vertex_dxbc(),
        sampling_fragment_dxbc(),
        tgsm_atomic_compute_dxbc(),
        discard_fragment_dxbc(),
    ] {
        let a = convert(&bytecode, &ConversionArgs::default()).unwrap();
        let b = convert(&bytecode, &ConversionArgs::default()).unwrap();
        assert_eq!(Sha256::digest(&a), Sha256::digest(&b));
    }
}

#[test]
fn geometry_shaders_are_unsupported() {
    let tokens = assemble_program(STAGE_GEOMETRY, 5, 0, &ret());
    let bytecode = dxbc::build_container(&[(FourCC(*b"SHEX"), &tokens_to_bytes(&tokens))]);
    let err = convert(&bytecode, &ConversionArgs::default()).unwrap_err();
    assert!(matches!(err, airlift::ConvertError::Unsupported(_)), "{err:?}");
}

#[test]
fn malformed_container_is_rejected() {
    let err = convert(b"not a container", &ConversionArgs::default()).unwrap_err();
    assert!(matches!(err, airlift::ConvertError::Malformed(_)), "{err:?}");
}
