//! Hull + domain rewrite: a quad-domain hull shader paired with a
//! pass-through domain shader becomes an object + mesh pipeline.

use airlift::{convert, AttributeFormat, ConversionArgs, InputLayout, StepFunction, VertexAttribute};
use airlift_dxbc::{test_utils as dxbc, FourCC};
use airlift_translate::pipeline::convert_to_module;
use airlift_translate::sm5::opcode::*;
use airlift_translate::sm5::Swizzle;
use airlift_translate::test_utils::*;

fn read_u16(bytes: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes(bytes[pos..pos + 2].try_into().unwrap())
}
fn read_u64(bytes: &[u8], pos: usize) -> u64 {
    u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap())
}

/// Extracts `(TYPE, TESS payload)` of the first function record.
fn first_record_tags(metallib: &[u8]) -> (u8, Option<u8>) {
    let list_offset = read_u64(metallib, 24) as usize;
    let mut pos = list_offset + 8;
    assert_eq!(&metallib[pos..pos + 4], b"NAME");
    let name_len = read_u16(metallib, pos + 4) as usize;
    pos += 6 + name_len;
    let mut function_type = 0xff;
    let mut tess = None;
    loop {
        let tag = &metallib[pos..pos + 4];
        if tag == b"ENDT" {
            break;
        }
        let size = read_u16(metallib, pos + 4) as usize;
        match tag {
            b"TYPE" => function_type = metallib[pos + 6],
            b"TESS" => tess = Some(metallib[pos + 6]),
            _ => {}
        }
        pos += 6 + size;
    }
    (function_type, tess)
}

fn vertex_dxbc() -> Vec<u8> {
    let isgn = build_signature_chunk(&[("POSITION", 0, 0, 3, 0, 0xF)]);
    let osgn = build_signature_chunk(&[("POSITION", 0, 0, 3, 0, 0xF)]);

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

fn patch_constant_signature() -> Vec<u8> {
    build_signature_chunk(&[
        ("SV_TessFactor", 0, 11, 3, 0, 0x1),
        ("SV_TessFactor", 1, 11, 3, 1, 0x1),
        ("SV_TessFactor", 2, 11, 3, 2, 0x1),
        ("SV_TessFactor", 3, 11, 3, 3, 0x1),
        ("SV_InsideTessFactor", 0, 12, 3, 4, 0x1),
        ("SV_InsideTessFactor", 1, 12, 3, 5, 0x1),
    ])
}

fn hull_dxbc() -> Vec<u8> {
    let isgn = build_signature_chunk(&[("POSITION", 0, 0, 3, 0, 0xF)]);
    let osgn = build_signature_chunk(&[("POSITION", 0, 0, 3, 0, 0xF)]);
    let pcsg = patch_constant_signature();

    let mut body = Vec::new();
    body.push(opcode_token(OPCODE_HS_DECLS, 1));
    body.push(
        opcode_token(OPCODE_DCL_INPUT_CONTROL_POINT_COUNT, 1)
            | (4 << CONTROL_POINT_COUNT_SHIFT),
    );
    body.push(
        opcode_token(OPCODE_DCL_OUTPUT_CONTROL_POINT_COUNT, 1)
            | (4 << CONTROL_POINT_COUNT_SHIFT),
    );
    body.push(opcode_token(OPCODE_DCL_TESS_DOMAIN, 1) | (TESS_DOMAIN_QUAD << TESS_DOMAIN_SHIFT));
    body.push(
        opcode_token(OPCODE_DCL_TESS_PARTITIONING, 1)
            | (TESS_PARTITIONING_INTEGER << TESS_PARTITIONING_SHIFT),
    );
    body.push(
        opcode_token(OPCODE_DCL_TESS_OUTPUT_PRIMITIVE, 1)
            | (TESS_OUTPUT_TRIANGLE_CW << TESS_OUTPUT_PRIMITIVE_SHIFT),
    );
    body.push(opcode_token(OPCODE_DCL_HS_MAX_TESSFACTOR, 2));
    body.push(8.0f32.to_bits());

    // Control-point phase: pass the input control point through.
    body.push(opcode_token(OPCODE_HS_CONTROL_POINT_PHASE, 1));
    body.extend_from_slice(&dcl_output(0, 0xF));
    body.extend_from_slice(&dcl_temps(1));
    let mut mov = vec![opcode_token(OPCODE_MOV, 1 + 2 + 5)];
    mov.extend_from_slice(&dst_operand(OPERAND_TYPE_OUTPUT, 0, 0xF));
    mov.extend_from_slice(&imm32_vec4([
        0.0f32.to_bits(),
        0.0f32.to_bits(),
        0.0f32.to_bits(),
        1.0f32.to_bits(),
    ]));
    body.extend_from_slice(&mov);
    body.extend_from_slice(&ret());

    // Fork phase: write the six factors.
    body.push(opcode_token(OPCODE_HS_FORK_PHASE, 1));
    body.extend_from_slice(&dcl_temps(1));
    for reg in 0..6u32 {
        let mut mov = vec![opcode_token(OPCODE_MOV, 1 + 2 + 2)];
        mov.extend_from_slice(&dst_operand(OPERAND_TYPE_OUTPUT, reg, 0x1));
        mov.extend_from_slice(&imm32_scalar(8.0f32.to_bits()));
        body.extend_from_slice(&mov);
    }
    body.extend_from_slice(&ret());

    let tokens = assemble_program(STAGE_HULL, 5, 0, &body);
    dxbc::build_container(&[
        (FourCC(*b"ISGN"), &isgn),
        (FourCC(*b"OSGN"), &osgn),
        (FourCC(*b"PCSG"), &pcsg),
        (FourCC(*b"SHEX"), &tokens_to_bytes(&tokens)),
    ])
}

fn domain_dxbc() -> Vec<u8> {
    let osgn = build_signature_chunk(&[("SV_Position", 0, 1, 3, 0, 0xF)]);
    let pcsg = patch_constant_signature();

    let mut body = Vec::new();
    body.push(opcode_token(OPCODE_DCL_TESS_DOMAIN, 1) | (TESS_DOMAIN_QUAD << TESS_DOMAIN_SHIFT));
    body.push(
        opcode_token(OPCODE_DCL_INPUT_CONTROL_POINT_COUNT, 1)
            | (4 << CONTROL_POINT_COUNT_SHIFT),
    );
    body.extend_from_slice(&dcl_output(0, 0xF));
    body.extend_from_slice(&dcl_temps(1));

    // o0 = float4(domain.xy, 0, 1) via the domain-point operand.
    let mut mov = vec![opcode_token(OPCODE_MOV, 1 + 2 + 1)];
    mov.extend_from_slice(&dst_operand(OPERAND_TYPE_OUTPUT, 0, 0xF));
    mov.push(operand_token(
        OPERAND_TYPE_INPUT_DOMAIN_POINT,
        2,
        OPERAND_SEL_SWIZZLE,
        swizzle_bits(Swizzle::IDENTITY),
        0,
    ));
    body.extend_from_slice(&mov);
    body.extend_from_slice(&ret());

    let tokens = assemble_program(STAGE_DOMAIN, 5, 0, &body);
    dxbc::build_container(&[
        (FourCC(*b"OSGN"), &osgn),
        (FourCC(*b"PCSG"), &pcsg),
        (FourCC(*b"SHEX"), &tokens_to_bytes(&tokens)),
    ])
}

fn hull_args() -> ConversionArgs {
    ConversionArgs {
        input_layout: Some(InputLayout {
            index_format: None,
            attributes: vec![VertexAttribute {
                slot: 0,
                format: AttributeFormat::Float4,
                aligned_byte_offset: 0,
                step_function: StepFunction::PerVertex,
                step_rate: 0,
                reg: 0,
                mask: 0xF,
            }],
        }),
        companion: Some(vertex_dxbc()),
        ..ConversionArgs::default()
    }
}

#[test]
fn hull_converts_to_an_object_function() {
    let module =
        convert_to_module(&hull_dxbc(), &hull_args()).expect("hull conversion should succeed");
    assert!(module.get_function("object_main").is_some());
    assert_eq!(module.named_metadata.get("air.object").map(Vec::len), Some(1));
    assert!(module
        .get_function("air.set_threadgroups_per_grid_mesh_properties")
        .is_some());
    // Patch batching reconverges through threadgroup barriers.
    assert!(module.get_function("air.wg.barrier").is_some());

    let metallib = convert(&hull_dxbc(), &hull_args()).unwrap();
    let (function_type, tess) = first_record_tags(&metallib);
    assert_eq!(function_type, 8); // TYPE = object
    // TESS: quad (2) with 4 control points.
    assert_eq!(tess, Some(2 | (4 << 2)));
}

#[test]
fn domain_converts_to_a_mesh_function() {
    let args = ConversionArgs {
        companion: Some(hull_dxbc()),
        ..ConversionArgs::default()
    };
    let module =
        convert_to_module(&domain_dxbc(), &args).expect("domain conversion should succeed");
    assert!(module.get_function("mesh_main").is_some());
    assert_eq!(module.named_metadata.get("air.mesh").map(Vec::len), Some(1));
    // Position goes out through the sanitized mesh store.
    assert!(module.get_function("air.set_position_mesh").is_some());
    assert!(module.get_function("air.set_index_mesh").is_some());
    assert!(module.get_function("air.set_primitive_count_mesh").is_some());

    // Sanitation selects against the clipped fallback before the call.
    let mesh = module.get_function("mesh_main").unwrap();
    let has_select = module
        .func(mesh)
        .insts
        .iter()
        .any(|data| matches!(data.inst, airlift_air::ir::Inst::Select { .. }));
    assert!(has_select, "set_position_mesh must sanitize non-finite lanes");

    let metallib = convert(&domain_dxbc(), &args).unwrap();
    let (function_type, tess) = first_record_tags(&metallib);
    assert_eq!(function_type, 7); // TYPE = mesh
    assert_eq!(tess, Some(2 | (4 << 2)));
}

#[test]
fn hull_without_companion_is_rejected() {
    let err = convert(&hull_dxbc(), &ConversionArgs::default()).unwrap_err();
    assert!(matches!(err, airlift::ConvertError::Unsupported(_)), "{err:?}");
}
