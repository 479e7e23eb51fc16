use airlift_translate::sm5::opcode::*;
use airlift_translate::sm5::{
    decode_program, DataType, DstKind, DstOperand, Inst, OperandModifier, PhaseKind, SrcKind,
    SrcOperand, Swizzle, WriteMask,
};
use airlift_translate::test_utils::*;
use airlift_translate::TranslateError;

fn dst_temp(index: u32, mask: WriteMask) -> DstOperand {
    DstOperand {
        kind: DstKind::Temp { index },
        mask,
        saturate: false,
        data_type: DataType::Unknown,
    }
}

fn src_temp(index: u32, swizzle: Swizzle) -> SrcOperand {
    SrcOperand {
        kind: SrcKind::Temp { index },
        swizzle,
        modifier: OperandModifier::None,
        data_type: DataType::Unknown,
    }
}

#[test]
fn decodes_mov_with_swizzle_and_mask() {
    let mut body = Vec::new();
    body.extend_from_slice(&dcl_temps(2));
    let mut mov = vec![opcode_token(OPCODE_MOV, 1 + 2 + 2)];
    mov.extend_from_slice(&dst_operand(OPERAND_TYPE_TEMP, 0, 0b0111));
    mov.extend_from_slice(&src_operand(
        OPERAND_TYPE_TEMP,
        &[1],
        Swizzle([1, 1, 2, 3]),
    ));
    body.extend_from_slice(&mov);
    body.extend_from_slice(&ret());

    let tokens = assemble_program(STAGE_PIXEL, 5, 0, &body);
    let program = decode_program(&tokens).expect("decode should succeed");
    let phase = &program.phases[0];
    assert_eq!(phase.kind, PhaseKind::Main);
    assert_eq!(phase.declared_temps, 2);

    assert_eq!(
        phase.insts[0],
        Inst::Mov {
            dst: dst_temp(0, WriteMask(0b0111)),
            src: src_temp(1, Swizzle([1, 1, 2, 3])),
        }
    );
    assert!(matches!(phase.insts[1], Inst::Ret));
}

#[test]
fn decodes_saturate_and_neg_modifier() {
    let mut body = Vec::new();
    body.extend_from_slice(&dcl_temps(2));
    // add_sat r0.xyzw, r1, -r1
    let mut add = vec![opcode_token(OPCODE_ADD, 1 + 2 + 2 + 3) | OPCODE_SAT_BIT];
    add.extend_from_slice(&dst_operand(OPERAND_TYPE_TEMP, 0, 0b1111));
    add.extend_from_slice(&src_operand(OPERAND_TYPE_TEMP, &[1], Swizzle::IDENTITY));
    // Extended operand: neg modifier.
    add.push(
        operand_token(
            OPERAND_TYPE_TEMP,
            2,
            OPERAND_SEL_SWIZZLE,
            swizzle_bits(Swizzle::IDENTITY),
            1,
        ) | OPERAND_EXTENDED_BIT,
    );
    add.push(EXTENDED_OPERAND_MODIFIER | (1 << OPERAND_MODIFIER_SHIFT));
    add.push(1);
    body.extend_from_slice(&add);
    body.extend_from_slice(&ret());

    let tokens = assemble_program(STAGE_PIXEL, 5, 0, &body);
    let program = decode_program(&tokens).expect("decode should succeed");
    let Inst::FloatBinary { dst, b, .. } = &program.phases[0].insts[0] else {
        panic!("expected float add, got {:?}", program.phases[0].insts[0]);
    };
    assert!(dst.saturate);
    assert_eq!(b.modifier, OperandModifier::Neg);
}

#[test]
fn decodes_immediate_vec4_and_scalar() {
    let mut body = Vec::new();
    body.extend_from_slice(&dcl_temps(1));
    let mut mov = vec![opcode_token(OPCODE_MOV, 1 + 2 + 5)];
    mov.extend_from_slice(&dst_operand(OPERAND_TYPE_TEMP, 0, 0b1111));
    mov.extend_from_slice(&imm32_vec4([
        1.0f32.to_bits(),
        2.0f32.to_bits(),
        3.0f32.to_bits(),
        4.0f32.to_bits(),
    ]));
    body.extend_from_slice(&mov);

    let mut mov2 = vec![opcode_token(OPCODE_MOV, 1 + 2 + 2)];
    mov2.extend_from_slice(&dst_operand(OPERAND_TYPE_TEMP, 0, 0b0001));
    mov2.extend_from_slice(&imm32_scalar(7));
    body.extend_from_slice(&mov2);
    body.extend_from_slice(&ret());

    let tokens = assemble_program(STAGE_COMPUTE, 5, 0, &body);
    let program = decode_program(&tokens).expect("decode should succeed");
    let Inst::Mov { src, .. } = &program.phases[0].insts[0] else {
        panic!("expected mov");
    };
    assert_eq!(
        src.kind,
        SrcKind::Immediate32([
            1.0f32.to_bits(),
            2.0f32.to_bits(),
            3.0f32.to_bits(),
            4.0f32.to_bits()
        ])
    );
    let Inst::Mov { src, .. } = &program.phases[0].insts[1] else {
        panic!("expected mov");
    };
    assert_eq!(src.kind, SrcKind::Immediate32([7; 4]));
}

#[test]
fn decodes_sample_with_texel_offsets() {
    let mut body = Vec::new();
    body.extend_from_slice(&dcl_resource_texture2d(0));
    body.extend_from_slice(&dcl_sampler(0));
    body.extend_from_slice(&dcl_temps(1));

    // sample with an extended opcode token carrying (-1, 2, 0).
    let mut sample =
        vec![opcode_token(OPCODE_SAMPLE, 1 + 1 + 2 + 2 + 2 + 2) | OPCODE_EXTENDED_BIT];
    sample.push(
        EXTENDED_OPCODE_SAMPLE_CONTROLS
            | (0xf << SAMPLE_CONTROLS_U_SHIFT)
            | (0x2 << SAMPLE_CONTROLS_V_SHIFT),
    );
    sample.extend_from_slice(&dst_operand(OPERAND_TYPE_TEMP, 0, 0b1111));
    sample.extend_from_slice(&src_operand(OPERAND_TYPE_TEMP, &[0], Swizzle::IDENTITY));
    sample.extend_from_slice(&resource_operand(OPERAND_TYPE_RESOURCE, 0));
    sample.extend_from_slice(&resource_operand(OPERAND_TYPE_SAMPLER, 0));
    body.extend_from_slice(&sample);
    body.extend_from_slice(&ret());

    let tokens = assemble_program(STAGE_PIXEL, 5, 0, &body);
    let program = decode_program(&tokens).expect("decode should succeed");
    let sample = program.phases[0]
        .insts
        .iter()
        .find_map(|inst| match inst {
            Inst::Sample { offset, resource, .. } => Some((offset, resource)),
            _ => None,
        })
        .expect("sample should decode");
    assert_eq!(*sample.0, [-1, 2, 0]);
    assert_eq!(sample.1.kind, SrcKind::Resource { slot: 0 });
}

#[test]
fn hull_phases_are_split_and_ordered() {
    let mut body = Vec::new();
    // Global declarations, then control point phase, then fork phase.
    body.push(opcode_token(OPCODE_DCL_INPUT_CONTROL_POINT_COUNT, 1) | (3 << CONTROL_POINT_COUNT_SHIFT));
    body.push(opcode_token(OPCODE_DCL_OUTPUT_CONTROL_POINT_COUNT, 1) | (3 << CONTROL_POINT_COUNT_SHIFT));
    body.push(opcode_token(OPCODE_DCL_TESS_DOMAIN, 1) | (TESS_DOMAIN_TRI << TESS_DOMAIN_SHIFT));
    body.push(
        opcode_token(OPCODE_DCL_TESS_PARTITIONING, 1)
            | (TESS_PARTITIONING_INTEGER << TESS_PARTITIONING_SHIFT),
    );
    body.push(opcode_token(OPCODE_HS_CONTROL_POINT_PHASE, 1));
    body.extend_from_slice(&dcl_temps(1));
    body.extend_from_slice(&ret());
    body.push(opcode_token(OPCODE_HS_FORK_PHASE, 1));
    body.push(opcode_token(OPCODE_DCL_HS_FORK_PHASE_INSTANCE_COUNT, 2));
    body.push(4);
    body.extend_from_slice(&ret());

    let tokens = assemble_program(STAGE_HULL, 5, 0, &body);
    let program = decode_program(&tokens).expect("decode should succeed");

    // Storage order: declarations, fork, then control point.
    let kinds: Vec<PhaseKind> = program.phases.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![PhaseKind::HullDecls, PhaseKind::HullFork, PhaseKind::HullControlPoint]
    );
    let fork = &program.phases[1];
    assert_eq!(fork.instance_count, 4);
}

#[test]
fn unknown_opcode_is_unsupported() {
    let body = vec![opcode_token(200, 1)];
    let tokens = assemble_program(STAGE_PIXEL, 5, 0, &body);
    let err = decode_program(&tokens).unwrap_err();
    assert!(matches!(err, TranslateError::Unsupported(_)), "{err:?}");
}

#[test]
fn truncated_program_is_malformed() {
    let mut body = vec![opcode_token(OPCODE_MOV, 10)];
    body.push(0);
    let tokens = assemble_program(STAGE_PIXEL, 5, 0, &body);
    let err = decode_program(&tokens).unwrap_err();
    assert!(matches!(err, TranslateError::Malformed(_)), "{err:?}");
}

#[test]
fn wrong_declared_length_is_malformed() {
    let mut tokens = assemble_program(STAGE_PIXEL, 5, 0, &ret());
    tokens[1] += 4;
    let err = decode_program(&tokens).unwrap_err();
    assert!(matches!(err, TranslateError::Malformed(_)), "{err:?}");
}

#[test]
fn shader_model_3_is_unsupported() {
    let tokens = assemble_program(STAGE_PIXEL, 3, 0, &ret());
    let err = decode_program(&tokens).unwrap_err();
    assert!(matches!(err, TranslateError::Unsupported(_)), "{err:?}");
}
