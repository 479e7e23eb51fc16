use airlift_translate::dtype::analyze_phase;
use airlift_translate::sm5::{
    DataType, Decl, DstKind, DstOperand, FloatBinaryOp, Inst, IntBinaryOp, Phase, PhaseKind,
    SrcKind, SrcOperand, Swizzle, WriteMask,
};

fn phase_with(declared_temps: u32, insts: Vec<Inst>) -> Phase {
    let mut phase = Phase::new(PhaseKind::Main);
    phase.declared_temps = declared_temps;
    phase.decls.push(Decl::Temps { count: declared_temps });
    phase.insts = insts;
    phase
}

fn dst_temp(index: u32, mask: u8) -> DstOperand {
    DstOperand::new(DstKind::Temp { index }, WriteMask(mask))
}

fn src_temp(index: u32) -> SrcOperand {
    SrcOperand::new(SrcKind::Temp { index })
}

fn src_imm(values: [u32; 4]) -> SrcOperand {
    SrcOperand::new(SrcKind::Immediate32(values))
}

#[test]
fn float_only_register_keeps_one_slot() {
    let mut phase = phase_with(
        1,
        vec![Inst::FloatBinary {
            op: FloatBinaryOp::Add,
            dst: dst_temp(0, 0b1111),
            a: src_temp(0),
            b: src_temp(0),
        }],
    );
    let types = analyze_phase(&mut phase);
    assert_eq!(types.types.len(), 1);
    assert_eq!(types.type_of(0), DataType::Float);
    assert_eq!(types.count_of(DataType::Float), 1);
}

#[test]
fn mixed_register_splits_per_type() {
    // r0 consumed as float by an add and as uint by an and: two final
    // registers, one per type.
    let mut phase = phase_with(
        1,
        vec![
            Inst::FloatBinary {
                op: FloatBinaryOp::Add,
                dst: dst_temp(0, 0b0011),
                a: src_temp(0),
                b: src_temp(0),
            },
            Inst::IntBinary {
                op: IntBinaryOp::And,
                dst: dst_temp(0, 0b1100),
                a: src_temp(0),
                b: src_temp(0),
            },
        ],
    );
    let types = analyze_phase(&mut phase);
    assert_eq!(types.types.len(), 2);
    assert!(types.types.contains(&DataType::Float));
    assert!(types.types.contains(&DataType::Uint));
    // Every final register records its original.
    assert!(types.split_info.iter().all(|s| s.original == 0));

    // The rewritten instructions must reference distinct registers now.
    let regs: Vec<u32> = phase
        .insts
        .iter()
        .map(|inst| match inst {
            Inst::FloatBinary { dst, .. } | Inst::IntBinary { dst, .. } => match dst.kind {
                DstKind::Temp { index } => index,
                _ => panic!("unexpected dst"),
            },
            other => panic!("unexpected inst {other:?}"),
        })
        .collect();
    assert_ne!(regs[0], regs[1]);
}

#[test]
fn split_tail_mask_is_rebased() {
    // Float only in .yzw, uint only in .x: the float split register is a
    // pure tail and rebases so later reads of .yzw become .xyz.
    let src_x = SrcOperand {
        swizzle: Swizzle::broadcast(0),
        ..src_temp(0)
    };
    let src_tail = SrcOperand {
        swizzle: Swizzle([1, 2, 3, 3]),
        ..src_temp(0)
    };
    let mut phase = phase_with(
        1,
        vec![
            Inst::IntBinary {
                op: IntBinaryOp::And,
                dst: dst_temp(0, 0b0001),
                a: src_x.clone(),
                b: src_x,
            },
            Inst::FloatBinary {
                op: FloatBinaryOp::Mul,
                dst: dst_temp(0, 0b1110),
                a: src_tail.clone(),
                b: src_tail,
            },
        ],
    );
    let types = analyze_phase(&mut phase);
    let float_reg = types
        .types
        .iter()
        .position(|&t| t == DataType::Float)
        .expect("float split register");
    assert_eq!(types.split_info[float_reg].rebase, 1);
    assert_eq!(types.split_info[float_reg].component_count, 3);
    let uint_reg = types
        .types
        .iter()
        .position(|&t| t == DataType::Uint)
        .expect("uint split register");
    assert_eq!(types.split_info[uint_reg].rebase, 0);
}

#[test]
fn swapc_expands_to_two_conditional_moves() {
    let mut phase = phase_with(
        3,
        vec![Inst::SwapC {
            dst0: dst_temp(0, 0b1111),
            dst1: dst_temp(1, 0b1111),
            cond: src_temp(2),
            a: src_temp(0),
            b: src_temp(1),
        }],
    );
    analyze_phase(&mut phase);
    assert_eq!(phase.insts.len(), 2);
    assert!(matches!(phase.insts[0], Inst::MovC { .. }));
    assert!(matches!(phase.insts[1], Inst::MovC { .. }));
}

#[test]
fn immediate_vector_movs_are_unvectorized() {
    let mut phase = phase_with(
        1,
        vec![Inst::Mov {
            dst: dst_temp(0, 0b0111),
            src: src_imm([10, 20, 30, 40]),
        }],
    );
    analyze_phase(&mut phase);
    // One move per enabled lane, each with a single-lane mask and the
    // lane's own immediate.
    assert_eq!(phase.insts.len(), 3);
    for (lane, inst) in phase.insts.iter().enumerate() {
        let Inst::Mov { dst, src } = inst else {
            panic!("expected mov, got {inst:?}");
        };
        assert_eq!(dst.mask.0, 1 << lane);
        let SrcKind::Immediate32(values) = &src.kind else {
            panic!("expected immediate");
        };
        assert_eq!(values[0], [10, 20, 30][lane]);
        assert_eq!(src.swizzle, Swizzle::broadcast(lane as u8));
    }
}

#[test]
fn mov_links_propagate_types_to_copies() {
    // r1 = r0 (mov); r0 used as float. r1 should resolve float too.
    let mut phase = phase_with(
        2,
        vec![
            Inst::FloatBinary {
                op: FloatBinaryOp::Add,
                dst: dst_temp(0, 0b1111),
                a: src_temp(0),
                b: src_temp(0),
            },
            Inst::Mov { dst: dst_temp(1, 0b1111), src: src_temp(0) },
        ],
    );
    let types = analyze_phase(&mut phase);
    let Inst::Mov { dst, .. } = &phase.insts[1] else {
        panic!("expected mov");
    };
    let DstKind::Temp { index } = dst.kind else {
        panic!("expected temp dst");
    };
    assert_eq!(types.type_of(index), DataType::Float);
}
