use airlift_translate::cfg::{build_cfg, Terminator};
use airlift_translate::sm5::{Inst, Phase, PhaseKind, SrcKind, SrcOperand};
use airlift_translate::TranslateError;

fn phase_with(kind: PhaseKind, insts: Vec<Inst>) -> Phase {
    let mut phase = Phase::new(kind);
    phase.insts = insts;
    phase
}

fn cond() -> SrcOperand {
    SrcOperand::new(SrcKind::Temp { index: 0 })
}

fn assert_no_undefined(cfg: &airlift_translate::cfg::ControlFlowGraph) {
    for (index, block) in cfg.blocks.iter().enumerate() {
        assert!(
            !matches!(block.terminator, Terminator::Undefined),
            "block {index} ({}) left undefined",
            block.name
        );
    }
}

#[test]
fn straight_line_code_is_one_block_to_return() {
    let phase = phase_with(PhaseKind::Main, vec![Inst::Nop, Inst::Ret]);
    let cfg = build_cfg(&phase).expect("cfg should build");
    assert_no_undefined(&cfg);

    let entry = cfg.block(cfg.entry);
    assert_eq!(entry.insts.len(), 1);
    let Terminator::Branch { target } = entry.terminator else {
        panic!("entry should branch to return");
    };
    assert_eq!(target, cfg.ret);
    assert!(matches!(cfg.block(cfg.ret).terminator, Terminator::Return));
}

#[test]
fn if_else_joins_at_a_single_block() {
    let phase = phase_with(
        PhaseKind::Main,
        vec![
            Inst::If { nonzero: true, src: cond() },
            Inst::Nop,
            Inst::Else,
            Inst::Nop,
            Inst::EndIf,
            Inst::Ret,
        ],
    );
    let cfg = build_cfg(&phase).expect("cfg should build");
    assert_no_undefined(&cfg);

    let Terminator::CondBranch { if_true, if_false, test_nonzero, .. } =
        &cfg.block(cfg.entry).terminator
    else {
        panic!("entry should be a conditional branch");
    };
    assert!(test_nonzero);
    // Both sides branch to the same join block.
    let Terminator::Branch { target: true_join } = cfg.block(*if_true).terminator else {
        panic!("true side should branch");
    };
    let Terminator::Branch { target: false_join } = cfg.block(*if_false).terminator else {
        panic!("false side should branch");
    };
    assert_eq!(true_join, false_join);
}

#[test]
fn loop_has_back_edge_and_break_exits() {
    let phase = phase_with(
        PhaseKind::Main,
        vec![
            Inst::Loop,
            Inst::BreakC { nonzero: true, src: cond() },
            Inst::Nop,
            Inst::EndLoop,
            Inst::Ret,
        ],
    );
    let cfg = build_cfg(&phase).expect("cfg should build");
    assert_no_undefined(&cfg);

    // Find the header: the entry branches to it.
    let Terminator::Branch { target: header } = cfg.block(cfg.entry).terminator else {
        panic!("entry should branch to the loop header");
    };
    // The header holds the conditional break: true to merge, false to
    // the body, and the body's tail branches back to the header.
    let Terminator::CondBranch { if_true: merge, if_false: body, .. } =
        &cfg.block(header).terminator
    else {
        panic!("expected conditional break in header");
    };
    let Terminator::Branch { target: back } = cfg.block(*body).terminator else {
        panic!("body should branch");
    };
    assert_eq!(back, header, "endloop must branch back to the header");
    let Terminator::Branch { target: after } = cfg.block(*merge).terminator else {
        panic!("merge should branch on");
    };
    assert_eq!(after, cfg.ret);
}

#[test]
fn continue_targets_loop_header() {
    let phase = phase_with(
        PhaseKind::Main,
        vec![
            Inst::Loop,
            Inst::ContinueC { nonzero: false, src: cond() },
            Inst::Break,
            Inst::EndLoop,
            Inst::Ret,
        ],
    );
    let cfg = build_cfg(&phase).expect("cfg should build");
    assert_no_undefined(&cfg);

    let Terminator::Branch { target: header } = cfg.block(cfg.entry).terminator else {
        panic!("entry should branch to header");
    };
    let Terminator::CondBranch { if_true, .. } = &cfg.block(header).terminator else {
        panic!("expected continuec");
    };
    assert_eq!(*if_true, header, "continue must target the header");
}

#[test]
fn switch_suppresses_fallthrough() {
    let phase = phase_with(
        PhaseKind::Main,
        vec![
            Inst::Switch { src: cond() },
            Inst::Case { value: 1 },
            Inst::Nop,
            Inst::Case { value: 2 },
            Inst::Nop,
            Inst::Default,
            Inst::Nop,
            Inst::EndSwitch,
            Inst::Ret,
        ],
    );
    let cfg = build_cfg(&phase).expect("cfg should build");
    assert_no_undefined(&cfg);

    let Terminator::Switch { cases, default, .. } = &cfg.block(cfg.entry).terminator else {
        panic!("entry should be a switch");
    };
    assert_eq!(cases.len(), 2);
    assert_ne!(cases[0].1, cases[1].1, "cases with bodies get distinct blocks");

    // Every case body ends with an implicit break to the same merge.
    let Terminator::Branch { target: merge_a } = cfg.block(cases[0].1).terminator else {
        panic!("case 1 should branch");
    };
    let Terminator::Branch { target: merge_b } = cfg.block(cases[1].1).terminator else {
        panic!("case 2 should branch");
    };
    let Terminator::Branch { target: merge_c } = cfg.block(*default).terminator else {
        panic!("default should branch");
    };
    assert_eq!(merge_a, merge_b);
    assert_eq!(merge_b, merge_c);
}

#[test]
fn stacked_case_labels_share_a_body() {
    let phase = phase_with(
        PhaseKind::Main,
        vec![
            Inst::Switch { src: cond() },
            Inst::Case { value: 1 },
            Inst::Case { value: 2 },
            Inst::Nop,
            Inst::EndSwitch,
            Inst::Ret,
        ],
    );
    let cfg = build_cfg(&phase).expect("cfg should build");
    let Terminator::Switch { cases, .. } = &cfg.block(cfg.entry).terminator else {
        panic!("entry should be a switch");
    };
    assert_eq!(cases[0].1, cases[1].1, "stacked labels map to one body");
}

#[test]
fn retc_branches_to_the_phase_return() {
    let phase = phase_with(
        PhaseKind::Main,
        vec![Inst::RetC { nonzero: true, src: cond() }, Inst::Nop, Inst::Ret],
    );
    let cfg = build_cfg(&phase).expect("cfg should build");
    let Terminator::CondBranch { if_true, .. } = &cfg.block(cfg.entry).terminator else {
        panic!("expected retc");
    };
    assert_eq!(*if_true, cfg.ret);
}

#[test]
fn hull_control_point_phase_gets_barrier_and_epilogue() {
    let mut phase = phase_with(PhaseKind::HullControlPoint, vec![Inst::Ret]);
    phase.instance_count = 4;
    let cfg = build_cfg(&phase).expect("cfg should build");
    assert_no_undefined(&cfg);

    let Terminator::InstanceBarrier { instance_count, sync, .. } =
        &cfg.block(cfg.entry).terminator
    else {
        panic!("hull phase entry must gate on the instance id");
    };
    assert_eq!(*instance_count, 4);
    assert_eq!(*sync, cfg.ret);
    let Terminator::HullWriteOutput { epilogue } = &cfg.block(cfg.ret).terminator else {
        panic!("control-point return must write back outputs");
    };
    assert!(matches!(cfg.block(*epilogue).terminator, Terminator::Return));
}

#[test]
fn unbalanced_control_flow_is_malformed() {
    let phase = phase_with(PhaseKind::Main, vec![Inst::If { nonzero: true, src: cond() }, Inst::Ret]);
    let err = build_cfg(&phase).unwrap_err();
    assert!(matches!(err, TranslateError::Malformed(_)), "{err:?}");

    let phase = phase_with(PhaseKind::Main, vec![Inst::Break, Inst::Ret]);
    let err = build_cfg(&phase).unwrap_err();
    assert!(matches!(err, TranslateError::Malformed(_)), "{err:?}");

    let phase = phase_with(PhaseKind::Main, vec![Inst::Else, Inst::Ret]);
    let err = build_cfg(&phase).unwrap_err();
    assert!(matches!(err, TranslateError::Malformed(_)), "{err:?}");
}
