//! Control-flow recovery: the structured `if/loop/switch` tokens of a
//! phase become a reducible graph of basic blocks.
//!
//! Blocks live in a per-phase arena and terminators hold indices, so
//! loop back-edges do not create ownership cycles. Construction never
//! leaves an [`Terminator::Undefined`] behind; that case is validated
//! away before the graph is handed to the lowering.

use crate::sm5::{Inst, Phase, PhaseKind, SrcOperand};
use crate::TranslateError;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BlockId(pub u32);

#[derive(Clone, Debug)]
pub enum Terminator {
    /// Construction placeholder; an error if it survives.
    Undefined,
    Branch { target: BlockId },
    CondBranch {
        cond: SrcOperand,
        test_nonzero: bool,
        if_true: BlockId,
        if_false: BlockId,
    },
    Switch {
        value: SrcOperand,
        cases: Vec<(u32, BlockId)>,
        default: BlockId,
    },
    Return,
    /// Hull phase entry: run `active` for the first `instance_count`
    /// threads, then reconverge at `sync`.
    InstanceBarrier {
        active: BlockId,
        sync: BlockId,
        instance_count: u32,
    },
    /// Hull control-point phase exit: guarded control-point write-back
    /// plus threadgroup barrier, then the epilogue.
    HullWriteOutput { epilogue: BlockId },
}

#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub name: String,
    pub insts: Vec<Inst>,
    pub terminator: Terminator,
}

#[derive(Debug)]
pub struct ControlFlowGraph {
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    pub ret: BlockId,
}

impl ControlFlowGraph {
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }
}

struct Builder {
    blocks: Vec<BasicBlock>,
    current: BlockId,
    ret: BlockId,
    frames: Vec<Frame>,
}

enum Frame {
    If {
        cond_block: BlockId,
        /// Blocks whose pending branch resolves to the join block.
        pending: Vec<BlockId>,
        has_else: bool,
    },
    Loop {
        header: BlockId,
        merge: BlockId,
    },
    Switch {
        switch_block: BlockId,
        merge: BlockId,
        cases: Vec<(u32, BlockId)>,
        default: Option<BlockId>,
        /// Set while the previous token was also a case label, so
        /// stacked labels share one body block.
        reusable_label_block: Option<BlockId>,
    },
}

impl Builder {
    fn new_block(&mut self, name: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            name: format!("{name}{}", id.0),
            insts: Vec::new(),
            terminator: Terminator::Undefined,
        });
        id
    }

    fn terminate(&mut self, terminator: Terminator) {
        let block = &mut self.blocks[self.current.0 as usize];
        if matches!(block.terminator, Terminator::Undefined) {
            block.terminator = terminator;
        }
    }

    fn is_terminated(&self) -> bool {
        !matches!(
            self.blocks[self.current.0 as usize].terminator,
            Terminator::Undefined
        )
    }

    /// The break target of the innermost loop or switch.
    fn break_target(&self) -> Option<BlockId> {
        self.frames.iter().rev().find_map(|frame| match frame {
            Frame::Loop { merge, .. } | Frame::Switch { merge, .. } => Some(*merge),
            Frame::If { .. } => None,
        })
    }

    fn continue_target(&self) -> Option<BlockId> {
        self.frames.iter().rev().find_map(|frame| match frame {
            Frame::Loop { header, .. } => Some(*header),
            _ => None,
        })
    }
}

/// Recovers the CFG of one phase. Control-flow instructions are consumed;
/// everything else lands in block bodies in order.
pub fn build_cfg(phase: &Phase) -> Result<ControlFlowGraph, TranslateError> {
    let mut b = Builder {
        blocks: Vec::new(),
        current: BlockId(0),
        ret: BlockId(0),
        frames: Vec::new(),
    };
    let entry = b.new_block("entry");
    let ret = b.new_block("return");
    b.ret = ret;
    b.current = entry;

    // Hull phases run `instance_count` logical instances; the entry gates
    // the body on the instance id and reconverges at the return block.
    if matches!(
        phase.kind,
        PhaseKind::HullFork | PhaseKind::HullJoin | PhaseKind::HullControlPoint
    ) {
        let body = b.new_block("phase_body");
        b.blocks[entry.0 as usize].terminator = Terminator::InstanceBarrier {
            active: body,
            sync: ret,
            instance_count: phase.instance_count,
        };
        b.current = body;
    }

    for inst in &phase.insts {
        match inst {
            Inst::If { nonzero, src } => {
                let if_true = b.new_block("if_true");
                b.terminate(Terminator::CondBranch {
                    cond: src.clone(),
                    test_nonzero: *nonzero,
                    if_true,
                    // Patched at `else` / `endif`.
                    if_false: BlockId(u32::MAX),
                });
                let cond_block = b.current;
                b.frames.push(Frame::If {
                    cond_block,
                    pending: Vec::new(),
                    has_else: false,
                });
                b.current = if_true;
            }
            Inst::Else => {
                let Some(Frame::If { cond_block, has_else, .. }) = b.frames.last_mut() else {
                    return Err(TranslateError::Malformed("else outside if".to_string()));
                };
                if *has_else {
                    return Err(TranslateError::Malformed("duplicate else".to_string()));
                }
                *has_else = true;
                let cond_block = *cond_block;
                if !b.is_terminated() {
                    pending_push(&mut b, cond_block)?;
                }
                let if_false = b.new_block("if_false");
                patch_false_target(&mut b, cond_block, if_false)?;
                b.current = if_false;
            }
            Inst::EndIf => {
                let Some(Frame::If { cond_block, mut pending, has_else }) = b.frames.pop() else {
                    return Err(TranslateError::Malformed("endif outside if".to_string()));
                };
                if !b.is_terminated() {
                    pending.push(b.current);
                    b.terminate(Terminator::Branch { target: BlockId(u32::MAX) });
                }
                let join = b.new_block("if_join");
                if !has_else {
                    patch_false_target(&mut b, cond_block, join)?;
                }
                for block in pending {
                    patch_branch_target(&mut b, block, join)?;
                }
                b.current = join;
            }

            Inst::Loop => {
                let header = b.new_block("loop_header");
                let merge = b.new_block("loop_merge");
                b.terminate(Terminator::Branch { target: header });
                b.frames.push(Frame::Loop { header, merge });
                b.current = header;
            }
            Inst::EndLoop => {
                let Some(Frame::Loop { header, merge }) = b.frames.pop() else {
                    return Err(TranslateError::Malformed("endloop outside loop".to_string()));
                };
                b.terminate(Terminator::Branch { target: header });
                b.current = merge;
            }
            Inst::Break => {
                let target = b.break_target().ok_or_else(|| {
                    TranslateError::Malformed("break outside loop or switch".to_string())
                })?;
                b.terminate(Terminator::Branch { target });
                let dead = b.new_block("post_break");
                b.current = dead;
            }
            Inst::BreakC { nonzero, src } => {
                let target = b.break_target().ok_or_else(|| {
                    TranslateError::Malformed("breakc outside loop or switch".to_string())
                })?;
                let fallthrough = b.new_block("break_fallthrough");
                b.terminate(Terminator::CondBranch {
                    cond: src.clone(),
                    test_nonzero: *nonzero,
                    if_true: target,
                    if_false: fallthrough,
                });
                b.current = fallthrough;
            }
            Inst::Continue => {
                let target = b.continue_target().ok_or_else(|| {
                    TranslateError::Malformed("continue outside loop".to_string())
                })?;
                b.terminate(Terminator::Branch { target });
                let dead = b.new_block("post_continue");
                b.current = dead;
            }
            Inst::ContinueC { nonzero, src } => {
                let target = b.continue_target().ok_or_else(|| {
                    TranslateError::Malformed("continuec outside loop".to_string())
                })?;
                let fallthrough = b.new_block("continue_fallthrough");
                b.terminate(Terminator::CondBranch {
                    cond: src.clone(),
                    test_nonzero: *nonzero,
                    if_true: target,
                    if_false: fallthrough,
                });
                b.current = fallthrough;
            }

            Inst::Switch { src } => {
                let merge = b.new_block("switch_merge");
                b.terminate(Terminator::Switch {
                    value: src.clone(),
                    cases: Vec::new(),
                    default: BlockId(u32::MAX),
                });
                let switch_block = b.current;
                b.frames.push(Frame::Switch {
                    switch_block,
                    merge,
                    cases: Vec::new(),
                    default: None,
                    reusable_label_block: None,
                });
                // Code before the first label is unreachable.
                let dead = b.new_block("pre_case");
                b.current = dead;
            }
            Inst::Case { value } => {
                let body = switch_label_body(&mut b)?;
                match b.frames.last_mut() {
                    Some(Frame::Switch { cases, .. }) => cases.push((*value, body)),
                    _ => {
                        return Err(TranslateError::Malformed("case outside switch".to_string()));
                    }
                }
                b.current = body;
            }
            Inst::Default => {
                let body = switch_label_body(&mut b)?;
                match b.frames.last_mut() {
                    Some(Frame::Switch { default, .. }) => *default = Some(body),
                    _ => {
                        return Err(TranslateError::Malformed(
                            "default outside switch".to_string(),
                        ));
                    }
                }
                b.current = body;
            }
            Inst::EndSwitch => {
                let Some(Frame::Switch { switch_block, merge, cases, default, .. }) =
                    b.frames.pop()
                else {
                    return Err(TranslateError::Malformed(
                        "endswitch outside switch".to_string(),
                    ));
                };
                if !b.is_terminated() {
                    b.terminate(Terminator::Branch { target: merge });
                }
                let default = default.unwrap_or(merge);
                match &mut b.blocks[switch_block.0 as usize].terminator {
                    Terminator::Switch { cases: slot, default: default_slot, .. } => {
                        *slot = cases;
                        *default_slot = default;
                    }
                    _ => {
                        return Err(TranslateError::Malformed(
                            "switch terminator lost".to_string(),
                        ));
                    }
                }
                b.current = merge;
            }

            Inst::Ret => {
                b.terminate(Terminator::Branch { target: ret });
                let dead = b.new_block("post_ret");
                b.current = dead;
            }
            Inst::RetC { nonzero, src } => {
                let fallthrough = b.new_block("ret_fallthrough");
                b.terminate(Terminator::CondBranch {
                    cond: src.clone(),
                    test_nonzero: *nonzero,
                    if_true: ret,
                    if_false: fallthrough,
                });
                b.current = fallthrough;
            }

            other => {
                b.blocks[b.current.0 as usize].insts.push(other.clone());
            }
        }
    }

    if !b.frames.is_empty() {
        return Err(TranslateError::Malformed(
            "unclosed control-flow construct".to_string(),
        ));
    }
    if !b.is_terminated() {
        b.terminate(Terminator::Branch { target: ret });
    }

    // The return block: control-point phases write their outputs behind
    // an instance guard and a threadgroup barrier before the epilogue.
    if phase.kind == PhaseKind::HullControlPoint {
        let epilogue = b.new_block("epilogue");
        b.blocks[epilogue.0 as usize].terminator = Terminator::Return;
        b.blocks[ret.0 as usize].terminator = Terminator::HullWriteOutput { epilogue };
    } else {
        b.blocks[ret.0 as usize].terminator = Terminator::Return;
    }

    let cfg = ControlFlowGraph { blocks: b.blocks, entry, ret };
    validate(&cfg)?;
    Ok(cfg)
}

/// Starts (or reuses) the body block for a `case`/`default` label: stacked
/// labels share one block; otherwise the running case takes its implicit
/// break to the merge block first.
fn switch_label_body(b: &mut Builder) -> Result<BlockId, TranslateError> {
    let current = b.current;
    let current_reusable =
        b.blocks[current.0 as usize].insts.is_empty() && !b.is_terminated();
    let (merge, reuse) = match b.frames.last() {
        Some(Frame::Switch { merge, reusable_label_block, .. }) => {
            (*merge, *reusable_label_block)
        }
        _ => {
            return Err(TranslateError::Malformed(
                "case label outside switch".to_string(),
            ));
        }
    };
    if let Some(label) = reuse {
        if current_reusable && current == label {
            return Ok(label);
        }
    }
    if !b.is_terminated() {
        b.terminate(Terminator::Branch { target: merge });
    }
    let body = b.new_block("case");
    if let Some(Frame::Switch { reusable_label_block, .. }) = b.frames.last_mut() {
        *reusable_label_block = Some(body);
    }
    Ok(body)
}

fn pending_push(b: &mut Builder, _cond_block: BlockId) -> Result<(), TranslateError> {
    let current = b.current;
    b.terminate(Terminator::Branch { target: BlockId(u32::MAX) });
    match b.frames.last_mut() {
        Some(Frame::If { pending, .. }) => {
            pending.push(current);
            Ok(())
        }
        _ => Err(TranslateError::Malformed("if frame lost".to_string())),
    }
}

fn patch_false_target(
    b: &mut Builder,
    cond_block: BlockId,
    target: BlockId,
) -> Result<(), TranslateError> {
    match &mut b.blocks[cond_block.0 as usize].terminator {
        Terminator::CondBranch { if_false, .. } if if_false.0 == u32::MAX => {
            *if_false = target;
            Ok(())
        }
        _ => Err(TranslateError::Malformed(
            "if condition block has no patchable branch".to_string(),
        )),
    }
}

fn patch_branch_target(
    b: &mut Builder,
    block: BlockId,
    target: BlockId,
) -> Result<(), TranslateError> {
    match &mut b.blocks[block.0 as usize].terminator {
        Terminator::Branch { target: slot } if slot.0 == u32::MAX => {
            *slot = target;
            Ok(())
        }
        // Already terminated by break/continue/ret inside the branch arm.
        _ => Ok(()),
    }
}

/// Every block must have a defined terminator with in-bounds targets, and
/// the graph exactly one return exit.
fn validate(cfg: &ControlFlowGraph) -> Result<(), TranslateError> {
    let mut returns = 0usize;
    for (index, block) in cfg.blocks.iter().enumerate() {
        let mut check = |id: BlockId| -> Result<(), TranslateError> {
            if id.0 as usize >= cfg.blocks.len() {
                return Err(TranslateError::Malformed(format!(
                    "block {index} branches to unknown block {}",
                    id.0
                )));
            }
            Ok(())
        };
        match &block.terminator {
            Terminator::Undefined => {
                return Err(TranslateError::Malformed(format!(
                    "block {index} ({}) has undefined terminator",
                    block.name
                )));
            }
            Terminator::Branch { target } => check(*target)?,
            Terminator::CondBranch { if_true, if_false, .. } => {
                check(*if_true)?;
                check(*if_false)?;
            }
            Terminator::Switch { cases, default, .. } => {
                check(*default)?;
                for (_, case) in cases {
                    check(*case)?;
                }
            }
            Terminator::InstanceBarrier { active, sync, .. } => {
                check(*active)?;
                check(*sync)?;
            }
            Terminator::HullWriteOutput { epilogue } => check(*epilogue)?,
            Terminator::Return => returns += 1,
        }
    }
    if returns == 0 {
        return Err(TranslateError::Malformed(
            "phase has no return exit".to_string(),
        ));
    }
    Ok(())
}
