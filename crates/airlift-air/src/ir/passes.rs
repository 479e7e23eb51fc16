//! Standard cleanup pipeline run between translation and serialization.
//!
//! Constant folding happens at build time in [`super::IrBuilder`]; the
//! pipeline proper removes dead instructions and unreachable blocks. The
//! output IR is what gets hashed into the metallib, so passes must be
//! deterministic: plain forward walks, no hash-order iteration.

use std::collections::HashSet;

use super::{BlockId, Inst, Module, Terminator, Value};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OptLevel {
    None,
    Default,
}

pub fn optimize(module: &mut Module, level: OptLevel) {
    if level == OptLevel::None {
        return;
    }
    for index in 0..module.functions.len() {
        sweep_unreachable_blocks(module, index);
        eliminate_dead_insts(module, index);
    }
}

/// Marks blocks reachable from the entry and empties the rest. Block ids
/// stay stable (terminators hold indices), so unreachable blocks are
/// emptied in place rather than removed.
fn sweep_unreachable_blocks(module: &mut Module, func_index: usize) {
    let func = &module.functions[func_index];
    if func.blocks.is_empty() {
        return;
    }
    let mut reachable = HashSet::new();
    let mut work = vec![BlockId(0)];
    while let Some(block) = work.pop() {
        if !reachable.insert(block) {
            continue;
        }
        match &func.blocks[block.0 as usize].terminator {
            Terminator::Br { dest } => work.push(*dest),
            Terminator::CondBr { if_true, if_false, .. } => {
                work.push(*if_true);
                work.push(*if_false);
            }
            Terminator::Switch { default, cases, .. } => {
                work.push(*default);
                work.extend(cases.iter().map(|(_, b)| *b));
            }
            Terminator::Ret { .. } | Terminator::Unreachable | Terminator::None => {}
        }
    }
    let func = &mut module.functions[func_index];
    for (index, block) in func.blocks.iter_mut().enumerate() {
        if !reachable.contains(&BlockId(index as u32)) {
            block.insts.clear();
            block.terminator = Terminator::Unreachable;
        }
    }
}

fn has_side_effects(module: &Module, inst: &Inst) -> bool {
    match inst {
        Inst::Store { .. } | Inst::AtomicRmw { .. } | Inst::CmpXchg { .. } => true,
        // Calls are conservatively kept unless the callee is marked
        // ReadNone and the result is unused.
        Inst::Call { callee, .. } => {
            let attrs = &module.func(*callee).attributes;
            !attrs
                .0
                .iter()
                .any(|(idx, attr)| *idx == super::FUNCTION_ATTR && *attr == super::Attr::ReadNone)
        }
        // Allocas are address-taken by construction in this pipeline.
        Inst::Alloca { .. } => true,
        _ => false,
    }
}

fn eliminate_dead_insts(module: &mut Module, func_index: usize) {
    // Iterate to a fixed point; each round unhooks instructions whose
    // results nobody consumes.
    loop {
        let func = &module.functions[func_index];
        let mut used: HashSet<Value> = HashSet::new();
        let mut note = |v: Value| {
            used.insert(v);
        };
        for block in &func.blocks {
            for &inst_id in &block.insts {
                collect_operands(&func.insts[inst_id.0 as usize].inst, &mut note);
            }
            match &block.terminator {
                Terminator::CondBr { cond, .. } => note(*cond),
                Terminator::Switch { value, .. } => note(*value),
                Terminator::Ret { value: Some(v) } => note(*v),
                _ => {}
            }
        }

        let func_id = super::FuncId(func_index as u32);
        let mut removed = false;
        let mut keep: Vec<Vec<super::InstId>> = Vec::with_capacity(func.blocks.len());
        for block in &func.blocks {
            let mut kept = Vec::with_capacity(block.insts.len());
            for &inst_id in &block.insts {
                let data = &func.insts[inst_id.0 as usize];
                let value_used = module
                    .inst_result(func_id, inst_id)
                    .map(|v| used.contains(&v))
                    .unwrap_or(true);
                if value_used || has_side_effects(module, &data.inst) {
                    kept.push(inst_id);
                } else {
                    removed = true;
                }
            }
            keep.push(kept);
        }
        if !removed {
            break;
        }
        let func = &mut module.functions[func_index];
        for (block, kept) in func.blocks.iter_mut().zip(keep) {
            block.insts = kept;
        }
    }
}

fn collect_operands(inst: &Inst, note: &mut impl FnMut(Value)) {
    match inst {
        Inst::Binary { lhs, rhs, .. }
        | Inst::ICmp { lhs, rhs, .. }
        | Inst::FCmp { lhs, rhs, .. } => {
            note(*lhs);
            note(*rhs);
        }
        Inst::Cast { value, .. } | Inst::Freeze { value } => note(*value),
        Inst::ExtractElement { vector, index } => {
            note(*vector);
            note(*index);
        }
        Inst::InsertElement { vector, element, index } => {
            note(*vector);
            note(*element);
            note(*index);
        }
        Inst::ShuffleVector { a, b, .. } => {
            note(*a);
            note(*b);
        }
        Inst::ExtractValue { aggregate, .. } => note(*aggregate),
        Inst::InsertValue { aggregate, element, .. } => {
            note(*aggregate);
            note(*element);
        }
        Inst::Alloca { .. } => {}
        Inst::Load { ptr, .. } => note(*ptr),
        Inst::Store { value, ptr, .. } => {
            note(*value);
            note(*ptr);
        }
        Inst::Gep { ptr, indices, .. } => {
            note(*ptr);
            for &index in indices {
                note(index);
            }
        }
        Inst::Call { args, .. } => {
            for &arg in args {
                note(arg);
            }
        }
        Inst::Select { cond, if_true, if_false } => {
            note(*cond);
            note(*if_true);
            note(*if_false);
        }
        Inst::Phi { incoming } => incoming.iter().for_each(|(v, _)| note(*v)),
        Inst::AtomicRmw { ptr, value, .. } => {
            note(*ptr);
            note(*value);
        }
        Inst::CmpXchg { ptr, expected, desired } => {
            note(*ptr);
            note(*expected);
            note(*desired);
        }
    }
}
