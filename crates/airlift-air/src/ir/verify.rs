//! Structural verification of a constructed module, run before
//! serialization. This is not a full LLVM verifier; it enforces the
//! properties the rest of the pipeline relies on.

use super::{BinOp, FuncId, Inst, Module, Terminator, TypeKind};
use crate::AirError;

pub fn verify(module: &Module) -> Result<(), AirError> {
    for (index, func) in module.functions.iter().enumerate() {
        if func.is_declaration() {
            continue;
        }
        verify_function(module, FuncId(index as u32))?;
    }
    Ok(())
}

fn verify_function(module: &Module, id: FuncId) -> Result<(), AirError> {
    let func = module.func(id);
    let fail = |context: String| Err(AirError::Verify(format!("{}: {context}", func.name)));

    for (block_index, block) in func.blocks.iter().enumerate() {
        match &block.terminator {
            Terminator::None => {
                return fail(format!(
                    "block {block_index} ({}) has no terminator",
                    block.name
                ));
            }
            Terminator::Br { dest } => {
                if dest.0 as usize >= func.blocks.len() {
                    return fail(format!("branch to unknown block {}", dest.0));
                }
            }
            Terminator::CondBr { cond, if_true, if_false } => {
                let cond_ty = module.value_type(*cond);
                if !matches!(module.types.kind(cond_ty), TypeKind::Int(1)) {
                    return fail("conditional branch condition is not i1".to_string());
                }
                for dest in [if_true, if_false] {
                    if dest.0 as usize >= func.blocks.len() {
                        return fail(format!("branch to unknown block {}", dest.0));
                    }
                }
            }
            Terminator::Switch { default, cases, .. } => {
                for dest in std::iter::once(default).chain(cases.iter().map(|(_, b)| b)) {
                    if dest.0 as usize >= func.blocks.len() {
                        return fail(format!("switch to unknown block {}", dest.0));
                    }
                }
            }
            Terminator::Ret { value } => {
                let ret_ty = module.return_type_of(id);
                match value {
                    None => {
                        if !matches!(module.types.kind(ret_ty), TypeKind::Void) {
                            return fail("void return from non-void function".to_string());
                        }
                    }
                    Some(v) => {
                        if module.value_type(*v) != ret_ty {
                            return fail("return value type mismatch".to_string());
                        }
                    }
                }
            }
            Terminator::Unreachable => {}
        }

        for &inst_id in &block.insts {
            let data = &func.insts[inst_id.0 as usize];
            match &data.inst {
                Inst::Binary { op, lhs, rhs } => {
                    let lt = module.value_type(*lhs);
                    let rt = module.value_type(*rhs);
                    if lt != rt {
                        return fail(format!("binary {op:?} operand types differ"));
                    }
                    let is_fp = module.types.is_float_scalar_or_vector(lt);
                    let wants_fp = matches!(
                        op,
                        BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv | BinOp::FRem
                    );
                    if is_fp != wants_fp {
                        return fail(format!("binary {op:?} on wrong operand class"));
                    }
                }
                Inst::Store { ptr, value, .. } => {
                    let Some((pointee, _)) = module.types.pointee(module.value_type(*ptr)) else {
                        return fail("store through non-pointer".to_string());
                    };
                    if module.value_type(*value) != pointee {
                        return fail("store value does not match pointee type".to_string());
                    }
                }
                Inst::Load { ptr, .. } => {
                    if module.types.pointee(module.value_type(*ptr)).is_none() {
                        return fail("load from non-pointer".to_string());
                    }
                }
                Inst::Call { callee, args, .. } => {
                    let callee_ty = module.func(*callee).ty;
                    let TypeKind::Function { params, .. } = module.types.kind(callee_ty) else {
                        return fail("call of non-function".to_string());
                    };
                    if params.len() != args.len() {
                        return fail(format!(
                            "call of {} passes {} args, expected {}",
                            module.func(*callee).name,
                            args.len(),
                            params.len()
                        ));
                    }
                    for (i, (param, arg)) in params.iter().zip(args).enumerate() {
                        if module.value_type(*arg) != *param {
                            return fail(format!(
                                "call of {} arg {i} type mismatch",
                                module.func(*callee).name
                            ));
                        }
                    }
                }
                Inst::Phi { incoming } => {
                    for (value, block) in incoming {
                        if block.0 as usize >= func.blocks.len() {
                            return fail("phi references unknown block".to_string());
                        }
                        if module.value_type(*value) != data.ty {
                            return fail("phi incoming type mismatch".to_string());
                        }
                    }
                }
                Inst::AtomicRmw { ptr, value, .. } | Inst::CmpXchg { ptr, desired: value, .. } => {
                    let Some((pointee, _)) = module.types.pointee(module.value_type(*ptr)) else {
                        return fail("atomic on non-pointer".to_string());
                    };
                    if module.value_type(*value) != pointee {
                        return fail("atomic operand does not match pointee".to_string());
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}
