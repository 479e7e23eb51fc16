//! Instruction builder. Holds the insertion point (function + block) and the
//! current fast-math flag; every `build_*` appends to the current block and
//! returns the result value handle.

use smallvec::SmallVec;

use super::{
    AtomicOp, BinOp, Block, BlockId, CastOp, FuncId, Inst, InstData, InstId, Module, Pred,
    Terminator, TypeId, TypeKind, Value,
};

pub struct IrBuilder<'m> {
    pub module: &'m mut Module,
    func: FuncId,
    block: BlockId,
    /// When set, fp intrinsics switch to their `fast_` variants and calls
    /// are flagged fast-math.
    pub fast_math: bool,
}

impl<'m> IrBuilder<'m> {
    /// Positions at the end of `func`'s entry block, creating one if the
    /// function has no body yet.
    pub fn new(module: &'m mut Module, func: FuncId) -> Self {
        if module.func(func).blocks.is_empty() {
            module.func_mut(func).blocks.push(Block {
                name: "entry".to_string(),
                ..Block::default()
            });
        }
        let block = BlockId(0);
        IrBuilder { module, func, block, fast_math: false }
    }

    pub fn function(&self) -> FuncId {
        self.func
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn create_block(&mut self, name: &str) -> BlockId {
        let blocks = &mut self.module.func_mut(self.func).blocks;
        let id = BlockId(blocks.len() as u32);
        blocks.push(Block { name: name.to_string(), ..Block::default() });
        id
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.block = block;
    }

    pub fn current_block_terminated(&self) -> bool {
        !matches!(
            self.module.func(self.func).blocks[self.block.0 as usize].terminator,
            Terminator::None
        )
    }

    fn push(&mut self, ty: TypeId, inst: Inst) -> Value {
        let func = self.module.func_mut(self.func);
        let inst_id = InstId(func.insts.len() as u32);
        func.insts.push(InstData { ty, inst });
        func.blocks[self.block.0 as usize].insts.push(inst_id);
        self.module.inst_value(self.func, inst_id, ty)
    }

    /* Arithmetic */

    pub fn build_binary(&mut self, op: BinOp, lhs: Value, rhs: Value) -> Value {
        // Fold constant integer arithmetic; the cleanup pipeline relies on
        // builder-level folding the way LLVM's IRBuilder does.
        if let (Some(a), Some(b)) =
            (self.module.const_int_value(lhs), self.module.const_int_value(rhs))
        {
            let ty = self.module.value_type(lhs);
            if let TypeKind::Int(32) = self.module.types.kind(ty) {
                let (a, b) = (a as u32, b as u32);
                let folded = match op {
                    BinOp::Add => Some(a.wrapping_add(b)),
                    BinOp::Sub => Some(a.wrapping_sub(b)),
                    BinOp::Mul => Some(a.wrapping_mul(b)),
                    BinOp::And => Some(a & b),
                    BinOp::Or => Some(a | b),
                    BinOp::Xor => Some(a ^ b),
                    BinOp::Shl => Some(a.wrapping_shl(b)),
                    BinOp::LShr => Some(a.wrapping_shr(b)),
                    _ => None,
                };
                if let Some(v) = folded {
                    return self.module.const_u32(v);
                }
            }
        }
        let ty = self.module.value_type(lhs);
        self.push(ty, Inst::Binary { op, lhs, rhs })
    }

    pub fn build_add(&mut self, lhs: Value, rhs: Value) -> Value {
        self.build_binary(BinOp::Add, lhs, rhs)
    }
    pub fn build_sub(&mut self, lhs: Value, rhs: Value) -> Value {
        self.build_binary(BinOp::Sub, lhs, rhs)
    }
    pub fn build_mul(&mut self, lhs: Value, rhs: Value) -> Value {
        self.build_binary(BinOp::Mul, lhs, rhs)
    }
    pub fn build_udiv(&mut self, lhs: Value, rhs: Value) -> Value {
        self.build_binary(BinOp::UDiv, lhs, rhs)
    }
    pub fn build_and(&mut self, lhs: Value, rhs: Value) -> Value {
        self.build_binary(BinOp::And, lhs, rhs)
    }
    pub fn build_or(&mut self, lhs: Value, rhs: Value) -> Value {
        self.build_binary(BinOp::Or, lhs, rhs)
    }
    pub fn build_xor(&mut self, lhs: Value, rhs: Value) -> Value {
        self.build_binary(BinOp::Xor, lhs, rhs)
    }
    pub fn build_fadd(&mut self, lhs: Value, rhs: Value) -> Value {
        self.build_binary(BinOp::FAdd, lhs, rhs)
    }
    pub fn build_fsub(&mut self, lhs: Value, rhs: Value) -> Value {
        self.build_binary(BinOp::FSub, lhs, rhs)
    }
    pub fn build_fmul(&mut self, lhs: Value, rhs: Value) -> Value {
        self.build_binary(BinOp::FMul, lhs, rhs)
    }
    pub fn build_fdiv(&mut self, lhs: Value, rhs: Value) -> Value {
        self.build_binary(BinOp::FDiv, lhs, rhs)
    }

    pub fn build_icmp(&mut self, pred: Pred, lhs: Value, rhs: Value) -> Value {
        let ty = self.cmp_result_type(lhs);
        self.push(ty, Inst::ICmp { pred, lhs, rhs })
    }

    pub fn build_fcmp(&mut self, pred: Pred, lhs: Value, rhs: Value) -> Value {
        let ty = self.cmp_result_type(lhs);
        self.push(ty, Inst::FCmp { pred, lhs, rhs })
    }

    fn cmp_result_type(&mut self, operand: Value) -> TypeId {
        let op_ty = self.module.value_type(operand);
        let i1 = self.module.types.i1();
        match self.module.types.kind(op_ty) {
            TypeKind::Vector { len, .. } => {
                let len = *len;
                self.module.types.vec(i1, len)
            }
            _ => i1,
        }
    }

    pub fn build_is_null(&mut self, value: Value) -> Value {
        let zero = {
            let ty = self.module.value_type(value);
            self.module.zero(ty)
        };
        self.build_icmp(Pred::Eq, value, zero)
    }

    /* Casts */

    pub fn build_cast(&mut self, op: CastOp, value: Value, to: TypeId) -> Value {
        if self.module.value_type(value) == to && op == CastOp::Bitcast {
            return value;
        }
        self.push(to, Inst::Cast { op, value, to })
    }

    pub fn build_bitcast(&mut self, value: Value, to: TypeId) -> Value {
        self.build_cast(CastOp::Bitcast, value, to)
    }

    pub fn build_trunc(&mut self, value: Value, to: TypeId) -> Value {
        self.build_cast(CastOp::Trunc, value, to)
    }

    pub fn build_zext(&mut self, value: Value, to: TypeId) -> Value {
        self.build_cast(CastOp::ZExt, value, to)
    }

    pub fn build_sext(&mut self, value: Value, to: TypeId) -> Value {
        self.build_cast(CastOp::SExt, value, to)
    }

    pub fn build_zext_or_trunc(&mut self, value: Value, to: TypeId) -> Value {
        let from_bits = self.int_bits(self.module.value_type(value));
        let to_bits = self.int_bits(to);
        if from_bits == to_bits {
            value
        } else if from_bits < to_bits {
            self.build_zext(value, to)
        } else {
            self.build_trunc(value, to)
        }
    }

    fn int_bits(&self, ty: TypeId) -> u32 {
        match self.module.types.kind(self.module.types.scalar_of(ty)) {
            TypeKind::Int(bits) => *bits,
            other => panic!("expected integer type, got {other:?}"),
        }
    }

    /* Vectors and aggregates */

    pub fn build_extract_element(&mut self, vector: Value, index: u32) -> Value {
        let idx = self.module.const_u32(index);
        self.build_extract_element_dyn(vector, idx)
    }

    pub fn build_extract_element_dyn(&mut self, vector: Value, index: Value) -> Value {
        let vec_ty = self.module.value_type(vector);
        let elem = self.module.types.scalar_of(vec_ty);
        self.push(elem, Inst::ExtractElement { vector, index })
    }

    pub fn build_insert_element(&mut self, vector: Value, element: Value, index: u32) -> Value {
        let idx = self.module.const_u32(index);
        let ty = self.module.value_type(vector);
        self.push(ty, Inst::InsertElement { vector, element, index: idx })
    }

    /// Single-source shuffle; `-1` lanes are undef.
    pub fn build_shuffle(&mut self, value: Value, mask: &[i32]) -> Value {
        let vec_ty = self.module.value_type(value);
        let elem = self.module.types.scalar_of(vec_ty);
        let ty = self.module.types.vec_or_scalar(elem, mask.len() as u32);
        if mask.len() == 1 {
            // Degenerate single-lane shuffle is just an extract.
            return self.build_extract_element(value, mask[0].max(0) as u32);
        }
        let undef = self.module.undef(vec_ty);
        self.push(ty, Inst::ShuffleVector { a: value, b: undef, mask: mask.to_vec() })
    }

    pub fn build_extract_value(&mut self, aggregate: Value, index: u32) -> Value {
        let agg_ty = self.module.value_type(aggregate);
        let ty = match self.module.types.kind(agg_ty) {
            TypeKind::Struct { fields, .. } => fields[index as usize],
            TypeKind::Array { elem, .. } => *elem,
            other => panic!("extractvalue from non-aggregate {other:?}"),
        };
        self.push(
            ty,
            Inst::ExtractValue { aggregate, indices: SmallVec::from_slice(&[index]) },
        )
    }

    pub fn build_insert_value(&mut self, aggregate: Value, element: Value, index: u32) -> Value {
        let ty = self.module.value_type(aggregate);
        self.push(
            ty,
            Inst::InsertValue {
                aggregate,
                element,
                indices: SmallVec::from_slice(&[index]),
            },
        )
    }

    /// Builds a vector of `count` copies of a scalar. Passing a vector of
    /// the right length through unchanged mirrors the tolerant helper the
    /// translator leans on.
    pub fn build_vector_splat(&mut self, count: u32, scalar: Value) -> Value {
        let ty = self.module.value_type(scalar);
        if let Some(len) = self.module.types.vector_len(ty) {
            assert_eq!(len, count, "splat of a vector with mismatched length");
            return scalar;
        }
        let vec_ty = self.module.types.vec(ty, count);
        let mut acc = self.module.undef(vec_ty);
        for lane in 0..count {
            acc = self.build_insert_element(acc, scalar, lane);
        }
        acc
    }

    /* Memory */

    pub fn build_alloca(&mut self, allocated: TypeId, align: u32) -> Value {
        let ty = self.module.types.ptr(allocated, 0);
        self.push(ty, Inst::Alloca { allocated, align })
    }

    pub fn build_load(&mut self, ptr: Value, align: u32) -> Value {
        let (pointee, _) = self
            .module
            .types
            .pointee(self.module.value_type(ptr))
            .expect("load from non-pointer");
        self.push(pointee, Inst::Load { ptr, align })
    }

    pub fn build_store(&mut self, value: Value, ptr: Value, align: u32) -> Value {
        let void = self.module.types.void();
        self.push(void, Inst::Store { value, ptr, align })
    }

    /// `base` is the pointee type of `ptr`; the result is a pointer in the
    /// same address space.
    pub fn build_gep(&mut self, base: TypeId, ptr: Value, indices: &[Value]) -> Value {
        let (_, space) = self
            .module
            .types
            .pointee(self.module.value_type(ptr))
            .expect("gep on non-pointer");
        let pointee = self.module.gep_pointee(base, indices);
        let ty = self.module.types.ptr(pointee, space);
        self.push(ty, Inst::Gep { base, ptr, indices: indices.to_vec() })
    }

    pub fn build_gep_u32(&mut self, base: TypeId, ptr: Value, indices: &[u32]) -> Value {
        let indices: Vec<Value> = indices.iter().map(|&i| self.module.const_u32(i)).collect();
        self.build_gep(base, ptr, &indices)
    }

    /* Calls and control */

    pub fn build_call(&mut self, callee: FuncId, args: &[Value]) -> Value {
        let ret = self.module.return_type_of(callee);
        let fast_math = self.fast_math;
        self.push(ret, Inst::Call { callee, args: args.to_vec(), fast_math })
    }

    pub fn build_select(&mut self, cond: Value, if_true: Value, if_false: Value) -> Value {
        let ty = self.module.value_type(if_true);
        self.push(ty, Inst::Select { cond, if_true, if_false })
    }

    pub fn build_phi(&mut self, ty: TypeId, incoming: Vec<(Value, BlockId)>) -> Value {
        self.push(ty, Inst::Phi { incoming })
    }

    pub fn add_phi_incoming(&mut self, phi: Value, value: Value, block: BlockId) {
        let (func, inst) = self
            .module
            .value_kind_is_inst(phi)
            .expect("add_phi_incoming on non-instruction");
        match &mut self.module.func_mut(func).insts[inst.0 as usize].inst {
            Inst::Phi { incoming } => incoming.push((value, block)),
            _ => panic!("add_phi_incoming on non-phi"),
        }
    }

    pub fn build_atomicrmw(&mut self, op: AtomicOp, ptr: Value, value: Value) -> Value {
        let ty = self.module.value_type(value);
        self.push(ty, Inst::AtomicRmw { op, ptr, value })
    }

    pub fn build_cmpxchg(&mut self, ptr: Value, expected: Value, desired: Value) -> Value {
        let val_ty = self.module.value_type(desired);
        let i1 = self.module.types.i1();
        let ty = self.module.types.literal_struct(vec![val_ty, i1]);
        self.push(ty, Inst::CmpXchg { ptr, expected, desired })
    }

    pub fn build_freeze(&mut self, value: Value) -> Value {
        let ty = self.module.value_type(value);
        self.push(ty, Inst::Freeze { value })
    }

    /* Terminators */

    fn terminate(&mut self, terminator: Terminator) {
        let block = &mut self.module.func_mut(self.func).blocks[self.block.0 as usize];
        debug_assert!(
            matches!(block.terminator, Terminator::None),
            "block {} already terminated",
            block.name
        );
        block.terminator = terminator;
    }

    pub fn build_br(&mut self, dest: BlockId) {
        self.terminate(Terminator::Br { dest });
    }

    pub fn build_cond_br(&mut self, cond: Value, if_true: BlockId, if_false: BlockId) {
        self.terminate(Terminator::CondBr { cond, if_true, if_false });
    }

    pub fn build_switch(&mut self, value: Value, default: BlockId, cases: Vec<(u64, BlockId)>) {
        self.terminate(Terminator::Switch { value, default, cases });
    }

    pub fn build_ret(&mut self, value: Option<Value>) {
        self.terminate(Terminator::Ret { value });
    }

    pub fn build_unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }
}

