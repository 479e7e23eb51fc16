//! Per-phase temp-register data-type analysis.
//!
//! DXBC temps are untyped bit patterns; AIR wants typed scratch. This pass
//! runs once per phase before lowering:
//!
//! 1. `swapc` pseudo-ops expand into conditional-move pairs.
//! 2. Immediate-vector moves split into one move per lane so each lane can
//!    take its own type.
//! 3. Every temp access votes a type per register component; moves link
//!    components so unknown definitions inherit from their uses.
//! 4. Registers whose observed types conflict are split into one register
//!    per type, with tail-only component masks rebased (`.yzw` reads
//!    become `.xyz`), and all operands rewritten to the final numbering.

use std::collections::HashMap;

use crate::sm5::{
    AtomicBinOp, ConvertOp, DataType, Decl, DstKind, DstOperand, IndexExpr, Inst, IntBinaryOp,
    IntBinaryOp2Dst, IntCompareOp, Phase, SampledReturnType, SrcKind, SrcOperand, Swizzle,
    WriteMask,
};

/// Where a split register came from: original index, component rebase
/// (1 means `.yzw` became `.xyz`), and how many components stayed live.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SplitInfo {
    pub original: u32,
    pub rebase: u8,
    pub component_count: u8,
}

#[derive(Debug, Default)]
pub struct TempTypes {
    /// Data type per final register.
    pub types: Vec<DataType>,
    /// Provenance per final register.
    pub split_info: Vec<SplitInfo>,
    /// Per final register, its slot within the scratch array of its type.
    pub slot_in_type: Vec<u32>,
    /// Scratch array length per data type.
    pub counts: HashMap<DataType, u32>,
    assignment: HashMap<(u32, DataType), u32>,
}

impl TempTypes {
    pub fn type_of(&self, reg: u32) -> DataType {
        self.types.get(reg as usize).copied().unwrap_or(DataType::Float)
    }

    pub fn slot_of(&self, reg: u32) -> u32 {
        self.slot_in_type.get(reg as usize).copied().unwrap_or(0)
    }

    pub fn count_of(&self, ty: DataType) -> u32 {
        self.counts.get(&ty).copied().unwrap_or(0)
    }

    /// Data types with at least one register, in a fixed enumeration
    /// order so scratch allocation is deterministic.
    pub fn present_types(&self) -> Vec<DataType> {
        const ORDER: [DataType; 6] = [
            DataType::Float,
            DataType::Int,
            DataType::Uint,
            DataType::Float16,
            DataType::Bool,
            DataType::Double,
        ];
        ORDER
            .into_iter()
            .filter(|ty| self.count_of(*ty) > 0)
            .collect()
    }

    /// The concrete type an access with this expectation resolves to,
    /// falling back to the register's first assigned type.
    fn resolve_access_type(&self, reg: u32, expected: Option<DataType>) -> DataType {
        if let Some(expected) = expected {
            if self.assignment.contains_key(&(reg, expected)) {
                return expected;
            }
        }
        self.split_info
            .iter()
            .position(|s| s.original == reg)
            .map(|i| self.types[i])
            .unwrap_or(DataType::Float)
    }

    fn final_register(&self, reg: u32, ty: DataType) -> u32 {
        self.assignment.get(&(reg, ty)).copied().unwrap_or_else(|| {
            self.split_info
                .iter()
                .position(|s| s.original == reg)
                .map(|i| i as u32)
                .unwrap_or(reg)
        })
    }
}

pub fn analyze_phase(phase: &mut Phase) -> TempTypes {
    expand_swapc(phase);
    unvectorize_immediate_movs(phase);

    let resources = collect_resource_return_types(&phase.decls);

    // Vote pass.
    let mut votes = Votes::default();
    for inst in &mut phase.insts {
        walk_temp_accesses(inst, &resources, &mut |access| {
            votes.record(&access);
        });
        collect_mov_links(inst, &mut votes);
    }
    votes.propagate_links();

    let plan = votes.build_split_plan(phase.declared_temps);

    // Rewrite pass: renumber registers and stamp operand types.
    for inst in &mut phase.insts {
        walk_temp_accesses(inst, &resources, &mut |mut access| {
            let ty = plan.resolve_access_type(*access.reg, access.expected);
            *access.reg = plan.final_register(*access.reg, ty);
            *access.data_type = ty;
        });
    }

    tracing::trace!(
        original = phase.declared_temps,
        total = plan.types.len(),
        "temp type analysis"
    );
    plan
}

/// `swapc dst0, dst1, cond, a, b` is two predicated selects.
fn expand_swapc(phase: &mut Phase) {
    let mut out = Vec::with_capacity(phase.insts.len());
    for inst in phase.insts.drain(..) {
        match inst {
            Inst::SwapC { dst0, dst1, cond, a, b } => {
                out.push(Inst::MovC {
                    dst: dst0,
                    cond: cond.clone(),
                    a: b.clone(),
                    b: a.clone(),
                });
                out.push(Inst::MovC { dst: dst1, cond, a, b });
            }
            other => out.push(other),
        }
    }
    phase.insts = out;
}

/// `mov rX.xyz, l(0, 1, 2, _)` becomes three single-lane moves so each
/// lane can take its own type downstream.
fn unvectorize_immediate_movs(phase: &mut Phase) {
    let mut out = Vec::with_capacity(phase.insts.len());
    for inst in phase.insts.drain(..) {
        match inst {
            Inst::Mov { dst, src }
                if matches!(src.kind, SrcKind::Immediate32(_)) && dst.mask.count() > 1 =>
            {
                let SrcKind::Immediate32(values) = src.kind else { unreachable!() };
                for lane in dst.mask.lanes() {
                    let source_lane = src.swizzle.get(lane as usize) as usize;
                    out.push(Inst::Mov {
                        dst: DstOperand {
                            kind: dst.kind.clone(),
                            mask: WriteMask(1 << lane),
                            saturate: dst.saturate,
                            data_type: dst.data_type,
                        },
                        src: SrcOperand {
                            kind: SrcKind::Immediate32([values[source_lane]; 4]),
                            swizzle: Swizzle::broadcast(lane as u8),
                            modifier: src.modifier,
                            data_type: src.data_type,
                        },
                    });
                }
            }
            other => out.push(other),
        }
    }
    phase.insts = out;
}

fn collect_resource_return_types(decls: &[Decl]) -> HashMap<(bool, u32), DataType> {
    let mut map = HashMap::new();
    for decl in decls {
        match decl {
            Decl::Resource { slot, return_type, .. } => {
                map.insert((false, *slot), sampled_data_type(*return_type));
            }
            Decl::UavTyped { slot, return_type, .. } => {
                map.insert((true, *slot), sampled_data_type(*return_type));
            }
            _ => {}
        }
    }
    map
}

fn sampled_data_type(return_type: SampledReturnType) -> DataType {
    match return_type {
        SampledReturnType::Sint => DataType::Int,
        SampledReturnType::Uint => DataType::Uint,
        _ => DataType::Float,
    }
}

/// One temp-register operand, with the type its instruction imposes
/// (`None` for polymorphic shapes such as `mov`).
struct TempAccess<'a> {
    reg: &'a mut u32,
    lanes: u8,
    expected: Option<DataType>,
    data_type: &'a mut DataType,
}

#[derive(Default)]
struct Votes {
    per_component: HashMap<(u32, u8), Vec<DataType>>,
    links: Vec<((u32, u8), (u32, u8))>,
}

impl Votes {
    fn record(&mut self, access: &TempAccess<'_>) {
        let Some(expected) = access.expected else {
            return;
        };
        for lane in 0..4u8 {
            if access.lanes & (1 << lane) != 0 {
                let votes = self.per_component.entry((*access.reg, lane)).or_default();
                if !votes.contains(&expected) {
                    votes.push(expected);
                }
            }
        }
    }

    fn link(&mut self, a: (u32, u8), b: (u32, u8)) {
        self.links.push((a, b));
    }

    /// Flows known types across mov links until nothing changes.
    fn propagate_links(&mut self) {
        loop {
            let mut changed = false;
            for &(a, b) in &self.links {
                let a_ty = self.per_component.get(&a).and_then(|v| consistent(v));
                let b_ty = self.per_component.get(&b).and_then(|v| consistent(v));
                match (a_ty, b_ty) {
                    (Some(ty), None) => {
                        self.per_component.entry(b).or_default().push(ty);
                        changed = true;
                    }
                    (None, Some(ty)) => {
                        self.per_component.entry(a).or_default().push(ty);
                        changed = true;
                    }
                    _ => {}
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Decides the final register layout: registers with one consistent
    /// type keep one slot; mixed registers get one slot per observed
    /// type.
    fn build_split_plan(&self, declared_temps: u32) -> TempTypes {
        let mut plan = TempTypes::default();
        for reg in 0..declared_temps {
            let mut seen: Vec<DataType> = Vec::new();
            let mut lanes_by_type: HashMap<DataType, u8> = HashMap::new();
            for lane in 0..4u8 {
                if let Some(votes) = self.per_component.get(&(reg, lane)) {
                    for &ty in votes {
                        if !seen.contains(&ty) {
                            seen.push(ty);
                        }
                        *lanes_by_type.entry(ty).or_default() |= 1 << lane;
                    }
                }
            }
            if seen.is_empty() {
                seen.push(DataType::Float);
                lanes_by_type.insert(DataType::Float, 0b1111);
            }
            for ty in seen {
                let lanes = lanes_by_type[&ty];
                let tail_start = lanes.trailing_zeros().min(3) as u8;
                let live = 8 - lanes.leading_zeros() as u8;
                let new_index = plan.types.len() as u32;
                plan.types.push(ty);
                plan.split_info.push(SplitInfo {
                    original: reg,
                    // Rebase only contiguous tails; masks with holes keep
                    // their lane positions.
                    rebase: if lanes != 0 && lanes >> tail_start == (1 << (live - tail_start)) - 1
                    {
                        tail_start
                    } else {
                        0
                    },
                    component_count: live.saturating_sub(tail_start).max(1),
                });
                // Scratch arrays are shared per storage class (float vs
                // int bits), so slots count within the class.
                let class = if ty.is_float() { DataType::Float } else { DataType::Uint };
                let slot = plan.counts.entry(class).or_default();
                plan.slot_in_type.push(*slot);
                *slot += 1;
                plan.assignment.insert((reg, ty), new_index);
            }
        }
        plan
    }
}

fn consistent(votes: &[DataType]) -> Option<DataType> {
    let first = *votes.first()?;
    votes.iter().all(|&v| v == first).then_some(first)
}

fn collect_mov_links(inst: &Inst, votes: &mut Votes) {
    let mut pair = |dst: &DstOperand, src: &SrcOperand| {
        let (DstKind::Temp { index: dst_reg }, SrcKind::Temp { index: src_reg }) =
            (&dst.kind, &src.kind)
        else {
            return;
        };
        for lane in dst.mask.lanes() {
            let src_lane = src.swizzle.get(lane as usize);
            votes.link((*dst_reg, lane as u8), (*src_reg, src_lane));
        }
    };
    match inst {
        Inst::Mov { dst, src } => pair(dst, src),
        Inst::MovC { dst, a, b, .. } => {
            pair(dst, a);
            pair(dst, b);
        }
        _ => {}
    }
}

/// Enumerates every temp-register operand of `inst` (including relative
/// index sub-operands, which always read as uint) with its expected type.
fn walk_temp_accesses(
    inst: &mut Inst,
    resources: &HashMap<(bool, u32), DataType>,
    f: &mut impl FnMut(TempAccess<'_>),
) {
    use DataType::{Float, Int, Uint};

    fn index_expr(expr: &mut IndexExpr, f: &mut impl FnMut(TempAccess<'_>)) {
        if let IndexExpr::Relative { reg, component, .. } = expr {
            let mut scratch = DataType::Uint;
            f(TempAccess {
                reg,
                lanes: 1 << *component,
                expected: Some(DataType::Uint),
                data_type: &mut scratch,
            });
        }
    }

    fn src(op: &mut SrcOperand, expected: Option<DataType>, f: &mut impl FnMut(TempAccess<'_>)) {
        match &mut op.kind {
            SrcKind::Temp { index } => {
                let lanes = {
                    let mut lanes = 0u8;
                    for lane in 0..4 {
                        lanes |= 1 << op.swizzle.get(lane);
                    }
                    lanes
                };
                f(TempAccess { reg: index, lanes, expected, data_type: &mut op.data_type });
            }
            SrcKind::IndexableTemp { offset, .. } => {
                index_expr(offset, f);
                if let Some(expected) = expected {
                    op.data_type = expected;
                }
            }
            SrcKind::Input { index }
            | SrcKind::PatchConstant { index }
            | SrcKind::ConstantBuffer { index, .. }
            | SrcKind::ImmediateConstantBuffer { index } => {
                index_expr(index, f);
                if let Some(expected) = expected {
                    op.data_type = expected;
                }
            }
            SrcKind::InputControlPoint { vertex, .. }
            | SrcKind::OutputControlPoint { vertex, .. } => {
                index_expr(vertex, f);
                if let Some(expected) = expected {
                    op.data_type = expected;
                }
            }
            _ => {
                if let Some(expected) = expected {
                    op.data_type = expected;
                }
            }
        }
    }

    fn dst(op: &mut DstOperand, expected: Option<DataType>, f: &mut impl FnMut(TempAccess<'_>)) {
        match &mut op.kind {
            DstKind::Temp { index } => {
                f(TempAccess {
                    reg: index,
                    lanes: op.mask.0,
                    expected,
                    data_type: &mut op.data_type,
                });
            }
            DstKind::IndexableTemp { offset, .. } => {
                index_expr(offset, f);
                if let Some(expected) = expected {
                    op.data_type = expected;
                }
            }
            DstKind::Output { index } => {
                index_expr(index, f);
                if let Some(expected) = expected {
                    op.data_type = expected;
                }
            }
            _ => {
                if let Some(expected) = expected {
                    op.data_type = expected;
                }
            }
        }
    }

    match inst {
        Inst::Nop
        | Inst::Else
        | Inst::EndIf
        | Inst::Loop
        | Inst::EndLoop
        | Inst::Break
        | Inst::Continue
        | Inst::Case { .. }
        | Inst::Default
        | Inst::EndSwitch
        | Inst::Ret
        | Inst::Sync { .. } => {}

        Inst::Mov { dst: d, src: s } => {
            src(s, None, f);
            dst(d, None, f);
        }
        Inst::MovC { dst: d, cond, a, b } => {
            src(cond, Some(Uint), f);
            src(a, None, f);
            src(b, None, f);
            dst(d, None, f);
        }
        Inst::SwapC { dst0, dst1, cond, a, b } => {
            src(cond, Some(Uint), f);
            src(a, None, f);
            src(b, None, f);
            dst(dst0, None, f);
            dst(dst1, None, f);
        }
        Inst::DotProduct { dst: d, a, b, .. } => {
            src(a, Some(Float), f);
            src(b, Some(Float), f);
            dst(d, Some(Float), f);
        }
        Inst::FloatUnary { dst: d, src: s, .. } => {
            src(s, Some(Float), f);
            dst(d, Some(Float), f);
        }
        Inst::FloatBinary { dst: d, a, b, .. } => {
            src(a, Some(Float), f);
            src(b, Some(Float), f);
            dst(d, Some(Float), f);
        }
        Inst::FloatMad { dst: d, a, b, c } => {
            src(a, Some(Float), f);
            src(b, Some(Float), f);
            src(c, Some(Float), f);
            dst(d, Some(Float), f);
        }
        Inst::SinCos { dst_sin, dst_cos, src: s } => {
            src(s, Some(Float), f);
            dst(dst_sin, Some(Float), f);
            dst(dst_cos, Some(Float), f);
        }
        Inst::FloatCompare { dst: d, a, b, .. } => {
            src(a, Some(Float), f);
            src(b, Some(Float), f);
            dst(d, Some(Uint), f);
        }
        Inst::IntCompare { op, dst: d, a, b } => {
            let operand_ty = match op {
                IntCompareOp::Slt | IntCompareOp::Sge => Int,
                _ => Uint,
            };
            src(a, Some(operand_ty), f);
            src(b, Some(operand_ty), f);
            dst(d, Some(Uint), f);
        }
        Inst::IntUnary { op, dst: d, src: s } => {
            let ty = match op {
                crate::sm5::IntUnaryOp::Neg => Int,
                _ => Uint,
            };
            src(s, Some(ty), f);
            dst(d, Some(ty), f);
        }
        Inst::IntBinary { op, dst: d, a, b } => {
            let ty = match op {
                IntBinaryOp::Min | IntBinaryOp::Max | IntBinaryOp::ShrS => Int,
                _ => Uint,
            };
            src(a, Some(ty), f);
            src(b, Some(if matches!(op, IntBinaryOp::Shl | IntBinaryOp::ShrS | IntBinaryOp::ShrU) { Uint } else { ty }), f);
            dst(d, Some(ty), f);
        }
        Inst::IntBinary2Dst { op, dst_hi, dst_lo, a, b } => {
            let ty = match op {
                IntBinaryOp2Dst::IMul => Int,
                _ => Uint,
            };
            src(a, Some(ty), f);
            src(b, Some(ty), f);
            dst(dst_hi, Some(ty), f);
            dst(dst_lo, Some(ty), f);
        }
        Inst::IntMad { dst: d, a, b, c, signed } => {
            let ty = if *signed { Int } else { Uint };
            src(a, Some(ty), f);
            src(b, Some(ty), f);
            src(c, Some(ty), f);
            dst(d, Some(ty), f);
        }
        Inst::Convert { op, dst: d, src: s } => {
            let (src_ty, dst_ty) = match op {
                ConvertOp::FloatToSigned => (Float, Int),
                ConvertOp::FloatToUnsigned => (Float, Uint),
                ConvertOp::SignedToFloat => (Int, Float),
                ConvertOp::UnsignedToFloat => (Uint, Float),
                ConvertOp::F32ToF16 => (Float, Uint),
                ConvertOp::F16ToF32 => (Uint, Float),
            };
            src(s, Some(src_ty), f);
            dst(d, Some(dst_ty), f);
        }
        Inst::ExtractBits { dst: d, width, offset, src: s, signed } => {
            src(width, Some(Uint), f);
            src(offset, Some(Uint), f);
            src(s, Some(if *signed { Int } else { Uint }), f);
            dst(d, Some(if *signed { Int } else { Uint }), f);
        }
        Inst::BitfieldInsert { dst: d, width, offset, insert, base } => {
            src(width, Some(Uint), f);
            src(offset, Some(Uint), f);
            src(insert, Some(Uint), f);
            src(base, Some(Uint), f);
            dst(d, Some(Uint), f);
        }

        Inst::Sample { dst: d, coord, resource, sampler, .. }
        | Inst::Gather { dst: d, coord, resource, sampler, .. } => {
            let result = resource_result(resource, resources, false);
            src(coord, Some(Float), f);
            src(resource, None, f);
            src(sampler, None, f);
            dst(d, Some(result), f);
        }
        Inst::SampleBias { dst: d, coord, resource, sampler, bias, .. } => {
            let result = resource_result(resource, resources, false);
            src(coord, Some(Float), f);
            src(resource, None, f);
            src(sampler, None, f);
            src(bias, Some(Float), f);
            dst(d, Some(result), f);
        }
        Inst::SampleLod { dst: d, coord, resource, sampler, lod, .. } => {
            let result = resource_result(resource, resources, false);
            src(coord, Some(Float), f);
            src(resource, None, f);
            src(sampler, None, f);
            src(lod, Some(Float), f);
            dst(d, Some(result), f);
        }
        Inst::SampleGrad { dst: d, coord, resource, sampler, ddx, ddy, .. } => {
            let result = resource_result(resource, resources, false);
            src(coord, Some(Float), f);
            src(resource, None, f);
            src(sampler, None, f);
            src(ddx, Some(Float), f);
            src(ddy, Some(Float), f);
            dst(d, Some(result), f);
        }
        Inst::SampleCompare { dst: d, coord, resource, sampler, reference, .. } => {
            src(coord, Some(Float), f);
            src(resource, None, f);
            src(sampler, None, f);
            src(reference, Some(Float), f);
            dst(d, Some(Float), f);
        }
        Inst::GatherCompare { dst: d, coord, resource, sampler, reference, .. } => {
            src(coord, Some(Float), f);
            src(resource, None, f);
            src(sampler, None, f);
            src(reference, Some(Float), f);
            dst(d, Some(Float), f);
        }
        Inst::CalcLod { dst: d, coord, resource, sampler } => {
            src(coord, Some(Float), f);
            src(resource, None, f);
            src(sampler, None, f);
            dst(d, Some(Float), f);
        }
        Inst::Ld { dst: d, address, resource, .. } => {
            let result = resource_result(resource, resources, false);
            src(address, Some(Uint), f);
            src(resource, None, f);
            dst(d, Some(result), f);
        }
        Inst::LdMs { dst: d, address, resource, sample_index } => {
            let result = resource_result(resource, resources, false);
            src(address, Some(Uint), f);
            src(resource, None, f);
            src(sample_index, Some(Uint), f);
            dst(d, Some(result), f);
        }
        Inst::ResInfo { dst: d, mip_level, resource, uint_result } => {
            src(mip_level, Some(Uint), f);
            src(resource, None, f);
            dst(d, Some(if *uint_result { Uint } else { Float }), f);
        }
        Inst::SampleInfo { dst: d, resource, uint_result } => {
            if let Some(resource) = resource {
                src(resource, None, f);
            }
            dst(d, Some(if *uint_result { Uint } else { Float }), f);
        }
        Inst::SamplePos { dst: d, resource, sample_index } => {
            if let Some(resource) = resource {
                src(resource, None, f);
            }
            src(sample_index, Some(Uint), f);
            dst(d, Some(Float), f);
        }
        Inst::BufInfo { dst: d, resource } => {
            src(resource, None, f);
            dst(d, Some(Uint), f);
        }

        Inst::LdUavTyped { dst: d, address, uav } => {
            let result = resource_result(uav, resources, true);
            src(address, Some(Uint), f);
            src(uav, None, f);
            dst(d, Some(result), f);
        }
        Inst::StoreUavTyped { uav, address, value } => {
            let result = match &uav.kind {
                DstKind::Uav { slot } => resources
                    .get(&(true, *slot))
                    .copied()
                    .unwrap_or(DataType::Float),
                _ => DataType::Float,
            };
            src(address, Some(Uint), f);
            src(value, Some(result), f);
            dst(uav, None, f);
        }
        Inst::LdRaw { dst: d, byte_offset, resource } => {
            src(byte_offset, Some(Uint), f);
            src(resource, None, f);
            dst(d, Some(Uint), f);
        }
        Inst::StoreRaw { dst: d, byte_offset, value } => {
            src(byte_offset, Some(Uint), f);
            src(value, Some(Uint), f);
            dst(d, None, f);
        }
        Inst::LdStructured { dst: d, index, byte_offset, resource } => {
            src(index, Some(Uint), f);
            src(byte_offset, Some(Uint), f);
            src(resource, None, f);
            dst(d, Some(Uint), f);
        }
        Inst::StoreStructured { dst: d, index, byte_offset, value } => {
            src(index, Some(Uint), f);
            src(byte_offset, Some(Uint), f);
            src(value, Some(Uint), f);
            dst(d, None, f);
        }

        Inst::AtomicBinOp { op, dst: d, address, value } => {
            let ty = atomic_type(*op);
            src(address, Some(Uint), f);
            src(value, Some(ty), f);
            dst(d, None, f);
        }
        Inst::ImmAtomicBinOp { op, result, dst: d, address, value } => {
            let ty = atomic_type(*op);
            src(address, Some(Uint), f);
            src(value, Some(ty), f);
            dst(result, Some(ty), f);
            dst(d, None, f);
        }
        Inst::AtomicCmpStore { dst: d, address, compare, value } => {
            src(address, Some(Uint), f);
            src(compare, Some(Uint), f);
            src(value, Some(Uint), f);
            dst(d, None, f);
        }
        Inst::ImmAtomicCmpExch { result, dst: d, address, compare, value } => {
            src(address, Some(Uint), f);
            src(compare, Some(Uint), f);
            src(value, Some(Uint), f);
            dst(result, Some(Uint), f);
            dst(d, None, f);
        }
        Inst::ImmAtomicAlloc { result, uav } | Inst::ImmAtomicConsume { result, uav } => {
            dst(result, Some(Uint), f);
            dst(uav, None, f);
        }

        Inst::EvalSnapped { dst: d, interpolant, offset } => {
            src(interpolant, Some(Float), f);
            src(offset, Some(Int), f);
            dst(d, Some(Float), f);
        }
        Inst::EvalSampleIndex { dst: d, interpolant, sample_index } => {
            src(interpolant, Some(Float), f);
            src(sample_index, Some(Uint), f);
            dst(d, Some(Float), f);
        }
        Inst::EvalCentroid { dst: d, interpolant } => {
            src(interpolant, Some(Float), f);
            dst(d, Some(Float), f);
        }

        Inst::Discard { src: s, .. } => src(s, Some(Uint), f),
        Inst::If { src: s, .. }
        | Inst::BreakC { src: s, .. }
        | Inst::ContinueC { src: s, .. }
        | Inst::RetC { src: s, .. } => src(s, Some(Uint), f),
        Inst::Switch { src: s } => src(s, Some(Uint), f),
    }
}

fn resource_result(
    operand: &SrcOperand,
    resources: &HashMap<(bool, u32), DataType>,
    is_uav: bool,
) -> DataType {
    match &operand.kind {
        SrcKind::Resource { slot } if !is_uav => resources
            .get(&(false, *slot))
            .copied()
            .unwrap_or(DataType::Float),
        SrcKind::Uav { slot } if is_uav => resources
            .get(&(true, *slot))
            .copied()
            .unwrap_or(DataType::Float),
        _ => DataType::Float,
    }
}

fn atomic_type(op: AtomicBinOp) -> DataType {
    match op {
        AtomicBinOp::SMax | AtomicBinOp::SMin => DataType::Int,
        _ => DataType::Uint,
    }
}
