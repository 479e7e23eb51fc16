//! The per-opcode dispatch: one arm per decoded instruction family, plus
//! the CFG-driven block lowering.

use airlift_air::air::{
    FpBinOp, FpUnOp, IntBinOp as AirIntBinOp, IntUnOp as AirIntUnOp, MemFlags, SampleControl,
    Signedness, ThreadScope,
};
use airlift_air::ir::{AtomicOp, BinOp, BlockId as IrBlockId, CastOp, Pred, Value};

use super::{Translator, ValueClass};
use crate::cfg::{BlockId, ControlFlowGraph, Terminator};
use crate::sm5::{
    AtomicBinOp, ConvertOp, DstOperand, FloatBinaryOp, FloatCompareOp, FloatUnaryOp, Inst,
    IntBinaryOp, IntBinaryOp2Dst, IntCompareOp, IntUnaryOp, ShaderStage, SrcKind, SrcOperand,
    SyncFlags,
};
use crate::TranslateError;

/// Lowers a recovered CFG into the current function. `epilogue` is the IR
/// block `Return` exits branch to; the caller emits the stage epilogue
/// there.
pub fn lower_cfg(
    t: &mut Translator<'_>,
    cfg: &ControlFlowGraph,
    epilogue: IrBlockId,
) -> Result<(), TranslateError> {
    // Pre-create one IR block per CFG block so back-edges resolve.
    t.block_map.clear();
    for (index, block) in cfg.blocks.iter().enumerate() {
        let ir_block = t.air.ir.create_block(&block.name);
        t.block_map.insert(index as u32, ir_block);
    }
    let entry_ir = t.block_map[&cfg.entry.0];
    t.air.ir.build_br(entry_ir);

    for (index, block) in cfg.blocks.iter().enumerate() {
        let ir_block = t.block_map[&(index as u32)];
        t.air.ir.position_at_end(ir_block);
        for inst in &block.insts {
            lower_inst(t, inst)?;
        }
        lower_terminator(t, &block.terminator, epilogue)?;
    }
    Ok(())
}

fn ir_block(t: &Translator<'_>, id: BlockId) -> IrBlockId {
    t.block_map[&id.0]
}

fn lower_terminator(
    t: &mut Translator<'_>,
    terminator: &Terminator,
    epilogue: IrBlockId,
) -> Result<(), TranslateError> {
    match terminator {
        Terminator::Undefined => Err(TranslateError::Lowering(
            "undefined terminator reached lowering".to_string(),
        )),
        Terminator::Branch { target } => {
            let target = ir_block(t, *target);
            t.air.ir.build_br(target);
            Ok(())
        }
        Terminator::CondBranch { cond, test_nonzero, if_true, if_false } => {
            let cond = condition_scalar(t, cond, *test_nonzero)?;
            let if_true = ir_block(t, *if_true);
            let if_false = ir_block(t, *if_false);
            t.air.ir.build_cond_br(cond, if_true, if_false);
            Ok(())
        }
        Terminator::Switch { value, cases, default } => {
            let value = t.load_src_scalar(value)?;
            let value = t.cast_to_class(value, ValueClass::Int);
            let default = ir_block(t, *default);
            let cases: Vec<(u64, IrBlockId)> = cases
                .iter()
                .map(|(case, block)| (*case as u64, ir_block(t, *block)))
                .collect();
            t.air.ir.build_switch(value, default, cases);
            Ok(())
        }
        Terminator::Return => {
            t.air.ir.build_br(epilogue);
            Ok(())
        }
        Terminator::InstanceBarrier { active, sync, instance_count } => {
            // Threads past the phase's instance count skip the body.
            let instance = t
                .res
                .sv
                .control_point_id
                .or(t.res.sv.fork_instance_id)
                .or(t.res.sv.join_instance_id)
                .or(t.res.sv.thread_id_in_group_flattened)
                .ok_or_else(|| {
                    TranslateError::Lowering("hull phase without instance id".to_string())
                })?;
            let count = t.air.int(*instance_count);
            let cond = t.air.ir.build_icmp(Pred::Ult, instance, count);
            let active = ir_block(t, *active);
            let sync = ir_block(t, *sync);
            t.air.ir.build_cond_br(cond, active, sync);
            Ok(())
        }
        Terminator::HullWriteOutput { epilogue: hull_epilogue } => {
            // Control-point outputs were stored through the group array;
            // reconverge before anything reads them.
            t.air.barrier(MemFlags::THREADGROUP);
            let target = ir_block(t, *hull_epilogue);
            t.air.ir.build_br(target);
            Ok(())
        }
    }
}

fn condition_scalar(
    t: &mut Translator<'_>,
    cond: &SrcOperand,
    test_nonzero: bool,
) -> Result<Value, TranslateError> {
    let value = t.load_src_scalar(cond)?;
    let value = t.cast_to_class(value, ValueClass::Int);
    let zero = t.air.int(0);
    let pred = if test_nonzero { Pred::Ne } else { Pred::Eq };
    Ok(t.air.ir.build_icmp(pred, value, zero))
}

pub fn lower_inst(t: &mut Translator<'_>, inst: &Inst) -> Result<(), TranslateError> {
    match inst {
        Inst::Nop => Ok(()),

        Inst::Mov { dst, src } => {
            let value = t.load_src(src)?;
            t.store_dst_vec4(dst, value)
        }
        Inst::MovC { dst, cond, a, b } => {
            let cond = t.load_src(cond)?;
            let cond = t.cast_to_class(cond, ValueClass::Int);
            let zero = {
                let ty = t.air.ir.module.value_type(cond);
                t.air.ir.module.zero(ty)
            };
            let is_set = t.air.ir.build_icmp(Pred::Ne, cond, zero);
            let a = t.load_src(a)?;
            let b = t.load_src(b)?;
            let b = t.cast_to_class(b, class_of_value(t, a));
            let value = t.air.ir.build_select(is_set, a, b);
            t.store_dst_vec4(dst, value)
        }
        Inst::SwapC { .. } => Err(TranslateError::Lowering(
            "swapc must be expanded by data-type analysis".to_string(),
        )),

        Inst::DotProduct { dim, dst, a, b } => {
            let a = t.load_src_vec(a, *dim as u32)?;
            let b = t.load_src_vec(b, *dim as u32)?;
            let dot = t.air.dot(a, b)?;
            t.store_dst_scalar_splat(dst, dot)
        }
        Inst::FloatUnary { op, dst, src } => {
            let value = t.load_src(src)?;
            let result = match op {
                FloatUnaryOp::Rcp => {
                    let one = t.air.ir.module.const_f32_vec(&[1.0; 4]);
                    t.air.ir.build_fdiv(one, value)
                }
                FloatUnaryOp::Rsq => t.air.fp_unop(FpUnOp::Rsqrt, value),
                FloatUnaryOp::Sqrt => t.air.fp_unop(FpUnOp::Sqrt, value),
                FloatUnaryOp::Exp => t.air.fp_unop(FpUnOp::Exp2, value),
                FloatUnaryOp::Log => t.air.fp_unop(FpUnOp::Log2, value),
                FloatUnaryOp::Frc => t.air.fp_unop(FpUnOp::Fract, value),
                FloatUnaryOp::RoundNe => t.air.fp_unop(FpUnOp::Rint, value),
                FloatUnaryOp::RoundNi => t.air.fp_unop(FpUnOp::Floor, value),
                FloatUnaryOp::RoundPi => t.air.fp_unop(FpUnOp::Ceil, value),
                FloatUnaryOp::RoundZ => t.air.fp_unop(FpUnOp::Trunc, value),
                FloatUnaryOp::DerivRtx
                | FloatUnaryOp::DerivRtxCoarse
                | FloatUnaryOp::DerivRtxFine => {
                    require_fragment(t, "derivative")?;
                    t.air.derivative(value, false)?
                }
                FloatUnaryOp::DerivRty
                | FloatUnaryOp::DerivRtyCoarse
                | FloatUnaryOp::DerivRtyFine => {
                    require_fragment(t, "derivative")?;
                    t.air.derivative(value, true)?
                }
            };
            t.store_dst_vec4(dst, result)
        }
        Inst::FloatBinary { op, dst, a, b } => {
            let a = t.load_src(a)?;
            let b = t.load_src(b)?;
            let result = match op {
                FloatBinaryOp::Add => t.air.ir.build_fadd(a, b),
                FloatBinaryOp::Mul => t.air.ir.build_fmul(a, b),
                FloatBinaryOp::Div => t.air.ir.build_fdiv(a, b),
                FloatBinaryOp::Max => t.air.fp_binop(FpBinOp::FMax, a, b),
                FloatBinaryOp::Min => t.air.fp_binop(FpBinOp::FMin, a, b),
            };
            t.store_dst_vec4(dst, result)
        }
        Inst::FloatMad { dst, a, b, c } => {
            let a = t.load_src(a)?;
            let b = t.load_src(b)?;
            let c = t.load_src(c)?;
            let result = if t.air.ir.fast_math {
                t.air.fma(a, b, c)?
            } else {
                let product = t.air.ir.build_fmul(a, b);
                t.air.ir.build_fadd(product, c)
            };
            t.store_dst_vec4(dst, result)
        }
        Inst::SinCos { dst_sin, dst_cos, src } => {
            let value = t.load_src(src)?;
            if !dst_sin.is_null() {
                let sin = t.air.fp_unop(FpUnOp::Sin, value);
                t.store_dst_vec4(dst_sin, sin)?;
            }
            if !dst_cos.is_null() {
                let cos = t.air.fp_unop(FpUnOp::Cos, value);
                t.store_dst_vec4(dst_cos, cos)?;
            }
            Ok(())
        }
        Inst::FloatCompare { op, dst, a, b } => {
            let a = t.load_src(a)?;
            let b = t.load_src(b)?;
            let pred = match op {
                FloatCompareOp::Eq => Pred::Oeq,
                FloatCompareOp::Ne => Pred::Une,
                FloatCompareOp::Lt => Pred::Olt,
                FloatCompareOp::Ge => Pred::Oge,
            };
            let cmp = t.air.ir.build_fcmp(pred, a, b);
            let mask = t.bool_to_mask(cmp);
            t.store_dst_vec4(dst, mask)
        }
        Inst::IntCompare { op, dst, a, b } => {
            let a = t.load_src(a)?;
            let b = t.load_src(b)?;
            let pred = match op {
                IntCompareOp::Eq => Pred::Eq,
                IntCompareOp::Ne => Pred::Ne,
                IntCompareOp::Slt => Pred::Slt,
                IntCompareOp::Sge => Pred::Sge,
                IntCompareOp::Ult => Pred::Ult,
                IntCompareOp::Uge => Pred::Uge,
            };
            let cmp = t.air.ir.build_icmp(pred, a, b);
            let mask = t.bool_to_mask(cmp);
            t.store_dst_vec4(dst, mask)
        }
        Inst::IntUnary { op, dst, src } => {
            let value = t.load_src(src)?;
            let result = match op {
                IntUnaryOp::Neg => {
                    let zero = {
                        let ty = t.air.ir.module.value_type(value);
                        t.air.ir.module.zero(ty)
                    };
                    t.air.ir.build_sub(zero, value)
                }
                IntUnaryOp::Not => {
                    let ones = all_ones_like(t, value);
                    t.air.ir.build_xor(value, ones)
                }
                IntUnaryOp::ReverseBits => t.air.int_unop(AirIntUnOp::ReverseBits, value),
                IntUnaryOp::CountBits => t.air.int_unop(AirIntUnOp::Popcount, value),
                IntUnaryOp::FirstBitLo => {
                    // ctz, with all-zero lanes reporting ~0.
                    let ctz = t.air.count_zero(value, true);
                    select_all_ones_when_zero(t, value, ctz)
                }
                IntUnaryOp::FirstBitHi => {
                    let clz = t.air.count_zero(value, false);
                    let thirty_one = splat_u32(t, 31);
                    let position = t.air.ir.build_sub(thirty_one, clz);
                    select_all_ones_when_zero(t, value, position)
                }
                IntUnaryOp::FirstBitShi => {
                    // Negative lanes search for the first zero bit.
                    let sign = {
                        let shift = splat_u32(t, 31);
                        t.air.ir.build_binary(BinOp::AShr, value, shift)
                    };
                    let flipped = t.air.ir.build_xor(value, sign);
                    let clz = t.air.count_zero(flipped, false);
                    let thirty_one = splat_u32(t, 31);
                    let position = t.air.ir.build_sub(thirty_one, clz);
                    select_all_ones_when_zero(t, flipped, position)
                }
            };
            t.store_dst_vec4(dst, result)
        }
        Inst::IntBinary { op, dst, a, b } => {
            let a = t.load_src(a)?;
            let b = t.load_src(b)?;
            let result = match op {
                IntBinaryOp::Add => t.air.ir.build_add(a, b),
                IntBinaryOp::And => t.air.ir.build_and(a, b),
                IntBinaryOp::Or => t.air.ir.build_or(a, b),
                IntBinaryOp::Xor => t.air.ir.build_xor(a, b),
                IntBinaryOp::Shl | IntBinaryOp::ShrS | IntBinaryOp::ShrU => {
                    // Shift amounts are masked to the low five bits.
                    let mask = splat_u32(t, 0x1f);
                    let amount = t.air.ir.build_and(b, mask);
                    let binop = match op {
                        IntBinaryOp::Shl => BinOp::Shl,
                        IntBinaryOp::ShrS => BinOp::AShr,
                        _ => BinOp::LShr,
                    };
                    t.air.ir.build_binary(binop, a, amount)
                }
                IntBinaryOp::Min => t.air.int_binop(AirIntBinOp::Min, a, b, true),
                IntBinaryOp::Max => t.air.int_binop(AirIntBinOp::Max, a, b, true),
                IntBinaryOp::UMin => t.air.int_binop(AirIntBinOp::Min, a, b, false),
                IntBinaryOp::UMax => t.air.int_binop(AirIntBinOp::Max, a, b, false),
            };
            t.store_dst_vec4(dst, result)
        }
        Inst::IntBinary2Dst { op, dst_hi, dst_lo, a, b } => {
            let a = t.load_src(a)?;
            let b = t.load_src(b)?;
            match op {
                IntBinaryOp2Dst::IMul | IntBinaryOp2Dst::UMul => {
                    let signed = *op == IntBinaryOp2Dst::IMul;
                    if !dst_lo.is_null() {
                        let lo = t.air.ir.build_mul(a, b);
                        t.store_dst_vec4(dst_lo, lo)?;
                    }
                    if !dst_hi.is_null() {
                        let hi = t.air.int_binop(AirIntBinOp::MulHi, a, b, signed);
                        t.store_dst_vec4(dst_hi, hi)?;
                    }
                }
                IntBinaryOp2Dst::UDiv => {
                    if !dst_hi.is_null() {
                        let quotient = t.air.ir.build_udiv(a, b);
                        t.store_dst_vec4(dst_hi, quotient)?;
                    }
                    if !dst_lo.is_null() {
                        let remainder = t.air.ir.build_binary(BinOp::URem, a, b);
                        t.store_dst_vec4(dst_lo, remainder)?;
                    }
                }
                IntBinaryOp2Dst::UAddCarry | IntBinaryOp2Dst::USubBorrow => {
                    let is_add = *op == IntBinaryOp2Dst::UAddCarry;
                    let result = if is_add {
                        t.air.ir.build_add(a, b)
                    } else {
                        t.air.ir.build_sub(a, b)
                    };
                    if !dst_hi.is_null() {
                        t.store_dst_vec4(dst_hi, result)?;
                    }
                    if !dst_lo.is_null() {
                        let flag = if is_add {
                            t.air.ir.build_icmp(Pred::Ult, result, a)
                        } else {
                            t.air.ir.build_icmp(Pred::Ugt, result, a)
                        };
                        let mask = {
                            let as_mask = t.bool_to_mask(flag);
                            let one = splat_u32(t, 1);
                            t.air.ir.build_and(as_mask, one)
                        };
                        t.store_dst_vec4(dst_lo, mask)?;
                    }
                }
            }
            Ok(())
        }
        Inst::IntMad { dst, a, b, c, signed: _ } => {
            // Wrapping multiply-add; the declared signedness only affects
            // write-back typing, never the arithmetic.
            let a = t.load_src(a)?;
            let b = t.load_src(b)?;
            let c = t.load_src(c)?;
            let c = t.cast_to_class(c, ValueClass::Int);
            let a = t.cast_to_class(a, ValueClass::Int);
            let b = t.cast_to_class(b, ValueClass::Int);
            let product = t.air.ir.build_mul(a, b);
            let sum = t.air.ir.build_add(product, c);
            t.store_dst_vec4(dst, sum)
        }
        Inst::Convert { op, dst, src } => {
            let value = t.load_src(src)?;
            let result = match op {
                ConvertOp::FloatToSigned => t.air.convert_to_signed(value),
                ConvertOp::FloatToUnsigned => t.air.convert_to_unsigned(value),
                ConvertOp::SignedToFloat => t.air.convert_to_float(value, Signedness::Signed),
                ConvertOp::UnsignedToFloat => {
                    t.air.convert_to_float(value, Signedness::Unsigned)
                }
                ConvertOp::F32ToF16 => {
                    let half = t.air.convert_to_half(value, Signedness::Signed);
                    let i16x4 = {
                        let i16t = t.air.ir.module.types.i16();
                        t.air.ir.module.types.vec(i16t, 4)
                    };
                    let bits = t.air.ir.build_bitcast(half, i16x4);
                    let i32x4 = t.air.int_vec_ty(4);
                    t.air.ir.build_zext(bits, i32x4)
                }
                ConvertOp::F16ToF32 => {
                    let value = t.cast_to_class(value, ValueClass::Int);
                    let i16x4 = {
                        let i16t = t.air.ir.module.types.i16();
                        t.air.ir.module.types.vec(i16t, 4)
                    };
                    let low = t.air.ir.build_trunc(value, i16x4);
                    let f16x4 = t.air.half_vec_ty(4);
                    let half = t.air.ir.build_bitcast(low, f16x4);
                    let f32x4 = t.air.float_vec_ty(4);
                    t.air.ir.build_cast(CastOp::FpExt, half, f32x4)
                }
            };
            t.store_dst_vec4(dst, result)
        }
        Inst::ExtractBits { signed, dst, width, offset, src } => {
            let width = t.load_src(width)?;
            let offset = t.load_src(offset)?;
            let value = t.load_src(src)?;
            let five_bits = splat_u32(t, 0x1f);
            let width = t.air.ir.build_and(width, five_bits);
            let offset = t.air.ir.build_and(offset, five_bits);
            let thirty_two = splat_u32(t, 32);
            // value << (32 - width - offset), then shifted back down with
            // the sign-appropriate shift; width == 0 lanes produce zero.
            let up = {
                let total = t.air.ir.build_add(width, offset);
                t.air.ir.build_sub(thirty_two, total)
            };
            let down = t.air.ir.build_sub(thirty_two, width);
            let shifted_up = t.air.ir.build_binary(BinOp::Shl, value, up);
            let shifted_down = t.air.ir.build_binary(
                if *signed { BinOp::AShr } else { BinOp::LShr },
                shifted_up,
                down,
            );
            let zero = splat_u32(t, 0);
            let width_is_zero = t.air.ir.build_icmp(Pred::Eq, width, zero);
            let result = t.air.ir.build_select(width_is_zero, zero, shifted_down);
            t.store_dst_vec4(dst, result)
        }
        Inst::BitfieldInsert { dst, width, offset, insert, base } => {
            let width = t.load_src(width)?;
            let offset = t.load_src(offset)?;
            let insert = t.load_src(insert)?;
            let base = t.load_src(base)?;
            let five_bits = splat_u32(t, 0x1f);
            let width = t.air.ir.build_and(width, five_bits);
            let offset = t.air.ir.build_and(offset, five_bits);
            let one = splat_u32(t, 1);
            let field = {
                let ones = t.air.ir.build_binary(BinOp::Shl, one, width);
                let ones = t.air.ir.build_sub(ones, one);
                t.air.ir.build_binary(BinOp::Shl, ones, offset)
            };
            let shifted_insert = {
                let value = t.air.ir.build_binary(BinOp::Shl, insert, offset);
                t.air.ir.build_and(value, field)
            };
            let kept = {
                let inverted = {
                    let ones = all_ones_like(t, field);
                    t.air.ir.build_xor(field, ones)
                };
                t.air.ir.build_and(base, inverted)
            };
            let result = t.air.ir.build_or(shifted_insert, kept);
            t.store_dst_vec4(dst, result)
        }

        Inst::Sample { dst, coord, resource, sampler, offset } => {
            lower_sample(t, dst, coord, resource, sampler, *offset, SampleArgs::Default)
        }
        Inst::SampleBias { dst, coord, resource, sampler, bias, offset } => {
            let bias = t.load_src_scalar(bias)?;
            lower_sample(t, dst, coord, resource, sampler, *offset, SampleArgs::Bias(bias))
        }
        Inst::SampleLod { dst, coord, resource, sampler, lod, offset } => {
            let lod = t.load_src_scalar(lod)?;
            lower_sample(t, dst, coord, resource, sampler, *offset, SampleArgs::Level(lod))
        }
        Inst::SampleGrad { dst, coord, resource, sampler, ddx, ddy, offset } => {
            let (slot, handle) = resolve_texture(t, resource)?;
            let sampler = sampler_handle(t, sampler)?;
            let info = slot.texture.kind.info();
            let coord_value = t.load_src_vec(coord, info.coord_dim)?;
            let array_index = texture_array_index(t, &slot, coord)?;
            let ddx = t.load_src_vec(ddx, info.coord_dim)?;
            let ddy = t.load_src_vec(ddy, info.coord_dim)?;
            let min_lod = t.air.float(0.0);
            let (texel, _resident) = t.air.sample_grad(
                &slot.texture,
                handle,
                sampler,
                coord_value,
                array_index,
                ddx,
                ddy,
                min_lod,
                *offset,
            )?;
            store_texel(t, dst, &slot, resource, texel)
        }
        Inst::SampleCompare { dst, coord, resource, sampler, reference, level_zero, offset } => {
            let (slot, handle) = resolve_texture(t, resource)?;
            let sampler = sampler_handle(t, sampler)?;
            let info = slot.texture.kind.info();
            let coord_value = t.load_src_vec(coord, info.coord_dim)?;
            let array_index = texture_array_index(t, &slot, coord)?;
            let reference = t.load_src_scalar(reference)?;
            let control = if *level_zero {
                let zero = t.air.float(0.0);
                SampleControl::Level(zero)
            } else {
                SampleControl::Default
            };
            let (texel, _resident) = t.air.sample_compare(
                &slot.texture,
                handle,
                sampler,
                coord_value,
                array_index,
                reference,
                *offset,
                control,
            )?;
            // Depth compares produce a scalar; results splat across the
            // destination mask.
            t.store_dst_scalar_splat(dst, texel)
        }
        Inst::Gather { dst, coord, resource, sampler, offset } => {
            let (slot, handle) = resolve_texture(t, resource)?;
            // The gather component rides in the sampler operand swizzle.
            let component = sampler.swizzle.get(0) as u32;
            let sampler_value = sampler_handle(t, sampler)?;
            let info = slot.texture.kind.info();
            let coord_value = t.load_src_vec(coord, info.coord_dim)?;
            let array_index = texture_array_index(t, &slot, coord)?;
            let offset_value = gather_offset(t, &slot, *offset);
            let component = t.air.int(component);
            let (texel, _resident) = t.air.gather(
                &slot.texture,
                handle,
                sampler_value,
                coord_value,
                array_index,
                offset_value,
                component,
            )?;
            store_texel(t, dst, &slot, resource, texel)
        }
        Inst::GatherCompare { dst, coord, resource, sampler, reference, offset } => {
            let (slot, handle) = resolve_texture(t, resource)?;
            let sampler_value = sampler_handle(t, sampler)?;
            let info = slot.texture.kind.info();
            let coord_value = t.load_src_vec(coord, info.coord_dim)?;
            let array_index = texture_array_index(t, &slot, coord)?;
            let reference = t.load_src_scalar(reference)?;
            let offset_value = gather_offset(t, &slot, *offset);
            let (texel, _resident) = t.air.gather_compare(
                &slot.texture,
                handle,
                sampler_value,
                coord_value,
                array_index,
                reference,
                offset_value,
            )?;
            store_texel(t, dst, &slot, resource, texel)
        }
        Inst::CalcLod { dst, coord, resource, sampler } => {
            require_fragment(t, "lod query")?;
            let (slot, handle) = resolve_texture(t, resource)?;
            let sampler = sampler_handle(t, sampler)?;
            let info = slot.texture.kind.info();
            let coord_value = t.load_src_vec(coord, info.coord_dim)?;
            let (clamped, unclamped) =
                t.air.calculate_lod(&slot.texture, handle, sampler, coord_value)?;
            // lod.x = clamped, lod.y = unclamped.
            let float4 = t.air.float_vec_ty(4);
            let undef = t.air.ir.module.undef(float4);
            let with_x = t.air.ir.build_insert_element(undef, clamped, 0);
            let with_xy = t.air.ir.build_insert_element(with_x, unclamped, 1);
            let zero = t.air.float(0.0);
            let with_xyz = t.air.ir.build_insert_element(with_xy, zero, 2);
            let value = t.air.ir.build_insert_element(with_xyz, zero, 3);
            t.store_dst_vec4(dst, value)
        }
        Inst::Ld { dst, address, resource, offset: _ } => {
            let (slot, handle) = resolve_texture(t, resource)?;
            let info = slot.texture.kind.info();
            let pos_dim = if info.is_cube { 2 } else { info.coord_dim };
            let address_int = t.load_src(address)?;
            let address_int = t.cast_to_class(address_int, ValueClass::Int);
            let pos = narrow_vec(t, address_int, pos_dim);
            let array_index = if info.is_array {
                Some(extract_lane(t, address_int, info.coord_dim))
            } else {
                None
            };
            // ld's address.w is the mip level (unused for buffers).
            let level = if info.is_mipmapped {
                Some(extract_lane(t, address_int, 3))
            } else {
                None
            };
            let (texel, _resident) =
                t.air.read(&slot.texture, handle, pos, array_index, None, level)?;
            store_texel(t, dst, &slot, resource, texel)
        }
        Inst::LdMs { dst, address, resource, sample_index } => {
            let (slot, handle) = resolve_texture(t, resource)?;
            let info = slot.texture.kind.info();
            let address_int = t.load_src(address)?;
            let address_int = t.cast_to_class(address_int, ValueClass::Int);
            let pos = narrow_vec(t, address_int, 2);
            let array_index = if info.is_array {
                Some(extract_lane(t, address_int, 2))
            } else {
                None
            };
            let sample = t.load_src_scalar(sample_index)?;
            let sample = t.cast_to_class(sample, ValueClass::Int);
            let (texel, _resident) =
                t.air.read(&slot.texture, handle, pos, array_index, Some(sample), None)?;
            store_texel(t, dst, &slot, resource, texel)
        }
        Inst::ResInfo { dst, mip_level, resource, uint_result } => {
            lower_resinfo(t, dst, mip_level, resource, *uint_result)
        }
        Inst::SampleInfo { dst, resource, uint_result } => {
            let samples = match resource {
                Some(resource) => {
                    let (slot, handle) = resolve_texture(t, resource)?;
                    let zero = t.air.int(0);
                    t.air.texture_query(
                        &slot.texture,
                        handle,
                        airlift_air::air::TextureQuery::NumSamples,
                        zero,
                    )?
                }
                None => t.air.get_num_samples(),
            };
            let value = if *uint_result {
                samples
            } else {
                t.air.convert_to_float(samples, Signedness::Unsigned)
            };
            t.store_dst_scalar_splat(dst, value)
        }
        Inst::SamplePos { dst, resource, sample_index } => {
            let count = match resource {
                Some(resource) => {
                    let (slot, handle) = resolve_texture(t, resource)?;
                    let zero = t.air.int(0);
                    t.air.texture_query(
                        &slot.texture,
                        handle,
                        airlift_air::air::TextureQuery::NumSamples,
                        zero,
                    )?
                }
                None => t.air.get_num_samples(),
            };
            let index = t.load_src_scalar(sample_index)?;
            let index = t.cast_to_class(index, ValueClass::Int);
            let position = sample_position(t, count, index);
            t.store_dst_vec4(dst, position)
        }
        Inst::BufInfo { dst, resource } => {
            let slot = match &resource.kind {
                SrcKind::Resource { slot } => (false, *slot),
                SrcKind::Uav { slot } => (true, *slot),
                _ => {
                    return Err(TranslateError::Lowering(
                        "bufinfo on non-buffer operand".to_string(),
                    ));
                }
            };
            let (entry, _ptr, byte_len) = t.load_buffer(slot.1, slot.0)?;
            let value = if entry.stride > 1 {
                let stride = t.air.int(entry.stride);
                t.air.ir.build_udiv(byte_len, stride)
            } else {
                byte_len
            };
            t.store_dst_scalar_splat(dst, value)
        }

        Inst::LdUavTyped { dst, address, uav } => {
            let (slot, handle) = resolve_uav_texture(t, uav)?;
            let info = slot.texture.kind.info();
            let pos_dim = if info.is_cube { 2 } else { info.coord_dim };
            let address_int = t.load_src(address)?;
            let address_int = t.cast_to_class(address_int, ValueClass::Int);
            let pos = narrow_vec(t, address_int, pos_dim);
            let array_index = if info.is_array {
                Some(extract_lane(t, address_int, info.coord_dim))
            } else {
                None
            };
            let (texel, _resident) =
                t.air.read(&slot.texture, handle, pos, array_index, None, None)?;
            store_texel(t, dst, &slot, uav, texel)
        }
        Inst::StoreUavTyped { uav, address, value } => {
            let slot_index = match &uav.kind {
                crate::sm5::DstKind::Uav { slot } => *slot,
                _ => {
                    return Err(TranslateError::Lowering(
                        "store_uav_typed to non-uav".to_string(),
                    ));
                }
            };
            let slot = t.res.uav_textures.get(&slot_index).copied().ok_or_else(|| {
                TranslateError::Lowering(format!("u{slot_index} not declared as texture"))
            })?;
            let field_ptr = t.arg_buffer_field_ptr(slot.field)?;
            let handle = t.air.ir.build_load(field_ptr, 8);
            let info = slot.texture.kind.info();
            let pos_dim = if info.is_cube { 2 } else { info.coord_dim };
            let address_int = t.load_src(address)?;
            let address_int = t.cast_to_class(address_int, ValueClass::Int);
            let pos = narrow_vec(t, address_int, pos_dim);
            let array_index = if info.is_array {
                Some(extract_lane(t, address_int, info.coord_dim))
            } else {
                None
            };
            let texel = t.load_src(value)?;
            let wanted = texel_class(&slot);
            let texel = t.cast_to_class(texel, wanted);
            t.air.write(&slot.texture, handle, pos, array_index, None, None, texel)?;
            Ok(())
        }
        Inst::LdRaw { dst, byte_offset, resource } => {
            lower_raw_load(t, dst, byte_offset, None, resource)
        }
        Inst::LdStructured { dst, index, byte_offset, resource } => {
            lower_raw_load(t, dst, byte_offset, Some(index), resource)
        }
        Inst::StoreRaw { dst, byte_offset, value } => {
            lower_raw_store(t, dst, byte_offset, None, value)
        }
        Inst::StoreStructured { dst, index, byte_offset, value } => {
            lower_raw_store(t, dst, byte_offset, Some(index), value)
        }

        Inst::AtomicBinOp { op, dst, address, value } => {
            lower_atomic(t, *op, None, dst, address, value)
        }
        Inst::ImmAtomicBinOp { op, result, dst, address, value } => {
            lower_atomic(t, *op, Some(result), dst, address, value)
        }
        Inst::AtomicCmpStore { dst, address, compare, value } => {
            lower_cmpxchg(t, None, dst, address, compare, value)
        }
        Inst::ImmAtomicCmpExch { result, dst, address, compare, value } => {
            lower_cmpxchg(t, Some(result), dst, address, compare, value)
        }
        Inst::ImmAtomicAlloc { result, uav } | Inst::ImmAtomicConsume { result, uav } => {
            let is_alloc = matches!(inst, Inst::ImmAtomicAlloc { .. });
            let slot_index = match &uav.kind {
                crate::sm5::DstKind::Uav { slot } => *slot,
                _ => {
                    return Err(TranslateError::Lowering(
                        "counter op on non-uav".to_string(),
                    ));
                }
            };
            let counter = t.res.uav_counters.get(&slot_index).copied().ok_or_else(|| {
                TranslateError::Lowering(format!("u{slot_index} has no counter"))
            })?;
            let field_ptr = t.arg_buffer_field_ptr(counter.field)?;
            let ptr = t.air.ir.build_load(field_ptr, 8);
            let one = t.air.int(1);
            let prior = t.air.atomic_rmw(
                if is_alloc { AtomicOp::Add } else { AtomicOp::Sub },
                ptr,
                one,
            )?;
            let value = if is_alloc {
                prior
            } else {
                let one = t.air.int(1);
                t.air.ir.build_sub(prior, one)
            };
            t.store_dst_scalar_splat(result, value)
        }

        Inst::EvalSnapped { dst, interpolant, offset } => {
            let slot = interpolant_slot(t, interpolant)?;
            let offset_value = t.load_src(offset)?;
            let offset_value = t.cast_to_class(offset_value, ValueClass::Int);
            let offset2 = narrow_vec(t, offset_value, 2);
            let value =
                t.air.interpolate_at_offset(slot.ptr, offset2, slot.perspective);
            let value = swizzled(t, value, interpolant);
            t.store_dst_vec4(dst, value)
        }
        Inst::EvalSampleIndex { dst, interpolant, sample_index } => {
            let slot = interpolant_slot(t, interpolant)?;
            let index = t.load_src_scalar(sample_index)?;
            let index = t.cast_to_class(index, ValueClass::Int);
            let value = t.air.interpolate_at_sample(slot.ptr, index, slot.perspective);
            let value = swizzled(t, value, interpolant);
            t.store_dst_vec4(dst, value)
        }
        Inst::EvalCentroid { dst, interpolant } => {
            let slot = interpolant_slot(t, interpolant)?;
            let value = t.air.interpolate_at_centroid(slot.ptr, slot.perspective);
            let value = swizzled(t, value, interpolant);
            t.store_dst_vec4(dst, value)
        }

        Inst::Discard { nonzero, src } => {
            // The discard itself is unconditional; the predicate guards
            // the block it sits in.
            let cond = condition_scalar(t, src, *nonzero)?;
            let discard_block = t.air.ir.create_block("discard");
            let continue_block = t.air.ir.create_block("discard_join");
            t.air.ir.build_cond_br(cond, discard_block, continue_block);
            t.air.ir.position_at_end(discard_block);
            t.air.discard();
            t.air.ir.build_br(continue_block);
            t.air.ir.position_at_end(continue_block);
            Ok(())
        }
        Inst::Sync { flags } => {
            let mut mem = if flags.contains(SyncFlags::TGSM) {
                MemFlags::THREADGROUP
            } else {
                MemFlags::empty()
            };
            let uav_boundary =
                flags.contains(SyncFlags::UAV_GROUP) || flags.contains(SyncFlags::UAV_GLOBAL);
            if uav_boundary {
                mem |= MemFlags::DEVICE | MemFlags::TEXTURE;
                let scope = if flags.contains(SyncFlags::UAV_GLOBAL) {
                    ThreadScope::Device
                } else {
                    ThreadScope::Threadgroup
                };
                t.air.atomic_fence(mem, scope, false);
                if flags.contains(SyncFlags::THREADS_IN_GROUP) {
                    t.air.barrier(MemFlags::empty());
                }
            } else if flags.contains(SyncFlags::THREADS_IN_GROUP) {
                t.air.barrier(mem);
            } else if !mem.is_empty() {
                t.air.atomic_fence(mem, ThreadScope::Threadgroup, false);
            }
            Ok(())
        }

        Inst::If { .. }
        | Inst::Else
        | Inst::EndIf
        | Inst::Loop
        | Inst::EndLoop
        | Inst::Break
        | Inst::BreakC { .. }
        | Inst::Continue
        | Inst::ContinueC { .. }
        | Inst::Switch { .. }
        | Inst::Case { .. }
        | Inst::Default
        | Inst::EndSwitch
        | Inst::Ret
        | Inst::RetC { .. } => Err(TranslateError::Lowering(
            "control-flow token reached instruction lowering".to_string(),
        )),
    }
}

/* Texture helpers */

enum SampleArgs {
    Default,
    Bias(Value),
    Level(Value),
}

fn resolve_texture(
    t: &mut Translator<'_>,
    resource: &SrcOperand,
) -> Result<(super::TextureSlot, Value), TranslateError> {
    match &resource.kind {
        SrcKind::Resource { slot } => t.load_texture(*slot, false),
        SrcKind::Uav { slot } => t.load_texture(*slot, true),
        _ => Err(TranslateError::Lowering(
            "expected a resource operand".to_string(),
        )),
    }
}

fn resolve_uav_texture(
    t: &mut Translator<'_>,
    resource: &SrcOperand,
) -> Result<(super::TextureSlot, Value), TranslateError> {
    match &resource.kind {
        SrcKind::Uav { slot } => t.load_texture(*slot, true),
        _ => Err(TranslateError::Lowering(
            "expected a uav operand".to_string(),
        )),
    }
}

fn sampler_handle(
    t: &mut Translator<'_>,
    sampler: &SrcOperand,
) -> Result<Value, TranslateError> {
    match &sampler.kind {
        SrcKind::Sampler { slot } => t.load_sampler(*slot),
        _ => Err(TranslateError::Lowering(
            "expected a sampler operand".to_string(),
        )),
    }
}

/// Array kinds take the slice from the coordinate lane past the spatial
/// dimensions, rounded to nearest.
fn texture_array_index(
    t: &mut Translator<'_>,
    slot: &super::TextureSlot,
    coord: &SrcOperand,
) -> Result<Option<Value>, TranslateError> {
    let info = slot.texture.kind.info();
    if !info.is_array {
        return Ok(None);
    }
    let full = t.load_src(coord)?;
    let lane = extract_lane(t, full, info.coord_dim);
    let rounded = t.air.fp_unop(FpUnOp::Rint, lane);
    let i32t = t.air.int_ty();
    Ok(Some(t.air.ir.build_cast(CastOp::FpToUi, rounded, i32t)))
}

fn gather_offset(
    t: &mut Translator<'_>,
    slot: &super::TextureSlot,
    offset: [i32; 3],
) -> Option<Value> {
    use airlift_air::air::TextureKind::*;
    match slot.texture.kind {
        Texture2d | Texture2dArray | Depth2d | Depth2dArray => {
            Some(t.air.int2(offset[0] as u32, offset[1] as u32))
        }
        _ => None,
    }
}

fn texel_class(slot: &super::TextureSlot) -> ValueClass {
    match slot.texture.sample_type {
        airlift_air::air::SampleType::Int | airlift_air::air::SampleType::Uint => ValueClass::Int,
        _ => ValueClass::Float,
    }
}

/// Widens depth results, applies the resource read swizzle and the
/// destination mask.
fn store_texel(
    t: &mut Translator<'_>,
    dst: &DstOperand,
    _slot: &super::TextureSlot,
    resource: &SrcOperand,
    texel: Value,
) -> Result<(), TranslateError> {
    let texel_ty = t.air.ir.module.value_type(texel);
    let vec4 = if t.air.ir.module.types.vector_len(texel_ty).is_none() {
        t.air.ir.build_vector_splat(4, texel)
    } else {
        texel
    };
    let swizzled = {
        let mask: Vec<i32> = resource.swizzle.0.iter().map(|&c| c as i32).collect();
        t.air.ir.build_shuffle(vec4, &mask)
    };
    t.store_dst_vec4(dst, swizzled)
}

fn swizzled(t: &mut Translator<'_>, value: Value, operand: &SrcOperand) -> Value {
    let mask: Vec<i32> = operand.swizzle.0.iter().map(|&c| c as i32).collect();
    t.air.ir.build_shuffle(value, &mask)
}

fn interpolant_slot(
    t: &Translator<'_>,
    interpolant: &SrcOperand,
) -> Result<super::InterpolantSlot, TranslateError> {
    let reg = match &interpolant.kind {
        SrcKind::Input { index } => index.as_imm().ok_or_else(|| {
            TranslateError::Unsupported("dynamically indexed interpolant".to_string())
        })?,
        _ => {
            return Err(TranslateError::Lowering(
                "interpolation source must be an input".to_string(),
            ));
        }
    };
    t.res.interpolants.get(&reg).copied().ok_or_else(|| {
        TranslateError::Lowering(format!("input v{reg} is not an interpolant"))
    })
}

fn lower_sample(
    t: &mut Translator<'_>,
    dst: &DstOperand,
    coord: &SrcOperand,
    resource: &SrcOperand,
    sampler: &SrcOperand,
    offset: [i32; 3],
    args: SampleArgs,
) -> Result<(), TranslateError> {
    require_sampling_stage(t)?;
    let (slot, handle) = resolve_texture(t, resource)?;
    let sampler = sampler_handle(t, sampler)?;
    let info = slot.texture.kind.info();
    let coord_value = t.load_src_vec(coord, info.coord_dim)?;
    let array_index = texture_array_index(t, &slot, coord)?;
    let control = match args {
        SampleArgs::Default => SampleControl::Default,
        SampleArgs::Bias(bias) => SampleControl::Bias(bias),
        SampleArgs::Level(lod) => SampleControl::Level(lod),
    };
    let (texel, _resident) = t.air.sample(
        &slot.texture,
        handle,
        sampler,
        coord_value,
        array_index,
        offset,
        control,
    )?;
    let texel = if info.is_depth {
        t.air.ir.build_vector_splat(4, texel)
    } else {
        texel
    };
    store_texel(t, dst, &slot, resource, texel)
}

fn lower_resinfo(
    t: &mut Translator<'_>,
    dst: &DstOperand,
    mip_level: &SrcOperand,
    resource: &SrcOperand,
    uint_result: bool,
) -> Result<(), TranslateError> {
    use airlift_air::air::TextureQuery;
    let (slot, handle) = resolve_texture(t, resource)?;
    let info = slot.texture.kind.info();
    let level = t.load_src_scalar(mip_level)?;
    let level = t.cast_to_class(level, ValueClass::Int);

    let width = t.air.texture_query(&slot.texture, handle, TextureQuery::Width, level)?;
    let height = if info.coord_dim >= 2 {
        t.air.texture_query(&slot.texture, handle, TextureQuery::Height, level)?
    } else {
        t.air.int(0)
    };
    let depth_or_layers = if slot.texture.kind == airlift_air::air::TextureKind::Texture3d {
        t.air.texture_query(&slot.texture, handle, TextureQuery::Depth, level)?
    } else if info.is_array {
        t.air
            .texture_query(&slot.texture, handle, TextureQuery::ArrayLength, level)?
    } else {
        t.air.int(0)
    };
    let mips = if info.is_mipmapped {
        t.air
            .texture_query(&slot.texture, handle, TextureQuery::NumMipLevels, level)?
    } else {
        t.air.int(1)
    };

    let int4 = t.air.int_vec_ty(4);
    let undef = t.air.ir.module.undef(int4);
    let v = t.air.ir.build_insert_element(undef, width, 0);
    let v = t.air.ir.build_insert_element(v, height, 1);
    let v = t.air.ir.build_insert_element(v, depth_or_layers, 2);
    let v = t.air.ir.build_insert_element(v, mips, 3);
    let value = if uint_result {
        v
    } else {
        t.air.convert_to_float(v, Signedness::Unsigned)
    };
    t.store_dst_vec4(dst, value)
}

/* Raw and structured memory */

enum RawTarget {
    DeviceBuffer { ptr: Value, byte_len: Value, stride: u32 },
    Tgsm { ptr: Value, stride: u32 },
}

fn resolve_raw_src(
    t: &mut Translator<'_>,
    resource: &SrcOperand,
) -> Result<RawTarget, TranslateError> {
    match &resource.kind {
        SrcKind::Resource { slot } => {
            let (entry, ptr, len) = t.load_buffer(*slot, false)?;
            Ok(RawTarget::DeviceBuffer { ptr, byte_len: len, stride: entry.stride })
        }
        SrcKind::Uav { slot } => {
            let (entry, ptr, len) = t.load_buffer(*slot, true)?;
            Ok(RawTarget::DeviceBuffer { ptr, byte_len: len, stride: entry.stride })
        }
        SrcKind::Tgsm { slot } => {
            let entry = t.res.tgsm.get(slot).copied().ok_or_else(|| {
                TranslateError::Lowering(format!("g{slot} not declared"))
            })?;
            Ok(RawTarget::Tgsm { ptr: entry.ptr, stride: entry.stride })
        }
        _ => Err(TranslateError::Lowering(
            "expected a buffer resource".to_string(),
        )),
    }
}

fn resolve_raw_dst(
    t: &mut Translator<'_>,
    dst: &DstOperand,
) -> Result<RawTarget, TranslateError> {
    match &dst.kind {
        crate::sm5::DstKind::Uav { slot } => {
            let (entry, ptr, len) = t.load_buffer(*slot, true)?;
            Ok(RawTarget::DeviceBuffer { ptr, byte_len: len, stride: entry.stride })
        }
        crate::sm5::DstKind::Tgsm { slot } => {
            let entry = t.res.tgsm.get(slot).copied().ok_or_else(|| {
                TranslateError::Lowering(format!("g{slot} not declared"))
            })?;
            Ok(RawTarget::Tgsm { ptr: entry.ptr, stride: entry.stride })
        }
        _ => Err(TranslateError::Lowering(
            "expected a memory destination".to_string(),
        )),
    }
}

/// Computes the u32 element index for a raw or structured access.
fn element_index(
    t: &mut Translator<'_>,
    stride: u32,
    index: Option<&SrcOperand>,
    byte_offset: &SrcOperand,
) -> Result<Value, TranslateError> {
    let byte_offset_value = t.load_src_scalar(byte_offset)?;
    let byte_offset_value = t.cast_to_class(byte_offset_value, ValueClass::Int);
    let byte_index = match index {
        Some(index) => {
            let element = t.load_src_scalar(index)?;
            let element = t.cast_to_class(element, ValueClass::Int);
            let stride = t.air.int(stride);
            let base = t.air.ir.build_mul(element, stride);
            t.air.ir.build_add(base, byte_offset_value)
        }
        None => byte_offset_value,
    };
    let two = t.air.int(2);
    Ok(t.air.ir.build_binary(BinOp::LShr, byte_index, two))
}

fn lower_raw_load(
    t: &mut Translator<'_>,
    dst: &DstOperand,
    byte_offset: &SrcOperand,
    index: Option<&SrcOperand>,
    resource: &SrcOperand,
) -> Result<(), TranslateError> {
    let target = resolve_raw_src(t, resource)?;
    let (base, byte_len, stride) = match target {
        RawTarget::DeviceBuffer { ptr, byte_len, stride } => (ptr, Some(byte_len), stride),
        RawTarget::Tgsm { ptr, stride } => (ptr, None, stride),
    };
    let first = element_index(t, stride, index, byte_offset)?;

    // One u32 per enabled destination lane, read through the resource
    // swizzle.
    let int4 = t.air.int_vec_ty(4);
    let mut value = t.air.ir.module.undef(int4);
    for lane in dst.mask.lanes() {
        let component = resource.swizzle.get(lane as usize) as u32;
        let offset = t.air.int(component);
        let element = t.air.ir.build_add(first, offset);
        let ptr = match byte_len {
            Some(len) => t.gep_u32_bound_checked(base, element, len),
            None => {
                let i32t = t.air.int_ty();
                t.air.ir.build_gep(i32t, base, &[element])
            }
        };
        let loaded = t.air.ir.build_load(ptr, 4);
        value = t.air.ir.build_insert_element(value, loaded, lane);
    }
    t.store_dst_vec4(dst, value)
}

fn lower_raw_store(
    t: &mut Translator<'_>,
    dst: &DstOperand,
    byte_offset: &SrcOperand,
    index: Option<&SrcOperand>,
    value: &SrcOperand,
) -> Result<(), TranslateError> {
    let target = resolve_raw_dst(t, dst)?;
    let (base, byte_len, stride) = match target {
        RawTarget::DeviceBuffer { ptr, byte_len, stride } => (ptr, Some(byte_len), stride),
        RawTarget::Tgsm { ptr, stride } => (ptr, None, stride),
    };
    let first = element_index(t, stride, index, byte_offset)?;
    let value_vec = t.load_src(value)?;
    let value_vec = t.cast_to_class(value_vec, ValueClass::Int);

    let mut slot = 0u32;
    for lane in dst.mask.lanes() {
        let offset = t.air.int(slot);
        let element = t.air.ir.build_add(first, offset);
        let ptr = match byte_len {
            Some(len) => t.gep_u32_bound_checked(base, element, len),
            None => {
                let i32t = t.air.int_ty();
                t.air.ir.build_gep(i32t, base, &[element])
            }
        };
        let component = t.air.ir.build_extract_element(value_vec, lane);
        t.air.ir.build_store(component, ptr, 4);
        slot += 1;
    }
    Ok(())
}

/* Atomics */

fn atomic_op_to_air(op: AtomicBinOp) -> AtomicOp {
    match op {
        AtomicBinOp::And => AtomicOp::And,
        AtomicBinOp::Or => AtomicOp::Or,
        AtomicBinOp::Xor => AtomicOp::Xor,
        AtomicBinOp::Add => AtomicOp::Add,
        AtomicBinOp::SMax => AtomicOp::Max,
        AtomicBinOp::SMin => AtomicOp::Min,
        AtomicBinOp::UMax => AtomicOp::UMax,
        AtomicBinOp::UMin => AtomicOp::UMin,
        AtomicBinOp::Exchange => AtomicOp::Xchg,
    }
}

/// Resolves the pointer an atomic operates on: raw/structured UAVs and
/// TGSM. Typed-buffer UAVs take the raw-device-buffer emulation path.
fn atomic_pointer(
    t: &mut Translator<'_>,
    dst: &DstOperand,
    address: &SrcOperand,
) -> Result<Value, TranslateError> {
    match &dst.kind {
        crate::sm5::DstKind::Uav { slot } => {
            let stride = t
                .res
                .uav_buffers
                .get(slot)
                .map(|entry| entry.stride)
                .ok_or_else(|| {
                    TranslateError::Lowering(format!("u{slot} is not an atomic-capable buffer"))
                })?;
            let (_, base, byte_len) = t.load_buffer(*slot, true)?;
            let element = atomic_element_index(t, stride, address)?;
            Ok(t.gep_u32_bound_checked(base, element, byte_len))
        }
        crate::sm5::DstKind::Tgsm { slot } => {
            let entry = t.res.tgsm.get(slot).copied().ok_or_else(|| {
                TranslateError::Lowering(format!("g{slot} not declared"))
            })?;
            let element = atomic_element_index(t, entry.stride, address)?;
            let i32t = t.air.int_ty();
            Ok(t.air.ir.build_gep(i32t, entry.ptr, &[element]))
        }
        _ => Err(TranslateError::Lowering(
            "atomic destination must be uav or tgsm".to_string(),
        )),
    }
}

/// Structured targets address `(index, byte offset)`; raw targets a byte
/// offset.
fn atomic_element_index(
    t: &mut Translator<'_>,
    stride: u32,
    address: &SrcOperand,
) -> Result<Value, TranslateError> {
    let addr = t.load_src(address)?;
    let addr = t.cast_to_class(addr, ValueClass::Int);
    let byte_index = if stride != 0 {
        let element = t.air.ir.build_extract_element(addr, 0);
        let offset = t.air.ir.build_extract_element(addr, 1);
        let stride = t.air.int(stride);
        let base = t.air.ir.build_mul(element, stride);
        t.air.ir.build_add(base, offset)
    } else {
        t.air.ir.build_extract_element(addr, 0)
    };
    let two = t.air.int(2);
    Ok(t.air.ir.build_binary(BinOp::LShr, byte_index, two))
}

fn lower_atomic(
    t: &mut Translator<'_>,
    op: AtomicBinOp,
    result: Option<&DstOperand>,
    dst: &DstOperand,
    address: &SrcOperand,
    value: &SrcOperand,
) -> Result<(), TranslateError> {
    // Typed UAV textures (other than buffers) go through the texture
    // atomic ABI.
    if let crate::sm5::DstKind::Uav { slot } = &dst.kind {
        if let Some(tex_slot) = t.res.uav_textures.get(slot).copied() {
            if tex_slot.texture.kind != airlift_air::air::TextureKind::TextureBuffer {
                let field_ptr = t.arg_buffer_field_ptr(tex_slot.field)?;
                let handle = t.air.ir.build_load(field_ptr, 8);
                let info = tex_slot.texture.kind.info();
                let addr = t.load_src(address)?;
                let addr = t.cast_to_class(addr, ValueClass::Int);
                let pos = narrow_vec(t, addr, info.coord_dim);
                let array_index = if info.is_array {
                    Some(extract_lane(t, addr, info.coord_dim))
                } else {
                    None
                };
                let operand = t.load_src(value)?;
                let operand = t.cast_to_class(operand, ValueClass::Int);
                let prior = t.air.texture_atomic_rmw(
                    &tex_slot.texture,
                    handle,
                    atomic_op_to_air(op),
                    pos,
                    array_index,
                    operand,
                )?;
                if let Some(result) = result {
                    t.store_dst_vec4(result, prior)?;
                }
                return Ok(());
            }
        }
    }

    let ptr = atomic_pointer(t, dst, address)?;
    let operand = t.load_src_scalar(value)?;
    let operand = t.cast_to_class(operand, ValueClass::Int);
    let prior = t.air.atomic_rmw(atomic_op_to_air(op), ptr, operand)?;
    if let Some(result) = result {
        t.store_dst_scalar_splat(result, prior)?;
    }
    Ok(())
}

fn lower_cmpxchg(
    t: &mut Translator<'_>,
    result: Option<&DstOperand>,
    dst: &DstOperand,
    address: &SrcOperand,
    compare: &SrcOperand,
    value: &SrcOperand,
) -> Result<(), TranslateError> {
    let ptr = atomic_pointer(t, dst, address)?;
    let compare = t.load_src_scalar(compare)?;
    let compare = t.cast_to_class(compare, ValueClass::Int);
    let desired = t.load_src_scalar(value)?;
    let desired = t.cast_to_class(desired, ValueClass::Int);
    let slot = t.res.cmpxchg_slot.ok_or_else(|| {
        TranslateError::Lowering("cmpxchg scratch slot not allocated".to_string())
    })?;
    t.air.ir.build_store(compare, slot, 4);
    let observed = t.air.atomic_cmpxchg(ptr, slot, desired)?;
    if let Some(result) = result {
        t.store_dst_scalar_splat(result, observed)?;
    }
    Ok(())
}

/* Misc helpers */

fn require_fragment(t: &Translator<'_>, what: &str) -> Result<(), TranslateError> {
    if t.stage != ShaderStage::Pixel {
        return Err(TranslateError::InvalidOperation(format!(
            "{what} outside a fragment shader"
        )));
    }
    Ok(())
}

fn require_sampling_stage(t: &Translator<'_>) -> Result<(), TranslateError> {
    // Implicit-derivative sampling needs a fragment; other stages only
    // ever carry the explicit-lod forms.
    if t.stage != ShaderStage::Pixel {
        return Err(TranslateError::InvalidOperation(
            "implicit-lod sample outside a fragment shader".to_string(),
        ));
    }
    Ok(())
}

fn splat_u32(t: &mut Translator<'_>, value: u32) -> Value {
    t.air.ir.module.const_u32_vec(&[value; 4])
}

fn all_ones_like(t: &mut Translator<'_>, value: Value) -> Value {
    let ty = t.air.ir.module.value_type(value);
    let dim = t.air.ir.module.types.vector_len(ty).unwrap_or(1);
    if dim == 1 {
        t.air.int(u32::MAX)
    } else {
        let elems: Vec<u32> = vec![u32::MAX; dim as usize];
        t.air.ir.module.const_u32_vec(&elems)
    }
}

fn select_all_ones_when_zero(t: &mut Translator<'_>, probe: Value, value: Value) -> Value {
    let zero = {
        let ty = t.air.ir.module.value_type(probe);
        t.air.ir.module.zero(ty)
    };
    let is_zero = t.air.ir.build_icmp(Pred::Eq, probe, zero);
    let ones = all_ones_like(t, value);
    t.air.ir.build_select(is_zero, ones, value)
}

fn extract_lane(t: &mut Translator<'_>, vec: Value, lane: u32) -> Value {
    t.air.ir.build_extract_element(vec, lane)
}

fn narrow_vec(t: &mut Translator<'_>, vec: Value, dim: u32) -> Value {
    if dim >= 4 {
        return vec;
    }
    let mask: Vec<i32> = (0..dim as i32).collect();
    t.air.ir.build_shuffle(vec, &mask)
}

fn class_of_value(t: &Translator<'_>, value: Value) -> ValueClass {
    let ty = t.air.ir.module.value_type(value);
    if t.air.ir.module.types.is_float_scalar_or_vector(ty) {
        ValueClass::Float
    } else {
        ValueClass::Int
    }
}

/// Standard MSAA sample positions in the `[-0.5, 0.5)` pixel space, for
/// `samplepos`. Unknown counts resolve to the pixel center.
fn sample_position(t: &mut Translator<'_>, count: Value, index: Value) -> Value {
    const POSITIONS_2: [[f32; 2]; 2] = [[0.25, 0.25], [-0.25, -0.25]];
    const POSITIONS_4: [[f32; 2]; 4] = [
        [-0.125, -0.375],
        [0.375, -0.125],
        [-0.375, 0.125],
        [0.125, 0.375],
    ];
    const POSITIONS_8: [[f32; 2]; 8] = [
        [0.0625, -0.1875],
        [-0.0625, 0.1875],
        [0.3125, 0.0625],
        [-0.1875, -0.3125],
        [-0.3125, 0.3125],
        [-0.4375, -0.0625],
        [0.1875, 0.4375],
        [0.4375, -0.4375],
    ];

    let mut result = t.air.ir.module.const_f32_vec(&[0.0, 0.0, 0.0, 0.0]);
    for (table_count, table) in [
        (2u32, &POSITIONS_2[..]),
        (4, &POSITIONS_4[..]),
        (8, &POSITIONS_8[..]),
    ] {
        let mut table_value = t.air.ir.module.const_f32_vec(&[0.0, 0.0, 0.0, 0.0]);
        for (i, position) in table.iter().enumerate() {
            let candidate = t
                .air
                .ir
                .module
                .const_f32_vec(&[position[0], position[1], 0.0, 0.0]);
            let i_value = t.air.int(i as u32);
            let is_index = t.air.ir.build_icmp(Pred::Eq, index, i_value);
            table_value = t.air.ir.build_select(is_index, candidate, table_value);
        }
        let count_value = t.air.int(table_count);
        let is_count = t.air.ir.build_icmp(Pred::Eq, count, count_value);
        result = t.air.ir.build_select(is_count, table_value, result);
    }
    result
}
