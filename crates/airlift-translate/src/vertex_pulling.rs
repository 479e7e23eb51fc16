//! Vertex pulling: vertex-stage input registers are filled by explicit
//! loads from the bound vertex buffers instead of stage-in plumbing.
//!
//! A table of `{base address, stride, length}` records sits in constant
//! memory at buffer index 16, one per input-assembler slot. Per attribute
//! the prologue computes the fetch index from the step function, guards
//! against a null binding (which yields a zero vec4), loads the source
//! according to the format table, widens to vec4, and writes the input
//! register.

use airlift_air::air::address_space;
use airlift_air::ir::{CastOp, Pred, TypeId, Value};

use crate::lower::Translator;
use crate::TranslateError;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StepFunction {
    PerVertex,
    PerInstance,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IndexFormat {
    None,
    U16,
    U32,
}

/// The vertex formats the input assembler can feed, mirroring the Metal
/// attribute format enumeration the table is keyed by.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AttributeFormat {
    Char,
    Char2,
    Char4,
    UChar,
    UChar2,
    UChar4,
    CharNormalized,
    Char2Normalized,
    Char4Normalized,
    UCharNormalized,
    UChar2Normalized,
    UChar4Normalized,
    UChar4NormalizedBgra,
    Short,
    Short2,
    Short4,
    UShort,
    UShort2,
    UShort4,
    ShortNormalized,
    Short2Normalized,
    Short4Normalized,
    UShortNormalized,
    UShort2Normalized,
    UShort4Normalized,
    Half2,
    Half4,
    Float,
    Float2,
    Float3,
    Float4,
    Int,
    Int2,
    Int3,
    Int4,
    UInt,
    UInt2,
    UInt3,
    UInt4,
    UInt1010102Normalized,
    FloatRg11B10,
    FloatRgb9E5,
}

#[derive(Clone, Copy, Debug)]
pub struct VertexAttribute {
    pub slot: u32,
    pub format: AttributeFormat,
    pub aligned_byte_offset: u32,
    pub step_function: StepFunction,
    pub step_rate: u32,
    pub reg: u32,
    pub mask: u8,
}

#[derive(Clone, Debug, Default)]
pub struct InputLayout {
    pub index_format: Option<IndexFormat>,
    pub attributes: Vec<VertexAttribute>,
}

/// The `{u64 base, u32 stride, u32 length}` table entry type.
pub fn table_entry_type(t: &mut Translator<'_>) -> TypeId {
    let module = &mut t.air.ir.module;
    let i64t = module.types.i64();
    let i32t = module.types.i32();
    module
        .types
        .named_struct("vertex_buffer_entry", vec![i64t, i32t, i32t])
}

/// Emits the pulling prologue: one guarded fetch per attribute, written
/// into the input register file.
pub fn emit_vertex_pulling(
    t: &mut Translator<'_>,
    table: Value,
    layout: &InputLayout,
) -> Result<(), TranslateError> {
    let entry_ty = table_entry_type(t);
    for attribute in &layout.attributes {
        let slot = t.air.int(attribute.slot);
        let entry_ptr = t.air.ir.build_gep(entry_ty, table, &[slot]);
        let base_addr_ptr = t.air.ir.build_gep_u32(entry_ty, entry_ptr, &[0, 0]);
        let base_addr = t.air.ir.build_load(base_addr_ptr, 8);
        let stride_ptr = t.air.ir.build_gep_u32(entry_ty, entry_ptr, &[0, 1]);
        let stride = t.air.ir.build_load(stride_ptr, 4);

        let index = fetch_index(t, attribute)?;
        let byte_offset = {
            let scaled = t.air.ir.build_mul(stride, index);
            let offset = t.air.int(attribute.aligned_byte_offset);
            t.air.ir.build_add(scaled, offset)
        };

        // Null bindings read as zero.
        let value = pull_guarded(t, attribute.format, base_addr, byte_offset)?;

        let array = t.res.input.ok_or_else(|| {
            TranslateError::Lowering("vertex pulling without input registers".to_string())
        })?;
        let reg = t.air.int(attribute.reg);
        t.store_reg_vec4_masked(array, reg, value, attribute.mask);
    }
    Ok(())
}

fn fetch_index(
    t: &mut Translator<'_>,
    attribute: &VertexAttribute,
) -> Result<Value, TranslateError> {
    match attribute.step_function {
        StepFunction::PerVertex => t.res.sv.vertex_id_with_base.ok_or_else(|| {
            TranslateError::Lowering("vertex id not wired for vertex pulling".to_string())
        }),
        StepFunction::PerInstance => {
            let base = t.res.sv.base_instance_id.ok_or_else(|| {
                TranslateError::Lowering("base instance not wired".to_string())
            })?;
            if attribute.step_rate == 0 {
                // A zero step rate never advances.
                return Ok(base);
            }
            let instance = t.res.sv.instance_id.ok_or_else(|| {
                TranslateError::Lowering("instance id not wired".to_string())
            })?;
            let rate = t.air.int(attribute.step_rate);
            let stepped = t.air.ir.build_udiv(instance, rate);
            Ok(t.air.ir.build_add(base, stepped))
        }
    }
}

fn pull_guarded(
    t: &mut Translator<'_>,
    format: AttributeFormat,
    base_addr: Value,
    byte_offset: Value,
) -> Result<Value, TranslateError> {
    let zero64 = {
        let module = &mut t.air.ir.module;
        let ty = module.types.i64();
        module.const_int(ty, 0)
    };
    let is_null = t.air.ir.build_icmp(Pred::Eq, base_addr, zero64);

    let current = t.air.ir.block();
    let pull = t.air.ir.create_block("pull_vertex");
    let join = t.air.ir.create_block("pull_join");
    t.air.ir.build_cond_br(is_null, join, pull);

    t.air.ir.position_at_end(pull);
    let byte_ptr_ty = {
        let module = &mut t.air.ir.module;
        let byte = module.types.i8();
        module.types.ptr(byte, address_space::DEVICE)
    };
    let base = t.air.ir.build_cast(CastOp::IntToPtr, base_addr, byte_ptr_ty);
    let value = pull_value(t, format, base, byte_offset)?;
    let pull_end = t.air.ir.block();
    t.air.ir.build_br(join);

    t.air.ir.position_at_end(join);
    let value_ty = t.air.ir.module.value_type(value);
    let zero = t.air.ir.module.zero(value_ty);
    let phi = t.air.ir.build_phi(value_ty, vec![(zero, current), (value, pull_end)]);
    Ok(phi)
}

struct FormatClass {
    /// Lane count delivered by the raw load.
    lanes: u32,
    kind: FormatKind,
}

enum FormatKind {
    /// Direct float load.
    Float,
    /// Half floats extend to f32.
    Half,
    /// Sign- or zero-extended integers.
    Int { signed: bool, bits: u32 },
    /// `air.unpack.<op>` with the given destination lane count.
    Unpack { op: &'static str, src_bits: u32, dst_lanes: u32 },
}

fn classify(format: AttributeFormat) -> FormatClass {
    use AttributeFormat::*;
    match format {
        Float => FormatClass { lanes: 1, kind: FormatKind::Float },
        Float2 => FormatClass { lanes: 2, kind: FormatKind::Float },
        Float3 => FormatClass { lanes: 3, kind: FormatKind::Float },
        Float4 => FormatClass { lanes: 4, kind: FormatKind::Float },
        Half2 => FormatClass { lanes: 2, kind: FormatKind::Half },
        Half4 => FormatClass { lanes: 4, kind: FormatKind::Half },
        Char => FormatClass { lanes: 1, kind: FormatKind::Int { signed: true, bits: 8 } },
        Char2 => FormatClass { lanes: 2, kind: FormatKind::Int { signed: true, bits: 8 } },
        Char4 => FormatClass { lanes: 4, kind: FormatKind::Int { signed: true, bits: 8 } },
        UChar => FormatClass { lanes: 1, kind: FormatKind::Int { signed: false, bits: 8 } },
        UChar2 => FormatClass { lanes: 2, kind: FormatKind::Int { signed: false, bits: 8 } },
        UChar4 => FormatClass { lanes: 4, kind: FormatKind::Int { signed: false, bits: 8 } },
        Short => FormatClass { lanes: 1, kind: FormatKind::Int { signed: true, bits: 16 } },
        Short2 => FormatClass { lanes: 2, kind: FormatKind::Int { signed: true, bits: 16 } },
        Short4 => FormatClass { lanes: 4, kind: FormatKind::Int { signed: true, bits: 16 } },
        UShort => FormatClass { lanes: 1, kind: FormatKind::Int { signed: false, bits: 16 } },
        UShort2 => FormatClass { lanes: 2, kind: FormatKind::Int { signed: false, bits: 16 } },
        UShort4 => FormatClass { lanes: 4, kind: FormatKind::Int { signed: false, bits: 16 } },
        Int | UInt => FormatClass { lanes: 1, kind: FormatKind::Int { signed: false, bits: 32 } },
        Int2 | UInt2 => FormatClass { lanes: 2, kind: FormatKind::Int { signed: false, bits: 32 } },
        Int3 | UInt3 => FormatClass { lanes: 3, kind: FormatKind::Int { signed: false, bits: 32 } },
        Int4 | UInt4 => FormatClass { lanes: 4, kind: FormatKind::Int { signed: false, bits: 32 } },
        UCharNormalized => FormatClass {
            lanes: 1,
            kind: FormatKind::Unpack { op: "unorm1x8.f32", src_bits: 8, dst_lanes: 1 },
        },
        UChar2Normalized => FormatClass {
            lanes: 2,
            kind: FormatKind::Unpack { op: "unorm2x8.v2f32", src_bits: 16, dst_lanes: 2 },
        },
        UChar4Normalized | UChar4NormalizedBgra => FormatClass {
            lanes: 4,
            kind: FormatKind::Unpack { op: "unorm4x8.v4f32", src_bits: 32, dst_lanes: 4 },
        },
        CharNormalized => FormatClass {
            lanes: 1,
            kind: FormatKind::Unpack { op: "snorm1x8.f32", src_bits: 8, dst_lanes: 1 },
        },
        Char2Normalized => FormatClass {
            lanes: 2,
            kind: FormatKind::Unpack { op: "snorm2x8.v2f32", src_bits: 16, dst_lanes: 2 },
        },
        Char4Normalized => FormatClass {
            lanes: 4,
            kind: FormatKind::Unpack { op: "snorm4x8.v4f32", src_bits: 32, dst_lanes: 4 },
        },
        UShortNormalized => FormatClass {
            lanes: 1,
            kind: FormatKind::Unpack { op: "unorm1x16.f32", src_bits: 16, dst_lanes: 1 },
        },
        UShort2Normalized => FormatClass {
            lanes: 2,
            kind: FormatKind::Unpack { op: "unorm2x16.v2f32", src_bits: 32, dst_lanes: 2 },
        },
        UShort4Normalized => FormatClass {
            lanes: 4,
            kind: FormatKind::Unpack { op: "unorm4x16.v4f32", src_bits: 64, dst_lanes: 4 },
        },
        ShortNormalized => FormatClass {
            lanes: 1,
            kind: FormatKind::Unpack { op: "snorm1x16.f32", src_bits: 16, dst_lanes: 1 },
        },
        Short2Normalized => FormatClass {
            lanes: 2,
            kind: FormatKind::Unpack { op: "snorm2x16.v2f32", src_bits: 32, dst_lanes: 2 },
        },
        Short4Normalized => FormatClass {
            lanes: 4,
            kind: FormatKind::Unpack { op: "snorm4x16.v4f32", src_bits: 64, dst_lanes: 4 },
        },
        UInt1010102Normalized => FormatClass {
            lanes: 4,
            kind: FormatKind::Unpack { op: "unorm.rgb10a2.v4f32", src_bits: 32, dst_lanes: 4 },
        },
        FloatRg11B10 => FormatClass {
            lanes: 3,
            kind: FormatKind::Unpack { op: "unorm.rg11b10f.v3f32", src_bits: 32, dst_lanes: 3 },
        },
        FloatRgb9E5 => FormatClass {
            lanes: 3,
            kind: FormatKind::Unpack { op: "unorm.rgb9e5.v3f32", src_bits: 32, dst_lanes: 3 },
        },
    }
}

/// Loads a value of `ty` from `base + byte_offset` in device memory.
fn load_device(
    t: &mut Translator<'_>,
    ty: TypeId,
    base: Value,
    byte_offset: Value,
    align: u32,
) -> Value {
    let byte = t.air.byte_ty();
    let addr = t.air.ir.build_gep(byte, base, &[byte_offset]);
    let typed_ptr_ty = t.air.ir.module.types.ptr(ty, address_space::DEVICE);
    let typed = t.air.ir.build_bitcast(addr, typed_ptr_ty);
    t.air.ir.build_load(typed, align)
}

/// Loads and converts one attribute to its vec4 register form: float
/// formats widen with `(0, 0, 0, 1)` defaults, integers likewise.
fn pull_value(
    t: &mut Translator<'_>,
    format: AttributeFormat,
    base: Value,
    byte_offset: Value,
) -> Result<Value, TranslateError> {
    let class = classify(format);
    let signed_format = matches!(
        format,
        AttributeFormat::Int
            | AttributeFormat::Int2
            | AttributeFormat::Int3
            | AttributeFormat::Int4
    );
    let value = match class.kind {
        FormatKind::Float => {
            let f32t = t.air.float_ty();
            let ty = t.air.ir.module.types.vec_or_scalar(f32t, class.lanes);
            let loaded = load_device(t, ty, base, byte_offset, 4);
            widen_float(t, loaded, class.lanes)
        }
        FormatKind::Half => {
            let f16 = t.air.half_ty();
            let ty = t.air.ir.module.types.vec_or_scalar(f16, class.lanes);
            let loaded = load_device(t, ty, base, byte_offset, 2);
            let f32t = t.air.float_ty();
            let wide_ty = t.air.ir.module.types.vec_or_scalar(f32t, class.lanes);
            let widened = t.air.ir.build_cast(CastOp::FpExt, loaded, wide_ty);
            widen_float(t, widened, class.lanes)
        }
        FormatKind::Int { signed, bits } => {
            let elem = {
                let module = &mut t.air.ir.module;
                module.types.intern(airlift_air::ir::TypeKind::Int(bits))
            };
            let ty = t.air.ir.module.types.vec_or_scalar(elem, class.lanes);
            let loaded = load_device(t, ty, base, byte_offset, (bits / 8).max(1));
            let i32t = t.air.int_ty();
            let wide_ty = t.air.ir.module.types.vec_or_scalar(i32t, class.lanes);
            let widened = if bits == 32 {
                loaded
            } else if signed || signed_format {
                t.air.ir.build_sext(loaded, wide_ty)
            } else {
                t.air.ir.build_zext(loaded, wide_ty)
            };
            widen_int(t, widened, class.lanes)
        }
        FormatKind::Unpack { op, src_bits, dst_lanes } => {
            let src_ty = {
                let module = &mut t.air.ir.module;
                module.types.intern(airlift_air::ir::TypeKind::Int(src_bits))
            };
            let loaded = load_device(t, src_ty, base, byte_offset, (src_bits / 8).min(4).max(1));
            let f32t = t.air.float_ty();
            let dst_ty = t.air.ir.module.types.vec_or_scalar(f32t, dst_lanes);
            let mut unpacked = t.air.unpack(op, loaded, dst_ty);
            if format == AttributeFormat::UChar4NormalizedBgra {
                unpacked = t.air.ir.build_shuffle(unpacked, &[2, 1, 0, 3]);
            }
            widen_float(t, unpacked, dst_lanes)
        }
    };
    Ok(value)
}

/// Widens an N-lane float value to vec4, filling missing lanes with zero
/// and the last with one.
fn widen_float(t: &mut Translator<'_>, value: Value, lanes: u32) -> Value {
    if lanes >= 4 {
        return value;
    }
    let one = t.air.float(1.0);
    let zero = t.air.float(0.0);
    widen(t, value, lanes, zero, one)
}

fn widen_int(t: &mut Translator<'_>, value: Value, lanes: u32) -> Value {
    if lanes >= 4 {
        return value;
    }
    let one = t.air.int(1);
    let zero = t.air.int(0);
    widen(t, value, lanes, zero, one)
}

fn widen(t: &mut Translator<'_>, value: Value, lanes: u32, zero: Value, one: Value) -> Value {
    let scalar_ty = {
        let ty = t.air.ir.module.value_type(value);
        t.air.ir.module.types.scalar_of(ty)
    };
    let vec4_ty = t.air.ir.module.types.vec(scalar_ty, 4);
    let mut out = t.air.ir.module.undef(vec4_ty);
    for lane in 0..4u32 {
        let elem = if lane < lanes {
            if lanes == 1 {
                value
            } else {
                t.air.ir.build_extract_element(value, lane)
            }
        } else if lane == 3 {
            one
        } else {
            zero
        };
        out = t.air.ir.build_insert_element(out, elem, lane);
    }
    out
}
