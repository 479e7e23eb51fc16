//! Per-opcode lowering of decoded SM5 instructions to AIR IR.
//!
//! The [`Translator`] owns the in-construction module (through the AIR
//! builder) and borrows the decoded shader's analysis results. Register
//! files live as vec4 scratch arrays ("early main" allocations); loads
//! apply swizzles and source modifiers, stores honor the destination
//! write mask by read-modify-write so unmasked lanes stay untouched.

mod inst;

pub use inst::lower_cfg;

use std::collections::HashMap;

use airlift_air::air::{AirBuilder, SampleType, TexAccess, Texture, TextureKind};
use airlift_air::ir::{BlockId as IrBlockId, CastOp, Pred, TypeId, Value};

use crate::dtype::TempTypes;
use crate::sm5::{
    DataType, IndexExpr, OperandModifier, ResourceDimension, SampledReturnType, ShaderStage,
    SrcKind, SrcOperand, Swizzle, WriteMask,
};
use crate::TranslateError;

/// A register-file scratch array: `[len x <4 x elem>]` behind a pointer.
#[derive(Clone, Copy, Debug)]
pub struct RegArray {
    pub ptr: Value,
    pub elem_vec4: TypeId,
    pub len: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct TextureSlot {
    pub texture: Texture,
    /// Field index of the handle in the argument buffer.
    pub field: u32,
    /// Field of the `{ptr, metadata}` pair when the resource is a typed
    /// buffer emulated over raw device memory.
    pub buffer_field: Option<u32>,
    pub read_swizzle: Swizzle,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferSlot {
    pub field: u32,
    /// Element stride for structured buffers; zero for raw.
    pub stride: u32,
    pub globally_coherent: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemValues {
    pub vertex_id: Option<Value>,
    pub base_vertex_id: Option<Value>,
    pub vertex_id_with_base: Option<Value>,
    pub instance_id: Option<Value>,
    pub base_instance_id: Option<Value>,
    pub thread_id: Option<Value>,
    pub thread_group_id: Option<Value>,
    pub thread_id_in_group: Option<Value>,
    pub thread_id_in_group_flattened: Option<Value>,
    pub coverage_mask: Option<Value>,
    pub primitive_id: Option<Value>,
    pub fork_instance_id: Option<Value>,
    pub join_instance_id: Option<Value>,
    pub domain_point: Option<Value>,
    pub control_point_id: Option<Value>,
    pub patch_id: Option<Value>,
}

/// Everything the operand loaders need to resolve a register reference.
#[derive(Default)]
pub struct ResourceMap {
    /// One scratch array per data type present in the phase.
    pub temp_arrays: HashMap<DataType, RegArray>,
    pub temp_types: TempTypes,
    /// Indexable temp arrays: `x#` to `(array, component count)`.
    pub indexable_temps: HashMap<u32, RegArray>,
    pub input: Option<RegArray>,
    pub output: Option<RegArray>,
    /// Patch-constant register file (hull output / domain input).
    pub patch_constant: Option<RegArray>,
    /// Hull input/output control-point bases; `[patch][point][reg]`
    /// addressing is done by the loader.
    pub input_control_points: Option<RegArray>,
    pub output_control_points: Option<RegArray>,
    pub control_points_per_patch: u32,
    pub output_control_point_stride: u32,
    /// Output depth slot for fragment shaders.
    pub output_depth: Option<Value>,
    /// Output coverage slot.
    pub output_coverage: Option<Value>,
    /// Immediate constant buffer global.
    pub icb: Option<Value>,
    pub icb_len: u32,
    /// Constant buffers by slot: device pointer to `[size x int4]`.
    pub cbuffers: HashMap<u32, CBufferSlot>,
    pub textures: HashMap<u32, TextureSlot>,
    pub uav_textures: HashMap<u32, TextureSlot>,
    pub uav_buffers: HashMap<u32, BufferSlot>,
    pub srv_buffers: HashMap<u32, BufferSlot>,
    pub uav_counters: HashMap<u32, BufferSlot>,
    pub samplers: HashMap<u32, u32>,
    /// Threadgroup memory globals by slot, with their stride (0 = raw).
    pub tgsm: HashMap<u32, TgsmSlot>,
    /// The resource argument-buffer pointer and its struct type.
    pub arg_buffer: Option<ArgBufferRef>,
    pub sv: SystemValues,
    /// Interpolants addressable by `eval_*`: input register to pointer.
    pub interpolants: HashMap<u32, InterpolantSlot>,
    /// Per-render-target unorm flag driving the write-back delta.
    pub rt_unorm_mask: u32,
    /// Scratch slot for atomic compare-exchange expected values.
    pub cmpxchg_slot: Option<Value>,
}

#[derive(Clone, Copy, Debug)]
pub struct CBufferSlot {
    pub field: u32,
    pub size_in_vec4: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct TgsmSlot {
    pub ptr: Value,
    pub stride: u32,
    pub len_bytes: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct ArgBufferRef {
    pub ptr: Value,
    pub struct_type: TypeId,
}

#[derive(Clone, Copy, Debug)]
pub struct InterpolantSlot {
    pub ptr: Value,
    pub perspective: bool,
}

pub struct Translator<'m> {
    pub air: AirBuilder<'m>,
    pub res: ResourceMap,
    pub stage: ShaderStage,
    /// Render-target unorm delta constant, preserved verbatim from the
    /// source material.
    pub unorm_write_delta: f32,
    /// IR block per recovered CFG block, filled by `lower_cfg`.
    pub block_map: HashMap<u32, IrBlockId>,
}

pub const UNORM_WRITE_DELTA: f32 = 1.0 / 127500.0;

pub const MASK_ALL: u8 = 0b1111;

/// The set of register components a read with `mask` through `swizzle`
/// actually touches.
pub fn memory_access_mask(mask: u8, swizzle: Swizzle) -> u8 {
    let mut out = 0u8;
    for lane in 0..4 {
        if mask & (1 << lane) != 0 {
            out |= 1 << swizzle.get(lane);
        }
    }
    out
}

impl<'m> Translator<'m> {
    pub fn new(air: AirBuilder<'m>, stage: ShaderStage, res: ResourceMap) -> Self {
        Translator {
            air,
            res,
            stage,
            unorm_write_delta: UNORM_WRITE_DELTA,
            block_map: HashMap::new(),
        }
    }

    /* Type helpers */

    fn int4_ty(&mut self) -> TypeId {
        self.air.int_vec_ty(4)
    }

    fn class_of(&self, data_type: DataType) -> ValueClass {
        if data_type.is_float() {
            ValueClass::Float
        } else {
            ValueClass::Int
        }
    }

    /// Reinterprets a vec4 (or scalar) between the float and int lane
    /// classes without changing bits.
    pub fn cast_to_class(&mut self, value: Value, class: ValueClass) -> Value {
        let ty = self.air.ir.module.value_type(value);
        let is_float = self.air.ir.module.types.is_float_scalar_or_vector(ty);
        match (is_float, class) {
            (true, ValueClass::Float) | (false, ValueClass::Int) => value,
            (true, ValueClass::Int) => self.air.bitcast_to_int(value),
            (false, ValueClass::Float) => self.air.bitcast_to_float(value),
        }
    }

    /* Index expressions */

    pub fn lower_index(&mut self, index: &IndexExpr) -> Result<Value, TranslateError> {
        match index {
            IndexExpr::Imm(value) => Ok(self.air.int(*value)),
            IndexExpr::Relative { reg, component, offset } => {
                let value = self.load_temp_component(*reg, *component)?;
                let value = self.cast_to_class(value, ValueClass::Int);
                if *offset == 0 {
                    Ok(value)
                } else {
                    let offset = self.air.int(*offset);
                    Ok(self.air.ir.build_add(value, offset))
                }
            }
            IndexExpr::RelativeIndexable { reg, inner, component, offset } => {
                let array = self.res.indexable_temps.get(reg).copied().ok_or_else(|| {
                    TranslateError::Lowering(format!("indexable temp x{reg} not allocated"))
                })?;
                let inner = self.air.int(*inner);
                let base_ty = {
                    let elem = array.elem_vec4;
                    let module = &mut self.air.ir.module;
                    module.types.array(elem, array.len as u64)
                };
                let zero = self.air.int(0);
                let slot = self.air.ir.build_gep(base_ty, array.ptr, &[zero, inner]);
                let vec4 = self.air.ir.build_load(slot, 16);
                let value = self.air.ir.build_extract_element(vec4, *component as u32);
                let value = self.cast_to_class(value, ValueClass::Int);
                if *offset == 0 {
                    Ok(value)
                } else {
                    let offset = self.air.int(*offset);
                    Ok(self.air.ir.build_add(value, offset))
                }
            }
        }
    }

    /* Register file access */

    fn temp_array(&mut self, reg: u32) -> Result<(RegArray, u32), TranslateError> {
        let ty = self.res.temp_types.type_of(reg);
        let slot = self.res.temp_types.slot_of(reg);
        let class = if ty.is_float() { DataType::Float } else { DataType::Uint };
        let array = self.res.temp_arrays.get(&class).copied().ok_or_else(|| {
            TranslateError::Lowering(format!("no scratch array for temp r{reg} ({ty:?})"))
        })?;
        Ok((array, slot))
    }

    fn reg_slot_ptr(&mut self, array: RegArray, index: Value) -> Value {
        let base_ty = {
            let module = &mut self.air.ir.module;
            module.types.array(array.elem_vec4, array.len as u64)
        };
        let zero = self.air.int(0);
        self.air.ir.build_gep(base_ty, array.ptr, &[zero, index])
    }

    pub fn load_reg_vec4(&mut self, array: RegArray, index: Value) -> Value {
        let ptr = self.reg_slot_ptr(array, index);
        self.air.ir.build_load(ptr, 16)
    }

    pub fn store_reg_vec4_masked(
        &mut self,
        array: RegArray,
        index: Value,
        value: Value,
        mask: u8,
    ) {
        let ptr = self.reg_slot_ptr(array, index);
        if mask & MASK_ALL == MASK_ALL {
            let value = self.match_store_class(value, array.elem_vec4);
            self.air.ir.build_store(value, ptr, 16);
            return;
        }
        // Unmasked lanes must be left undisturbed.
        let value = self.match_store_class(value, array.elem_vec4);
        let old = self.air.ir.build_load(ptr, 16);
        let mut merged = old;
        for lane in 0..4u32 {
            if mask & (1 << lane) != 0 {
                let elem = self.air.ir.build_extract_element(value, lane);
                merged = self.air.ir.build_insert_element(merged, elem, lane);
            }
        }
        self.air.ir.build_store(merged, ptr, 16);
    }

    fn match_store_class(&mut self, value: Value, elem_vec4: TypeId) -> Value {
        let want_float = self
            .air
            .ir
            .module
            .types
            .is_float_scalar_or_vector(elem_vec4);
        self.cast_to_class(
            value,
            if want_float { ValueClass::Float } else { ValueClass::Int },
        )
    }

    fn load_temp_component(&mut self, reg: u32, component: u8) -> Result<Value, TranslateError> {
        let (array, slot) = self.temp_array(reg)?;
        let slot = self.air.int(slot);
        let vec4 = self.load_reg_vec4(array, slot);
        Ok(self.air.ir.build_extract_element(vec4, component as u32))
    }

    /* Operand loads */

    /// Loads a source operand as a vec4 in its declared class, swizzled,
    /// with `abs` and `neg` modifiers applied in that order.
    pub fn load_src(&mut self, src: &SrcOperand) -> Result<Value, TranslateError> {
        let class = self.class_of(src.data_type);
        let raw = self.load_src_raw(src, class)?;
        let swizzled = self.apply_swizzle(raw, src.swizzle);
        Ok(self.apply_modifiers(swizzled, src.modifier, class))
    }

    /// Loads a source and extracts `dim` leading lanes of the swizzle.
    pub fn load_src_vec(
        &mut self,
        src: &SrcOperand,
        dim: u32,
    ) -> Result<Value, TranslateError> {
        let full = self.load_src(src)?;
        if dim >= 4 {
            return Ok(full);
        }
        let mask: Vec<i32> = (0..dim as i32).collect();
        Ok(self.air.ir.build_shuffle(full, &mask))
    }

    /// Loads the scalar lane a single-component read selects.
    pub fn load_src_scalar(&mut self, src: &SrcOperand) -> Result<Value, TranslateError> {
        let class = self.class_of(src.data_type);
        let raw = self.load_src_raw(src, class)?;
        let lane = src.swizzle.get(0) as u32;
        let value = self.air.ir.build_extract_element(raw, lane);
        Ok(self.apply_modifiers(value, src.modifier, class))
    }

    fn apply_swizzle(&mut self, value: Value, swizzle: Swizzle) -> Value {
        if swizzle == Swizzle::IDENTITY {
            return value;
        }
        let mask: Vec<i32> = swizzle.0.iter().map(|&c| c as i32).collect();
        self.air.ir.build_shuffle(value, &mask)
    }

    fn apply_modifiers(
        &mut self,
        value: Value,
        modifier: OperandModifier,
        class: ValueClass,
    ) -> Value {
        match modifier {
            OperandModifier::None => value,
            OperandModifier::Abs => self.float_abs(value, class),
            OperandModifier::Neg => self.negate(value, class),
            OperandModifier::AbsNeg => {
                let abs = self.float_abs(value, class);
                self.negate(abs, class)
            }
        }
    }

    fn float_abs(&mut self, value: Value, class: ValueClass) -> Value {
        // abs/neg are float-domain modifiers; integers reinterpret first.
        let value = self.cast_to_class(value, ValueClass::Float);
        let abs = self
            .air
            .fp_unop(airlift_air::air::FpUnOp::Fabs, value);
        match class {
            ValueClass::Float => abs,
            ValueClass::Int => self.cast_to_class(abs, ValueClass::Int),
        }
    }

    fn negate(&mut self, value: Value, class: ValueClass) -> Value {
        let value_f = self.cast_to_class(value, ValueClass::Float);
        let ty = self.air.ir.module.value_type(value_f);
        let zero = self.air.ir.module.zero(ty);
        let neg = self.air.ir.build_fsub(zero, value_f);
        match class {
            ValueClass::Float => neg,
            ValueClass::Int => self.cast_to_class(neg, ValueClass::Int),
        }
    }

    fn load_src_raw(
        &mut self,
        src: &SrcOperand,
        class: ValueClass,
    ) -> Result<Value, TranslateError> {
        match &src.kind {
            SrcKind::Immediate32(values) => {
                let module = &mut self.air.ir.module;
                let value = match class {
                    ValueClass::Float => {
                        let elems: Vec<Value> = values
                            .iter()
                            .map(|&bits| module.const_f32_bits(bits))
                            .collect();
                        module.const_vector(&elems)
                    }
                    ValueClass::Int => module.const_u32_vec(values),
                };
                Ok(value)
            }
            SrcKind::Temp { index } => {
                let (array, slot) = self.temp_array(*index)?;
                let slot = self.air.int(slot);
                let vec4 = self.load_reg_vec4(array, slot);
                Ok(self.cast_to_class(vec4, class))
            }
            SrcKind::IndexableTemp { index, offset } => {
                let array = self.res.indexable_temps.get(index).copied().ok_or_else(|| {
                    TranslateError::Lowering(format!("indexable temp x{index} not allocated"))
                })?;
                let offset = self.lower_index(offset)?;
                let vec4 = self.load_reg_vec4(array, offset);
                Ok(self.cast_to_class(vec4, class))
            }
            SrcKind::Input { index } => {
                let array = self.res.input.ok_or_else(|| {
                    TranslateError::Lowering("stage has no input register file".to_string())
                })?;
                let index = self.lower_index(index)?;
                let vec4 = self.load_reg_vec4(array, index);
                Ok(self.cast_to_class(vec4, class))
            }
            SrcKind::PatchConstant { index } => {
                let array = self.res.patch_constant.ok_or_else(|| {
                    TranslateError::Lowering("no patch constant file".to_string())
                })?;
                let index = self.lower_index(index)?;
                let vec4 = self.load_reg_vec4(array, index);
                Ok(self.cast_to_class(vec4, class))
            }
            SrcKind::InputControlPoint { reg, vertex } => {
                let array = self.res.input_control_points.ok_or_else(|| {
                    TranslateError::Lowering("no input control points".to_string())
                })?;
                let vertex = self.lower_index(vertex)?;
                let stride = array.len / self.res.control_points_per_patch.max(1);
                let base = {
                    let stride = self.air.int(stride);
                    self.air.ir.build_mul(vertex, stride)
                };
                let reg = self.air.int(*reg);
                let index = self.air.ir.build_add(base, reg);
                let vec4 = self.load_reg_vec4(array, index);
                Ok(self.cast_to_class(vec4, class))
            }
            SrcKind::OutputControlPoint { reg, vertex } => {
                let array = self.res.output_control_points.ok_or_else(|| {
                    TranslateError::Lowering("no output control points".to_string())
                })?;
                let vertex = self.lower_index(vertex)?;
                let stride = self.res.output_control_point_stride.max(1);
                let base = {
                    let stride = self.air.int(stride);
                    self.air.ir.build_mul(vertex, stride)
                };
                let reg = self.air.int(*reg);
                let index = self.air.ir.build_add(base, reg);
                let vec4 = self.load_reg_vec4(array, index);
                Ok(self.cast_to_class(vec4, class))
            }
            SrcKind::ConstantBuffer { slot, index } => {
                let cb = self.res.cbuffers.get(slot).copied().ok_or_else(|| {
                    TranslateError::Lowering(format!("cb{slot} not bound"))
                })?;
                let ptr = self.arg_buffer_field_ptr(cb.field)?;
                let elem_ptr = self.air.ir.build_load(ptr, 8);
                let index = self.lower_index(index)?;
                let int4 = self.int4_ty();
                let vec4_ptr = self.air.ir.build_gep(int4, elem_ptr, &[index]);
                let vec4 = self.air.ir.build_load(vec4_ptr, 16);
                Ok(self.cast_to_class(vec4, class))
            }
            SrcKind::ImmediateConstantBuffer { index } => {
                let icb = self.res.icb.ok_or_else(|| {
                    TranslateError::Lowering("no immediate constant buffer".to_string())
                })?;
                let index = self.lower_index(index)?;
                let int4 = self.int4_ty();
                let base_ty = {
                    let module = &mut self.air.ir.module;
                    module.types.array(int4, self.res.icb_len as u64)
                };
                let zero = self.air.int(0);
                let ptr = self.air.ir.build_gep(base_ty, icb, &[zero, index]);
                let vec4 = self.air.ir.build_load(ptr, 16);
                Ok(self.cast_to_class(vec4, class))
            }
            SrcKind::InputThreadId => self.sv_vec3(self.res.sv.thread_id, "thread id", class),
            SrcKind::InputThreadGroupId => {
                self.sv_vec3(self.res.sv.thread_group_id, "threadgroup id", class)
            }
            SrcKind::InputThreadIdInGroup => {
                self.sv_vec3(self.res.sv.thread_id_in_group, "thread id in group", class)
            }
            SrcKind::InputThreadIdInGroupFlattened => {
                self.sv_scalar(self.res.sv.thread_id_in_group_flattened, "flat thread id", class)
            }
            SrcKind::InputCoverageMask => {
                self.sv_scalar(self.res.sv.coverage_mask, "coverage mask", class)
            }
            SrcKind::InputPrimitiveId => {
                self.sv_scalar(self.res.sv.primitive_id, "primitive id", class)
            }
            SrcKind::InputForkInstanceId => {
                self.sv_scalar(self.res.sv.fork_instance_id, "fork instance id", class)
            }
            SrcKind::InputJoinInstanceId => {
                self.sv_scalar(self.res.sv.join_instance_id, "join instance id", class)
            }
            SrcKind::InputGsInstanceId => Err(TranslateError::Unsupported(
                "geometry shader instancing".to_string(),
            )),
            SrcKind::InputDomainPoint => {
                let value = self.res.sv.domain_point.ok_or_else(|| {
                    TranslateError::Lowering("domain point not wired".to_string())
                })?;
                Ok(self.cast_to_class(value, class))
            }
            SrcKind::OutputControlPointId => {
                self.sv_scalar(self.res.sv.control_point_id, "control point id", class)
            }
            SrcKind::Resource { .. } | SrcKind::Sampler { .. } | SrcKind::Uav { .. }
            | SrcKind::Tgsm { .. } => Err(TranslateError::Lowering(
                "resource operand loaded as value".to_string(),
            )),
        }
    }

    fn sv_scalar(
        &mut self,
        value: Option<Value>,
        what: &str,
        class: ValueClass,
    ) -> Result<Value, TranslateError> {
        let value = value.ok_or_else(|| {
            TranslateError::Lowering(format!("system value {what} not wired"))
        })?;
        let splat = self.air.ir.build_vector_splat(4, value);
        Ok(self.cast_to_class(splat, class))
    }

    /// Widens a uint3 system value to vec4 with an undef tail lane.
    fn sv_vec3(
        &mut self,
        value: Option<Value>,
        what: &str,
        class: ValueClass,
    ) -> Result<Value, TranslateError> {
        let value = value.ok_or_else(|| {
            TranslateError::Lowering(format!("system value {what} not wired"))
        })?;
        let widened = self.air.ir.build_shuffle(value, &[0, 1, 2, -1]);
        Ok(self.cast_to_class(widened, class))
    }

    pub fn arg_buffer_field_ptr(&mut self, field: u32) -> Result<Value, TranslateError> {
        let arg_buffer = self.res.arg_buffer.ok_or_else(|| {
            TranslateError::Lowering("stage has no argument buffer".to_string())
        })?;
        Ok(self
            .air
            .ir
            .build_gep_u32(arg_buffer.struct_type, arg_buffer.ptr, &[0, field]))
    }

    /// Loads a texture handle (and its metadata dword when present).
    pub fn load_texture(
        &mut self,
        slot: u32,
        is_uav: bool,
    ) -> Result<(TextureSlot, Value), TranslateError> {
        let table = if is_uav { &self.res.uav_textures } else { &self.res.textures };
        let entry = table.get(&slot).copied().ok_or_else(|| {
            TranslateError::Lowering(format!(
                "{}{} not declared as texture",
                if is_uav { "u" } else { "t" },
                slot
            ))
        })?;
        let ptr = self.arg_buffer_field_ptr(entry.field)?;
        let handle = self.air.ir.build_load(ptr, 8);
        Ok((entry, handle))
    }

    pub fn load_sampler(&mut self, slot: u32) -> Result<Value, TranslateError> {
        let field = self.res.samplers.get(&slot).copied().ok_or_else(|| {
            TranslateError::Lowering(format!("s{slot} not declared as sampler"))
        })?;
        let ptr = self.arg_buffer_field_ptr(field)?;
        Ok(self.air.ir.build_load(ptr, 8))
    }

    /// Loads the `{pointer, byte length}` of a raw/structured buffer
    /// resource.
    pub fn load_buffer(
        &mut self,
        slot: u32,
        is_uav: bool,
    ) -> Result<(BufferSlot, Value, Value), TranslateError> {
        let table = if is_uav { &self.res.uav_buffers } else { &self.res.srv_buffers };
        let entry = table.get(&slot).copied().ok_or_else(|| {
            TranslateError::Lowering(format!(
                "{}{} not declared as buffer",
                if is_uav { "u" } else { "t" },
                slot
            ))
        })?;
        let pair_ty = self.pair_type_of_field(entry.field)?;
        let pair_ptr = self.arg_buffer_field_ptr(entry.field)?;
        let ptr_ptr = self.air.ir.build_gep_u32(pair_ty, pair_ptr, &[0, 0]);
        let ptr = self.air.ir.build_load(ptr_ptr, 8);
        let md_ptr = self.air.ir.build_gep_u32(pair_ty, pair_ptr, &[0, 1]);
        let metadata = self.air.ir.build_load(md_ptr, 8);
        let len = {
            let i32t = self.air.int_ty();
            self.air.ir.build_trunc(metadata, i32t)
        };
        Ok((entry, ptr, len))
    }

    fn pair_type_of_field(&self, field: u32) -> Result<TypeId, TranslateError> {
        let arg_buffer = self.res.arg_buffer.ok_or_else(|| {
            TranslateError::Lowering("stage has no argument buffer".to_string())
        })?;
        let module = &self.air.ir.module;
        match module.types.kind(arg_buffer.struct_type) {
            airlift_air::ir::TypeKind::Struct { fields, .. } => fields
                .get(field as usize)
                .copied()
                .ok_or_else(|| TranslateError::Lowering("argument buffer field oob".to_string())),
            _ => Err(TranslateError::Lowering(
                "argument buffer is not a struct".to_string(),
            )),
        }
    }

    /// Index into a raw device buffer of u32 with the bound check derived
    /// from the metadata-encoded byte length: out-of-bounds accesses
    /// clamp to the last element.
    pub fn gep_u32_bound_checked(
        &mut self,
        base: Value,
        index: Value,
        byte_len: Value,
    ) -> Value {
        let two = self.air.int(2);
        let max_index = {
            let len_elems = self.air.ir.build_binary(
                airlift_air::ir::BinOp::LShr,
                byte_len,
                two,
            );
            let one = self.air.int(1);
            self.air.ir.build_sub(len_elems, one)
        };
        let clamped = {
            let cmp = self.air.ir.build_icmp(Pred::Ult, index, max_index);
            self.air.ir.build_select(cmp, index, max_index)
        };
        let i32t = self.air.int_ty();
        self.air.ir.build_gep(i32t, base, &[clamped])
    }

    /* Stores */

    /// Stores a vec4 into the destination, honoring mask and saturate.
    pub fn store_dst_vec4(
        &mut self,
        dst: &crate::sm5::DstOperand,
        value: Value,
    ) -> Result<(), TranslateError> {
        use crate::sm5::DstKind;
        let value = if dst.saturate && dst.data_type.is_float() {
            let value = self.cast_to_class(value, ValueClass::Float);
            self.air.fp_unop(airlift_air::air::FpUnOp::Saturate, value)
        } else {
            value
        };
        match &dst.kind {
            DstKind::Null => Ok(()),
            DstKind::Temp { index } => {
                let (array, slot) = self.temp_array(*index)?;
                let slot = self.air.int(slot);
                self.store_reg_vec4_masked(array, slot, value, dst.mask.0);
                Ok(())
            }
            DstKind::IndexableTemp { index, offset } => {
                let array = self.res.indexable_temps.get(index).copied().ok_or_else(|| {
                    TranslateError::Lowering(format!("indexable temp x{index} not allocated"))
                })?;
                let offset = self.lower_index(offset)?;
                self.store_reg_vec4_masked(array, offset, value, dst.mask.0);
                Ok(())
            }
            DstKind::Output { index } => {
                let array = self.res.output.ok_or_else(|| {
                    TranslateError::Lowering("stage has no output register file".to_string())
                })?;
                let index = self.lower_index(index)?;
                self.store_reg_vec4_masked(array, index, value, dst.mask.0);
                Ok(())
            }
            DstKind::OutputDepth
            | DstKind::OutputDepthGreaterEqual
            | DstKind::OutputDepthLessEqual => {
                let slot = self.res.output_depth.ok_or_else(|| {
                    TranslateError::Lowering("depth output not planned".to_string())
                })?;
                let value = self.cast_to_class(value, ValueClass::Float);
                let scalar = self.air.ir.build_extract_element(value, 0);
                self.air.ir.build_store(scalar, slot, 4);
                Ok(())
            }
            DstKind::OutputCoverageMask => {
                let slot = self.res.output_coverage.ok_or_else(|| {
                    TranslateError::Lowering("coverage output not planned".to_string())
                })?;
                let value = self.cast_to_class(value, ValueClass::Int);
                let scalar = self.air.ir.build_extract_element(value, 0);
                self.air.ir.build_store(scalar, slot, 4);
                Ok(())
            }
            DstKind::Uav { .. } | DstKind::Tgsm { .. } => Err(TranslateError::Lowering(
                "memory destination stored as register".to_string(),
            )),
        }
    }

    /// Splats a scalar across the destination's masked lanes.
    pub fn store_dst_scalar_splat(
        &mut self,
        dst: &crate::sm5::DstOperand,
        scalar: Value,
    ) -> Result<(), TranslateError> {
        let splat = self.air.ir.build_vector_splat(4, scalar);
        self.store_dst_vec4(dst, splat)
    }

    /// Int-compare results in DXBC are all-ones masks.
    pub fn bool_to_mask(&mut self, cond: Value) -> Value {
        let ty = self.air.ir.module.value_type(cond);
        let dim = self.air.ir.module.types.vector_len(ty).unwrap_or(1);
        let int_ty = self.air.int_vec_ty(dim);
        self.air.ir.build_cast(CastOp::SExt, cond, int_ty)
    }

    /// Resolves a resource-kind declaration to the AIR texture shape.
    pub fn texture_for_dimension(
        dimension: ResourceDimension,
        return_type: SampledReturnType,
        access: TexAccess,
    ) -> Result<Texture, TranslateError> {
        let kind = match dimension {
            ResourceDimension::Buffer => TextureKind::TextureBuffer,
            ResourceDimension::Texture1d => TextureKind::Texture1d,
            ResourceDimension::Texture1dArray => TextureKind::Texture1dArray,
            ResourceDimension::Texture2d => TextureKind::Texture2d,
            ResourceDimension::Texture2dArray => TextureKind::Texture2dArray,
            ResourceDimension::Texture2dMs => TextureKind::Texture2dMs,
            ResourceDimension::Texture2dMsArray => TextureKind::Texture2dMsArray,
            ResourceDimension::Texture3d => TextureKind::Texture3d,
            ResourceDimension::TextureCube => TextureKind::TextureCube,
            ResourceDimension::TextureCubeArray => TextureKind::TextureCubeArray,
            ResourceDimension::RawBuffer | ResourceDimension::StructuredBuffer => {
                return Err(TranslateError::Lowering(
                    "buffer resource used as texture".to_string(),
                ));
            }
        };
        let sample_type = match return_type {
            SampledReturnType::Sint => SampleType::Int,
            SampledReturnType::Uint => SampleType::Uint,
            _ => SampleType::Float,
        };
        Ok(Texture { kind, sample_type, memory_access: access })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ValueClass {
    Float,
    Int,
}

/// Expands the `dst.mask`-selected lanes of `partial` (a value whose lane
/// count equals the mask population) back into vec4 lane positions.
pub fn mask_positions(mask: WriteMask) -> Vec<u32> {
    mask.lanes().collect()
}
