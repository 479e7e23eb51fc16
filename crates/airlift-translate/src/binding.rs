//! AIR function signature planning: stage inputs/outputs, the argument
//! buffer at buffer index 20, and the per-argument metadata tuples the
//! Metal runtime reads back.
//!
//! The argument-buffer slot rule is fixed: constant buffer `b#` lands at
//! `32 + #`, sampler `s#` at `#`, UAV `u#` at `64 + #`, texture `t#` at
//! `128 + #`, and a UAV counter at `192 + slot`.

use airlift_air::air::{self, Texture};
use airlift_air::ir::{FuncId, MetadataId, Module, TypeId, Value};
use indexmap::IndexMap;

use crate::TranslateError;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ResourceGroup {
    CBuffer,
    Sampler,
    Uav,
    Texture,
}

/// The fixed argument-buffer slot for a `(group, register)` pair.
pub fn argument_buffer_slot(group: ResourceGroup, register: u32) -> u32 {
    match group {
        ResourceGroup::CBuffer => 32 + register,
        ResourceGroup::Sampler => register,
        ResourceGroup::Uav => 64 + register,
        ResourceGroup::Texture => 128 + register,
    }
}

/// UAV counters sit past the texture range.
pub fn uav_counter_slot(slot: u32) -> u32 {
    192 + slot
}

/// Fixed buffer indices of the emitted ABI.
///
/// Single-stage pipelines place the resource argument buffer at index 20.
/// The object stage of the tessellation rewrite uses 20 for draw
/// arguments and re-exposes the vertex-stage argument buffer at 21, with
/// the index buffer and hull resources following.
pub mod buffer_index {
    /// Vertex buffer table (constant address space) for vertex pulling.
    pub const VERTEX_BUFFER_TABLE: u32 = 16;
    /// Hull-stage patch constant output buffer.
    pub const PATCH_CONSTANT: u32 = 17;
    /// Tess factor buffer.
    pub const TESS_FACTOR: u32 = 18;
    /// Kernel patch info.
    pub const KERNEL_PATCH_INFO: u32 = 19;
    /// The resource argument buffer holding the fixed slot layout.
    pub const ARGUMENT_BUFFER: u32 = 20;
    /// Object stage: draw arguments.
    pub const DRAW_ARGUMENTS: u32 = 20;
    /// Object stage: the vertex-stage argument buffer, re-exposed.
    pub const OBJECT_VERTEX_ARGUMENT_BUFFER: u32 = 21;
    /// Object stage: index buffer for indexed draws.
    pub const OBJECT_INDEX_BUFFER: u32 = 22;
    /// Object stage: the hull-stage argument buffer.
    pub const OBJECT_HULL_ARGUMENT_BUFFER: u32 = 23;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StageKind {
    Vertex,
    Fragment,
    Kernel,
    Object,
    Mesh,
}

impl StageKind {
    pub fn named_metadata(&self) -> &'static str {
        match self {
            StageKind::Vertex => "air.vertex",
            StageKind::Fragment => "air.fragment",
            StageKind::Kernel => "air.kernel",
            StageKind::Object => "air.object",
            StageKind::Mesh => "air.mesh",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Interpolation {
    CenterPerspective,
    CenterNoPerspective,
    CentroidPerspective,
    CentroidNoPerspective,
    SamplePerspective,
    SampleNoPerspective,
    Flat,
}

impl Interpolation {
    fn metadata_keys(&self) -> &'static [&'static str] {
        match self {
            Interpolation::CenterPerspective => &["air.perspective", "air.center"],
            Interpolation::CenterNoPerspective => &["air.no_perspective", "air.center"],
            Interpolation::CentroidPerspective => &["air.perspective", "air.centroid"],
            Interpolation::CentroidNoPerspective => &["air.no_perspective", "air.centroid"],
            Interpolation::SamplePerspective => &["air.perspective", "air.sample"],
            Interpolation::SampleNoPerspective => &["air.no_perspective", "air.sample"],
            Interpolation::Flat => &["air.flat"],
        }
    }

    pub fn perspective(&self) -> bool {
        matches!(
            self,
            Interpolation::CenterPerspective
                | Interpolation::CentroidPerspective
                | Interpolation::SamplePerspective
        )
    }
}

/// Scalar/vector types as MSL spells them, for `air.arg_type_name`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum MslType {
    Float(u32),
    Int(u32),
    Uint(u32),
    Ushort,
    Struct(String, TypeId),
}

impl MslType {
    pub fn name(&self) -> String {
        match self {
            MslType::Float(1) => "float".to_string(),
            MslType::Float(n) => format!("float{n}"),
            MslType::Int(1) => "int".to_string(),
            MslType::Int(n) => format!("int{n}"),
            MslType::Uint(1) => "uint".to_string(),
            MslType::Uint(n) => format!("uint{n}"),
            MslType::Ushort => "ushort".to_string(),
            MslType::Struct(name, _) => name.clone(),
        }
    }

    pub fn ir_type(&self, module: &mut Module) -> TypeId {
        match self {
            MslType::Float(n) => {
                let f = module.types.f32();
                module.types.vec_or_scalar(f, *n)
            }
            MslType::Int(n) | MslType::Uint(n) => {
                let i = module.types.i32();
                module.types.vec_or_scalar(i, *n)
            }
            MslType::Ushort => module.types.i16(),
            MslType::Struct(_, ty) => *ty,
        }
    }
}

#[derive(Clone, Debug)]
pub enum FunctionInput {
    /// Vertex stage-in attribute at `[[attribute(n)]]`.
    VertexStageIn { attribute: u32, ty: MslType, name: String },
    /// Fragment interpolant with a generated `user(...)` locator.
    FragmentStageIn { user: String, ty: MslType, interpolation: Interpolation },
    Position { interpolation: Interpolation },
    FrontFacing,
    VertexId,
    InstanceId,
    BaseVertex,
    BaseInstance,
    PrimitiveId,
    SampleIndex,
    InputCoverage,
    ThreadPositionInGrid,
    ThreadPositionInThreadgroup,
    ThreadgroupPositionInGrid,
    ThreadIndexInThreadgroup,
    /// Object-stage payload pointer (object-data address space).
    Payload { size: u32 },
    /// Mesh-stage payload is read-only const.
    MeshPayload { size: u32 },
    MeshGridProperties,
    Mesh,
    /// A plain device/constant buffer argument.
    Buffer {
        location: u32,
        ty: MslType,
        address_space: u32,
        size: Option<u32>,
        name: String,
        raster_order_group: Option<u32>,
    },
    /// The argument buffer: pointer to a resource struct.
    IndirectBuffer {
        location: u32,
        struct_type: TypeId,
        struct_type_info: MetadataId,
        size: u32,
        name: String,
    },
}

#[derive(Clone, Debug)]
pub enum FunctionOutput {
    Position,
    VertexOutput { user: String, ty: MslType },
    RenderTarget { index: u32, ty: MslType },
    Depth { qualifier: DepthQualifier },
    CoverageMask,
    ClipDistance { count: u32 },
    PointSize,
    RenderTargetArrayIndex,
    ViewportArrayIndex,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DepthQualifier {
    Any,
    Greater,
    Less,
}

/// Patch metadata for object/mesh rewrites of hull stages.
#[derive(Clone, Copy, Debug)]
pub struct PatchInfo {
    pub triangle: bool,
    pub control_points: u32,
}

pub struct BuiltFunction {
    pub func: FuncId,
    /// Argument value per defined input, in definition order.
    pub args: Vec<Value>,
    /// The return struct type, when the stage has outputs.
    pub ret_type: Option<TypeId>,
    /// Output field index per defined output.
    pub output_fields: Vec<u32>,
}

#[derive(Default)]
pub struct FunctionSignatureBuilder {
    inputs: Vec<FunctionInput>,
    outputs: Vec<FunctionOutput>,
    max_mesh_workgroup_size: Option<u32>,
    patch: Option<PatchInfo>,
    /// Mesh/object functions return void; their outputs exist only as
    /// metadata describing the mesh vertex layout.
    void_return: bool,
}

impl FunctionSignatureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_void_return(&mut self) {
        self.void_return = true;
    }

    pub fn define_input(&mut self, input: FunctionInput) -> usize {
        self.inputs.push(input);
        self.inputs.len() - 1
    }

    pub fn define_output(&mut self, output: FunctionOutput) -> usize {
        self.outputs.push(output);
        self.outputs.len() - 1
    }

    pub fn use_max_mesh_workgroup_size(&mut self, size: u32) {
        self.max_mesh_workgroup_size = Some(size);
    }

    pub fn set_patch(&mut self, patch: PatchInfo) {
        self.patch = Some(patch);
    }

    fn input_ir_type(&self, module: &mut Module, input: &FunctionInput) -> TypeId {
        match input {
            FunctionInput::VertexStageIn { ty, .. }
            | FunctionInput::FragmentStageIn { ty, .. } => ty.ir_type(module),
            FunctionInput::Position { .. } => {
                let f = module.types.f32();
                module.types.vec(f, 4)
            }
            FunctionInput::FrontFacing => module.types.i1(),
            FunctionInput::VertexId
            | FunctionInput::InstanceId
            | FunctionInput::BaseVertex
            | FunctionInput::BaseInstance
            | FunctionInput::PrimitiveId
            | FunctionInput::SampleIndex
            | FunctionInput::InputCoverage
            | FunctionInput::ThreadIndexInThreadgroup => module.types.i32(),
            FunctionInput::ThreadPositionInGrid
            | FunctionInput::ThreadPositionInThreadgroup
            | FunctionInput::ThreadgroupPositionInGrid => {
                let i = module.types.i32();
                module.types.vec(i, 3)
            }
            FunctionInput::Payload { size } | FunctionInput::MeshPayload { size } => {
                let byte = module.types.i8();
                let array = module.types.array(byte, *size as u64);
                // Payload rides in the object-data (threadgroup-like)
                // address space 6 on the way to the mesh stage.
                module.types.ptr(array, 6)
            }
            FunctionInput::MeshGridProperties => {
                let opaque = module.types.opaque_struct("struct._mesh_grid_properties_t");
                module.types.ptr(opaque, air::address_space::THREADGROUP)
            }
            FunctionInput::Mesh => {
                let opaque = module.types.opaque_struct("struct._mesh_t");
                module.types.ptr(opaque, air::address_space::MESH)
            }
            FunctionInput::Buffer { ty, address_space, .. } => {
                let pointee = ty.ir_type(module);
                module.types.ptr(pointee, *address_space)
            }
            FunctionInput::IndirectBuffer { struct_type, .. } => {
                module.types.ptr(*struct_type, air::address_space::CONSTANT)
            }
        }
    }

    fn output_ir_type(&self, module: &mut Module, output: &FunctionOutput) -> TypeId {
        match output {
            FunctionOutput::Position => {
                let f = module.types.f32();
                module.types.vec(f, 4)
            }
            FunctionOutput::VertexOutput { ty, .. } | FunctionOutput::RenderTarget { ty, .. } => {
                ty.ir_type(module)
            }
            FunctionOutput::Depth { .. } | FunctionOutput::PointSize => module.types.f32(),
            FunctionOutput::CoverageMask
            | FunctionOutput::RenderTargetArrayIndex
            | FunctionOutput::ViewportArrayIndex => module.types.i32(),
            FunctionOutput::ClipDistance { count } => {
                let f = module.types.f32();
                module.types.array(f, *count as u64)
            }
        }
    }

    fn input_metadata(
        &self,
        module: &mut Module,
        index: u32,
        input: &FunctionInput,
        ir_type: TypeId,
    ) -> MetadataId {
        let mut fields: Vec<MetadataId> = vec![module.md_u32(index)];
        let push_str = |module: &mut Module, fields: &mut Vec<MetadataId>, s: &str| {
            let id = module.md_string(s);
            fields.push(id);
        };
        let push_u32 = |module: &mut Module, fields: &mut Vec<MetadataId>, v: u32| {
            let id = module.md_u32(v);
            fields.push(id);
        };
        let push_type_info = |module: &mut Module,
                              fields: &mut Vec<MetadataId>,
                              ty: TypeId,
                              type_name: &str,
                              arg_name: &str| {
            let size = module.data_layout.size_of(&module.types, ty) as u32;
            let align = module.data_layout.abi_align(&module.types, ty) as u32;
            let entries = [
                ("air.arg_type_size", size),
                ("air.arg_type_align_size", align),
            ];
            for (key, value) in entries {
                let key = module.md_string(key);
                fields.push(key);
                let value = module.md_u32(value);
                fields.push(value);
            }
            let key = module.md_string("air.arg_type_name");
            fields.push(key);
            let value = module.md_string(type_name);
            fields.push(value);
            let key = module.md_string("air.arg_name");
            fields.push(key);
            let value = module.md_string(arg_name);
            fields.push(value);
        };

        match input {
            FunctionInput::VertexStageIn { attribute, ty, name } => {
                push_str(module, &mut fields, "air.vertex_input");
                push_str(module, &mut fields, "air.location_index");
                push_u32(module, &mut fields, *attribute);
                push_u32(module, &mut fields, 1);
                push_type_info(module, &mut fields, ir_type, &ty.name(), name);
            }
            FunctionInput::FragmentStageIn { user, ty, interpolation } => {
                push_str(module, &mut fields, "air.fragment_input");
                push_str(module, &mut fields, user);
                for key in interpolation.metadata_keys() {
                    push_str(module, &mut fields, key);
                }
                push_type_info(module, &mut fields, ir_type, &ty.name(), user);
            }
            FunctionInput::Position { interpolation } => {
                push_str(module, &mut fields, "air.position");
                for key in interpolation.metadata_keys() {
                    push_str(module, &mut fields, key);
                }
                push_type_info(module, &mut fields, ir_type, "float4", "position");
            }
            FunctionInput::FrontFacing => {
                push_str(module, &mut fields, "air.front_facing");
                push_type_info(module, &mut fields, ir_type, "bool", "front_facing");
            }
            FunctionInput::VertexId => {
                push_str(module, &mut fields, "air.vertex_id");
                push_type_info(module, &mut fields, ir_type, "uint", "vertex_id");
            }
            FunctionInput::InstanceId => {
                push_str(module, &mut fields, "air.instance_id");
                push_type_info(module, &mut fields, ir_type, "uint", "instance_id");
            }
            FunctionInput::BaseVertex => {
                push_str(module, &mut fields, "air.base_vertex");
                push_type_info(module, &mut fields, ir_type, "uint", "base_vertex");
            }
            FunctionInput::BaseInstance => {
                push_str(module, &mut fields, "air.base_instance");
                push_type_info(module, &mut fields, ir_type, "uint", "base_instance");
            }
            FunctionInput::PrimitiveId => {
                push_str(module, &mut fields, "air.primitive_id");
                push_type_info(module, &mut fields, ir_type, "uint", "primitive_id");
            }
            FunctionInput::SampleIndex => {
                push_str(module, &mut fields, "air.sample_id");
                push_type_info(module, &mut fields, ir_type, "uint", "sample_id");
            }
            FunctionInput::InputCoverage => {
                push_str(module, &mut fields, "air.sample_mask_in");
                push_type_info(module, &mut fields, ir_type, "uint", "sample_mask_in");
            }
            FunctionInput::ThreadPositionInGrid => {
                push_str(module, &mut fields, "air.thread_position_in_grid");
                push_type_info(module, &mut fields, ir_type, "uint3", "thread_position_in_grid");
            }
            FunctionInput::ThreadPositionInThreadgroup => {
                push_str(module, &mut fields, "air.thread_position_in_threadgroup");
                push_type_info(
                    module,
                    &mut fields,
                    ir_type,
                    "uint3",
                    "thread_position_in_threadgroup",
                );
            }
            FunctionInput::ThreadgroupPositionInGrid => {
                push_str(module, &mut fields, "air.threadgroup_position_in_grid");
                push_type_info(
                    module,
                    &mut fields,
                    ir_type,
                    "uint3",
                    "threadgroup_position_in_grid",
                );
            }
            FunctionInput::ThreadIndexInThreadgroup => {
                push_str(module, &mut fields, "air.thread_index_in_threadgroup");
                push_type_info(
                    module,
                    &mut fields,
                    ir_type,
                    "uint",
                    "thread_index_in_threadgroup",
                );
            }
            FunctionInput::Payload { size } | FunctionInput::MeshPayload { size } => {
                push_str(module, &mut fields, "air.payload");
                push_str(module, &mut fields, "air.arg_type_size");
                push_u32(module, &mut fields, *size);
                push_str(module, &mut fields, "air.arg_name");
                let name = module.md_string("payload");
                fields.push(name);
            }
            FunctionInput::MeshGridProperties => {
                push_str(module, &mut fields, "air.mesh_grid_properties");
                push_str(module, &mut fields, "air.arg_name");
                let name = module.md_string("mesh_grid_properties");
                fields.push(name);
            }
            FunctionInput::Mesh => {
                push_str(module, &mut fields, "air.mesh");
                push_str(module, &mut fields, "air.arg_name");
                let name = module.md_string("mesh");
                fields.push(name);
            }
            FunctionInput::Buffer { location, ty, address_space, size, name, raster_order_group } => {
                push_str(module, &mut fields, "air.buffer");
                if let Some(size) = size {
                    push_str(module, &mut fields, "air.buffer_size");
                    push_u32(module, &mut fields, *size);
                }
                push_str(module, &mut fields, "air.location_index");
                push_u32(module, &mut fields, *location);
                push_u32(module, &mut fields, 1); // array size
                push_str(module, &mut fields, "air.read");
                push_str(module, &mut fields, "air.address_space");
                push_u32(module, &mut fields, *address_space);
                if let Some(group) = raster_order_group {
                    push_str(module, &mut fields, "air.raster_order_group");
                    push_u32(module, &mut fields, *group);
                }
                let pointee = ty.ir_type(module);
                push_type_info(module, &mut fields, pointee, &ty.name(), name);
            }
            FunctionInput::IndirectBuffer { location, struct_type, struct_type_info, size, name } => {
                push_str(module, &mut fields, "air.indirect_buffer");
                push_str(module, &mut fields, "air.buffer_size");
                push_u32(module, &mut fields, *size);
                push_str(module, &mut fields, "air.location_index");
                push_u32(module, &mut fields, *location);
                push_u32(module, &mut fields, 1);
                push_str(module, &mut fields, "air.read");
                push_str(module, &mut fields, "air.address_space");
                push_u32(module, &mut fields, air::address_space::CONSTANT);
                push_str(module, &mut fields, "air.struct_type_info");
                fields.push(*struct_type_info);
                let size_bytes =
                    module.data_layout.size_of(&module.types, *struct_type) as u32;
                push_str(module, &mut fields, "air.arg_type_size");
                push_u32(module, &mut fields, size_bytes);
                push_str(module, &mut fields, "air.arg_type_align_size");
                let align = module.data_layout.abi_align(&module.types, *struct_type) as u32;
                push_u32(module, &mut fields, align);
                push_str(module, &mut fields, "air.arg_type_name");
                let tyname = module.md_string(&format!("{name}_type"));
                fields.push(tyname);
                push_str(module, &mut fields, "air.arg_name");
                let argname = module.md_string(name);
                fields.push(argname);
            }
        }
        module.md_tuple(fields)
    }

    fn output_metadata(
        &self,
        module: &mut Module,
        index: u32,
        output: &FunctionOutput,
        _ir_type: TypeId,
    ) -> MetadataId {
        let mut fields: Vec<MetadataId> = vec![module.md_u32(index)];
        let push_str = |module: &mut Module, fields: &mut Vec<MetadataId>, s: &str| {
            let id = module.md_string(s);
            fields.push(id);
        };
        let push_names = |module: &mut Module,
                          fields: &mut Vec<MetadataId>,
                          type_name: &str,
                          arg_name: &str| {
            let key = module.md_string("air.arg_type_name");
            fields.push(key);
            let value = module.md_string(type_name);
            fields.push(value);
            let key = module.md_string("air.arg_name");
            fields.push(key);
            let value = module.md_string(arg_name);
            fields.push(value);
        };
        match output {
            FunctionOutput::Position => {
                push_str(module, &mut fields, "air.position");
                push_names(module, &mut fields, "float4", "position");
            }
            FunctionOutput::VertexOutput { user, ty } => {
                push_str(module, &mut fields, "air.vertex_output");
                push_str(module, &mut fields, &format!("generated({user})"));
                push_names(module, &mut fields, &ty.name(), user);
            }
            FunctionOutput::RenderTarget { index, ty } => {
                push_str(module, &mut fields, "air.render_target");
                let idx = module.md_u32(*index);
                fields.push(idx);
                let one = module.md_u32(0);
                fields.push(one);
                push_names(module, &mut fields, &ty.name(), &format!("rt{index}"));
            }
            FunctionOutput::Depth { qualifier } => {
                push_str(module, &mut fields, "air.depth");
                push_str(module, &mut fields, "air.depth_qualifier");
                push_str(
                    module,
                    &mut fields,
                    match qualifier {
                        DepthQualifier::Any => "any",
                        DepthQualifier::Greater => "greater",
                        DepthQualifier::Less => "less",
                    },
                );
                push_names(module, &mut fields, "float", "depth");
            }
            FunctionOutput::CoverageMask => {
                push_str(module, &mut fields, "air.sample_mask");
                push_names(module, &mut fields, "uint", "sample_mask");
            }
            FunctionOutput::ClipDistance { count } => {
                push_str(module, &mut fields, "air.clip_distance");
                let count = module.md_u32(*count);
                fields.push(count);
                push_names(module, &mut fields, "float", "clip_distance");
            }
            FunctionOutput::PointSize => {
                push_str(module, &mut fields, "air.point_size");
                push_names(module, &mut fields, "float", "point_size");
            }
            FunctionOutput::RenderTargetArrayIndex => {
                push_str(module, &mut fields, "air.render_target_array_index");
                push_names(module, &mut fields, "uint", "render_target_array_index");
            }
            FunctionOutput::ViewportArrayIndex => {
                push_str(module, &mut fields, "air.viewport_array_index");
                push_names(module, &mut fields, "uint", "viewport_array_index");
            }
        }
        module.md_tuple(fields)
    }

    /// Creates the IR function, wires up the metadata tuple, and registers
    /// it with the stage's named-metadata node.
    pub fn create_function(
        &self,
        name: &str,
        module: &mut Module,
        stage: StageKind,
    ) -> Result<BuiltFunction, TranslateError> {
        let mut param_types = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            param_types.push(self.input_ir_type(module, input));
        }
        let (ret_type, output_fields) = if self.outputs.is_empty() || self.void_return {
            (None, Vec::new())
        } else {
            let mut field_types = Vec::with_capacity(self.outputs.len());
            let mut fields = Vec::with_capacity(self.outputs.len());
            for (index, output) in self.outputs.iter().enumerate() {
                field_types.push(self.output_ir_type(module, output));
                fields.push(index as u32);
            }
            (Some(module.types.literal_struct(field_types)), fields)
        };

        let void = module.types.void();
        let fn_ty = module.types.func(ret_type.unwrap_or(void), param_types);
        let func = module.get_or_insert_function(name, fn_ty, Default::default());
        let args = module.func(func).args.clone();

        let mut input_md = Vec::with_capacity(self.inputs.len());
        for (index, input) in self.inputs.iter().enumerate() {
            let ir_type = module.value_type(args[index]);
            input_md.push(self.input_metadata(module, index as u32, input, ir_type));
        }
        let mut output_md = Vec::with_capacity(self.outputs.len());
        for (index, output) in self.outputs.iter().enumerate() {
            let ir_type = self.output_ir_type(module, output);
            output_md.push(self.output_metadata(module, index as u32, output, ir_type));
        }

        let func_ref = module.function_ref(func);
        let func_md = module.md_value(func_ref);
        let outputs_tuple = module.md_tuple(output_md);
        let inputs_tuple = module.md_tuple(input_md);
        let mut fn_tuple = vec![func_md, outputs_tuple, inputs_tuple];
        if let Some(patch) = self.patch {
            let patch_key = module.md_string("air.patch");
            let patch_kind =
                module.md_string(if patch.triangle { "triangle" } else { "quad" });
            let control_points = module.md_u32(patch.control_points);
            let patch_tuple = module.md_tuple(vec![patch_key, patch_kind, control_points]);
            fn_tuple.push(patch_tuple);
        }
        if let Some(size) = self.max_mesh_workgroup_size {
            let key = module.md_string("air.max_total_threads_per_threadgroup");
            let value = module.md_u32(size);
            let tuple = module.md_tuple(vec![key, value]);
            fn_tuple.push(tuple);
        }
        let fn_tuple = module.md_tuple(fn_tuple);
        module.add_named_metadata_operand(stage.named_metadata(), fn_tuple);

        Ok(BuiltFunction { func, args, ret_type, output_fields })
    }
}

/// Argument-buffer construction: resources keyed by slot, built into an
/// identified struct plus its `air.struct_type_info` metadata.
#[derive(Default)]
pub struct ArgumentBufferBuilder {
    /// Insertion-ordered so emitted struct layout and metadata are
    /// deterministic.
    fields: IndexMap<u32, ArgumentBufferField>,
}

#[derive(Clone, Debug)]
pub enum ArgumentBufferField {
    /// Raw device pointer (typed/raw/structured buffer emulation).
    Buffer { name: String, ty: MslType },
    /// A `{pointer, metadata}` pair: the second dword carries encoded
    /// length/min-lod information.
    BufferWithMetadata { name: String, ty: MslType },
    Texture { name: String, texture: Texture },
    Sampler { name: String },
    /// UAV counter pointer.
    Counter { name: String },
}

pub struct BuiltArgumentBuffer {
    pub struct_type: TypeId,
    pub struct_type_info: MetadataId,
    /// Field index within the struct per argument-buffer slot.
    pub field_of_slot: IndexMap<u32, u32>,
    pub size: u32,
}

impl ArgumentBufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First definition of a slot wins; hull phases may re-declare the
    /// same binding.
    pub fn define(&mut self, slot: u32, field: ArgumentBufferField) {
        self.fields.entry(slot).or_insert(field);
    }

    pub fn build(&self, module: &mut Module, name: &str) -> BuiltArgumentBuffer {
        // Slot order is the struct layout order.
        let mut ordered: Vec<(&u32, &ArgumentBufferField)> = self.fields.iter().collect();
        ordered.sort_by_key(|(slot, _)| **slot);

        let mut field_types = Vec::with_capacity(ordered.len());
        let mut field_md = Vec::with_capacity(ordered.len());
        let mut field_of_slot = IndexMap::new();

        for (index, (slot, field)) in ordered.iter().enumerate() {
            field_of_slot.insert(**slot, index as u32);
            let (ty, md) = match field {
                ArgumentBufferField::Buffer { name, ty } => {
                    let pointee = ty.ir_type(module);
                    let ptr = module.types.ptr(pointee, air::address_space::DEVICE);
                    let md = argument_field_metadata(module, index as u32, **slot, "air.buffer", name);
                    (ptr, md)
                }
                ArgumentBufferField::BufferWithMetadata { name, ty } => {
                    let pointee = ty.ir_type(module);
                    let ptr = module.types.ptr(pointee, air::address_space::DEVICE);
                    let i64t = module.types.i64();
                    let pair = module.types.literal_struct(vec![ptr, i64t]);
                    let md = argument_field_metadata(module, index as u32, **slot, "air.buffer", name);
                    (pair, md)
                }
                ArgumentBufferField::Texture { name, texture } => {
                    let opaque_name =
                        format!("struct._{}_t", texture.kind.info().air_suffix);
                    let opaque = module.types.opaque_struct(&opaque_name);
                    let ptr = module.types.ptr(opaque, air::address_space::DEVICE);
                    let md =
                        argument_field_metadata(module, index as u32, **slot, "air.texture", name);
                    (ptr, md)
                }
                ArgumentBufferField::Sampler { name } => {
                    let opaque = module.types.opaque_struct("struct._sampler_t");
                    let ptr = module.types.ptr(opaque, air::address_space::CONSTANT);
                    let md =
                        argument_field_metadata(module, index as u32, **slot, "air.sampler", name);
                    (ptr, md)
                }
                ArgumentBufferField::Counter { name } => {
                    let i32t = module.types.i32();
                    let ptr = module.types.ptr(i32t, air::address_space::DEVICE);
                    let md = argument_field_metadata(module, index as u32, **slot, "air.buffer", name);
                    (ptr, md)
                }
            };
            field_types.push(ty);
            field_md.push(md);
        }

        let struct_type = module.types.named_struct(name, field_types.clone());
        let struct_type_info = module.md_tuple(field_md);
        let size = module.data_layout.size_of(&module.types, struct_type) as u32;
        BuiltArgumentBuffer { struct_type, struct_type_info, field_of_slot, size }
    }
}

fn argument_field_metadata(
    module: &mut Module,
    index: u32,
    slot: u32,
    kind: &str,
    name: &str,
) -> MetadataId {
    let fields = vec![
        module.md_u32(index),
        module.md_string(kind),
        module.md_string("air.location_index"),
        module.md_u32(slot),
        module.md_u32(1),
        module.md_string("air.arg_name"),
        module.md_string(name),
    ];
    module.md_tuple(fields)
}
