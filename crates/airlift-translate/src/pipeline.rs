//! End-to-end conversion: container bytes in, `.metallib` bytes out.
//!
//! `convert_shader` parses the container and reflection chunks, decodes
//! the program, runs the analyses, plans the signature, lowers the stage,
//! runs the cleanup pipeline, verifies, and serializes. Hull and domain
//! stages need their companion bytecode (the vertex stage for the object
//! rewrite; the hull stage for the mesh rewrite) supplied through
//! [`ConversionArgs::companion`].

use airlift_air::air::{
    address_space, AirBuilder, SampleType, TexAccess, Texture, TextureKind,
};
use airlift_air::ir::{
    optimize, verify, FlagBehavior, GlobalVariable, IrBuilder, Linkage, Module, OptLevel, Value,
};
use airlift_air::metallib::write_metallib;
use airlift_dxbc::{DxbcFile, FourCC, SignatureParameter};

use crate::binding::{
    argument_buffer_slot, buffer_index, uav_counter_slot, ArgumentBufferBuilder,
    ArgumentBufferField, BuiltArgumentBuffer, BuiltFunction, DepthQualifier, FunctionInput,
    FunctionOutput, FunctionSignatureBuilder, Interpolation, MslType, ResourceGroup, StageKind,
};
use crate::cfg::build_cfg;
use crate::dtype::analyze_phase;
use crate::lower::{
    lower_cfg, ArgBufferRef, BufferSlot, CBufferSlot, InterpolantSlot, RegArray, ResourceMap,
    TextureSlot, TgsmSlot, Translator, UNORM_WRITE_DELTA,
};
use crate::op::Op;
use crate::sm5::opcode::{
    INTERPOLATION_LINEAR_CENTROID, INTERPOLATION_LINEAR_NOPERSPECTIVE,
    INTERPOLATION_LINEAR_NOPERSPECTIVE_CENTROID, INTERPOLATION_LINEAR_NOPERSPECTIVE_SAMPLE,
    INTERPOLATION_LINEAR_SAMPLE,
};
use crate::sm5::{
    decode::{self, program_tokens},
    Decl, Phase, ResourceDimension, SampledReturnType, Shader, ShaderStage, Swizzle,
};
use crate::tess;
use crate::vertex_pulling::{emit_vertex_pulling, InputLayout};
use crate::TranslateError;

#[derive(Clone, Debug)]
pub struct ConversionArgs {
    /// AIR language version; only 3.1 is produced today.
    pub language_version: (u32, u32),
    /// Input-assembler layout for vertex pulling. When absent, vertex
    /// inputs arrive as `[[attribute(n)]]` stage-in.
    pub input_layout: Option<InputLayout>,
    /// PSO-side cap on the tessellation factor.
    pub max_potential_tess_factor: Option<u32>,
    /// Render targets bound with unorm formats, by target index.
    pub rt_unorm_mask: u32,
    /// Mesh-only pipelines skip rasterization-facing outputs.
    pub rasterization_disabled: bool,
    pub fast_math: bool,
    /// Companion bytecode: the vertex stage when converting a hull
    /// shader, the hull stage when converting a domain shader.
    pub companion: Option<Vec<u8>>,
}

impl Default for ConversionArgs {
    fn default() -> Self {
        ConversionArgs {
            language_version: (3, 1),
            input_layout: None,
            max_potential_tess_factor: None,
            rt_unorm_mask: 0,
            rasterization_disabled: false,
            fast_math: true,
            companion: None,
        }
    }
}

/// Parses a DXBC container into the decoded [`Shader`].
pub fn parse_shader(bytecode: &[u8]) -> Result<Shader, TranslateError> {
    let file = DxbcFile::parse(bytecode)?;
    let chunk = file.shader_chunk().ok_or_else(|| {
        TranslateError::Malformed("container has no shader chunk".to_string())
    })?;
    let tokens = program_tokens(chunk.data)?;
    let decoded = decode::decode_program(&tokens)?;

    let signature = |tag: &[u8; 4]| match file.get_signature(FourCC(*tag)) {
        Some(result) => result.map_err(TranslateError::from),
        None => Ok(Default::default()),
    };
    let rdef = match file.get_chunk(FourCC(*b"RDEF")) {
        Some(chunk) => Some(airlift_dxbc::parse_rdef_chunk(chunk.data)?),
        None => None,
    };

    Ok(Shader {
        stage: decoded.stage,
        version: decoded.version,
        phases: decoded.phases,
        input_signature: signature(b"ISGN")?,
        output_signature: signature(b"OSGN")?,
        patch_constant_signature: signature(b"PCSG")?,
        rdef,
    })
}

/// The single entry point: compiles `bytecode` and packages the result.
pub fn convert_shader(
    bytecode: &[u8],
    args: &ConversionArgs,
) -> Result<Vec<u8>, TranslateError> {
    let module = convert_to_module(bytecode, args)?;
    Ok(write_metallib(&module)?)
}

/// Compiles `bytecode` into the optimized, verified AIR module without
/// serializing it; `convert_shader` is this plus the metallib writer.
pub fn convert_to_module(
    bytecode: &[u8],
    args: &ConversionArgs,
) -> Result<Module, TranslateError> {
    let mut shader = parse_shader(bytecode)?;
    let mut module = build_air_module(args);

    match shader.stage {
        ShaderStage::Vertex => emit_vertex_function(&mut module, &mut shader, args)?,
        ShaderStage::Pixel => emit_fragment_function(&mut module, &mut shader, args)?,
        ShaderStage::Compute => emit_compute_function(&mut module, &mut shader, args)?,
        ShaderStage::Hull => {
            let companion = args.companion.as_deref().ok_or_else(|| {
                TranslateError::Unsupported(
                    "hull conversion requires the vertex-stage bytecode".to_string(),
                )
            })?;
            let mut vertex = parse_shader(companion)?;
            if vertex.stage != ShaderStage::Vertex {
                return Err(TranslateError::Malformed(
                    "hull companion is not a vertex shader".to_string(),
                ));
            }
            tess::convert_vertex_hull(&mut module, &mut vertex, &mut shader, "object_main", args)?;
        }
        ShaderStage::Domain => {
            let companion = args.companion.as_deref().ok_or_else(|| {
                TranslateError::Unsupported(
                    "domain conversion requires the hull-stage bytecode".to_string(),
                )
            })?;
            let hull = parse_shader(companion)?;
            if hull.stage != ShaderStage::Hull {
                return Err(TranslateError::Malformed(
                    "domain companion is not a hull shader".to_string(),
                ));
            }
            let info = tess::hull_stage_info(&hull)?;
            tess::convert_domain(&mut module, &mut shader, &info, "mesh_main", args)?;
        }
        ShaderStage::Geometry => {
            return Err(TranslateError::Unsupported(
                "geometry shaders".to_string(),
            ));
        }
    }

    optimize(&mut module, OptLevel::Default);
    verify(&module)?;
    Ok(module)
}

/// Fresh module with the AIR target configuration and module flags.
pub fn build_air_module(args: &ConversionArgs) -> Module {
    let mut module = Module::new("shader.air");
    module.source_file_name = "airlift_generated.metal".to_string();
    module.target_triple = "air64-apple-macosx14.0.0".to_string();
    module.data_layout = airlift_air::ir::DataLayout::air();
    module.sdk_version = (14, 0);
    module.add_flag(FlagBehavior::Error, "wchar_size", 4);
    module.add_flag(FlagBehavior::Max, "frame-pointer", 2);
    module.add_flag(FlagBehavior::Max, "air.max_device_buffers", 31);
    module.add_flag(FlagBehavior::Max, "air.max_constant_buffers", 31);
    module.add_flag(FlagBehavior::Max, "air.max_threadgroup_buffers", 31);
    module.add_flag(FlagBehavior::Max, "air.max_textures", 128);
    module.add_flag(FlagBehavior::Max, "air.max_read_write_textures", 8);
    module.add_flag(FlagBehavior::Max, "air.max_samplers", 16);

    let version = [2u32, 6, 0].map(|v| module.md_u32(v)).to_vec();
    let version = module.md_tuple(version);
    module.add_named_metadata_operand("air.version", version);
    let lang = {
        let metal = module.md_string("Metal");
        let major = module.md_u32(args.language_version.0);
        let minor = module.md_u32(args.language_version.1);
        let patch = module.md_u32(0);
        module.md_tuple(vec![metal, major, minor, patch])
    };
    module.add_named_metadata_operand("air.language_version", lang);
    let mut option = |module: &mut Module, name: &str| {
        let s = module.md_string(name);
        let tuple = module.md_tuple(vec![s]);
        module.add_named_metadata_operand("air.compile_options", tuple);
    };
    option(&mut module, "air.compile.denorms_disable");
    if args.fast_math {
        option(&mut module, "air.compile.fast_math_enable");
    } else {
        option(&mut module, "air.compile.fast_math_disable");
    }
    option(&mut module, "air.compile.framebuffer_fetch_enable");
    module
}

/* System value ids of the signature chunks (D3D_NAME values). */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KnownSystemValue {
    Position,
    ClipDistance,
    CullDistance,
    RenderTargetArrayIndex,
    ViewportArrayIndex,
    VertexId,
    PrimitiveId,
    InstanceId,
    FrontFace,
    SampleIndex,
    Depth,
    Coverage,
    TessFactor,
}

pub fn system_value(entry: &SignatureParameter) -> Option<KnownSystemValue> {
    Some(match entry.system_value_type {
        1 => KnownSystemValue::Position,
        2 => KnownSystemValue::ClipDistance,
        3 => KnownSystemValue::CullDistance,
        4 => KnownSystemValue::RenderTargetArrayIndex,
        5 => KnownSystemValue::ViewportArrayIndex,
        6 => KnownSystemValue::VertexId,
        7 => KnownSystemValue::PrimitiveId,
        8 => KnownSystemValue::InstanceId,
        9 => KnownSystemValue::FrontFace,
        10 => KnownSystemValue::SampleIndex,
        11..=16 => KnownSystemValue::TessFactor,
        65 | 67 | 68 => KnownSystemValue::Depth,
        66 => KnownSystemValue::Coverage,
        _ => return None,
    })
}

/// The `user(...)` locator connecting stage outputs to the next stage's
/// inputs.
pub fn signature_semantic_user(entry: &SignatureParameter) -> String {
    format!("{}{}", entry.semantic_name.to_uppercase(), entry.semantic_index)
}

fn component_msl_type(entry: &SignatureParameter) -> MslType {
    // D3D_REGISTER_COMPONENT: 1 uint, 2 sint, 3 float.
    let count = (entry.mask & 0xf).count_ones().max(1);
    match entry.component_type {
        1 => MslType::Uint(count),
        2 => MslType::Int(count),
        _ => MslType::Float(count),
    }
}

/* Shared prologue/epilogue plumbing */

pub fn alloc_reg_file(air: &mut AirBuilder<'_>, len: u32) -> RegArray {
    let int4 = air.int_vec_ty(4);
    let array_ty = air.ir.module.types.array(int4, len as u64);
    let ptr = air.ir.build_alloca(array_ty, 16);
    RegArray { ptr, elem_vec4: int4, len }
}

/// "Early main": one vec4 scratch array per data type the phase uses.
pub fn allocate_temp_arrays(
    air: &mut AirBuilder<'_>,
    res: &mut ResourceMap,
) -> Result<(), TranslateError> {
    use crate::sm5::DataType;
    for ty in res.temp_types.present_types() {
        let count = res.temp_types.count_of(ty);
        if count == 0 {
            continue;
        }
        let elem_vec4 = if ty.is_float() {
            air.float_vec_ty(4)
        } else {
            air.int_vec_ty(4)
        };
        let array_ty = air.ir.module.types.array(elem_vec4, count as u64);
        let ptr = air.ir.build_alloca(array_ty, 16);
        let class = if ty.is_float() { DataType::Float } else { DataType::Uint };
        res.temp_arrays
            .entry(class)
            .or_insert(RegArray { ptr, elem_vec4, len: count });
    }
    // Atomic compare-exchange routes its expected value through a slot.
    let i32t = air.int_ty();
    res.cmpxchg_slot = Some(air.ir.build_alloca(i32t, 4));
    Ok(())
}

pub fn allocate_indexable_temps(
    air: &mut AirBuilder<'_>,
    res: &mut ResourceMap,
    decls: &[Decl],
) {
    for decl in decls {
        if let Decl::IndexableTemp { index, len, .. } = decl {
            let int4 = air.int_vec_ty(4);
            let array_ty = air.ir.module.types.array(int4, *len as u64);
            let ptr = air.ir.build_alloca(array_ty, 16);
            res.indexable_temps
                .insert(*index, RegArray { ptr, elem_vec4: int4, len: *len });
        }
    }
}

fn allocate_tgsm(module: &mut Module, res: &mut ResourceMap, decls: &[Decl]) {
    for decl in decls {
        match decl {
            Decl::TgsmRaw { slot, byte_count } => {
                let i32t = module.types.i32();
                let len = (byte_count / 4).max(1);
                let ty = module.types.array(i32t, len as u64);
                let (_, value) = module.add_global(GlobalVariable {
                    name: format!("tgsm{slot}"),
                    ty,
                    address_space: address_space::THREADGROUP,
                    align: 4,
                    initializer: None,
                    constant: false,
                    linkage: Linkage::Internal,
                });
                // The lowering wants an i32 pointer, not the array.
                res.tgsm.insert(
                    *slot,
                    TgsmSlot { ptr: value, stride: 0, len_bytes: *byte_count },
                );
            }
            Decl::TgsmStructured { slot, stride, count } => {
                let i32t = module.types.i32();
                let len = (stride * count / 4).max(1);
                let ty = module.types.array(i32t, len as u64);
                let (_, value) = module.add_global(GlobalVariable {
                    name: format!("tgsm{slot}"),
                    ty,
                    address_space: address_space::THREADGROUP,
                    align: 4,
                    initializer: None,
                    constant: false,
                    linkage: Linkage::Internal,
                });
                res.tgsm.insert(
                    *slot,
                    TgsmSlot { ptr: value, stride: *stride, len_bytes: stride * count },
                );
            }
            _ => {}
        }
    }
}

/// TGSM pointers are declared as arrays; atomics and raw access expect an
/// element pointer.
fn flatten_tgsm_pointers(air: &mut AirBuilder<'_>, res: &mut ResourceMap) {
    let slots: Vec<u32> = res.tgsm.keys().copied().collect();
    for slot in slots {
        let entry = res.tgsm[&slot];
        let i32t = air.int_ty();
        let elem_ptr_ty = air.ir.module.types.ptr(i32t, address_space::THREADGROUP);
        let flat = air.ir.build_bitcast(entry.ptr, elem_ptr_ty);
        res.tgsm.insert(slot, TgsmSlot { ptr: flat, ..entry });
    }
}

fn allocate_icb(module: &mut Module, res: &mut ResourceMap, decls: &[Decl]) {
    for decl in decls {
        if let Decl::ImmediateConstantBuffer { data } = decl {
            let int4_rows: Vec<Value> = data
                .iter()
                .map(|row| module.const_u32_vec(row))
                .collect();
            if int4_rows.is_empty() {
                continue;
            }
            let initializer = module.const_array(&int4_rows);
            let ty = module.value_type(initializer);
            let (_, value) = module.add_global(GlobalVariable {
                name: "icb".to_string(),
                ty,
                address_space: address_space::CONSTANT,
                align: 16,
                initializer: Some(initializer),
                constant: true,
                linkage: Linkage::Internal,
            });
            res.icb = Some(value);
            res.icb_len = data.len() as u32;
        }
    }
}

fn sample_type_of(return_type: SampledReturnType) -> SampleType {
    match return_type {
        SampledReturnType::Sint => SampleType::Int,
        SampledReturnType::Uint => SampleType::Uint,
        _ => SampleType::Float,
    }
}

fn texture_kind_of(dimension: ResourceDimension) -> Option<TextureKind> {
    Some(match dimension {
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
        ResourceDimension::RawBuffer | ResourceDimension::StructuredBuffer => return None,
    })
}

/// Defines the argument-buffer fields for the resources a phase declares.
/// The slot rule is fixed: CB 32+r, sampler r, UAV 64+r, texture
/// 128+r, counter 192+r.
pub fn bind_phase_resources(
    ab: &mut ArgumentBufferBuilder,
    phase: &Phase,
    rdef: Option<&airlift_dxbc::RdefChunk>,
) {
    let name_of = |group: ResourceGroup, slot: u32, fallback: &str| -> String {
        let input_type = match group {
            ResourceGroup::CBuffer => airlift_dxbc::rdef::input_type::CBUFFER,
            ResourceGroup::Sampler => airlift_dxbc::rdef::input_type::SAMPLER,
            ResourceGroup::Texture => airlift_dxbc::rdef::input_type::TEXTURE,
            ResourceGroup::Uav => u32::MAX,
        };
        rdef.and_then(|rdef| {
            rdef.bindings
                .iter()
                .find(|binding| {
                    binding.bind_point == slot
                        && if group == ResourceGroup::Uav {
                            binding.input_type >= airlift_dxbc::rdef::input_type::UAV_RWTYPED
                        } else {
                            binding.input_type == input_type
                        }
                })
                .map(|binding| binding.name.clone())
        })
        .unwrap_or_else(|| format!("{fallback}{slot}"))
    };

    for decl in &phase.decls {
        match decl {
            Decl::ConstantBuffer { slot, .. } => {
                ab.define(
                    argument_buffer_slot(ResourceGroup::CBuffer, *slot),
                    ArgumentBufferField::Buffer {
                        name: name_of(ResourceGroup::CBuffer, *slot, "cb"),
                        ty: MslType::Uint(4),
                    },
                );
            }
            Decl::Sampler { slot, .. } => {
                ab.define(
                    argument_buffer_slot(ResourceGroup::Sampler, *slot),
                    ArgumentBufferField::Sampler {
                        name: name_of(ResourceGroup::Sampler, *slot, "s"),
                    },
                );
            }
            Decl::Resource { slot, dimension, return_type, .. } => {
                if let Some(kind) = texture_kind_of(*dimension) {
                    ab.define(
                        argument_buffer_slot(ResourceGroup::Texture, *slot),
                        ArgumentBufferField::Texture {
                            name: name_of(ResourceGroup::Texture, *slot, "t"),
                            texture: Texture {
                                kind,
                                sample_type: sample_type_of(*return_type),
                                memory_access: TexAccess::Sample,
                            },
                        },
                    );
                }
            }
            Decl::ResourceRaw { slot } | Decl::ResourceStructured { slot, .. } => {
                ab.define(
                    argument_buffer_slot(ResourceGroup::Texture, *slot),
                    ArgumentBufferField::BufferWithMetadata {
                        name: name_of(ResourceGroup::Texture, *slot, "t"),
                        ty: MslType::Uint(1),
                    },
                );
            }
            Decl::UavTyped { slot, dimension, return_type, .. } => {
                if let Some(kind) = texture_kind_of(*dimension) {
                    ab.define(
                        argument_buffer_slot(ResourceGroup::Uav, *slot),
                        ArgumentBufferField::Texture {
                            name: name_of(ResourceGroup::Uav, *slot, "u"),
                            texture: Texture {
                                kind,
                                sample_type: sample_type_of(*return_type),
                                memory_access: TexAccess::ReadWrite,
                            },
                        },
                    );
                }
            }
            Decl::UavRaw { slot, has_counter, .. }
            | Decl::UavStructured { slot, has_counter, .. } => {
                ab.define(
                    argument_buffer_slot(ResourceGroup::Uav, *slot),
                    ArgumentBufferField::BufferWithMetadata {
                        name: name_of(ResourceGroup::Uav, *slot, "u"),
                        ty: MslType::Uint(1),
                    },
                );
                if *has_counter {
                    ab.define(
                        uav_counter_slot(*slot),
                        ArgumentBufferField::Counter {
                            name: format!("u{slot}_counter"),
                        },
                    );
                }
            }
            _ => {}
        }
    }
}

/// Fills the lowering's slot maps from the built argument buffer.
pub fn populate_resource_slots(
    res: &mut ResourceMap,
    phase: &Phase,
    built: &BuiltArgumentBuffer,
) {
    let field = |group: ResourceGroup, slot: u32| -> Option<u32> {
        built
            .field_of_slot
            .get(&argument_buffer_slot(group, slot))
            .copied()
    };
    for decl in &phase.decls {
        match decl {
            Decl::ConstantBuffer { slot, size_in_vec4, .. } => {
                if let Some(field) = field(ResourceGroup::CBuffer, *slot) {
                    res.cbuffers
                        .insert(*slot, CBufferSlot { field, size_in_vec4: *size_in_vec4 });
                }
            }
            Decl::Sampler { slot, .. } => {
                if let Some(field) = field(ResourceGroup::Sampler, *slot) {
                    res.samplers.insert(*slot, field);
                }
            }
            Decl::Resource { slot, dimension, return_type, .. } => {
                if let (Some(field), Some(kind)) =
                    (field(ResourceGroup::Texture, *slot), texture_kind_of(*dimension))
                {
                    res.textures.insert(
                        *slot,
                        TextureSlot {
                            texture: Texture {
                                kind,
                                sample_type: sample_type_of(*return_type),
                                memory_access: TexAccess::Sample,
                            },
                            field,
                            buffer_field: None,
                            read_swizzle: Swizzle::IDENTITY,
                        },
                    );
                }
            }
            Decl::ResourceRaw { slot } => {
                if let Some(field) = field(ResourceGroup::Texture, *slot) {
                    res.srv_buffers.insert(
                        *slot,
                        BufferSlot { field, stride: 0, globally_coherent: false },
                    );
                }
            }
            Decl::ResourceStructured { slot, stride } => {
                if let Some(field) = field(ResourceGroup::Texture, *slot) {
                    res.srv_buffers.insert(
                        *slot,
                        BufferSlot { field, stride: *stride, globally_coherent: false },
                    );
                }
            }
            Decl::UavTyped { slot, dimension, return_type, .. } => {
                if let (Some(field), Some(kind)) =
                    (field(ResourceGroup::Uav, *slot), texture_kind_of(*dimension))
                {
                    res.uav_textures.insert(
                        *slot,
                        TextureSlot {
                            texture: Texture {
                                kind,
                                sample_type: sample_type_of(*return_type),
                                memory_access: TexAccess::ReadWrite,
                            },
                            field,
                            buffer_field: None,
                            read_swizzle: Swizzle::IDENTITY,
                        },
                    );
                }
            }
            Decl::UavRaw { slot, globally_coherent, has_counter } => {
                if let Some(field) = field(ResourceGroup::Uav, *slot) {
                    res.uav_buffers.insert(
                        *slot,
                        BufferSlot { field, stride: 0, globally_coherent: *globally_coherent },
                    );
                }
                if *has_counter {
                    if let Some(field) =
                        built.field_of_slot.get(&uav_counter_slot(*slot)).copied()
                    {
                        res.uav_counters.insert(
                            *slot,
                            BufferSlot { field, stride: 0, globally_coherent: false },
                        );
                    }
                }
            }
            Decl::UavStructured { slot, stride, globally_coherent, has_counter } => {
                if let Some(field) = field(ResourceGroup::Uav, *slot) {
                    res.uav_buffers.insert(
                        *slot,
                        BufferSlot {
                            field,
                            stride: *stride,
                            globally_coherent: *globally_coherent,
                        },
                    );
                }
                if *has_counter {
                    if let Some(field) =
                        built.field_of_slot.get(&uav_counter_slot(*slot)).copied()
                    {
                        res.uav_counters.insert(
                            *slot,
                            BufferSlot { field, stride: 0, globally_coherent: false },
                        );
                    }
                }
            }
            _ => {}
        }
    }
}

/* Stage emitters */

fn emit_vertex_function(
    module: &mut Module,
    shader: &mut Shader,
    args: &ConversionArgs,
) -> Result<(), TranslateError> {
    let max_input = shader.input_signature.max_register().max(1);
    let max_output = shader.output_signature.max_register().max(1);
    let pulling = args.input_layout.is_some();

    let mut signature = FunctionSignatureBuilder::new();

    /* Inputs */
    let mut stage_in_args: Vec<(usize, SignatureParameter)> = Vec::new();
    let vertex_id_idx = signature.define_input(FunctionInput::VertexId);
    let instance_id_idx = signature.define_input(FunctionInput::InstanceId);
    let base_vertex_idx = signature.define_input(FunctionInput::BaseVertex);
    let base_instance_idx = signature.define_input(FunctionInput::BaseInstance);
    let vb_table_idx = if pulling {
        Some(signature.define_input(FunctionInput::Buffer {
            location: buffer_index::VERTEX_BUFFER_TABLE,
            ty: MslType::Struct("vertex_buffer_entry".to_string(), {
                let i64t = module.types.i64();
                let i32t = module.types.i32();
                module
                    .types
                    .named_struct("vertex_buffer_entry", vec![i64t, i32t, i32t])
            }),
            address_space: address_space::CONSTANT,
            size: None,
            name: "vertex_buffers".to_string(),
            raster_order_group: None,
        }))
    } else {
        for entry in &shader.input_signature.entries.clone() {
            if system_value(entry).is_some() {
                continue;
            }
            let index = signature.define_input(FunctionInput::VertexStageIn {
                attribute: entry.register,
                ty: component_msl_type(entry),
                name: format!("attr{}", entry.register),
            });
            stage_in_args.push((index, entry.clone()));
        }
        None
    };

    /* Resources */
    let mut ab = ArgumentBufferBuilder::new();
    bind_phase_resources(&mut ab, shader.main_phase(), shader.rdef.as_ref());
    let ab_built = (!ab.is_empty()).then(|| ab.build(module, "vertex_resources"));
    let ab_idx = ab_built.as_ref().map(|built| {
        signature.define_input(FunctionInput::IndirectBuffer {
            location: buffer_index::ARGUMENT_BUFFER,
            struct_type: built.struct_type,
            struct_type_info: built.struct_type_info,
            size: built.size,
            name: "vertex_resources".to_string(),
        })
    });

    /* Outputs */
    let outputs = plan_vertex_outputs(&mut signature, shader, args);

    let built = signature.create_function("vertex_main", module, StageKind::Vertex)?;

    let ir = IrBuilder::new(module, built.func);
    let mut air = AirBuilder::new(ir);
    air.ir.fast_math = args.fast_math;

    let phase = shader.main_phase_mut();
    let temp_types = analyze_phase(phase);
    let cfg = build_cfg(phase)?;

    let mut res = ResourceMap::default();
    res.temp_types = temp_types;
    res.rt_unorm_mask = args.rt_unorm_mask;
    allocate_temp_arrays(&mut air, &mut res)?;
    allocate_indexable_temps(&mut air, &mut res, &shader.main_phase().decls);
    res.input = Some(alloc_reg_file(&mut air, max_input));
    res.output = Some(alloc_reg_file(&mut air, max_output));
    if let (Some(ab_idx), Some(ab_built)) = (ab_idx, ab_built.as_ref()) {
        res.arg_buffer = Some(ArgBufferRef {
            ptr: built.args[ab_idx],
            struct_type: ab_built.struct_type,
        });
        populate_resource_slots(&mut res, shader.main_phase(), ab_built);
    }
    allocate_icb(air.ir.module, &mut res, &shader.main_phase().decls);

    /* System values: the Metal ids already include their bases. */
    let vertex_id = built.args[vertex_id_idx];
    let instance_id = built.args[instance_id_idx];
    let base_vertex = built.args[base_vertex_idx];
    let base_instance = built.args[base_instance_idx];
    res.sv.vertex_id_with_base = Some(vertex_id);
    res.sv.base_vertex_id = Some(base_vertex);
    res.sv.vertex_id = Some(air.ir.build_sub(vertex_id, base_vertex));
    res.sv.base_instance_id = Some(base_instance);
    res.sv.instance_id = Some(air.ir.build_sub(instance_id, base_instance));

    let mut translator = Translator::new(air, ShaderStage::Vertex, res);

    /* Prologue: the input-register effects chain as deferred ops and run
     * against the translator once it exists. */
    let mut prologue: Op<'_, Translator<'_>, ()> = Op::nop();
    if let Some(vb_table_idx) = vb_table_idx {
        let table = built.args[vb_table_idx];
        let layout = args.input_layout.clone().unwrap_or_default();
        prologue = prologue.then(Op::new(move |t: &mut Translator<'_>| {
            emit_vertex_pulling(t, table, &layout)
        }));
    } else {
        for (arg_index, entry) in &stage_in_args {
            let arg = built.args[*arg_index];
            let entry = entry.clone();
            prologue = prologue.then(Op::new(move |t: &mut Translator<'_>| {
                init_input_reg(t, arg, &entry)
            }));
        }
    }
    let sv_entries = shader.input_signature.entries.clone();
    prologue = prologue.then(Op::new(move |t: &mut Translator<'_>| {
        wire_signature_system_values(t, &sv_entries)
    }));
    prologue.build(&mut translator)?;

    let epilogue = translator.air.ir.create_block("epilogue");
    lower_cfg(&mut translator, &cfg, epilogue)?;
    translator.air.ir.position_at_end(epilogue);
    emit_vertex_epilogue(&mut translator, &built, &outputs)?;
    Ok(())
}

/// Masked store of a stage-in argument into its input register.
fn init_input_reg(
    t: &mut Translator<'_>,
    arg: Value,
    entry: &SignatureParameter,
) -> Result<(), TranslateError> {
    let array = t.res.input.ok_or_else(|| {
        TranslateError::Lowering("stage has no input registers".to_string())
    })?;
    // Widen the argument to vec4 lanes at the entry's mask positions.
    let arg_ty = t.air.ir.module.value_type(arg);
    let lanes = t.air.ir.module.types.vector_len(arg_ty).unwrap_or(1);
    let is_float = t.air.ir.module.types.is_float_scalar_or_vector(arg_ty);
    let elem_ty = if is_float { t.air.float_ty() } else { t.air.int_ty() };
    let vec4_ty = t.air.ir.module.types.vec(elem_ty, 4);
    let mut value = t.air.ir.module.undef(vec4_ty);
    let mut source_lane = 0u32;
    for lane in 0..4u32 {
        if entry.mask & (1 << lane) == 0 {
            continue;
        }
        let elem = if lanes == 1 {
            arg
        } else {
            t.air.ir.build_extract_element(arg, source_lane.min(lanes - 1))
        };
        value = t.air.ir.build_insert_element(value, elem, lane);
        source_lane += 1;
    }
    let reg = t.air.int(entry.register);
    t.store_reg_vec4_masked(array, reg, value, entry.mask);
    Ok(())
}

/// Routes signature system values into their input registers.
fn wire_signature_system_values(
    t: &mut Translator<'_>,
    entries: &[SignatureParameter],
) -> Result<(), TranslateError> {
    for entry in entries {
        let value = match system_value(entry) {
            Some(KnownSystemValue::VertexId) => t.res.sv.vertex_id,
            Some(KnownSystemValue::InstanceId) => t.res.sv.instance_id,
            Some(KnownSystemValue::PrimitiveId) => t.res.sv.primitive_id,
            _ => None,
        };
        let Some(value) = value else { continue };
        let array = t.res.input.ok_or_else(|| {
            TranslateError::Lowering("stage has no input registers".to_string())
        })?;
        let splat = t.air.ir.build_vector_splat(4, value);
        let reg = t.air.int(entry.register);
        t.store_reg_vec4_masked(array, reg, splat, entry.mask);
    }
    Ok(())
}

enum PlannedOutput {
    Position { register: u32 },
    Vertex { register: u32, mask: u8, is_float: bool },
    ClipDistance { register: u32, mask: u8 },
    RenderTargetArrayIndex { register: u32 },
    ViewportArrayIndex { register: u32 },
}

fn plan_vertex_outputs(
    signature: &mut FunctionSignatureBuilder,
    shader: &Shader,
    args: &ConversionArgs,
) -> Vec<(usize, PlannedOutput)> {
    let mut outputs = Vec::new();
    if args.rasterization_disabled {
        return outputs;
    }
    for entry in &shader.output_signature.entries {
        match system_value(entry) {
            Some(KnownSystemValue::Position) => {
                let index = signature.define_output(FunctionOutput::Position);
                outputs.push((index, PlannedOutput::Position { register: entry.register }));
            }
            Some(KnownSystemValue::ClipDistance) | Some(KnownSystemValue::CullDistance) => {
                let count = (entry.mask & 0xf).count_ones();
                let index = signature.define_output(FunctionOutput::ClipDistance { count });
                outputs.push((
                    index,
                    PlannedOutput::ClipDistance { register: entry.register, mask: entry.mask },
                ));
            }
            Some(KnownSystemValue::RenderTargetArrayIndex) => {
                let index = signature.define_output(FunctionOutput::RenderTargetArrayIndex);
                outputs.push((
                    index,
                    PlannedOutput::RenderTargetArrayIndex { register: entry.register },
                ));
            }
            Some(KnownSystemValue::ViewportArrayIndex) => {
                let index = signature.define_output(FunctionOutput::ViewportArrayIndex);
                outputs.push((
                    index,
                    PlannedOutput::ViewportArrayIndex { register: entry.register },
                ));
            }
            _ => {
                let index = signature.define_output(FunctionOutput::VertexOutput {
                    user: signature_semantic_user(entry),
                    ty: component_msl_type(entry),
                });
                outputs.push((
                    index,
                    PlannedOutput::Vertex {
                        register: entry.register,
                        mask: entry.mask,
                        is_float: entry.component_type == 3 || entry.component_type == 0,
                    },
                ));
            }
        }
    }
    outputs
}

fn emit_vertex_epilogue(
    t: &mut Translator<'_>,
    built: &BuiltFunction,
    outputs: &[(usize, PlannedOutput)],
) -> Result<(), TranslateError> {
    let Some(ret_type) = built.ret_type else {
        t.air.ir.build_ret(None);
        return Ok(());
    };
    let array = t.res.output.ok_or_else(|| {
        TranslateError::Lowering("stage has no output registers".to_string())
    })?;
    let mut ret = t.air.ir.module.undef(ret_type);
    for (field, planned) in outputs {
        let value = match planned {
            PlannedOutput::Position { register } => {
                let reg = t.air.int(*register);
                let raw = t.load_reg_vec4(array, reg);
                t.air.bitcast_to_float(raw)
            }
            PlannedOutput::Vertex { register, mask, is_float } => {
                let reg = t.air.int(*register);
                let raw = t.load_reg_vec4(array, reg);
                let raw = if *is_float { t.air.bitcast_to_float(raw) } else { raw };
                narrow_to_mask(t, raw, *mask)
            }
            PlannedOutput::ClipDistance { register, mask } => {
                // Fan the masked lanes out into the float array.
                let reg = t.air.int(*register);
                let raw = t.load_reg_vec4(array, reg);
                let raw = t.air.bitcast_to_float(raw);
                let count = (mask & 0xf).count_ones();
                let f32t = t.air.float_ty();
                let arr_ty = t.air.ir.module.types.array(f32t, count as u64);
                let mut agg = t.air.ir.module.undef(arr_ty);
                let mut out_lane = 0u32;
                for lane in 0..4u32 {
                    if mask & (1 << lane) == 0 {
                        continue;
                    }
                    let elem = t.air.ir.build_extract_element(raw, lane);
                    agg = t.air.ir.build_insert_value(agg, elem, out_lane);
                    out_lane += 1;
                }
                agg
            }
            PlannedOutput::RenderTargetArrayIndex { register }
            | PlannedOutput::ViewportArrayIndex { register } => {
                let reg = t.air.int(*register);
                let raw = t.load_reg_vec4(array, reg);
                t.air.ir.build_extract_element(raw, 0)
            }
        };
        ret = t.air.ir.build_insert_value(ret, value, *field as u32);
    }
    t.air.ir.build_ret(Some(ret));
    Ok(())
}

/// Drops lanes outside the signature mask, keeping vec4 when all four are
/// written.
fn narrow_to_mask(t: &mut Translator<'_>, value: Value, mask: u8) -> Value {
    let count = (mask & 0xf).count_ones();
    if count >= 4 {
        return value;
    }
    let lanes: Vec<i32> = (0..4)
        .filter(|lane| mask & (1 << lane) != 0)
        .map(|lane| lane as i32)
        .collect();
    t.air.ir.build_shuffle(value, &lanes)
}

fn interpolation_of(decls: &[Decl], register: u32) -> Interpolation {
    for decl in decls {
        let (operand, interpolation) = match decl {
            Decl::InputPs { operand, interpolation } => (operand, *interpolation),
            Decl::InputPsSiv { operand, interpolation, .. } => (operand, *interpolation),
            _ => continue,
        };
        let matches_reg = matches!(
            &operand.kind,
            crate::sm5::SrcKind::Input { index } if index.as_imm() == Some(register)
        );
        if !matches_reg {
            continue;
        }
        return match interpolation {
            x if x == INTERPOLATION_LINEAR_CENTROID => Interpolation::CentroidPerspective,
            x if x == INTERPOLATION_LINEAR_NOPERSPECTIVE => Interpolation::CenterNoPerspective,
            x if x == INTERPOLATION_LINEAR_NOPERSPECTIVE_CENTROID => {
                Interpolation::CentroidNoPerspective
            }
            x if x == INTERPOLATION_LINEAR_SAMPLE => Interpolation::SamplePerspective,
            x if x == INTERPOLATION_LINEAR_NOPERSPECTIVE_SAMPLE => {
                Interpolation::SampleNoPerspective
            }
            1 => Interpolation::Flat,
            _ => Interpolation::CenterPerspective,
        };
    }
    Interpolation::CenterPerspective
}

fn emit_fragment_function(
    module: &mut Module,
    shader: &mut Shader,
    args: &ConversionArgs,
) -> Result<(), TranslateError> {
    let max_input = shader.input_signature.max_register().max(1);
    let max_output = shader.output_signature.max_register().max(1);

    let mut signature = FunctionSignatureBuilder::new();

    let decls = shader.main_phase().decls.clone();
    let mut input_args: Vec<(usize, SignatureParameter, bool)> = Vec::new();
    let mut front_face_idx = None;
    let mut sample_index_idx = None;
    let mut coverage_idx = None;
    let mut primitive_idx = None;
    for entry in shader.input_signature.entries.clone() {
        match system_value(&entry) {
            Some(KnownSystemValue::Position) => {
                let interpolation = interpolation_of(&decls, entry.register);
                let index = signature.define_input(FunctionInput::Position { interpolation });
                input_args.push((index, entry, true));
            }
            Some(KnownSystemValue::FrontFace) => {
                let index = signature.define_input(FunctionInput::FrontFacing);
                front_face_idx = Some((index, entry));
            }
            Some(KnownSystemValue::SampleIndex) => {
                let index = signature.define_input(FunctionInput::SampleIndex);
                sample_index_idx = Some((index, entry));
            }
            Some(KnownSystemValue::Coverage) => {
                let index = signature.define_input(FunctionInput::InputCoverage);
                coverage_idx = Some((index, entry));
            }
            Some(KnownSystemValue::PrimitiveId) => {
                let index = signature.define_input(FunctionInput::PrimitiveId);
                primitive_idx = Some((index, entry));
            }
            _ => {
                let interpolation = interpolation_of(&decls, entry.register);
                let index = signature.define_input(FunctionInput::FragmentStageIn {
                    user: signature_semantic_user(&entry),
                    ty: component_msl_type(&entry),
                    interpolation,
                });
                input_args.push((index, entry, false));
            }
        }
    }

    let mut ab = ArgumentBufferBuilder::new();
    bind_phase_resources(&mut ab, shader.main_phase(), shader.rdef.as_ref());
    let ab_built = (!ab.is_empty()).then(|| ab.build(module, "fragment_resources"));
    let ab_idx = ab_built.as_ref().map(|built| {
        signature.define_input(FunctionInput::IndirectBuffer {
            location: buffer_index::ARGUMENT_BUFFER,
            struct_type: built.struct_type,
            struct_type_info: built.struct_type_info,
            size: built.size,
            name: "fragment_resources".to_string(),
        })
    });

    /* Outputs */
    struct FragmentOutput {
        field: usize,
        register: u32,
        mask: u8,
        kind: FragmentOutputKind,
    }
    enum FragmentOutputKind {
        Target { unorm: bool, is_float: bool },
        Depth,
        Coverage,
    }
    let mut outputs: Vec<FragmentOutput> = Vec::new();
    let mut has_depth = false;
    for entry in &shader.output_signature.entries {
        match system_value(entry) {
            Some(KnownSystemValue::Depth) => {
                let qualifier = depth_qualifier_of(&decls);
                let field = signature.define_output(FunctionOutput::Depth { qualifier });
                has_depth = true;
                outputs.push(FragmentOutput {
                    field,
                    register: entry.register,
                    mask: entry.mask,
                    kind: FragmentOutputKind::Depth,
                });
            }
            Some(KnownSystemValue::Coverage) => {
                let field = signature.define_output(FunctionOutput::CoverageMask);
                outputs.push(FragmentOutput {
                    field,
                    register: entry.register,
                    mask: entry.mask,
                    kind: FragmentOutputKind::Coverage,
                });
            }
            _ => {
                let field = signature.define_output(FunctionOutput::RenderTarget {
                    index: entry.register,
                    ty: component_msl_type(entry),
                });
                outputs.push(FragmentOutput {
                    field,
                    register: entry.register,
                    mask: entry.mask,
                    kind: FragmentOutputKind::Target {
                        unorm: args.rt_unorm_mask & (1 << entry.register) != 0,
                        is_float: entry.component_type == 3 || entry.component_type == 0,
                    },
                });
            }
        }
    }

    let built = signature.create_function("fragment_main", module, StageKind::Fragment)?;

    let ir = IrBuilder::new(module, built.func);
    let mut air = AirBuilder::new(ir);
    air.ir.fast_math = args.fast_math;

    let phase = shader.main_phase_mut();
    let temp_types = analyze_phase(phase);
    let cfg = build_cfg(phase)?;

    let mut res = ResourceMap::default();
    res.temp_types = temp_types;
    res.rt_unorm_mask = args.rt_unorm_mask;
    allocate_temp_arrays(&mut air, &mut res)?;
    allocate_indexable_temps(&mut air, &mut res, &shader.main_phase().decls);
    res.input = Some(alloc_reg_file(&mut air, max_input));
    res.output = Some(alloc_reg_file(&mut air, max_output));
    if has_depth {
        let f32t = air.float_ty();
        res.output_depth = Some(air.ir.build_alloca(f32t, 4));
    }
    if outputs.iter().any(|o| matches!(o.kind, FragmentOutputKind::Coverage)) {
        let i32t = air.int_ty();
        res.output_coverage = Some(air.ir.build_alloca(i32t, 4));
    }
    if let (Some(ab_idx), Some(ab_built)) = (ab_idx, ab_built.as_ref()) {
        res.arg_buffer = Some(ArgBufferRef {
            ptr: built.args[ab_idx],
            struct_type: ab_built.struct_type,
        });
        populate_resource_slots(&mut res, shader.main_phase(), ab_built);
    }
    allocate_icb(air.ir.module, &mut res, &shader.main_phase().decls);

    if let Some((index, _)) = &sample_index_idx {
        res.sv.thread_id_in_group_flattened = Some(built.args[*index]);
    }
    if let Some((index, _)) = &coverage_idx {
        res.sv.coverage_mask = Some(built.args[*index]);
    }
    if let Some((index, _)) = &primitive_idx {
        res.sv.primitive_id = Some(built.args[*index]);
    }

    let mut translator = Translator::new(air, ShaderStage::Pixel, res);

    /* Prologue: interpolants and system values into input registers. */
    for (arg_index, entry, _is_position) in &input_args {
        init_input_reg(&mut translator, built.args[*arg_index], entry)?;
        let interpolation = interpolation_of(&decls, entry.register);
        let slot_ptr = {
            let array = translator.res.input.unwrap();
            let reg = translator.air.int(entry.register);
            let base_ty = {
                let module = &mut translator.air.ir.module;
                module.types.array(array.elem_vec4, array.len as u64)
            };
            let zero = translator.air.int(0);
            translator.air.ir.build_gep(base_ty, array.ptr, &[zero, reg])
        };
        translator.res.interpolants.insert(
            entry.register,
            InterpolantSlot { ptr: slot_ptr, perspective: interpolation.perspective() },
        );
    }
    if let Some((index, entry)) = &front_face_idx {
        let (index, entry) = (*index, entry.clone());
        // Front-facing arrives as i1; DXBC wants an all-ones mask.
        let flag = built.args[index];
        let wide = translator.bool_to_mask(flag);
        let array = translator.res.input.unwrap();
        let splat = translator.air.ir.build_vector_splat(4, wide);
        let reg = translator.air.int(entry.register);
        translator.store_reg_vec4_masked(array, reg, splat, entry.mask);
    }
    for pair in [&sample_index_idx, &coverage_idx, &primitive_idx].into_iter().flatten() {
        let (index, entry) = (pair.0, &pair.1);
        let value = built.args[index];
        let array = translator.res.input.unwrap();
        let splat = translator.air.ir.build_vector_splat(4, value);
        let reg = translator.air.int(entry.register);
        translator.store_reg_vec4_masked(array, reg, splat, entry.mask);
    }

    let epilogue = translator.air.ir.create_block("epilogue");
    lower_cfg(&mut translator, &cfg, epilogue)?;
    translator.air.ir.position_at_end(epilogue);

    /* Epilogue */
    let Some(ret_type) = built.ret_type else {
        translator.air.ir.build_ret(None);
        return Ok(());
    };
    let array = translator.res.output.unwrap();
    let mut ret = translator.air.ir.module.undef(ret_type);
    for output in &outputs {
        let value = match &output.kind {
            FragmentOutputKind::Target { unorm, is_float } => {
                let reg = translator.air.int(output.register);
                let raw = translator.load_reg_vec4(array, reg);
                let mut value = if *is_float {
                    translator.air.bitcast_to_float(raw)
                } else {
                    raw
                };
                if *unorm && *is_float {
                    // The write-back delta for unorm targets, preserved
                    // verbatim.
                    let delta = translator
                        .air
                        .ir
                        .module
                        .const_f32_vec(&[UNORM_WRITE_DELTA; 4]);
                    value = translator.air.ir.build_fsub(value, delta);
                }
                narrow_to_mask(&mut translator, value, output.mask)
            }
            FragmentOutputKind::Depth => {
                let slot = translator.res.output_depth.unwrap();
                translator.air.ir.build_load(slot, 4)
            }
            FragmentOutputKind::Coverage => {
                let slot = translator.res.output_coverage.unwrap();
                translator.air.ir.build_load(slot, 4)
            }
        };
        ret = translator
            .air
            .ir
            .build_insert_value(ret, value, output.field as u32);
    }
    translator.air.ir.build_ret(Some(ret));
    Ok(())
}

fn depth_qualifier_of(decls: &[Decl]) -> DepthQualifier {
    for decl in decls {
        let operand = match decl {
            Decl::Output { operand } => operand,
            Decl::OutputSiv { operand, .. } => operand,
            _ => continue,
        };
        match operand.kind {
            crate::sm5::DstKind::OutputDepthGreaterEqual => return DepthQualifier::Greater,
            crate::sm5::DstKind::OutputDepthLessEqual => return DepthQualifier::Less,
            _ => {}
        }
    }
    DepthQualifier::Any
}

fn emit_compute_function(
    module: &mut Module,
    shader: &mut Shader,
    args: &ConversionArgs,
) -> Result<(), TranslateError> {
    let mut signature = FunctionSignatureBuilder::new();
    let thread_id_idx = signature.define_input(FunctionInput::ThreadPositionInGrid);
    let group_id_idx = signature.define_input(FunctionInput::ThreadgroupPositionInGrid);
    let local_id_idx = signature.define_input(FunctionInput::ThreadPositionInThreadgroup);
    let flat_id_idx = signature.define_input(FunctionInput::ThreadIndexInThreadgroup);

    if let Some((x, y, z)) = shader.find_decl(|d| match d {
        Decl::ThreadGroup { x, y, z } => Some((*x, *y, *z)),
        _ => None,
    }) {
        signature.use_max_mesh_workgroup_size(x * y * z);
    }

    let mut ab = ArgumentBufferBuilder::new();
    bind_phase_resources(&mut ab, shader.main_phase(), shader.rdef.as_ref());
    let ab_built = (!ab.is_empty()).then(|| ab.build(module, "compute_resources"));
    let ab_idx = ab_built.as_ref().map(|built| {
        signature.define_input(FunctionInput::IndirectBuffer {
            location: buffer_index::ARGUMENT_BUFFER,
            struct_type: built.struct_type,
            struct_type_info: built.struct_type_info,
            size: built.size,
            name: "compute_resources".to_string(),
        })
    });

    let built = signature.create_function("compute_main", module, StageKind::Kernel)?;

    let ir = IrBuilder::new(module, built.func);
    let mut air = AirBuilder::new(ir);
    air.ir.fast_math = args.fast_math;

    let phase = shader.main_phase_mut();
    let temp_types = analyze_phase(phase);
    let cfg = build_cfg(phase)?;

    let mut res = ResourceMap::default();
    res.temp_types = temp_types;
    allocate_temp_arrays(&mut air, &mut res)?;
    allocate_indexable_temps(&mut air, &mut res, &shader.main_phase().decls);
    if let (Some(ab_idx), Some(ab_built)) = (ab_idx, ab_built.as_ref()) {
        res.arg_buffer = Some(ArgBufferRef {
            ptr: built.args[ab_idx],
            struct_type: ab_built.struct_type,
        });
        populate_resource_slots(&mut res, shader.main_phase(), ab_built);
    }
    allocate_tgsm(air.ir.module, &mut res, &shader.main_phase().decls);
    allocate_icb(air.ir.module, &mut res, &shader.main_phase().decls);

    res.sv.thread_id = Some(built.args[thread_id_idx]);
    res.sv.thread_group_id = Some(built.args[group_id_idx]);
    res.sv.thread_id_in_group = Some(built.args[local_id_idx]);
    res.sv.thread_id_in_group_flattened = Some(built.args[flat_id_idx]);

    let mut translator = Translator::new(air, ShaderStage::Compute, res);
    flatten_tgsm_pointers(&mut translator.air, &mut translator.res);

    let epilogue = translator.air.ir.create_block("epilogue");
    lower_cfg(&mut translator, &cfg, epilogue)?;
    translator.air.ir.position_at_end(epilogue);
    translator.air.ir.build_ret(None);
    Ok(())
}
