//! Hull + domain tessellation, re-expressed as a Metal object + mesh
//! pipeline.
//!
//! The object function runs the vertex stage for each control point of a
//! batch of patches, then the hull phases, packs control points and patch
//! constants into the mesh payload, clamps and integerizes the tess
//! factors, and dispatches one mesh threadgroup per workload. The mesh
//! function evaluates the domain shader at each tessellated location and
//! emits vertices and primitives through the mesh API.
//!
//! Payload layout (4-byte aligned, size rounded up to 16):
//! `{ control_points[patch][point][reg], patch_constants[patch][scalar],
//!    batched_patch_start, workloads[] }` where each workload record is
//! the 40-byte `TessMeshWorkload`: four half2 factor pairs, two integer
//! factors, two factor bytes, a complement flag, four more half2 pairs,
//! two more integer factors, and the patch index.

use airlift_air::air::{AirBuilder, MemFlags};
use airlift_air::ir::{
    AtomicOp, CastOp, GlobalVariable, IrBuilder, Linkage, Module, Pred, TypeId, Value,
};

use crate::binding::{
    buffer_index, ArgumentBufferBuilder, FunctionInput, FunctionOutput,
    FunctionSignatureBuilder, MslType, PatchInfo, StageKind,
};
use crate::cfg::build_cfg;
use crate::dtype::analyze_phase;
use crate::lower::{lower_cfg, RegArray, ResourceMap, Translator};
use crate::pipeline::{
    bind_phase_resources, signature_semantic_user, system_value, ConversionArgs,
};
use crate::sm5::{
    PhaseKind, Shader, ShaderStage, TessDomain, TessOutputPrimitive, TessPartitioning,
};
use crate::vertex_pulling::{emit_vertex_pulling, InputLayout};
use crate::TranslateError;

/// Size of one workload record in bytes (ten dwords).
pub const WORKLOAD_SIZE: u32 = 40;
const WORKLOAD_DWORDS: u32 = WORKLOAD_SIZE / 4;
/// Dword offsets inside a workload record.
const WORKLOAD_FACTOR_HALF2: u32 = 0;
const WORKLOAD_INTEGER_FACTOR: u32 = 4;
const WORKLOAD_PATCH_INDEX: u32 = 9;

/// Hull-stage facts the domain (mesh) conversion needs.
#[derive(Clone, Copy, Debug)]
pub struct HullStageInfo {
    pub domain: TessDomain,
    pub partitioning: TessPartitioning,
    pub output_primitive: TessOutputPrimitive,
    pub max_tess_factor: f32,
    pub input_control_points: u32,
    pub output_control_points: u32,
    pub max_hull_output_register: u32,
    pub patch_constant_registers: u32,
}

pub fn hull_stage_info(hull: &Shader) -> Result<HullStageInfo, TranslateError> {
    use crate::sm5::Decl;
    let domain = hull
        .find_decl(|d| match d {
            Decl::TessDomain { domain } => Some(*domain),
            _ => None,
        })
        .ok_or_else(|| TranslateError::Malformed("hull shader without domain".to_string()))?;
    let partitioning = hull
        .find_decl(|d| match d {
            Decl::TessPartitioning { partitioning } => Some(*partitioning),
            _ => None,
        })
        .unwrap_or(TessPartitioning::Integer);
    let output_primitive = hull
        .find_decl(|d| match d {
            Decl::TessOutputPrimitive { primitive } => Some(*primitive),
            _ => None,
        })
        .unwrap_or(TessOutputPrimitive::TriangleCw);
    let max_tess_factor = hull
        .find_decl(|d| match d {
            Decl::MaxTessFactor { factor } => Some(*factor),
            _ => None,
        })
        .unwrap_or(64.0);
    let input_control_points = hull
        .find_decl(|d| match d {
            Decl::InputControlPointCount { count } => Some(*count),
            _ => None,
        })
        .unwrap_or(1);
    let output_control_points = hull
        .find_decl(|d| match d {
            Decl::OutputControlPointCount { count } => Some(*count),
            _ => None,
        })
        .unwrap_or(input_control_points);
    let max_hull_output_register = hull.output_signature.max_register().max(1);
    let patch_constant_registers = hull.patch_constant_signature.max_register().max(1);
    Ok(HullStageInfo {
        domain,
        partitioning,
        output_primitive,
        max_tess_factor,
        input_control_points,
        output_control_points,
        max_hull_output_register,
        patch_constant_registers,
    })
}

/// Clamps and rounds a float factor to the partitioning's integer level.
pub fn integer_factor(factor: f32, partitioning: TessPartitioning) -> u32 {
    match partitioning {
        TessPartitioning::Integer => factor.clamp(1.0, 64.0).ceil() as u32,
        TessPartitioning::Pow2 => {
            let clamped = factor.clamp(1.0, 64.0) as u32;
            clamped.next_power_of_two()
        }
        TessPartitioning::FractionalOdd => {
            let rounded = factor.clamp(1.0, 63.0).ceil() as u32;
            if rounded % 2 == 1 {
                rounded
            } else {
                rounded + 1
            }
        }
        TessPartitioning::FractionalEven => {
            let rounded = factor.clamp(2.0, 64.0).ceil() as u32;
            if rounded % 2 == 1 {
                rounded + 1
            } else {
                rounded
            }
        }
    }
}

/// Worst-case workload count per patch for the mesh grid reservation.
pub fn max_potential_workload_count(max_factor: u32, domain: TessDomain) -> u32 {
    let bands = (max_factor.saturating_sub(1) as f32 / 4.0).ceil() as u32;
    match domain {
        TessDomain::Isoline => 0,
        TessDomain::Triangle => bands * 3 + (max_factor & 1),
        TessDomain::Quad => bands * 4 + (max_factor & 1),
    }
}

/// The factor actually honored: the hull's declared maximum, lowered until
/// its integer level fits the PSO override.
pub fn final_max_tess_factor(
    declared: f32,
    partitioning: TessPartitioning,
    pso_override: Option<u32>,
) -> (f32, u32) {
    let mut factor = declared;
    let mut level = integer_factor(factor, partitioning);
    if let Some(limit) = pso_override {
        if level > limit {
            while factor > 1.0 {
                level = integer_factor(factor, partitioning);
                if level <= limit {
                    return (factor, level);
                }
                factor -= 1.0;
            }
            let minimum = integer_factor(1.0, partitioning);
            return (minimum as f32, minimum);
        }
    }
    (factor, level)
}

/// Reserved vertices per patch for the mesh: `((N+2-(N&1))*2+1)` with
/// `N = max_factor + 1` edge points.
pub fn reserved_vertex_count(max_factor: u32) -> u32 {
    let edge_points = max_factor + 1;
    (edge_points + 2 - (edge_points & 1)) * 2 + 1
}

fn next_pow2(value: u32) -> u32 {
    value.max(1).next_power_of_two()
}

struct PayloadLayout {
    struct_type: TypeId,
    size: u32,
    patches_per_group: u32,
    threads_per_patch: u32,
    max_workloads: u32,
}

fn build_payload_layout(
    module: &mut Module,
    hull: &HullStageInfo,
    factor_int: u32,
) -> PayloadLayout {
    let threads_per_patch = next_pow2(
        hull.output_control_points
            .max(hull.input_control_points)
            .max(1),
    );
    let patches_per_group = next_pow2((32 / threads_per_patch).max(1));
    let max_workloads = max_potential_workload_count(factor_int, hull.domain).max(1);

    let i32t = module.types.i32();
    let int4 = {
        let i32t = module.types.i32();
        module.types.vec(i32t, 4)
    };
    let per_point = module.types.array(int4, hull.max_hull_output_register as u64);
    let per_patch = module.types.array(per_point, hull.output_control_points as u64);
    let control_points = module.types.array(per_patch, patches_per_group as u64);
    let pc_scalars_per_patch = module
        .types
        .array(i32t, hull.patch_constant_registers as u64 * 4);
    let patch_constants = module.types.array(pc_scalars_per_patch, patches_per_group as u64);
    let workload_words = module.types.array(
        i32t,
        (max_workloads * patches_per_group * WORKLOAD_DWORDS) as u64,
    );
    let struct_type = module.types.named_struct(
        "payload",
        vec![control_points, patch_constants, i32t, workload_words],
    );
    // The payload is 4-aligned and its size rounds up to 16 bytes.
    let raw_size = module.data_layout.size_of(&module.types, struct_type) as u32;
    let size = raw_size.next_multiple_of(16);
    PayloadLayout {
        struct_type,
        size,
        patches_per_group,
        threads_per_patch,
        max_workloads,
    }
}

/// Converts a vertex + hull pair into the object-stage function.
pub fn convert_vertex_hull(
    module: &mut Module,
    vertex: &mut Shader,
    hull: &mut Shader,
    name: &str,
    args: &ConversionArgs,
) -> Result<(), TranslateError> {
    let info = hull_stage_info(hull)?;
    if info.domain == TessDomain::Isoline {
        return Err(TranslateError::Unsupported(
            "isoline tessellation".to_string(),
        ));
    }
    let (final_factor, factor_int) = final_max_tess_factor(
        info.max_tess_factor,
        info.partitioning,
        args.max_potential_tess_factor,
    );
    let payload = build_payload_layout(module, &info, factor_int);
    let layout = args.input_layout.clone().unwrap_or_default();
    let indexed = layout.index_format.is_some();

    let max_vs_input = vertex.input_signature.max_register().max(1);
    let max_vs_output = vertex.output_signature.max_register().max(1);

    /* Signature */
    let mut signature = FunctionSignatureBuilder::new();
    signature.set_patch(PatchInfo {
        triangle: info.domain == TessDomain::Triangle,
        control_points: info.output_control_points,
    });
    let payload_idx = signature.define_input(FunctionInput::Payload { size: payload.size });
    let thread_id_idx = signature.define_input(FunctionInput::ThreadPositionInThreadgroup);
    let tg_id_idx = signature.define_input(FunctionInput::ThreadgroupPositionInGrid);
    signature.define_input(FunctionInput::MeshGridProperties);
    let draw_args_idx = signature.define_input(FunctionInput::Buffer {
        location: buffer_index::DRAW_ARGUMENTS,
        ty: MslType::Uint(4),
        address_space: airlift_air::air::address_space::CONSTANT,
        size: None,
        name: if indexed { "draw_indexed_arguments" } else { "draw_arguments" }.to_string(),
        raster_order_group: None,
    });
    let index_buffer_idx = if indexed {
        Some(signature.define_input(FunctionInput::Buffer {
            location: buffer_index::OBJECT_INDEX_BUFFER,
            ty: match layout.index_format {
                Some(crate::vertex_pulling::IndexFormat::U16) => MslType::Ushort,
                _ => MslType::Uint(1),
            },
            address_space: airlift_air::air::address_space::DEVICE,
            size: None,
            name: "index_buffer".to_string(),
            raster_order_group: None,
        }))
    } else {
        None
    };
    let vb_table_idx = if layout.attributes.is_empty() {
        None
    } else {
        Some(signature.define_input(FunctionInput::Buffer {
            location: buffer_index::VERTEX_BUFFER_TABLE,
            ty: MslType::Struct("vertex_buffer_entry".to_string(), {
                let i64t = module.types.i64();
                let i32t = module.types.i32();
                module
                    .types
                    .named_struct("vertex_buffer_entry", vec![i64t, i32t, i32t])
            }),
            address_space: airlift_air::air::address_space::CONSTANT,
            size: None,
            name: "vertex_buffers".to_string(),
            raster_order_group: None,
        }))
    };

    // Vertex-stage resources re-exposed at 21, hull resources at 23.
    let mut vs_ab = ArgumentBufferBuilder::new();
    bind_phase_resources(&mut vs_ab, vertex.main_phase(), vertex.rdef.as_ref());
    let vs_ab_built = (!vs_ab.is_empty()).then(|| vs_ab.build(module, "vertex_resources"));
    let vs_ab_idx = vs_ab_built.as_ref().map(|built| {
        signature.define_input(FunctionInput::IndirectBuffer {
            location: buffer_index::OBJECT_VERTEX_ARGUMENT_BUFFER,
            struct_type: built.struct_type,
            struct_type_info: built.struct_type_info,
            size: built.size,
            name: "vertex_resources".to_string(),
        })
    });
    let mut hs_ab = ArgumentBufferBuilder::new();
    for phase in &hull.phases {
        bind_phase_resources(&mut hs_ab, phase, hull.rdef.as_ref());
    }
    let hs_ab_built = (!hs_ab.is_empty()).then(|| hs_ab.build(module, "hull_resources"));
    let hs_ab_idx = hs_ab_built.as_ref().map(|built| {
        signature.define_input(FunctionInput::IndirectBuffer {
            location: buffer_index::OBJECT_HULL_ARGUMENT_BUFFER,
            struct_type: built.struct_type,
            struct_type_info: built.struct_type_info,
            size: built.size,
            name: "hull_resources".to_string(),
        })
    });

    let built = signature.create_function(name, module, StageKind::Object)?;

    /* Shared threadgroup storage */
    let int4 = {
        let i32t = module.types.i32();
        module.types.vec(i32t, 4)
    };
    let vs_out_per_point = module.types.array(int4, max_vs_output as u64);
    let vs_out_per_patch = module
        .types
        .array(vs_out_per_point, info.input_control_points as u64);
    let vs_out_per_group = module
        .types
        .array(vs_out_per_patch, payload.patches_per_group as u64);
    let (_, vertex_out) = module.add_global(GlobalVariable {
        name: "vertex_out_hull_in".to_string(),
        ty: vs_out_per_group,
        address_space: airlift_air::air::address_space::THREADGROUP,
        align: 4,
        initializer: None,
        constant: false,
        linkage: Linkage::Internal,
    });
    let pc_per_patch = module
        .types
        .array(int4, info.patch_constant_registers as u64);
    let pc_per_group = module
        .types
        .array(pc_per_patch, payload.patches_per_group as u64);
    let (_, patch_constant_out) = module.add_global(GlobalVariable {
        name: "hull_patch_constant_out".to_string(),
        ty: pc_per_group,
        address_space: airlift_air::air::address_space::THREADGROUP,
        align: 4,
        initializer: None,
        constant: false,
        linkage: Linkage::Internal,
    });
    let i32t = module.types.i32();
    let (_, workload_count) = module.add_global(GlobalVariable {
        name: "workload_count".to_string(),
        ty: i32t,
        address_space: airlift_air::air::address_space::THREADGROUP,
        align: 4,
        initializer: None,
        constant: false,
        linkage: Linkage::Internal,
    });

    let ir = IrBuilder::new(module, built.func);
    let mut air = AirBuilder::new(ir);
    air.ir.fast_math = args.fast_math;

    /* Common ids */
    let thread_pos = built.args[thread_id_idx];
    let control_point_id = air.ir.build_extract_element(thread_pos, 0);
    let patch_offset_in_group = air.ir.build_extract_element(thread_pos, 1);
    let tg_pos = built.args[tg_id_idx];
    let tg_x = air.ir.build_extract_element(tg_pos, 0);
    let batch = air.int(32 / payload.threads_per_patch);
    let batched_patch_start = air.ir.build_mul(tg_x, batch);
    let patch_id = air.ir.build_add(batched_patch_start, patch_offset_in_group);
    let instance_id = air.ir.build_extract_element(tg_pos, 1);

    let payload_ptr = built.args[payload_idx];
    let payload_typed = {
        let ptr_ty = air.ir.module.types.ptr(payload.struct_type, 6);
        air.ir.build_bitcast(payload_ptr, ptr_ty)
    };

    // Draw arguments: {count, instance_count, start, base_vertex/base_instance}.
    let draw_args = {
        let ptr = built.args[draw_args_idx];
        air.ir.build_load(ptr, 4)
    };
    let prim_count = air.ir.build_extract_element(draw_args, 0);
    let cp_count_const = air.int(info.input_control_points);
    let patch_count = air.ir.build_udiv(prim_count, cp_count_const);

    /* Vertex stage zone */
    {
        let phase = vertex.main_phase_mut();
        let temp_types = analyze_phase(phase);
        let cfg = build_cfg(phase)?;

        let mut res = ResourceMap::default();
        res.temp_types = temp_types;
        crate::pipeline::allocate_temp_arrays(&mut air, &mut res)?;
        crate::pipeline::allocate_indexable_temps(&mut air, &mut res, &vertex.main_phase().decls);
        // Inputs come from vertex pulling; outputs write the threadgroup
        // rows for this control point.
        let input_array = crate::pipeline::alloc_reg_file(&mut air, max_vs_input);
        res.input = Some(input_array);
        let out_row = {
            let zero = air.int(0);
            air.ir.build_gep(
                vs_out_per_group,
                vertex_out,
                &[zero, patch_offset_in_group, control_point_id],
            )
        };
        res.output = Some(RegArray { ptr: out_row, elem_vec4: int4, len: max_vs_output });
        if let (Some(vs_ab_idx), Some(vs_ab_built)) = (vs_ab_idx, vs_ab_built.as_ref()) {
            res.arg_buffer = Some(crate::lower::ArgBufferRef {
                ptr: built.args[vs_ab_idx],
                struct_type: vs_ab_built.struct_type,
            });
            crate::pipeline::populate_resource_slots(&mut res, vertex.main_phase(), vs_ab_built);
        }

        // control point index maps to a vertex fetch.
        let control_point_index = {
            let base = air.ir.build_mul(patch_id, cp_count_const);
            air.ir.build_add(base, control_point_id)
        };
        let vertex_id = match index_buffer_idx {
            Some(index_buffer_idx) => {
                let start_index = air.ir.build_extract_element(draw_args, 2);
                let fetch = air.ir.build_add(start_index, control_point_index);
                let buffer = built.args[index_buffer_idx];
                let elem_ty = air
                    .ir
                    .module
                    .types
                    .pointee(air.ir.module.value_type(buffer))
                    .map(|(ty, _)| ty)
                    .ok_or_else(|| {
                        TranslateError::Lowering("index buffer is not a pointer".to_string())
                    })?;
                let slot = air.ir.build_gep(elem_ty, buffer, &[fetch]);
                let loaded = air.ir.build_load(slot, 2);
                let i32t = air.ir.module.types.i32();
                air.ir.build_zext_or_trunc(loaded, i32t)
            }
            None => control_point_index,
        };
        let base_vertex = air.ir.build_extract_element(draw_args, if indexed { 3 } else { 2 });
        res.sv.vertex_id = Some(vertex_id);
        res.sv.base_vertex_id = Some(base_vertex);
        res.sv.vertex_id_with_base = Some(air.ir.build_add(vertex_id, base_vertex));
        res.sv.instance_id = Some(instance_id);
        let base_instance =
            air.ir.build_extract_element(draw_args, if indexed { 3 } else { 2 });
        res.sv.base_instance_id = Some(base_instance);

        let mut translator = Translator::new(air, ShaderStage::Vertex, res);
        // Inactive threads (beyond the control point count or patch count)
        // skip the vertex body.
        let active = translator.air.ir.create_block("active_vertex");
        let vertex_end = translator.air.ir.create_block("vertex_end");
        let in_patch = translator
            .air
            .ir
            .build_icmp(Pred::Ult, control_point_id, cp_count_const);
        let in_draw = translator.air.ir.build_icmp(Pred::Ult, patch_id, patch_count);
        let live = translator.air.ir.build_and(in_patch, in_draw);
        translator.air.ir.build_cond_br(live, active, vertex_end);
        translator.air.ir.position_at_end(active);

        if let Some(vb_table_idx) = vb_table_idx {
            let table = built.args[vb_table_idx];
            emit_vertex_pulling(&mut translator, table, &layout)?;
        }

        let epilogue = translator.air.ir.create_block("epilogue_vertex");
        lower_cfg(&mut translator, &cfg, epilogue)?;
        translator.air.ir.position_at_end(epilogue);
        translator.air.ir.build_br(vertex_end);
        translator.air.ir.position_at_end(vertex_end);
        translator.air.barrier(MemFlags::THREADGROUP);
        air = translator.air;
    }

    /* Hull stage zone */
    let thread_in_patch = {
        // Threads of patches past the draw count skip every phase.
        let in_draw = air.ir.build_icmp(Pred::Ult, patch_id, patch_count);
        let overflow = air.int(32);
        air.ir.build_select(in_draw, control_point_id, overflow)
    };
    {
        let mut res = ResourceMap::default();
        res.control_points_per_patch = info.input_control_points;
        res.output_control_point_stride = info.max_hull_output_register;
        let in_base = {
            let zero = air.int(0);
            let rows = air
                .ir
                .build_gep(vs_out_per_group, vertex_out, &[zero, patch_offset_in_group]);
            flatten_rows(&mut air, rows, int4, max_vs_output * info.input_control_points)
        };
        res.input_control_points = Some(RegArray {
            ptr: in_base,
            elem_vec4: int4,
            len: max_vs_output * info.input_control_points,
        });
        res.input = res.input_control_points;
        // Control-point outputs land directly in the payload.
        let cp_row = {
            let zero = air.int(0);
            let field = air.int(0);
            let rows = air.ir.build_gep(
                payload.struct_type,
                payload_typed,
                &[zero, field, patch_offset_in_group],
            );
            flatten_rows(
                &mut air,
                rows,
                int4,
                info.max_hull_output_register * info.output_control_points,
            )
        };
        res.output_control_points = Some(RegArray {
            ptr: cp_row,
            elem_vec4: int4,
            len: info.max_hull_output_register * info.output_control_points,
        });
        // Control-point phase writes land in this thread's own row.
        let cp_point_row = {
            let zero = air.int(0);
            let field = air.int(0);
            air.ir.build_gep(
                payload.struct_type,
                payload_typed,
                &[zero, field, patch_offset_in_group, thread_in_patch],
            )
        };
        let cp_point_out = RegArray {
            ptr: cp_point_row,
            elem_vec4: int4,
            len: info.max_hull_output_register,
        };
        res.output = Some(cp_point_out);
        let pc_row = {
            let zero = air.int(0);
            air.ir
                .build_gep(pc_per_group, patch_constant_out, &[zero, patch_offset_in_group])
        };
        res.patch_constant = Some(RegArray {
            ptr: pc_row,
            elem_vec4: int4,
            len: info.patch_constant_registers,
        });
        res.sv.patch_id = Some(patch_id);
        res.sv.control_point_id = Some(thread_in_patch);
        res.sv.fork_instance_id = Some(thread_in_patch);
        res.sv.join_instance_id = Some(thread_in_patch);
        if let (Some(hs_ab_idx), Some(hs_ab_built)) = (hs_ab_idx, hs_ab_built.as_ref()) {
            res.arg_buffer = Some(crate::lower::ArgBufferRef {
                ptr: built.args[hs_ab_idx],
                struct_type: hs_ab_built.struct_type,
            });
            for phase in &hull.phases {
                crate::pipeline::populate_resource_slots(&mut res, phase, hs_ab_built);
            }
        }

        let mut translator = Translator::new(air, ShaderStage::Hull, res);
        // Run phases in execution order: control point, fork, join.
        let mut ordered: Vec<usize> = Vec::new();
        for kind in [PhaseKind::HullControlPoint, PhaseKind::HullFork, PhaseKind::HullJoin] {
            for (index, phase) in hull.phases.iter().enumerate() {
                if phase.kind == kind {
                    ordered.push(index);
                }
            }
        }
        for index in ordered {
            let phase = &mut hull.phases[index];
            if phase.kind == PhaseKind::HullControlPoint && phase.instance_count <= 1 {
                phase.instance_count = info.output_control_points;
            }
            // Control-point outputs go to this thread's payload row;
            // fork/join outputs are patch constants.
            translator.res.output = if phase.kind == PhaseKind::HullControlPoint {
                Some(cp_point_out)
            } else {
                translator.res.patch_constant
            };
            let temp_types = analyze_phase(phase);
            let cfg = build_cfg(phase)?;
            translator.res.temp_types = temp_types;
            translator.res.temp_arrays.clear();
            crate::pipeline::allocate_temp_arrays(&mut translator.air, &mut translator.res)?;
            crate::pipeline::allocate_indexable_temps(
                &mut translator.air,
                &mut translator.res,
                &hull.phases[index].decls,
            );
            let after = translator.air.ir.create_block("phase_end");
            lower_cfg(&mut translator, &cfg, after)?;
            translator.air.ir.position_at_end(after);
            translator.air.barrier(MemFlags::THREADGROUP);
        }

        /* Epilogue: patch constants, factors, workloads, dispatch. */
        let write_pc = translator.air.ir.create_block("write_patch_constant");
        let dispatch = translator.air.ir.create_block("dispatch_mesh");
        let done = translator.air.ir.create_block("object_end");

        let zero = translator.air.int(0);
        let is_patch_leader =
            translator.air.ir.build_icmp(Pred::Eq, thread_in_patch, zero);
        translator.air.ir.build_cond_br(is_patch_leader, write_pc, done);

        translator.air.ir.position_at_end(write_pc);
        // Reset the workload counter once per group.
        let zero_v = translator.air.int(0);
        translator.air.atomic_rmw(AtomicOp::And, workload_count, zero_v)?;

        let max_factor_value = translator.air.float(final_factor);
        let factor_regs = tess_factor_registers(hull, info.domain);
        let mut factors: Vec<Value> = Vec::new();
        for scalar in 0..(info.patch_constant_registers * 4) {
            let reg = scalar / 4;
            let component = scalar % 4;
            let src = {
                let zero = translator.air.int(0);
                let reg_v = translator.air.int(reg);
                let comp_v = translator.air.int(component);
                let pc = translator.res.patch_constant.unwrap();
                let row_ty = {
                    let module = &mut translator.air.ir.module;
                    module.types.array(int4, pc.len as u64)
                };
                translator.air.ir.build_gep(row_ty, pc.ptr, &[zero, reg_v, comp_v])
            };
            let raw = translator.air.ir.build_load(src, 4);
            let dst = {
                let zero = translator.air.int(0);
                let field = translator.air.int(1);
                let scalar_v = translator.air.int(scalar);
                translator.air.ir.build_gep(
                    payload.struct_type,
                    payload_typed,
                    &[zero, field, patch_offset_in_group, scalar_v],
                )
            };
            if factor_regs.contains(&(reg, component)) {
                // Tess factors clamp against the final maximum on the way
                // into the payload.
                let as_float = translator.air.bitcast_to_float(raw);
                let clamped = translator
                    .air
                    .fp_binop(airlift_air::air::FpBinOp::FMin, as_float, max_factor_value);
                factors.push(clamped);
                let bits = translator.air.bitcast_to_int(clamped);
                translator.air.ir.build_store(bits, dst, 4);
            } else {
                translator.air.ir.build_store(raw, dst, 4);
            }
        }

        emit_patch_workload(
            &mut translator,
            &payload,
            payload_typed,
            workload_count,
            patch_id,
            &factors,
            info.partitioning,
        )?;

        let is_group_leader = {
            let zero = translator.air.int(0);
            translator
                .air
                .ir
                .build_icmp(Pred::Eq, patch_offset_in_group, zero)
        };
        translator.air.ir.build_cond_br(is_group_leader, dispatch, done);

        translator.air.ir.position_at_end(dispatch);
        let count = translator.air.ir.build_load(workload_count, 4);
        let grid = {
            let base = translator.air.int3(1, 1, 1);
            translator.air.ir.build_insert_element(base, count, 0)
        };
        translator.air.set_mesh_properties(grid)?;
        let start_slot = translator.air.ir.build_gep_u32(
            payload.struct_type,
            payload_typed,
            &[0, 2],
        );
        translator
            .air
            .ir
            .build_store(batched_patch_start, start_slot, 4);
        translator.air.ir.build_br(done);

        translator.air.ir.position_at_end(done);
        translator.air.barrier(MemFlags::THREADGROUP);
        translator.air.ir.build_ret(None);
    }

    Ok(())
}

/// `(register, component)` pairs of the tessellation factor system values
/// in the patch-constant signature, in factor order (outer then inner).
fn tess_factor_registers(hull: &Shader, domain: TessDomain) -> Vec<(u32, u32)> {
    // D3D system values: quad edge 11, quad inside 12, tri edge 13,
    // tri inside 14, line detail 15, line density 16.
    let wanted: &[u32] = match domain {
        TessDomain::Quad => &[11, 12],
        TessDomain::Triangle => &[13, 14],
        TessDomain::Isoline => &[15, 16],
    };
    let mut out = Vec::new();
    for entry in &hull.patch_constant_signature.entries {
        if wanted.contains(&entry.system_value_type) {
            let component = entry.mask.trailing_zeros().min(3);
            out.push((entry.register, component));
        }
    }
    out
}

/// Appends one workload record for the patch: packed clamped factors, the
/// integer level, and the patch index.
#[allow(clippy::too_many_arguments)]
fn emit_patch_workload(
    t: &mut Translator<'_>,
    payload: &PayloadLayout,
    payload_typed: Value,
    workload_count: Value,
    patch_id: Value,
    factors: &[Value],
    partitioning: TessPartitioning,
) -> Result<(), TranslateError> {
    let one = t.air.int(1);
    let slot = t.air.atomic_rmw(AtomicOp::Add, workload_count, one)?;
    let base = {
        let words = t.air.int(WORKLOAD_DWORDS);
        t.air.ir.build_mul(slot, words)
    };
    let words_field = t
        .air
        .ir
        .build_gep_u32(payload.struct_type, payload_typed, &[0, 3]);
    let word_array_ty = {
        let module = &mut t.air.ir.module;
        let i32t = module.types.i32();
        module.types.array(
            i32t,
            (payload.max_workloads * payload.patches_per_group * WORKLOAD_DWORDS) as u64,
        )
    };

    let store_word = |t: &mut Translator<'_>, offset: u32, value: Value| {
        let offset_v = t.air.int(offset);
        let index = t.air.ir.build_add(base, offset_v);
        let zero = t.air.int(0);
        let ptr = t
            .air
            .ir
            .build_gep(word_array_ty, words_field, &[zero, index]);
        t.air.ir.build_store(value, ptr, 4);
    };

    // Factor pairs pack as two halfs per word.
    let mut packed = [None::<Value>; 4];
    for pair in 0..4usize {
        let lo = factors.get(pair * 2).copied();
        let hi = factors.get(pair * 2 + 1).copied();
        if lo.is_none() && hi.is_none() {
            continue;
        }
        let zero_f = t.air.float(0.0);
        let lo = lo.unwrap_or(zero_f);
        let hi = hi.unwrap_or(zero_f);
        let half_ty = t.air.half_ty();
        let i16t = t.air.ir.module.types.i16();
        let i32t = t.air.int_ty();
        let lo_half = t.air.ir.build_cast(CastOp::FpTrunc, lo, half_ty);
        let hi_half = t.air.ir.build_cast(CastOp::FpTrunc, hi, half_ty);
        let lo_bits = t.air.ir.build_bitcast(lo_half, i16t);
        let hi_bits = t.air.ir.build_bitcast(hi_half, i16t);
        let lo_wide = t.air.ir.build_zext(lo_bits, i32t);
        let hi_wide = t.air.ir.build_zext(hi_bits, i32t);
        let sixteen = t.air.int(16);
        let hi_shifted = t.air.ir.build_binary(airlift_air::ir::BinOp::Shl, hi_wide, sixteen);
        packed[pair] = Some(t.air.ir.build_or(lo_wide, hi_shifted));
    }
    for (pair, value) in packed.into_iter().enumerate() {
        if let Some(value) = value {
            store_word(t, WORKLOAD_FACTOR_HALF2 + pair as u32, value);
        }
    }

    // Integer level of the first (outer-most) factor drives the mesh
    // threadgroup shape.
    let level = match factors.first() {
        Some(&factor) => integer_factor_value(t, factor, partitioning),
        None => t.air.int(1),
    };
    store_word(t, WORKLOAD_INTEGER_FACTOR, level);
    store_word(t, WORKLOAD_PATCH_INDEX, patch_id);
    Ok(())
}

/// IR-side integerization of a clamped float factor, per partitioning.
fn integer_factor_value(
    t: &mut Translator<'_>,
    factor: Value,
    partitioning: TessPartitioning,
) -> Value {
    use airlift_air::air::FpBinOp;
    let (lo, hi) = match partitioning {
        TessPartitioning::Integer | TessPartitioning::Pow2 => (1.0f32, 64.0f32),
        TessPartitioning::FractionalOdd => (1.0, 63.0),
        TessPartitioning::FractionalEven => (2.0, 64.0),
    };
    let lo_v = t.air.float(lo);
    let hi_v = t.air.float(hi);
    let clamped = {
        let floored = t.air.fp_binop(FpBinOp::FMax, factor, lo_v);
        t.air.fp_binop(FpBinOp::FMin, floored, hi_v)
    };
    let ceiled = t.air.fp_unop(airlift_air::air::FpUnOp::Ceil, clamped);
    let i32t = t.air.int_ty();
    let level = t.air.ir.build_cast(CastOp::FpToUi, ceiled, i32t);
    let one = t.air.int(1);
    match partitioning {
        TessPartitioning::Integer => level,
        TessPartitioning::Pow2 => {
            // Round up to the next power of two: 1 << (32 - clz(n - 1)).
            let minus_one = t.air.ir.build_sub(level, one);
            let clz = t.air.count_zero(minus_one, false);
            let thirty_two = t.air.int(32);
            let shift = t.air.ir.build_sub(thirty_two, clz);
            let pow2 = t.air.ir.build_binary(airlift_air::ir::BinOp::Shl, one, shift);
            let is_one = {
                let one_c = t.air.int(1);
                t.air.ir.build_icmp(Pred::Ule, level, one_c)
            };
            let one_c = t.air.int(1);
            t.air.ir.build_select(is_one, one_c, pow2)
        }
        TessPartitioning::FractionalOdd => {
            // Round up to odd.
            let bit = t.air.ir.build_and(level, one);
            let is_odd = {
                let zero = t.air.int(0);
                t.air.ir.build_icmp(Pred::Ne, bit, zero)
            };
            let plus_one = t.air.ir.build_add(level, one);
            t.air.ir.build_select(is_odd, level, plus_one)
        }
        TessPartitioning::FractionalEven => {
            // Round up to even.
            let bit = t.air.ir.build_and(level, one);
            let is_odd = {
                let zero = t.air.int(0);
                t.air.ir.build_icmp(Pred::Ne, bit, zero)
            };
            let plus_one = t.air.ir.build_add(level, one);
            t.air.ir.build_select(is_odd, plus_one, level)
        }
    }
}

/// Converts the domain stage into the mesh function, paired with the hull
/// stage's reflection.
pub fn convert_domain(
    module: &mut Module,
    domain_shader: &mut Shader,
    hull: &HullStageInfo,
    name: &str,
    args: &ConversionArgs,
) -> Result<(), TranslateError> {
    if hull.domain == TessDomain::Isoline {
        return Err(TranslateError::Unsupported(
            "isoline tessellation".to_string(),
        ));
    }
    let (_final_factor, factor_int) = final_max_tess_factor(
        hull.max_tess_factor,
        hull.partitioning,
        args.max_potential_tess_factor,
    );
    let payload = build_payload_layout(module, hull, factor_int);
    let reserved = reserved_vertex_count(factor_int);

    let max_ds_output = domain_shader.output_signature.max_register().max(1);

    let mut signature = FunctionSignatureBuilder::new();
    signature.set_void_return();
    signature.set_patch(PatchInfo {
        triangle: hull.domain == TessDomain::Triangle,
        control_points: hull.output_control_points,
    });
    signature.use_max_mesh_workgroup_size(reserved.min(256));
    let payload_idx =
        signature.define_input(FunctionInput::MeshPayload { size: payload.size });
    let thread_id_idx = signature.define_input(FunctionInput::ThreadPositionInThreadgroup);
    let tg_id_idx = signature.define_input(FunctionInput::ThreadgroupPositionInGrid);
    signature.define_input(FunctionInput::Mesh);

    let mut ab = ArgumentBufferBuilder::new();
    bind_phase_resources(&mut ab, domain_shader.main_phase(), domain_shader.rdef.as_ref());
    let ab_built = (!ab.is_empty()).then(|| ab.build(module, "domain_resources"));
    let ab_idx = ab_built.as_ref().map(|built| {
        signature.define_input(FunctionInput::IndirectBuffer {
            location: buffer_index::ARGUMENT_BUFFER,
            struct_type: built.struct_type,
            struct_type_info: built.struct_type_info,
            size: built.size,
            name: "domain_resources".to_string(),
        })
    });

    // Mesh vertex outputs mirror the domain shader's output signature.
    let mut vertex_data_fields: Vec<(u32, u32)> = Vec::new();
    for entry in &domain_shader.output_signature.entries {
        if system_value(entry) == Some(crate::pipeline::KnownSystemValue::Position) {
            signature.define_output(FunctionOutput::Position);
        } else {
            signature.define_output(FunctionOutput::VertexOutput {
                user: signature_semantic_user(entry),
                ty: MslType::Float(4),
            });
            vertex_data_fields.push((entry.register, vertex_data_fields.len() as u32));
        }
    }

    let built = signature.create_function(name, module, StageKind::Mesh)?;

    let ir = IrBuilder::new(module, built.func);
    let mut air = AirBuilder::new(ir);
    air.ir.fast_math = args.fast_math;

    let thread_pos = built.args[thread_id_idx];
    let thread_index = air.ir.build_extract_element(thread_pos, 0);
    let tg_pos = built.args[tg_id_idx];
    let workload_index = air.ir.build_extract_element(tg_pos, 0);

    let payload_ptr = built.args[payload_idx];
    let payload_typed = {
        let ptr_ty = air.ir.module.types.ptr(payload.struct_type, 6);
        air.ir.build_bitcast(payload_ptr, ptr_ty)
    };

    /* Read the workload record. */
    let word_array_ty = {
        let module = &mut air.ir.module;
        let i32t = module.types.i32();
        module.types.array(
            i32t,
            (payload.max_workloads * payload.patches_per_group * WORKLOAD_DWORDS) as u64,
        )
    };
    let words_field = air.ir.build_gep_u32(payload.struct_type, payload_typed, &[0, 3]);
    let record_base = {
        let words = air.int(WORKLOAD_DWORDS);
        air.ir.build_mul(workload_index, words)
    };
    let load_word = |air: &mut AirBuilder<'_>, offset: u32| {
        let offset_v = air.int(offset);
        let index = air.ir.build_add(record_base, offset_v);
        let zero = air.int(0);
        let ptr = air.ir.build_gep(word_array_ty, words_field, &[zero, index]);
        air.ir.build_load(ptr, 4)
    };
    let level = load_word(&mut air, WORKLOAD_INTEGER_FACTOR);
    let patch_index = load_word(&mut air, WORKLOAD_PATCH_INDEX);
    let batched_start = {
        let slot = air.ir.build_gep_u32(payload.struct_type, payload_typed, &[0, 2]);
        air.ir.build_load(slot, 4)
    };
    let patch_in_group = air.ir.build_sub(patch_index, batched_start);

    /* Domain location for this thread. */
    // Threads enumerate an (n+1) x (n+1) grid of domain points; the
    // triangle domain folds the upper half away.
    let edge_points = {
        let one = air.int(1);
        air.ir.build_add(level, one)
    };
    let i = air.ir.build_binary(airlift_air::ir::BinOp::URem, thread_index, edge_points);
    let j = air.ir.build_udiv(thread_index, edge_points);
    let level_f = air.convert_to_float(level, airlift_air::air::Signedness::Unsigned);
    let i_f = air.convert_to_float(i, airlift_air::air::Signedness::Unsigned);
    let j_f = air.convert_to_float(j, airlift_air::air::Signedness::Unsigned);
    let u = air.ir.build_fdiv(i_f, level_f);
    let v = air.ir.build_fdiv(j_f, level_f);
    let domain_point = {
        let float4 = air.float_vec_ty(4);
        let undef = air.ir.module.undef(float4);
        let with_u = air.ir.build_insert_element(undef, u, 0);
        let with_uv = air.ir.build_insert_element(with_u, v, 1);
        let w = match hull.domain {
            TessDomain::Triangle => {
                let one = air.float(1.0);
                let sum = air.ir.build_fadd(u, v);
                air.ir.build_fsub(one, sum)
            }
            _ => air.float(0.0),
        };
        let with_uvw = air.ir.build_insert_element(with_uv, w, 2);
        let zero = air.float(0.0);
        air.ir.build_insert_element(with_uvw, zero, 3)
    };

    /* Wire the domain shader. */
    let phase = domain_shader.main_phase_mut();
    let temp_types = analyze_phase(phase);
    let cfg = build_cfg(phase)?;

    let int4 = {
        let i32t = air.ir.module.types.i32();
        air.ir.module.types.vec(i32t, 4)
    };
    let mut res = ResourceMap::default();
    res.temp_types = temp_types;
    res.control_points_per_patch = hull.output_control_points;
    res.sv.domain_point = Some(domain_point);
    res.sv.patch_id = Some(patch_index);
    // Control points and patch constants read straight from the payload.
    let cp_row = {
        let zero = air.int(0);
        let field = air.int(0);
        let rows = air.ir.build_gep(
            payload.struct_type,
            payload_typed,
            &[zero, field, patch_in_group],
        );
        flatten_rows(
            &mut air,
            rows,
            int4,
            hull.max_hull_output_register * hull.output_control_points,
        )
    };
    res.input_control_points = Some(RegArray {
        ptr: cp_row,
        elem_vec4: int4,
        len: hull.max_hull_output_register * hull.output_control_points,
    });
    let pc_row = {
        let zero = air.int(0);
        let field = air.int(1);
        air.ir.build_gep(
            payload.struct_type,
            payload_typed,
            &[zero, field, patch_in_group],
        )
    };
    // Patch constants are scalar-packed; view them as int4 rows.
    let pc_vec4_ptr = {
        let ptr_ty = air.ir.module.types.ptr(int4, 6);
        air.ir.build_bitcast(pc_row, ptr_ty)
    };
    res.patch_constant = Some(RegArray {
        ptr: pc_vec4_ptr,
        elem_vec4: int4,
        len: hull.patch_constant_registers,
    });
    let output = crate::pipeline::alloc_reg_file(&mut air, max_ds_output);
    res.output = Some(output);
    if let (Some(ab_idx), Some(ab_built)) = (ab_idx, ab_built.as_ref()) {
        res.arg_buffer = Some(crate::lower::ArgBufferRef {
            ptr: built.args[ab_idx],
            struct_type: ab_built.struct_type,
        });
        crate::pipeline::populate_resource_slots(&mut res, domain_shader.main_phase(), ab_built);
    }

    let mut translator = Translator::new(air, ShaderStage::Domain, res);
    crate::pipeline::allocate_temp_arrays(&mut translator.air, &mut translator.res)?;
    crate::pipeline::allocate_indexable_temps(
        &mut translator.air,
        &mut translator.res,
        &domain_shader.main_phase().decls,
    );

    // Threads beyond the grid emit nothing.
    let vertex_count = air_mul(&mut translator, edge_points, edge_points);
    let active = translator.air.ir.create_block("active_domain");
    let inactive_end = translator.air.ir.create_block("mesh_end");
    let live = translator
        .air
        .ir
        .build_icmp(Pred::Ult, thread_index, vertex_count);
    translator.air.ir.build_cond_br(live, active, inactive_end);
    translator.air.ir.position_at_end(active);

    let epilogue = translator.air.ir.create_block("epilogue_domain");
    lower_cfg(&mut translator, &cfg, epilogue)?;
    translator.air.ir.position_at_end(epilogue);

    /* Mesh output write-back. */
    let out_array = translator.res.output.unwrap();
    for entry in &domain_shader.output_signature.entries {
        let reg = translator.air.int(entry.register);
        let raw = translator.load_reg_vec4(out_array, reg);
        if system_value(entry) == Some(crate::pipeline::KnownSystemValue::Position) {
            let position = translator.air.bitcast_to_float(raw);
            translator.air.set_mesh_position(thread_index, position)?;
        } else {
            let field = vertex_data_fields
                .iter()
                .find(|(register, _)| *register == entry.register)
                .map(|(_, field)| *field)
                .unwrap_or(0);
            let field_v = translator.air.int(field);
            let value = translator.air.bitcast_to_float(raw);
            translator
                .air
                .set_mesh_vertex_data(thread_index, field_v, value)?;
        }
    }

    /* Primitive generation: two triangles per interior grid cell. */
    let in_interior = {
        let i_ok = translator.air.ir.build_icmp(Pred::Ult, i, level);
        let j_ok = translator.air.ir.build_icmp(Pred::Ult, j, level);
        translator.air.ir.build_and(i_ok, j_ok)
    };
    let emit_prims = translator.air.ir.create_block("emit_primitives");
    let after_prims = translator.air.ir.create_block("after_primitives");
    translator
        .air
        .ir
        .build_cond_br(in_interior, emit_prims, after_prims);
    translator.air.ir.position_at_end(emit_prims);
    {
        let cell = {
            let row = air_mul(&mut translator, j, level);
            translator.air.ir.build_add(row, i)
        };
        let six = translator.air.int(6);
        let index_base = translator.air.ir.build_mul(cell, six);
        let corner00 = thread_index;
        let corner10 = {
            let one = translator.air.int(1);
            translator.air.ir.build_add(thread_index, one)
        };
        let corner01 = translator.air.ir.build_add(thread_index, edge_points);
        let corner11 = {
            let one = translator.air.int(1);
            translator.air.ir.build_add(corner01, one)
        };
        let ccw = hull.output_primitive == TessOutputPrimitive::TriangleCcw;
        let tri = if ccw {
            [corner00, corner01, corner10, corner10, corner01, corner11]
        } else {
            [corner00, corner10, corner01, corner01, corner10, corner11]
        };
        for (offset, vertex) in tri.into_iter().enumerate() {
            let offset_v = translator.air.int(offset as u32);
            let index = translator.air.ir.build_add(index_base, offset_v);
            translator.air.set_mesh_index(index, vertex)?;
        }
    }
    translator.air.ir.build_br(after_prims);
    translator.air.ir.position_at_end(after_prims);

    // The first thread publishes the primitive count.
    let is_leader = {
        let zero = translator.air.int(0);
        translator.air.ir.build_icmp(Pred::Eq, thread_index, zero)
    };
    let set_count = translator.air.ir.create_block("set_primitive_count");
    translator
        .air
        .ir
        .build_cond_br(is_leader, set_count, inactive_end);
    translator.air.ir.position_at_end(set_count);
    let prim_count = {
        let cells = air_mul(&mut translator, level, level);
        let two = translator.air.int(2);
        translator.air.ir.build_mul(cells, two)
    };
    translator.air.set_mesh_primitive_count(prim_count)?;
    translator.air.ir.build_br(inactive_end);

    translator.air.ir.position_at_end(inactive_end);
    translator.air.ir.build_ret(None);

    Ok(())
}

fn air_mul(t: &mut Translator<'_>, a: Value, b: Value) -> Value {
    t.air.ir.build_mul(a, b)
}

/// Reinterprets a pointer to nested vec4 rows as a flat `[len x int4]`
/// array pointer in the same address space.
fn flatten_rows(air: &mut AirBuilder<'_>, rows: Value, int4: TypeId, len: u32) -> Value {
    let space = air
        .ir
        .module
        .types
        .pointee(air.ir.module.value_type(rows))
        .map(|(_, space)| space)
        .unwrap_or(0);
    let flat_ty = {
        let module = &mut air.ir.module;
        let array = module.types.array(int4, len as u64);
        module.types.ptr(array, space)
    };
    air.ir.build_bitcast(rows, flat_ty)
}
