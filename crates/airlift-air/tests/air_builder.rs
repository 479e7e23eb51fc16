use airlift_air::air::{
    address_space, AirBuilder, MemFlags, SampleControl, SampleType, Signedness, TexAccess,
    Texture, TextureKind,
};
use airlift_air::ir::{AtomicOp, Attr, AttributeList, IrBuilder, Module, FUNCTION_ATTR};

fn test_module() -> Module {
    let mut module = Module::new("shader.air");
    module.target_triple = "air64-apple-macosx14.0.0".to_string();
    module.data_layout = airlift_air::ir::DataLayout::air();
    module
}

/// Creates a void() test function and returns a builder positioned in its
/// entry block.
fn builder_in<'m>(module: &'m mut Module, name: &str) -> AirBuilder<'m> {
    let void = module.types.void();
    let fn_ty = module.types.func(void, vec![]);
    let func = module.get_or_insert_function(name, fn_ty, AttributeList::default());
    AirBuilder::new(IrBuilder::new(module, func))
}

fn tex2d_float() -> Texture {
    Texture {
        kind: TextureKind::Texture2d,
        sample_type: SampleType::Float,
        memory_access: TexAccess::Sample,
    }
}

#[test]
fn type_overload_suffixes() {
    let mut module = test_module();
    let mut air = builder_in(&mut module, "overloads");

    let f32t = air.float_ty();
    let f32x4 = air.float_vec_ty(4);
    let i32t = air.int_ty();
    let f16x2 = air.half_vec_ty(2);

    assert_eq!(air.type_overload_suffix(f32t, Signedness::DontCare), ".f32");
    assert_eq!(air.type_overload_suffix(f32x4, Signedness::Signed), ".f.v4f32");
    assert_eq!(air.type_overload_suffix(i32t, Signedness::Signed), ".s.i32");
    assert_eq!(air.type_overload_suffix(i32t, Signedness::Unsigned), ".u.i32");
    assert_eq!(air.type_overload_suffix(i32t, Signedness::DontCare), ".i32");
    assert_eq!(air.type_overload_suffix(f16x2, Signedness::DontCare), ".v2f16");

    let dev_ptr = air.ir.module.types.ptr(i32t, address_space::DEVICE);
    assert_eq!(air.type_overload_suffix(dev_ptr, Signedness::Unsigned), ".u.p1i32");
    let i32x4 = air.int_vec_ty(4);
    let tg_ptr = air.ir.module.types.ptr(i32x4, address_space::THREADGROUP);
    assert_eq!(air.type_overload_suffix(tg_ptr, Signedness::DontCare), ".p3v4i32");
}

#[test]
fn texture_info_table_is_consistent() {
    for kind in TextureKind::ALL {
        let info = kind.info();
        assert!(info.coord_dim >= 1 && info.coord_dim <= 3, "{kind:?}");
        if info.is_cube {
            assert_eq!(info.coord_dim, 3, "{kind:?}");
        }
        if info.is_ms {
            assert!(!info.is_mipmapped, "{kind:?}");
        }
        assert!(!info.air_suffix.is_empty());
    }
    assert_eq!(TextureKind::TextureBuffer.info().air_suffix, "texture_buffer_1d");
    assert!(TextureKind::DepthCubeArray.info().is_depth);
    assert!(TextureKind::DepthCubeArray.info().is_array);
    assert!(TextureKind::DepthCubeArray.info().is_cube);
    assert!(!TextureKind::TextureBuffer.info().is_mipmapped);
}

#[test]
fn sample_emits_mangled_symbol_with_sampler_in_constant_space() {
    let mut module = test_module();
    {
        let mut air = builder_in(&mut module, "main0");
        let tex = tex2d_float();
        let handle_ty = air.texture_handle_type(&tex);
        let handle = air.ir.module.undef(handle_ty);
        let sampler_ty = air.sampler_handle_type();
        let sampler = air.ir.module.undef(sampler_ty);
        let coord = air.ir.module.const_f32_vec(&[0.5, 0.5]);
        let (texel, _resident) = air
            .sample(&tex, handle, sampler, coord, None, [0; 3], SampleControl::Default)
            .expect("sample should build");
        let texel_ty = air.ir.module.value_type(texel);
        assert_eq!(air.ir.module.types.vector_len(texel_ty), Some(4));
        air.ir.build_ret(None);
    }

    let func = module
        .get_function("air.sample_texture_2d.f.v4f32")
        .expect("sample intrinsic should be declared");
    // The sampler argument must live in the constant address space.
    let sampler_arg = module.func(func).args[1];
    let (_, space) = module.types.pointee(module.value_type(sampler_arg)).unwrap();
    assert_eq!(space, address_space::CONSTANT);
    // sample is convergent.
    assert!(module
        .func(func)
        .attributes
        .0
        .contains(&(FUNCTION_ATTR, Attr::Convergent)));
}

#[test]
fn depth_texture_write_is_invalid_operation() {
    let mut module = test_module();
    let mut air = builder_in(&mut module, "main0");
    let tex = Texture {
        kind: TextureKind::Depth2d,
        sample_type: SampleType::Float,
        memory_access: TexAccess::Write,
    };
    let handle_ty = air.texture_handle_type(&tex);
    let handle = air.ir.module.undef(handle_ty);
    let pos = air.int2(0, 0);
    let texel = air.ir.module.const_f32(0.0);
    let err = air.write(&tex, handle, pos, None, None, None, texel).unwrap_err();
    assert!(err.to_string().contains("depth"));
}

#[test]
fn texture_atomic_rejects_float_texture() {
    let mut module = test_module();
    let mut air = builder_in(&mut module, "main0");
    let tex = Texture {
        kind: TextureKind::Texture2d,
        sample_type: SampleType::Float,
        memory_access: TexAccess::ReadWrite,
    };
    let handle_ty = air.texture_handle_type(&tex);
    let handle = air.ir.module.undef(handle_ty);
    let pos = air.int2(0, 0);
    let texel = air.ir.module.const_f32_vec(&[0.0; 4]);
    let err = air
        .texture_atomic_rmw(&tex, handle, AtomicOp::Add, pos, None, texel)
        .unwrap_err();
    assert!(err.to_string().contains("non-integer"));
}

#[test]
fn atomic_rmw_requires_device_or_threadgroup_pointer() {
    let mut module = test_module();
    let mut air = builder_in(&mut module, "main0");

    let i32t = air.int_ty();
    let value = air.int(1);

    let device_ptr_ty = air.ir.module.types.ptr(i32t, address_space::DEVICE);
    let device_ptr = air.ir.module.undef(device_ptr_ty);
    air.atomic_rmw(AtomicOp::Add, device_ptr, value).expect("device atomic");
    assert!(air.ir.module.get_function("air.atomic.global.add.u.i32").is_some());

    let local_ptr_ty = air.ir.module.types.ptr(i32t, address_space::THREADGROUP);
    let local_ptr = air.ir.module.undef(local_ptr_ty);
    air.atomic_rmw(AtomicOp::Max, local_ptr, value).expect("local atomic");
    assert!(air.ir.module.get_function("air.atomic.local.max.s.i32").is_some());

    let constant_ptr_ty = air.ir.module.types.ptr(i32t, address_space::CONSTANT);
    let constant_ptr = air.ir.module.undef(constant_ptr_ty);
    let err = air.atomic_rmw(AtomicOp::Add, constant_ptr, value).unwrap_err();
    assert!(err.to_string().contains("address space"));
}

#[test]
fn barrier_is_convergent_and_fence_is_not() {
    let mut module = test_module();
    {
        let mut air = builder_in(&mut module, "main0");
        air.barrier(MemFlags::THREADGROUP);
        air.atomic_fence(
            MemFlags::DEVICE | MemFlags::TEXTURE,
            airlift_air::air::ThreadScope::Device,
            false,
        );
        air.ir.build_ret(None);
    }
    let barrier = module.get_function("air.wg.barrier").unwrap();
    assert!(module
        .func(barrier)
        .attributes
        .0
        .contains(&(FUNCTION_ATTR, Attr::Convergent)));
    let fence = module.get_function("air.atomic.fence").unwrap();
    assert!(!module
        .func(fence)
        .attributes
        .0
        .contains(&(FUNCTION_ATTR, Attr::Convergent)));
}

#[test]
fn mesh_position_goes_through_sanitation() {
    let mut module = test_module();
    // A mesh-stage function carries the mesh handle as an argument; the
    // builder locates it by type.
    let mesh_opaque = module.types.opaque_struct("struct._mesh_t");
    let mesh_ty = module.types.ptr(mesh_opaque, address_space::MESH);
    let void = module.types.void();
    let fn_ty = module.types.func(void, vec![mesh_ty]);
    let func = module.get_or_insert_function("mesh_main", fn_ty, AttributeList::default());
    {
        let mut air = AirBuilder::new(IrBuilder::new(&mut module, func));
        let vertex = air.int(0);
        let position = air.ir.module.const_f32_vec(&[0.0, 0.0, 0.0, 1.0]);
        air.set_mesh_position(vertex, position).expect("set_mesh_position");
        air.ir.build_ret(None);
    }
    assert!(module.get_function("air.set_position_mesh").is_some());

    // Sanitation selects between the original position and the clipped
    // replacement before the call.
    let body = module.func(func);
    let has_select = body
        .insts
        .iter()
        .any(|data| matches!(data.inst, airlift_air::ir::Inst::Select { .. }));
    assert!(has_select, "expected a non-finite-lane select before set_position_mesh");
}

#[test]
fn mesh_position_without_mesh_handle_is_rejected() {
    let mut module = test_module();
    let mut air = builder_in(&mut module, "not_a_mesh");
    let vertex = air.int(0);
    let position = air.ir.module.const_f32_vec(&[0.0; 4]);
    let err = air.set_mesh_position(vertex, position).unwrap_err();
    assert!(err.to_string().contains("mesh handle"));
}
