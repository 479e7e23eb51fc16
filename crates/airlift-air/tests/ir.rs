use airlift_air::bitcode;
use airlift_air::ir::{
    optimize, verify, AttributeList, BinOp, DataLayout, IrBuilder, Module, OptLevel, Pred,
};

fn fresh_module() -> Module {
    let mut module = Module::new("m");
    module.data_layout = DataLayout::air();
    module
}

#[test]
fn builder_folds_constant_integer_arithmetic() {
    let mut module = fresh_module();
    let i32t = module.types.i32();
    let fn_ty = module.types.func(i32t, vec![]);
    let func = module.get_or_insert_function("f", fn_ty, AttributeList::default());
    let mut ir = IrBuilder::new(&mut module, func);
    let a = ir.module.const_u32(6);
    let b = ir.module.const_u32(7);
    let sum = ir.build_add(a, b);
    assert_eq!(ir.module.const_int_value(sum), Some(13));
    ir.build_ret(Some(sum));
    verify(&module).expect("module should verify");
}

#[test]
fn verifier_rejects_unterminated_blocks() {
    let mut module = fresh_module();
    let void = module.types.void();
    let fn_ty = module.types.func(void, vec![]);
    let func = module.get_or_insert_function("f", fn_ty, AttributeList::default());
    {
        let mut ir = IrBuilder::new(&mut module, func);
        let a = ir.module.const_u32(1);
        let _ = ir.build_freeze(a);
        // No terminator.
    }
    let err = verify(&module).unwrap_err();
    assert!(err.to_string().contains("no terminator"));
}

#[test]
fn verifier_rejects_mismatched_store() {
    let mut module = fresh_module();
    let void = module.types.void();
    let fn_ty = module.types.func(void, vec![]);
    let func = module.get_or_insert_function("f", fn_ty, AttributeList::default());
    {
        let mut ir = IrBuilder::new(&mut module, func);
        let i32t = ir.module.types.i32();
        let slot = ir.build_alloca(i32t, 4);
        let bad = ir.module.const_f32(1.0);
        ir.build_store(bad, slot, 4);
        ir.build_ret(None);
    }
    let err = verify(&module).unwrap_err();
    assert!(err.to_string().contains("store"));
}

#[test]
fn dead_code_is_swept_but_side_effects_stay() {
    let mut module = fresh_module();
    let void = module.types.void();
    let fn_ty = module.types.func(void, vec![]);
    let func = module.get_or_insert_function("f", fn_ty, AttributeList::default());
    {
        let mut ir = IrBuilder::new(&mut module, func);
        let i32t = ir.module.types.i32();
        let slot = ir.build_alloca(i32t, 4);
        let one = ir.module.const_u32(1);
        ir.build_store(one, slot, 4);
        // Dead: loaded but never used.
        let loaded = ir.build_load(slot, 4);
        let _dead = ir.build_binary(BinOp::Add, loaded, one);
        ir.build_ret(None);
    }
    optimize(&mut module, OptLevel::Default);
    verify(&module).expect("optimized module should verify");

    let body = module.func(module.get_function("f").unwrap());
    // Alloca + store survive; the unused load and add are gone.
    assert_eq!(body.blocks[0].insts.len(), 2);
}

#[test]
fn unreachable_blocks_are_emptied() {
    let mut module = fresh_module();
    let void = module.types.void();
    let fn_ty = module.types.func(void, vec![]);
    let func = module.get_or_insert_function("f", fn_ty, AttributeList::default());
    {
        let mut ir = IrBuilder::new(&mut module, func);
        let dead = ir.create_block("dead");
        let exit = ir.create_block("exit");
        ir.build_br(exit);
        ir.position_at_end(dead);
        let a = ir.module.const_u32(0);
        let b = ir.module.const_u32(1);
        let cmp = ir.build_icmp(Pred::Ult, a, b);
        let _ = ir.build_freeze(cmp);
        ir.build_br(exit);
        ir.position_at_end(exit);
        ir.build_ret(None);
    }
    optimize(&mut module, OptLevel::Default);
    let body = module.func(module.get_function("f").unwrap());
    assert!(body.blocks[1].insts.is_empty());
}

#[test]
fn bitcode_output_is_deterministic_and_magic_tagged() {
    let build = || {
        let mut module = fresh_module();
        module.target_triple = "air64-apple-macosx14.0.0".to_string();
        let i32t = module.types.i32();
        let fn_ty = module.types.func(i32t, vec![i32t]);
        let func = module.get_or_insert_function("f", fn_ty, AttributeList::default());
        {
            let mut ir = IrBuilder::new(&mut module, func);
            let arg = ir.module.func(func).args[0];
            let two = ir.module.const_u32(2);
            let doubled = ir.build_mul(arg, two);
            ir.build_ret(Some(doubled));
        }
        bitcode::write_module(&module)
    };
    let a = build();
    let b = build();
    assert_eq!(a, b);
    assert_eq!(&a[0..2], b"BC");
    assert_eq!(a[2], 0xC0);
    assert_eq!(a[3], 0xDE);
    assert_eq!(a.len() % 4, 0);
}
