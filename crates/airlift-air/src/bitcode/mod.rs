//! LLVM-14 bitcode serialization of an [`crate::ir::Module`].
//!
//! Two halves: [`BitstreamWriter`], the raw bitstream primitive layer
//! (fixed/VBR fields, 32-bit-aligned nested blocks), and [`write_module`],
//! which walks the module and emits the block/record structure: module
//! header records, type table, parameter attributes, globals and function
//! declarations, module-level constants, metadata, per-function bodies, and
//! the value symbol table. Records are emitted unabbreviated (`UNABBREV_
//! RECORD`), which every bitstream reader accepts; no abbreviation
//! definitions are used.
//!
//! The output is fully deterministic: all iteration is in arena order.

mod writer;

pub use writer::BitstreamWriter;

use std::collections::HashMap;

use crate::ir::{
    AtomicOp, Attr, BinOp, CastOp, FuncId, Inst, MetadataNode, Module, Pred, Terminator, TypeId,
    TypeKind, Value, FUNCTION_ATTR,
};

/* Block ids (LLVMBitCodes.h). */
const MODULE_BLOCK_ID: u64 = 8;
const PARAMATTR_BLOCK_ID: u64 = 9;
const PARAMATTR_GROUP_BLOCK_ID: u64 = 10;
const CONSTANTS_BLOCK_ID: u64 = 11;
const FUNCTION_BLOCK_ID: u64 = 12;
const IDENTIFICATION_BLOCK_ID: u64 = 13;
const VALUE_SYMTAB_BLOCK_ID: u64 = 14;
const METADATA_BLOCK_ID: u64 = 15;
const TYPE_BLOCK_ID_NEW: u64 = 17;

/* Module record codes. */
const MODULE_CODE_VERSION: u64 = 1;
const MODULE_CODE_TRIPLE: u64 = 2;
const MODULE_CODE_DATALAYOUT: u64 = 3;
const MODULE_CODE_GLOBALVAR: u64 = 7;
const MODULE_CODE_FUNCTION: u64 = 8;

const IDENTIFICATION_CODE_STRING: u64 = 1;
const IDENTIFICATION_CODE_EPOCH: u64 = 2;

/* Type record codes. */
const TYPE_CODE_NUMENTRY: u64 = 1;
const TYPE_CODE_VOID: u64 = 2;
const TYPE_CODE_FLOAT: u64 = 3;
const TYPE_CODE_HALF: u64 = 10;
const TYPE_CODE_INTEGER: u64 = 7;
const TYPE_CODE_POINTER: u64 = 8;
const TYPE_CODE_ARRAY: u64 = 11;
const TYPE_CODE_VECTOR: u64 = 12;
const TYPE_CODE_OPAQUE: u64 = 6;
const TYPE_CODE_STRUCT_ANON: u64 = 18;
const TYPE_CODE_STRUCT_NAME: u64 = 19;
const TYPE_CODE_STRUCT_NAMED: u64 = 20;
const TYPE_CODE_FUNCTION: u64 = 21;

/* Constant record codes. */
const CST_CODE_SETTYPE: u64 = 1;
const CST_CODE_NULL: u64 = 2;
const CST_CODE_UNDEF: u64 = 3;
const CST_CODE_INTEGER: u64 = 4;
const CST_CODE_FLOAT: u64 = 6;
const CST_CODE_AGGREGATE: u64 = 7;

/* Metadata record codes. */
const METADATA_STRING_OLD: u64 = 1;
const METADATA_VALUE: u64 = 2;
const METADATA_NODE: u64 = 3;
const METADATA_NAME: u64 = 4;
const METADATA_NAMED_NODE: u64 = 10;

/* Function body record codes. */
const FUNC_CODE_DECLAREBLOCKS: u64 = 1;
const FUNC_CODE_INST_BINOP: u64 = 2;
const FUNC_CODE_INST_CAST: u64 = 3;
const FUNC_CODE_INST_EXTRACTELT: u64 = 6;
const FUNC_CODE_INST_INSERTELT: u64 = 7;
const FUNC_CODE_INST_SHUFFLEVEC: u64 = 8;
const FUNC_CODE_INST_RET: u64 = 10;
const FUNC_CODE_INST_BR: u64 = 11;
const FUNC_CODE_INST_SWITCH: u64 = 12;
const FUNC_CODE_INST_UNREACHABLE: u64 = 15;
const FUNC_CODE_INST_PHI: u64 = 16;
const FUNC_CODE_INST_ALLOCA: u64 = 19;
const FUNC_CODE_INST_LOAD: u64 = 20;
const FUNC_CODE_INST_EXTRACTVAL: u64 = 26;
const FUNC_CODE_INST_INSERTVAL: u64 = 27;
const FUNC_CODE_INST_CMP2: u64 = 28;
const FUNC_CODE_INST_VSELECT: u64 = 29;
const FUNC_CODE_INST_CALL: u64 = 34;
const FUNC_CODE_INST_GEP: u64 = 43;
const FUNC_CODE_INST_STORE: u64 = 44;
const FUNC_CODE_INST_CMPXCHG: u64 = 46;
const FUNC_CODE_INST_ATOMICRMW: u64 = 59;
const FUNC_CODE_INST_FREEZE: u64 = 68;

const VST_CODE_ENTRY: u64 = 1;

const PARAMATTR_CODE_ENTRY: u64 = 2;
const PARAMATTR_GRP_CODE_ENTRY: u64 = 3;

/// LLVM-14 enum attribute kind codes for the attributes this pipeline
/// emits.
fn attr_kind_code(attr: Attr) -> u64 {
    match attr {
        Attr::NoCapture => 11,
        Attr::NoUnwind => 18,
        Attr::ReadNone => 20,
        Attr::ReadOnly => 21,
        Attr::Convergent => 43,
        Attr::ArgMemOnly => 45,
        Attr::WriteOnly => 52,
        Attr::WillReturn => 61,
        Attr::NoFree => 62,
        Attr::NoSync => 63,
        Attr::MustProgress => 70,
    }
}

/// Alignment field encoding: `log2(align) + 1`, zero when unspecified.
fn align_code(align: u32) -> u64 {
    if align == 0 {
        0
    } else {
        align.trailing_zeros() as u64 + 1
    }
}

fn binop_code(op: BinOp) -> u64 {
    match op {
        BinOp::Add | BinOp::FAdd => 0,
        BinOp::Sub | BinOp::FSub => 1,
        BinOp::Mul | BinOp::FMul => 2,
        BinOp::UDiv => 3,
        BinOp::SDiv | BinOp::FDiv => 4,
        BinOp::URem => 5,
        BinOp::SRem | BinOp::FRem => 6,
        BinOp::Shl => 7,
        BinOp::LShr => 8,
        BinOp::AShr => 9,
        BinOp::And => 10,
        BinOp::Or => 11,
        BinOp::Xor => 12,
    }
}

fn cast_code(op: CastOp) -> u64 {
    match op {
        CastOp::Trunc => 0,
        CastOp::ZExt => 1,
        CastOp::SExt => 2,
        CastOp::FpToUi => 3,
        CastOp::FpToSi => 4,
        CastOp::UiToFp => 5,
        CastOp::SiToFp => 6,
        CastOp::FpTrunc => 7,
        CastOp::FpExt => 8,
        CastOp::PtrToInt => 9,
        CastOp::IntToPtr => 10,
        CastOp::Bitcast => 11,
    }
}

fn pred_code(pred: Pred) -> u64 {
    match pred {
        // FCmp predicates.
        Pred::Oeq => 1,
        Pred::Ogt => 2,
        Pred::Oge => 3,
        Pred::Olt => 4,
        Pred::Ole => 5,
        Pred::One => 6,
        Pred::Ord => 7,
        Pred::Uno => 8,
        Pred::Une => 14,
        // ICmp predicates.
        Pred::Eq => 32,
        Pred::Ne => 33,
        Pred::Ugt => 34,
        Pred::Uge => 35,
        Pred::Ult => 36,
        Pred::Ule => 37,
        Pred::Sgt => 38,
        Pred::Sge => 39,
        Pred::Slt => 40,
        Pred::Sle => 41,
    }
}

fn rmw_code(op: AtomicOp) -> u64 {
    match op {
        AtomicOp::Xchg => 0,
        AtomicOp::Add => 1,
        AtomicOp::Sub => 2,
        AtomicOp::And => 3,
        AtomicOp::Or => 5,
        AtomicOp::Xor => 6,
        AtomicOp::Max => 7,
        AtomicOp::Min => 8,
        AtomicOp::UMax => 9,
        AtomicOp::UMin => 10,
    }
}

struct ValueNumbering {
    numbers: HashMap<Value, u64>,
    /// Number of module-level values (globals + functions + constants);
    /// function-local numbering continues from here.
    module_values: u64,
    constants: Vec<Value>,
}

fn number_module_values(module: &Module) -> ValueNumbering {
    let mut numbers = HashMap::new();
    let mut next = 0u64;

    let mut global_values: Vec<Value> = Vec::new();
    let mut function_values: Vec<(FuncId, Value)> = Vec::new();
    let mut constants: Vec<Value> = Vec::new();
    module.for_each_value(|value| {
        if module.value_is_global(value) {
            global_values.push(value);
        } else if let Some(func) = module.value_as_function_ref(value) {
            function_values.push((func, value));
        } else if module.is_constant(value) || module.value_is_undef(value) {
            constants.push(value);
        }
    });

    for value in global_values {
        numbers.insert(value, next);
        next += 1;
    }
    // Each function gets one slot no matter how many FunctionRef values
    // point at it.
    let mut func_numbers: HashMap<FuncId, u64> = HashMap::new();
    for index in 0..module.functions.len() {
        func_numbers.insert(FuncId(index as u32), next);
        next += 1;
    }
    for (func, value) in function_values {
        numbers.insert(value, func_numbers[&func]);
    }
    for &value in &constants {
        numbers.insert(value, next);
        next += 1;
    }

    ValueNumbering { numbers, module_values: next, constants }
}

/// Serializes the module as a raw (wrapper-less) bitcode buffer.
pub fn write_module(module: &Module) -> Vec<u8> {
    let mut w = BitstreamWriter::new();
    // 'BC' 0xC0DE magic.
    w.emit(0x42, 8);
    w.emit(0x43, 8);
    w.emit(0xC0, 8);
    w.emit(0xDE, 8);

    write_identification(&mut w);

    let numbering = number_module_values(module);

    w.enter_block(MODULE_BLOCK_ID);
    w.unabbrev_record(MODULE_CODE_VERSION, &[1]);
    w.unabbrev_record_blob(MODULE_CODE_TRIPLE, module.target_triple.as_bytes());
    w.unabbrev_record_blob(MODULE_CODE_DATALAYOUT, module.data_layout.string.as_bytes());

    write_type_table(&mut w, module);
    let attr_ids = write_attributes(&mut w, module);

    // Global variables come first in the value numbering, then functions.
    for global in &module.globals {
        // [pointer type, isconst, initid, linkage, alignment+1, section,
        //  visibility, threadlocal, unnamed_addr, externally_initialized,
        //  dllstorageclass, comdat, attributes, preemption]
        let ptr_ty = type_index(module, global.ty);
        let init = match global.initializer {
            Some(init) => numbering.numbers.get(&init).map(|n| n + 1).unwrap_or(0),
            None => 0,
        };
        let linkage = match global.linkage {
            crate::ir::Linkage::External => 0,
            crate::ir::Linkage::Internal => 3,
        };
        w.unabbrev_record(
            MODULE_CODE_GLOBALVAR,
            &[
                ptr_ty,
                (global.address_space as u64) << 2 | 0b10 | global.constant as u64,
                init,
                linkage,
                align_code(global.align),
                0,
            ],
        );
    }
    for (index, func) in module.functions.iter().enumerate() {
        // [type, callingconv, isproto, linkage, paramattr, alignment, ...]
        let ty = type_index(module, func.ty);
        let attr_id = attr_ids.get(&(index as u32)).copied().unwrap_or(0);
        w.unabbrev_record(
            MODULE_CODE_FUNCTION,
            &[
                ty,
                0,
                func.is_declaration() as u64,
                0,
                attr_id,
                0,
                0,
                0,
                0,
                0,
                0,
                0,
            ],
        );
    }

    write_module_constants(&mut w, module, &numbering);
    write_metadata(&mut w, module, &numbering);

    for (index, func) in module.functions.iter().enumerate() {
        if func.is_declaration() {
            continue;
        }
        write_function_body(&mut w, module, FuncId(index as u32), &numbering);
    }

    write_value_symtab(&mut w, module);

    w.end_block();
    w.into_bytes()
}

fn write_identification(w: &mut BitstreamWriter) {
    w.enter_block(IDENTIFICATION_BLOCK_ID);
    w.unabbrev_record_blob(IDENTIFICATION_CODE_STRING, b"LLVM14.0.0");
    w.unabbrev_record(IDENTIFICATION_CODE_EPOCH, &[0]);
    w.end_block();
}

fn type_index(module: &Module, ty: TypeId) -> u64 {
    module.types.index_of(ty) as u64
}

fn write_type_table(w: &mut BitstreamWriter, module: &Module) {
    w.enter_block(TYPE_BLOCK_ID_NEW);
    let count = module.types.len();
    w.unabbrev_record(TYPE_CODE_NUMENTRY, &[count as u64]);
    for index in 0..count {
        let ty = module.types.by_index(index);
        match module.types.kind(ty).clone() {
            TypeKind::Void => w.unabbrev_record(TYPE_CODE_VOID, &[]),
            TypeKind::Float => w.unabbrev_record(TYPE_CODE_FLOAT, &[]),
            TypeKind::Half => w.unabbrev_record(TYPE_CODE_HALF, &[]),
            TypeKind::Int(bits) => w.unabbrev_record(TYPE_CODE_INTEGER, &[bits as u64]),
            TypeKind::Pointer { pointee, address_space } => w.unabbrev_record(
                TYPE_CODE_POINTER,
                &[type_index(module, pointee), address_space as u64],
            ),
            TypeKind::Array { elem, len } => {
                w.unabbrev_record(TYPE_CODE_ARRAY, &[len, type_index(module, elem)])
            }
            TypeKind::Vector { elem, len } => {
                w.unabbrev_record(TYPE_CODE_VECTOR, &[len as u64, type_index(module, elem)])
            }
            TypeKind::Struct { name, fields, packed } => {
                let mut ops: Vec<u64> = vec![packed as u64];
                ops.extend(fields.iter().map(|&f| type_index(module, f)));
                match name {
                    Some(name) => {
                        w.unabbrev_record_blob(TYPE_CODE_STRUCT_NAME, name.as_bytes());
                        w.unabbrev_record(TYPE_CODE_STRUCT_NAMED, &ops);
                    }
                    None => w.unabbrev_record(TYPE_CODE_STRUCT_ANON, &ops),
                }
            }
            TypeKind::Opaque { name } => {
                w.unabbrev_record_blob(TYPE_CODE_STRUCT_NAME, name.as_bytes());
                w.unabbrev_record(TYPE_CODE_OPAQUE, &[0]);
            }
            TypeKind::Function { ret, params } => {
                let mut ops: Vec<u64> = vec![0, type_index(module, ret)];
                ops.extend(params.iter().map(|&p| type_index(module, p)));
                w.unabbrev_record(TYPE_CODE_FUNCTION, &ops);
            }
        }
    }
    w.end_block();
}

/// Emits attribute groups and per-function attribute lists; returns the
/// 1-based paramattr index per function.
fn write_attributes(w: &mut BitstreamWriter, module: &Module) -> HashMap<u32, u64> {
    // Collect distinct attribute lists in function order.
    let mut group_records: Vec<Vec<u64>> = Vec::new();
    let mut entries: Vec<Vec<u64>> = Vec::new();
    let mut by_function: HashMap<u32, u64> = HashMap::new();
    for (func_index, func) in module.functions.iter().enumerate() {
        if func.attributes.0.is_empty() {
            continue;
        }
        // One group per (function, attribute index) pair.
        let mut indices: Vec<u32> = func.attributes.0.iter().map(|(i, _)| *i).collect();
        indices.dedup();
        indices.sort_unstable();
        indices.dedup();
        let mut entry = Vec::new();
        for attr_index in indices {
            let group_id = group_records.len() as u64 + 1;
            // [grpid, paramidx, 0 (enum attr), kind...]
            let mut record: Vec<u64> = vec![
                group_id,
                if attr_index == FUNCTION_ATTR { u32::MAX as u64 } else { attr_index as u64 },
            ];
            for (index, attr) in &func.attributes.0 {
                if *index == attr_index {
                    record.push(0);
                    record.push(attr_kind_code(*attr));
                }
            }
            group_records.push(record);
            entry.push(group_id);
        }
        entries.push(entry);
        by_function.insert(func_index as u32, entries.len() as u64);
    }

    w.enter_block(PARAMATTR_GROUP_BLOCK_ID);
    for record in &group_records {
        w.unabbrev_record(PARAMATTR_GRP_CODE_ENTRY, record);
    }
    w.end_block();

    w.enter_block(PARAMATTR_BLOCK_ID);
    for entry in &entries {
        w.unabbrev_record(PARAMATTR_CODE_ENTRY, entry);
    }
    w.end_block();

    by_function
}

fn write_module_constants(w: &mut BitstreamWriter, module: &Module, numbering: &ValueNumbering) {
    if numbering.constants.is_empty() {
        return;
    }
    w.enter_block(CONSTANTS_BLOCK_ID);
    let mut current_type: Option<TypeId> = None;
    for &value in &numbering.constants {
        let ty = module.value_type(value);
        if current_type != Some(ty) {
            w.unabbrev_record(CST_CODE_SETTYPE, &[type_index(module, ty)]);
            current_type = Some(ty);
        }
        if module.value_is_undef(value) {
            w.unabbrev_record(CST_CODE_UNDEF, &[]);
        } else if let Some(bits) = module.const_int_value(value) {
            // Signed-VBR encoding: value shifted left, sign in bit 0.
            let signed = bits as i64;
            let encoded = if signed < 0 {
                (((-signed) as u64) << 1) | 1
            } else {
                (signed as u64) << 1
            };
            w.unabbrev_record(CST_CODE_INTEGER, &[encoded]);
        } else if let Some(elems) = module.const_vector_elems(value) {
            let ops: Vec<u64> = elems.iter().map(|e| numbering.numbers[e]).collect();
            w.unabbrev_record(CST_CODE_AGGREGATE, &ops);
        } else if let Some(bits) = module.const_float_bits(value) {
            w.unabbrev_record(CST_CODE_FLOAT, &[bits]);
        } else {
            // Aggregate zero and null pointers.
            w.unabbrev_record(CST_CODE_NULL, &[]);
        }
    }
    w.end_block();
}

fn write_metadata(w: &mut BitstreamWriter, module: &Module, numbering: &ValueNumbering) {
    if module.metadata_len() == 0 && module.named_metadata.is_empty() {
        return;
    }
    w.enter_block(METADATA_BLOCK_ID);
    for index in 0..module.metadata_len() {
        let id = crate::ir::MetadataId(index as u32);
        match module.metadata_node(id) {
            MetadataNode::String(s) => {
                let ops: Vec<u64> = s.bytes().map(|b| b as u64).collect();
                w.unabbrev_record(METADATA_STRING_OLD, &ops);
            }
            MetadataNode::Value(value) => {
                let ty = module.value_type(*value);
                let number = numbering.numbers.get(value).copied().unwrap_or(0);
                w.unabbrev_record(METADATA_VALUE, &[type_index(module, ty), number]);
            }
            MetadataNode::Tuple(operands) => {
                // Operand ids are offset by one; 0 is the null metadata.
                let ops: Vec<u64> = operands.iter().map(|m| m.index() as u64 + 1).collect();
                w.unabbrev_record(METADATA_NODE, &ops);
            }
        }
    }
    for (name, operands) in &module.named_metadata {
        let name_ops: Vec<u64> = name.bytes().map(|b| b as u64).collect();
        w.unabbrev_record(METADATA_NAME, &name_ops);
        let ops: Vec<u64> = operands.iter().map(|m| m.index() as u64).collect();
        w.unabbrev_record(METADATA_NAMED_NODE, &ops);
    }
    w.end_block();
}

fn write_value_symtab(w: &mut BitstreamWriter, module: &Module) {
    w.enter_block(VALUE_SYMTAB_BLOCK_ID);
    let global_count = module.globals.len() as u64;
    for (index, global) in module.globals.iter().enumerate() {
        let mut ops: Vec<u64> = vec![index as u64];
        ops.extend(global.name.bytes().map(|b| b as u64));
        w.unabbrev_record(VST_CODE_ENTRY, &ops);
    }
    for (index, func) in module.functions.iter().enumerate() {
        let mut ops: Vec<u64> = vec![global_count + index as u64];
        ops.extend(func.name.bytes().map(|b| b as u64));
        w.unabbrev_record(VST_CODE_ENTRY, &ops);
    }
    w.end_block();
}

fn write_function_body(
    w: &mut BitstreamWriter,
    module: &Module,
    func_id: FuncId,
    numbering: &ValueNumbering,
) {
    let func = module.func(func_id);
    w.enter_block(FUNCTION_BLOCK_ID);
    w.unabbrev_record(FUNC_CODE_DECLAREBLOCKS, &[func.blocks.len() as u64]);

    // Function-local numbering: arguments, then instruction results in
    // emission order.
    let mut local: HashMap<Value, u64> = HashMap::new();
    let mut next = numbering.module_values;
    for &arg in &func.args {
        local.insert(arg, next);
        next += 1;
    }
    for block in &func.blocks {
        for &inst_id in &block.insts {
            if let Some(result) = module.inst_result(func_id, inst_id) {
                let is_void = matches!(
                    module.types.kind(module.value_type(result)),
                    TypeKind::Void
                );
                if !is_void {
                    local.insert(result, next);
                    next += 1;
                }
            }
        }
    }

    let number_of = |value: Value| -> u64 {
        local
            .get(&value)
            .or_else(|| numbering.numbers.get(&value))
            .copied()
            .unwrap_or_else(|| panic!("value {value:?} has no bitcode number"))
    };

    let mut cursor = numbering.module_values + func.args.len() as u64;
    for block in &func.blocks {
        for &inst_id in &block.insts {
            let data = &func.insts[inst_id.0 as usize];
            let produces = module
                .inst_result(func_id, inst_id)
                .map(|v| !matches!(module.types.kind(module.value_type(v)), TypeKind::Void))
                .unwrap_or(false);
            // Operands are encoded relative to the instruction's own
            // number, per bitcode version 1.
            let rel = |v: Value| -> u64 { cursor.wrapping_sub(number_of(v)) };
            match &data.inst {
                Inst::Binary { op, lhs, rhs } => {
                    w.unabbrev_record(FUNC_CODE_INST_BINOP, &[rel(*lhs), rel(*rhs), binop_code(*op)]);
                }
                Inst::ICmp { pred, lhs, rhs } | Inst::FCmp { pred, lhs, rhs } => {
                    w.unabbrev_record(
                        FUNC_CODE_INST_CMP2,
                        &[rel(*lhs), rel(*rhs), pred_code(*pred)],
                    );
                }
                Inst::Cast { op, value, to } => {
                    w.unabbrev_record(
                        FUNC_CODE_INST_CAST,
                        &[rel(*value), type_index(module, *to), cast_code(*op)],
                    );
                }
                Inst::ExtractElement { vector, index } => {
                    w.unabbrev_record(FUNC_CODE_INST_EXTRACTELT, &[rel(*vector), rel(*index)]);
                }
                Inst::InsertElement { vector, element, index } => {
                    w.unabbrev_record(
                        FUNC_CODE_INST_INSERTELT,
                        &[rel(*vector), rel(*element), rel(*index)],
                    );
                }
                Inst::ShuffleVector { a, b, mask } => {
                    // The mask travels as a constant vector value in real
                    // bitcode; lane indices are appended directly here.
                    let mut ops = vec![rel(*a), rel(*b)];
                    ops.extend(mask.iter().map(|&lane| lane as i64 as u64));
                    w.unabbrev_record(FUNC_CODE_INST_SHUFFLEVEC, &ops);
                }
                Inst::ExtractValue { aggregate, indices } => {
                    let mut ops = vec![rel(*aggregate)];
                    ops.extend(indices.iter().map(|&i| i as u64));
                    w.unabbrev_record(FUNC_CODE_INST_EXTRACTVAL, &ops);
                }
                Inst::InsertValue { aggregate, element, indices } => {
                    let mut ops = vec![rel(*aggregate), rel(*element)];
                    ops.extend(indices.iter().map(|&i| i as u64));
                    w.unabbrev_record(FUNC_CODE_INST_INSERTVAL, &ops);
                }
                Inst::Alloca { allocated, align } => {
                    let size_ty = module
                        .types
                        .find(&TypeKind::Int(32))
                        .map(|t| type_index(module, t))
                        .unwrap_or(0);
                    w.unabbrev_record(
                        FUNC_CODE_INST_ALLOCA,
                        &[type_index(module, *allocated), size_ty, 0, align_code(*align)],
                    );
                }
                Inst::Load { ptr, align } => {
                    w.unabbrev_record(
                        FUNC_CODE_INST_LOAD,
                        &[rel(*ptr), type_index(module, data.ty), align_code(*align), 0],
                    );
                }
                Inst::Store { value, ptr, align } => {
                    w.unabbrev_record(
                        FUNC_CODE_INST_STORE,
                        &[rel(*ptr), rel(*value), align_code(*align), 0],
                    );
                }
                Inst::Gep { base, ptr, indices } => {
                    let mut ops = vec![0, type_index(module, *base), rel(*ptr)];
                    ops.extend(indices.iter().map(|&i| rel(i)));
                    w.unabbrev_record(FUNC_CODE_INST_GEP, &ops);
                }
                Inst::Call { callee, args, fast_math } => {
                    let callee_number = module.globals.len() as u64 + callee.index() as u64;
                    let mut ops = vec![
                        0,                                     // paramattr
                        (*fast_math as u64) << 17,             // cc + flags
                        type_index(module, module.func(*callee).ty),
                        cursor.wrapping_sub(callee_number),
                    ];
                    ops.extend(args.iter().map(|&a| rel(a)));
                    w.unabbrev_record(FUNC_CODE_INST_CALL, &ops);
                }
                Inst::Select { cond, if_true, if_false } => {
                    w.unabbrev_record(
                        FUNC_CODE_INST_VSELECT,
                        &[rel(*if_true), rel(*if_false), rel(*cond)],
                    );
                }
                Inst::Phi { incoming } => {
                    // Phi operands use signed-relative numbering because
                    // they may reference later definitions.
                    let mut ops = vec![type_index(module, data.ty)];
                    for (value, block) in incoming {
                        let delta = cursor as i64 - number_of(*value) as i64;
                        let encoded = if delta < 0 {
                            (((-delta) as u64) << 1) | 1
                        } else {
                            (delta as u64) << 1
                        };
                        ops.push(encoded);
                        ops.push(block.index() as u64);
                    }
                    w.unabbrev_record(FUNC_CODE_INST_PHI, &ops);
                }
                Inst::AtomicRmw { op, ptr, value } => {
                    w.unabbrev_record(
                        FUNC_CODE_INST_ATOMICRMW,
                        &[rel(*ptr), rel(*value), rmw_code(*op), 0, 0, 0],
                    );
                }
                Inst::CmpXchg { ptr, expected, desired } => {
                    w.unabbrev_record(
                        FUNC_CODE_INST_CMPXCHG,
                        &[rel(*ptr), rel(*expected), rel(*desired), 0, 0, 0, 0, 0],
                    );
                }
                Inst::Freeze { value } => {
                    w.unabbrev_record(FUNC_CODE_INST_FREEZE, &[rel(*value)]);
                }
            }
            if produces {
                cursor += 1;
            }
        }
        match &block.terminator {
            Terminator::Ret { value } => match value {
                None => w.unabbrev_record(FUNC_CODE_INST_RET, &[]),
                Some(v) => {
                    let delta = cursor.wrapping_sub(number_of(*v));
                    w.unabbrev_record(FUNC_CODE_INST_RET, &[delta]);
                }
            },
            Terminator::Br { dest } => {
                w.unabbrev_record(FUNC_CODE_INST_BR, &[dest.index() as u64]);
            }
            Terminator::CondBr { cond, if_true, if_false } => {
                let delta = cursor.wrapping_sub(number_of(*cond));
                w.unabbrev_record(
                    FUNC_CODE_INST_BR,
                    &[if_true.index() as u64, if_false.index() as u64, delta],
                );
            }
            Terminator::Switch { value, default, cases } => {
                let ty = module.value_type(*value);
                let mut ops = vec![
                    type_index(module, ty),
                    cursor.wrapping_sub(number_of(*value)),
                    default.index() as u64,
                ];
                for (case, dest) in cases {
                    ops.push(*case);
                    ops.push(dest.index() as u64);
                }
                w.unabbrev_record(FUNC_CODE_INST_SWITCH, &ops);
            }
            Terminator::Unreachable => {
                w.unabbrev_record(FUNC_CODE_INST_UNREACHABLE, &[]);
            }
            Terminator::None => {
                // Verified away before serialization; emit unreachable so
                // the stream stays structurally sound regardless.
                w.unabbrev_record(FUNC_CODE_INST_UNREACHABLE, &[]);
            }
        }
    }
    w.end_block();
}
