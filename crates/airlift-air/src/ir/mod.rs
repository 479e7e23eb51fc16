//! An LLVM-14-style SSA IR: interned types (typed pointers with address
//! spaces), a module-wide value arena, functions holding basic-block and
//! instruction arenas, attribute lists, and metadata tuples.
//!
//! Basic blocks and instructions are arena indices, never pointers, so
//! back-edges cost nothing in ownership terms. Value handles are plain
//! indices and are non-owning.

mod builder;
mod layout;
mod passes;
mod verify;

pub use builder::IrBuilder;
pub use layout::DataLayout;
pub use passes::{optimize, OptLevel};
pub use verify::verify;

use indexmap::IndexMap;
use smallvec::SmallVec;
use std::collections::HashMap;

macro_rules! id_index {
    ($name:ident) => {
        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TypeId(pub(crate) u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Value(pub(crate) u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FuncId(pub(crate) u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BlockId(pub(crate) u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct InstId(pub(crate) u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GlobalId(pub(crate) u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MetadataId(pub(crate) u32);

id_index!(TypeId);
id_index!(Value);
id_index!(FuncId);
id_index!(BlockId);
id_index!(InstId);
id_index!(GlobalId);
id_index!(MetadataId);

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypeKind {
    Void,
    /// Arbitrary-width integer; `i1` doubles as bool.
    Int(u32),
    Half,
    Float,
    Vector { elem: TypeId, len: u32 },
    Array { elem: TypeId, len: u64 },
    /// Literal struct. `name` is set for identified structs.
    Struct {
        name: Option<String>,
        fields: Vec<TypeId>,
        packed: bool,
    },
    /// Opaque identified struct (no body); the representation of Metal's
    /// handle types such as `struct._texture_2d_t`.
    Opaque { name: String },
    Pointer { pointee: TypeId, address_space: u32 },
    Function { ret: TypeId, params: Vec<TypeId> },
}

#[derive(Default)]
pub struct TypeTable {
    kinds: Vec<TypeKind>,
    interned: HashMap<TypeKind, TypeId>,
    by_name: HashMap<String, TypeId>,
}

impl TypeTable {
    pub fn kind(&self, ty: TypeId) -> &TypeKind {
        &self.kinds[ty.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn index_of(&self, ty: TypeId) -> usize {
        ty.0 as usize
    }

    pub fn by_index(&self, index: usize) -> TypeId {
        TypeId(index as u32)
    }

    /// Immutable lookup of an already-interned kind.
    pub fn find(&self, kind: &TypeKind) -> Option<TypeId> {
        self.interned.get(kind).copied()
    }

    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.interned.get(&kind) {
            return id;
        }
        let id = TypeId(self.kinds.len() as u32);
        if let TypeKind::Struct { name: Some(name), .. } | TypeKind::Opaque { name } = &kind {
            self.by_name.insert(name.clone(), id);
        }
        self.interned.insert(kind.clone(), id);
        self.kinds.push(kind);
        id
    }

    pub fn void(&mut self) -> TypeId {
        self.intern(TypeKind::Void)
    }
    pub fn i1(&mut self) -> TypeId {
        self.intern(TypeKind::Int(1))
    }
    pub fn i8(&mut self) -> TypeId {
        self.intern(TypeKind::Int(8))
    }
    pub fn i16(&mut self) -> TypeId {
        self.intern(TypeKind::Int(16))
    }
    pub fn i32(&mut self) -> TypeId {
        self.intern(TypeKind::Int(32))
    }
    pub fn i64(&mut self) -> TypeId {
        self.intern(TypeKind::Int(64))
    }
    pub fn f16(&mut self) -> TypeId {
        self.intern(TypeKind::Half)
    }
    pub fn f32(&mut self) -> TypeId {
        self.intern(TypeKind::Float)
    }

    pub fn vec(&mut self, elem: TypeId, len: u32) -> TypeId {
        debug_assert!(len >= 2);
        self.intern(TypeKind::Vector { elem, len })
    }

    /// `dim == 1` yields the scalar itself, matching the source-language
    /// convention where `float1` is just `float`.
    pub fn vec_or_scalar(&mut self, elem: TypeId, dim: u32) -> TypeId {
        if dim <= 1 {
            elem
        } else {
            self.vec(elem, dim)
        }
    }

    pub fn array(&mut self, elem: TypeId, len: u64) -> TypeId {
        self.intern(TypeKind::Array { elem, len })
    }

    pub fn ptr(&mut self, pointee: TypeId, address_space: u32) -> TypeId {
        self.intern(TypeKind::Pointer { pointee, address_space })
    }

    pub fn literal_struct(&mut self, fields: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Struct { name: None, fields, packed: false })
    }

    pub fn named_struct(&mut self, name: &str, fields: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Struct {
            name: Some(name.to_string()),
            fields,
            packed: false,
        })
    }

    /// Returns the existing identified struct with this name or creates an
    /// opaque one.
    pub fn opaque_struct(&mut self, name: &str) -> TypeId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        self.intern(TypeKind::Opaque { name: name.to_string() })
    }

    pub fn func(&mut self, ret: TypeId, params: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Function { ret, params })
    }

    pub fn scalar_of(&self, ty: TypeId) -> TypeId {
        match self.kind(ty) {
            TypeKind::Vector { elem, .. } => *elem,
            _ => ty,
        }
    }

    pub fn vector_len(&self, ty: TypeId) -> Option<u32> {
        match self.kind(ty) {
            TypeKind::Vector { len, .. } => Some(*len),
            _ => None,
        }
    }

    pub fn pointee(&self, ty: TypeId) -> Option<(TypeId, u32)> {
        match self.kind(ty) {
            TypeKind::Pointer { pointee, address_space } => Some((*pointee, *address_space)),
            _ => None,
        }
    }

    pub fn is_float_scalar_or_vector(&self, ty: TypeId) -> bool {
        matches!(self.kind(self.scalar_of(ty)), TypeKind::Float | TypeKind::Half)
    }

    pub fn is_int_scalar_or_vector(&self, ty: TypeId) -> bool {
        matches!(self.kind(self.scalar_of(ty)), TypeKind::Int(_))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Attr {
    NoCapture,
    ReadOnly,
    WriteOnly,
    ArgMemOnly,
    Convergent,
    NoUnwind,
    WillReturn,
    MustProgress,
    NoFree,
    NoSync,
    ReadNone,
}

/// Attribute index for function-level attributes; parameter attributes use
/// their 1-based parameter index, mirroring the LLVM convention.
pub const FUNCTION_ATTR: u32 = u32::MAX;

#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct AttributeList(pub Vec<(u32, Attr)>);

impl AttributeList {
    pub fn function(attrs: &[Attr]) -> Self {
        AttributeList(attrs.iter().map(|&a| (FUNCTION_ATTR, a)).collect())
    }

    pub fn with_param(mut self, index: u32, attrs: &[Attr]) -> Self {
        self.0.extend(attrs.iter().map(|&a| (index, a)));
        self
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Linkage {
    External,
    Internal,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
    FpTrunc,
    FpExt,
    Bitcast,
    PtrToInt,
    IntToPtr,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Pred {
    // integer
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
    // float (ordered, plus the unordered-ne DXBC needs)
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Une,
    Ord,
    Uno,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum AtomicOp {
    Xchg,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Max,
    Min,
    UMax,
    UMin,
}

#[derive(Clone, Debug)]
pub enum Inst {
    Binary { op: BinOp, lhs: Value, rhs: Value },
    ICmp { pred: Pred, lhs: Value, rhs: Value },
    FCmp { pred: Pred, lhs: Value, rhs: Value },
    Cast { op: CastOp, value: Value, to: TypeId },
    ExtractElement { vector: Value, index: Value },
    InsertElement { vector: Value, element: Value, index: Value },
    ShuffleVector { a: Value, b: Value, mask: Vec<i32> },
    ExtractValue { aggregate: Value, indices: SmallVec<[u32; 2]> },
    InsertValue { aggregate: Value, element: Value, indices: SmallVec<[u32; 2]> },
    Alloca { allocated: TypeId, align: u32 },
    Load { ptr: Value, align: u32 },
    Store { value: Value, ptr: Value, align: u32 },
    Gep { base: TypeId, ptr: Value, indices: Vec<Value> },
    Call { callee: FuncId, args: Vec<Value>, fast_math: bool },
    Select { cond: Value, if_true: Value, if_false: Value },
    Phi { incoming: Vec<(Value, BlockId)> },
    AtomicRmw { op: AtomicOp, ptr: Value, value: Value },
    CmpXchg { ptr: Value, expected: Value, desired: Value },
    Freeze { value: Value },
}

#[derive(Clone, Debug, Default)]
pub enum Terminator {
    /// Not yet terminated; an error if it survives to verification.
    #[default]
    None,
    Br { dest: BlockId },
    CondBr { cond: Value, if_true: BlockId, if_false: BlockId },
    Switch { value: Value, default: BlockId, cases: Vec<(u64, BlockId)> },
    Ret { value: Option<Value> },
    Unreachable,
}

#[derive(Clone, Debug)]
pub struct InstData {
    pub ty: TypeId,
    pub inst: Inst,
}

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub name: String,
    pub insts: Vec<InstId>,
    pub terminator: Terminator,
}

pub struct Function {
    pub name: String,
    pub ty: TypeId,
    pub args: Vec<Value>,
    pub attributes: AttributeList,
    pub linkage: Linkage,
    pub blocks: Vec<Block>,
    pub insts: Vec<InstData>,
}

impl Function {
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        (!self.blocks.is_empty()).then_some(BlockId(0))
    }
}

pub struct GlobalVariable {
    pub name: String,
    /// Pointee type; the global's value type is a pointer to this in
    /// `address_space`.
    pub ty: TypeId,
    pub address_space: u32,
    pub align: u32,
    pub initializer: Option<Value>,
    pub constant: bool,
    pub linkage: Linkage,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MetadataNode {
    String(String),
    Value(Value),
    Tuple(Vec<MetadataId>),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FlagBehavior {
    Error,
    Max,
}

#[derive(Clone, Debug, PartialEq)]
enum ValueKind {
    ConstInt { bits: u64 },
    ConstFloat { bits: u32 },
    ConstHalf { bits: u16 },
    ConstVector { elems: Vec<Value> },
    ConstArray { elems: Vec<Value> },
    ConstAggregateZero,
    Undef,
    Argument { func: FuncId, index: u32 },
    Inst { func: FuncId, inst: InstId },
    Global(GlobalId),
    FunctionRef(FuncId),
}

struct ValueData {
    ty: TypeId,
    kind: ValueKind,
}

pub struct Module {
    pub name: String,
    pub source_file_name: String,
    pub target_triple: String,
    pub data_layout: DataLayout,
    pub sdk_version: (u16, u16),
    pub flags: Vec<(FlagBehavior, String, u32)>,
    pub types: TypeTable,
    pub functions: Vec<Function>,
    pub globals: Vec<GlobalVariable>,
    pub named_metadata: IndexMap<String, Vec<MetadataId>>,
    values: Vec<ValueData>,
    metadata: Vec<MetadataNode>,
    func_by_name: HashMap<String, FuncId>,
    const_dedup: HashMap<(TypeId, u64), Value>,
    inst_results: HashMap<(FuncId, InstId), Value>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Module {
            name: name.to_string(),
            source_file_name: String::new(),
            target_triple: String::new(),
            data_layout: DataLayout::default(),
            sdk_version: (0, 0),
            flags: Vec::new(),
            types: TypeTable::default(),
            functions: Vec::new(),
            globals: Vec::new(),
            named_metadata: IndexMap::new(),
            values: Vec::new(),
            metadata: Vec::new(),
            func_by_name: HashMap::new(),
            const_dedup: HashMap::new(),
            inst_results: HashMap::new(),
        }
    }

    pub fn add_flag(&mut self, behavior: FlagBehavior, name: &str, value: u32) {
        self.flags.push((behavior, name.to_string(), value));
    }

    fn push_value(&mut self, ty: TypeId, kind: ValueKind) -> Value {
        let v = Value(self.values.len() as u32);
        self.values.push(ValueData { ty, kind });
        v
    }

    pub fn value_type(&self, value: Value) -> TypeId {
        self.values[value.0 as usize].ty
    }

    pub(crate) fn inst_value(&mut self, func: FuncId, inst: InstId, ty: TypeId) -> Value {
        let v = self.push_value(ty, ValueKind::Inst { func, inst });
        self.inst_results.insert((func, inst), v);
        v
    }

    /// The SSA value produced by an instruction, if any consumer asked for
    /// one when it was built.
    pub fn inst_result(&self, func: FuncId, inst: InstId) -> Option<Value> {
        self.inst_results.get(&(func, inst)).copied()
    }

    /* Constants */

    fn interned_const(&mut self, ty: TypeId, key: u64, kind: ValueKind) -> Value {
        if let Some(&v) = self.const_dedup.get(&(ty, key)) {
            return v;
        }
        let v = self.push_value(ty, kind);
        self.const_dedup.insert((ty, key), v);
        v
    }

    pub fn const_int(&mut self, ty: TypeId, bits: u64) -> Value {
        debug_assert!(matches!(self.types.kind(ty), TypeKind::Int(_)));
        self.interned_const(ty, bits, ValueKind::ConstInt { bits })
    }

    pub fn const_u32(&mut self, value: u32) -> Value {
        let ty = self.types.i32();
        self.const_int(ty, value as u64)
    }

    pub fn const_i32(&mut self, value: i32) -> Value {
        self.const_u32(value as u32)
    }

    pub fn const_u64(&mut self, value: u64) -> Value {
        let ty = self.types.i64();
        self.const_int(ty, value)
    }

    pub fn const_bool(&mut self, value: bool) -> Value {
        let ty = self.types.i1();
        self.const_int(ty, value as u64)
    }

    pub fn const_u8(&mut self, value: u8) -> Value {
        let ty = self.types.i8();
        self.const_int(ty, value as u64)
    }

    pub fn const_f32(&mut self, value: f32) -> Value {
        self.const_f32_bits(value.to_bits())
    }

    pub fn const_f32_bits(&mut self, bits: u32) -> Value {
        let ty = self.types.f32();
        self.interned_const(ty, bits as u64, ValueKind::ConstFloat { bits })
    }

    pub fn const_f16_bits(&mut self, bits: u16) -> Value {
        let ty = self.types.f16();
        self.interned_const(ty, bits as u64, ValueKind::ConstHalf { bits })
    }

    pub fn const_vector(&mut self, elems: &[Value]) -> Value {
        debug_assert!(elems.len() >= 2);
        let elem_ty = self.value_type(elems[0]);
        let ty = self.types.vec(elem_ty, elems.len() as u32);
        self.push_value(ty, ValueKind::ConstVector { elems: elems.to_vec() })
    }

    pub fn const_array(&mut self, elems: &[Value]) -> Value {
        let elem_ty = self.value_type(elems[0]);
        let ty = self.types.array(elem_ty, elems.len() as u64);
        self.push_value(ty, ValueKind::ConstArray { elems: elems.to_vec() })
    }

    pub fn const_u32_vec(&mut self, values: &[u32]) -> Value {
        let elems: Vec<Value> = values.iter().map(|&v| self.const_u32(v)).collect();
        self.const_vector(&elems)
    }

    pub fn const_f32_vec(&mut self, values: &[f32]) -> Value {
        let elems: Vec<Value> = values.iter().map(|&v| self.const_f32(v)).collect();
        self.const_vector(&elems)
    }

    pub fn zero(&mut self, ty: TypeId) -> Value {
        match self.types.kind(ty).clone() {
            TypeKind::Int(_) => self.const_int(ty, 0),
            TypeKind::Float => self.const_f32(0.0),
            TypeKind::Half => self.const_f16_bits(0),
            _ => self.push_value(ty, ValueKind::ConstAggregateZero),
        }
    }

    pub fn undef(&mut self, ty: TypeId) -> Value {
        self.push_value(ty, ValueKind::Undef)
    }

    pub fn is_constant(&self, value: Value) -> bool {
        matches!(
            self.values[value.0 as usize].kind,
            ValueKind::ConstInt { .. }
                | ValueKind::ConstFloat { .. }
                | ValueKind::ConstHalf { .. }
                | ValueKind::ConstVector { .. }
                | ValueKind::ConstArray { .. }
                | ValueKind::ConstAggregateZero
        )
    }

    pub fn const_int_value(&self, value: Value) -> Option<u64> {
        match &self.values[value.0 as usize].kind {
            ValueKind::ConstInt { bits } => Some(*bits),
            _ => None,
        }
    }

    pub fn const_float_value(&self, value: Value) -> Option<f32> {
        match &self.values[value.0 as usize].kind {
            ValueKind::ConstFloat { bits } => Some(f32::from_bits(*bits)),
            _ => None,
        }
    }

    /// Elements of a constant vector or array.
    pub fn const_vector_elems(&self, value: Value) -> Option<&[Value]> {
        match &self.values[value.0 as usize].kind {
            ValueKind::ConstVector { elems } | ValueKind::ConstArray { elems } => Some(elems),
            _ => None,
        }
    }

    /// Bit pattern of a scalar float/half constant, widened to u64.
    pub fn const_float_bits(&self, value: Value) -> Option<u64> {
        match &self.values[value.0 as usize].kind {
            ValueKind::ConstFloat { bits } => Some(*bits as u64),
            ValueKind::ConstHalf { bits } => Some(*bits as u64),
            _ => None,
        }
    }

    pub fn value_is_undef(&self, value: Value) -> bool {
        matches!(self.values[value.0 as usize].kind, ValueKind::Undef)
    }

    pub fn value_is_global(&self, value: Value) -> bool {
        matches!(self.values[value.0 as usize].kind, ValueKind::Global(_))
    }

    pub fn value_as_function_ref(&self, value: Value) -> Option<FuncId> {
        match self.values[value.0 as usize].kind {
            ValueKind::FunctionRef(f) => Some(f),
            _ => None,
        }
    }

    /// Visits every value in arena (creation) order.
    pub fn for_each_value(&self, mut visit: impl FnMut(Value)) {
        for index in 0..self.values.len() {
            visit(Value(index as u32));
        }
    }

    pub(crate) fn value_kind_is_inst(&self, value: Value) -> Option<(FuncId, InstId)> {
        match self.values[value.0 as usize].kind {
            ValueKind::Inst { func, inst } => Some((func, inst)),
            _ => None,
        }
    }

    /* Globals */

    pub fn add_global(&mut self, global: GlobalVariable) -> (GlobalId, Value) {
        let id = GlobalId(self.globals.len() as u32);
        let ptr_ty = self.types.ptr(global.ty, global.address_space);
        self.globals.push(global);
        let v = self.push_value(ptr_ty, ValueKind::Global(id));
        (id, v)
    }

    /* Functions */

    pub fn get_function(&self, name: &str) -> Option<FuncId> {
        self.func_by_name.get(name).copied()
    }

    pub fn func(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    pub fn function_ref(&mut self, id: FuncId) -> Value {
        let ty = self.functions[id.0 as usize].ty;
        self.push_value(ty, ValueKind::FunctionRef(id))
    }

    /// Declares `name` with the given signature, or returns the existing
    /// declaration. The signature of an existing function must match.
    pub fn get_or_insert_function(
        &mut self,
        name: &str,
        ty: TypeId,
        attributes: AttributeList,
    ) -> FuncId {
        if let Some(&id) = self.func_by_name.get(name) {
            debug_assert_eq!(self.functions[id.0 as usize].ty, ty, "{name}: signature mismatch");
            return id;
        }
        let id = FuncId(self.functions.len() as u32);
        let params = match self.types.kind(ty) {
            TypeKind::Function { params, .. } => params.clone(),
            _ => panic!("get_or_insert_function: not a function type"),
        };
        let func = Function {
            name: name.to_string(),
            ty,
            args: Vec::with_capacity(params.len()),
            attributes,
            linkage: Linkage::External,
            blocks: Vec::new(),
            insts: Vec::new(),
        };
        self.functions.push(func);
        for (index, param) in params.into_iter().enumerate() {
            let arg = self.push_value(param, ValueKind::Argument { func: id, index: index as u32 });
            self.functions[id.0 as usize].args.push(arg);
        }
        self.func_by_name.insert(name.to_string(), id);
        id
    }

    pub fn return_type_of(&self, func: FuncId) -> TypeId {
        match self.types.kind(self.functions[func.0 as usize].ty) {
            TypeKind::Function { ret, .. } => *ret,
            _ => unreachable!(),
        }
    }

    /* Metadata */

    pub fn md_string(&mut self, s: &str) -> MetadataId {
        let id = MetadataId(self.metadata.len() as u32);
        self.metadata.push(MetadataNode::String(s.to_string()));
        id
    }

    pub fn md_value(&mut self, value: Value) -> MetadataId {
        let id = MetadataId(self.metadata.len() as u32);
        self.metadata.push(MetadataNode::Value(value));
        id
    }

    pub fn md_u32(&mut self, value: u32) -> MetadataId {
        let v = self.const_u32(value);
        self.md_value(v)
    }

    pub fn md_tuple(&mut self, operands: Vec<MetadataId>) -> MetadataId {
        let id = MetadataId(self.metadata.len() as u32);
        self.metadata.push(MetadataNode::Tuple(operands));
        id
    }

    pub fn metadata_node(&self, id: MetadataId) -> &MetadataNode {
        &self.metadata[id.0 as usize]
    }

    pub fn metadata_len(&self) -> usize {
        self.metadata.len()
    }

    pub fn add_named_metadata_operand(&mut self, name: &str, operand: MetadataId) {
        self.named_metadata.entry(name.to_string()).or_default().push(operand);
    }

    pub fn md_as_string(&self, id: MetadataId) -> Option<&str> {
        match self.metadata_node(id) {
            MetadataNode::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn md_as_tuple(&self, id: MetadataId) -> Option<&[MetadataId]> {
        match self.metadata_node(id) {
            MetadataNode::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub fn md_as_u32(&self, id: MetadataId) -> Option<u32> {
        match self.metadata_node(id) {
            MetadataNode::Value(v) => self.const_int_value(*v).map(|b| b as u32),
            _ => None,
        }
    }

    pub fn md_as_function(&self, id: MetadataId) -> Option<FuncId> {
        match self.metadata_node(id) {
            MetadataNode::Value(v) => match self.values[v.0 as usize].kind {
                ValueKind::FunctionRef(f) => Some(f),
                _ => None,
            },
            _ => None,
        }
    }

    /// Computes the type a GEP over `base` with these indices points at
    /// (before wrapping in the result pointer). The first index steps over
    /// the pointer itself; struct steps must use constant indices.
    pub fn gep_pointee(&self, base: TypeId, indices: &[Value]) -> TypeId {
        let mut ty = base;
        for idx in &indices[1..] {
            ty = match self.types.kind(ty) {
                TypeKind::Array { elem, .. } | TypeKind::Vector { elem, .. } => *elem,
                TypeKind::Struct { fields, .. } => {
                    let field = self
                        .const_int_value(*idx)
                        .expect("struct gep index must be constant")
                        as usize;
                    fields[field]
                }
                other => panic!("gep through non-aggregate type {other:?}"),
            };
        }
        ty
    }
}
