//! Typed model of a decoded SM5 program: shaders, phases, declarations,
//! instructions and their operands.

pub mod decode;
pub mod opcode;

pub use decode::decode_program;

use airlift_dxbc::{RdefChunk, Signature};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ShaderStage {
    Pixel,
    Vertex,
    Geometry,
    Hull,
    Domain,
    Compute,
}

/// Per-component permutation applied when reading a 4-component operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Swizzle(pub [u8; 4]);

impl Swizzle {
    pub const IDENTITY: Swizzle = Swizzle([0, 1, 2, 3]);

    pub fn broadcast(component: u8) -> Swizzle {
        Swizzle([component; 4])
    }

    pub fn get(&self, lane: usize) -> u8 {
        self.0[lane]
    }
}

/// Destination component selector; bit N enables lane N.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WriteMask(pub u8);

impl WriteMask {
    pub const X: WriteMask = WriteMask(0b0001);
    pub const XY: WriteMask = WriteMask(0b0011);
    pub const XYZ: WriteMask = WriteMask(0b0111);
    pub const XYZW: WriteMask = WriteMask(0b1111);

    pub fn contains(&self, lane: u32) -> bool {
        self.0 & (1 << lane) != 0
    }

    pub fn count(&self) -> u32 {
        (self.0 & 0xf).count_ones()
    }

    pub fn lanes(&self) -> impl Iterator<Item = u32> + '_ {
        (0..4).filter(|&lane| self.contains(lane))
    }

    pub fn is_empty(&self) -> bool {
        self.0 & 0xf == 0
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum OperandModifier {
    #[default]
    None,
    Neg,
    Abs,
    AbsNeg,
}

/// Data-type tag assigned by analysis (or fixed by the operand kind).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum DataType {
    #[default]
    Unknown,
    Float,
    Int,
    Uint,
    Sint16,
    Uint16,
    Sint12,
    Float16,
    Float10,
    Double,
    Bool,
}

impl DataType {
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float | DataType::Float16 | DataType::Float10)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int
                | DataType::Uint
                | DataType::Sint16
                | DataType::Uint16
                | DataType::Sint12
                | DataType::Bool
        )
    }
}

/// A register index expression: immediate, or relative through a temp
/// component, with an optional immediate bias.
#[derive(Clone, PartialEq, Debug)]
pub enum IndexExpr {
    Imm(u32),
    /// `r<reg>.<component> + offset`
    Relative {
        reg: u32,
        component: u8,
        offset: u32,
    },
    /// `x<reg>[inner].<component> + offset`
    RelativeIndexable {
        reg: u32,
        inner: u32,
        component: u8,
        offset: u32,
    },
}

impl IndexExpr {
    pub fn as_imm(&self) -> Option<u32> {
        match self {
            IndexExpr::Imm(value) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum SrcKind {
    Temp { index: u32 },
    IndexableTemp { index: u32, offset: IndexExpr },
    Input { index: IndexExpr },
    /// Hull/domain per-control-point input: `vcp[vertex][reg]`.
    InputControlPoint { reg: u32, vertex: IndexExpr },
    /// Hull fork/join access to emitted control points.
    OutputControlPoint { reg: u32, vertex: IndexExpr },
    PatchConstant { index: IndexExpr },
    ConstantBuffer { slot: u32, index: IndexExpr },
    ImmediateConstantBuffer { index: IndexExpr },
    Immediate32([u32; 4]),
    Resource { slot: u32 },
    Sampler { slot: u32 },
    Uav { slot: u32 },
    Tgsm { slot: u32 },
    InputThreadId,
    InputThreadGroupId,
    InputThreadIdInGroup,
    InputThreadIdInGroupFlattened,
    InputCoverageMask,
    InputPrimitiveId,
    InputForkInstanceId,
    InputJoinInstanceId,
    InputGsInstanceId,
    InputDomainPoint,
    OutputControlPointId,
}

#[derive(Clone, PartialEq, Debug)]
pub struct SrcOperand {
    pub kind: SrcKind,
    pub swizzle: Swizzle,
    pub modifier: OperandModifier,
    pub data_type: DataType,
}

impl SrcOperand {
    pub fn new(kind: SrcKind) -> Self {
        SrcOperand {
            kind,
            swizzle: Swizzle::IDENTITY,
            modifier: OperandModifier::None,
            data_type: DataType::Unknown,
        }
    }

    pub fn imm_scalar(value: u32) -> Self {
        SrcOperand::new(SrcKind::Immediate32([value; 4]))
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum DstKind {
    Null,
    Temp { index: u32 },
    IndexableTemp { index: u32, offset: IndexExpr },
    Output { index: IndexExpr },
    OutputDepth,
    OutputDepthGreaterEqual,
    OutputDepthLessEqual,
    OutputCoverageMask,
    Uav { slot: u32 },
    Tgsm { slot: u32 },
}

#[derive(Clone, PartialEq, Debug)]
pub struct DstOperand {
    pub kind: DstKind,
    pub mask: WriteMask,
    pub saturate: bool,
    pub data_type: DataType,
}

impl DstOperand {
    pub fn new(kind: DstKind, mask: WriteMask) -> Self {
        DstOperand {
            kind,
            mask,
            saturate: false,
            data_type: DataType::Unknown,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, DstKind::Null)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FloatUnaryOp {
    Rcp,
    Rsq,
    Sqrt,
    Exp,
    Log,
    Frc,
    RoundNe,
    RoundNi,
    RoundPi,
    RoundZ,
    DerivRtx,
    DerivRty,
    DerivRtxCoarse,
    DerivRtxFine,
    DerivRtyCoarse,
    DerivRtyFine,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FloatBinaryOp {
    Add,
    Mul,
    Div,
    Max,
    Min,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FloatCompareOp {
    Eq,
    Ne,
    Lt,
    Ge,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntCompareOp {
    Eq,
    Ne,
    Slt,
    Sge,
    Ult,
    Uge,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntUnaryOp {
    Neg,
    Not,
    ReverseBits,
    CountBits,
    FirstBitHi,
    FirstBitLo,
    FirstBitShi,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntBinaryOp {
    Add,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Min,
    Max,
    UMin,
    UMax,
}

/// `imul`/`umul`/`udiv`/`uaddc`/`usubb`: two destinations.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntBinaryOp2Dst {
    IMul,
    UMul,
    UDiv,
    UAddCarry,
    USubBorrow,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConvertOp {
    FloatToSigned,
    FloatToUnsigned,
    SignedToFloat,
    UnsignedToFloat,
    F32ToF16,
    F16ToF32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AtomicBinOp {
    And,
    Or,
    Xor,
    Add,
    SMax,
    SMin,
    UMax,
    UMin,
    Exchange,
}

bitflags::bitflags! {
    /// `sync` instruction flag bits.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct SyncFlags: u32 {
        const THREADS_IN_GROUP = 1;
        const TGSM = 2;
        const UAV_GROUP = 4;
        const UAV_GLOBAL = 8;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TessDomain {
    Isoline,
    Triangle,
    Quad,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TessPartitioning {
    Integer,
    Pow2,
    FractionalOdd,
    FractionalEven,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TessOutputPrimitive {
    Point,
    Line,
    TriangleCw,
    TriangleCcw,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SampledReturnType {
    Float,
    Unorm,
    Snorm,
    Sint,
    Uint,
}

/// Resource shape from `dcl_resource` / `dcl_uav_typed`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResourceDimension {
    Buffer,
    Texture1d,
    Texture1dArray,
    Texture2d,
    Texture2dArray,
    Texture2dMs,
    Texture2dMsArray,
    Texture3d,
    TextureCube,
    TextureCubeArray,
    RawBuffer,
    StructuredBuffer,
}

#[derive(Clone, PartialEq, Debug)]
pub enum Decl {
    GlobalFlags { flags: u32 },
    Temps { count: u32 },
    IndexableTemp { index: u32, len: u32, components: u32 },
    ConstantBuffer { slot: u32, size_in_vec4: u32, dynamic_indexed: bool },
    Sampler { slot: u32, comparison: bool },
    Resource { slot: u32, dimension: ResourceDimension, return_type: SampledReturnType, sample_count: u32 },
    ResourceRaw { slot: u32 },
    ResourceStructured { slot: u32, stride: u32 },
    UavTyped { slot: u32, dimension: ResourceDimension, return_type: SampledReturnType, globally_coherent: bool },
    UavRaw { slot: u32, globally_coherent: bool, has_counter: bool },
    UavStructured { slot: u32, stride: u32, globally_coherent: bool, has_counter: bool },
    TgsmRaw { slot: u32, byte_count: u32 },
    TgsmStructured { slot: u32, stride: u32, count: u32 },
    Input { operand: SrcOperand },
    InputSiv { operand: SrcOperand, system_value: u32 },
    InputPs { operand: SrcOperand, interpolation: u32 },
    InputPsSiv { operand: SrcOperand, system_value: u32, interpolation: u32 },
    Output { operand: DstOperand },
    OutputSiv { operand: DstOperand, system_value: u32 },
    IndexRange { start: u32, count: u32 },
    ThreadGroup { x: u32, y: u32, z: u32 },
    ImmediateConstantBuffer { data: Vec<[u32; 4]> },
    InputControlPointCount { count: u32 },
    OutputControlPointCount { count: u32 },
    TessDomain { domain: TessDomain },
    TessPartitioning { partitioning: TessPartitioning },
    TessOutputPrimitive { primitive: TessOutputPrimitive },
    MaxTessFactor { factor: f32 },
    ForkInstanceCount { count: u32 },
    JoinInstanceCount { count: u32 },
    /// Geometry-stage declarations are decoded but the stage itself is not
    /// translated.
    GsUnsupported { opcode: u32 },
}

#[derive(Clone, PartialEq, Debug)]
pub enum Inst {
    Nop,
    Mov { dst: DstOperand, src: SrcOperand },
    MovC { dst: DstOperand, cond: SrcOperand, a: SrcOperand, b: SrcOperand },
    SwapC { dst0: DstOperand, dst1: DstOperand, cond: SrcOperand, a: SrcOperand, b: SrcOperand },
    DotProduct { dim: u8, dst: DstOperand, a: SrcOperand, b: SrcOperand },
    FloatUnary { op: FloatUnaryOp, dst: DstOperand, src: SrcOperand },
    FloatBinary { op: FloatBinaryOp, dst: DstOperand, a: SrcOperand, b: SrcOperand },
    FloatMad { dst: DstOperand, a: SrcOperand, b: SrcOperand, c: SrcOperand },
    SinCos { dst_sin: DstOperand, dst_cos: DstOperand, src: SrcOperand },
    FloatCompare { op: FloatCompareOp, dst: DstOperand, a: SrcOperand, b: SrcOperand },
    IntCompare { op: IntCompareOp, dst: DstOperand, a: SrcOperand, b: SrcOperand },
    IntUnary { op: IntUnaryOp, dst: DstOperand, src: SrcOperand },
    IntBinary { op: IntBinaryOp, dst: DstOperand, a: SrcOperand, b: SrcOperand },
    IntBinary2Dst { op: IntBinaryOp2Dst, dst_hi: DstOperand, dst_lo: DstOperand, a: SrcOperand, b: SrcOperand },
    IntMad { dst: DstOperand, a: SrcOperand, b: SrcOperand, c: SrcOperand, signed: bool },
    Convert { op: ConvertOp, dst: DstOperand, src: SrcOperand },
    ExtractBits { signed: bool, dst: DstOperand, width: SrcOperand, offset: SrcOperand, src: SrcOperand },
    BitfieldInsert { dst: DstOperand, width: SrcOperand, offset: SrcOperand, insert: SrcOperand, base: SrcOperand },

    Sample { dst: DstOperand, coord: SrcOperand, resource: SrcOperand, sampler: SrcOperand, offset: [i32; 3] },
    SampleBias { dst: DstOperand, coord: SrcOperand, resource: SrcOperand, sampler: SrcOperand, bias: SrcOperand, offset: [i32; 3] },
    SampleLod { dst: DstOperand, coord: SrcOperand, resource: SrcOperand, sampler: SrcOperand, lod: SrcOperand, offset: [i32; 3] },
    SampleGrad { dst: DstOperand, coord: SrcOperand, resource: SrcOperand, sampler: SrcOperand, ddx: SrcOperand, ddy: SrcOperand, offset: [i32; 3] },
    SampleCompare { dst: DstOperand, coord: SrcOperand, resource: SrcOperand, sampler: SrcOperand, reference: SrcOperand, level_zero: bool, offset: [i32; 3] },
    Gather { dst: DstOperand, coord: SrcOperand, resource: SrcOperand, sampler: SrcOperand, offset: [i32; 3] },
    GatherCompare { dst: DstOperand, coord: SrcOperand, resource: SrcOperand, sampler: SrcOperand, reference: SrcOperand, offset: [i32; 3] },
    CalcLod { dst: DstOperand, coord: SrcOperand, resource: SrcOperand, sampler: SrcOperand },
    Ld { dst: DstOperand, address: SrcOperand, resource: SrcOperand, offset: [i32; 3] },
    LdMs { dst: DstOperand, address: SrcOperand, resource: SrcOperand, sample_index: SrcOperand },
    ResInfo { dst: DstOperand, mip_level: SrcOperand, resource: SrcOperand, uint_result: bool },
    SampleInfo { dst: DstOperand, resource: Option<SrcOperand>, uint_result: bool },
    SamplePos { dst: DstOperand, resource: Option<SrcOperand>, sample_index: SrcOperand },
    BufInfo { dst: DstOperand, resource: SrcOperand },

    LdUavTyped { dst: DstOperand, address: SrcOperand, uav: SrcOperand },
    StoreUavTyped { uav: DstOperand, address: SrcOperand, value: SrcOperand },
    LdRaw { dst: DstOperand, byte_offset: SrcOperand, resource: SrcOperand },
    StoreRaw { dst: DstOperand, byte_offset: SrcOperand, value: SrcOperand },
    LdStructured { dst: DstOperand, index: SrcOperand, byte_offset: SrcOperand, resource: SrcOperand },
    StoreStructured { dst: DstOperand, index: SrcOperand, byte_offset: SrcOperand, value: SrcOperand },

    /// Fire-and-forget atomic: `atomic_*` with a UAV/TGSM destination.
    AtomicBinOp { op: AtomicBinOp, dst: DstOperand, address: SrcOperand, value: SrcOperand },
    /// `imm_atomic_*`: like `AtomicBinOp` but the prior value lands in
    /// `result`.
    ImmAtomicBinOp { op: AtomicBinOp, result: DstOperand, dst: DstOperand, address: SrcOperand, value: SrcOperand },
    AtomicCmpStore { dst: DstOperand, address: SrcOperand, compare: SrcOperand, value: SrcOperand },
    ImmAtomicCmpExch { result: DstOperand, dst: DstOperand, address: SrcOperand, compare: SrcOperand, value: SrcOperand },
    ImmAtomicAlloc { result: DstOperand, uav: DstOperand },
    ImmAtomicConsume { result: DstOperand, uav: DstOperand },

    EvalSnapped { dst: DstOperand, interpolant: SrcOperand, offset: SrcOperand },
    EvalSampleIndex { dst: DstOperand, interpolant: SrcOperand, sample_index: SrcOperand },
    EvalCentroid { dst: DstOperand, interpolant: SrcOperand },

    Discard { nonzero: bool, src: SrcOperand },
    Sync { flags: SyncFlags },

    /* Structured control flow; consumed by CFG recovery. */
    If { nonzero: bool, src: SrcOperand },
    Else,
    EndIf,
    Loop,
    EndLoop,
    Break,
    BreakC { nonzero: bool, src: SrcOperand },
    Continue,
    ContinueC { nonzero: bool, src: SrcOperand },
    Switch { src: SrcOperand },
    Case { value: u32 },
    Default,
    EndSwitch,
    Ret,
    RetC { nonzero: bool, src: SrcOperand },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PhaseKind {
    Main,
    /// Hull-stage declarations outside any phase.
    HullDecls,
    HullControlPoint,
    HullFork,
    HullJoin,
}

/// One stage-internal subprogram. Non-hull stages have exactly one `Main`
/// phase; hull shaders get one phase per phase marker, in program order.
#[derive(Clone, Debug)]
pub struct Phase {
    pub kind: PhaseKind,
    pub instance_count: u32,
    pub decls: Vec<Decl>,
    pub insts: Vec<Inst>,
    /// Number of temps declared by `dcl_temps`, before splitting.
    pub declared_temps: u32,
}

impl Phase {
    pub fn new(kind: PhaseKind) -> Self {
        Phase {
            kind,
            instance_count: 1,
            decls: Vec::new(),
            insts: Vec::new(),
            declared_temps: 0,
        }
    }
}

/// A fully decoded shader program plus its reflection chunks.
#[derive(Debug)]
pub struct Shader {
    pub stage: ShaderStage,
    pub version: (u32, u32),
    pub phases: Vec<Phase>,
    pub input_signature: Signature,
    pub output_signature: Signature,
    pub patch_constant_signature: Signature,
    pub rdef: Option<RdefChunk>,
}

impl Shader {
    pub fn main_phase(&self) -> &Phase {
        self.phases
            .iter()
            .find(|p| p.kind == PhaseKind::Main)
            .expect("non-hull shader must have a main phase")
    }

    pub fn main_phase_mut(&mut self) -> &mut Phase {
        self.phases
            .iter_mut()
            .find(|p| p.kind == PhaseKind::Main)
            .expect("non-hull shader must have a main phase")
    }

    /// Searches all phases for a declaration matching `select`.
    pub fn find_decl<'a, T>(&'a self, select: impl Fn(&'a Decl) -> Option<T>) -> Option<T> {
        self.phases
            .iter()
            .flat_map(|p| p.decls.iter())
            .find_map(select)
    }
}
