//! SM5 token-stream decoder: raw dwords in, typed [`Phase`]s out.
//!
//! The decoder performs no rewriting; it only validates token structure
//! (lengths, operand shapes, index representations) and classifies
//! operands. Unknown opcodes fail with `Unsupported`, structural problems
//! with `Malformed`.

use super::opcode::*;
use super::{
    AtomicBinOp, ConvertOp, DataType, Decl, DstKind, DstOperand, FloatBinaryOp, FloatCompareOp,
    FloatUnaryOp, IndexExpr, Inst, IntBinaryOp, IntBinaryOp2Dst, IntCompareOp, IntUnaryOp,
    OperandModifier, Phase, PhaseKind, ResourceDimension, SampledReturnType, ShaderStage,
    SrcKind, SrcOperand, Swizzle, SyncFlags, TessDomain, TessOutputPrimitive, TessPartitioning,
    WriteMask,
};
use crate::TranslateError;

const OPCODE_CUSTOMDATA: u32 = 106;
const CUSTOMDATA_CLASS_ICB: u32 = 3;

#[derive(Debug)]
pub struct DecodedProgram {
    pub stage: ShaderStage,
    pub version: (u32, u32),
    pub phases: Vec<Phase>,
}

/// Reassembles the chunk bytes into little-endian dwords.
pub fn program_tokens(bytes: &[u8]) -> Result<Vec<u32>, TranslateError> {
    if bytes.len() % 4 != 0 {
        return Err(TranslateError::Malformed(format!(
            "program chunk length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

struct TokenReader<'a> {
    tokens: &'a [u32],
    pos: usize,
}

impl<'a> TokenReader<'a> {
    fn next(&mut self) -> Result<u32, TranslateError> {
        let token = self
            .tokens
            .get(self.pos)
            .copied()
            .ok_or_else(|| TranslateError::Malformed("token stream overrun".to_string()))?;
        self.pos += 1;
        Ok(token)
    }

    fn done(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

pub fn decode_program(tokens: &[u32]) -> Result<DecodedProgram, TranslateError> {
    let mut reader = TokenReader { tokens, pos: 0 };

    let version = reader.next()?;
    let stage = match version >> VERSION_TYPE_SHIFT {
        STAGE_PIXEL => ShaderStage::Pixel,
        STAGE_VERTEX => ShaderStage::Vertex,
        STAGE_GEOMETRY => ShaderStage::Geometry,
        STAGE_HULL => ShaderStage::Hull,
        STAGE_DOMAIN => ShaderStage::Domain,
        STAGE_COMPUTE => ShaderStage::Compute,
        other => {
            return Err(TranslateError::Unsupported(format!(
                "shader stage type {other}"
            )));
        }
    };
    let major = (version >> VERSION_MAJOR_SHIFT) & VERSION_MAJOR_MASK;
    let minor = version & VERSION_MINOR_MASK;
    if major != 4 && major != 5 {
        return Err(TranslateError::Unsupported(format!(
            "shader model {major}.{minor}"
        )));
    }

    let declared_len = reader.next()? as usize;
    if declared_len != tokens.len() {
        return Err(TranslateError::Malformed(format!(
            "program declares {declared_len} dwords but chunk holds {}",
            tokens.len()
        )));
    }

    tracing::debug!(?stage, major, minor, dwords = tokens.len(), "decoding program");

    let mut decoder = Decoder {
        reader,
        stage,
        phases: Vec::new(),
        current: Phase::new(if stage == ShaderStage::Hull {
            PhaseKind::HullDecls
        } else {
            PhaseKind::Main
        }),
    };
    decoder.run()?;

    let mut phases = decoder.phases;
    phases.push(decoder.current);
    if stage == ShaderStage::Hull {
        // Storage order: global declarations, fork phases, join phases,
        // then control-point phases.
        phases.sort_by_key(|phase| match phase.kind {
            PhaseKind::HullDecls => 0,
            PhaseKind::HullFork => 1,
            PhaseKind::HullJoin => 2,
            PhaseKind::HullControlPoint => 3,
            PhaseKind::Main => 4,
        });
    }

    Ok(DecodedProgram {
        stage,
        version: (major, minor),
        phases,
    })
}

struct Decoder<'a> {
    reader: TokenReader<'a>,
    stage: ShaderStage,
    phases: Vec<Phase>,
    current: Phase,
}

impl<'a> Decoder<'a> {
    fn run(&mut self) -> Result<(), TranslateError> {
        while !self.reader.done() {
            self.decode_one()?;
        }
        Ok(())
    }

    fn begin_phase(&mut self, kind: PhaseKind) {
        let previous = std::mem::replace(&mut self.current, Phase::new(kind));
        self.phases.push(previous);
    }

    fn decode_one(&mut self) -> Result<(), TranslateError> {
        let start = self.reader.pos;
        let opcode_token = self.reader.next()?;
        let opcode = opcode_token & OPCODE_MASK;

        if opcode == OPCODE_CUSTOMDATA {
            return self.decode_customdata(opcode_token, start);
        }

        let len = ((opcode_token >> OPCODE_LEN_SHIFT) & OPCODE_LEN_MASK) as usize;
        if len == 0 {
            return Err(TranslateError::Malformed(format!(
                "instruction with zero length at dword {start}"
            )));
        }
        let end = start + len;
        if end > self.reader.tokens.len() {
            return Err(TranslateError::Malformed(format!(
                "instruction at dword {start} runs past end of program"
            )));
        }

        // Extended opcode tokens: sample offsets and resource info.
        let mut sample_offset = [0i32; 3];
        let mut extended = opcode_token & OPCODE_EXTENDED_BIT != 0;
        while extended {
            let ext = self.reader.next()?;
            if ext & EXTENDED_OPCODE_TYPE_MASK == EXTENDED_OPCODE_SAMPLE_CONTROLS {
                let sext4 = |v: u32| -> i32 { ((v & 0xf) as i32) << 28 >> 28 };
                sample_offset = [
                    sext4(ext >> SAMPLE_CONTROLS_U_SHIFT),
                    sext4(ext >> SAMPLE_CONTROLS_V_SHIFT),
                    sext4(ext >> SAMPLE_CONTROLS_W_SHIFT),
                ];
            }
            extended = ext & OPERAND_EXTENDED_BIT != 0;
        }

        match opcode {
            /* Phase markers */
            OPCODE_HS_DECLS => {}
            OPCODE_HS_CONTROL_POINT_PHASE => self.begin_phase(PhaseKind::HullControlPoint),
            OPCODE_HS_FORK_PHASE => self.begin_phase(PhaseKind::HullFork),
            OPCODE_HS_JOIN_PHASE => self.begin_phase(PhaseKind::HullJoin),

            /* Declarations */
            OPCODE_DCL_GLOBAL_FLAGS => {
                self.current.decls.push(Decl::GlobalFlags { flags: opcode_token >> 11 });
            }
            OPCODE_DCL_TEMPS => {
                let count = self.reader.next()?;
                self.current.declared_temps = count;
                self.current.decls.push(Decl::Temps { count });
            }
            OPCODE_DCL_INDEXABLE_TEMP => {
                let index = self.reader.next()?;
                let len = self.reader.next()?;
                let components = self.reader.next()?;
                self.current.decls.push(Decl::IndexableTemp { index, len, components });
            }
            OPCODE_DCL_CONSTANT_BUFFER => {
                let dynamic_indexed = (opcode_token >> 11) & 1 != 0;
                let operand = self.decode_src()?;
                let (slot, size_in_vec4) = match &operand.kind {
                    SrcKind::ConstantBuffer { slot, index } => {
                        (*slot, index.as_imm().unwrap_or(0))
                    }
                    _ => {
                        return Err(TranslateError::Malformed(
                            "dcl_constantbuffer operand is not a cb".to_string(),
                        ));
                    }
                };
                self.current.decls.push(Decl::ConstantBuffer { slot, size_in_vec4, dynamic_indexed });
            }
            OPCODE_DCL_SAMPLER => {
                let comparison = (opcode_token >> 11) & 0xf == 1;
                let operand = self.decode_src()?;
                let SrcKind::Sampler { slot } = operand.kind else {
                    return Err(TranslateError::Malformed(
                        "dcl_sampler operand is not a sampler".to_string(),
                    ));
                };
                self.current.decls.push(Decl::Sampler { slot, comparison });
            }
            OPCODE_DCL_RESOURCE => {
                let dimension = decode_resource_dimension(opcode_token)?;
                let sample_count = (opcode_token >> 16) & 0x7f;
                let operand = self.decode_src()?;
                let SrcKind::Resource { slot } = operand.kind else {
                    return Err(TranslateError::Malformed(
                        "dcl_resource operand is not a resource".to_string(),
                    ));
                };
                let return_token = self.reader.next()?;
                self.current.decls.push(Decl::Resource {
                    slot,
                    dimension,
                    return_type: decode_return_type(return_token)?,
                    sample_count,
                });
            }
            OPCODE_DCL_RESOURCE_RAW => {
                let operand = self.decode_src()?;
                let SrcKind::Resource { slot } = operand.kind else {
                    return Err(TranslateError::Malformed(
                        "dcl_resource_raw operand is not a resource".to_string(),
                    ));
                };
                self.current.decls.push(Decl::ResourceRaw { slot });
            }
            OPCODE_DCL_RESOURCE_STRUCTURED => {
                let operand = self.decode_src()?;
                let SrcKind::Resource { slot } = operand.kind else {
                    return Err(TranslateError::Malformed(
                        "dcl_resource_structured operand is not a resource".to_string(),
                    ));
                };
                let stride = self.reader.next()?;
                self.current.decls.push(Decl::ResourceStructured { slot, stride });
            }
            OPCODE_DCL_UAV_TYPED => {
                let dimension = decode_resource_dimension(opcode_token)?;
                let globally_coherent = opcode_token & UAV_FLAG_GLOBALLY_COHERENT != 0;
                let operand = self.decode_src()?;
                let SrcKind::Uav { slot } = operand.kind else {
                    return Err(TranslateError::Malformed(
                        "dcl_uav_typed operand is not a uav".to_string(),
                    ));
                };
                let return_token = self.reader.next()?;
                self.current.decls.push(Decl::UavTyped {
                    slot,
                    dimension,
                    return_type: decode_return_type(return_token)?,
                    globally_coherent,
                });
            }
            OPCODE_DCL_UAV_RAW => {
                let globally_coherent = opcode_token & UAV_FLAG_GLOBALLY_COHERENT != 0;
                let has_counter = opcode_token & UAV_FLAG_HAS_COUNTER != 0;
                let operand = self.decode_src()?;
                let SrcKind::Uav { slot } = operand.kind else {
                    return Err(TranslateError::Malformed(
                        "dcl_uav_raw operand is not a uav".to_string(),
                    ));
                };
                self.current.decls.push(Decl::UavRaw { slot, globally_coherent, has_counter });
            }
            OPCODE_DCL_UAV_STRUCTURED => {
                let globally_coherent = opcode_token & UAV_FLAG_GLOBALLY_COHERENT != 0;
                let has_counter = opcode_token & UAV_FLAG_HAS_COUNTER != 0;
                let operand = self.decode_src()?;
                let SrcKind::Uav { slot } = operand.kind else {
                    return Err(TranslateError::Malformed(
                        "dcl_uav_structured operand is not a uav".to_string(),
                    ));
                };
                let stride = self.reader.next()?;
                self.current.decls.push(Decl::UavStructured {
                    slot,
                    stride,
                    globally_coherent,
                    has_counter,
                });
            }
            OPCODE_DCL_TGSM_RAW => {
                let operand = self.decode_src()?;
                let SrcKind::Tgsm { slot } = operand.kind else {
                    return Err(TranslateError::Malformed(
                        "dcl_tgsm_raw operand is not tgsm".to_string(),
                    ));
                };
                let byte_count = self.reader.next()?;
                self.current.decls.push(Decl::TgsmRaw { slot, byte_count });
            }
            OPCODE_DCL_TGSM_STRUCTURED => {
                let operand = self.decode_src()?;
                let SrcKind::Tgsm { slot } = operand.kind else {
                    return Err(TranslateError::Malformed(
                        "dcl_tgsm_structured operand is not tgsm".to_string(),
                    ));
                };
                let stride = self.reader.next()?;
                let count = self.reader.next()?;
                self.current.decls.push(Decl::TgsmStructured { slot, stride, count });
            }
            OPCODE_DCL_INPUT => {
                let operand = self.decode_src()?;
                self.current.decls.push(Decl::Input { operand });
            }
            OPCODE_DCL_INPUT_SGV | OPCODE_DCL_INPUT_SIV => {
                let operand = self.decode_src()?;
                let system_value = self.reader.next()?;
                self.current.decls.push(Decl::InputSiv { operand, system_value });
            }
            OPCODE_DCL_INPUT_PS => {
                let interpolation = (opcode_token >> INTERPOLATION_SHIFT) & INTERPOLATION_MASK;
                let operand = self.decode_src()?;
                self.current.decls.push(Decl::InputPs { operand, interpolation });
            }
            OPCODE_DCL_INPUT_PS_SGV | OPCODE_DCL_INPUT_PS_SIV => {
                let interpolation = (opcode_token >> INTERPOLATION_SHIFT) & INTERPOLATION_MASK;
                let operand = self.decode_src()?;
                let system_value = self.reader.next()?;
                self.current.decls.push(Decl::InputPsSiv { operand, system_value, interpolation });
            }
            OPCODE_DCL_OUTPUT => {
                let operand = self.decode_dst()?;
                self.current.decls.push(Decl::Output { operand });
            }
            OPCODE_DCL_OUTPUT_SGV | OPCODE_DCL_OUTPUT_SIV => {
                let operand = self.decode_dst()?;
                let system_value = self.reader.next()?;
                self.current.decls.push(Decl::OutputSiv { operand, system_value });
            }
            OPCODE_DCL_INDEX_RANGE => {
                let operand = self.decode_src()?;
                let count = self.reader.next()?;
                let start_reg = match &operand.kind {
                    SrcKind::Input { index } | SrcKind::PatchConstant { index } => {
                        index.as_imm().unwrap_or(0)
                    }
                    SrcKind::Temp { index } => *index,
                    _ => 0,
                };
                self.current.decls.push(Decl::IndexRange { start: start_reg, count });
            }
            OPCODE_DCL_THREAD_GROUP => {
                let x = self.reader.next()?;
                let y = self.reader.next()?;
                let z = self.reader.next()?;
                self.current.decls.push(Decl::ThreadGroup { x, y, z });
            }
            OPCODE_DCL_INPUT_CONTROL_POINT_COUNT => {
                let count = (opcode_token >> CONTROL_POINT_COUNT_SHIFT) & CONTROL_POINT_COUNT_MASK;
                self.current.decls.push(Decl::InputControlPointCount { count });
            }
            OPCODE_DCL_OUTPUT_CONTROL_POINT_COUNT => {
                let count = (opcode_token >> CONTROL_POINT_COUNT_SHIFT) & CONTROL_POINT_COUNT_MASK;
                self.current.decls.push(Decl::OutputControlPointCount { count });
            }
            OPCODE_DCL_TESS_DOMAIN => {
                let domain = match (opcode_token >> TESS_DOMAIN_SHIFT) & TESS_DOMAIN_MASK {
                    TESS_DOMAIN_ISOLINE => TessDomain::Isoline,
                    TESS_DOMAIN_TRI => TessDomain::Triangle,
                    TESS_DOMAIN_QUAD => TessDomain::Quad,
                    other => {
                        return Err(TranslateError::Malformed(format!(
                            "undefined tessellator domain {other}"
                        )));
                    }
                };
                self.current.decls.push(Decl::TessDomain { domain });
            }
            OPCODE_DCL_TESS_PARTITIONING => {
                let partitioning =
                    match (opcode_token >> TESS_PARTITIONING_SHIFT) & TESS_PARTITIONING_MASK {
                        TESS_PARTITIONING_INTEGER => TessPartitioning::Integer,
                        TESS_PARTITIONING_POW2 => TessPartitioning::Pow2,
                        TESS_PARTITIONING_FRACTIONAL_ODD => TessPartitioning::FractionalOdd,
                        TESS_PARTITIONING_FRACTIONAL_EVEN => TessPartitioning::FractionalEven,
                        other => {
                            return Err(TranslateError::Malformed(format!(
                                "undefined tessellator partitioning {other}"
                            )));
                        }
                    };
                self.current.decls.push(Decl::TessPartitioning { partitioning });
            }
            OPCODE_DCL_TESS_OUTPUT_PRIMITIVE => {
                let primitive = match (opcode_token >> TESS_OUTPUT_PRIMITIVE_SHIFT)
                    & TESS_OUTPUT_PRIMITIVE_MASK
                {
                    TESS_OUTPUT_POINT => TessOutputPrimitive::Point,
                    TESS_OUTPUT_LINE => TessOutputPrimitive::Line,
                    TESS_OUTPUT_TRIANGLE_CW => TessOutputPrimitive::TriangleCw,
                    TESS_OUTPUT_TRIANGLE_CCW => TessOutputPrimitive::TriangleCcw,
                    other => {
                        return Err(TranslateError::Malformed(format!(
                            "undefined tessellator output primitive {other}"
                        )));
                    }
                };
                self.current.decls.push(Decl::TessOutputPrimitive { primitive });
            }
            OPCODE_DCL_HS_MAX_TESSFACTOR => {
                let factor = f32::from_bits(self.reader.next()?);
                self.current.decls.push(Decl::MaxTessFactor { factor });
            }
            OPCODE_DCL_HS_FORK_PHASE_INSTANCE_COUNT => {
                let count = self.reader.next()?;
                self.current.instance_count = count.max(1);
                self.current.decls.push(Decl::ForkInstanceCount { count });
            }
            OPCODE_DCL_HS_JOIN_PHASE_INSTANCE_COUNT => {
                let count = self.reader.next()?;
                self.current.instance_count = count.max(1);
                self.current.decls.push(Decl::JoinInstanceCount { count });
            }
            OPCODE_DCL_GS_INPUT_PRIMITIVE
            | OPCODE_DCL_GS_OUTPUT_PRIMITIVE_TOPOLOGY
            | OPCODE_DCL_MAX_OUTPUT_VERTEX_COUNT
            | OPCODE_DCL_GS_INSTANCE_COUNT
            | OPCODE_DCL_STREAM => {
                // The geometry stage decodes but never translates; keep
                // the declaration so the stage check can report it.
                self.reader.pos = end;
                self.current.decls.push(Decl::GsUnsupported { opcode });
            }

            /* Instructions */
            _ => {
                let inst = self.decode_inst(opcode, opcode_token, sample_offset)?;
                self.current.insts.push(inst);
            }
        }

        if self.reader.pos > end {
            return Err(TranslateError::Malformed(format!(
                "instruction at dword {start} decoded past its declared length"
            )));
        }
        // Trailing operand-padding dwords (e.g. SM5.1 extensions) are
        // skipped rather than rejected.
        self.reader.pos = end;
        Ok(())
    }

    fn decode_customdata(&mut self, token: u32, start: usize) -> Result<(), TranslateError> {
        let class = token >> 11;
        let len = self.reader.next()? as usize;
        if len < 2 || start + len > self.reader.tokens.len() {
            return Err(TranslateError::Malformed(format!(
                "custom-data block at dword {start} has bad length {len}"
            )));
        }
        if class == CUSTOMDATA_CLASS_ICB {
            let payload = &self.reader.tokens[start + 2..start + len];
            if payload.len() % 4 != 0 {
                return Err(TranslateError::Malformed(
                    "immediate constant buffer is not vec4-aligned".to_string(),
                ));
            }
            let data = payload
                .chunks_exact(4)
                .map(|c| [c[0], c[1], c[2], c[3]])
                .collect();
            self.current.decls.push(Decl::ImmediateConstantBuffer { data });
        }
        self.reader.pos = start + len;
        Ok(())
    }

    fn decode_inst(
        &mut self,
        opcode: u32,
        opcode_token: u32,
        offset: [i32; 3],
    ) -> Result<Inst, TranslateError> {
        let saturate = opcode_token & OPCODE_SAT_BIT != 0;
        let nonzero = opcode_token & OPCODE_TEST_NONZERO_BIT != 0;
        let dst = |d: &mut Self| -> Result<DstOperand, TranslateError> {
            let mut operand = d.decode_dst()?;
            operand.saturate = saturate;
            Ok(operand)
        };
        Ok(match opcode {
            OPCODE_NOP => Inst::Nop,
            OPCODE_MOV => Inst::Mov { dst: dst(self)?, src: self.decode_src()? },
            OPCODE_MOVC => Inst::MovC {
                dst: dst(self)?,
                cond: self.decode_src()?,
                a: self.decode_src()?,
                b: self.decode_src()?,
            },
            OPCODE_SWAPC => Inst::SwapC {
                dst0: dst(self)?,
                dst1: dst(self)?,
                cond: self.decode_src()?,
                a: self.decode_src()?,
                b: self.decode_src()?,
            },
            OPCODE_DP2 | OPCODE_DP3 | OPCODE_DP4 => Inst::DotProduct {
                dim: match opcode {
                    OPCODE_DP2 => 2,
                    OPCODE_DP3 => 3,
                    _ => 4,
                },
                dst: dst(self)?,
                a: self.decode_src()?,
                b: self.decode_src()?,
            },
            OPCODE_ADD | OPCODE_MUL | OPCODE_DIV | OPCODE_MAX | OPCODE_MIN => Inst::FloatBinary {
                op: match opcode {
                    OPCODE_ADD => FloatBinaryOp::Add,
                    OPCODE_MUL => FloatBinaryOp::Mul,
                    OPCODE_DIV => FloatBinaryOp::Div,
                    OPCODE_MAX => FloatBinaryOp::Max,
                    _ => FloatBinaryOp::Min,
                },
                dst: dst(self)?,
                a: self.decode_src()?,
                b: self.decode_src()?,
            },
            OPCODE_RCP | OPCODE_RSQ | OPCODE_SQRT | OPCODE_EXP | OPCODE_LOG | OPCODE_FRC
            | OPCODE_ROUND_NE | OPCODE_ROUND_NI | OPCODE_ROUND_PI | OPCODE_ROUND_Z
            | OPCODE_DERIV_RTX | OPCODE_DERIV_RTY | OPCODE_DERIV_RTX_COARSE
            | OPCODE_DERIV_RTX_FINE | OPCODE_DERIV_RTY_COARSE | OPCODE_DERIV_RTY_FINE => {
                Inst::FloatUnary {
                    op: match opcode {
                        OPCODE_RCP => FloatUnaryOp::Rcp,
                        OPCODE_RSQ => FloatUnaryOp::Rsq,
                        OPCODE_SQRT => FloatUnaryOp::Sqrt,
                        OPCODE_EXP => FloatUnaryOp::Exp,
                        OPCODE_LOG => FloatUnaryOp::Log,
                        OPCODE_FRC => FloatUnaryOp::Frc,
                        OPCODE_ROUND_NE => FloatUnaryOp::RoundNe,
                        OPCODE_ROUND_NI => FloatUnaryOp::RoundNi,
                        OPCODE_ROUND_PI => FloatUnaryOp::RoundPi,
                        OPCODE_ROUND_Z => FloatUnaryOp::RoundZ,
                        OPCODE_DERIV_RTX => FloatUnaryOp::DerivRtx,
                        OPCODE_DERIV_RTY => FloatUnaryOp::DerivRty,
                        OPCODE_DERIV_RTX_COARSE => FloatUnaryOp::DerivRtxCoarse,
                        OPCODE_DERIV_RTX_FINE => FloatUnaryOp::DerivRtxFine,
                        OPCODE_DERIV_RTY_COARSE => FloatUnaryOp::DerivRtyCoarse,
                        _ => FloatUnaryOp::DerivRtyFine,
                    },
                    dst: dst(self)?,
                    src: self.decode_src()?,
                }
            }
            OPCODE_MAD => Inst::FloatMad {
                dst: dst(self)?,
                a: self.decode_src()?,
                b: self.decode_src()?,
                c: self.decode_src()?,
            },
            OPCODE_SINCOS => Inst::SinCos {
                dst_sin: dst(self)?,
                dst_cos: dst(self)?,
                src: self.decode_src()?,
            },
            OPCODE_EQ | OPCODE_NE | OPCODE_LT | OPCODE_GE => Inst::FloatCompare {
                op: match opcode {
                    OPCODE_EQ => FloatCompareOp::Eq,
                    OPCODE_NE => FloatCompareOp::Ne,
                    OPCODE_LT => FloatCompareOp::Lt,
                    _ => FloatCompareOp::Ge,
                },
                dst: dst(self)?,
                a: self.decode_src()?,
                b: self.decode_src()?,
            },
            OPCODE_IEQ | OPCODE_INE | OPCODE_ILT | OPCODE_IGE | OPCODE_ULT | OPCODE_UGE => {
                Inst::IntCompare {
                    op: match opcode {
                        OPCODE_IEQ => IntCompareOp::Eq,
                        OPCODE_INE => IntCompareOp::Ne,
                        OPCODE_ILT => IntCompareOp::Slt,
                        OPCODE_IGE => IntCompareOp::Sge,
                        OPCODE_ULT => IntCompareOp::Ult,
                        _ => IntCompareOp::Uge,
                    },
                    dst: dst(self)?,
                    a: self.decode_src()?,
                    b: self.decode_src()?,
                }
            }
            OPCODE_INEG | OPCODE_NOT | OPCODE_BFREV | OPCODE_COUNTBITS | OPCODE_FIRSTBIT_HI
            | OPCODE_FIRSTBIT_LO | OPCODE_FIRSTBIT_SHI => Inst::IntUnary {
                op: match opcode {
                    OPCODE_INEG => IntUnaryOp::Neg,
                    OPCODE_NOT => IntUnaryOp::Not,
                    OPCODE_BFREV => IntUnaryOp::ReverseBits,
                    OPCODE_COUNTBITS => IntUnaryOp::CountBits,
                    OPCODE_FIRSTBIT_HI => IntUnaryOp::FirstBitHi,
                    OPCODE_FIRSTBIT_LO => IntUnaryOp::FirstBitLo,
                    _ => IntUnaryOp::FirstBitShi,
                },
                dst: dst(self)?,
                src: self.decode_src()?,
            },
            OPCODE_IADD | OPCODE_AND | OPCODE_OR | OPCODE_XOR | OPCODE_ISHL | OPCODE_ISHR
            | OPCODE_USHR | OPCODE_IMIN | OPCODE_IMAX | OPCODE_UMIN | OPCODE_UMAX => {
                Inst::IntBinary {
                    op: match opcode {
                        OPCODE_IADD => IntBinaryOp::Add,
                        OPCODE_AND => IntBinaryOp::And,
                        OPCODE_OR => IntBinaryOp::Or,
                        OPCODE_XOR => IntBinaryOp::Xor,
                        OPCODE_ISHL => IntBinaryOp::Shl,
                        OPCODE_ISHR => IntBinaryOp::ShrS,
                        OPCODE_USHR => IntBinaryOp::ShrU,
                        OPCODE_IMIN => IntBinaryOp::Min,
                        OPCODE_IMAX => IntBinaryOp::Max,
                        OPCODE_UMIN => IntBinaryOp::UMin,
                        _ => IntBinaryOp::UMax,
                    },
                    dst: dst(self)?,
                    a: self.decode_src()?,
                    b: self.decode_src()?,
                }
            }
            OPCODE_IMUL | OPCODE_UMUL | OPCODE_UDIV | OPCODE_UADDC | OPCODE_USUBB => {
                Inst::IntBinary2Dst {
                    op: match opcode {
                        OPCODE_IMUL => IntBinaryOp2Dst::IMul,
                        OPCODE_UMUL => IntBinaryOp2Dst::UMul,
                        OPCODE_UDIV => IntBinaryOp2Dst::UDiv,
                        OPCODE_UADDC => IntBinaryOp2Dst::UAddCarry,
                        _ => IntBinaryOp2Dst::USubBorrow,
                    },
                    dst_hi: dst(self)?,
                    dst_lo: dst(self)?,
                    a: self.decode_src()?,
                    b: self.decode_src()?,
                }
            }
            OPCODE_IMAD | OPCODE_UMAD => Inst::IntMad {
                dst: dst(self)?,
                a: self.decode_src()?,
                b: self.decode_src()?,
                c: self.decode_src()?,
                signed: opcode == OPCODE_IMAD,
            },
            OPCODE_FTOI | OPCODE_FTOU | OPCODE_ITOF | OPCODE_UTOF | OPCODE_F32TOF16
            | OPCODE_F16TOF32 => Inst::Convert {
                op: match opcode {
                    OPCODE_FTOI => ConvertOp::FloatToSigned,
                    OPCODE_FTOU => ConvertOp::FloatToUnsigned,
                    OPCODE_ITOF => ConvertOp::SignedToFloat,
                    OPCODE_UTOF => ConvertOp::UnsignedToFloat,
                    OPCODE_F32TOF16 => ConvertOp::F32ToF16,
                    _ => ConvertOp::F16ToF32,
                },
                dst: dst(self)?,
                src: self.decode_src()?,
            },
            OPCODE_UBFE | OPCODE_IBFE => Inst::ExtractBits {
                signed: opcode == OPCODE_IBFE,
                dst: dst(self)?,
                width: self.decode_src()?,
                offset: self.decode_src()?,
                src: self.decode_src()?,
            },
            OPCODE_BFI => Inst::BitfieldInsert {
                dst: dst(self)?,
                width: self.decode_src()?,
                offset: self.decode_src()?,
                insert: self.decode_src()?,
                base: self.decode_src()?,
            },

            OPCODE_SAMPLE => Inst::Sample {
                dst: dst(self)?,
                coord: self.decode_src()?,
                resource: self.decode_src()?,
                sampler: self.decode_src()?,
                offset,
            },
            OPCODE_SAMPLE_B => Inst::SampleBias {
                dst: dst(self)?,
                coord: self.decode_src()?,
                resource: self.decode_src()?,
                sampler: self.decode_src()?,
                bias: self.decode_src()?,
                offset,
            },
            OPCODE_SAMPLE_L => Inst::SampleLod {
                dst: dst(self)?,
                coord: self.decode_src()?,
                resource: self.decode_src()?,
                sampler: self.decode_src()?,
                lod: self.decode_src()?,
                offset,
            },
            OPCODE_SAMPLE_D => Inst::SampleGrad {
                dst: dst(self)?,
                coord: self.decode_src()?,
                resource: self.decode_src()?,
                sampler: self.decode_src()?,
                ddx: self.decode_src()?,
                ddy: self.decode_src()?,
                offset,
            },
            OPCODE_SAMPLE_C | OPCODE_SAMPLE_C_LZ => Inst::SampleCompare {
                dst: dst(self)?,
                coord: self.decode_src()?,
                resource: self.decode_src()?,
                sampler: self.decode_src()?,
                reference: self.decode_src()?,
                level_zero: opcode == OPCODE_SAMPLE_C_LZ,
                offset,
            },
            OPCODE_GATHER4 => Inst::Gather {
                dst: dst(self)?,
                coord: self.decode_src()?,
                resource: self.decode_src()?,
                sampler: self.decode_src()?,
                offset,
            },
            OPCODE_GATHER4_C => Inst::GatherCompare {
                dst: dst(self)?,
                coord: self.decode_src()?,
                resource: self.decode_src()?,
                sampler: self.decode_src()?,
                reference: self.decode_src()?,
                offset,
            },
            OPCODE_LOD => Inst::CalcLod {
                dst: dst(self)?,
                coord: self.decode_src()?,
                resource: self.decode_src()?,
                sampler: self.decode_src()?,
            },
            OPCODE_LD => Inst::Ld {
                dst: dst(self)?,
                address: self.decode_src()?,
                resource: self.decode_src()?,
                offset,
            },
            OPCODE_LD_MS => Inst::LdMs {
                dst: dst(self)?,
                address: self.decode_src()?,
                resource: self.decode_src()?,
                sample_index: self.decode_src()?,
            },
            OPCODE_RESINFO => Inst::ResInfo {
                // Return-type control in bits 11..12: 0 float, 2 uint.
                uint_result: (opcode_token >> 11) & 0x3 == 2,
                dst: dst(self)?,
                mip_level: self.decode_src()?,
                resource: self.decode_src()?,
            },
            OPCODE_SAMPLE_INFO => Inst::SampleInfo {
                uint_result: (opcode_token >> 11) & 0x1 != 0,
                dst: dst(self)?,
                resource: Some(self.decode_src()?),
            },
            OPCODE_SAMPLE_POS => Inst::SamplePos {
                dst: dst(self)?,
                resource: Some(self.decode_src()?),
                sample_index: self.decode_src()?,
            },
            OPCODE_BUFINFO => Inst::BufInfo { dst: dst(self)?, resource: self.decode_src()? },

            OPCODE_LD_UAV_TYPED => Inst::LdUavTyped {
                dst: dst(self)?,
                address: self.decode_src()?,
                uav: self.decode_src()?,
            },
            OPCODE_STORE_UAV_TYPED => Inst::StoreUavTyped {
                uav: dst(self)?,
                address: self.decode_src()?,
                value: self.decode_src()?,
            },
            OPCODE_LD_RAW => Inst::LdRaw {
                dst: dst(self)?,
                byte_offset: self.decode_src()?,
                resource: self.decode_src()?,
            },
            OPCODE_STORE_RAW => Inst::StoreRaw {
                dst: dst(self)?,
                byte_offset: self.decode_src()?,
                value: self.decode_src()?,
            },
            OPCODE_LD_STRUCTURED => Inst::LdStructured {
                dst: dst(self)?,
                index: self.decode_src()?,
                byte_offset: self.decode_src()?,
                resource: self.decode_src()?,
            },
            OPCODE_STORE_STRUCTURED => Inst::StoreStructured {
                dst: dst(self)?,
                index: self.decode_src()?,
                byte_offset: self.decode_src()?,
                value: self.decode_src()?,
            },

            OPCODE_ATOMIC_AND | OPCODE_ATOMIC_OR | OPCODE_ATOMIC_XOR | OPCODE_ATOMIC_IADD
            | OPCODE_ATOMIC_IMAX | OPCODE_ATOMIC_IMIN | OPCODE_ATOMIC_UMAX
            | OPCODE_ATOMIC_UMIN => Inst::AtomicBinOp {
                op: atomic_op_for(opcode),
                dst: dst(self)?,
                address: self.decode_src()?,
                value: self.decode_src()?,
            },
            OPCODE_IMM_ATOMIC_IADD | OPCODE_IMM_ATOMIC_AND | OPCODE_IMM_ATOMIC_OR
            | OPCODE_IMM_ATOMIC_XOR | OPCODE_IMM_ATOMIC_EXCH | OPCODE_IMM_ATOMIC_IMAX
            | OPCODE_IMM_ATOMIC_IMIN | OPCODE_IMM_ATOMIC_UMAX | OPCODE_IMM_ATOMIC_UMIN => {
                Inst::ImmAtomicBinOp {
                    op: atomic_op_for(opcode),
                    result: dst(self)?,
                    dst: dst(self)?,
                    address: self.decode_src()?,
                    value: self.decode_src()?,
                }
            }
            OPCODE_ATOMIC_CMP_STORE => Inst::AtomicCmpStore {
                dst: dst(self)?,
                address: self.decode_src()?,
                compare: self.decode_src()?,
                value: self.decode_src()?,
            },
            OPCODE_IMM_ATOMIC_CMP_EXCH => Inst::ImmAtomicCmpExch {
                result: dst(self)?,
                dst: dst(self)?,
                address: self.decode_src()?,
                compare: self.decode_src()?,
                value: self.decode_src()?,
            },
            OPCODE_IMM_ATOMIC_ALLOC => Inst::ImmAtomicAlloc {
                result: dst(self)?,
                uav: dst(self)?,
            },
            OPCODE_IMM_ATOMIC_CONSUME => Inst::ImmAtomicConsume {
                result: dst(self)?,
                uav: dst(self)?,
            },

            OPCODE_EVAL_SNAPPED => Inst::EvalSnapped {
                dst: dst(self)?,
                interpolant: self.decode_src()?,
                offset: self.decode_src()?,
            },
            OPCODE_EVAL_SAMPLE_INDEX => Inst::EvalSampleIndex {
                dst: dst(self)?,
                interpolant: self.decode_src()?,
                sample_index: self.decode_src()?,
            },
            OPCODE_EVAL_CENTROID => Inst::EvalCentroid {
                dst: dst(self)?,
                interpolant: self.decode_src()?,
            },

            OPCODE_DISCARD => Inst::Discard { nonzero, src: self.decode_src()? },
            OPCODE_SYNC => {
                let mut flags = SyncFlags::empty();
                if opcode_token & SYNC_THREADS_IN_GROUP != 0 {
                    flags |= SyncFlags::THREADS_IN_GROUP;
                }
                if opcode_token & SYNC_TGSM != 0 {
                    flags |= SyncFlags::TGSM;
                }
                if opcode_token & SYNC_UAV_GROUP != 0 {
                    flags |= SyncFlags::UAV_GROUP;
                }
                if opcode_token & SYNC_UAV_GLOBAL != 0 {
                    flags |= SyncFlags::UAV_GLOBAL;
                }
                Inst::Sync { flags }
            }

            OPCODE_IF => Inst::If { nonzero, src: self.decode_src()? },
            OPCODE_ELSE => Inst::Else,
            OPCODE_ENDIF => Inst::EndIf,
            OPCODE_LOOP => Inst::Loop,
            OPCODE_ENDLOOP => Inst::EndLoop,
            OPCODE_BREAK => Inst::Break,
            OPCODE_BREAKC => Inst::BreakC { nonzero, src: self.decode_src()? },
            OPCODE_CONTINUE => Inst::Continue,
            OPCODE_CONTINUEC => Inst::ContinueC { nonzero, src: self.decode_src()? },
            OPCODE_SWITCH => Inst::Switch { src: self.decode_src()? },
            OPCODE_CASE => {
                let operand = self.decode_src()?;
                let SrcKind::Immediate32(values) = operand.kind else {
                    return Err(TranslateError::Malformed(
                        "case label is not an immediate".to_string(),
                    ));
                };
                Inst::Case { value: values[0] }
            }
            OPCODE_DEFAULT => Inst::Default,
            OPCODE_ENDSWITCH => Inst::EndSwitch,
            OPCODE_RET => Inst::Ret,
            OPCODE_RETC => Inst::RetC { nonzero, src: self.decode_src()? },

            OPCODE_EMIT | OPCODE_CUT | OPCODE_EMITTHENCUT | OPCODE_EMIT_STREAM
            | OPCODE_CUT_STREAM | OPCODE_EMITTHENCUT_STREAM => {
                return Err(TranslateError::Unsupported(
                    "geometry shader stream output".to_string(),
                ));
            }
            OPCODE_CALL | OPCODE_CALLC | OPCODE_LABEL | OPCODE_INTERFACE_CALL => {
                return Err(TranslateError::Unsupported(
                    "interface/subroutine calls".to_string(),
                ));
            }
            OPCODE_GATHER4_PO | OPCODE_GATHER4_PO_C => {
                return Err(TranslateError::Unsupported(
                    "programmable-offset gather".to_string(),
                ));
            }
            other => {
                return Err(TranslateError::Unsupported(format!("opcode {other}")));
            }
        })
    }

    fn decode_src(&mut self) -> Result<SrcOperand, TranslateError> {
        let raw = self.decode_raw_operand()?;
        self.classify_src(raw)
    }

    fn decode_dst(&mut self) -> Result<DstOperand, TranslateError> {
        let raw = self.decode_raw_operand()?;
        self.classify_dst(raw)
    }

    fn decode_raw_operand(&mut self) -> Result<RawOperand, TranslateError> {
        let token = self.reader.next()?;
        let num_components = token & OPERAND_NUM_COMPONENTS_MASK;
        let selection_mode = (token >> OPERAND_SELECTION_MODE_SHIFT) & OPERAND_SELECTION_MODE_MASK;
        let component_sel =
            (token >> OPERAND_COMPONENT_SELECTION_SHIFT) & OPERAND_COMPONENT_SELECTION_MASK;
        let ty = (token >> OPERAND_TYPE_SHIFT) & OPERAND_TYPE_MASK;
        let index_dim = (token >> OPERAND_INDEX_DIMENSION_SHIFT) & OPERAND_INDEX_DIMENSION_MASK;

        let mut modifier = OperandModifier::None;
        let mut extended = token & OPERAND_EXTENDED_BIT != 0;
        while extended {
            let ext = self.reader.next()?;
            if ext & EXTENDED_OPERAND_TYPE_MASK == EXTENDED_OPERAND_MODIFIER {
                modifier = match (ext >> OPERAND_MODIFIER_SHIFT) & OPERAND_MODIFIER_MASK {
                    0 => OperandModifier::None,
                    1 => OperandModifier::Neg,
                    2 => OperandModifier::Abs,
                    3 => OperandModifier::AbsNeg,
                    other => {
                        return Err(TranslateError::Malformed(format!(
                            "unknown operand modifier {other}"
                        )));
                    }
                };
            }
            extended = ext & OPERAND_EXTENDED_BIT != 0;
        }

        // Immediates carry their payload instead of indices.
        if ty == OPERAND_TYPE_IMMEDIATE32 {
            let values = match num_components {
                1 => {
                    let v = self.reader.next()?;
                    [v; 4]
                }
                2 => [
                    self.reader.next()?,
                    self.reader.next()?,
                    self.reader.next()?,
                    self.reader.next()?,
                ],
                other => {
                    return Err(TranslateError::Malformed(format!(
                        "immediate operand with component code {other}"
                    )));
                }
            };
            return Ok(RawOperand {
                ty,
                num_components,
                selection_mode,
                component_sel,
                indices: Vec::new(),
                modifier,
                immediate: values,
            });
        }
        if ty == OPERAND_TYPE_IMMEDIATE64 {
            return Err(TranslateError::Unsupported(
                "64-bit immediate operands".to_string(),
            ));
        }

        let mut indices = Vec::with_capacity(index_dim as usize);
        let reps = [
            (token >> OPERAND_INDEX0_REP_SHIFT) & OPERAND_INDEX_REP_MASK,
            (token >> OPERAND_INDEX1_REP_SHIFT) & OPERAND_INDEX_REP_MASK,
            (token >> OPERAND_INDEX2_REP_SHIFT) & OPERAND_INDEX_REP_MASK,
        ];
        for &rep in reps.iter().take(index_dim as usize) {
            let index = match rep {
                OPERAND_INDEX_REP_IMMEDIATE32 => IndexExpr::Imm(self.reader.next()?),
                OPERAND_INDEX_REP_IMMEDIATE64 => {
                    // 64-bit indices: only the low dword is addressable.
                    let _hi = self.reader.next()?;
                    let lo = self.reader.next()?;
                    IndexExpr::Imm(lo)
                }
                OPERAND_INDEX_REP_RELATIVE => self.decode_relative_index(0)?,
                OPERAND_INDEX_REP_IMMEDIATE32_PLUS_RELATIVE => {
                    let offset = self.reader.next()?;
                    self.decode_relative_index(offset)?
                }
                other => {
                    return Err(TranslateError::Unsupported(format!(
                        "operand index representation {other}"
                    )));
                }
            };
            indices.push(index);
        }

        Ok(RawOperand {
            ty,
            num_components,
            selection_mode,
            component_sel,
            indices,
            modifier,
            immediate: [0; 4],
        })
    }

    /// Decodes the temp/indexable-temp sub-operand of a relative index.
    fn decode_relative_index(&mut self, offset: u32) -> Result<IndexExpr, TranslateError> {
        let token = self.reader.next()?;
        let ty = (token >> OPERAND_TYPE_SHIFT) & OPERAND_TYPE_MASK;
        let selection_mode = (token >> OPERAND_SELECTION_MODE_SHIFT) & OPERAND_SELECTION_MODE_MASK;
        let component = if selection_mode == OPERAND_SEL_SELECT1 {
            ((token >> OPERAND_COMPONENT_SELECTION_SHIFT) & 0x3) as u8
        } else {
            // Swizzle mode with a replicated lane.
            ((token >> OPERAND_COMPONENT_SELECTION_SHIFT) & 0x3) as u8
        };
        match ty {
            OPERAND_TYPE_TEMP => {
                let reg = self.reader.next()?;
                Ok(IndexExpr::Relative { reg, component, offset })
            }
            OPERAND_TYPE_INDEXABLE_TEMP => {
                let reg = self.reader.next()?;
                let inner = self.reader.next()?;
                Ok(IndexExpr::RelativeIndexable { reg, inner, component, offset })
            }
            other => Err(TranslateError::Unsupported(format!(
                "relative index through operand type {other}"
            ))),
        }
    }

    fn classify_src(&self, raw: RawOperand) -> Result<SrcOperand, TranslateError> {
        let swizzle = raw.swizzle();
        let modifier = raw.modifier;

        let index = |i: usize| -> Result<IndexExpr, TranslateError> {
            raw.indices.get(i).cloned().ok_or_else(|| {
                TranslateError::Malformed(format!(
                    "operand type {} missing index {i}",
                    raw.ty
                ))
            })
        };
        let imm_index = |i: usize| -> Result<u32, TranslateError> {
            match raw.indices.get(i) {
                Some(IndexExpr::Imm(value)) => Ok(*value),
                Some(_) => Err(TranslateError::Unsupported(format!(
                    "dynamic index on operand type {}",
                    raw.ty
                ))),
                None => Err(TranslateError::Malformed(format!(
                    "operand type {} missing index {i}",
                    raw.ty
                ))),
            }
        };

        let kind = match raw.ty {
            OPERAND_TYPE_TEMP => SrcKind::Temp { index: imm_index(0)? },
            OPERAND_TYPE_INDEXABLE_TEMP => SrcKind::IndexableTemp {
                index: imm_index(0)?,
                offset: index(1)?,
            },
            OPERAND_TYPE_INPUT => match raw.indices.len() {
                1 => SrcKind::Input { index: index(0)? },
                // 2D inputs address per-vertex data: v[vertex][reg].
                2 => SrcKind::InputControlPoint {
                    vertex: index(0)?,
                    reg: imm_index(1)?,
                },
                n => {
                    return Err(TranslateError::Malformed(format!(
                        "input operand with {n} indices"
                    )));
                }
            },
            OPERAND_TYPE_INPUT_CONTROL_POINT => SrcKind::InputControlPoint {
                vertex: index(0)?,
                reg: imm_index(1)?,
            },
            OPERAND_TYPE_OUTPUT_CONTROL_POINT => SrcKind::OutputControlPoint {
                vertex: index(0)?,
                reg: imm_index(1)?,
            },
            OPERAND_TYPE_INPUT_PATCH_CONSTANT => SrcKind::PatchConstant { index: index(0)? },
            OPERAND_TYPE_CONSTANT_BUFFER => match raw.indices.len() {
                2 => SrcKind::ConstantBuffer { slot: imm_index(0)?, index: index(1)? },
                // SM5.1: [range id][space-relative slot][element].
                3 => SrcKind::ConstantBuffer { slot: imm_index(0)?, index: index(2)? },
                n => {
                    return Err(TranslateError::Malformed(format!(
                        "constant buffer operand with {n} indices"
                    )));
                }
            },
            OPERAND_TYPE_IMMEDIATE_CONSTANT_BUFFER => {
                SrcKind::ImmediateConstantBuffer { index: index(0)? }
            }
            OPERAND_TYPE_IMMEDIATE32 => SrcKind::Immediate32(raw.immediate),
            OPERAND_TYPE_RESOURCE => SrcKind::Resource { slot: imm_index(0)? },
            OPERAND_TYPE_SAMPLER => SrcKind::Sampler { slot: imm_index(0)? },
            OPERAND_TYPE_UNORDERED_ACCESS_VIEW => SrcKind::Uav { slot: imm_index(0)? },
            OPERAND_TYPE_THREAD_GROUP_SHARED_MEMORY => SrcKind::Tgsm { slot: imm_index(0)? },
            OPERAND_TYPE_INPUT_THREAD_ID => SrcKind::InputThreadId,
            OPERAND_TYPE_INPUT_THREAD_GROUP_ID => SrcKind::InputThreadGroupId,
            OPERAND_TYPE_INPUT_THREAD_ID_IN_GROUP => SrcKind::InputThreadIdInGroup,
            OPERAND_TYPE_INPUT_THREAD_ID_IN_GROUP_FLATTENED => {
                SrcKind::InputThreadIdInGroupFlattened
            }
            OPERAND_TYPE_INPUT_COVERAGE_MASK => SrcKind::InputCoverageMask,
            OPERAND_TYPE_INPUT_PRIMITIVEID => SrcKind::InputPrimitiveId,
            OPERAND_TYPE_INPUT_FORK_INSTANCE_ID => SrcKind::InputForkInstanceId,
            OPERAND_TYPE_INPUT_JOIN_INSTANCE_ID => SrcKind::InputJoinInstanceId,
            OPERAND_TYPE_INPUT_GS_INSTANCE_ID => SrcKind::InputGsInstanceId,
            OPERAND_TYPE_INPUT_DOMAIN_POINT => SrcKind::InputDomainPoint,
            OPERAND_TYPE_OUTPUT_CONTROL_POINT_ID => SrcKind::OutputControlPointId,
            OPERAND_TYPE_RASTERIZER => {
                return Err(TranslateError::Unsupported("rasterizer operand".to_string()));
            }
            other => {
                return Err(TranslateError::Unsupported(format!(
                    "source operand type {other}"
                )));
            }
        };
        Ok(SrcOperand {
            kind,
            swizzle,
            modifier,
            data_type: DataType::Unknown,
        })
    }

    fn classify_dst(&self, raw: RawOperand) -> Result<DstOperand, TranslateError> {
        let mask = raw.write_mask();
        let imm_index = |i: usize| -> Result<u32, TranslateError> {
            match raw.indices.get(i) {
                Some(IndexExpr::Imm(value)) => Ok(*value),
                Some(_) => Err(TranslateError::Unsupported(format!(
                    "dynamic index on destination type {}",
                    raw.ty
                ))),
                None => Err(TranslateError::Malformed(format!(
                    "destination type {} missing index {i}",
                    raw.ty
                ))),
            }
        };
        let kind = match raw.ty {
            OPERAND_TYPE_NULL => DstKind::Null,
            OPERAND_TYPE_TEMP => DstKind::Temp { index: imm_index(0)? },
            OPERAND_TYPE_INDEXABLE_TEMP => DstKind::IndexableTemp {
                index: imm_index(0)?,
                offset: raw.indices.get(1).cloned().ok_or_else(|| {
                    TranslateError::Malformed("indexable temp missing offset".to_string())
                })?,
            },
            OPERAND_TYPE_OUTPUT => DstKind::Output {
                index: raw.indices.first().cloned().ok_or_else(|| {
                    TranslateError::Malformed("output operand missing index".to_string())
                })?,
            },
            OPERAND_TYPE_OUTPUT_DEPTH => DstKind::OutputDepth,
            OPERAND_TYPE_OUTPUT_DEPTH_GREATER_EQUAL => DstKind::OutputDepthGreaterEqual,
            OPERAND_TYPE_OUTPUT_DEPTH_LESS_EQUAL => DstKind::OutputDepthLessEqual,
            OPERAND_TYPE_OUTPUT_COVERAGE_MASK => DstKind::OutputCoverageMask,
            OPERAND_TYPE_UNORDERED_ACCESS_VIEW => DstKind::Uav { slot: imm_index(0)? },
            OPERAND_TYPE_THREAD_GROUP_SHARED_MEMORY => DstKind::Tgsm { slot: imm_index(0)? },
            other => {
                return Err(TranslateError::Unsupported(format!(
                    "destination operand type {other}"
                )));
            }
        };
        Ok(DstOperand {
            kind,
            mask,
            saturate: false,
            data_type: DataType::Unknown,
        })
    }
}

struct RawOperand {
    ty: u32,
    num_components: u32,
    selection_mode: u32,
    component_sel: u32,
    indices: Vec<IndexExpr>,
    modifier: OperandModifier,
    immediate: [u32; 4],
}

impl RawOperand {
    fn swizzle(&self) -> Swizzle {
        if self.num_components != 2 {
            return Swizzle::IDENTITY;
        }
        match self.selection_mode {
            OPERAND_SEL_SWIZZLE => Swizzle([
                (self.component_sel & 0x3) as u8,
                ((self.component_sel >> 2) & 0x3) as u8,
                ((self.component_sel >> 4) & 0x3) as u8,
                ((self.component_sel >> 6) & 0x3) as u8,
            ]),
            OPERAND_SEL_SELECT1 => Swizzle::broadcast((self.component_sel & 0x3) as u8),
            _ => Swizzle::IDENTITY,
        }
    }

    fn write_mask(&self) -> WriteMask {
        if self.num_components != 2 {
            // Scalar and 0-component destinations behave as full writes.
            return WriteMask::XYZW;
        }
        match self.selection_mode {
            OPERAND_SEL_MASK => WriteMask((self.component_sel & 0xf) as u8),
            _ => WriteMask::XYZW,
        }
    }
}

fn atomic_op_for(opcode: u32) -> AtomicBinOp {
    match opcode {
        OPCODE_ATOMIC_AND | OPCODE_IMM_ATOMIC_AND => AtomicBinOp::And,
        OPCODE_ATOMIC_OR | OPCODE_IMM_ATOMIC_OR => AtomicBinOp::Or,
        OPCODE_ATOMIC_XOR | OPCODE_IMM_ATOMIC_XOR => AtomicBinOp::Xor,
        OPCODE_ATOMIC_IADD | OPCODE_IMM_ATOMIC_IADD => AtomicBinOp::Add,
        OPCODE_ATOMIC_IMAX | OPCODE_IMM_ATOMIC_IMAX => AtomicBinOp::SMax,
        OPCODE_ATOMIC_IMIN | OPCODE_IMM_ATOMIC_IMIN => AtomicBinOp::SMin,
        OPCODE_ATOMIC_UMAX | OPCODE_IMM_ATOMIC_UMAX => AtomicBinOp::UMax,
        OPCODE_ATOMIC_UMIN | OPCODE_IMM_ATOMIC_UMIN => AtomicBinOp::UMin,
        OPCODE_IMM_ATOMIC_EXCH => AtomicBinOp::Exchange,
        _ => unreachable!("not an atomic opcode"),
    }
}

fn decode_resource_dimension(token: u32) -> Result<ResourceDimension, TranslateError> {
    Ok(match (token >> RESOURCE_DIMENSION_SHIFT) & RESOURCE_DIMENSION_MASK {
        RESOURCE_DIMENSION_BUFFER => ResourceDimension::Buffer,
        RESOURCE_DIMENSION_TEXTURE1D => ResourceDimension::Texture1d,
        RESOURCE_DIMENSION_TEXTURE2D => ResourceDimension::Texture2d,
        RESOURCE_DIMENSION_TEXTURE2DMS => ResourceDimension::Texture2dMs,
        RESOURCE_DIMENSION_TEXTURE3D => ResourceDimension::Texture3d,
        RESOURCE_DIMENSION_TEXTURECUBE => ResourceDimension::TextureCube,
        RESOURCE_DIMENSION_TEXTURE1DARRAY => ResourceDimension::Texture1dArray,
        RESOURCE_DIMENSION_TEXTURE2DARRAY => ResourceDimension::Texture2dArray,
        RESOURCE_DIMENSION_TEXTURE2DMSARRAY => ResourceDimension::Texture2dMsArray,
        RESOURCE_DIMENSION_TEXTURECUBEARRAY => ResourceDimension::TextureCubeArray,
        RESOURCE_DIMENSION_RAW_BUFFER => ResourceDimension::RawBuffer,
        RESOURCE_DIMENSION_STRUCTURED_BUFFER => ResourceDimension::StructuredBuffer,
        other => {
            return Err(TranslateError::Unsupported(format!(
                "resource dimension {other}"
            )));
        }
    })
}

fn decode_return_type(token: u32) -> Result<SampledReturnType, TranslateError> {
    // Four 4-bit component return types; they are uniform in practice, so
    // classify by the x component.
    Ok(match token & 0xf {
        RETURN_TYPE_UNORM => SampledReturnType::Unorm,
        RETURN_TYPE_SNORM => SampledReturnType::Snorm,
        RETURN_TYPE_SINT => SampledReturnType::Sint,
        RETURN_TYPE_UINT => SampledReturnType::Uint,
        RETURN_TYPE_FLOAT => SampledReturnType::Float,
        other => {
            return Err(TranslateError::Unsupported(format!(
                "resource return type {other}"
            )));
        }
    })
}
