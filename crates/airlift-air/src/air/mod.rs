//! Typed constructors for the Metal intrinsic ABI.
//!
//! Every `air.*` symbol the translator can emit is produced here, with its
//! fixed argument layout and attribute list. Symbols are mangled as
//! `air.<op>_<surface>[.<variant>]<type-overload>`; the overload suffix is
//! derived from operand types by [`AirBuilder::type_overload_suffix`].

use crate::ir::{
    Attr, AttributeList, AtomicOp, CastOp, FuncId, IrBuilder, Module, Pred, TypeId, TypeKind,
    Value, FUNCTION_ATTR,
};
use crate::AirError;

pub mod address_space {
    pub const THREAD: u32 = 0;
    pub const DEVICE: u32 = 1;
    pub const CONSTANT: u32 = 2;
    pub const THREADGROUP: u32 = 3;
    pub const MESH: u32 = 7;
}

/// The closed set of texture shapes Metal exposes, in the ABI's own order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TextureKind {
    TextureBuffer,
    Texture1d,
    Texture1dArray,
    Texture2d,
    Texture2dArray,
    Texture3d,
    TextureCube,
    TextureCubeArray,
    Texture2dMs,
    Texture2dMsArray,
    Depth2d,
    Depth2dArray,
    DepthCube,
    DepthCubeArray,
    Depth2dMs,
    Depth2dMsArray,
}

pub struct TextureInfo {
    pub air_suffix: &'static str,
    pub is_array: bool,
    pub coord_dim: u32,
    pub is_cube: bool,
    pub is_depth: bool,
    pub is_ms: bool,
    pub is_mipmapped: bool,
}

impl TextureKind {
    pub const ALL: [TextureKind; 16] = [
        TextureKind::TextureBuffer,
        TextureKind::Texture1d,
        TextureKind::Texture1dArray,
        TextureKind::Texture2d,
        TextureKind::Texture2dArray,
        TextureKind::Texture3d,
        TextureKind::TextureCube,
        TextureKind::TextureCubeArray,
        TextureKind::Texture2dMs,
        TextureKind::Texture2dMsArray,
        TextureKind::Depth2d,
        TextureKind::Depth2dArray,
        TextureKind::DepthCube,
        TextureKind::DepthCubeArray,
        TextureKind::Depth2dMs,
        TextureKind::Depth2dMsArray,
    ];

    pub fn info(self) -> &'static TextureInfo {
        use TextureKind::*;
        match self {
            TextureBuffer => &TextureInfo {
                air_suffix: "texture_buffer_1d",
                is_array: false,
                coord_dim: 1,
                is_cube: false,
                is_depth: false,
                is_ms: false,
                is_mipmapped: false,
            },
            // 1d textures carry a lod argument in the ABI even though only
            // level 0 is valid.
            Texture1d => &TextureInfo {
                air_suffix: "texture_1d",
                is_array: false,
                coord_dim: 1,
                is_cube: false,
                is_depth: false,
                is_ms: false,
                is_mipmapped: true,
            },
            Texture1dArray => &TextureInfo {
                air_suffix: "texture_1d_array",
                is_array: true,
                coord_dim: 1,
                is_cube: false,
                is_depth: false,
                is_ms: false,
                is_mipmapped: true,
            },
            Texture2d => &TextureInfo {
                air_suffix: "texture_2d",
                is_array: false,
                coord_dim: 2,
                is_cube: false,
                is_depth: false,
                is_ms: false,
                is_mipmapped: true,
            },
            Texture2dArray => &TextureInfo {
                air_suffix: "texture_2d_array",
                is_array: true,
                coord_dim: 2,
                is_cube: false,
                is_depth: false,
                is_ms: false,
                is_mipmapped: true,
            },
            Texture3d => &TextureInfo {
                air_suffix: "texture_3d",
                is_array: false,
                coord_dim: 3,
                is_cube: false,
                is_depth: false,
                is_ms: false,
                is_mipmapped: true,
            },
            TextureCube => &TextureInfo {
                air_suffix: "texture_cube",
                is_array: false,
                coord_dim: 3,
                is_cube: true,
                is_depth: false,
                is_ms: false,
                is_mipmapped: true,
            },
            TextureCubeArray => &TextureInfo {
                air_suffix: "texture_cube_array",
                is_array: true,
                coord_dim: 3,
                is_cube: true,
                is_depth: false,
                is_ms: false,
                is_mipmapped: true,
            },
            Texture2dMs => &TextureInfo {
                air_suffix: "texture_2d_ms",
                is_array: false,
                coord_dim: 2,
                is_cube: false,
                is_depth: false,
                is_ms: true,
                is_mipmapped: false,
            },
            Texture2dMsArray => &TextureInfo {
                air_suffix: "texture_2d_ms_array",
                is_array: true,
                coord_dim: 2,
                is_cube: false,
                is_depth: false,
                is_ms: true,
                is_mipmapped: false,
            },
            Depth2d => &TextureInfo {
                air_suffix: "depth_2d",
                is_array: false,
                coord_dim: 2,
                is_cube: false,
                is_depth: true,
                is_ms: false,
                is_mipmapped: true,
            },
            Depth2dArray => &TextureInfo {
                air_suffix: "depth_2d_array",
                is_array: true,
                coord_dim: 2,
                is_cube: false,
                is_depth: true,
                is_ms: false,
                is_mipmapped: true,
            },
            DepthCube => &TextureInfo {
                air_suffix: "depth_cube",
                is_array: false,
                coord_dim: 3,
                is_cube: true,
                is_depth: true,
                is_ms: false,
                is_mipmapped: true,
            },
            DepthCubeArray => &TextureInfo {
                air_suffix: "depth_cube_array",
                is_array: true,
                coord_dim: 3,
                is_cube: true,
                is_depth: true,
                is_ms: false,
                is_mipmapped: true,
            },
            Depth2dMs => &TextureInfo {
                air_suffix: "depth_2d_ms",
                is_array: false,
                coord_dim: 2,
                is_cube: false,
                is_depth: true,
                is_ms: true,
                is_mipmapped: false,
            },
            Depth2dMsArray => &TextureInfo {
                air_suffix: "depth_2d_ms_array",
                is_array: true,
                coord_dim: 2,
                is_cube: false,
                is_depth: true,
                is_ms: true,
                is_mipmapped: false,
            },
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SampleType {
    Float,
    Int,
    Uint,
    Half,
}

/// Access qualifier encoded into the trailing `access` argument of texture
/// intrinsics.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TexAccess {
    Sample = 0,
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Texture {
    pub kind: TextureKind,
    pub sample_type: SampleType,
    pub memory_access: TexAccess,
}

impl Texture {
    fn texel_sign(&self) -> Signedness {
        match self.sample_type {
            SampleType::Int => Signedness::Signed,
            SampleType::Uint => Signedness::Unsigned,
            _ => Signedness::DontCare,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Signedness {
    DontCare,
    Signed,
    Unsigned,
}

bitflags::bitflags! {
    /// `mem_flags` bits for barriers and fences. Object-stage payload data
    /// shares the texture bit.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct MemFlags: u32 {
        const DEVICE = 1;
        const THREADGROUP = 2;
        const TEXTURE = 4;
    }
}

impl MemFlags {
    pub const OBJECT_DATA: MemFlags = MemFlags::TEXTURE;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThreadScope {
    Thread = 0,
    Threadgroup = 1,
    Device = 2,
    Simdgroup = 4,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FpUnOp {
    Saturate,
    Log2,
    Exp2,
    Sqrt,
    Rsqrt,
    Fract,
    Rint,
    Floor,
    Ceil,
    Trunc,
    Cos,
    Sin,
    Fabs,
}

impl FpUnOp {
    fn name(self) -> &'static str {
        match self {
            FpUnOp::Saturate => "saturate",
            FpUnOp::Log2 => "log2",
            FpUnOp::Exp2 => "exp2",
            FpUnOp::Sqrt => "sqrt",
            FpUnOp::Rsqrt => "rsqrt",
            FpUnOp::Fract => "fract",
            FpUnOp::Rint => "rint",
            FpUnOp::Floor => "floor",
            FpUnOp::Ceil => "ceil",
            FpUnOp::Trunc => "trunc",
            FpUnOp::Cos => "cos",
            FpUnOp::Sin => "sin",
            FpUnOp::Fabs => "fabs",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FpBinOp {
    FMax,
    FMin,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntUnOp {
    ReverseBits,
    Popcount,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntBinOp {
    Max,
    Min,
    MulHi,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TextureQuery {
    Width,
    Height,
    Depth,
    ArrayLength,
    NumMipLevels,
    NumSamples,
}

/// Sample-argument control: exact-LOD versus bias + min-lod-clamp. Selects
/// the boolean "args control" bit and the two trailing float arguments.
#[derive(Clone, Copy, Debug)]
pub enum SampleControl {
    Default,
    Level(Value),
    Bias(Value),
    BiasMinLod(Value, Value),
    MinLod(Value),
}

pub struct AirBuilder<'m> {
    pub ir: IrBuilder<'m>,
}

type VResult = Result<Value, AirError>;
type PairResult = Result<(Value, Value), AirError>;

impl<'m> AirBuilder<'m> {
    pub fn new(ir: IrBuilder<'m>) -> Self {
        AirBuilder { ir }
    }

    fn module(&mut self) -> &mut Module {
        self.ir.module
    }

    /* Type helpers */

    pub fn void_ty(&mut self) -> TypeId {
        self.module().types.void()
    }
    pub fn bool_ty(&mut self) -> TypeId {
        self.module().types.i1()
    }
    pub fn byte_ty(&mut self) -> TypeId {
        self.module().types.i8()
    }
    pub fn int_ty(&mut self) -> TypeId {
        self.module().types.i32()
    }
    pub fn float_ty(&mut self) -> TypeId {
        self.module().types.f32()
    }
    pub fn half_ty(&mut self) -> TypeId {
        self.module().types.f16()
    }
    pub fn int_vec_ty(&mut self, dim: u32) -> TypeId {
        let i32t = self.module().types.i32();
        self.module().types.vec_or_scalar(i32t, dim)
    }
    pub fn float_vec_ty(&mut self, dim: u32) -> TypeId {
        let f32t = self.module().types.f32();
        self.module().types.vec_or_scalar(f32t, dim)
    }
    pub fn half_vec_ty(&mut self, dim: u32) -> TypeId {
        let f16t = self.module().types.f16();
        self.module().types.vec_or_scalar(f16t, dim)
    }

    pub fn texture_handle_type(&mut self, texture: &Texture) -> TypeId {
        let name = format!("struct._{}_t", texture.kind.info().air_suffix);
        let opaque = self.module().types.opaque_struct(&name);
        self.module().types.ptr(opaque, address_space::DEVICE)
    }

    pub fn sampler_handle_type(&mut self) -> TypeId {
        let opaque = self.module().types.opaque_struct("struct._sampler_t");
        self.module().types.ptr(opaque, address_space::CONSTANT)
    }

    pub fn mesh_handle_type(&mut self) -> TypeId {
        let opaque = self.module().types.opaque_struct("struct._mesh_t");
        self.module().types.ptr(opaque, address_space::MESH)
    }

    pub fn mesh_grid_props_type(&mut self) -> TypeId {
        let opaque = self
            .module()
            .types
            .opaque_struct("struct._mesh_grid_properties_t");
        self.module().types.ptr(opaque, address_space::THREADGROUP)
    }

    /// Depth textures sample to a single float; everything else to a
    /// 4-vector of the sample type.
    pub fn texel_type(&mut self, texture: &Texture) -> TypeId {
        if texture.kind.info().is_depth {
            return self.float_ty();
        }
        match texture.sample_type {
            SampleType::Float => self.float_vec_ty(4),
            SampleType::Half => self.half_vec_ty(4),
            SampleType::Int | SampleType::Uint => self.int_vec_ty(4),
        }
    }

    /// Gather returns four texels, so depth gathers widen to float4.
    pub fn texel_gather_type(&mut self, texture: &Texture) -> TypeId {
        if texture.kind.info().is_depth {
            return self.float_vec_ty(4);
        }
        self.texel_type(texture)
    }

    pub fn sample_coord_type(&mut self, texture: &Texture) -> TypeId {
        self.float_vec_ty(texture.kind.info().coord_dim)
    }

    /// Integer position for read/write/atomic access. Cube faces are
    /// addressed as 2d position + face index.
    pub fn rw_position_type(&mut self, texture: &Texture) -> TypeId {
        let info = texture.kind.info();
        let dim = if info.is_cube { 2 } else { info.coord_dim };
        self.int_vec_ty(dim)
    }

    pub fn sample_result_type(&mut self, texture: &Texture) -> TypeId {
        let texel = self.texel_type(texture);
        let byte = self.byte_ty();
        self.module().types.literal_struct(vec![texel, byte])
    }

    pub fn gather_result_type(&mut self, texture: &Texture) -> TypeId {
        let texel = self.texel_gather_type(texture);
        let byte = self.byte_ty();
        self.module().types.literal_struct(vec![texel, byte])
    }

    /// Locates the distinguished mesh handle among the enclosing function's
    /// arguments.
    pub fn mesh_handle(&mut self) -> Option<Value> {
        let ty = self.mesh_handle_type();
        self.find_arg_of_type(ty)
    }

    pub fn mesh_grid_props(&mut self) -> Option<Value> {
        let ty = self.mesh_grid_props_type();
        self.find_arg_of_type(ty)
    }

    fn find_arg_of_type(&mut self, ty: TypeId) -> Option<Value> {
        let func = self.ir.function();
        self.ir
            .module
            .func(func)
            .args
            .iter()
            .copied()
            .find(|&arg| self.ir.module.value_type(arg) == ty)
    }

    /* Constants */

    pub fn float(&mut self, value: f32) -> Value {
        self.module().const_f32(value)
    }
    pub fn int(&mut self, value: u32) -> Value {
        self.module().const_u32(value)
    }
    pub fn bool_const(&mut self, value: bool) -> Value {
        self.module().const_bool(value)
    }
    pub fn int2(&mut self, a: u32, b: u32) -> Value {
        self.module().const_u32_vec(&[a, b])
    }
    pub fn int3(&mut self, a: u32, b: u32, c: u32) -> Value {
        self.module().const_u32_vec(&[a, b, c])
    }
    pub fn int4(&mut self, a: u32, b: u32, c: u32, d: u32) -> Value {
        self.module().const_u32_vec(&[a, b, c, d])
    }

    /* Mangling */

    /// Produces the `.f.v4f32`-style overload suffix for `ty`. Pointers
    /// contribute `p<addrspace>`, vectors `v<len>`, and the signedness
    /// marker is interposed when applicable.
    pub fn type_overload_suffix(&mut self, ty: TypeId, sign: Signedness) -> String {
        let types = &self.ir.module.types;
        let mut suffix = String::from(".");
        let (ty, ptr_space) = match types.kind(ty) {
            TypeKind::Pointer { pointee, address_space } => (*pointee, Some(*address_space)),
            _ => (ty, None),
        };
        let scalar = types.scalar_of(ty);
        let vector_len = types.vector_len(ty);
        match types.kind(scalar) {
            TypeKind::Float | TypeKind::Half => {
                if sign != Signedness::DontCare {
                    suffix.push_str("f.");
                }
            }
            TypeKind::Int(_) => match sign {
                Signedness::Signed => suffix.push_str("s."),
                Signedness::Unsigned => suffix.push_str("u."),
                Signedness::DontCare => {}
            },
            _ => return ".unknown_type_overload".to_string(),
        }
        if let Some(space) = ptr_space {
            suffix.push_str(&format!("p{space}"));
        }
        if let Some(len) = vector_len {
            suffix.push_str(&format!("v{len}"));
        }
        match types.kind(scalar) {
            TypeKind::Float => suffix.push_str("f32"),
            TypeKind::Half => suffix.push_str("f16"),
            TypeKind::Int(bits) => suffix.push_str(&format!("i{bits}")),
            _ => unreachable!(),
        }
        suffix
    }

    fn get_fn(
        &mut self,
        name: &str,
        params: Vec<TypeId>,
        ret: TypeId,
        attrs: AttributeList,
    ) -> FuncId {
        let ty = self.module().types.func(ret, params);
        self.module().get_or_insert_function(name, ty, attrs)
    }

    fn texture_call_attrs(&self, convergent: bool, has_sampler: bool) -> AttributeList {
        let mut attrs = AttributeList::function(&[
            Attr::ArgMemOnly,
            Attr::NoUnwind,
            Attr::WillReturn,
            Attr::ReadOnly,
        ])
        .with_param(1, &[Attr::NoCapture, Attr::ReadOnly]);
        if has_sampler {
            attrs = attrs.with_param(2, &[Attr::NoCapture, Attr::ReadOnly]);
        }
        if convergent {
            attrs.0.push((FUNCTION_ATTR, Attr::Convergent));
        }
        attrs
    }

    fn imm_offset(&mut self, texture: &Texture, offset: [i32; 3]) -> Option<Value> {
        use TextureKind::*;
        match texture.kind {
            Texture1d | Texture1dArray => Some(self.int(offset[0] as u32)),
            Texture2d | Texture2dArray | Depth2d | Depth2dArray => {
                Some(self.int2(offset[0] as u32, offset[1] as u32))
            }
            Texture3d => Some(self.int3(offset[0] as u32, offset[1] as u32, offset[2] as u32)),
            _ => None,
        }
    }

    /// Pushes the `[bool offset-enable, offset]` pair for kinds that take
    /// an offset. 1d offsets exist in the signature but are disabled.
    fn push_offset_args(
        &mut self,
        texture: &Texture,
        offset: Option<Value>,
        params: &mut Vec<TypeId>,
        args: &mut Vec<Value>,
    ) {
        use TextureKind::*;
        let (enabled, dim) = match texture.kind {
            Texture1d | Texture1dArray => (false, 1),
            Texture2d | Texture2dArray | Depth2d | Depth2dArray => (true, 2),
            Texture3d => (true, 3),
            _ => return,
        };
        params.push(self.bool_ty());
        args.push(self.bool_const(enabled));
        params.push(self.int_vec_ty(dim));
        let offset = offset.unwrap_or_else(|| {
            let ty = self.int_vec_ty(dim);
            self.ir.module.zero(ty)
        });
        args.push(offset);
    }

    fn sample_control_bits(&mut self, control: SampleControl) -> (bool, Value, Value) {
        let zero = self.float(0.0);
        match control {
            SampleControl::Default => (false, zero, zero),
            SampleControl::Level(lod) => (true, lod, zero),
            SampleControl::Bias(bias) => (false, bias, zero),
            SampleControl::BiasMinLod(bias, min_lod) => (false, bias, min_lod),
            SampleControl::MinLod(min_lod) => (false, zero, min_lod),
        }
    }

    /* Texture operations */

    /// `air.sample_<surface>`: returns `(texel, residency byte)`.
    pub fn sample(
        &mut self,
        texture: &Texture,
        handle: Value,
        sampler: Value,
        coord: Value,
        array_index: Option<Value>,
        offset: [i32; 3],
        control: SampleControl,
    ) -> PairResult {
        let info = texture.kind.info();
        let mut params = Vec::new();
        let mut args = Vec::new();

        params.push(self.texture_handle_type(texture));
        args.push(handle);
        params.push(self.sampler_handle_type());
        args.push(sampler);
        if info.is_depth {
            params.push(self.int_ty());
            args.push(self.int(1));
        }
        params.push(self.sample_coord_type(texture));
        args.push(coord);
        if info.is_array {
            params.push(self.int_ty());
            args.push(array_index.unwrap_or_else(|| self.int(0)));
        }
        let imm = self.imm_offset(texture, offset);
        self.push_offset_args(texture, imm, &mut params, &mut args);

        let (control_bit, arg1, arg2) = self.sample_control_bits(control);
        params.push(self.bool_ty());
        args.push(self.bool_const(control_bit));
        params.push(self.float_ty());
        args.push(arg1);
        params.push(self.float_ty());
        args.push(arg2);
        params.push(self.int_ty());
        args.push(self.int(0)); // access: sample

        let texel_ty = self.texel_type(texture);
        let overload = self.type_overload_suffix(texel_ty, texture.texel_sign());
        let name = format!("air.sample_{}{overload}", info.air_suffix);
        let ret = self.sample_result_type(texture);
        let attrs = self.texture_call_attrs(true, true);
        let func = self.get_fn(&name, params, ret, attrs);
        let result = self.ir.build_call(func, &args);
        Ok((
            self.ir.build_extract_value(result, 0),
            self.ir.build_extract_value(result, 1),
        ))
    }

    /// `air.sample_compare_<surface>`; depth kinds only.
    pub fn sample_compare(
        &mut self,
        texture: &Texture,
        handle: Value,
        sampler: Value,
        coord: Value,
        array_index: Option<Value>,
        reference: Value,
        offset: [i32; 3],
        control: SampleControl,
    ) -> PairResult {
        let info = texture.kind.info();
        if !info.is_depth {
            return Err(AirError::InvalidOperation(
                "compare sample on non-depth texture".to_string(),
            ));
        }
        let mut params = Vec::new();
        let mut args = Vec::new();

        params.push(self.texture_handle_type(texture));
        args.push(handle);
        params.push(self.sampler_handle_type());
        args.push(sampler);
        params.push(self.int_ty());
        args.push(self.int(1));
        params.push(self.sample_coord_type(texture));
        args.push(coord);
        if info.is_array {
            params.push(self.int_ty());
            args.push(array_index.unwrap_or_else(|| self.int(0)));
        }
        params.push(self.float_ty());
        args.push(reference);
        if matches!(texture.kind, TextureKind::Depth2d | TextureKind::Depth2dArray) {
            let imm = self.imm_offset(texture, offset);
            self.push_offset_args(texture, imm, &mut params, &mut args);
        }
        let (control_bit, arg1, arg2) = self.sample_control_bits(control);
        params.push(self.bool_ty());
        args.push(self.bool_const(control_bit));
        params.push(self.float_ty());
        args.push(arg1);
        params.push(self.float_ty());
        args.push(arg2);
        params.push(self.int_ty());
        args.push(self.int(0));

        let texel_ty = self.texel_type(texture);
        let overload = self.type_overload_suffix(texel_ty, texture.texel_sign());
        let name = format!("air.sample_compare_{}{overload}", info.air_suffix);
        let ret = self.sample_result_type(texture);
        let attrs = self.texture_call_attrs(true, true);
        let func = self.get_fn(&name, params, ret, attrs);
        let result = self.ir.build_call(func, &args);
        Ok((
            self.ir.build_extract_value(result, 0),
            self.ir.build_extract_value(result, 1),
        ))
    }

    /// `air.sample_<surface>_grad`: explicit-gradient sample.
    pub fn sample_grad(
        &mut self,
        texture: &Texture,
        handle: Value,
        sampler: Value,
        coord: Value,
        array_index: Option<Value>,
        deriv_x: Value,
        deriv_y: Value,
        min_lod: Value,
        offset: [i32; 3],
    ) -> PairResult {
        let info = texture.kind.info();
        let mut params = Vec::new();
        let mut args = Vec::new();

        params.push(self.texture_handle_type(texture));
        args.push(handle);
        params.push(self.sampler_handle_type());
        args.push(sampler);
        if info.is_depth {
            params.push(self.int_ty());
            args.push(self.int(1));
        }
        params.push(self.sample_coord_type(texture));
        args.push(coord);
        if info.is_array {
            params.push(self.int_ty());
            args.push(array_index.unwrap_or_else(|| self.int(0)));
        }
        params.push(self.sample_coord_type(texture));
        args.push(deriv_x);
        params.push(self.sample_coord_type(texture));
        args.push(deriv_y);
        params.push(self.float_ty());
        args.push(min_lod);
        let imm = self.imm_offset(texture, offset);
        self.push_offset_args(texture, imm, &mut params, &mut args);
        params.push(self.int_ty());
        args.push(self.int(0));

        let texel_ty = self.texel_type(texture);
        let overload = self.type_overload_suffix(texel_ty, texture.texel_sign());
        let name = format!("air.sample_{}_grad{overload}", info.air_suffix);
        let ret = self.sample_result_type(texture);
        // Gradient sampling is not convergent: derivatives are explicit.
        let attrs = self.texture_call_attrs(false, true);
        let func = self.get_fn(&name, params, ret, attrs);
        let result = self.ir.build_call(func, &args);
        Ok((
            self.ir.build_extract_value(result, 0),
            self.ir.build_extract_value(result, 1),
        ))
    }

    /// `air.gather_<surface>`: four-texel fetch of one component.
    pub fn gather(
        &mut self,
        texture: &Texture,
        handle: Value,
        sampler: Value,
        coord: Value,
        array_index: Option<Value>,
        offset: Option<Value>,
        component: Value,
    ) -> PairResult {
        let info = texture.kind.info();
        let mut params = Vec::new();
        let mut args = Vec::new();

        params.push(self.texture_handle_type(texture));
        args.push(handle);
        params.push(self.sampler_handle_type());
        args.push(sampler);
        if info.is_depth {
            params.push(self.int_ty());
            args.push(self.int(1));
        }
        params.push(self.sample_coord_type(texture));
        args.push(coord);
        if info.is_array {
            params.push(self.int_ty());
            args.push(array_index.unwrap_or_else(|| self.int(0)));
        }
        if matches!(
            texture.kind,
            TextureKind::Texture2d
                | TextureKind::Texture2dArray
                | TextureKind::Depth2d
                | TextureKind::Depth2dArray
        ) {
            self.push_offset_args(texture, offset, &mut params, &mut args);
        }
        if !info.is_depth {
            params.push(self.int_ty());
            args.push(component);
        }
        params.push(self.int_ty());
        args.push(self.int(0));

        let texel_ty = self.texel_gather_type(texture);
        let overload = self.type_overload_suffix(texel_ty, texture.texel_sign());
        let name = format!("air.gather_{}{overload}", info.air_suffix);
        let ret = self.gather_result_type(texture);
        let attrs = self.texture_call_attrs(false, true);
        let func = self.get_fn(&name, params, ret, attrs);
        let result = self.ir.build_call(func, &args);
        Ok((
            self.ir.build_extract_value(result, 0),
            self.ir.build_extract_value(result, 1),
        ))
    }

    /// `air.gather_compare_<surface>.f32`; depth kinds only.
    pub fn gather_compare(
        &mut self,
        texture: &Texture,
        handle: Value,
        sampler: Value,
        coord: Value,
        array_index: Option<Value>,
        reference: Value,
        offset: Option<Value>,
    ) -> PairResult {
        let info = texture.kind.info();
        if !info.is_depth {
            return Err(AirError::InvalidOperation(
                "compare gather on non-depth texture".to_string(),
            ));
        }
        let mut params = Vec::new();
        let mut args = Vec::new();

        params.push(self.texture_handle_type(texture));
        args.push(handle);
        params.push(self.sampler_handle_type());
        args.push(sampler);
        params.push(self.int_ty());
        args.push(self.int(1));
        params.push(self.sample_coord_type(texture));
        args.push(coord);
        if info.is_array {
            params.push(self.int_ty());
            args.push(array_index.unwrap_or_else(|| self.int(0)));
        }
        params.push(self.float_ty());
        args.push(reference);
        if matches!(texture.kind, TextureKind::Depth2d | TextureKind::Depth2dArray) {
            self.push_offset_args(texture, offset, &mut params, &mut args);
        }
        params.push(self.int_ty());
        args.push(self.int(0));

        let name = format!("air.gather_compare_{}.f32", info.air_suffix);
        let ret = self.gather_result_type(texture);
        let attrs = self.texture_call_attrs(false, true);
        let func = self.get_fn(&name, params, ret, attrs);
        let result = self.ir.build_call(func, &args);
        Ok((
            self.ir.build_extract_value(result, 0),
            self.ir.build_extract_value(result, 1),
        ))
    }

    /// `air.read_<surface>`: unfiltered texel load.
    pub fn read(
        &mut self,
        texture: &Texture,
        handle: Value,
        pos: Value,
        array_index: Option<Value>,
        cube_face_or_sample: Option<Value>,
        level: Option<Value>,
    ) -> PairResult {
        let info = texture.kind.info();
        let mut params = Vec::new();
        let mut args = Vec::new();

        params.push(self.texture_handle_type(texture));
        args.push(handle);
        if info.is_depth {
            params.push(self.int_ty());
            args.push(self.int(1));
        }
        params.push(self.rw_position_type(texture));
        args.push(pos);
        if info.is_cube {
            params.push(self.int_ty());
            args.push(cube_face_or_sample.unwrap_or_else(|| self.int(0)));
        }
        if info.is_array {
            params.push(self.int_ty());
            args.push(array_index.unwrap_or_else(|| self.int(0)));
        }
        if info.is_ms {
            params.push(self.int_ty());
            args.push(cube_face_or_sample.unwrap_or_else(|| self.int(0)));
        }
        if info.is_mipmapped {
            params.push(self.int_ty());
            args.push(level.unwrap_or_else(|| self.int(0)));
        }
        params.push(self.int_ty());
        args.push(self.int(texture.memory_access as u32));

        let texel_ty = self.texel_type(texture);
        let overload = self.type_overload_suffix(texel_ty, texture.texel_sign());
        let name = format!("air.read_{}{overload}", info.air_suffix);
        let ret = self.sample_result_type(texture);
        let attrs = self.texture_call_attrs(false, false);
        let func = self.get_fn(&name, params, ret, attrs);
        let result = self.ir.build_call(func, &args);
        Ok((
            self.ir.build_extract_value(result, 0),
            self.ir.build_extract_value(result, 1),
        ))
    }

    /// `air.write_<surface>`; rejected for depth and multisampled kinds.
    pub fn write(
        &mut self,
        texture: &Texture,
        handle: Value,
        pos: Value,
        array_index: Option<Value>,
        cube_face: Option<Value>,
        level: Option<Value>,
        texel: Value,
    ) -> VResult {
        let info = texture.kind.info();
        if info.is_depth {
            return Err(AirError::InvalidOperation(
                "write to depth texture".to_string(),
            ));
        }
        if info.is_ms {
            return Err(AirError::InvalidOperation(
                "write to multisampled texture".to_string(),
            ));
        }
        let mut params = Vec::new();
        let mut args = Vec::new();

        params.push(self.texture_handle_type(texture));
        args.push(handle);
        params.push(self.rw_position_type(texture));
        args.push(pos);
        if info.is_cube {
            params.push(self.int_ty());
            args.push(cube_face.unwrap_or_else(|| self.int(0)));
        }
        if info.is_array {
            params.push(self.int_ty());
            args.push(array_index.unwrap_or_else(|| self.int(0)));
        }
        params.push(self.texel_type(texture));
        args.push(texel);
        if info.is_mipmapped {
            params.push(self.int_ty());
            args.push(level.unwrap_or_else(|| self.int(0)));
        }
        params.push(self.int_ty());
        args.push(self.int(texture.memory_access as u32));

        let texel_ty = self.texel_type(texture);
        let overload = self.type_overload_suffix(texel_ty, texture.texel_sign());
        let name = format!("air.write_{}{overload}", info.air_suffix);
        let attrs = AttributeList::function(&[Attr::ArgMemOnly, Attr::NoUnwind, Attr::WillReturn])
            .with_param(1, &[Attr::NoCapture]);
        let void = self.void_ty();
        let func = self.get_fn(&name, params, void, attrs);
        Ok(self.ir.build_call(func, &args))
    }

    /// `air.atomic_fetch_<op>_explicit_<surface>` / exchange: returns the
    /// prior texel. Integer textures only; depth/cube/ms are rejected.
    pub fn texture_atomic_rmw(
        &mut self,
        texture: &Texture,
        handle: Value,
        op: AtomicOp,
        pos: Value,
        array_index: Option<Value>,
        texel: Value,
    ) -> VResult {
        let info = texture.kind.info();
        if !matches!(texture.sample_type, SampleType::Int | SampleType::Uint) {
            return Err(AirError::InvalidOperation(
                "atomic operation on non-integer texture".to_string(),
            ));
        }
        if info.is_depth || info.is_cube || info.is_ms {
            return Err(AirError::InvalidOperation(
                "atomic operation on unsupported texture kind".to_string(),
            ));
        }

        let mut params = Vec::new();
        let mut args = Vec::new();
        params.push(self.texture_handle_type(texture));
        args.push(handle);
        params.push(self.rw_position_type(texture));
        args.push(pos);
        if info.is_array {
            params.push(self.int_ty());
            args.push(array_index.unwrap_or_else(|| self.int(0)));
        }
        let texel_ty = self.texel_type(texture);
        params.push(texel_ty);
        args.push(texel);
        params.push(self.int_ty());
        args.push(self.int(0)); // relaxed order
        params.push(self.int_ty());
        args.push(self.int(texture.memory_access as u32));

        let (op_name, sign) = match op {
            AtomicOp::Xchg => ("exchange", Signedness::Unsigned),
            AtomicOp::Add => ("fetch_add", Signedness::Unsigned),
            AtomicOp::Sub => ("fetch_sub", Signedness::Unsigned),
            AtomicOp::And => ("fetch_and", Signedness::Unsigned),
            AtomicOp::Or => ("fetch_or", Signedness::Unsigned),
            AtomicOp::Xor => ("fetch_xor", Signedness::Unsigned),
            AtomicOp::Max => ("fetch_max", Signedness::Signed),
            AtomicOp::Min => ("fetch_min", Signedness::Signed),
            AtomicOp::UMax => ("fetch_max", Signedness::Unsigned),
            AtomicOp::UMin => ("fetch_min", Signedness::Unsigned),
        };
        let overload = self.type_overload_suffix(texel_ty, sign);
        let name = format!("air.atomic_{op_name}_explicit_{}{overload}", info.air_suffix);
        let attrs = AttributeList::function(&[Attr::NoUnwind, Attr::WillReturn])
            .with_param(1, &[Attr::NoCapture]);
        let func = self.get_fn(&name, params, texel_ty, attrs);
        Ok(self.ir.build_call(func, &args))
    }

    /// `air.atomic_compare_exchange_weak_explicit_<surface>`: the expected
    /// texel travels through a stack slot; returns `(observed, matched)`.
    pub fn texture_atomic_cmpxchg(
        &mut self,
        texture: &Texture,
        handle: Value,
        pos: Value,
        array_index: Option<Value>,
        expected: Value,
        desired: Value,
    ) -> PairResult {
        let info = texture.kind.info();
        if !matches!(texture.sample_type, SampleType::Int | SampleType::Uint) {
            return Err(AirError::InvalidOperation(
                "atomic operation on non-integer texture".to_string(),
            ));
        }
        if info.is_depth || info.is_cube || info.is_ms {
            return Err(AirError::InvalidOperation(
                "atomic operation on unsupported texture kind".to_string(),
            ));
        }

        let texel_ty = self.texel_type(texture);
        let slot = self.ir.build_alloca(texel_ty, 4);
        self.ir.build_store(expected, slot, 4);

        let mut params = Vec::new();
        let mut args = Vec::new();
        params.push(self.texture_handle_type(texture));
        args.push(handle);
        params.push(self.rw_position_type(texture));
        args.push(pos);
        if info.is_array {
            params.push(self.int_ty());
            args.push(array_index.unwrap_or_else(|| self.int(0)));
        }
        params.push(self.module().types.ptr(texel_ty, address_space::THREAD));
        args.push(slot);
        params.push(texel_ty);
        args.push(desired);
        params.push(self.int_ty());
        args.push(self.int(0)); // success order
        params.push(self.int_ty());
        args.push(self.int(0)); // failure order
        params.push(self.int_ty());
        args.push(self.int(texture.memory_access as u32));

        let overload = self.type_overload_suffix(texel_ty, Signedness::Unsigned);
        let name = format!(
            "air.atomic_compare_exchange_weak_explicit_{}{overload}",
            info.air_suffix
        );
        let attrs = AttributeList::function(&[Attr::NoUnwind, Attr::WillReturn])
            .with_param(1, &[Attr::NoCapture]);
        let bool_ty = self.bool_ty();
        let func = self.get_fn(&name, params, bool_ty, attrs);
        let matched = self.ir.build_call(func, &args);
        let observed = self.ir.build_load(slot, 4);
        Ok((observed, matched))
    }

    /// `air.get_width_<surface>` and friends. Level applies to
    /// width/height/depth on mipmapped kinds only.
    pub fn texture_query(
        &mut self,
        texture: &Texture,
        handle: Value,
        query: TextureQuery,
        level: Value,
    ) -> VResult {
        let info = texture.kind.info();
        match query {
            TextureQuery::ArrayLength if !info.is_array => {
                return Err(AirError::InvalidOperation(
                    "array_size query on non-array texture".to_string(),
                ));
            }
            TextureQuery::NumMipLevels if info.is_ms => {
                return Err(AirError::InvalidOperation(
                    "mip level query on multisampled texture".to_string(),
                ));
            }
            TextureQuery::NumSamples if !info.is_ms => {
                return Err(AirError::InvalidOperation(
                    "sample count query on non-multisampled texture".to_string(),
                ));
            }
            _ => {}
        }
        let mut params = Vec::new();
        let mut args = Vec::new();
        params.push(self.texture_handle_type(texture));
        args.push(handle);
        if matches!(
            query,
            TextureQuery::Width | TextureQuery::Height | TextureQuery::Depth
        ) && info.is_mipmapped
        {
            params.push(self.int_ty());
            args.push(level);
        }
        let query_name = match query {
            TextureQuery::Width => "get_width",
            TextureQuery::Height => "get_height",
            TextureQuery::Depth => "get_depth",
            TextureQuery::ArrayLength => "get_array_size",
            TextureQuery::NumMipLevels => "get_num_mip_levels",
            TextureQuery::NumSamples => "get_num_samples",
        };
        let name = format!("air.{query_name}_{}", info.air_suffix);
        let int = self.int_ty();
        let attrs = self.texture_call_attrs(false, false);
        let func = self.get_fn(&name, params, int, attrs);
        Ok(self.ir.build_call(func, &args))
    }

    /// `(clamped, unclamped)` LOD that a sample at `coord` would use.
    /// Invalid for 1d and multisampled kinds.
    pub fn calculate_lod(
        &mut self,
        texture: &Texture,
        handle: Value,
        sampler: Value,
        coord: Value,
    ) -> PairResult {
        let info = texture.kind.info();
        if info.is_ms || info.coord_dim == 1 {
            return Err(AirError::InvalidOperation(
                "lod query on unsupported texture kind".to_string(),
            ));
        }
        let params = vec![
            self.texture_handle_type(texture),
            self.sampler_handle_type(),
            self.sample_coord_type(texture),
            self.int_ty(),
        ];
        let zero = self.int(0);
        let args = vec![handle, sampler, coord, zero];
        let float = self.float_ty();
        let attrs = self.texture_call_attrs(true, true);
        let clamped_fn = self.get_fn(
            &format!("air.calculate_clamped_lod_{}", info.air_suffix),
            params.clone(),
            float,
            attrs.clone(),
        );
        let unclamped_fn = self.get_fn(
            &format!("air.calculate_unclamped_lod_{}", info.air_suffix),
            params,
            float,
            attrs,
        );
        Ok((
            self.ir.build_call(clamped_fn, &args),
            self.ir.build_call(unclamped_fn, &args),
        ))
    }

    /// `air.fence_<surface>`: texture write visibility within a thread.
    pub fn texture_fence(&mut self, texture: &Texture, handle: Value) -> Value {
        let info = texture.kind.info();
        let params = vec![self.texture_handle_type(texture)];
        let name = format!("air.fence_{}", info.air_suffix);
        let attrs =
            AttributeList::function(&[Attr::MustProgress, Attr::NoUnwind, Attr::WillReturn])
                .with_param(1, &[Attr::NoCapture]);
        let void = self.void_ty();
        let func = self.get_fn(&name, params, void, attrs);
        self.ir.build_call(func, &[handle])
    }

    /* Fragment stage */

    pub fn get_num_samples(&mut self) -> Value {
        let int = self.int_ty();
        let attrs = AttributeList::function(&[Attr::NoUnwind, Attr::WillReturn, Attr::ReadNone]);
        let func = self.get_fn("air.get_num_samples.i32", vec![int], int, attrs);
        let zero = self.int(0);
        self.ir.build_call(func, &[zero])
    }

    /// `air.dfdx` / `air.dfdy`. Fragment-stage only; the operand must be
    /// floating point.
    pub fn derivative(&mut self, value: Value, y_axis: bool) -> VResult {
        let ty = self.ir.module.value_type(value);
        if !self.ir.module.types.is_float_scalar_or_vector(ty) {
            return Err(AirError::InvalidOperation(
                "derivative of non-floating-point value".to_string(),
            ));
        }
        let overload = self.type_overload_suffix(ty, Signedness::DontCare);
        let name = format!("air.{}{overload}", if y_axis { "dfdy" } else { "dfdx" });
        let attrs = AttributeList::function(&[Attr::NoUnwind, Attr::WillReturn]);
        let func = self.get_fn(&name, vec![ty], ty, attrs);
        Ok(self.ir.build_call(func, &[value]))
    }

    pub fn discard(&mut self) -> Value {
        let void = self.void_ty();
        let attrs = AttributeList::function(&[Attr::NoUnwind, Attr::WillReturn]);
        let func = self.get_fn("air.discard_fragment", vec![], void, attrs);
        self.ir.build_call(func, &[])
    }

    /* Compute stage */

    /// `air.wg.barrier(mem_flags, scope=1)`.
    pub fn barrier(&mut self, flags: MemFlags) -> Value {
        let int = self.int_ty();
        let attrs =
            AttributeList::function(&[Attr::Convergent, Attr::NoUnwind, Attr::WillReturn]);
        let void = self.void_ty();
        let func = self.get_fn("air.wg.barrier", vec![int, int], void, attrs);
        let flags = self.int(flags.bits());
        let scope = self.int(1);
        self.ir.build_call(func, &[flags, scope])
    }

    /// `air.atomic.fence(mem_flags, order, scope)`.
    pub fn atomic_fence(&mut self, flags: MemFlags, scope: ThreadScope, relaxed: bool) -> Value {
        let int = self.int_ty();
        let attrs =
            AttributeList::function(&[Attr::MustProgress, Attr::NoUnwind, Attr::WillReturn]);
        let void = self.void_ty();
        let func = self.get_fn("air.atomic.fence", vec![int, int, int], void, attrs);
        let flags = self.int(flags.bits());
        let order = self.int(if relaxed { 0 } else { 5 });
        let scope = self.int(scope as u32);
        self.ir.build_call(func, &[flags, order, scope])
    }

    /// Non-texture atomic on a device (AS 1) or threadgroup (AS 3)
    /// pointer: `air.atomic.{global|local}.<op>.{s|u}.i32`.
    pub fn atomic_rmw(&mut self, op: AtomicOp, ptr: Value, value: Value) -> VResult {
        let ptr_ty = self.ir.module.value_type(ptr);
        let Some((pointee, space)) = self.ir.module.types.pointee(ptr_ty) else {
            return Err(AirError::InvalidOperation(
                "atomic on non-pointer operand".to_string(),
            ));
        };
        if pointee != self.ir.module.value_type(value) {
            return Err(AirError::InvalidOperation(
                "atomic operand type does not match pointee".to_string(),
            ));
        }
        let (scope_name, scope) = match space {
            address_space::DEVICE => ("global", ThreadScope::Device),
            address_space::THREADGROUP => ("local", ThreadScope::Threadgroup),
            other => {
                return Err(AirError::InvalidOperation(format!(
                    "atomic on pointer in address space {other}"
                )));
            }
        };
        let (op_name, sign) = match op {
            AtomicOp::Add => ("add", Signedness::Unsigned),
            AtomicOp::Sub => ("sub", Signedness::Unsigned),
            AtomicOp::And => ("and", Signedness::Unsigned),
            AtomicOp::Or => ("or", Signedness::Unsigned),
            AtomicOp::Xor => ("xor", Signedness::Unsigned),
            AtomicOp::Max => ("max", Signedness::Signed),
            AtomicOp::Min => ("min", Signedness::Signed),
            AtomicOp::UMax => ("max", Signedness::Unsigned),
            AtomicOp::UMin => ("min", Signedness::Unsigned),
            AtomicOp::Xchg => ("xchg", Signedness::DontCare),
        };
        let overload = self.type_overload_suffix(pointee, sign);
        let name = format!("air.atomic.{scope_name}.{op_name}{overload}");
        let int = self.int_ty();
        let bool_ty = self.bool_ty();
        let params = vec![ptr_ty, pointee, int, int, bool_ty];
        let attrs = AttributeList::function(&[Attr::NoUnwind, Attr::WillReturn])
            .with_param(1, &[Attr::NoCapture]);
        let func = self.get_fn(&name, params, pointee, attrs);
        let order = self.int(0);
        let scope = self.int(scope as u32);
        let volatile = self.bool_const(true);
        Ok(self.ir.build_call(func, &[ptr, value, order, scope, volatile]))
    }

    /// `air.atomic.{global|local}.cmpxchg.weak.i32`. The expected value is
    /// passed through `expected_slot` (thread address space) and the call
    /// writes the observed value back through it.
    pub fn atomic_cmpxchg(
        &mut self,
        ptr: Value,
        expected_slot: Value,
        desired: Value,
    ) -> VResult {
        let ptr_ty = self.ir.module.value_type(ptr);
        let Some((pointee, space)) = self.ir.module.types.pointee(ptr_ty) else {
            return Err(AirError::InvalidOperation(
                "cmpxchg on non-pointer operand".to_string(),
            ));
        };
        let (scope_name, scope) = match space {
            address_space::DEVICE => ("global", ThreadScope::Device),
            address_space::THREADGROUP => ("local", ThreadScope::Threadgroup),
            other => {
                return Err(AirError::InvalidOperation(format!(
                    "cmpxchg on pointer in address space {other}"
                )));
            }
        };
        let overload = self.type_overload_suffix(pointee, Signedness::DontCare);
        let name = format!("air.atomic.{scope_name}.cmpxchg.weak{overload}");
        let int = self.int_ty();
        let bool_ty = self.bool_ty();
        let slot_ty = self.ir.module.value_type(expected_slot);
        let params = vec![ptr_ty, slot_ty, pointee, int, int, int, bool_ty];
        let attrs = AttributeList::function(&[
            Attr::NoUnwind,
            Attr::WillReturn,
            Attr::MustProgress,
        ])
        .with_param(1, &[Attr::NoCapture])
        .with_param(2, &[Attr::NoCapture]);
        let func = self.get_fn(&name, params, pointee, attrs);
        let order0 = self.int(0);
        let order1 = self.int(0);
        let scope = self.int(scope as u32);
        let volatile = self.bool_const(true);
        self.ir.build_call(
            func,
            &[ptr, expected_slot, desired, order0, order1, scope, volatile],
        );
        Ok(self.ir.build_load(expected_slot, 4))
    }

    /* Math */

    pub fn fma(&mut self, x: Value, y: Value, z: Value) -> VResult {
        let ty = self.ir.module.value_type(x);
        if !self.ir.module.types.is_float_scalar_or_vector(ty) {
            return Err(AirError::InvalidOperation("fma on non-fp type".to_string()));
        }
        if ty != self.ir.module.value_type(y) || ty != self.ir.module.value_type(z) {
            return Err(AirError::InvalidOperation(
                "fma has mismatched operand types".to_string(),
            ));
        }
        let overload = self.type_overload_suffix(ty, Signedness::DontCare);
        let name = format!("air.fma{overload}");
        let attrs = AttributeList::function(&[Attr::ReadNone, Attr::NoUnwind, Attr::WillReturn]);
        let func = self.get_fn(&name, vec![ty, ty, ty], ty, attrs);
        Ok(self.ir.build_call(func, &[x, y, z]))
    }

    /// `air.dot`: scalar float result. Scalar operands degrade to a plain
    /// multiply.
    pub fn dot(&mut self, lhs: Value, rhs: Value) -> VResult {
        let ty = self.ir.module.value_type(lhs);
        if !self.ir.module.types.is_float_scalar_or_vector(ty) {
            return Err(AirError::InvalidOperation("dot on non-fp type".to_string()));
        }
        if ty != self.ir.module.value_type(rhs) {
            return Err(AirError::InvalidOperation(
                "dot has mismatched operand types".to_string(),
            ));
        }
        if self.ir.module.types.vector_len(ty).is_none() {
            return Ok(self.ir.build_fmul(lhs, rhs));
        }
        let overload = self.type_overload_suffix(ty, Signedness::DontCare);
        let name = format!("air.dot{overload}");
        let float = self.float_ty();
        let attrs = AttributeList::function(&[Attr::ReadNone, Attr::NoUnwind, Attr::WillReturn]);
        let func = self.get_fn(&name, vec![ty, ty], float, attrs);
        Ok(self.ir.build_call(func, &[lhs, rhs]))
    }

    /// `air.clz` / `air.ctz` with the "is zero undef" bool pinned false.
    pub fn count_zero(&mut self, value: Value, trailing: bool) -> Value {
        let ty = self.ir.module.value_type(value);
        let overload = self.type_overload_suffix(ty, Signedness::DontCare);
        let name = format!("air.{}{overload}", if trailing { "ctz" } else { "clz" });
        let bool_ty = self.bool_ty();
        let attrs = AttributeList::function(&[Attr::ReadNone, Attr::NoUnwind, Attr::WillReturn]);
        let func = self.get_fn(&name, vec![ty, bool_ty], ty, attrs);
        let no_undef = self.bool_const(false);
        self.ir.build_call(func, &[value, no_undef])
    }

    fn fp_intrinsic_prefix(&self) -> &'static str {
        if self.ir.fast_math {
            "fast_"
        } else {
            ""
        }
    }

    pub fn fp_unop(&mut self, op: FpUnOp, operand: Value) -> Value {
        let ty = self.ir.module.value_type(operand);
        let overload = self.type_overload_suffix(ty, Signedness::DontCare);
        let name = format!("air.{}{}{overload}", self.fp_intrinsic_prefix(), op.name());
        let attrs = AttributeList::function(&[Attr::NoUnwind, Attr::WillReturn, Attr::ReadNone]);
        let func = self.get_fn(&name, vec![ty], ty, attrs);
        self.ir.build_call(func, &[operand])
    }

    pub fn fp_binop(&mut self, op: FpBinOp, lhs: Value, rhs: Value) -> Value {
        let ty = self.ir.module.value_type(lhs);
        let overload = self.type_overload_suffix(ty, Signedness::DontCare);
        let op_name = match op {
            FpBinOp::FMax => "fmax",
            FpBinOp::FMin => "fmin",
        };
        let name = format!("air.{}{op_name}{overload}", self.fp_intrinsic_prefix());
        let attrs = AttributeList::function(&[Attr::NoUnwind, Attr::WillReturn, Attr::ReadNone]);
        let func = self.get_fn(&name, vec![ty, ty], ty, attrs);
        self.ir.build_call(func, &[lhs, rhs])
    }

    pub fn int_unop(&mut self, op: IntUnOp, operand: Value) -> Value {
        let ty = self.ir.module.value_type(operand);
        let overload = self.type_overload_suffix(ty, Signedness::DontCare);
        let op_name = match op {
            IntUnOp::ReverseBits => "reverse_bits",
            IntUnOp::Popcount => "popcount",
        };
        let name = format!("air.{op_name}{overload}");
        let attrs = AttributeList::function(&[Attr::NoUnwind, Attr::WillReturn, Attr::ReadNone]);
        let func = self.get_fn(&name, vec![ty], ty, attrs);
        self.ir.build_call(func, &[operand])
    }

    pub fn int_binop(&mut self, op: IntBinOp, lhs: Value, rhs: Value, signed: bool) -> Value {
        let ty = self.ir.module.value_type(lhs);
        let sign = if signed {
            Signedness::Signed
        } else {
            Signedness::Unsigned
        };
        let overload = self.type_overload_suffix(ty, sign);
        let op_name = match op {
            IntBinOp::Max => "max",
            IntBinOp::Min => "min",
            IntBinOp::MulHi => "mul_hi",
        };
        let name = format!("air.{op_name}{overload}");
        let attrs = AttributeList::function(&[Attr::NoUnwind, Attr::WillReturn, Attr::ReadNone]);
        let func = self.get_fn(&name, vec![ty, ty], ty, attrs);
        self.ir.build_call(func, &[lhs, rhs])
    }

    /* Conversions */

    fn convert(&mut self, value: Value, dst: TypeId, dst_sign: Signedness, src_sign: Signedness) -> Value {
        let src = self.ir.module.value_type(value);
        let dst_suffix = self.type_overload_suffix(dst, dst_sign);
        let src_suffix = self.type_overload_suffix(src, src_sign);
        let name = format!("air.convert{dst_suffix}{src_suffix}");
        let attrs = AttributeList::function(&[Attr::ReadNone, Attr::NoUnwind, Attr::WillReturn]);
        let func = self.get_fn(&name, vec![src], dst, attrs);
        self.ir.build_call(func, &[value])
    }

    pub fn convert_to_float(&mut self, value: Value, src_sign: Signedness) -> Value {
        let src = self.ir.module.value_type(value);
        let dim = self.ir.module.types.vector_len(src).unwrap_or(1);
        let dst = self.float_vec_ty(dim);
        self.convert(value, dst, Signedness::Signed, src_sign)
    }

    pub fn convert_to_half(&mut self, value: Value, src_sign: Signedness) -> Value {
        let src = self.ir.module.value_type(value);
        let dim = self.ir.module.types.vector_len(src).unwrap_or(1);
        let dst = self.half_vec_ty(dim);
        self.convert(value, dst, Signedness::Signed, src_sign)
    }

    pub fn convert_to_signed(&mut self, value: Value) -> Value {
        let src = self.ir.module.value_type(value);
        let dim = self.ir.module.types.vector_len(src).unwrap_or(1);
        let dst = self.int_vec_ty(dim);
        self.convert(value, dst, Signedness::Signed, Signedness::Signed)
    }

    pub fn convert_to_unsigned(&mut self, value: Value) -> Value {
        let src = self.ir.module.value_type(value);
        let dim = self.ir.module.types.vector_len(src).unwrap_or(1);
        let dst = self.int_vec_ty(dim);
        self.convert(value, dst, Signedness::Unsigned, Signedness::Unsigned)
    }

    /// `air.unpack.<op>`: normalized/packed vertex format decode.
    pub fn unpack(&mut self, op: &str, src: Value, dst: TypeId) -> Value {
        let src_ty = self.ir.module.value_type(src);
        let name = format!("air.unpack.{op}");
        let attrs = AttributeList::function(&[
            Attr::NoUnwind,
            Attr::WillReturn,
            Attr::MustProgress,
            Attr::NoFree,
            Attr::NoSync,
            Attr::ReadNone,
        ]);
        let func = self.get_fn(&name, vec![src_ty], dst, attrs);
        self.ir.build_call(func, &[src])
    }

    /* Pull-mode interpolation */

    pub fn interpolate_at_center(&mut self, interpolant: Value, perspective: bool) -> Value {
        self.interpolate("center", interpolant, perspective, None)
    }

    pub fn interpolate_at_centroid(&mut self, interpolant: Value, perspective: bool) -> Value {
        self.interpolate("centroid", interpolant, perspective, None)
    }

    pub fn interpolate_at_sample(
        &mut self,
        interpolant: Value,
        sample_index: Value,
        perspective: bool,
    ) -> Value {
        self.interpolate("sample", interpolant, perspective, Some(sample_index))
    }

    pub fn interpolate_at_offset(
        &mut self,
        interpolant: Value,
        offset: Value,
        perspective: bool,
    ) -> Value {
        self.interpolate("offset", interpolant, perspective, Some(offset))
    }

    fn interpolate(
        &mut self,
        mode: &str,
        interpolant: Value,
        perspective: bool,
        extra: Option<Value>,
    ) -> Value {
        let name = format!(
            "air.interpolate_{mode}_{}perspective.v4f32",
            if perspective { "" } else { "no_" }
        );
        let interpolant_ty = self.ir.module.value_type(interpolant);
        let ret = self.float_vec_ty(4);
        let mut params = vec![interpolant_ty];
        let mut args = vec![interpolant];
        if let Some(extra) = extra {
            params.push(self.ir.module.value_type(extra));
            args.push(extra);
        }
        let attrs = AttributeList::function(&[Attr::NoUnwind, Attr::WillReturn, Attr::ArgMemOnly])
            .with_param(1, &[Attr::NoCapture, Attr::ReadOnly]);
        let func = self.get_fn(&name, params, ret, attrs);
        self.ir.build_call(func, &args)
    }

    /* Object stage */

    /// `air.set_threadgroups_per_grid_mesh_properties`: the grid-props
    /// handle is located among the function arguments.
    pub fn set_mesh_properties(&mut self, grid_size: Value) -> VResult {
        let props = self.mesh_grid_props().ok_or_else(|| {
            AirError::InvalidOperation(
                "mesh grid properties handle not present in function".to_string(),
            )
        })?;
        let props_ty = self.mesh_grid_props_type();
        let int3 = self.int_vec_ty(3);
        let void = self.void_ty();
        let attrs = AttributeList::function(&[
            Attr::NoUnwind,
            Attr::WillReturn,
            Attr::ArgMemOnly,
            Attr::MustProgress,
        ])
        .with_param(1, &[Attr::NoCapture]);
        let func = self.get_fn(
            "air.set_threadgroups_per_grid_mesh_properties",
            vec![props_ty, int3],
            void,
            attrs,
        );
        Ok(self.ir.build_call(func, &[props, grid_size]))
    }

    /* Mesh stage */

    fn mesh_fn(
        &mut self,
        name: &str,
        extra_params: Vec<TypeId>,
    ) -> Result<(FuncId, Value), AirError> {
        let handle = self.mesh_handle().ok_or_else(|| {
            AirError::InvalidOperation("mesh handle not present in function".to_string())
        })?;
        let mesh_ty = self.mesh_handle_type();
        let mut params = vec![mesh_ty];
        params.extend(extra_params);
        let void = self.void_ty();
        let attrs =
            AttributeList::function(&[Attr::NoUnwind, Attr::WillReturn, Attr::ArgMemOnly])
                .with_param(1, &[Attr::NoCapture]);
        Ok((self.get_fn(name, params, void, attrs), handle))
    }

    /// `air.set_position_mesh`; the position is sanitized first: any
    /// non-finite lane replaces the whole vector with `(0, 0, 1, 0)`.
    pub fn set_mesh_position(&mut self, vertex: Value, position: Value) -> VResult {
        let position = self.sanitize_position(position);
        let int = self.int_ty();
        let float4 = self.float_vec_ty(4);
        let (func, handle) = self.mesh_fn("air.set_position_mesh", vec![int, float4])?;
        Ok(self.ir.build_call(func, &[handle, vertex, position]))
    }

    pub fn set_mesh_render_target_array_index(&mut self, vertex: Value, index: Value) -> VResult {
        let int = self.int_ty();
        let (func, handle) =
            self.mesh_fn("air.set_render_target_array_index_mesh.i32", vec![int, int])?;
        Ok(self.ir.build_call(func, &[handle, vertex, index]))
    }

    pub fn set_mesh_viewport_array_index(&mut self, vertex: Value, index: Value) -> VResult {
        let int = self.int_ty();
        let (func, handle) =
            self.mesh_fn("air.set_viewport_array_index_mesh.i32", vec![int, int])?;
        Ok(self.ir.build_call(func, &[handle, vertex, index]))
    }

    pub fn set_mesh_clip_distance(
        &mut self,
        vertex: Value,
        index: Value,
        value: Value,
    ) -> VResult {
        let int = self.int_ty();
        let float = self.float_ty();
        let (func, handle) = self.mesh_fn("air.set_clip_distance_mesh", vec![int, int, float])?;
        Ok(self.ir.build_call(func, &[handle, index, vertex, value]))
    }

    pub fn set_mesh_point_size(&mut self, vertex: Value, size: Value) -> VResult {
        let int = self.int_ty();
        let float = self.float_ty();
        let (func, handle) = self.mesh_fn("air.set_point_size_mesh", vec![int, float])?;
        Ok(self.ir.build_call(func, &[handle, vertex, size]))
    }

    pub fn set_mesh_vertex_data(
        &mut self,
        vertex: Value,
        data_index: Value,
        value: Value,
    ) -> VResult {
        let int = self.int_ty();
        let value_ty = self.ir.module.value_type(value);
        let overload = self.type_overload_suffix(value_ty, Signedness::DontCare);
        let name = format!("air.set_vertex_data_mesh{overload}");
        let (func, handle) = self.mesh_fn(&name, vec![int, int, value_ty])?;
        Ok(self.ir.build_call(func, &[handle, data_index, vertex, value]))
    }

    pub fn set_mesh_primitive_data(
        &mut self,
        primitive: Value,
        data_index: Value,
        value: Value,
    ) -> VResult {
        let int = self.int_ty();
        let value_ty = self.ir.module.value_type(value);
        let overload = self.type_overload_suffix(value_ty, Signedness::DontCare);
        let name = format!("air.set_primitive_data_mesh{overload}");
        let (func, handle) = self.mesh_fn(&name, vec![int, int, value_ty])?;
        Ok(self
            .ir
            .build_call(func, &[handle, data_index, primitive, value]))
    }

    /// `air.set_index_mesh`: the vertex id narrows to a byte.
    pub fn set_mesh_index(&mut self, index: Value, vertex: Value) -> VResult {
        let int = self.int_ty();
        let byte = self.byte_ty();
        let (func, handle) = self.mesh_fn("air.set_index_mesh", vec![int, byte])?;
        let vertex = self.ir.build_zext_or_trunc(vertex, byte);
        Ok(self.ir.build_call(func, &[handle, index, vertex]))
    }

    pub fn set_mesh_primitive_count(&mut self, count: Value) -> VResult {
        let int = self.int_ty();
        let (func, handle) = self.mesh_fn("air.set_primitive_count_mesh", vec![int])?;
        Ok(self.ir.build_call(func, &[handle, count]))
    }

    /// Replaces a position whose lanes include any non-finite value (all
    /// ones in the 8-bit exponent field) with the clipped `(0, 0, 1, 0)`.
    pub fn sanitize_position(&mut self, position: Value) -> Value {
        let int4 = self.int_vec_ty(4);
        let bits = self.ir.build_bitcast(position, int4);
        let exp_mask = self.int4(0x7f80_0000, 0x7f80_0000, 0x7f80_0000, 0x7f80_0000);
        let masked = self.ir.build_and(bits, exp_mask);
        let finite_lanes = self.ir.build_icmp(Pred::Ne, masked, exp_mask);
        let l0 = self.ir.build_extract_element(finite_lanes, 0);
        let l1 = self.ir.build_extract_element(finite_lanes, 1);
        let l2 = self.ir.build_extract_element(finite_lanes, 2);
        let l3 = self.ir.build_extract_element(finite_lanes, 3);
        let a = self.ir.build_and(l0, l1);
        let b = self.ir.build_and(l2, l3);
        let all_finite = self.ir.build_and(a, b);
        let clipped = self.ir.module.const_f32_vec(&[0.0, 0.0, 1.0, 0.0]);
        self.ir.build_select(all_finite, position, clipped)
    }

    /// Convenience for float <-> int lane reinterpretation.
    pub fn bitcast_to_float(&mut self, value: Value) -> Value {
        let ty = self.ir.module.value_type(value);
        let dim = self.ir.module.types.vector_len(ty).unwrap_or(1);
        let dst = self.float_vec_ty(dim);
        self.ir.build_cast(CastOp::Bitcast, value, dst)
    }

    pub fn bitcast_to_int(&mut self, value: Value) -> Value {
        let ty = self.ir.module.value_type(value);
        let dim = self.ir.module.types.vector_len(ty).unwrap_or(1);
        let dst = self.int_vec_ty(dim);
        self.ir.build_cast(CastOp::Bitcast, value, dst)
    }
}
