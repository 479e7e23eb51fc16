//! DXBC (Shader Model 5.x) to Metal AIR cross-compilation.
//!
//! The public surface is [`convert`]: Direct3D shader bytecode in, a
//! `.metallib` binary out, ready for a Metal runtime to load and
//! dispatch. The heavy lifting lives in the workspace crates:
//! `airlift-dxbc` parses the container, `airlift-translate` decodes and
//! lowers the program, and `airlift-air` builds and serializes the AIR
//! module.

pub use airlift_translate::pipeline::ConversionArgs;
pub use airlift_translate::vertex_pulling::{
    AttributeFormat, IndexFormat, InputLayout, StepFunction, VertexAttribute,
};
pub use airlift_translate::TranslateError as ConvertError;

/// Compiles a DXBC container into a `.metallib` binary.
///
/// Fails with a typed [`ConvertError`]; no partial output is produced.
/// The emitted bytes are bit-identical across runs for identical inputs
/// and arguments.
pub fn convert(bytecode: &[u8], args: &ConversionArgs) -> Result<Vec<u8>, ConvertError> {
    tracing::debug!(bytes = bytecode.len(), "converting DXBC container");
    airlift_translate::pipeline::convert_shader(bytecode, args)
}
