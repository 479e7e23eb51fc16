//! SM5 DXBC → AIR translation.
//!
//! Pipeline order, leaves first: [`sm5`] decodes the program token stream
//! into typed instructions and declarations, [`dtype`] assigns data types
//! to temp registers (splitting mixed-type registers), [`cfg`] recovers a
//! reducible basic-block graph from the structured control tokens,
//! [`binding`] plans the AIR function signature and argument-buffer slots,
//! and [`lower`] emits AIR IR through `airlift_air`'s builders. Hull and
//! domain stages take the [`tess`] path instead, which re-expresses the
//! pair as an object + mesh pipeline. [`pipeline`] glues the steps together
//! behind a single entry point.

pub mod binding;
pub mod cfg;
pub mod dtype;
pub mod lower;
pub mod op;
pub mod pipeline;
pub mod sm5;
pub mod tess;
pub mod vertex_pulling;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslateError {
    /// Bytecode container or token structure is inconsistent.
    #[error("malformed shader: {0}")]
    Malformed(String),
    /// Valid bytecode using a feature this pipeline does not implement.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// IR that cannot legally be constructed (wrong address space, depth
    /// write, and so on).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// Internal inconsistency between the analysis results and the
    /// instruction being lowered.
    #[error("lowering error: {0}")]
    Lowering(String),
    /// Metallib serialization failed.
    #[error("writer error: {0}")]
    Writer(String),
}

impl From<airlift_air::AirError> for TranslateError {
    fn from(err: airlift_air::AirError) -> Self {
        match err {
            airlift_air::AirError::InvalidOperation(msg) => TranslateError::InvalidOperation(msg),
            airlift_air::AirError::Verify(msg) => TranslateError::Lowering(msg),
            airlift_air::AirError::Writer(msg) => TranslateError::Writer(msg),
        }
    }
}

impl From<airlift_dxbc::DxbcError> for TranslateError {
    fn from(err: airlift_dxbc::DxbcError) -> Self {
        TranslateError::Malformed(err.context().to_string())
    }
}
