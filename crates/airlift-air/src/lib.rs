//! AIR (Apple Intermediate Representation) module construction.
//!
//! Three layers, lowest first:
//! - [`ir`]: a self-contained LLVM-14-style SSA IR (typed-pointer dialect)
//!   with a module/function/basic-block/builder surface, a verifier, and a
//!   cleanup pipeline.
//! - [`air`]: typed constructors for the Metal intrinsic ABI on top of the
//!   IR: texture ops, atomics, interpolants, mesh/object stage output,
//!   barriers, and the `air.*` symbol mangling rules.
//! - [`metallib`]: the `.metallib` v2.7 container writer, embedding the
//!   module serialized by [`bitcode`].

pub mod air;
pub mod bitcode;
pub mod ir;
pub mod metallib;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AirError {
    /// A well-formed request for IR the target cannot express, e.g. a write
    /// to a depth texture or an atomic on a float texel.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// The module failed verification after construction.
    #[error("module verification failed: {0}")]
    Verify(String),
    /// Metallib serialization failed.
    #[error("metallib writer: {0}")]
    Writer(String),
}
