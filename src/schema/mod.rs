//! Schema derivation
//!
//! Turns a model's field table into the request and response contract of
//! each operation. Contracts expose exactly the allowed fields under their
//! wire names; they are what documentation generators and wire encoders
//! consume.

mod compiler;

pub use compiler::{ListParams, OpView, SchemaCompiler, SchemaField, SchemaIn, SchemaOut};
