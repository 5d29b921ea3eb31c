//! Core logic: specification types, expressions, both backends, rendering.

pub mod build;
pub mod codegen;
pub mod error;
pub mod executor;
pub mod expr;
pub mod features;
pub mod parser;
pub mod render;
pub mod resolver;
pub mod runtime;
pub mod tree;
pub mod types;
pub mod value;
