//! CW-010: Error taxonomy.
//!
//! Reference errors abort a whole translation or evaluation. Step errors
//! truncate an action. Format errors never drop generated source.

use crate::transport::TransportError;
use thiserror::Error;

/// A flag, arg or step name that is not in scope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("unknown flag: {0}")]
    UnknownFlag(String),
    #[error("unknown arg: {0}")]
    UnknownArg(String),
    #[error("unknown step: {0}")]
    UnknownStep(String),
}

/// Malformed expression string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("unclosed reference at position {0}")]
    Unclosed(usize),
    #[error("empty reference at position {0}")]
    Empty(usize),
    #[error("unknown namespace '{0}' (expected flag, arg or step)")]
    UnknownNamespace(String),
    #[error("reference '{0}' is missing a name")]
    MissingName(String),
}

/// A step whose HTTP call failed.
#[derive(Debug, Error)]
#[error("step {step}: {source}")]
pub struct StepError {
    pub step: String,
    #[source]
    pub source: TransportError,
}

/// Data shape does not fit the output format.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("table output requires an array")]
    NotAnArray,
    #[error("unknown output format: {0}")]
    UnknownFormat(String),
    #[error("cannot encode output: {0}")]
    Encode(String),
    #[error("cannot write output: {0}")]
    Io(#[from] std::io::Error),
}

/// Wrong number of positional arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{command}: {message}")]
pub struct ArityError {
    pub command: String,
    pub message: String,
}

/// Post-generation formatting failed. Source is still available.
#[derive(Debug, Clone, Error)]
#[error("rustfmt failed: {0}")]
pub struct FormatError(pub String);

/// External toolchain failure.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("cargo build failed ({status}):\n{output}")]
    Toolchain { status: String, output: String },
    #[error("cannot run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Specification could not be loaded.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

/// Any failure surfaced to the top-level invocation.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Step(#[from] StepError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Arity(#[from] ArityError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0} validation error(s)")]
    Invalid(usize),
    #[error("cannot write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Usage(String),
}
