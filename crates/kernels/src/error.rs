//! Error taxonomy for kernel declarations and config generation.

use thiserror::Error;

/// A kernel declaration or a functional does not provide what generation needs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("compile-time constant {names:?} is not bound by the functional")]
    Missing { names: Vec<String> },

    #[error("compile-time constant {names:?} resolves to {count} distinct values")]
    Ambiguous { names: Vec<String>, count: usize },

    #[error("config has no axis named {0}")]
    UnknownAxis(String),

    #[error("argument {0} is declared more than once")]
    DuplicateArgument(String),

    #[error("{owner} references undeclared name {name}")]
    UndeclaredReference { owner: String, name: String },

    #[error("axis {axis} forms a cross-kernel match cycle through {kernel}")]
    MatchCycle { axis: String, kernel: String },

    #[error("value of {name} is not an integer")]
    NotAnInteger { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TuneError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Every candidate was pruned; a coverage gap in the tuning space.
    #[error("no config survives for kernel {kernel} on {arch} ({numeric_type})")]
    ConfigSpaceEmpty {
        kernel: String,
        arch: String,
        numeric_type: String,
    },

    #[error("kernel {0} is not registered")]
    UnknownKernel(String),

    #[error("architecture {0} has no production line")]
    UnknownArchitecture(String),

    #[error("binning ladder must be non-empty and strictly increasing, got {0:?}")]
    InvalidLadder(Vec<u64>),

    #[error("{kind} {name} is registered twice")]
    DuplicateName { kind: &'static str, name: String },
}

pub type Result<T, E = TuneError> = std::result::Result<T, E>;
