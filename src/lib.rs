//! fusetune: configuration generation and selection for fused attention
//! kernels.
//!
//! Kernels are declared in [`kernels`]; config spaces, tuned lookup tables
//! and dispatch-time selection live in [`autotune`].

pub use fusetune_autotune as autotune;
pub use fusetune_kernels as kernels;

pub use fusetune_autotune::{
    Autotuner, Benchmark, ConfigGenerator, ConfigSpace, FallbackPolicy, Lookup, LookupTable,
    LutBuilder, LutEntry, LutKey, Selection, Selector,
};
pub use fusetune_kernels::{
    Binning, Config, Functional, KernelDescriptor, NumericType, ProductionLine, RuntimeShape,
    SchemaError, TuneError, Value,
};
