//! Config space generation, tuned lookup tables and dispatch-time selection
//! for fusetune kernels.

pub mod generator;
pub mod lut;
pub mod selector;
pub mod tuner;

pub use generator::*;
pub use lut::*;
pub use selector::*;
pub use tuner::*;
