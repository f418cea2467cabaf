//! Offline sweep driver for fusetune kernels.

pub mod cli;
pub mod manifest;

pub use manifest::*;
