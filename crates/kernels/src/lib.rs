//! Kernel declarations for fusetune: argument schemas, tunable axes,
//! functionals, configs and shape binning.

pub mod arch;
pub mod attention;
pub mod axis;
pub mod binning;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod functional;
pub mod registry;
pub mod schema;

pub use arch::*;
pub use attention::*;
pub use axis::*;
pub use binning::*;
pub use config::*;
pub use descriptor::*;
pub use error::{SchemaError, TuneError};
pub use functional::*;
pub use registry::*;
pub use schema::*;
