//! Value objects passed through the pipeline

pub mod options;
pub mod parameters;

pub use options::{IsolationLevel, Options, RESERVED_OPTIONS};
pub use parameters::{ParameterType, Parameters};
