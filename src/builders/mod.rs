//! Builders to construct the frame runtime from configuration.

pub mod runtime_builder;

pub use runtime_builder::{build_runtime, RuntimeBuilder};
