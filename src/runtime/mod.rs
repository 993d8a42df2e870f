//! Runtime composition: configuration plus the [`FlowRuntime`] entry point.

pub mod config;
pub mod flow;

pub use config::RuntimeConfig;
pub use flow::{FlowRuntime, FlowRuntimeBuilder, RuntimeError};
