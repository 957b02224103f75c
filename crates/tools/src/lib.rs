//! Tool Integration
//!
//! The tool-registry boundary of the orchestration core: named,
//! side-effecting operations looked up by name and invoked with JSON inputs.

#![warn(missing_docs)]

pub mod r#trait;
pub mod registry;
pub mod builtin;

pub use r#trait::{FnTool, Parameter, Tool, ToolOutput, ToolRegistry, ToolSchema};
pub use registry::InMemoryToolRegistry;
pub use builtin::{CommandTool, EchoTool};
