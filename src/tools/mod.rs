//! Tools a step can request: warranty lookup and ticket creation.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::ToolRegistry;
pub use tool::*;
