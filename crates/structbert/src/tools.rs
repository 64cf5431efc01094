//! Tools the backend may call mid-generation
//!
//! A [`ToolRegistry`] holds the closed set of tools offered for one exchange. Each tool
//! declares a structural [`ToolSchema`] that is both rendered to JSON schema for the backend
//! and used to validate the backend's input before the executor runs.
mod builtin;
mod registry;
mod schema;

pub use builtin::{fahrenheit_to_celsius, sample_temperature, BuiltinTool};
pub use registry::{from_fn, ToolDefinition, ToolExecutor, ToolRegistry};
pub use schema::{FieldSchema, FieldType, ToolSchema};
