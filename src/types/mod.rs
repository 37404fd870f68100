//! Core data types shared across the engine.

pub mod context;
pub mod message;
pub mod tool;

pub use context::{FileSystemNode, NodeKind, ProjectContext};
pub use message::{ChatMessage, Role};
pub use tool::{ResolvedToolCall, ToolCallRequest, ToolDefinition};
