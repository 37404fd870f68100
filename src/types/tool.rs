//! Tool-call and tool-definition types.

use serde::{Deserialize, Serialize};

/// A tool call as requested by the model, with arguments still in raw
/// JSON text form.
///
/// Created when a stream first signals a new tool-call index; the name and
/// argument text may arrive fragmented across many deltas and are filled in
/// by the stream assembler. Immutable once the stream ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument text, accumulated incrementally.
    pub arguments: String,
}

/// A tool call after argument parsing and execution.
///
/// One-way transformation from [`ToolCallRequest`]; never mutated after
/// construction. A failed execution carries `{"error": "..."}` as its
/// result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
}

impl ResolvedToolCall {
    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }
}

/// Schema for a tool advertised by a tool provider.
///
/// Names must be unique across all connected providers; the registry routes
/// by name alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Render in the completion API's tool-declaration shape.
    pub fn to_declaration(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}
