//! Reassembly of streamed completion fragments.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::completion::StreamFragment;
use crate::types::ToolCallRequest;

/// Rebuilds a full assistant response from streamed fragments.
///
/// Content deltas accumulate into one string; tool-call deltas are keyed by
/// their positional index, since one logical call's id, name, and argument
/// JSON usually arrive split across many fragments. Argument text is always
/// appended, never replaced, and the first non-empty name for an index
/// sticks.
#[derive(Default)]
pub struct StreamAssembler {
    content: String,
    calls: BTreeMap<usize, PendingCall>,
}

struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment into the accumulated state.
    ///
    /// Returns the fragment's content delta, if any, so the caller can
    /// forward it to a live display without waiting for the full response.
    pub fn absorb(&mut self, fragment: StreamFragment) -> Option<String> {
        for delta in fragment.tool_calls {
            match self.calls.get_mut(&delta.index) {
                Some(call) => {
                    if call.name.is_empty() {
                        if let Some(name) = delta.name {
                            call.name = name;
                        }
                    }
                    if let Some(arguments) = delta.arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
                None => {
                    self.calls.insert(
                        delta.index,
                        PendingCall {
                            id: delta.id.unwrap_or_else(fallback_call_id),
                            name: delta.name.unwrap_or_default(),
                            arguments: delta.arguments.unwrap_or_default(),
                        },
                    );
                }
            }
        }

        if let Some(delta) = fragment.content {
            self.content.push_str(&delta);
            return Some(delta);
        }
        None
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    /// Finalize into the accumulated content and the completed tool calls,
    /// ordered by stream index.
    pub fn finish(self) -> (String, Vec<ToolCallRequest>) {
        let calls = self
            .calls
            .into_values()
            .map(|call| ToolCallRequest {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            })
            .collect();
        (self.content, calls)
    }
}

fn fallback_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}
