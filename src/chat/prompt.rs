//! Prompt assembly for the first and follow-up completion rounds.

use crate::types::{ChatMessage, FileSystemNode, NodeKind, ProjectContext};

/// Persona and output-format instructions for the first round.
pub const SYSTEM_PROMPT: &str = "You are 'Agent Brutale', a specialized coding agent. Your sole purpose is to build and modify web applications using a strict stack: Next.js, Tailwind CSS, and Shadcn/UI. You follow the BMAD (Blueprint, Model, Assemble, Deploy) method. You are direct, efficient, and your communication style is as raw and utilitarian as a Brutalist building. Provide only code, diffs, and necessary commands. No pleasantries. CRITICAL INSTRUCTIONS: 1. For EVERY code block you generate, whether for a new or existing file, you MUST include a comment on the first line with the relative file path, like this: `// src/components/NewComponent.tsx`. 2. As you progress, you MUST announce your current BMAD stage by outputting a comment on its own line, like this: `// BMAD_STAGE: ASSEMBLE`. The valid stages are BLUEPRINT, MODEL, ASSEMBLE, DEPLOY.";

/// Instruction for the second round, after tool results are in.
pub const FOLLOW_UP_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Respond naturally to the tool results.";

/// History turns replayed into the first round.
pub const HISTORY_WINDOW: usize = 5;

/// History turns replayed into the follow-up round.
pub const FOLLOW_UP_HISTORY_WINDOW: usize = 3;

/// Build the first-round message list: system prompt (plus project context
/// when a non-empty file tree is supplied), recent history, and the new
/// user turn.
pub fn build_conversation(
    user_message: &str,
    history: &[ChatMessage],
    context: Option<&ProjectContext>,
) -> Vec<ChatMessage> {
    let mut system_prompt = SYSTEM_PROMPT.to_string();
    if let Some(context) = context {
        if !context.is_empty() {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(&render_context(context));
        }
    }

    let mut messages = vec![ChatMessage::system(system_prompt)];
    messages.extend(recent_turns(history, HISTORY_WINDOW));
    messages.push(ChatMessage::user(user_message));
    messages
}

/// The last `window` history entries, stripped to role and content.
pub fn recent_turns(history: &[ChatMessage], window: usize) -> Vec<ChatMessage> {
    history[history.len().saturating_sub(window)..]
        .iter()
        .map(ChatMessage::as_turn)
        .collect()
}

/// Render the project-context block: the file tree, then one fenced block
/// per currently-open file. The open-files section is omitted entirely when
/// no file contents were supplied.
pub fn render_context(context: &ProjectContext) -> String {
    let mut block = String::from("### PROJECT CONTEXT ###\n\n");
    block.push_str("File Structure:\n```\n");
    block.push_str(&render_file_tree(&context.file_tree, ""));
    block.push_str("```\n\n");

    if !context.file_contents.is_empty() {
        block.push_str("Currently Open/Active File Contents:\n");
        for (path, content) in &context.file_contents {
            let lang = path.rsplit('.').next().unwrap_or("");
            block.push_str(&format!("```{lang} // {path}\n{content}\n```\n\n"));
        }
    }

    block
}

fn render_file_tree(nodes: &[FileSystemNode], prefix: &str) -> String {
    let mut tree = String::new();
    for (index, node) in nodes.iter().enumerate() {
        let is_last = index == nodes.len() - 1;
        let branch = if is_last { "└── " } else { "├── " };
        tree.push_str(&format!("{prefix}{branch}{}\n", node.name));

        if node.kind == NodeKind::Directory && !node.children.is_empty() {
            let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
            tree.push_str(&render_file_tree(&node.children, &child_prefix));
        }
    }
    tree
}
