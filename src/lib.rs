//! Atelier — tool-calling chat orchestration engine.
//!
//! Sits between an end user and a chat-completions API and gives the model
//! the ability to invoke external tools exposed by independently running
//! tool providers (local subprocesses or remote event-stream servers).
//!
//! The pipeline: build the prompt from the user turn, recent history, and
//! project context; call the completion API (streaming or not); reassemble
//! fragmented tool calls from the delta stream; execute the completed calls
//! in parallel through the provider registry; then issue a follow-up
//! completion that turns the tool results into the final answer.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use atelier::chat::ChatHandler;
//! use atelier::config::AtelierConfig;
//!
//! # async fn example() -> atelier::error::Result<()> {
//! let config = AtelierConfig::from_env();
//! let handler = ChatHandler::from_config(&config)?;
//! let outcome = handler.process_message("add a header", &[], None, None).await?;
//! println!("{}", outcome.content);
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod completion;
pub mod config;
pub mod error;
pub mod provider;
pub mod types;
