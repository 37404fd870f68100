//! Tool providers: transport, protocol client, and the routing registry.

pub mod client;
pub mod registry;
pub mod transport;

pub use client::ProviderClient;
pub use registry::ToolProviderRegistry;
pub use transport::{ProviderTransport, RunningProviderService, SseTransport, StdioTransport};
