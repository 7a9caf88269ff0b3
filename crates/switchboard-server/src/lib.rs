//! HTTP and WebSocket surface over the session orchestrator.

pub mod handlers;
pub mod server;
pub mod sink;
pub mod ws;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use sink::{BroadcastSink, ChannelUpdate};
