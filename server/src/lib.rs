//! WebSocket text-to-speech relay with an HTTP proxy for a local Ollama.
//!
//! Each client connects to `/ws/voice/{client_id}` and sends JSON synthesis
//! requests; audio comes back as ordered binary frames. See [`protocol`]
//! for the wire format and [`session`] for the per-connection lifecycle.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod session;
pub mod transport;
pub mod validation;

pub use app::{build_router, AppState};
pub use config::ServerConfig;
