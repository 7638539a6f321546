//! # clipshare-server
//!
//! Session registry, broadcast hub, and the Axum server around them.
//!
//! - [`store`]: per-code session state behind sharded locks
//! - [`expiry`]: idle timers with generation-checked firing
//! - [`hub`]: connection membership and fan-out
//! - [`registry`]: owns the three above for the life of the process
//! - [`controller`]: socket intents and upload/download calls
//! - [`server`]: router, WebSocket upgrade, startup, and shutdown

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod connection;
pub mod controller;
pub mod expiry;
pub mod health;
pub mod http;
pub mod hub;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod store;

pub use config::{ConfigError, ServerConfig};
pub use controller::{FileUpload, SessionController};
pub use registry::SessionRegistry;
pub use server::{build_router, start, AppState, ServerHandle};
