//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, timeout, body limit)
//!     → /health                → node summary
//!     → anything else          → gateway (route, auth, limit, call)
//!     → response + X-Trace-ID + X-Request-ID
//!
//! Admin listener:
//!     → admin router (bearer key) → registry / breakers / routes / events
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
