//! Network services for operators: the WebSocket channel and the
//! administrative HTTP API.
//!
//! Both run on one axum router sharing a single `Arc<Interlocking>`:
//!
//! ```ignore
//! use std::sync::Arc;
//! use rs_signalbox::services::{run_server, WebServerConfig};
//!
//! let interlocking = Arc::new(Interlocking::load(store, notifier, &config.server)?);
//! run_server(Arc::clone(&interlocking), WebServerConfig::from_config(&config.web)).await?;
//! ```

// Decoding and result shaping shared by both surfaces
pub mod api;

pub mod operator;

pub mod web;

// Re-exports
pub use api::*;
pub use operator::{dispatch, ws_handler};
pub use web::*;
