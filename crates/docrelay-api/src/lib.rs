//! # docrelay-api
//!
//! HTTP layer for DocRelay built on Axum.
//!
//! Provides the webhook receiver the storage service pushes change
//! notifications to, the health endpoint, and request logging.

pub mod app;
pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use app::{build_app, serve};
pub use state::AppState;
