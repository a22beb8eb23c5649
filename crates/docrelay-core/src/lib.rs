//! # docrelay-core
//!
//! Core crate for DocRelay. Contains configuration schemas, typed
//! identifiers, page streams, the collaborator traits (cloud storage,
//! document sink, change-token store), and the unified error system.
//!
//! This crate has **no** internal dependencies on other DocRelay crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
