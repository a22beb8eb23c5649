//! # docrelay-storage
//!
//! Clients for the external services DocRelay talks to: the Google Drive
//! API (folders, change log, notification channels) and the Paperless
//! document upload endpoint. Also hosts the change-token stores.

pub mod auth;
pub mod http;
pub mod manager;
pub mod providers;
pub mod token_store;

pub use manager::ClientManager;
pub use providers::{DriveStorageProvider, PaperlessSink};
pub use token_store::{FileTokenStore, MemoryTokenStore};
