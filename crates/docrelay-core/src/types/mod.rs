//! Core type definitions used across the DocRelay workspace.

pub mod id;
pub mod page;

pub use id::*;
pub use page::{Collected, Page, collect_pages, paginate};
