//! External service client implementations.

pub mod drive;
pub mod paperless;

pub use drive::{DriveAuth, DriveStorageProvider};
pub use paperless::PaperlessSink;
