//! Collaborator traits defined in `docrelay-core` and implemented by
//! `docrelay-storage`.

pub mod document;
pub mod storage;
pub mod token_store;

pub use document::{DocumentSink, DocumentUpload};
pub use storage::{ByteStream, Change, ChannelSpec, CloudStorage, RemoteFile, WatchResponse};
pub use token_store::ChangeTokenStore;
