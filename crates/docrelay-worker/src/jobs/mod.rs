//! Job implementations run by the dispatcher.

pub mod collect;
pub mod transfer;

pub use collect::{CollectRequest, CollectWorker, ScanMode, collect_files};
pub use transfer::{TransferPipeline, TransferRequest, TransferStats, transfer_file};
