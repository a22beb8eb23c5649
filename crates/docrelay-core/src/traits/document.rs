//! Document sink trait for the downstream document-management service.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::result::AppResult;

/// A document to hand over to the sink.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    /// Full file content.
    pub content: Bytes,
    /// Original file name.
    pub filename: String,
    /// MIME type of the content.
    pub mime_type: String,
    /// Creation time of the original file, forwarded as the document date.
    pub created: Option<DateTime<Utc>>,
}

/// Trait for services that accept uploaded documents.
///
/// A rejected upload (non-2xx) is an error; it is retryable unless the
/// service refused the credentials or the document itself.
#[async_trait]
pub trait DocumentSink: Send + Sync + std::fmt::Debug + 'static {
    /// Return the sink type name (e.g., "paperless").
    fn sink_type(&self) -> &str;

    /// Upload one document.
    async fn upload_document(&self, document: DocumentUpload) -> AppResult<()>;
}
