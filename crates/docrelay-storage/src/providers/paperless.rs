//! Paperless-ngx document upload client.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tracing::info;

use docrelay_core::config::accounts::PaperlessEndpointConfig;
use docrelay_core::error::AppError;
use docrelay_core::result::AppResult;
use docrelay_core::traits::document::{DocumentSink, DocumentUpload};

use crate::http::{check_response, map_reqwest_error};

const POST_DOCUMENT_PATH: &str = "/api/documents/post_document/";

/// Uploads documents to one Paperless server with HTTP basic auth.
#[derive(Clone)]
pub struct PaperlessSink {
    client: Client,
    upload_url: String,
    username: String,
    password: String,
}

impl std::fmt::Debug for PaperlessSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperlessSink")
            .field("upload_url", &self.upload_url)
            .field("username", &self.username)
            .finish()
    }
}

impl PaperlessSink {
    /// Create a sink for a configured endpoint.
    pub fn new(client: Client, endpoint: &PaperlessEndpointConfig) -> Self {
        Self {
            client,
            upload_url: format!(
                "{}{}",
                endpoint.server_url.trim_end_matches('/'),
                POST_DOCUMENT_PATH
            ),
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
        }
    }

    /// The URL documents are posted to.
    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }
}

#[async_trait]
impl DocumentSink for PaperlessSink {
    fn sink_type(&self) -> &str {
        "paperless"
    }

    async fn upload_document(&self, document: DocumentUpload) -> AppResult<()> {
        let size = document.content.len();
        let part = Part::stream_with_length(document.content, size as u64)
            .file_name(document.filename.clone())
            .mime_str(&document.mime_type)
            .map_err(|e| {
                AppError::validation(format!(
                    "Invalid mime type '{}' for {}: {e}",
                    document.mime_type, document.filename
                ))
            })?;

        let mut form = Form::new().part("document", part);
        if let Some(created) = document.created {
            form = form.text("created", created.to_rfc3339());
        }

        let response = self
            .client
            .post(&self.upload_url)
            .basic_auth(&self.username, Some(&self.password))
            .multipart(form)
            .send()
            .await
            .map_err(|e| map_reqwest_error("Paperless upload failed", e))?;

        check_response("Paperless upload failed", response).await?;

        info!(file = %document.filename, bytes = size, "Uploaded document");
        Ok(())
    }
}
