//! Blob storage the provider reads audio from

use crate::error::{TranscriptionError, TranscriptionResult};
use async_trait::async_trait;
use chunkscribe_core::BlobConfig;
use reqwest::{StatusCode, Url};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Remote object store for transcoded audio
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `local` under `name` and return the URI the provider reads from
    async fn put(&self, local: &Path, name: &str) -> TranscriptionResult<String>;

    /// Delete the blob `name`; deleting a missing blob succeeds
    async fn delete(&self, name: &str) -> TranscriptionResult<()>;
}

/// Google Cloud Storage over its JSON API
#[derive(Debug, Clone)]
pub struct GcsBlobStore {
    client: reqwest::Client,
    base_url: Url,
    bucket: String,
    access_token: Option<String>,
}

impl GcsBlobStore {
    /// Create a store for the configured bucket
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the base URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: &BlobConfig) -> TranscriptionResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            TranscriptionError::configuration(format!(
                "invalid blob base_url {}: {e}",
                config.base_url
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upload_timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TranscriptionError::configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            bucket: config.bucket.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> TranscriptionResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TranscriptionError::configuration("blob base_url cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// URI the provider uses for a blob in this bucket
    pub fn uri(&self, name: &str) -> String {
        format!("gs://{}/{name}", self.bucket)
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn put(&self, local: &Path, name: &str) -> TranscriptionResult<String> {
        let bytes = tokio::fs::read(local).await.map_err(|e| {
            TranscriptionError::upload_failure(name, format!("reading {}: {e}", local.display()))
        })?;
        let size = bytes.len();

        let url = self.endpoint(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        debug!("Uploading {} ({size} bytes) to {url}", local.display());

        let response = self
            .authorize(self.client.post(url))
            .query(&[("uploadType", "media"), ("name", name)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| TranscriptionError::upload_failure(name, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::upload_failure(
                name,
                format!("HTTP {status}: {}", body.trim()),
            ));
        }

        let uri = self.uri(name);
        info!("Uploaded {} to {uri}", local.display());
        Ok(uri)
    }

    async fn delete(&self, name: &str) -> TranscriptionResult<()> {
        let url = self.endpoint(&["storage", "v1", "b", &self.bucket, "o", name])?;
        let response = self.authorize(self.client.delete(url)).send().await?;

        match response.status() {
            status if status.is_success() => {
                debug!("Deleted blob {name}");
                Ok(())
            }
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(TranscriptionError::upload_failure(
                name,
                format!("delete returned HTTP {status}"),
            )),
        }
    }
}
