//! HTTPS object storage provider.
//!
//! Talks to a bucket-style REST API: `PUT`, `HEAD` and `DELETE` on
//! `{endpoint}/{bucket}/{key}` with a bearer token. Request bodies are
//! streamed in chunks so progress follows the bytes handed to the
//! connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, StatusCode};
use tracing::{debug, info};

use bookshelf_core::config::storage::HttpStorageConfig;
use bookshelf_core::error::{AppError, ErrorKind};
use bookshelf_core::result::AppResult;
use bookshelf_core::traits::AuthProvider;
use bookshelf_core::traits::storage::{ObjectStore, PutObjectOutput, TransferProgress};

/// Object store backed by an HTTPS bucket API.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
    public_base_url: String,
    chunk_size: usize,
    auth: Arc<dyn AuthProvider>,
}

impl HttpObjectStore {
    /// Create a new HTTPS object store.
    pub fn new(
        config: &HttpStorageConfig,
        public_base_url: &str,
        auth: Arc<dyn AuthProvider>,
    ) -> AppResult<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(AppError::configuration(
                "storage.http.endpoint must be set for the http provider",
            ));
        }
        if config.bucket.trim().is_empty() {
            return Err(AppError::configuration(
                "storage.http.bucket must be set for the http provider",
            ));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()
            .map_err(|e| {
                AppError::with_source(ErrorKind::Configuration, "Failed to build HTTP client", e)
            })?;

        info!(
            endpoint = %config.endpoint,
            bucket = %config.bucket,
            "Initializing HTTP object store"
        );

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            chunk_size: config.chunk_size_bytes.max(1),
            auth,
        })
    }

    /// URL of the object API for `key`.
    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket,
            key.trim_start_matches('/')
        )
    }

    /// Public URL clients use to fetch `key`.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key.trim_start_matches('/'))
    }
}

/// Map a transport failure into an application error.
fn transport_error(action: &str, key: &str, err: reqwest::Error) -> AppError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::ExternalService
    };
    AppError::with_source(kind, format!("{action} {key} failed: {err}"), err)
}

/// Map a non-success status into an application error.
async fn status_error(action: &str, key: &str, response: reqwest::Response) -> AppError {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return AppError::authentication(format!(
            "{action} {key} was refused ({status}); sign in again"
        ));
    }
    let body = response.text().await.unwrap_or_default();
    let reason = body.trim();
    let message = if reason.is_empty() {
        format!("{action} {key} returned {status}")
    } else {
        format!("{action} {key} returned {status}: {reason}")
    };
    AppError::validation(message)
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn provider_type(&self) -> &str {
        "http"
    }

    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        progress: TransferProgress,
    ) -> AppResult<PutObjectOutput> {
        let token = self.auth.bearer_token().await?;
        let total = data.len() as u64;

        let chunks: Vec<Bytes> = (0..data.len())
            .step_by(self.chunk_size)
            .map(|start| data.slice(start..(start + self.chunk_size).min(data.len())))
            .collect();

        progress(0, total);
        let reporter = Arc::clone(&progress);
        let mut sent = 0u64;
        let body = stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            reporter(sent, total);
            Ok::<Bytes, std::io::Error>(chunk)
        });

        let response = self
            .client
            .put(self.object_url(key))
            .bearer_auth(token)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, total)
            .body(Body::wrap_stream(body))
            .send()
            .await
            .map_err(|e| transport_error("PUT", key, e))?;

        if !response.status().is_success() {
            return Err(status_error("PUT", key, response).await);
        }

        progress(total, total);
        debug!(key, bytes = total, "Uploaded object");
        Ok(PutObjectOutput {
            public_url: self.public_url(key),
        })
    }

    async fn head_object(&self, key: &str) -> AppResult<bool> {
        let token = self.auth.bearer_token().await?;
        let response = self
            .client
            .head(self.object_url(key))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| transport_error("HEAD", key, e))?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error("HEAD", key, response).await),
        }
    }

    async fn delete_object(&self, key: &str) -> AppResult<()> {
        let token = self.auth.bearer_token().await?;
        let response = self
            .client
            .delete(self.object_url(key))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| transport_error("DELETE", key, e))?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(status_error("DELETE", key, response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenAuth;

    fn config(endpoint: &str) -> HttpStorageConfig {
        HttpStorageConfig {
            endpoint: endpoint.to_string(),
            ..HttpStorageConfig::default()
        }
    }

    #[test]
    fn test_urls() {
        let store = HttpObjectStore::new(
            &config("https://objects.example.com/"),
            "https://cdn.example.com/",
            Arc::new(StaticTokenAuth::new("t")),
        )
        .unwrap();

        assert_eq!(
            store.object_url("assets/book-1/image/a.png"),
            "https://objects.example.com/bookshelf-assets/assets/book-1/image/a.png"
        );
        assert_eq!(
            store.public_url("/assets/book-1/image/a.png"),
            "https://cdn.example.com/assets/book-1/image/a.png"
        );
    }

    #[test]
    fn test_missing_endpoint_is_configuration_error() {
        let err = HttpObjectStore::new(&config(""), "x", Arc::new(StaticTokenAuth::new("t")))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_put_without_token_fails_before_network() {
        let store = HttpObjectStore::new(
            &config("http://127.0.0.1:9"),
            "http://cdn",
            Arc::new(StaticTokenAuth::new("")),
        )
        .unwrap();

        let err = store
            .put_object("k", Bytes::from("x"), "text/plain", Arc::new(|_, _| {}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
    }
}
