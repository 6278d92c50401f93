//! Upload transport.
//!
//! A [`Transport`] sends one [`FilePayload`] to the backend and reports how
//! much of it has gone out. [`HttpTransport`] does this with a single
//! multipart POST whose body is streamed in chunks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};

use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::file::FilePayload;

/// Multipart field name carrying the file.
pub const FILE_FIELD: &str = "file";

/// Callback receiving the fraction of the payload sent so far.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// How the backend answered a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOutcome {
    /// The backend answered HTTP 200.
    Accepted,
    /// The backend answered with another status.
    Rejected {
        /// HTTP status code
        status: u16,
    },
}

impl TransportOutcome {
    /// Whether the upload was accepted.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Sends a payload to the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `file`, calling `progress` as bytes go out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the request could not be completed.
    async fn send(&self, file: &FilePayload, progress: ProgressFn) -> Result<TransportOutcome>;
}

/// Multipart POST transport built on `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    chunk_size: usize,
    timeout: Option<Duration>,
}

impl HttpTransport {
    /// Create a transport posting to `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            timeout: None,
        }
    }

    /// Create a transport from the transfer configuration.
    #[must_use]
    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(config.endpoint.clone())
            .with_chunk_size(config.chunk_size)
            .with_timeout(config.request_timeout)
    }

    /// Set the size of streamed body chunks.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Set a timeout for the whole request.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint the transport posts to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn streamed_body(&self, data: Vec<u8>, progress: ProgressFn) -> Body {
        let chunk_size = self.chunk_size;
        let stream = async_stream::stream! {
            let total = data.len();
            if total == 0 {
                progress(1.0);
            }
            let mut sent = 0usize;
            for chunk in data.chunks(chunk_size) {
                sent += chunk.len();
                progress(sent as f64 / total as f64);
                yield Ok::<_, std::io::Error>(chunk.to_vec());
            }
        };
        Body::wrap_stream(stream)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, file: &FilePayload, progress: ProgressFn) -> Result<TransportOutcome> {
        let size = file.size();
        let body = self.streamed_body(file.data.clone(), progress);

        let mut part = Part::stream_with_length(body, size).file_name(file.name.clone());
        if let Some(content_type) = &file.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| Error::Internal(format!("invalid content type: {e}")))?;
        }
        let form = Form::new().part(FILE_FIELD, part);

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            file_name = %file.name,
            size,
            "Posting upload"
        );

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("upload request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::OK {
            tracing::debug!(file_name = %file.name, "Upload accepted");
            Ok(TransportOutcome::Accepted)
        } else {
            tracing::debug!(file_name = %file.name, status = status.as_u16(), "Upload rejected");
            Ok(TransportOutcome::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome() {
        assert!(TransportOutcome::Accepted.is_accepted());
        assert!(!TransportOutcome::Rejected { status: 500 }.is_accepted());
    }

    #[test]
    fn test_from_config() {
        let config = TransferConfig {
            endpoint: "http://127.0.0.1:9/upload".to_string(),
            chunk_size: 0,
            request_timeout: Some(Duration::from_secs(5)),
            retry_http_errors: false,
        };
        let transport = HttpTransport::from_config(&config);

        assert_eq!(transport.endpoint(), "http://127.0.0.1:9/upload");
        assert_eq!(transport.chunk_size, 1);
        assert_eq!(transport.timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(format!("http://{addr}/api/upload/file"));
        let file = FilePayload::new("video.mp4", vec![0; 1024]);
        let result = transport.send(&file, Arc::new(|_| {})).await;

        assert!(matches!(result, Err(Error::Network(_))));
    }
}
