//! The network seam used by uploads and downloads.
//!
//! [`HttpClient`] is the production implementation. Tests drive the transfer
//! engine through simulated transports instead.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};

use crate::error::{GfileError, Result};
use crate::http::HttpClient;
use crate::transfer::encoder::ChunkBody;

/// A boxed stream of response body bytes.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// A download response whose body has not been read yet.
pub struct DownloadBody {
    /// Value of the `Content-Length` header, if the server sent one.
    pub content_length: Option<u64>,
    pub stream: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for DownloadBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Minimal HTTP surface needed by the transfer engine.
pub trait Transport: Send + Sync {
    /// GET `url` and return the body as text.
    fn get_text(&self, url: &str) -> impl Future<Output = Result<String>> + Send;

    /// POST one encoded chunk and return the response body as text.
    ///
    /// The body must be sent through [`ChunkBody::stream`] so that the
    /// ordering gate is honoured; a fresh stream is taken for every attempt.
    fn post_chunk(&self, url: &str, body: &ChunkBody) -> impl Future<Output = Result<String>> + Send;

    /// GET `url` for streaming.
    fn get_stream(&self, url: &str) -> impl Future<Output = Result<DownloadBody>> + Send;

    /// `Cookie` header value for `url` from the session's cookie store.
    fn cookie_header(&self, url: &str) -> Option<String>;
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

impl Transport for HttpClient {
    async fn get_text(&self, url: &str) -> Result<String> {
        HttpClient::get_text(self, url).await
    }

    async fn post_chunk(&self, url: &str, body: &ChunkBody) -> Result<String> {
        let mut headers = HeaderMap::new();
        let content_type = HeaderValue::from_str(body.content_type())
            .map_err(|e| GfileError::Custom(format!("Invalid content type: {}", e)))?;
        headers.insert(CONTENT_TYPE, content_type);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len() as u64));

        let response = self
            .post(url, headers, || reqwest::Body::wrap_stream(body.stream()))
            .await?;
        Ok(response.text().await?)
    }

    async fn get_stream(&self, url: &str) -> Result<DownloadBody> {
        let response = self.get(url).await?;
        let content_length = declared_length(response.headers());
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(GfileError::RequestError));
        Ok(DownloadBody {
            content_length,
            stream: Box::pin(stream),
        })
    }

    fn cookie_header(&self, url: &str) -> Option<String> {
        HttpClient::cookie_header(self, url)
    }
}
