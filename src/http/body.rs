//! Request body replay and response draining.
//!
//! A retried request must put byte-identical content on the wire for every
//! attempt. The body is materialised once into a [`BodySnapshot`] and each
//! attempt gets a fresh [`Body`] over the same shared buffer.

use axum::body::Body;
use axum::http::{Extensions, HeaderMap, Method, Request, Response, Uri, Version};
use bytes::Bytes;
use futures_util::StreamExt;

use crate::error::Error;

/// Maximum number of bytes read from a discarded response.
pub const RESPONSE_READ_LIMIT: usize = 4096;

/// Immutable copy of a request body.
#[derive(Debug, Clone, Default)]
pub struct BodySnapshot {
    bytes: Bytes,
}

impl BodySnapshot {
    /// Read `body` to the end, failing if it exceeds `limit` bytes.
    pub async fn capture(body: Body, limit: usize) -> Result<Self, Error> {
        let bytes = axum::body::to_bytes(body, limit)
            .await
            .map_err(|e| Error::Body(e.into()))?;
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// A new readable body over the snapshot.
    pub fn reader(&self) -> Body {
        if self.bytes.is_empty() {
            Body::empty()
        } else {
            Body::from(self.bytes.clone())
        }
    }
}

/// A request split into its head and a body snapshot, rebuildable per attempt.
#[derive(Debug, Clone)]
pub struct ReplayableRequest {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    extensions: Extensions,
    body: BodySnapshot,
}

impl ReplayableRequest {
    /// Buffer the body of `request` (at most `limit` bytes).
    pub async fn capture(request: Request<Body>, limit: usize) -> Result<Self, Error> {
        let (parts, body) = request.into_parts();
        let body = BodySnapshot::capture(body, limit).await?;
        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            extensions: parts.extensions,
            body,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn body(&self) -> &BodySnapshot {
        &self.body
    }

    /// Build a fresh request for the next attempt.
    pub fn build(&self) -> Request<Body> {
        let mut request = Request::new(self.body.reader());
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers.clone();
        *request.extensions_mut() = self.extensions.clone();
        request
    }
}

/// Consume and discard a response body so its connection can be reused.
///
/// Reads at most [`RESPONSE_READ_LIMIT`] bytes; a larger body is dropped and
/// its connection closed instead.
pub async fn drain_body(response: Response<Body>) {
    let mut stream = response.into_body().into_data_stream();
    let mut read = 0usize;
    while read < RESPONSE_READ_LIMIT {
        match stream.next().await {
            Some(Ok(chunk)) => read += chunk.len(),
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_yields_identical_readers() {
        let snapshot = BodySnapshot::capture(Body::from("payload-123"), usize::MAX)
            .await
            .unwrap();

        for _ in 0..3 {
            let bytes = axum::body::to_bytes(snapshot.reader(), usize::MAX)
                .await
                .unwrap();
            assert_eq!(&bytes[..], b"payload-123");
        }
    }

    #[tokio::test]
    async fn snapshot_respects_limit() {
        let err = BodySnapshot::capture(Body::from(vec![0u8; 64]), 16)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Body(_)));
    }

    #[tokio::test]
    async fn replayable_request_preserves_head() {
        let request = Request::builder()
            .method(Method::PUT)
            .uri("http://example.test/items/7")
            .header("content-type", "application/json")
            .extension(42u32)
            .body(Body::from("{\"a\":1}"))
            .unwrap();

        let replay = ReplayableRequest::capture(request, usize::MAX).await.unwrap();
        let first = replay.build();
        let second = replay.build();

        assert_eq!(first.method(), Method::PUT);
        assert_eq!(second.uri(), "http://example.test/items/7");
        assert_eq!(second.headers()["content-type"], "application/json");
        assert_eq!(second.extensions().get::<u32>(), Some(&42));

        let a = axum::body::to_bytes(first.into_body(), usize::MAX).await.unwrap();
        let b = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
        assert_eq!(a, b);
    }
}
