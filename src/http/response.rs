//! Response streaming from the backend to the client.
//!
//! # Responsibilities
//! - Copy status and headers, minus hop-by-hop headers
//! - Relay the body frame by frame in bounded chunks, never buffering it
//! - Give the upstream connection back to the pool once the body ended
//! - Finish the request lifecycle
//!
//! # Design Decisions
//! - Content-Length from the backend is kept and the size hint stays exact,
//!   so hyper only falls back to chunked framing when the backend did
//! - A body cut short is never turned into another status: headers are
//!   already on the wire, so the client connection is aborted instead

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::Response;
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use hyper::body::Incoming;
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFutureOwned};

use crate::config::StreamingConfig;
use crate::gateway::lifecycle::RequestLifecycle;
use crate::observability::metrics;
use crate::rewrite::headers::without_hop_by_hop;
use crate::upstream::{PooledConnection, UpstreamResponse};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a response body ended early.
///
/// There is no way to report an error once a response status has been sent,
/// so either variant surfaces to the client as a truncated body on an
/// aborted connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("upstream body failed after {bytes_sent} bytes: {source}")]
    MidStreamFailure { bytes_sent: u64, source: BoxError },

    #[error("response stream cancelled after {bytes_sent} bytes")]
    Cancelled { bytes_sent: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Largest data frame handed to the client.
    pub chunk_size: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from(&StreamingConfig::default())
    }
}

impl From<&StreamingConfig> for StreamSettings {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
        }
    }
}

/// Build the client response around the backend's response.
///
/// `cancel` is the request's token: it is cancelled when the returned body
/// is dropped, and cancelling it from outside (server shutdown) ends the
/// stream.
pub fn stream(
    upstream: UpstreamResponse,
    lifecycle: RequestLifecycle,
    settings: StreamSettings,
    cancel: CancellationToken,
) -> Response<Body> {
    let UpstreamResponse {
        response,
        connection,
        ..
    } = upstream;
    let (mut parts, incoming) = response.into_parts();
    parts.headers = without_hop_by_hop(&parts.headers);

    let body = StreamingBody::new(incoming, Some(connection), lifecycle, settings, cancel);
    Response::from_parts(parts, Body::new(body))
}

/// A response body relaying an upstream body.
pub struct StreamingBody<B = Incoming> {
    inner: B,
    pending: Bytes,
    chunk_size: usize,
    bytes_sent: u64,
    done: bool,
    connection: Option<PooledConnection>,
    lifecycle: Option<RequestLifecycle>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    _cancel_on_drop: DropGuard,
}

impl<B> StreamingBody<B>
where
    B: http_body::Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    pub fn new(
        inner: B,
        connection: Option<PooledConnection>,
        lifecycle: RequestLifecycle,
        settings: StreamSettings,
        cancel: CancellationToken,
    ) -> Self {
        let mut body = Self {
            inner,
            pending: Bytes::new(),
            chunk_size: settings.chunk_size.max(1),
            bytes_sent: 0,
            done: false,
            connection,
            lifecycle: Some(lifecycle),
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
            _cancel_on_drop: cancel.drop_guard(),
        };
        if body.inner.is_end_stream() {
            body.finish();
        }
        body
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn next_chunk(&mut self) -> Bytes {
        let chunk = if self.pending.len() > self.chunk_size {
            self.pending.split_to(self.chunk_size)
        } else {
            std::mem::take(&mut self.pending)
        };
        self.bytes_sent += chunk.len() as u64;
        if let Some(lifecycle) = self.lifecycle.as_mut() {
            lifecycle.set_bytes_sent(self.bytes_sent);
        }
        if self.pending.is_empty() && self.inner.is_end_stream() {
            self.finish();
        }
        chunk
    }

    /// Body fully relayed: the connection may serve the next request.
    fn finish(&mut self) {
        self.done = true;
        if let Some(connection) = self.connection.take() {
            connection.release();
        }
        if let Some(mut lifecycle) = self.lifecycle.take() {
            if let Err(e) = lifecycle.complete(self.bytes_sent) {
                tracing::error!(request_id = %lifecycle.request_id(), error = %e, "Lifecycle out of order");
            }
        }
    }

    fn abort(&mut self, reason: &str) {
        self.done = true;
        self.pending = Bytes::new();
        // Dropped without `release`: the socket is closed.
        self.connection.take();
        if let Some(mut lifecycle) = self.lifecycle.take() {
            lifecycle.set_bytes_sent(self.bytes_sent);
            if let Err(e) = lifecycle.fail(None, 0, reason) {
                tracing::error!(request_id = %lifecycle.request_id(), error = %e, "Lifecycle out of order");
            }
        }
    }

    fn mid_stream_failure(&mut self, source: BoxError) -> StreamError {
        let request_id = self
            .lifecycle
            .as_ref()
            .map(|l| l.request_id().to_string())
            .unwrap_or_default();
        tracing::error!(
            request_id = %request_id,
            bytes_sent = self.bytes_sent,
            error = %source,
            "Upstream body failed mid-stream, aborting client response"
        );
        metrics::record_truncated_response();
        self.abort("upstream failed mid-stream");
        StreamError::MidStreamFailure {
            bytes_sent: self.bytes_sent,
            source,
        }
    }
}

impl<B> http_body::Body for StreamingBody<B>
where
    B: http_body::Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = StreamError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if !this.pending.is_empty() {
            return Poll::Ready(Some(Ok(Frame::data(this.next_chunk()))));
        }
        if this.cancelled.as_mut().poll(cx).is_ready() {
            tracing::debug!(bytes_sent = this.bytes_sent, "Response stream cancelled");
            this.abort("cancelled");
            return Poll::Ready(Some(Err(StreamError::Cancelled {
                bytes_sent: this.bytes_sent,
            })));
        }

        loop {
            match Pin::new(&mut this.inner).poll_frame(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.finish();
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(this.mid_stream_failure(e.into()))));
                }
                Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                    Ok(data) if data.is_empty() => continue,
                    Ok(data) => {
                        this.pending = data;
                        return Poll::Ready(Some(Ok(Frame::data(this.next_chunk()))));
                    }
                    Err(trailers) => {
                        if this.inner.is_end_stream() {
                            this.finish();
                        }
                        return Poll::Ready(Some(Ok(trailers)));
                    }
                },
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }

    fn size_hint(&self) -> SizeHint {
        if self.done {
            return SizeHint::with_exact(0);
        }
        let inner = self.inner.size_hint();
        let pending = self.pending.len() as u64;
        let mut hint = SizeHint::new();
        hint.set_lower(inner.lower() + pending);
        if let Some(upper) = inner.upper() {
            hint.set_upper(upper + pending);
        }
        hint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode};
    use futures_util::stream;
    use http_body::Body as _;
    use http_body_util::{BodyExt, Full, StreamBody};

    fn streaming_lifecycle() -> RequestLifecycle {
        let mut lc = RequestLifecycle::new("req-stream", Method::GET, "/bucket/big");
        lc.rewritten("http://127.0.0.1:9000").unwrap();
        lc.dispatching().unwrap();
        lc.streaming(StatusCode::OK, 0).unwrap();
        lc
    }

    fn settings(chunk_size: usize) -> StreamSettings {
        StreamSettings { chunk_size }
    }

    #[tokio::test]
    async fn test_large_frames_split_to_chunk_size() {
        let payload = Bytes::from(vec![7u8; 10_000]);
        let mut body = StreamingBody::new(
            Full::new(payload.clone()),
            None,
            streaming_lifecycle(),
            settings(4_096),
            CancellationToken::new(),
        );
        assert_eq!(body.size_hint().exact(), Some(10_000));

        let mut sizes = Vec::new();
        let mut relayed = Vec::new();
        while let Some(frame) = body.frame().await {
            let data = frame.unwrap().into_data().unwrap();
            sizes.push(data.len());
            relayed.extend_from_slice(&data);
        }
        assert_eq!(sizes, vec![4_096, 4_096, 1_808]);
        assert_eq!(relayed, payload.to_vec());
        assert!(body.is_end_stream());
        assert!(body.lifecycle.is_none());
        assert_eq!(body.bytes_sent(), 10_000);
    }

    #[tokio::test]
    async fn test_empty_body_completes_immediately() {
        let body = StreamingBody::new(
            Full::new(Bytes::new()),
            None,
            streaming_lifecycle(),
            settings(1_024),
            CancellationToken::new(),
        );
        assert!(body.is_end_stream());
        assert!(body.lifecycle.is_none());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_surfaces_error() {
        let frames: Vec<Result<Frame<Bytes>, std::io::Error>> = vec![
            Ok(Frame::data(Bytes::from_static(b"partial"))),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut body = StreamingBody::new(
            StreamBody::new(stream::iter(frames)),
            None,
            streaming_lifecycle(),
            settings(1_024),
            CancellationToken::new(),
        );

        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), Bytes::from_static(b"partial"));

        let err = body.frame().await.unwrap().unwrap_err();
        match err {
            StreamError::MidStreamFailure { bytes_sent, .. } => assert_eq!(bytes_sent, 7),
            other => panic!("unexpected error: {other}"),
        }
        assert!(body.frame().await.is_none());
        assert!(body.lifecycle.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream() {
        let cancel = CancellationToken::new();
        let frames = stream::pending::<Result<Frame<Bytes>, std::io::Error>>();
        let mut body = StreamingBody::new(
            StreamBody::new(frames),
            None,
            streaming_lifecycle(),
            settings(1_024),
            cancel.clone(),
        );

        cancel.cancel();
        let err = body.frame().await.unwrap().unwrap_err();
        assert!(matches!(err, StreamError::Cancelled { bytes_sent: 0 }));
    }

    #[tokio::test]
    async fn test_dropping_body_cancels_request_token() {
        let cancel = CancellationToken::new();
        let body = StreamingBody::new(
            StreamBody::new(stream::pending::<Result<Frame<Bytes>, std::io::Error>>()),
            None,
            streaming_lifecycle(),
            settings(1_024),
            cancel.clone(),
        );
        drop(body);
        assert!(cancel.is_cancelled());
    }
}
