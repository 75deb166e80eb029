//! Outbound request body that reports when it has been fully sent.
//!
//! The response-header deadline starts once the upload is done; until then
//! the exchange is bounded only by cancellation.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::Request;
use bytes::Bytes;
use http_body::{Body as _, Frame, SizeHint};
use tokio::sync::oneshot;

/// Resolves when the wrapped body has reached its end or was dropped.
pub type UploadDone = oneshot::Receiver<()>;

/// Wraps a request body and fires a signal at end of stream.
pub struct UploadBody {
    inner: Body,
    done: Option<oneshot::Sender<()>>,
}

impl UploadBody {
    /// Swap the body of `request` for a tracked one.
    pub fn wrap(request: Request<Body>) -> (Request<Body>, UploadDone) {
        let (tx, rx) = oneshot::channel();
        let (parts, inner) = request.into_parts();
        let mut body = Self {
            inner,
            done: Some(tx),
        };
        if body.inner.is_end_stream() {
            body.signal();
        }
        (Request::from_parts(parts, Body::new(body)), rx)
    }

    fn signal(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl http_body::Body for UploadBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) => this.signal(),
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.signal(),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for UploadBody {
    fn drop(&mut self) {
        // The connection stopped reading the body (finished or failed).
        self.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_empty_body_done_immediately() {
        let request = Request::put("/b/k").body(Body::empty()).unwrap();
        let (_request, mut done) = UploadBody::wrap(request);
        assert!(done.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_done_after_last_frame() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(2);
        let stream = channel_stream(rx);
        let request = Request::put("/b/k").body(Body::from_stream(stream)).unwrap();
        let (request, mut done) = UploadBody::wrap(request);
        let mut body = request.into_body();

        tx.send(Ok(Bytes::from_static(b"part"))).await.unwrap();
        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), "part");
        assert!(done.try_recv().is_err());

        drop(tx);
        assert!(body.frame().await.is_none());
        assert!(done.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_done_when_dropped_early() {
        let (_tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(1);
        let request = Request::put("/b/k")
            .body(Body::from_stream(channel_stream(rx)))
            .unwrap();
        let (request, done) = UploadBody::wrap(request);
        drop(request);
        assert!(done.await.is_ok());
    }

    fn channel_stream(
        mut rx: tokio::sync::mpsc::Receiver<Result<Bytes, std::io::Error>>,
    ) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> {
        futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx))
    }
}
