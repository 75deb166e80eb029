//! Client-facing errors.
//!
//! Everything that stops a request before response headers are sent ends
//! up here and is rendered as an S3 error document, so SDKs parse it the
//! same way they parse errors from S3 itself.

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, Response, StatusCode};
use quick_xml::escape::escape;

use crate::gateway::lifecycle::TransitionError;
use crate::rewrite::RewriteError;
use crate::upstream::DispatchError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Lifecycle(#[from] TransitionError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Rewrite(RewriteError::UnsupportedMethod(_)) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::Rewrite(RewriteError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
            GatewayError::Dispatch(e) => match e {
                DispatchError::PoolExhausted { .. } | DispatchError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                DispatchError::Connect { .. }
                | DispatchError::Tls { .. }
                | DispatchError::Handshake { .. }
                | DispatchError::Transport(_) => StatusCode::BAD_GATEWAY,
                DispatchError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            },
            GatewayError::Lifecycle(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// S3 error code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Rewrite(RewriteError::UnsupportedMethod(_)) => "MethodNotAllowed",
            GatewayError::Rewrite(RewriteError::InvalidPath(_)) => "InvalidURI",
            GatewayError::Dispatch(DispatchError::PoolExhausted { .. } | DispatchError::Timeout) => {
                "GatewayTimeout"
            }
            GatewayError::Dispatch(DispatchError::Cancelled) => "ServiceUnavailable",
            GatewayError::Dispatch(_) => "BadGateway",
            GatewayError::Lifecycle(_) => "InternalError",
        }
    }

    /// Render as `<Error><Code/><Message/><RequestId/></Error>`.
    pub fn into_response(self, request_id: &str) -> Response<Body> {
        let document = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{}</Code><Message>{}</Message><RequestId>{}</RequestId></Error>",
            self.code(),
            escape(self.to_string().as_str()),
            escape(request_id),
        );

        let length = document.len();
        let mut response = Response::new(Body::from(document));
        *response.status_mut() = self.status();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        if let Ok(value) = HeaderValue::from_str(request_id) {
            headers.insert("x-amz-request-id", value);
        }
        response
    }
}
