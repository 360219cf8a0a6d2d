use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Failures of a single forwarded request.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// The upstream host could not be reached or the exchange broke off
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The request could not be sent as built (e.g. relative URI)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// Outbound HTTP used by `/proxy`. Implementations must accept absolute URIs
/// for any host; the forwarder applies its own timeout around the call.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
