use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to backend fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The caller's request body failed mid-stream, so the caller went away
    #[error("Request canceled: {0}")]
    Canceled(String),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpClientError {
    /// Whether this failure is a caller-side cancellation rather than a backend fault
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for forwarding HTTP requests to the backend
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to the backend
    ///
    /// # Arguments
    /// * `req` - The HTTP request, its URI already pointing at the backend
    ///
    /// # Returns
    /// A future that resolves to the backend's streamed response or an error
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
