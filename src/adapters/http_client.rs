use std::error::Error as StdError;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{HeaderMap, Request, Response, Version, header, header::HeaderValue};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// Headers that only describe a single connection and must not be relayed.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
];

/// HTTP client adapter forwarding plain HTTP/1.1 requests to the co-located backend.
///
/// Responsibilities:
/// * Rewrites `Host` to the backend authority
/// * Drops hop-by-hop headers in both directions
/// * Streams request and response bodies without buffering
/// * Tells a caller that went away mid-body apart from backend faults
pub struct HttpClientAdapter {
    client: Client<HttpConnector, AxumBody>,
}

impl HttpClientAdapter {
    pub fn new() -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(http_connector);

        tracing::debug!("Created new HTTP/1.1 forwarding client");
        Self { client }
    }

    /// Remove hop-by-hop headers, including any listed in `Connection`.
    fn strip_hop_by_hop(headers: &mut HeaderMap) {
        let listed: Vec<String> = headers
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|token| token.trim().to_ascii_lowercase())
            .filter(|token| !token.is_empty())
            .collect();

        for name in listed.iter().map(String::as_str).chain(HOP_BY_HOP_HEADERS) {
            headers.remove(name);
        }
        headers.remove(header::TRANSFER_ENCODING);
    }
}

impl Default for HttpClientAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a failed exchange was abandoned by the caller rather than refused by the backend.
///
/// Only a failure while reading the inbound request body counts. That body is an axum
/// body, so its errors surface as `axum::Error` somewhere in the source chain. Errors the
/// pooled client raises on its own, `Canceled` included, come from the backend side.
pub fn is_cancellation(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if e.is::<axum::Error>() {
            return true;
        }
        current = e.source();
    }
    false
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let authority = match req.uri().authority() {
            Some(authority) => authority.clone(),
            None => {
                tracing::error!(uri = %req.uri(), "Outgoing URI has no host");
                return Err(HttpClientError::InvalidRequest(
                    "Outgoing URI has no host".to_string(),
                ));
            }
        };

        Self::strip_hop_by_hop(req.headers_mut());
        let host = HeaderValue::from_str(authority.as_str())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        req.headers_mut().insert(header::HOST, host);

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;

        tracing::trace!(headers = ?parts.headers, "Outgoing request headers");

        let outgoing_request = Request::from_parts(parts, body);
        let method = outgoing_request.method().clone();
        let uri = outgoing_request.uri().clone();

        match self.client.request(outgoing_request).await {
            Ok(response) => {
                let (mut parts, hyper_body) = response.into_parts();

                // Framing is re-done by the server side
                Self::strip_hop_by_hop(&mut parts.headers);

                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Err(e) if is_cancellation(&e) => Err(HttpClientError::Canceled(format!(
                "Request to {method} {uri} canceled: {e}"
            ))),
            Err(e) => {
                let detail = e
                    .source()
                    .map_or_else(|| e.to_string(), |source| format!("{e}: {source}"));
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method} {uri} failed: {detail}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{
        Router,
        body::Bytes,
        routing::{get, post},
    };
    use http_body_util::BodyExt;

    use super::*;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, X-Session"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert(header::TE, HeaderValue::from_static("trailers"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::COOKIE, HeaderValue::from_static("_xsrf=1"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("token t"));

        HttpClientAdapter::strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 2);
        assert!(headers.contains_key(header::COOKIE));
        assert!(headers.contains_key(header::AUTHORIZATION));
    }

    #[tokio::test]
    async fn test_forwards_to_backend_with_host_rewritten() {
        let app = Router::new().route(
            "/echo-host",
            get(|headers: HeaderMap| async move {
                headers
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let req = Request::builder()
            .uri(format!("http://{addr}/echo-host"))
            .header(header::HOST, "proxy.example.com")
            .body(AxumBody::empty())
            .unwrap();
        let response = HttpClientAdapter::new().send_request(req).await.unwrap();

        assert_eq!(response.status(), 200);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, addr.to_string().as_bytes());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_connection_error() {
        // Bind then drop to get a port nobody listens on
        let addr: SocketAddr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let req = Request::builder()
            .uri(format!("http://{addr}/"))
            .body(AxumBody::empty())
            .unwrap();

        let err = HttpClientAdapter::new().send_request(req).await.unwrap_err();
        assert!(matches!(err, HttpClientError::ConnectionError(_)));
        assert!(!err.is_canceled());
    }

    #[tokio::test]
    async fn test_relative_uri_is_rejected() {
        let req = Request::builder()
            .uri("/no-authority")
            .body(AxumBody::empty())
            .unwrap();
        let err = HttpClientAdapter::new().send_request(req).await.unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidRequest(_)));
    }

    #[test]
    fn test_only_inbound_body_errors_are_cancellations() {
        let inbound = axum::Error::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "client gone",
        ));
        assert!(is_cancellation(&inbound));

        let err = std::io::Error::new(std::io::ErrorKind::ConnectionAborted, "backend gone");
        assert!(!is_cancellation(&err));
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(!is_cancellation(&err));
    }

    #[tokio::test]
    async fn test_caller_body_failure_is_canceled() {
        let app = Router::new().route("/upload", post(|body: Bytes| async move { body.len().to_string() }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client gone",
            )),
        ];
        let req = Request::builder()
            .method("POST")
            .uri(format!("http://{addr}/upload"))
            .body(AxumBody::from_stream(futures_util::stream::iter(chunks)))
            .unwrap();

        let err = HttpClientAdapter::new().send_request(req).await.unwrap_err();
        assert!(err.is_canceled(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_backend_hangup_is_not_canceled() {
        // Accepts and drops every connection without answering
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let req = Request::builder()
            .uri(format!("http://{addr}/"))
            .body(AxumBody::empty())
            .unwrap();
        let err = HttpClientAdapter::new().send_request(req).await.unwrap_err();
        assert!(matches!(err, HttpClientError::ConnectionError(_)));
        assert!(!err.is_canceled());
    }
}
