//! WebSocket upgrade passthrough.
//!
//! The upstream session is opened first, so a backend that refuses the handshake surfaces
//! as an error before anything is sent to the client. Only after the backend accepted is
//! the client answered with `101 Switching Protocols`; the relay runs in a background task
//! once hyper hands over the upgraded connection.
use axum::body::Body as AxumBody;
use base64::{Engine, engine::general_purpose::STANDARD};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use hyper::{HeaderMap, Request, Response, StatusCode, header, header::HeaderValue};
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message, client::IntoClientRequest, protocol::Role},
};
use tokio_util::sync::CancellationToken;

use crate::adapters::http_client::is_cancellation;

/// GUID appended to the client key when computing `Sec-WebSocket-Accept` (RFC 6455 §1.3)
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Request headers owned by the handshake itself; everything else is relayed upstream.
const HANDSHAKE_HEADERS: [header::HeaderName; 6] = [
    header::HOST,
    header::CONNECTION,
    header::UPGRADE,
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_EXTENSIONS,
];

/// Errors raised while setting up a proxied WebSocket session
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WebSocketProxyError {
    #[error("Missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("Invalid upstream request for '{url}': {source}")]
    InvalidRequest {
        url: String,
        #[source]
        source: WsError,
    },

    #[error("Upstream WebSocket handshake with '{url}' failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: WsError,
    },
}

impl WebSocketProxyError {
    /// Whether the session was abandoned by the caller rather than refused by the backend
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Connect { source, .. } => is_cancellation(source),
            _ => false,
        }
    }
}

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Proxy a WebSocket handshake to `upstream_url` and relay frames in both directions.
///
/// Returns the `101` response to send to the client. The relay stops when either side
/// closes or `shutdown` is cancelled.
pub async fn proxy_websocket(
    mut req: Request<AxumBody>,
    upstream_url: &str,
    shutdown: CancellationToken,
) -> Result<Response<AxumBody>, WebSocketProxyError> {
    let key = req
        .headers()
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or(WebSocketProxyError::MissingKey)?
        .to_string();

    let mut upstream_req = upstream_url
        .into_client_request()
        .map_err(|source| WebSocketProxyError::InvalidRequest {
            url: upstream_url.to_string(),
            source,
        })?;
    copy_relayed_headers(req.headers(), upstream_req.headers_mut());

    let (upstream, upstream_response) = connect_async(upstream_req).await.map_err(|source| {
        WebSocketProxyError::Connect {
            url: upstream_url.to_string(),
            source,
        }
    })?;
    tracing::debug!(upstream = %upstream_url, "Upstream WebSocket session opened");

    let on_upgrade = hyper::upgrade::on(&mut req);
    let upstream_url = upstream_url.to_string();
    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                tracing::error!(error = %e, "WebSocket connection upgrade failed");
                return;
            }
        };
        let client =
            WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;

        tokio::select! {
            result = relay(client, upstream) => match result {
                Ok(()) => tracing::debug!(upstream = %upstream_url, "WebSocket session closed"),
                Err(e) => tracing::debug!(upstream = %upstream_url, error = %e, "WebSocket session ended with error"),
            },
            () = shutdown.cancelled() => {
                tracing::debug!(upstream = %upstream_url, "WebSocket session dropped on shutdown");
            }
        }
    });

    let mut response = Response::new(AxumBody::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    if let Ok(accept) = HeaderValue::from_str(&compute_accept_key(&key)) {
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    }
    if let Some(protocol) = upstream_response.headers().get(header::SEC_WEBSOCKET_PROTOCOL) {
        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, protocol.clone());
    }
    Ok(response)
}

fn copy_relayed_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if HANDSHAKE_HEADERS.contains(name) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

/// Relay frames between two established sessions until one side finishes.
pub async fn relay<C, U>(
    client: WebSocketStream<C>,
    upstream: WebSocketStream<U>,
) -> Result<(), WsError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (client_tx, client_rx) = client.split();
    let (upstream_tx, upstream_rx) = upstream.split();

    tokio::select! {
        result = pump(client_rx, upstream_tx) => result,
        result = pump(upstream_rx, client_tx) => result,
    }
}

async fn pump<S, K>(mut source: S, mut sink: K) -> Result<(), WsError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
    K: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(message) = source.next().await {
        let message = match message {
            Ok(message) => message,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
            Err(e) => return Err(e),
        };
        let closing = message.is_close();
        sink.send(message).await?;
        if closing {
            break;
        }
    }
    match sink.close().await {
        Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
        Err(e) => Err(e),
    }
}
