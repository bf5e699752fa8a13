//! WebSocket handshake detection.
//!
//! Decides whether an inbound request is a WebSocket opening handshake (RFC 6455,
//! version 13) or a plain HTTP request. The verdict only selects a proxy path; a failed
//! check is never reported to the client.
use http::{HeaderMap, Method, header};
use thiserror::Error;

/// Reason a request is not a WebSocket handshake, in check order.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRejection {
    #[error("'upgrade' token not found in 'Connection' header")]
    MissingConnectionUpgrade,
    #[error("'websocket' token not found in 'Upgrade' header")]
    MissingUpgradeWebSocket,
    #[error("request method is not GET")]
    MethodNotGet,
    #[error("unsupported version: 13 not found in 'Sec-WebSocket-Version' header")]
    UnsupportedVersion,
    #[error("application specific 'Sec-WebSocket-Extensions' headers are unsupported")]
    ExtensionsPreset,
    #[error("'Sec-WebSocket-Key' header is missing or blank")]
    MissingKey,
}

/// Run every handshake check in order and report the first one that fails.
///
/// `response_headers` are the headers already staged for the response; a preset
/// `Sec-WebSocket-Extensions` there means an extension was negotiated, which the
/// passthrough does not support.
pub fn verify_handshake(
    method: &Method,
    headers: &HeaderMap,
    response_headers: &HeaderMap,
) -> Result<(), HandshakeRejection> {
    if !token_list_contains(headers, header::CONNECTION, "upgrade") {
        return Err(HandshakeRejection::MissingConnectionUpgrade);
    }
    if !token_list_contains(headers, header::UPGRADE, "websocket") {
        return Err(HandshakeRejection::MissingUpgradeWebSocket);
    }
    if method != Method::GET {
        return Err(HandshakeRejection::MethodNotGet);
    }
    if !token_list_contains(headers, header::SEC_WEBSOCKET_VERSION, "13") {
        return Err(HandshakeRejection::UnsupportedVersion);
    }
    if response_headers.contains_key(header::SEC_WEBSOCKET_EXTENSIONS) {
        return Err(HandshakeRejection::ExtensionsPreset);
    }
    let has_key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().is_empty());
    if !has_key {
        return Err(HandshakeRejection::MissingKey);
    }
    Ok(())
}

/// Whether the request should take the WebSocket proxy path.
pub fn is_websocket_upgrade(method: &Method, headers: &HeaderMap) -> bool {
    match verify_handshake(method, headers, &HeaderMap::new()) {
        Ok(()) => true,
        Err(reason) => {
            tracing::trace!(%reason, "Not a WebSocket handshake");
            false
        }
    }
}

/// Case-insensitive token match over every value of a comma separated header.
fn token_list_contains(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn handshake_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
        headers.insert(
            header::SEC_WEBSOCKET_KEY,
            HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="),
        );
        headers
    }

    #[test]
    fn test_full_handshake_is_websocket() {
        assert!(is_websocket_upgrade(&Method::GET, &handshake_headers()));
    }

    #[test]
    fn test_each_missing_condition_is_http() {
        let cases: [(&str, header::HeaderName); 4] = [
            ("connection", header::CONNECTION),
            ("upgrade", header::UPGRADE),
            ("version", header::SEC_WEBSOCKET_VERSION),
            ("key", header::SEC_WEBSOCKET_KEY),
        ];
        for (label, name) in cases {
            let mut headers = handshake_headers();
            headers.remove(&name);
            assert!(
                !is_websocket_upgrade(&Method::GET, &headers),
                "request without {label} header must be plain HTTP"
            );
        }

        assert_eq!(
            verify_handshake(&Method::POST, &handshake_headers(), &HeaderMap::new()),
            Err(HandshakeRejection::MethodNotGet)
        );
    }

    #[test]
    fn test_checks_run_in_order() {
        let mut headers = handshake_headers();
        headers.remove(header::CONNECTION);
        headers.remove(header::SEC_WEBSOCKET_KEY);
        assert_eq!(
            verify_handshake(&Method::POST, &headers, &HeaderMap::new()),
            Err(HandshakeRejection::MissingConnectionUpgrade)
        );
    }

    #[test]
    fn test_token_matching() {
        let mut headers = handshake_headers();
        headers.insert(header::CONNECTION, HeaderValue::from_static("upgraded"));
        assert!(!is_websocket_upgrade(&Method::GET, &headers));

        // Tokens may be spread over several header lines
        let mut headers = handshake_headers();
        headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("8"));
        headers.append(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("7, 13"));
        assert!(is_websocket_upgrade(&Method::GET, &headers));

        let mut headers = handshake_headers();
        headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("8"));
        assert_eq!(
            verify_handshake(&Method::GET, &headers, &HeaderMap::new()),
            Err(HandshakeRejection::UnsupportedVersion)
        );
    }

    #[test]
    fn test_blank_key_is_http() {
        let mut headers = handshake_headers();
        headers.insert(header::SEC_WEBSOCKET_KEY, HeaderValue::from_static("   "));
        assert_eq!(
            verify_handshake(&Method::GET, &headers, &HeaderMap::new()),
            Err(HandshakeRejection::MissingKey)
        );
    }

    #[test]
    fn test_preset_extensions_is_http() {
        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::SEC_WEBSOCKET_EXTENSIONS,
            HeaderValue::from_static("permessage-deflate"),
        );
        assert_eq!(
            verify_handshake(&Method::GET, &handshake_headers(), &response_headers),
            Err(HandshakeRejection::ExtensionsPreset)
        );
    }
}
