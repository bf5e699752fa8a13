use std::fmt;

use hyper::Uri;
use thiserror::Error;
use url::Url;

/// Errors related to proxy target resolution
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TargetError {
    /// The forward address does not describe a `host:port` authority
    #[error("Invalid forward address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// A joined target could not be turned into a request URI
    #[error("Invalid target URI '{0}'")]
    InvalidUri(String),
}

/// Result type for target operations
pub type TargetResult<T> = Result<T, TargetError>;

/// The two upstream bases derived from the forward address.
///
/// HTTP requests are sent to `http://<forward_addr>`, WebSocket sessions are opened
/// against `ws://<forward_addr>`. Both are resolved once when the forwarding handler
/// starts and reused for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTargets {
    http: Url,
    ws: Url,
}

impl ProxyTargets {
    /// Resolve both targets from a scheme-less `host:port` address.
    pub fn from_forward_addr(forward_addr: &str) -> TargetResult<Self> {
        let invalid = |reason: &str| TargetError::InvalidAddress {
            address: forward_addr.to_string(),
            reason: reason.to_string(),
        };

        if forward_addr.trim().is_empty() {
            return Err(invalid("address is empty"));
        }
        if forward_addr.contains("://") {
            return Err(invalid("address must not carry a scheme"));
        }

        let http = Url::parse(&format!("http://{forward_addr}"))
            .map_err(|e| invalid(&e.to_string()))?;
        if http.host_str().is_none() {
            return Err(invalid("missing host"));
        }
        if http.path() != "/" || http.query().is_some() || http.fragment().is_some() {
            return Err(invalid("address must not carry a path"));
        }

        let mut ws = http.clone();
        ws.set_scheme("ws")
            .map_err(|()| invalid("cannot derive WebSocket target"))?;

        Ok(Self { http, ws })
    }

    pub fn http(&self) -> &Url {
        &self.http
    }

    pub fn ws(&self) -> &Url {
        &self.ws
    }

    /// Backend URI for an HTTP request, keeping the inbound path and query untouched.
    pub fn http_uri(&self, path_and_query: &str) -> TargetResult<Uri> {
        let joined = join(&self.http, path_and_query);
        joined
            .parse::<Uri>()
            .map_err(|_| TargetError::InvalidUri(joined))
    }

    /// Backend URL for a WebSocket session.
    pub fn ws_url(&self, path_and_query: &str) -> String {
        join(&self.ws, path_and_query)
    }
}

impl fmt::Display for ProxyTargets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.http, self.ws)
    }
}

fn join(base: &Url, path_and_query: &str) -> String {
    // Base URLs always end with the root slash
    let base = base.as_str().trim_end_matches('/');
    if path_and_query.starts_with('/') {
        format!("{base}{path_and_query}")
    } else {
        format!("{base}/{path_and_query}")
    }
}
