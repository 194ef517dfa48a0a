//! Request routing — forwards application traffic to the active instance.
//!
//! The router keeps one `RouterTarget`. `forward` reads it once per
//! request, rewrites the URI and `Host` header for the upstream, drops
//! hop-by-hop headers, and streams the upstream response back.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use http::header::{HOST, HeaderName, HeaderValue};
use http::{HeaderMap, Request, Response, Uri};
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tracing::{debug, info};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Request body type sent upstream.
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
];

/// The upstream that receives forwarded traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RouterTarget {
    pub host: IpAddr,
    pub port: u16,
}

impl RouterTarget {
    /// `host:port` authority string.
    pub fn authority(&self) -> String {
        match self.host {
            IpAddr::V4(ip) => format!("{ip}:{}", self.port),
            IpAddr::V6(ip) => format!("[{ip}]:{}", self.port),
        }
    }
}

impl fmt::Display for RouterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no upstream target has been set")]
    RouterUnset,

    #[error("failed to build upstream request: {0}")]
    InvalidRequest(#[from] http::Error),

    #[error("upstream {target} failed: {source}")]
    Upstream {
        target: RouterTarget,
        #[source]
        source: hyper_util::client::legacy::Error,
    },
}

/// Single-target reverse proxy.
#[derive(Clone)]
pub struct TrafficRouter {
    target: Arc<RwLock<Option<RouterTarget>>>,
    upstream_host: IpAddr,
    client: Client<HttpConnector, ProxyBody>,
}

impl TrafficRouter {
    /// Router forwarding to instances on the loopback interface.
    pub fn new() -> Self {
        Self::with_upstream_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    pub fn with_upstream_host(host: IpAddr) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            target: Arc::new(RwLock::new(None)),
            upstream_host: host,
            client,
        }
    }

    /// Replace the forwarding destination. Returns the previous target.
    pub fn set_target(&self, port: u16) -> Option<RouterTarget> {
        let next = RouterTarget {
            host: self.upstream_host,
            port,
        };
        let previous = self.target.write().expect("router target lock").replace(next);
        info!(target = %next, previous = ?previous.map(|t| t.port), "router target updated");
        previous
    }

    /// Current target, if one was ever set.
    pub fn target(&self) -> Option<RouterTarget> {
        *self.target.read().expect("router target lock")
    }

    /// Forward a request to the current target.
    pub async fn forward<B>(&self, req: Request<B>) -> Result<Response<Incoming>, ProxyError>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let target = self.target().ok_or(ProxyError::RouterUnset)?;

        let (mut parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();
        parts.uri = Uri::builder()
            .scheme("http")
            .authority(target.authority())
            .path_and_query(path_and_query)
            .build()?;

        strip_hop_by_hop(&mut parts.headers);
        if let Some(original_host) = parts.headers.remove(HOST) {
            parts.headers.insert(X_FORWARDED_HOST, original_host);
        }
        let host = HeaderValue::from_str(&target.authority())
            .map_err(|e| ProxyError::InvalidRequest(e.into()))?;
        parts.headers.insert(HOST, host);

        debug!(method = %parts.method, uri = %parts.uri, "forwarding request");

        let body: ProxyBody = body.map_err(Into::into).boxed_unsync();
        let mut resp = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|source| ProxyError::Upstream { target, source })?;

        strip_hop_by_hop(resp.headers_mut());
        Ok(resp)
    }
}

impl Default for TrafficRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by `Connection` are connection-scoped as well.
    let named: Vec<HeaderName> = headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
