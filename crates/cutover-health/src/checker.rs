//! Readiness probes.
//!
//! A probe is an async function of the candidate's port. The stock
//! probes connect over loopback: `tcp_probe` only needs the port to
//! accept connections, `http_probe` needs a 2xx from a health path.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use cutover_core::ProbeKind;
use cutover_core::config::HealthConfig;

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The instance is ready to take traffic.
    Healthy,
    /// The instance answered but is not ready (non-2xx).
    Unhealthy,
    /// The probe could not be executed (connection refused, timeout).
    Failed,
}

impl ProbeResult {
    pub fn is_healthy(self) -> bool {
        self == ProbeResult::Healthy
    }
}

pub type ProbeFuture = Pin<Box<dyn Future<Output = ProbeResult> + Send>>;

/// Readiness check invoked with the candidate's port.
pub type Probe = Arc<dyn Fn(u16) -> ProbeFuture + Send + Sync>;

/// Wrap an async closure as a `Probe`.
pub fn probe_fn<F, Fut>(f: F) -> Probe
where
    F: Fn(u16) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProbeResult> + Send + 'static,
{
    Arc::new(move |port| -> ProbeFuture { Box::pin(f(port)) })
}

/// Ready once `127.0.0.1:port` accepts a TCP connection.
pub fn tcp_probe(timeout: Duration) -> Probe {
    probe_fn(move |port| tcp_check(loopback(port), timeout))
}

/// Ready once `GET http://127.0.0.1:port{path}` returns 2xx.
pub fn http_probe(path: impl Into<String>, timeout: Duration) -> Probe {
    let path: Arc<str> = Arc::from(path.into());
    probe_fn(move |port| {
        let path = path.clone();
        async move { http_check(loopback(port), &path, timeout).await }
    })
}

/// Build the configured probe.
pub fn from_config(config: &HealthConfig) -> Probe {
    match config.kind {
        ProbeKind::Tcp => tcp_probe(config.timeout),
        ProbeKind::Http => http_probe(config.endpoint.clone(), config.timeout),
    }
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Connect-only probe.
pub async fn tcp_check(addr: SocketAddr, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr)).await {
        Ok(Ok(_)) => ProbeResult::Healthy,
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "tcp probe connection failed");
            ProbeResult::Failed
        }
        Err(_) => {
            debug!(%addr, "tcp probe timed out");
            ProbeResult::Failed
        }
    }
}

/// HTTP/1.1 GET probe.
///
/// Returns `Healthy` for 2xx, `Unhealthy` for any other status, and
/// `Failed` if the connection or request fails or times out.
pub async fn http_check(addr: SocketAddr, path: &str, timeout: Duration) -> ProbeResult {
    let uri = format!("http://{addr}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(addr).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", addr.to_string())
            .header("user-agent", "cutover-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "health probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => ProbeResult::Healthy,
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "health probe non-2xx");
                ProbeResult::Unhealthy
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "health probe timed out");
            ProbeResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per connection.
    async fn canned_server(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let resp = format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = sock.write_all(resp.as_bytes()).await;
            }
        });
        port
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn tcp_probe_closed_port_fails() {
        let probe = tcp_probe(Duration::from_millis(200));
        assert_eq!(probe(closed_port()).await, ProbeResult::Failed);
    }

    #[tokio::test]
    async fn tcp_probe_listening_port_is_healthy() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = tcp_probe(Duration::from_millis(500));
        assert_eq!(probe(port).await, ProbeResult::Healthy);
    }

    #[tokio::test]
    async fn http_probe_2xx_is_healthy() {
        let port = canned_server("200 OK").await;
        let probe = http_probe("/actuator/health", Duration::from_secs(2));
        assert_eq!(probe(port).await, ProbeResult::Healthy);
    }

    #[tokio::test]
    async fn http_probe_non_2xx_is_unhealthy() {
        let port = canned_server("503 Service Unavailable").await;
        let probe = http_probe("/healthz", Duration::from_secs(2));
        assert_eq!(probe(port).await, ProbeResult::Unhealthy);
    }

    #[tokio::test]
    async fn http_probe_closed_port_fails() {
        let probe = http_probe("/healthz", Duration::from_millis(200));
        assert_eq!(probe(closed_port()).await, ProbeResult::Failed);
    }

    #[tokio::test]
    async fn custom_probe_sees_port() {
        let probe = probe_fn(|port| async move {
            if port == 4242 {
                ProbeResult::Healthy
            } else {
                ProbeResult::Unhealthy
            }
        });
        assert!(probe(4242).await.is_healthy());
        assert!(!probe(1).await.is_healthy());
    }

    #[tokio::test]
    async fn from_config_selects_kind() {
        // A listener that answers 503: connectable, but not ready over HTTP.
        let port = canned_server("503 Service Unavailable").await;

        let mut config = HealthConfig::default();
        assert_eq!(from_config(&config)(port).await, ProbeResult::Healthy);

        config.kind = ProbeKind::Http;
        assert_eq!(from_config(&config)(port).await, ProbeResult::Unhealthy);
    }
}
