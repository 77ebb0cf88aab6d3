use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::StatusCode;
use reqwest::tls::TlsInfo;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::Status;
use crate::database::models::Monitor;

/// Retry and timeout settings for a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Used when the monitor's own timeout is empty or unparsable
    pub default_timeout: Duration,
    /// Total attempts per probe, including the first
    pub attempts: u32,
    /// Pause between failed attempts
    pub retry_pause: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(60),
            attempts: 3,
            retry_pause: Duration::from_secs(1),
        }
    }
}

/// Checker trait for different types of monitoring checks
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    /// Perform the check. Failures are reported through the returned status.
    async fn check(&self, monitor: &Monitor, cancel: &CancellationToken) -> Status;
}

/// HTTP/HTTPS checker
pub struct HttpChecker {
    client: reqwest::Client,
    policy: ProbePolicy,
}

impl HttpChecker {
    pub fn new(policy: ProbePolicy) -> reqwest::Result<Self> {
        // The per-request timeout comes from the monitor, see `check`.
        let client = reqwest::Client::builder().tls_info(true).build()?;

        Ok(Self { client, policy })
    }

    fn timeout_for(&self, monitor: &Monitor) -> Duration {
        monitor.timeout_duration().unwrap_or_else(|| {
            if !monitor.timeout.trim().is_empty() {
                debug!(
                    monitor = %monitor.name,
                    configured = %monitor.timeout,
                    "unparsable timeout, using default"
                );
            }
            self.policy.default_timeout
        })
    }

    /// Issue the GET, retrying transport failures.
    async fn attempt_all(&self, monitor: &Monitor, timeout: Duration, mut status: Status) -> Status {
        let attempts = self.policy.attempts.max(1);

        for attempt in 1..=attempts {
            let started = Instant::now();
            let result = self.client.get(&monitor.url).timeout(timeout).send().await;
            status.response_latency = started.elapsed();

            match result {
                Ok(response) => {
                    let code = response.status();
                    status.status_code = code.as_u16();
                    status.status_text = status_line(code);
                    status.certificate_days_remaining = response
                        .extensions()
                        .get::<TlsInfo>()
                        .and_then(TlsInfo::peer_certificate)
                        .and_then(certificate_days_remaining)
                        .unwrap_or(0);
                    return status;
                }
                Err(e) => {
                    status.status_text = format!("{} {}", innermost_error(&e), humantime::format_duration(timeout));
                    if attempt < attempts {
                        warn!(monitor = %monitor.name, url = %monitor.url, attempt, error = %e, "transitory probe failure");
                        tokio::time::sleep(self.policy.retry_pause).await;
                    }
                }
            }
        }

        status
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, monitor: &Monitor, cancel: &CancellationToken) -> Status {
        let status = Status::new(&monitor.name, &monitor.url);
        let timeout = self.timeout_for(monitor);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => status.with_status(0, "probe cancelled"),
            status = self.attempt_all(monitor, timeout, status.clone()) => status,
        }
    }
}

/// Checker for monitor types that have no probe yet
pub struct UnimplementedChecker;

#[async_trait::async_trait]
impl Checker for UnimplementedChecker {
    async fn check(&self, monitor: &Monitor, _cancel: &CancellationToken) -> Status {
        warn!(monitor = %monitor.name, kind = %monitor.monitor_type, "unimplemented monitor check");
        Status::new(&monitor.name, &monitor.url)
            .with_status(0, format!("unimplemented monitor type {}", monitor.monitor_type))
    }
}

/// `200 OK` style status line
fn status_line(code: StatusCode) -> String {
    match code.canonical_reason() {
        Some(reason) => format!("{} {}", code.as_u16(), reason),
        None => code.as_u16().to_string(),
    }
}

/// Message of the deepest error in the chain, e.g. `Connection refused (os error 111)`
fn innermost_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        return "request timed out after".to_string();
    }
    let mut current: &dyn std::error::Error = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

/// Whole days until the leaf certificate's `notAfter`, negative once expired
fn certificate_days_remaining(der: &[u8]) -> Option<i64> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    let not_after = cert.validity().not_after.timestamp();
    Some((not_after - Utc::now().timestamp()) / 86_400)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::MonitorType;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn fast_policy() -> ProbePolicy {
        ProbePolicy {
            default_timeout: Duration::from_secs(5),
            attempts: 3,
            retry_pause: Duration::from_millis(10),
        }
    }

    /// Serve `response` to every connection
    async fn serve(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_http_status_line_is_recorded() {
        let url = serve("HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let checker = HttpChecker::new(fast_policy()).unwrap();
        let monitor = Monitor::new("stub", url);

        let status = checker.check(&monitor, &CancellationToken::new()).await;
        assert_eq!(status.status_code, 503);
        assert_eq!(status.status_text, "503 Service Unavailable");
        assert_eq!(status.certificate_days_remaining, 0);
        assert_eq!(status.site, "stub");
    }

    #[tokio::test]
    async fn test_connection_failure_becomes_status_text() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let checker = HttpChecker::new(fast_policy()).unwrap();
        let mut monitor = Monitor::new("down", format!("http://{addr}/"));
        monitor.timeout = "2s".into();

        let status = checker.check(&monitor, &CancellationToken::new()).await;
        assert_eq!(status.status_code, 0);
        assert!(status.status_text.ends_with(" 2s"), "{}", status.status_text);
    }

    #[tokio::test]
    async fn test_cancellation_unwinds_a_hanging_probe() {
        // Accepts but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let checker = HttpChecker::new(fast_policy()).unwrap();
        let mut monitor = Monitor::new("hang", format!("http://{addr}/"));
        monitor.timeout = "60s".into();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let status = tokio::time::timeout(Duration::from_secs(5), checker.check(&monitor, &cancel))
            .await
            .expect("probe ignored cancellation");
        assert_eq!(status.status_text, "probe cancelled");
    }

    #[tokio::test]
    async fn test_unimplemented_types_return_sentinel() {
        let mut monitor = Monitor::new("tcp", "example.com:443");
        monitor.monitor_type = MonitorType::Tcp;
        let status = UnimplementedChecker.check(&monitor, &CancellationToken::new()).await;
        assert_eq!(status.status_text, "unimplemented monitor type tcp");
        assert_eq!(status.status_code, 0);
    }

    #[test]
    fn test_status_line() {
        assert_eq!(status_line(StatusCode::OK), "200 OK");
        assert_eq!(status_line(StatusCode::from_u16(599).unwrap()), "599");
    }

    #[test]
    fn test_garbage_certificate_is_ignored() {
        assert_eq!(certificate_days_remaining(b"not a certificate"), None);
    }
}
