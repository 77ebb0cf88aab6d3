//! Monitor definition validation for the admin boundary.
//!
//! Everything rejected here is a configuration error: it never reaches the
//! scheduler.

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::database::models::{Monitor, MonitorType};

const MIN_FREQUENCY: Duration = Duration::from_secs(1);
const MAX_FREQUENCY: Duration = Duration::from_secs(86_400);
const MIN_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("monitor name must not be empty")]
    EmptyName,

    #[error("name {0:?} contains a NUL byte")]
    InvalidName(String),

    #[error("invalid frequency {0:?}: {1}")]
    InvalidFrequency(String, String),

    #[error("invalid timeout {0:?}: {1}")]
    InvalidTimeout(String, String),

    #[error("invalid url {0:?}: {1}")]
    InvalidUrl(String, String),

    #[error("invalid scheme for http monitor: {0}")]
    InvalidScheme(String),

    #[error("unable to resolve host {0}")]
    UnresolvableHost(String),

    #[error("{0} monitors are not implemented")]
    UnimplementedType(MonitorType),

    #[error("unknown monitor type {0:?}")]
    UnknownMonitorType(String),

    #[error("unknown time frame {0:?}")]
    UnknownTimeFrame(String),

    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
}

/// Validate a complete monitor definition, including DNS resolution of its host.
pub async fn validate_monitor(monitor: &Monitor) -> Result<(), ValidationError> {
    validate_name(&monitor.name)?;
    for notifier in &monitor.notifiers {
        validate_name(notifier)?;
    }
    validate_frequency(&monitor.frequency)?;
    validate_timeout(&monitor.timeout)?;
    validate_monitor_target(&monitor.url, monitor.monitor_type).await
}

/// Names double as storage bucket names.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.contains('\0') {
        return Err(ValidationError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Validates a monitor target based on its type
pub async fn validate_monitor_target(
    target: &str,
    monitor_type: MonitorType,
) -> Result<(), ValidationError> {
    match monitor_type {
        MonitorType::Http => {
            let (host, port) = parse_http_target(target)?;
            resolve_host(&host, port).await
        }
        other => Err(ValidationError::UnimplementedType(other)),
    }
}

/// Parse and check an HTTP/HTTPS target, returning the host and port to resolve.
fn parse_http_target(target: &str) -> Result<(String, u16), ValidationError> {
    let url =
        Url::parse(target).map_err(|e| ValidationError::InvalidUrl(target.to_string(), e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::InvalidScheme(other.to_string())),
    }

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ValidationError::InvalidUrl(target.to_string(), "missing host".to_string()))?;

    let port = url
        .port_or_known_default()
        .ok_or_else(|| ValidationError::InvalidUrl(target.to_string(), "missing port".to_string()))?;
    if port == 0 {
        return Err(ValidationError::InvalidUrl(target.to_string(), "port 0 is not valid".to_string()));
    }

    Ok((host.trim_start_matches('[').trim_end_matches(']').to_string(), port))
}

async fn resolve_host(host: &str, port: u16) -> Result<(), ValidationError> {
    match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => {
            if addrs.next().is_some() {
                Ok(())
            } else {
                Err(ValidationError::UnresolvableHost(host.to_string()))
            }
        }
        Err(e) => {
            tracing::debug!(host, error = %e, "host lookup failed");
            Err(ValidationError::UnresolvableHost(host.to_string()))
        }
    }
}

/// Validate poll frequency
pub fn validate_frequency(frequency: &str) -> Result<Duration, ValidationError> {
    let parsed = humantime::parse_duration(frequency.trim())
        .map_err(|e| ValidationError::InvalidFrequency(frequency.to_string(), e.to_string()))?;

    if parsed < MIN_FREQUENCY {
        return Err(ValidationError::InvalidFrequency(
            frequency.to_string(),
            format!("minimum is {}", humantime::format_duration(MIN_FREQUENCY)),
        ));
    }

    if parsed > MAX_FREQUENCY {
        return Err(ValidationError::InvalidFrequency(
            frequency.to_string(),
            format!("maximum is {}", humantime::format_duration(MAX_FREQUENCY)),
        ));
    }

    Ok(parsed)
}

/// Validate timeout is reasonable. Empty selects the configured default.
pub fn validate_timeout(timeout: &str) -> Result<Option<Duration>, ValidationError> {
    if timeout.trim().is_empty() {
        return Ok(None);
    }

    let parsed = humantime::parse_duration(timeout.trim())
        .map_err(|e| ValidationError::InvalidTimeout(timeout.to_string(), e.to_string()))?;

    if parsed < MIN_TIMEOUT || parsed > MAX_TIMEOUT {
        return Err(ValidationError::InvalidTimeout(
            timeout.to_string(),
            format!(
                "must be between {} and {}",
                humantime::format_duration(MIN_TIMEOUT),
                humantime::format_duration(MAX_TIMEOUT)
            ),
        ));
    }

    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_target() {
        // Valid
        assert_eq!(parse_http_target("https://example.com").unwrap(), ("example.com".into(), 443));
        assert_eq!(parse_http_target("http://example.com:8080/health").unwrap().1, 8080);
        assert_eq!(parse_http_target("http://[::1]:9000").unwrap().0, "::1");

        // Invalid - wrong scheme
        assert!(matches!(
            parse_http_target("ftp://example.com"),
            Err(ValidationError::InvalidScheme(_))
        ));

        // Invalid - unparsable
        assert!(matches!(parse_http_target("not a url"), Err(ValidationError::InvalidUrl(..))));
    }

    #[tokio::test]
    async fn test_loopback_target_resolves() {
        assert!(validate_monitor_target("http://127.0.0.1:8080", MonitorType::Http).await.is_ok());
    }

    #[tokio::test]
    async fn test_resolve_host() {
        assert!(resolve_host("127.0.0.1", 80).await.is_ok());
        assert!(matches!(
            resolve_host("no-such-host.invalid", 80).await,
            Err(ValidationError::UnresolvableHost(host)) if host == "no-such-host.invalid"
        ));
    }

    #[tokio::test]
    async fn test_unimplemented_types_are_rejected() {
        let err = validate_monitor_target("example.com:80", MonitorType::Tcp).await.unwrap_err();
        assert!(matches!(err, ValidationError::UnimplementedType(MonitorType::Tcp)));
        let err = validate_monitor_target("example.com", MonitorType::Ping).await.unwrap_err();
        assert!(matches!(err, ValidationError::UnimplementedType(MonitorType::Ping)));
    }

    #[test]
    fn test_validate_frequency() {
        assert_eq!(validate_frequency("1s").unwrap(), Duration::from_secs(1)); // Min
        assert_eq!(validate_frequency("5m").unwrap(), Duration::from_secs(300)); // Normal
        assert!(validate_frequency("24h").is_ok()); // Max

        assert!(validate_frequency("500ms").is_err()); // Too short
        assert!(validate_frequency("2days").is_err()); // Too long
        assert!(validate_frequency("often").is_err());
    }

    #[test]
    fn test_validate_timeout() {
        assert_eq!(validate_timeout("").unwrap(), None);
        assert_eq!(validate_timeout("10s").unwrap(), Some(Duration::from_secs(10)));
        assert!(validate_timeout("0s").is_err());
        assert!(validate_timeout("1h").is_err());
        assert!(validate_timeout("quick").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("example").is_ok());
        assert!(matches!(validate_name("  "), Err(ValidationError::EmptyName)));
        assert!(matches!(validate_name("a\0b"), Err(ValidationError::InvalidName(_))));
    }
}
