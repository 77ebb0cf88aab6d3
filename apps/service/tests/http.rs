mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::http_stub;
use uptimed::database::models::Monitor;
use uptimed::monitoring::{MonitoringExecutor, NotificationKind, Probe, ProbePolicy, Status};
use uptimed::notify::{DiscordConfig, Notification, Notifier, NotifierConfig, NotifyError};

fn policy() -> ProbePolicy {
    ProbePolicy { default_timeout: Duration::from_secs(5), attempts: 3, retry_pause: Duration::from_millis(10) }
}

#[tokio::test]
async fn test_executor_probes_http_endpoint() {
    let (url, _requests) = http_stub("HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok").await;
    let executor = MonitoringExecutor::new(policy()).unwrap();
    let monitor = Monitor::new("stub", url.clone());

    let status = executor.probe(&monitor, &CancellationToken::new()).await;

    assert_eq!(status.site, "stub");
    assert_eq!(status.url, url);
    assert_eq!(status.status_code, 200);
    assert_eq!(status.status_text, "200 OK");
    assert_eq!(status.certificate_days_remaining, 0);
    assert!(status.response_latency < Duration::from_secs(5));
}

#[tokio::test]
async fn test_discord_webhook_receives_embed() {
    let (url, mut requests) = http_stub("HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n").await;
    let notifier = NotifierConfig::Discord(DiscordConfig { url }).build(&reqwest::Client::new());

    let down = Status::new("example", "https://example.com").with_status(503, "503 Service Unavailable");
    notifier.send(&Notification::new(NotificationKind::StatusChanged, down, 200)).await.unwrap();

    let body: serde_json::Value = serde_json::from_str(&requests.recv().await.unwrap()).unwrap();
    assert_eq!(body["content"], "Uptime Status Alert");
    assert_eq!(body["embeds"][0]["title"], "example");
    assert_eq!(body["embeds"][0]["color"], 0xED4245);
    assert_eq!(body["embeds"][1]["description"], "503 Service Unavailable");
}

#[tokio::test]
async fn test_rejected_webhook_is_an_error() {
    let (url, _requests) =
        http_stub("HTTP/1.1 404 Not Found\r\nContent-Length: 7\r\nConnection: close\r\n\r\nunknown").await;
    let notifier = NotifierConfig::Discord(DiscordConfig { url }).build(&reqwest::Client::new());

    let err = notifier.send(&Notification::test()).await.unwrap_err();
    match err {
        NotifyError::Rejected { provider, status, body } => {
            assert_eq!(provider, "discord");
            assert_eq!(status, 404);
            assert_eq!(body, "unknown");
        }
        other => panic!("unexpected error: {other}"),
    }
}
