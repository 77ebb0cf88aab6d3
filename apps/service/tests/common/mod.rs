#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use uptimed::database::{DatabaseImpl, Store};
use uptimed::notify::{Notification, Notifier, NotifyError};

/// Fresh store in a temporary directory; keep the `TempDir` alive
pub fn temp_database() -> (TempDir, Arc<DatabaseImpl>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("uptime.db")).unwrap();
    (dir, Arc::new(DatabaseImpl::new(Arc::new(store))))
}

/// Notifier that keeps every notification it receives
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn provider(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// HTTP stub answering every request with `response`; request bodies are
/// forwarded on the returned channel
pub async fn http_stub(response: &'static str) -> (String, mpsc::UnboundedReceiver<String>) {
    slow_http_stub(response, Duration::ZERO).await
}

/// Like [`http_stub`], but waits `delay` after forwarding a body before it answers
pub async fn slow_http_stub(response: &'static str, delay: Duration) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let body = read_body(&mut socket).await;
                let _ = tx.send(body);
                tokio::time::sleep(delay).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}/"), rx)
}

/// Read one request and return its body, honouring Content-Length
async fn read_body(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let Ok(n) = socket.read(&mut chunk).await else { break };
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return String::from_utf8_lossy(&buf[end + 4..end + 4 + length]).into_owned();
            }
        }
    }
    String::new()
}
