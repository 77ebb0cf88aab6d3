use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::Form;
use serde::{Deserialize, Serialize};

use super::{Notification, Notifier, NotifyError, check_response};
use crate::monitoring::types::NotificationKind;

const MAILGUN_API: &str = "https://api.mailgun.net/v3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailgunConfig {
    pub api_key: String,
    /// Sending domain; mail comes from `uptime@<domain>`
    pub domain: String,
    pub recipients: Vec<String>,
}

/// A sender for emailing notifications through the Mailgun messages API.
pub struct MailgunNotifier {
    client: Client,
    config: MailgunConfig,
    api_base: String,
}

impl MailgunNotifier {
    pub fn new(client: Client, config: MailgunConfig) -> Self {
        Self { client, config, api_base: MAILGUN_API.to_string() }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn form(&self, text: String) -> Form {
        Form::new()
            .text("from", format!("uptime@{}", self.config.domain))
            .text("to", self.config.recipients.join(","))
            .text("subject", "Uptime Status Alert")
            .text("text", text)
    }
}

fn body(notification: &Notification) -> String {
    let status = &notification.status;
    match notification.kind {
        NotificationKind::StatusChanged => format!(
            "Uptime Status Message\n{} {}\nStatus {}",
            status.site, status.url, status.status_text
        ),
        NotificationKind::CertificateExpiring => format!(
            "Uptime Certificate Expiry Message\n{} {}\nCertificate will expire in {} days",
            status.site, status.url, status.certificate_days_remaining
        ),
        NotificationKind::Test => "test message from uptime monitor".to_string(),
    }
}

#[async_trait]
impl Notifier for MailgunNotifier {
    fn provider(&self) -> &'static str {
        "mailgun"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.config.recipients.is_empty() {
            return Err(NotifyError::InvalidConfiguration("mailgun notifier has no recipients".into()));
        }

        let response = self
            .client
            .post(format!("{}/{}/messages", self.api_base, self.config.domain))
            .basic_auth("api", Some(&self.config.api_key))
            .multipart(self.form(body(notification)))
            .send()
            .await?;
        check_response(self.provider(), response).await?;
        Ok(())
    }
}
