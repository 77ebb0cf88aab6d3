use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Notification, Notifier, NotifyError, check_response};
use crate::monitoring::types::NotificationKind;

const DISCORD_RED: u32 = 0xED4245;
const DISCORD_BLUE: u32 = 0x5865F2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Incoming webhook URL
    pub url: String,
}

#[derive(Debug, Serialize)]
struct DiscordMessage {
    content: String,
    username: &'static str,
    embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    description: String,
}

/// A sender for pushing notifications to a Discord webhook.
pub struct DiscordNotifier {
    client: Client,
    config: DiscordConfig,
}

impl DiscordNotifier {
    pub fn new(client: Client, config: DiscordConfig) -> Self {
        Self { client, config }
    }
}

fn message(notification: &Notification) -> DiscordMessage {
    let status = &notification.status;
    let (content, color, detail_title, detail) = match notification.kind {
        NotificationKind::StatusChanged => {
            let color = if notification.is_failure() { DISCORD_RED } else { DISCORD_BLUE };
            ("Uptime Status Alert", color, "Status", status.status_text.clone())
        }
        NotificationKind::CertificateExpiring => (
            "Uptime Cert Expiry Alert",
            DISCORD_RED,
            "CertExpiry",
            status.certificate_days_remaining.to_string(),
        ),
        NotificationKind::Test => ("Test Alert", DISCORD_RED, "Additional Details", status.status_text.clone()),
    };

    DiscordMessage {
        content: content.to_string(),
        username: "Uptime",
        embeds: vec![
            DiscordEmbed {
                title: status.site.clone(),
                color: Some(color),
                url: Some(status.url.clone()),
                description: status.url.clone(),
            },
            DiscordEmbed { title: detail_title.to_string(), color: None, url: None, description: detail },
        ],
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn provider(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self.client.post(&self.config.url).json(&message(notification)).send().await?;
        check_response(self.provider(), response).await?;
        Ok(())
    }
}
