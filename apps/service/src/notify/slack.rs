use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Notification, Notifier, NotifyError, check_response};
use crate::monitoring::types::NotificationKind;

const SLACK_API: &str = "https://slack.com/api";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Bot token, sent as a bearer token
    pub token: String,
    /// Channel name without the leading `#`
    pub channel: String,
}

#[derive(Debug, Deserialize)]
struct ChannelList {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct SlackMessage {
    channel: String,
    text: &'static str,
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
struct Attachment {
    pretext: String,
    text: String,
}

/// A sender for posting notifications to a Slack channel via the Web API.
pub struct SlackNotifier {
    client: Client,
    config: SlackConfig,
    api_base: String,
}

impl SlackNotifier {
    pub fn new(client: Client, config: SlackConfig) -> Self {
        Self { client, config, api_base: SLACK_API.to_string() }
    }

    /// Point the notifier at a different API root
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Resolve the configured channel name to its ID
    async fn channel_id(&self) -> Result<String, NotifyError> {
        let response = self
            .client
            .get(format!("{}/conversations.list", self.api_base))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        let list: ChannelList = check_response(self.provider(), response).await?.json().await?;

        if !list.ok {
            return Err(NotifyError::Slack(list.error.unwrap_or_else(|| "unknown error".into())));
        }

        let wanted = self.config.channel.trim_start_matches('#');
        list.channels
            .into_iter()
            .find(|c| c.name == wanted)
            .map(|c| c.id)
            .ok_or_else(|| NotifyError::ChannelNotFound(self.config.channel.clone()))
    }
}

fn message(channel: String, notification: &Notification) -> SlackMessage {
    let status = &notification.status;
    let (text, detail_title, detail) = match notification.kind {
        NotificationKind::StatusChanged => ("Uptime Status Update", "Status", status.status_text.clone()),
        NotificationKind::CertificateExpiring => (
            "Uptime Certificate Expiry",
            "Cert Expiry",
            status.certificate_days_remaining.to_string(),
        ),
        NotificationKind::Test => ("Test Message", "Details", status.status_text.clone()),
    };

    SlackMessage {
        channel,
        text,
        attachments: vec![
            Attachment { pretext: status.site.clone(), text: status.url.clone() },
            Attachment { pretext: detail_title.to_string(), text: detail },
        ],
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn provider(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let channel = self.channel_id().await?;
        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.config.token)
            .json(&message(channel, notification))
            .send()
            .await?;

        let posted: PostResponse = check_response(self.provider(), response).await?.json().await?;
        if !posted.ok {
            return Err(NotifyError::Slack(posted.error.unwrap_or_else(|| "unknown error".into())));
        }
        Ok(())
    }
}
