//! Outbound alerting.
//!
//! Each provider implements [`Notifier`]. Configurations are stored under
//! `notify/<name>/{type,data}` and decoded once into a [`NotifierConfig`]
//! when the scheduler loads its epoch, not on every dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::database::{Database, DatabaseError};
use crate::monitoring::types::{NotificationKind, Status};

pub mod discord;
pub mod mailgun;
pub mod slack;

pub use discord::{DiscordConfig, DiscordNotifier};
pub use mailgun::{MailgunConfig, MailgunNotifier};
pub use slack::{SlackConfig, SlackNotifier};

/// Upper bound for a single provider call
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} rejected the notification ({status}): {body}")]
    Rejected {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("slack api error: {0}")]
    Slack(String),

    #[error("slack channel {0:?} not found")]
    ChannelNotFound(String),

    #[error("invalid notifier configuration: {0}")]
    InvalidConfiguration(String),
}

/// What a notifier is asked to deliver
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub status: Status,
    /// Expected status code of the monitor that produced `status`
    pub expected_status_code: u16,
}

impl Notification {
    pub fn new(kind: NotificationKind, status: Status, expected_status_code: u16) -> Self {
        Self { kind, status, expected_status_code }
    }

    /// Canned notification used to verify a provider configuration
    pub fn test() -> Self {
        let status = Status::new("test message", "https://example.com").with_status(0, "status info");
        Self::new(NotificationKind::Test, status, 0)
    }

    /// True when the observed code differs from the expected one
    pub fn is_failure(&self) -> bool {
        self.status.status_code != self.expected_status_code
    }
}

/// A trait for sending notifications to a specific provider.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Provider name used in logs
    fn provider(&self) -> &'static str;

    /// Deliver one notification. Called at most once per event.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Provider-specific settings, tagged by provider kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotifierConfig {
    Slack(SlackConfig),
    Discord(DiscordConfig),
    Mailgun(MailgunConfig),
}

impl NotifierConfig {
    /// Value stored under `notify/<name>/type`
    pub fn kind(&self) -> &'static str {
        match self {
            NotifierConfig::Slack(_) => "slack",
            NotifierConfig::Discord(_) => "discord",
            NotifierConfig::Mailgun(_) => "mailgun",
        }
    }

    /// Value stored under `notify/<name>/data`
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            NotifierConfig::Slack(config) => serde_json::to_vec(config),
            NotifierConfig::Discord(config) => serde_json::to_vec(config),
            NotifierConfig::Mailgun(config) => serde_json::to_vec(config),
        }
    }

    pub fn decode(kind: &str, data: &[u8]) -> Result<Self, DatabaseError> {
        let config = match kind {
            "slack" => NotifierConfig::Slack(serde_json::from_slice(data)?),
            "discord" => NotifierConfig::Discord(serde_json::from_slice(data)?),
            "mailgun" | "email" => NotifierConfig::Mailgun(serde_json::from_slice(data)?),
            other => {
                return Err(DatabaseError::Serialization(<serde_json::Error as serde::de::Error>::custom(
                    format!("unknown notifier type {other:?}"),
                )));
            }
        };
        Ok(config)
    }

    /// Construct the provider for this configuration
    pub fn build(&self, client: &Client) -> Arc<dyn Notifier> {
        match self {
            NotifierConfig::Slack(config) => Arc::new(SlackNotifier::new(client.clone(), config.clone())),
            NotifierConfig::Discord(config) => Arc::new(DiscordNotifier::new(client.clone(), config.clone())),
            NotifierConfig::Mailgun(config) => Arc::new(MailgunNotifier::new(client.clone(), config.clone())),
        }
    }
}

/// HTTP client shared by every provider
pub fn http_client() -> Result<Client, NotifyError> {
    Ok(Client::builder().timeout(SEND_TIMEOUT).build()?)
}

/// Named notifiers available to one scheduler epoch
#[derive(Default, Clone)]
pub struct NotifierRegistry {
    notifiers: HashMap<String, Arc<dyn Notifier>>,
}

impl std::fmt::Debug for NotifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.notifiers.keys().collect();
        names.sort();
        f.debug_struct("NotifierRegistry").field("notifiers", &names).finish()
    }
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every stored notifier. Entries that fail to decode are skipped.
    pub async fn load(database: &dyn Database, client: &Client) -> Result<Self, DatabaseError> {
        let mut registry = Self::new();
        for (name, config) in database.list_notifiers().await? {
            debug!(notifier = %name, kind = config.kind(), "loaded notifier");
            registry.insert(name, config.build(client));
        }
        Ok(registry)
    }

    pub fn insert(&mut self, name: impl Into<String>, notifier: Arc<dyn Notifier>) {
        self.notifiers.insert(name.into(), notifier);
    }

    /// Send `notification` through each named notifier in turn, once per name.
    ///
    /// Failures are logged and never stop the remaining notifiers. Returns the
    /// number of notifiers that accepted the notification.
    pub async fn dispatch(&self, names: &[String], notification: &Notification) -> usize {
        let mut delivered = 0;
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let Some(notifier) = self.notifiers.get(name) else {
                warn!(notifier = %name, site = %notification.status.site, "notifier not configured, skipping");
                continue;
            };

            match notifier.send(notification).await {
                Ok(()) => {
                    delivered += 1;
                    info!(
                        notifier = %name,
                        provider = notifier.provider(),
                        site = %notification.status.site,
                        kind = %notification.kind,
                        "notification sent"
                    );
                }
                Err(e) => warn!(
                    notifier = %name,
                    provider = notifier.provider(),
                    site = %notification.status.site,
                    kind = %notification.kind,
                    error = %e,
                    "failed to send notification"
                ),
            }
        }
        delivered
    }
}

/// Turn a non-success response into [`NotifyError::Rejected`]
pub(crate) async fn check_response(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read error body".to_string());
    Err(NotifyError::Rejected { provider, status: status.as_u16(), body })
}
