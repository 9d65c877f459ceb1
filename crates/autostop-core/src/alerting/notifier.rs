//! Notification delivery for stop events

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{NotificationConfig, SlackConfig, TelegramConfig};

/// A notification transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Telegram Bot API
    Telegram,
    /// Slack incoming webhook
    Slack,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telegram => f.write_str("telegram"),
            Self::Slack => f.write_str("slack"),
        }
    }
}

/// Which channels a notification is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelSelection {
    /// Telegram only
    #[default]
    Telegram,
    /// Slack only
    Slack,
    /// Telegram and Slack; one success is enough
    Both,
}

impl ChannelSelection {
    /// Channels to attempt, in reporting order
    pub fn channels(self) -> &'static [Channel] {
        match self {
            Self::Telegram => &[Channel::Telegram],
            Self::Slack => &[Channel::Slack],
            Self::Both => &[Channel::Telegram, Channel::Slack],
        }
    }

    /// Canonical name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Telegram => "TELEGRAM",
            Self::Slack => "SLACK",
            Self::Both => "BOTH",
        }
    }
}

impl FromStr for ChannelSelection {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "TELEGRAM" => Ok(Self::Telegram),
            "SLACK" => Ok(Self::Slack),
            "BOTH" => Ok(Self::Both),
            other => Err(NotificationError::ConfigError(format!(
                "unknown message channel selection '{other}' (expected TELEGRAM, SLACK or BOTH)"
            ))),
        }
    }
}

impl TryFrom<String> for ChannelSelection {
    type Error = NotificationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelSelection> for String {
    fn from(selection: ChannelSelection) -> Self {
        selection.as_str().to_string()
    }
}

impl fmt::Display for ChannelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can deliver a text message over one channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// The channel this notifier delivers to
    fn channel(&self) -> Channel;

    /// Deliver a message
    async fn send(&self, message: &str) -> Result<(), NotificationError>;
}

/// Result of one delivery attempt on one channel
#[derive(Debug)]
pub struct NotificationOutcome {
    /// Channel that was attempted
    pub channel: Channel,
    /// When the attempt finished
    pub sent_at: DateTime<Utc>,
    /// Failure, if any
    pub error: Option<NotificationError>,
}

impl NotificationOutcome {
    /// Whether the channel accepted the message
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Fans a message out to the selected channels
pub struct NotificationGateway {
    telegram: Box<dyn Notifier>,
    slack: Box<dyn Notifier>,
}

impl NotificationGateway {
    /// Create a gateway from explicit transports
    pub fn new(telegram: Box<dyn Notifier>, slack: Box<dyn Notifier>) -> Self {
        Self { telegram, slack }
    }

    /// Create a gateway with the HTTP transports described by `config`
    pub fn from_config(config: &NotificationConfig, client: Client) -> Self {
        Self::new(
            Box::new(TelegramNotifier::new(client.clone(), &config.telegram)),
            Box::new(SlackNotifier::new(client, &config.slack)),
        )
    }

    fn notifier(&self, channel: Channel) -> &dyn Notifier {
        match channel {
            Channel::Telegram => self.telegram.as_ref(),
            Channel::Slack => self.slack.as_ref(),
        }
    }

    /// Attempt every selected channel independently
    pub async fn deliver(
        &self,
        message: &str,
        selection: ChannelSelection,
    ) -> Vec<NotificationOutcome> {
        let attempts = selection.channels().iter().map(|&selected| async move {
            let notifier = self.notifier(selected);
            let channel = notifier.channel();
            let result = notifier.send(message).await;
            let outcome = NotificationOutcome {
                channel,
                sent_at: Utc::now(),
                error: result.err(),
            };

            match &outcome.error {
                None => info!(channel = %channel, "Notification sent"),
                Some(e) => warn!(channel = %channel, error = %e, "Notification failed"),
            }

            outcome
        });

        join_all(attempts).await
    }

    /// Send a message to the selected channels.
    ///
    /// Succeeds when at least one channel accepted the message. When every
    /// channel failed, the first channel's error is returned.
    pub async fn notify(
        &self,
        message: &str,
        selection: ChannelSelection,
    ) -> Result<(), NotificationError> {
        let outcomes = self.deliver(message, selection).await;

        if outcomes.iter().any(NotificationOutcome::succeeded) {
            return Ok(());
        }

        Err(outcomes
            .into_iter()
            .find_map(|outcome| outcome.error)
            .unwrap_or_else(|| NotificationError::ConfigError("no channel selected".to_string())))
    }
}

/// Telegram Bot API transport
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: Option<String>,
    chat_id: Option<String>,
    parse_mode: String,
}

impl TelegramNotifier {
    /// Create a Telegram notifier
    pub fn new(client: Client, config: &TelegramConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: non_empty(config.bot_token.as_deref()),
            chat_id: non_empty(config.chat_id.as_deref()),
            parse_mode: config.parse_mode.clone(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    async fn send(&self, message: &str) -> Result<(), NotificationError> {
        let (Some(bot_token), Some(chat_id)) = (&self.bot_token, &self.chat_id) else {
            return Err(NotificationError::ConfigError(
                "telegram bot token and chat id must both be set".to_string(),
            ));
        };

        let text = if self.parse_mode.eq_ignore_ascii_case("html") {
            escape_html(message)
        } else {
            message.to_string()
        };

        let payload = TelegramPayload {
            chat_id,
            text: &text,
            parse_mode: &self.parse_mode,
        };

        let endpoint = format!("{}/bot{}/sendMessage", self.api_base, bot_token);
        debug!(chat_id = %chat_id, "Sending Telegram notification");

        let response = self
            .client
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::HttpError(e.without_url().to_string()))?;

        check_status(Channel::Telegram, response).await
    }
}

/// Slack incoming-webhook transport
pub struct SlackNotifier {
    client: Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    /// Create a Slack notifier
    pub fn new(client: Client, config: &SlackConfig) -> Self {
        Self {
            client,
            webhook_url: non_empty(config.webhook_url.as_deref()),
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn channel(&self) -> Channel {
        Channel::Slack
    }

    async fn send(&self, message: &str) -> Result<(), NotificationError> {
        let Some(webhook_url) = &self.webhook_url else {
            return Err(NotificationError::ConfigError(
                "slack webhook URL is not configured".to_string(),
            ));
        };

        debug!("Sending Slack notification");

        let response = self
            .client
            .post(webhook_url)
            .json(&SlackPayload { text: message })
            .send()
            .await
            .map_err(|e| NotificationError::HttpError(e.without_url().to_string()))?;

        check_status(Channel::Slack, response).await
    }
}

async fn check_status(channel: Channel, response: reqwest::Response) -> Result<(), NotificationError> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(NotificationError::Rejected {
        channel,
        status: status.as_u16(),
        body,
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// The request never got a response
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The channel answered with something other than 200
    #[error("{channel} API returned status code {status}: {body}")]
    Rejected {
        /// Channel that rejected the message
        channel: Channel,
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Credentials or endpoints for the channel are missing
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[derive(Debug, Serialize)]
struct TelegramPayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    text: &'a str,
}
