//! Slack Web API sender.
//!
//! Posts with `chat.postMessage`. The contact value is a channel id, a
//! `#channel` name or a user id. Slack answers HTTP 200 with `"ok": false`
//! and an `error` code on failures.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{
    HttpReply, SendReceipt, SendRequest, Sender, SenderContext, SenderError, default_timeout_secs,
    send_with_retry,
};
use crate::config::UnknownOptions;
use crate::format::{EmojiStyle, Markup, MessageFormatter};
use crate::utils::http_client::build_client;
use crate::{Error, Result};

/// Slack recommends keeping message text under this many characters.
const SLACK_MESSAGE_LIMIT: usize = 4000;

/// Error codes that mean the destination can no longer be reached.
const BROKEN_CHANNEL_ERRORS: &[&str] = &[
    "channel_not_found",
    "is_archived",
    "not_in_channel",
    "user_not_found",
    "user_disabled",
    "cannot_dm_bot",
];

/// Slack sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`).
    pub api_token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Prefix titles with `:emoji:` shortcodes.
    #[serde(default)]
    pub use_emoji: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub unknown: UnknownOptions,
}

fn default_api_url() -> String {
    "https://slack.com/api".to_string()
}

/// Slack sender.
pub struct SlackSender {
    config: SlackConfig,
    client: Client,
    formatter: MessageFormatter,
}

impl SlackSender {
    pub fn new(config: SlackConfig, ctx: &SenderContext) -> Result<Self> {
        if config.api_token.trim().is_empty() {
            return Err(Error::config("slack sender requires api_token"));
        }
        let client = build_client(Duration::from_secs(config.timeout_secs))?;
        let emoji = config.use_emoji.then_some(EmojiStyle::Shortcode);
        Ok(Self {
            formatter: ctx.formatter(Markup::Slack, emoji),
            config,
            client,
        })
    }
}

fn check_reply(reply: &HttpReply) -> std::result::Result<(), SenderError> {
    let api_ok = reply.body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
    if reply.status.is_success() && api_ok {
        return Ok(());
    }

    let error = reply
        .body
        .get("error")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if BROKEN_CHANNEL_ERRORS.contains(&error) {
        return Err(SenderError::broken(error.to_string()));
    }

    warn!("Slack request failed: {}", reply.describe());
    Err(SenderError::transport(format!(
        "Slack request failed: {}",
        reply.describe()
    )))
}

#[async_trait]
impl Sender for SlackSender {
    fn sender_type(&self) -> &'static str {
        "slack"
    }

    async fn send_events(&self, request: SendRequest<'_>) -> std::result::Result<SendReceipt, SenderError> {
        let channel = request.contact.value.trim();
        if channel.is_empty() {
            return Err(SenderError::broken("empty slack channel"));
        }

        let text = self.formatter.format(
            request.events,
            request.trigger,
            request.throttled,
            SLACK_MESSAGE_LIMIT,
        );
        let payload = json!({
            "channel": channel,
            "text": text,
            "mrkdwn": true,
            "unfurl_links": false,
        });

        let url = format!("{}/chat.postMessage", self.config.api_url.trim_end_matches('/'));
        let reply = send_with_retry(
            "Slack",
            self.client
                .post(url)
                .bearer_auth(&self.config.api_token)
                .json(&payload),
        )
        .await?;
        check_reply(&reply)?;

        if !request.plots.is_empty() {
            debug!(channel = %channel, "Slack sender does not upload plots, skipping");
        }
        debug!(channel = %channel, trigger_id = %request.trigger.id, "Slack notification sent");
        Ok(SendReceipt::default())
    }
}
