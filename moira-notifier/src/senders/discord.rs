//! Discord bot sender.
//!
//! Posts to `POST /channels/{channel_id}/messages` with a bot token. The
//! contact value is the channel id. Plots are attached as files in a
//! multipart request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
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

/// Discord message content limit.
const DISCORD_MESSAGE_LIMIT: usize = 2000;

/// JSON error codes that mean the channel can no longer be reached.
const BROKEN_CHANNEL_CODES: &[u64] = &[
    10003, // Unknown channel
    10013, // Unknown user
    50001, // Missing access
    50007, // Cannot send messages to this user
    50013, // Missing permissions
];

/// Discord sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token.
    pub token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub unknown: UnknownOptions,
}

fn default_api_url() -> String {
    "https://discord.com/api/v10".to_string()
}

/// Discord sender.
pub struct DiscordSender {
    config: DiscordConfig,
    client: Client,
    formatter: MessageFormatter,
}

impl DiscordSender {
    pub fn new(config: DiscordConfig, ctx: &SenderContext) -> Result<Self> {
        if config.token.trim().is_empty() {
            return Err(Error::config("discord sender requires token"));
        }
        let client = build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            client,
            formatter: ctx.formatter(Markup::Markdown, Some(EmojiStyle::Unicode)),
        })
    }

    fn messages_url(&self, channel_id: &str) -> String {
        format!(
            "{}/channels/{}/messages",
            self.config.api_url.trim_end_matches('/'),
            channel_id
        )
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.config.token)
    }

    async fn send_with_files(
        &self,
        channel_id: &str,
        payload: &serde_json::Value,
        plots: &[Vec<u8>],
    ) -> std::result::Result<HttpReply, SenderError> {
        let mut form = Form::new().text("payload_json", payload.to_string());
        for (index, plot) in plots.iter().enumerate() {
            let part = Part::bytes(plot.clone())
                .file_name(format!("plot{}.png", index))
                .mime_str("image/png")?;
            form = form.part(format!("files[{}]", index), part);
        }

        let response = self
            .client
            .post(self.messages_url(channel_id))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .multipart(form)
            .send()
            .await
            .map_err(|e| SenderError::transport(format!("Discord request failed: {}", e)))?;
        HttpReply::read(response).await
    }
}

fn check_reply(reply: &HttpReply) -> std::result::Result<(), SenderError> {
    if reply.status.is_success() {
        return Ok(());
    }

    let code = reply.body.get("code").and_then(|v| v.as_u64());
    let broken = matches!(reply.status.as_u16(), 403 | 404)
        || code.is_some_and(|c| BROKEN_CHANNEL_CODES.contains(&c));
    if broken {
        let message = reply
            .body
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("channel unavailable");
        return Err(SenderError::broken(message.to_string()));
    }

    warn!("Discord request failed: {}", reply.describe());
    Err(SenderError::transport(format!(
        "Discord request failed: {}",
        reply.describe()
    )))
}

#[async_trait]
impl Sender for DiscordSender {
    fn sender_type(&self) -> &'static str {
        "discord"
    }

    async fn send_events(&self, request: SendRequest<'_>) -> std::result::Result<SendReceipt, SenderError> {
        let channel_id = request.contact.value.trim();
        if channel_id.is_empty() {
            return Err(SenderError::broken("empty discord channel id"));
        }

        let content = self.formatter.format(
            request.events,
            request.trigger,
            request.throttled,
            DISCORD_MESSAGE_LIMIT,
        );
        let payload = json!({
            "content": content,
            "allowed_mentions": { "parse": [] },
        });

        let reply = if request.plots.is_empty() {
            send_with_retry(
                "Discord",
                self.client
                    .post(self.messages_url(channel_id))
                    .header(reqwest::header::AUTHORIZATION, self.authorization())
                    .json(&payload),
            )
            .await?
        } else {
            self.send_with_files(channel_id, &payload, request.plots).await?
        };
        check_reply(&reply)?;

        debug!(channel_id = %channel_id, trigger_id = %request.trigger.id, "Discord notification sent");
        Ok(SendReceipt::default())
    }
}
