//! Telegram Bot API sender.
//!
//! Sends messages via `POST /bot<token>/sendMessage` and plots via
//! `sendPhoto`. The contact value is the chat id (or `@channelname`).
//! Handles 429 rate limits by respecting the `parameters.retry_after` field
//! returned in the JSON response body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{
    HttpReply, SendReceipt, SendRequest, Sender, SenderContext, SenderError, default_timeout_secs,
    send_rebuilt_with_retry, send_with_retry,
};
use crate::config::UnknownOptions;
use crate::format::{EmojiStyle, Markup, MessageFormatter};
use crate::utils::http_client::build_client;
use crate::{Error, Result};

/// Telegram `sendMessage` text limit (UTF-8 characters).
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// API error descriptions that mean the chat can no longer be reached.
const BROKEN_CHAT_DESCRIPTIONS: &[&str] = &[
    "chat not found",
    "bot was blocked by the user",
    "bot was kicked",
    "bot is not a member",
    "user is deactivated",
    "group chat was upgraded",
    "have no rights to send",
    "not enough rights",
];

/// Telegram sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram Bot API token.
    pub api_token: String,
    /// Bot API base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub unknown: UnknownOptions,
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

/// Telegram sender.
pub struct TelegramSender {
    config: TelegramConfig,
    client: Client,
    formatter: MessageFormatter,
}

impl TelegramSender {
    pub fn new(config: TelegramConfig, ctx: &SenderContext) -> Result<Self> {
        if config.api_token.trim().is_empty() {
            return Err(Error::config("telegram sender requires api_token"));
        }
        let client = build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            client,
            formatter: ctx.formatter(Markup::Html, Some(EmojiStyle::Unicode)),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.api_token,
            method
        )
    }

    async fn send_photo(&self, chat_id: &str, plot: &[u8]) -> std::result::Result<(), SenderError> {
        let reply = send_rebuilt_with_retry("Telegram", || {
            let photo = Part::bytes(plot.to_vec())
                .file_name("plot.png")
                .mime_str("image/png")?;
            let form = Form::new()
                .text("chat_id", chat_id.to_string())
                .part("photo", photo);
            Ok(self.client.post(self.method_url("sendPhoto")).multipart(form))
        })
        .await?;
        check_reply(&reply)
    }
}

/// Map a Bot API reply to the send outcome.
fn check_reply(reply: &HttpReply) -> std::result::Result<(), SenderError> {
    let api_ok = reply.body.get("ok").and_then(|v| v.as_bool()).unwrap_or(true);
    if reply.status.is_success() && api_ok {
        return Ok(());
    }

    let description = reply
        .body
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let lowered = description.to_lowercase();
    if reply.status.as_u16() == 403
        || BROKEN_CHAT_DESCRIPTIONS
            .iter()
            .any(|pattern| lowered.contains(pattern))
    {
        return Err(SenderError::broken(description.to_string()));
    }

    warn!("Telegram request failed: {}", reply.describe());
    Err(SenderError::transport(format!(
        "Telegram request failed: {}",
        reply.describe()
    )))
}

#[async_trait]
impl Sender for TelegramSender {
    fn sender_type(&self) -> &'static str {
        "telegram"
    }

    async fn send_events(&self, request: SendRequest<'_>) -> std::result::Result<SendReceipt, SenderError> {
        let chat_id = request.contact.value.trim();
        if chat_id.is_empty() {
            return Err(SenderError::broken("empty telegram chat id"));
        }

        let text = self.formatter.format(
            request.events,
            request.trigger,
            request.throttled,
            TELEGRAM_MESSAGE_LIMIT,
        );
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let reply = send_with_retry(
            "Telegram",
            self.client.post(self.method_url("sendMessage")).json(&payload),
        )
        .await?;
        check_reply(&reply)?;

        for plot in request.plots {
            self.send_photo(chat_id, plot).await?;
        }

        debug!(chat_id = %chat_id, trigger_id = %request.trigger.id, "Telegram notification sent");
        Ok(SendReceipt::default())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::domain::State;
    use crate::senders::fixtures::{contact, event, trigger};

    fn sender(server: &MockServer) -> TelegramSender {
        let config: TelegramConfig = serde_json::from_value(json!({
            "api_token": "123:abc",
            "api_url": server.uri(),
        }))
        .unwrap();
        TelegramSender::new(config, &SenderContext::default()).unwrap()
    }

    #[test]
    fn test_requires_token() {
        let config: TelegramConfig = serde_json::from_value(json!({"api_token": " "})).unwrap();
        assert!(TelegramSender::new(config, &SenderContext::default()).is_err());
    }

    #[test]
    fn test_unknown_options_are_captured() {
        let config: TelegramConfig =
            serde_json::from_value(json!({"api_token": "t", "parse_mode": "HTML"})).unwrap();
        assert!(config.unknown.contains_key("parse_mode"));
        assert_eq!(config.api_url, "https://api.telegram.org");
    }

    #[tokio::test]
    async fn test_sends_html_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(json!({"chat_id": "42", "parse_mode": "HTML"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let events = vec![event("cpu.load", State::Error, State::Ok)];
        let contact = contact("telegram", "42");
        let trigger = trigger();
        let receipt = sender(&server)
            .send_events(SendRequest {
                events: &events,
                contact: &contact,
                trigger: &trigger,
                plots: &[],
                throttled: false,
            })
            .await
            .unwrap();
        assert_eq!(receipt, SendReceipt::default());

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let text = body["text"].as_str().unwrap();
        assert!(text.contains("<b>ERROR</b>"));
        assert!(text.contains("cpu.load"));
    }

    #[tokio::test]
    async fn test_chat_not_found_is_broken_contact() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: chat not found",
            })))
            .mount(&server)
            .await;

        let events = vec![event("cpu.load", State::Warn, State::Ok)];
        let contact = contact("telegram", "42");
        let trigger = trigger();
        let err = sender(&server)
            .send_events(SendRequest {
                events: &events,
                contact: &contact,
                trigger: &trigger,
                plots: &[],
                throttled: false,
            })
            .await
            .unwrap_err();
        assert!(err.is_broken_contact());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"ok": false})))
            .mount(&server)
            .await;

        let events = vec![event("cpu.load", State::Warn, State::Ok)];
        let contact = contact("telegram", "42");
        let trigger = trigger();
        let err = sender(&server)
            .send_events(SendRequest {
                events: &events,
                contact: &contact,
                trigger: &trigger,
                plots: &[],
                throttled: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SenderError::Failed(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_rate_limited_photo_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendPhoto"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "ok": false,
                "error_code": 429,
                "parameters": {"retry_after": 0},
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendPhoto"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let events = vec![event("cpu.load", State::Error, State::Ok)];
        let contact = contact("telegram", "42");
        let trigger = trigger();
        let plots = vec![vec![0x89, b'P', b'N', b'G']];
        sender(&server)
            .send_events(SendRequest {
                events: &events,
                contact: &contact,
                trigger: &trigger,
                plots: &plots,
                throttled: false,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_plots_are_sent_as_photos() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendPhoto"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(2)
            .mount(&server)
            .await;

        let events = vec![event("cpu.load", State::Error, State::Ok)];
        let contact = contact("telegram", "42");
        let trigger = trigger();
        let plots = vec![vec![0x89, b'P', b'N', b'G'], vec![0x89, b'P', b'N', b'G']];
        sender(&server)
            .send_events(SendRequest {
                events: &events,
                contact: &contact,
                trigger: &trigger,
                plots: &plots,
                throttled: false,
            })
            .await
            .unwrap();
    }
}
