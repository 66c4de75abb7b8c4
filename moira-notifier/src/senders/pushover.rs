//! Pushover sender.
//!
//! Posts to `/1/messages.json`. The contact value is the user or group key.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    SendReceipt, SendRequest, Sender, SenderContext, SenderError, default_timeout_secs,
    send_with_retry,
};
use crate::config::UnknownOptions;
use crate::domain::{State, current_state};
use crate::format::{Markup, MessageFormatter, take_chars};
use crate::utils::http_client::build_client;
use crate::{Error, Result};

/// Pushover message limit.
const PUSHOVER_MESSAGE_LIMIT: usize = 1024;

/// Pushover title limit.
const PUSHOVER_TITLE_LIMIT: usize = 250;

/// Pushover sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushoverConfig {
    /// Application token.
    pub api_token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub unknown: UnknownOptions,
}

fn default_api_url() -> String {
    "https://api.pushover.net".to_string()
}

/// Pushover sender.
pub struct PushoverSender {
    config: PushoverConfig,
    client: Client,
    formatter: MessageFormatter,
}

impl PushoverSender {
    pub fn new(config: PushoverConfig, ctx: &SenderContext) -> Result<Self> {
        if config.api_token.trim().is_empty() {
            return Err(Error::config("pushover sender requires api_token"));
        }
        let client = build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            client,
            formatter: ctx.formatter(Markup::Plain, None),
        })
    }
}

/// Pushover priority for the state of a batch.
fn priority(state: State) -> i8 {
    match state {
        State::Error | State::Nodata | State::Exception => 1,
        State::Ok => -1,
        State::Warn | State::Test => 0,
    }
}

#[async_trait]
impl Sender for PushoverSender {
    fn sender_type(&self) -> &'static str {
        "pushover"
    }

    async fn send_events(&self, request: SendRequest<'_>) -> std::result::Result<SendReceipt, SenderError> {
        let user_key = request.contact.value.trim();
        if user_key.is_empty() {
            return Err(SenderError::broken("empty pushover user key"));
        }

        let title = take_chars(
            &self
                .formatter
                .subject(request.events, request.trigger, request.throttled),
            PUSHOVER_TITLE_LIMIT,
        );
        let message = self.formatter.format(
            request.events,
            request.trigger,
            request.throttled,
            PUSHOVER_MESSAGE_LIMIT,
        );
        let state = current_state(request.events, request.throttled);

        let mut form: Vec<(&str, String)> = vec![
            ("token", self.config.api_token.clone()),
            ("user", user_key.to_string()),
            ("title", title),
            ("message", message),
            ("priority", priority(state).to_string()),
        ];
        if let Some(last) = request.events.last() {
            form.push(("timestamp", last.timestamp.to_string()));
        }
        if let Some(uri) = request.trigger.trigger_uri(&self.formatter.config().front_url) {
            form.push(("url", uri));
        }

        let url = format!("{}/1/messages.json", self.config.api_url.trim_end_matches('/'));
        let reply = send_with_retry("Pushover", self.client.post(url).form(&form)).await?;

        if reply.status.is_success() {
            if !request.plots.is_empty() {
                debug!("Pushover sender does not attach plots, skipping");
            }
            debug!(trigger_id = %request.trigger.id, "Pushover notification sent");
            return Ok(SendReceipt::default());
        }

        let invalid_user = reply.body.get("user").and_then(|v| v.as_str()) == Some("invalid");
        if reply.status.is_client_error() && invalid_user {
            return Err(SenderError::broken(format!("invalid pushover user key: {}", reply.describe())));
        }

        warn!("Pushover request failed: {}", reply.describe());
        Err(SenderError::transport(format!(
            "Pushover request failed: {}",
            reply.describe()
        )))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::senders::fixtures::{contact, event, trigger};

    fn sender(server: &MockServer) -> PushoverSender {
        let config: PushoverConfig = serde_json::from_value(json!({
            "api_token": "app-token",
            "api_url": server.uri(),
        }))
        .unwrap();
        PushoverSender::new(config, &SenderContext::default()).unwrap()
    }

    #[test]
    fn test_priority_by_state() {
        assert_eq!(priority(State::Error), 1);
        assert_eq!(priority(State::Ok), -1);
        assert_eq!(priority(State::Warn), 0);
    }

    #[tokio::test]
    async fn test_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/messages.json"))
            .and(body_string_contains("token=app-token"))
            .and(body_string_contains("user=ukey"))
            .and(body_string_contains("priority=1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let events = vec![event("cpu", State::Error, State::Ok)];
        let contact = contact("pushover", "ukey");
        let trigger = trigger();
        sender(&server)
            .send_events(SendRequest {
                events: &events,
                contact: &contact,
                trigger: &trigger,
                plots: &[],
                throttled: false,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_user_is_broken_contact() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "user": "invalid",
                "errors": ["user identifier is not a valid user, group, or subscribed user key"],
                "status": 0,
            })))
            .mount(&server)
            .await;

        let events = vec![event("cpu", State::Error, State::Ok)];
        let contact = contact("pushover", "bad");
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
}
