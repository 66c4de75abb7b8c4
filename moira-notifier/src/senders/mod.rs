//! Outbound senders.
//!
//! This module provides the adapters notifications are delivered through:
//! - Telegram Bot API
//! - Discord bot REST API
//! - Slack Web API
//! - Generic webhooks, with optional delivery checks
//! - Email (SMTP)
//! - External scripts
//! - Pushover

mod discord;
mod mail;
mod pushover;
mod script;
mod slack;
mod telegram;
mod webhook;

pub use discord::{DiscordConfig, DiscordSender};
pub use mail::{MailConfig, MailSender};
pub use pushover::{PushoverConfig, PushoverSender};
pub use script::{ScriptConfig, ScriptSender};
pub use slack::{SlackConfig, SlackSender};
pub use telegram::{TelegramConfig, TelegramSender};
pub use webhook::{WebhookConfig, WebhookSender, webhook_payload};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{DeliveryCheckConfig, SenderSettings, UnknownOptions};
use crate::domain::{ContactData, DeliveryCheckData, NotificationEvent, TriggerData};
use crate::format::{EmojiStyle, FormatterConfig, Markup, MessageFormatter};
use crate::plotting::Plot;
use crate::template::TemplateService;
use crate::{Error, Result};

/// Retries on HTTP 429 before giving up on a request.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Wait used when a 429 response carries no hint.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Longest rate-limit wait served in place; longer waits go back to the resend path.
const MAX_RETRY_WAIT: Duration = Duration::from_secs(30);

/// One delivery request handed to a sender.
#[derive(Debug, Clone, Copy)]
pub struct SendRequest<'a> {
    pub events: &'a [NotificationEvent],
    pub contact: &'a ContactData,
    pub trigger: &'a TriggerData,
    pub plots: &'a [Plot],
    pub throttled: bool,
}

/// What a successful send produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendReceipt {
    /// Delivery confirmation to run later, when the sender supports it.
    pub delivery_check: Option<PendingCheck>,
}

/// A delivery check prepared after a successful send.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingCheck {
    /// Poll this probe later.
    Ready(DeliveryCheckData),
    /// The probe could not be built from the send response; the check ends
    /// right away as a user exception.
    Unusable(String),
}

/// Why a send failed.
#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    /// The destination is permanently unusable; resending is pointless.
    #[error("Broken contact: {0}")]
    BrokenContact(String),

    #[error(transparent)]
    Failed(#[from] Error),
}

impl SenderError {
    pub fn broken(reason: impl Into<String>) -> Self {
        Self::BrokenContact(reason.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Failed(Error::Transport(msg.into()))
    }

    pub fn is_broken_contact(&self) -> bool {
        matches!(self, Self::BrokenContact(_))
    }
}

impl From<reqwest::Error> for SenderError {
    fn from(err: reqwest::Error) -> Self {
        Self::Failed(err.into())
    }
}

/// An outbound delivery adapter.
#[async_trait]
pub trait Sender: Send + Sync {
    /// The adapter type name (`telegram`, `webhook`, ...).
    fn sender_type(&self) -> &'static str;

    /// Deliver a batch of events to one contact.
    async fn send_events(&self, request: SendRequest<'_>) -> std::result::Result<SendReceipt, SenderError>;

    /// Delivery check settings, for senders that confirm deliveries.
    fn delivery_check(&self) -> Option<&DeliveryCheckConfig> {
        None
    }
}

/// Process-wide settings every sender is initialized with.
#[derive(Clone)]
pub struct SenderContext {
    pub front_url: String,
    pub location: Tz,
    pub date_time_format: String,
    pub templates: Arc<TemplateService>,
}

impl SenderContext {
    pub fn new(front_url: impl Into<String>, location: Tz, date_time_format: impl Into<String>) -> Self {
        Self {
            front_url: front_url.into(),
            location,
            date_time_format: date_time_format.into(),
            templates: Arc::new(TemplateService::new()),
        }
    }

    /// A formatter for the given markup flavour.
    pub fn formatter(&self, markup: Markup, emoji: Option<EmojiStyle>) -> MessageFormatter {
        let mut config = FormatterConfig::new(
            self.front_url.clone(),
            self.location,
            self.date_time_format.clone(),
        )
        .with_markup(markup);
        config.emoji = emoji;
        MessageFormatter::new(config)
    }
}

impl Default for SenderContext {
    fn default() -> Self {
        Self::new("", chrono_tz::UTC, crate::domain::DEFAULT_TIME_FORMAT)
    }
}

/// Build and initialize the sender described by `settings`.
pub fn build_sender(settings: &SenderSettings, ctx: &SenderContext) -> Result<Arc<dyn Sender>> {
    let ident = settings.ident()?.to_string();
    let sender: Arc<dyn Sender> = match settings.sender_type.as_str() {
        "telegram" => {
            let config: TelegramConfig = settings.decode()?;
            warn_unknown_options(&ident, &config.unknown);
            Arc::new(TelegramSender::new(config, ctx)?)
        }
        "discord" => {
            let config: DiscordConfig = settings.decode()?;
            warn_unknown_options(&ident, &config.unknown);
            Arc::new(DiscordSender::new(config, ctx)?)
        }
        "slack" => {
            let config: SlackConfig = settings.decode()?;
            warn_unknown_options(&ident, &config.unknown);
            Arc::new(SlackSender::new(config, ctx)?)
        }
        "webhook" => {
            let config: WebhookConfig = settings.decode()?;
            warn_unknown_options(&ident, &config.unknown);
            Arc::new(WebhookSender::new(config, ctx)?)
        }
        "mail" => {
            let config: MailConfig = settings.decode()?;
            warn_unknown_options(&ident, &config.unknown);
            Arc::new(MailSender::new(config, ctx)?)
        }
        "script" => {
            let config: ScriptConfig = settings.decode()?;
            warn_unknown_options(&ident, &config.unknown);
            Arc::new(ScriptSender::new(config, ctx)?)
        }
        "pushover" => {
            let config: PushoverConfig = settings.decode()?;
            warn_unknown_options(&ident, &config.unknown);
            Arc::new(PushoverSender::new(config, ctx)?)
        }
        other => {
            return Err(Error::config(format!("unknown sender type '{}'", other)));
        }
    };
    Ok(sender)
}

fn warn_unknown_options(ident: &str, unknown: &UnknownOptions) {
    for key in unknown.keys() {
        warn!(sender = %ident, option = %key, "Ignoring unknown sender option");
    }
}

fn default_timeout_secs() -> u64 {
    30
}

/// Status and decoded body of an HTTP reply.
///
/// Bodies that are not JSON are kept as a string; empty bodies decode to null.
#[derive(Debug, Clone)]
struct HttpReply {
    status: StatusCode,
    body: Value,
    /// Parsed `Retry-After` header, in seconds.
    retry_after: Option<Duration>,
}

impl HttpReply {
    async fn read(response: reqwest::Response) -> std::result::Result<Self, SenderError> {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .and_then(wait_from_secs);
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(Self {
            status,
            body,
            retry_after,
        })
    }

    /// A short description of a failed reply for error messages.
    fn describe(&self) -> String {
        match &self.body {
            Value::Null => self.status.to_string(),
            body => format!("{} - {}", self.status, body),
        }
    }
}

/// Send a request, waiting out HTTP 429 responses.
///
/// The wait comes from the `Retry-After` header, else from the body.
/// Any other reply, successful or not, is handed back to the caller.
async fn send_with_retry(
    label: &str,
    request: reqwest::RequestBuilder,
) -> std::result::Result<HttpReply, SenderError> {
    send_rebuilt_with_retry(label, || {
        request.try_clone().ok_or_else(|| {
            SenderError::Failed(Error::Other(format!("{} request cannot be retried", label)))
        })
    })
    .await
}

/// [`send_with_retry`] for requests that cannot be cloned, such as multipart
/// uploads: `build` makes a fresh request for every attempt.
async fn send_rebuilt_with_retry<F>(label: &str, mut build: F) -> std::result::Result<HttpReply, SenderError>
where
    F: FnMut() -> std::result::Result<reqwest::RequestBuilder, SenderError>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        let attempt = build()?;
        let response = attempt
            .send()
            .await
            .map_err(|e| SenderError::transport(format!("{} request failed: {}", label, e)))?;
        let reply = HttpReply::read(response).await?;

        if reply.status != StatusCode::TOO_MANY_REQUESTS {
            return Ok(reply);
        }

        let hint = reply.retry_after.or_else(|| retry_after(&reply.body));
        if attempts >= MAX_RATE_LIMIT_RETRIES {
            warn!(
                "{} rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                label, MAX_RATE_LIMIT_RETRIES, hint
            );
            return Err(SenderError::transport(format!(
                "{} rate limit exceeded after {} retries",
                label, MAX_RATE_LIMIT_RETRIES
            )));
        }

        let wait = hint.unwrap_or(DEFAULT_RETRY_AFTER);
        if wait > MAX_RETRY_WAIT {
            warn!(
                "{} rate limit: retry_after {:?} exceeds {:?}, giving up for now",
                label, wait, MAX_RETRY_WAIT
            );
            return Err(SenderError::transport(format!(
                "{} rate limited for {:?}",
                label, wait
            )));
        }
        debug!(
            "{} rate limited (429), waiting {:?} before retry (attempt {}/{})",
            label, wait, attempts, MAX_RATE_LIMIT_RETRIES
        );
        tokio::time::sleep(wait).await;
    }
}

/// Extract the wait hint of a rate-limited response body.
///
/// Telegram nests it as `parameters.retry_after`, Discord puts it at the top level.
fn retry_after(body: &Value) -> Option<Duration> {
    body.get("parameters")
        .and_then(|p| p.get("retry_after"))
        .or_else(|| body.get("retry_after"))
        .and_then(|v| v.as_f64())
        .and_then(wait_from_secs)
}

/// A wait of `secs` seconds. Negative and NaN hints are ignored; hints too
/// large for a `Duration` saturate.
fn wait_from_secs(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::BTreeMap;

    use crate::domain::{ContactData, NotificationEvent, State, TriggerData};

    pub fn event(metric: &str, state: State, old_state: State) -> NotificationEvent {
        NotificationEvent {
            metric: metric.to_string(),
            timestamp: 1_700_000_000,
            state,
            old_state,
            trigger_id: "trigger-1".to_string(),
            subscription_id: Some("sub-1".to_string()),
            values: BTreeMap::from([("t1".to_string(), 97.5)]),
            message: None,
            is_trigger_event: false,
        }
    }

    pub fn trigger() -> TriggerData {
        TriggerData {
            id: "trigger-1".to_string(),
            name: "CPU usage".to_string(),
            desc: "Load is high".to_string(),
            tags: vec!["prod".to_string(), "web".to_string()],
            ..Default::default()
        }
    }

    pub fn contact(contact_type: &str, value: &str) -> ContactData {
        ContactData {
            id: format!("{}-contact", contact_type),
            contact_type: contact_type.to_string(),
            value: value.to_string(),
            user: Some("alice".to_string()),
            team: None,
        }
    }
}
