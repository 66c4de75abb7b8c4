//! Generic webhook sender.
//!
//! Posts a JSON document describing the trigger, the events and the contact
//! to a URL. The URL may be a template over `contact` and `trigger`. When a
//! delivery check is enabled, the send response is turned into a probe URL
//! that the delivery-check controller polls later.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use super::{
    PendingCheck, SendReceipt, SendRequest, Sender, SenderContext, SenderError, default_timeout_secs,
    send_with_retry,
};
use crate::config::{DeliveryCheckConfig, UnknownOptions};
use crate::domain::DeliveryCheckData;
use crate::template::{TemplateService, has_template_syntax};
use crate::utils::http_client::{build_client, build_headers};
use crate::{Error, Result};

/// Webhook sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL; may contain template expressions over `contact` and `trigger`.
    pub url: String,
    /// HTTP method (default: POST).
    #[serde(default = "default_method")]
    pub method: String,
    /// Basic auth user; auth is skipped when empty.
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Custom headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub delivery_check: DeliveryCheckConfig,
    #[serde(flatten)]
    pub unknown: UnknownOptions,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Webhook sender.
pub struct WebhookSender {
    config: WebhookConfig,
    client: Client,
    templates: std::sync::Arc<TemplateService>,
}

impl WebhookSender {
    pub fn new(config: WebhookConfig, ctx: &SenderContext) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(Error::config("webhook sender requires url"));
        }
        if !matches!(config.method.to_uppercase().as_str(), "POST" | "PUT") {
            return Err(Error::config(format!(
                "unsupported webhook method '{}'",
                config.method
            )));
        }
        if has_template_syntax(&config.url) {
            ctx.templates.validate(&config.url)?;
        } else {
            Url::parse(&config.url)
                .map_err(|e| Error::config(format!("invalid webhook url '{}': {}", config.url, e)))?;
        }

        let check = &config.delivery_check;
        check.validate()?;
        if check.enabled {
            ctx.templates.validate(&check.url_template)?;
            ctx.templates.validate(&check.check_template)?;
        }

        let client = build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            client,
            templates: ctx.templates.clone(),
        })
    }

    fn target_url(&self, request: &SendRequest<'_>) -> Result<String> {
        if !has_template_syntax(&self.config.url) {
            return Ok(self.config.url.clone());
        }
        self.templates.render(
            &self.config.url,
            json!({ "contact": request.contact, "trigger": request.trigger }),
        )
    }

    /// Render the probe for a successful send, if checks are enabled.
    fn delivery_probe(&self, request: &SendRequest<'_>, response: &Value) -> Option<PendingCheck> {
        let check = &self.config.delivery_check;
        if !check.enabled {
            return None;
        }
        let context = json!({
            "contact": request.contact,
            "trigger": request.trigger,
            "response": response,
        });
        let probe = match self.templates.render(&check.url_template, context) {
            Ok(url) if !url.trim().is_empty() => PendingCheck::Ready(DeliveryCheckData {
                url: url.trim().to_string(),
                contact: request.contact.clone(),
                trigger_id: request.trigger.id.clone(),
                attempts_count: 0,
            }),
            Ok(_) => PendingCheck::Unusable("delivery check URL rendered empty".to_string()),
            Err(e) => PendingCheck::Unusable(format!("failed to render delivery check URL: {}", e)),
        };
        Some(probe)
    }
}

/// The JSON document posted by webhooks and piped to scripts.
pub fn webhook_payload(request: &SendRequest<'_>) -> Value {
    let plots: Vec<String> = request.plots.iter().map(|p| STANDARD.encode(p)).collect();
    json!({
        "trigger": {
            "id": request.trigger.id,
            "name": request.trigger.name,
            "description": request.trigger.desc,
            "tags": request.trigger.tags,
        },
        "events": request.events,
        "contact": {
            "id": request.contact.id,
            "type": request.contact.contact_type,
            "value": request.contact.value,
            "user": request.contact.user,
            "team": request.contact.team,
        },
        "plot": plots.first().cloned().unwrap_or_default(),
        "plots": plots,
        "throttled": request.throttled,
    })
}

#[async_trait]
impl Sender for WebhookSender {
    fn sender_type(&self) -> &'static str {
        "webhook"
    }

    async fn send_events(&self, request: SendRequest<'_>) -> std::result::Result<SendReceipt, SenderError> {
        let url = self.target_url(&request)?;
        let payload = webhook_payload(&request);

        let mut builder = match self.config.method.to_uppercase().as_str() {
            "PUT" => self.client.put(&url),
            _ => self.client.post(&url),
        };
        builder = builder
            .headers(build_headers(&self.config.headers))
            .json(&payload);
        if !self.config.user.is_empty() {
            builder = builder.basic_auth(&self.config.user, Some(&self.config.password));
        }

        let reply = send_with_retry("Webhook", builder).await?;
        let status = reply.status.as_u16();
        if matches!(status, 404 | 410) {
            return Err(SenderError::broken(format!("webhook endpoint answered {}", reply.status)));
        }
        if !reply.status.is_success() {
            warn!("Webhook failed: {}", reply.describe());
            return Err(SenderError::transport(format!("Webhook failed: {}", reply.describe())));
        }

        debug!(trigger_id = %request.trigger.id, "Webhook notification sent");
        Ok(SendReceipt {
            delivery_check: self.delivery_probe(&request, &reply.body),
        })
    }

    fn delivery_check(&self) -> Option<&DeliveryCheckConfig> {
        Some(&self.config.delivery_check).filter(|check| check.enabled)
    }
}
