//! Email sender over SMTP.
//!
//! Each package becomes one message with a plain text body, an HTML
//! alternative and the plots attached as PNG files. The contact value is
//! the recipient address.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{SendReceipt, SendRequest, Sender, SenderContext, SenderError};
use crate::config::UnknownOptions;
use crate::format::{Markup, MessageFormatter};
use crate::{Error, Result};

/// Body limit; mail has no hard one, this only bounds pathological packages.
const MAIL_MESSAGE_LIMIT: usize = 100_000;

/// Mail sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Sender address, e.g. `Moira <moira@example.com>`.
    pub mail_from: String,
    #[serde(default)]
    pub smtp_user: String,
    #[serde(default)]
    pub smtp_pass: String,
    /// Upgrade the connection with STARTTLS.
    #[serde(default)]
    pub tls: bool,
    /// Accept invalid server certificates.
    #[serde(default)]
    pub insecure_tls: bool,
    #[serde(flatten)]
    pub unknown: UnknownOptions,
}

fn default_smtp_port() -> u16 {
    25
}

/// Mail sender.
pub struct MailSender {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    plain: MessageFormatter,
    html: MessageFormatter,
}

impl MailSender {
    pub fn new(config: MailConfig, ctx: &SenderContext) -> Result<Self> {
        if config.smtp_host.trim().is_empty() {
            return Err(Error::config("mail sender requires smtp_host"));
        }
        let from: Mailbox = config
            .mail_from
            .parse()
            .map_err(|e| Error::config(format!("invalid mail_from '{}': {}", config.mail_from, e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
            .port(config.smtp_port);
        if config.tls {
            let params = TlsParameters::builder(config.smtp_host.clone())
                .dangerous_accept_invalid_certs(config.insecure_tls)
                .build()
                .map_err(|e| Error::config(format!("invalid SMTP TLS settings: {}", e)))?;
            builder = builder.tls(Tls::Required(params));
        }
        if !config.smtp_user.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_user.clone(),
                config.smtp_pass.clone(),
            ));
        }

        Ok(Self {
            from,
            transport: builder.build(),
            plain: ctx.formatter(Markup::Plain, None),
            html: ctx.formatter(Markup::Html, None),
        })
    }

    /// Build the message for one package.
    fn build_message(&self, request: &SendRequest<'_>) -> std::result::Result<Message, SenderError> {
        let to: Mailbox = request
            .contact
            .value
            .trim()
            .parse()
            .map_err(|e| SenderError::broken(format!("invalid recipient '{}': {}", request.contact.value, e)))?;

        let subject = self
            .plain
            .subject(request.events, request.trigger, request.throttled);
        let text = self
            .plain
            .format(request.events, request.trigger, request.throttled, MAIL_MESSAGE_LIMIT);
        let html = format!(
            "<html><body><div style=\"white-space: pre-wrap; font-family: sans-serif\">{}</div></body></html>",
            self.html
                .format(request.events, request.trigger, request.throttled, MAIL_MESSAGE_LIMIT)
        );

        let mut body = MultiPart::mixed().multipart(MultiPart::alternative_plain_html(text, html));
        for (index, plot) in request.plots.iter().enumerate() {
            let content_type = ContentType::parse("image/png")
                .map_err(|e| SenderError::Failed(Error::Other(format!("invalid content type: {}", e))))?;
            body = body.singlepart(
                Attachment::new(format!("plot{}.png", index)).body(plot.clone(), content_type),
            );
        }

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .multipart(body)
            .map_err(|e| SenderError::Failed(Error::Other(format!("failed to build mail: {}", e))))
    }
}

#[async_trait]
impl Sender for MailSender {
    fn sender_type(&self) -> &'static str {
        "mail"
    }

    async fn send_events(&self, request: SendRequest<'_>) -> std::result::Result<SendReceipt, SenderError> {
        let message = self.build_message(&request)?;

        match self.transport.send(message).await {
            Ok(_) => {
                debug!(recipient = %request.contact.value, trigger_id = %request.trigger.id, "Mail notification sent");
                Ok(SendReceipt::default())
            }
            Err(e) if e.is_permanent() => Err(SenderError::broken(format!(
                "mail to {} rejected: {}",
                request.contact.value, e
            ))),
            Err(e) => {
                warn!(recipient = %request.contact.value, error = %e, "SMTP send failed");
                Err(SenderError::transport(format!("SMTP send failed: {}", e)))
            }
        }
    }
}
