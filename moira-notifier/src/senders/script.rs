//! External script sender.
//!
//! Runs an executable for every package. The command line may contain
//! template expressions over `contact` and `trigger`; the webhook JSON
//! document is written to the script's stdin. A non-zero exit status is a
//! failed send.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{SendReceipt, SendRequest, Sender, SenderContext, SenderError, webhook_payload};
use crate::config::UnknownOptions;
use crate::template::{TemplateService, has_template_syntax};
use crate::{Error, Result};

/// Script sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Command line: the executable path followed by its arguments.
    pub exec: String,
    #[serde(default = "default_script_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub unknown: UnknownOptions,
}

fn default_script_timeout_secs() -> u64 {
    60
}

/// Script sender.
pub struct ScriptSender {
    config: ScriptConfig,
    templates: Arc<TemplateService>,
}

impl ScriptSender {
    pub fn new(config: ScriptConfig, ctx: &SenderContext) -> Result<Self> {
        let program = config
            .exec
            .split_whitespace()
            .next()
            .ok_or_else(|| Error::config("script sender requires exec"))?;
        ctx.templates.validate(&config.exec)?;
        if !has_template_syntax(program) && !Path::new(program).exists() {
            return Err(Error::config(format!(
                "script executable '{}' does not exist",
                program
            )));
        }
        Ok(Self {
            config,
            templates: ctx.templates.clone(),
        })
    }

    fn command_line(&self, request: &SendRequest<'_>) -> Result<Vec<String>> {
        let rendered = if has_template_syntax(&self.config.exec) {
            self.templates.render(
                &self.config.exec,
                json!({ "contact": request.contact, "trigger": request.trigger }),
            )?
        } else {
            self.config.exec.clone()
        };
        let args: Vec<String> = rendered.split_whitespace().map(str::to_string).collect();
        if args.is_empty() {
            return Err(Error::validation("script command line rendered empty"));
        }
        Ok(args)
    }
}

#[async_trait]
impl Sender for ScriptSender {
    fn sender_type(&self) -> &'static str {
        "script"
    }

    async fn send_events(&self, request: SendRequest<'_>) -> std::result::Result<SendReceipt, SenderError> {
        let args = self.command_line(&request)?;
        let input = serde_json::to_vec(&webhook_payload(&request)).map_err(Error::from)?;

        let mut child = Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SenderError::transport(format!("failed to start '{}': {}", args[0], e)))?;

        // The payload write counts against the timeout too: a script that
        // never reads a payload larger than the pipe buffer blocks it.
        let stdin = child.stdin.take();
        let script = args[0].as_str();
        let exchange = async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(&input).await {
                    // Scripts may exit without reading their input.
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                    debug!(script = %script, "Script closed stdin before reading the payload");
                }
            }
            child.wait_with_output().await
        };

        let timeout = Duration::from_secs(self.config.timeout_secs.max(1));
        let output = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| SenderError::transport(format!("script '{}' timed out after {:?}", args[0], timeout)))?
            .map_err(Error::from)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(script = %args[0], status = %output.status, stderr = %stderr.trim(), "Script failed");
            return Err(SenderError::transport(format!(
                "script '{}' exited with {}: {}",
                args[0],
                output.status,
                stderr.trim()
            )));
        }

        debug!(script = %args[0], trigger_id = %request.trigger.id, "Script notification sent");
        Ok(SendReceipt::default())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::State;
    use crate::senders::fixtures::{contact, event, trigger};

    fn sender(exec: &str) -> Result<ScriptSender> {
        let config: ScriptConfig = serde_json::from_value(json!({ "exec": exec })).unwrap();
        ScriptSender::new(config, &SenderContext::default())
    }

    async fn run(sender: &ScriptSender) -> std::result::Result<SendReceipt, SenderError> {
        let events = vec![event("cpu", State::Error, State::Ok)];
        let contact = contact("my-script", "ops");
        let trigger = trigger();
        sender
            .send_events(SendRequest {
                events: &events,
                contact: &contact,
                trigger: &trigger,
                plots: &[],
                throttled: false,
            })
            .await
    }

    #[test]
    fn test_missing_executable_is_rejected() {
        assert!(matches!(
            sender("/nonexistent/notify.sh"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(sender("   "), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_command_line_is_rendered() {
        let script = sender("/bin/echo {{ contact.value }} {{ trigger.id }}").unwrap();
        let events = vec![event("cpu", State::Error, State::Ok)];
        let contact = contact("my-script", "ops");
        let trigger = trigger();
        let args = script
            .command_line(&SendRequest {
                events: &events,
                contact: &contact,
                trigger: &trigger,
                plots: &[],
                throttled: false,
            })
            .unwrap();
        assert_eq!(args, vec!["/bin/echo", "ops", "trigger-1"]);
    }

    #[tokio::test]
    async fn test_successful_script() {
        let script = sender("/bin/cat").unwrap();
        assert!(run(&script).await.is_ok());
    }

    #[tokio::test]
    async fn test_script_ignoring_stdin() {
        let script = sender("/bin/echo {{ contact.value }}").unwrap();
        assert!(run(&script).await.is_ok());
    }

    #[tokio::test]
    async fn test_unread_large_payload_times_out() {
        let config: ScriptConfig =
            serde_json::from_value(json!({ "exec": "/bin/sleep 30", "timeout_secs": 1 })).unwrap();
        let script = ScriptSender::new(config, &SenderContext::default()).unwrap();
        let mut big = event("cpu", State::Error, State::Ok);
        big.metric = "m".repeat(512 * 1024);
        let events = vec![big];
        let contact = contact("my-script", "ops");
        let trigger = trigger();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            script.send_events(SendRequest {
                events: &events,
                contact: &contact,
                trigger: &trigger,
                plots: &[],
                throttled: false,
            }),
        )
        .await
        .expect("script send must honour its own timeout");
        let err = result.unwrap_err();
        assert!(!err.is_broken_contact());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_failing_script_is_retryable() {
        let script = sender("/bin/sh -c false").unwrap();
        let err = run(&script).await.unwrap_err();
        assert!(!err.is_broken_contact());
    }
}
