//! Notifier configuration.
//!
//! Configuration is a JSON document. Every field has a documented default so
//! an empty object `{}` is a valid (if sender-less) configuration.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::logging::DEFAULT_LOG_FILTER;
use crate::{Error, Result};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "MOIRA_NOTIFIER_CONFIG";

/// Sender type whose ident is taken from its `name`.
pub const SCRIPT_SENDER_TYPE: &str = "script";

/// Top-level notifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// When false the daemon accepts packages but drops them.
    pub enabled: bool,
    /// Bounded wait to put a package onto a sender queue.
    pub sending_timeout_secs: u64,
    /// How long failed notifications keep being rescheduled.
    pub resending_timeout_secs: u64,
    pub senders: Vec<SenderSettings>,
    /// Base URL of the web UI, used to link trigger names.
    pub front_url: String,
    /// IANA time zone used to render event times.
    pub timezone: String,
    /// `strftime` pattern for event times.
    pub date_time_format: String,
    /// Packages dispatched together before waiting for all of them to be queued.
    pub read_batch_size: usize,
    /// Failed attempts after which a contact is reported unavailable.
    pub max_fail_attempt_to_send_available: u32,
    /// Contact id to log level for package-scoped log lines.
    pub log_contacts_to_level: HashMap<String, String>,
    /// Subscription id to log level for scheduling log lines.
    pub log_subscriptions_to_level: HashMap<String, String>,
    /// Alive watcher period.
    pub check_notifier_state_timeout_secs: u64,
    /// Capacity of each sender queue.
    pub sender_queue_capacity: usize,
    /// Attempts to commit one rescheduled notification.
    pub store_retry_attempts: u32,
    pub store_retry_delay_ms: u64,
    pub logging: LoggingSettings,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sending_timeout_secs: 20,
            resending_timeout_secs: 24 * 60 * 60,
            senders: Vec::new(),
            front_url: String::new(),
            timezone: "UTC".to_string(),
            date_time_format: crate::domain::DEFAULT_TIME_FORMAT.to_string(),
            read_batch_size: 100,
            max_fail_attempt_to_send_available: 3,
            log_contacts_to_level: HashMap::new(),
            log_subscriptions_to_level: HashMap::new(),
            check_notifier_state_timeout_secs: 10,
            sender_queue_capacity: 64,
            store_retry_attempts: 3,
            store_retry_delay_ms: 200,
            logging: LoggingSettings::default(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive. `RUST_LOG` takes precedence when set.
    pub filter: String,
    /// Directory for daily-rolling log files; console only when unset.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            directory: None,
        }
    }
}

impl NotifierConfig {
    /// Parse a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::config(format!("invalid notifier configuration: {}", e)))
    }

    /// Read and parse a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Load the configuration named by `MOIRA_NOTIFIER_CONFIG`, or the defaults.
    ///
    /// A `.env` file in the working directory is honored.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                debug!(path = %path, "Loading notifier configuration");
                Self::from_file(path.trim())?
            }
            _ => {
                debug!("No configuration file set, using defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the notifier cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sending_timeout_secs == 0 {
            return Err(Error::config("sending_timeout_secs must be positive"));
        }
        if self.resending_timeout_secs == 0 {
            return Err(Error::config("resending_timeout_secs must be positive"));
        }
        if self.check_notifier_state_timeout_secs == 0 {
            return Err(Error::config(
                "check_notifier_state_timeout_secs must be positive",
            ));
        }
        if self.sender_queue_capacity == 0 {
            return Err(Error::config("sender_queue_capacity must be positive"));
        }
        if self.read_batch_size == 0 {
            return Err(Error::config("read_batch_size must be positive"));
        }
        self.location()?;

        let mut idents = HashSet::new();
        for settings in &self.senders {
            let ident = settings.ident()?;
            if !idents.insert(ident.to_string()) {
                return Err(Error::config(format!("duplicate sender '{}'", ident)));
            }
        }
        Ok(())
    }

    pub fn sending_timeout(&self) -> Duration {
        Duration::from_secs(self.sending_timeout_secs)
    }

    pub fn resending_timeout(&self) -> Duration {
        Duration::from_secs(self.resending_timeout_secs)
    }

    pub fn check_notifier_state_timeout(&self) -> Duration {
        Duration::from_secs(self.check_notifier_state_timeout_secs)
    }

    pub fn store_retry_delay(&self) -> Duration {
        Duration::from_millis(self.store_retry_delay_ms)
    }

    /// The configured time zone.
    pub fn location(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| Error::config(format!("unknown time zone '{}'", self.timezone)))
    }
}

/// Settings of one sender: a `type`, an optional `name` and adapter options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenderSettings {
    #[serde(rename = "type")]
    pub sender_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Adapter-specific options.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl SenderSettings {
    pub fn new(sender_type: impl Into<String>) -> Self {
        Self {
            sender_type: sender_type.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// The key contacts use to reach this sender.
    ///
    /// Script senders are identified by their `name` so several can coexist;
    /// every other sender by its `type`.
    pub fn ident(&self) -> Result<&str> {
        if self.sender_type.trim().is_empty() {
            return Err(Error::config("sender settings without a type"));
        }
        if self.sender_type == SCRIPT_SENDER_TYPE {
            return self
                .name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| Error::config("script sender requires a name"));
        }
        Ok(&self.sender_type)
    }

    /// Decode the adapter options into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.options.clone())).map_err(|e| {
            Error::config(format!(
                "invalid settings for sender '{}': {}",
                self.name.as_deref().unwrap_or(&self.sender_type),
                e
            ))
        })
    }
}

/// Options a typed sender record did not recognize.
pub type UnknownOptions = BTreeMap<String, Value>;

/// Delivery confirmation settings of the webhook sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryCheckConfig {
    pub enabled: bool,
    /// Basic auth user for check requests.
    pub user: String,
    pub password: String,
    pub headers: BTreeMap<String, String>,
    /// Builds the probe URL from the send response. Sees `contact`, `trigger`
    /// and `response` (the decoded send response body).
    pub url_template: String,
    /// Maps a decoded check response (`response`) to a state literal.
    pub check_template: String,
    pub max_attempts_count: u64,
    /// Tick period of the checking worker.
    pub check_timeout_secs: u64,
    /// Delay before a probe is checked again.
    pub rescheduling_delay_secs: u64,
    pub request_timeout_secs: u64,
    pub lock_ttl_secs: u64,
}

impl Default for DeliveryCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            user: String::new(),
            password: String::new(),
            headers: BTreeMap::new(),
            url_template: String::new(),
            check_template: String::new(),
            max_attempts_count: 30,
            check_timeout_secs: 60,
            rescheduling_delay_secs: 60,
            request_timeout_secs: 30,
            lock_ttl_secs: 30,
        }
    }
}

impl DeliveryCheckConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs.max(1))
    }

    /// Validate the enabled configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.url_template.trim().is_empty() {
            return Err(Error::config("delivery check requires url_template"));
        }
        if self.check_template.trim().is_empty() {
            return Err(Error::config("delivery check requires check_template"));
        }
        if self.max_attempts_count == 0 {
            return Err(Error::config("delivery check max_attempts_count must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NotifierConfig::from_json("{}").unwrap();
        assert!(config.enabled);
        assert_eq!(config.sending_timeout(), Duration::from_secs(20));
        assert_eq!(config.resending_timeout(), Duration::from_secs(86400));
        assert_eq!(config.date_time_format, "%H:%M");
        assert_eq!(config.read_batch_size, 100);
        assert_eq!(config.max_fail_attempt_to_send_available, 3);
        assert_eq!(config.location().unwrap(), chrono_tz::UTC);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sender_settings_shape() {
        let config = NotifierConfig::from_json(
            r#"{
                "timezone": "Europe/Moscow",
                "senders": [
                    {"type": "telegram", "api_token": "123:abc"},
                    {"type": "script", "name": "pager", "exec": "/usr/bin/page"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.senders.len(), 2);
        assert_eq!(config.senders[0].ident().unwrap(), "telegram");
        assert_eq!(config.senders[0].options["api_token"], "123:abc");
        assert_eq!(config.senders[1].ident().unwrap(), "pager");
        assert!(!config.senders[1].options.contains_key("type"));
        assert_eq!(config.location().unwrap(), chrono_tz::Europe::Moscow);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = NotifierConfig {
            sending_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = NotifierConfig {
            timezone: "Mars/Olympus".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = NotifierConfig {
            read_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = NotifierConfig {
            senders: vec![SenderSettings::new("slack"), SenderSettings::new("slack")],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate sender 'slack'"));
    }

    #[test]
    fn test_script_sender_requires_name() {
        assert!(SenderSettings::new("script").ident().is_err());
        assert_eq!(
            SenderSettings::new("script").with_name("a").ident().unwrap(),
            "a"
        );
        assert!(SenderSettings::new("").ident().is_err());
    }

    #[test]
    fn test_delivery_check_validation() {
        let mut check = DeliveryCheckConfig::default();
        assert!(check.validate().is_ok());

        check.enabled = true;
        assert!(check.validate().is_err());

        check.url_template = "https://hooks.example.com/{{ response.id }}".to_string();
        check.check_template = "{{ response.status }}".to_string();
        assert!(check.validate().is_ok());
        assert_eq!(check.max_attempts_count, 30);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifier.json");
        std::fs::write(&path, r#"{"front_url": "https://moira.example.com"}"#).unwrap();

        let config = NotifierConfig::from_file(&path).unwrap();
        assert_eq!(config.front_url, "https://moira.example.com");

        assert!(NotifierConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
