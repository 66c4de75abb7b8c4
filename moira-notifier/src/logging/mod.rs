//! Logging setup with a reloadable filter and per-contact level overrides.
//!
//! This module provides:
//! - Runtime log level changes via `tracing_subscriber::reload`
//! - Optional daily-rolling log files
//! - Local timezone timestamps for logs
//! - Level overrides for chosen contacts and subscriptions

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use tracing::{Level, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::config::LoggingSettings;
use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "moira_notifier=info,reqwest=warn,lettre=warn";

/// Log file name prefix inside the log directory.
const LOG_FILE_PREFIX: &str = "moira-notifier.log";

/// Timer that uses the local timezone via chrono.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle on the installed subscriber.
pub struct LoggingHandle {
    handle: FilterHandle,
}

impl LoggingHandle {
    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Set a new filter directive (e.g. `"moira_notifier=debug"`).
    pub fn set_filter(&self, directive: &str) -> Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| Error::Other(format!("Invalid filter directive: {}", e)))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }
}

/// Initialize logging.
///
/// Console output is always installed. When `settings.directory` is set a
/// daily-rolling file is written too; keep the returned guard alive for the
/// lifetime of the process so buffered lines are flushed.
pub fn init_logging(settings: &LoggingSettings) -> Result<(Arc<LoggingHandle>, Option<WorkerGuard>)> {
    let initial_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    let (rolling, guard) = match settings.directory.as_deref() {
        Some(dir) => {
            let (writer, guard) = file_writer(dir)?;
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };
    let file_layer = rolling.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_timer(LocalTimer)
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {}", e)))?;

    Ok((
        Arc::new(LoggingHandle {
            handle: filter_handle,
        }),
        guard,
    ))
}

fn file_writer(dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Log levels forced for chosen contacts and subscriptions.
#[derive(Debug, Clone, Default)]
pub struct LevelOverrides {
    contacts: HashMap<String, Level>,
    subscriptions: HashMap<String, Level>,
}

impl LevelOverrides {
    /// Build from the configured id-to-level maps. Unparseable levels are skipped with a warning.
    pub fn new(
        contacts: &HashMap<String, String>,
        subscriptions: &HashMap<String, String>,
    ) -> Self {
        Self {
            contacts: parse_levels("contact", contacts),
            subscriptions: parse_levels("subscription", subscriptions),
        }
    }

    /// The forced level for a contact or subscription. Contacts win over subscriptions.
    pub fn level_for(&self, contact_id: Option<&str>, subscription_id: Option<&str>) -> Option<Level> {
        contact_id
            .and_then(|id| self.contacts.get(id))
            .or_else(|| subscription_id.and_then(|id| self.subscriptions.get(id)))
            .copied()
    }

    /// The forced level, or `default` when none is configured.
    pub fn level_or(
        &self,
        contact_id: Option<&str>,
        subscription_id: Option<&str>,
        default: Level,
    ) -> Level {
        self.level_for(contact_id, subscription_id).unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty() && self.subscriptions.is_empty()
    }
}

fn parse_levels(kind: &str, raw: &HashMap<String, String>) -> HashMap<String, Level> {
    raw.iter()
        .filter_map(|(id, level)| match level.trim().parse::<Level>() {
            Ok(level) => Some((id.clone(), level)),
            Err(_) => {
                warn!(id = %id, level = %level, "Ignoring unknown log level for {}", kind);
                None
            }
        })
        .collect()
}

/// Emit a tracing event at a level chosen at runtime.
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            ::tracing::Level::ERROR => ::tracing::error!($($arg)+),
            ::tracing::Level::WARN => ::tracing::warn!($($arg)+),
            ::tracing::Level::INFO => ::tracing::info!($($arg)+),
            ::tracing::Level::DEBUG => ::tracing::debug!($($arg)+),
            _ => ::tracing::trace!($($arg)+),
        }
    };
}

pub(crate) use event_at;
