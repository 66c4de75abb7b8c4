//! Notification events: single state transitions observed for a metric.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::state::State;

/// Default `strftime` pattern used for event timestamps in messages.
pub const DEFAULT_TIME_FORMAT: &str = "%H:%M";

/// A single state transition of one metric (or of the whole trigger).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Metric name. Empty for trigger-level events.
    #[serde(default)]
    pub metric: String,
    /// Unix seconds of the transition.
    pub timestamp: i64,
    pub state: State,
    pub old_state: State,
    pub trigger_id: String,
    #[serde(rename = "sub_id", default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    /// Target values keyed by target name (`t1`, `t2`, ...). Ordered for stable output.
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    /// Optional user annotation.
    #[serde(rename = "msg", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "trigger_event", default)]
    pub is_trigger_event: bool,
}

/// Rendering rules for metric values, shared with the web UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueFormat {
    /// Maximum digits after the decimal point; trailing zeros are dropped.
    pub max_fraction_digits: usize,
}

/// The formatting agreed with the UI for notification texts.
pub const DEFAULT_VALUE_FORMAT: ValueFormat = ValueFormat {
    max_fraction_digits: 4,
};

impl Default for ValueFormat {
    fn default() -> Self {
        DEFAULT_VALUE_FORMAT
    }
}

impl ValueFormat {
    /// Format a single value.
    pub fn format(&self, value: f64) -> String {
        if !value.is_finite() {
            return value.to_string();
        }
        if value.fract() == 0.0 && value.abs() < 1e15 {
            return format!("{}", value as i64);
        }
        let text = format!("{:.*}", self.max_fraction_digits, value);
        let trimmed = text.trim_end_matches('0').trim_end_matches('.');
        if trimmed == "-0" {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

impl NotificationEvent {
    /// Render the metric values.
    ///
    /// A single value is rendered bare; several values become `t1: 1, t2: 2`
    /// in key order. No values render as an empty string.
    pub fn metric_values(&self, format: &ValueFormat) -> String {
        if self.values.len() == 1 {
            return self
                .values
                .values()
                .next()
                .map(|v| format.format(*v))
                .unwrap_or_default();
        }
        self.values
            .iter()
            .map(|(name, value)| format!("{}: {}", name, format.format(*value)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Render the event timestamp in the given zone, followed by its GMT offset.
    pub fn format_timestamp<Tz: TimeZone>(&self, tz: &Tz, format: &str) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        let utc = DateTime::<Utc>::from_timestamp(self.timestamp, 0).unwrap_or_default();
        let local = utc.with_timezone(tz);
        format!("{} (GMT{})", local.format(format), local.format("%:z"))
    }

    /// The user annotation, if any and non-blank.
    pub fn annotation(&self) -> Option<&str> {
        self.message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    /// The name to show for this event: the metric, or the trigger marker for trigger events.
    pub fn display_metric(&self) -> &str {
        if self.is_trigger_event && self.metric.is_empty() {
            "[trigger]"
        } else {
            &self.metric
        }
    }
}

/// State of the last event in the batch, `NODATA` when empty.
pub fn last_state(events: &[NotificationEvent]) -> State {
    events.last().map(|e| e.state).unwrap_or(State::Nodata)
}

/// The most severe state across the batch.
pub fn subject_state(events: &[NotificationEvent]) -> State {
    events
        .iter()
        .map(|e| e.state)
        .max_by_key(|s| s.priority())
        .unwrap_or(State::Nodata)
}

/// The state a notification headline should show.
///
/// Throttled batches show the latest state, otherwise the most severe one.
pub fn current_state(events: &[NotificationEvent], throttled: bool) -> State {
    if throttled {
        last_state(events)
    } else {
        subject_state(events)
    }
}
