//! Subscriptions and their delivery calendars.

use serde::{Deserialize, Serialize};

/// Number of minutes in a day.
pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// Binds trigger tags to contacts under a delivery calendar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionData {
    pub id: String,
    #[serde(default)]
    pub contacts: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "throttling", default)]
    pub throttling_enabled: bool,
    #[serde(rename = "sched", default)]
    pub schedule: ScheduleData,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(rename = "team_id", default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
}

fn default_true() -> bool {
    true
}

/// One weekday of a schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDay {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Delivery window of a subscription.
///
/// `days` holds either nothing (always allowed) or seven entries starting with
/// Monday. Offsets are minutes from local midnight; an `end_offset` smaller
/// than `start_offset` means the window runs past midnight.
/// `timezone_offset` is the number of minutes to add to local time to get UTC,
/// so GMT+3 is `-180`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleData {
    #[serde(default)]
    pub days: Vec<ScheduleDay>,
    #[serde(rename = "startOffset", default)]
    pub start_offset: i64,
    #[serde(rename = "endOffset", default)]
    pub end_offset: i64,
    #[serde(rename = "tzOffset", default)]
    pub timezone_offset: i64,
}

const WEEKDAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

impl ScheduleData {
    /// A schedule allowing delivery at any minute of every day, in UTC.
    pub fn always() -> Self {
        Self::weekly([true; 7], 0, MINUTES_PER_DAY, 0)
    }

    /// Build a seven-day schedule from per-weekday flags (Monday first).
    pub fn weekly(enabled: [bool; 7], start_offset: i64, end_offset: i64, timezone_offset: i64) -> Self {
        Self {
            days: enabled
                .iter()
                .zip(WEEKDAY_NAMES)
                .map(|(enabled, name)| ScheduleDay {
                    enabled: *enabled,
                    name: Some(name.to_string()),
                })
                .collect(),
            start_offset,
            end_offset,
            timezone_offset,
        }
    }

    /// Whether the window wraps past local midnight.
    pub fn crosses_midnight(&self) -> bool {
        self.end_offset < self.start_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekly_schedule_names_days_from_monday() {
        let schedule = ScheduleData::weekly([true, false, true, true, true, true, false], 60, 120, 0);
        assert_eq!(schedule.days.len(), 7);
        assert_eq!(schedule.days[0].name.as_deref(), Some("Mon"));
        assert!(!schedule.days[1].enabled);
        assert!(!schedule.days[6].enabled);
        assert!(!schedule.crosses_midnight());
    }

    #[test]
    fn test_subscription_json_shape() {
        let json = r#"{
            "id": "sub-1",
            "contacts": ["c1"],
            "tags": ["prod"],
            "throttling": true,
            "sched": {"days": [], "startOffset": 120, "endOffset": 0, "tzOffset": -180}
        }"#;
        let sub: SubscriptionData = serde_json::from_str(json).unwrap();
        assert!(sub.throttling_enabled);
        assert!(sub.enabled);
        assert!(sub.schedule.crosses_midnight());
        assert_eq!(sub.schedule.timezone_offset, -180);
    }
}
