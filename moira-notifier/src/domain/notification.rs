//! Units of delivery work: in-memory packages and persisted scheduled notifications.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::contact::ContactData;
use super::event::NotificationEvent;
use super::trigger::TriggerData;

/// Plot rendering hint attached to a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlottingData {
    pub enabled: bool,
    #[serde(default)]
    pub theme: String,
}

/// Everything a sender worker needs to deliver one batch of events to one contact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPackage {
    pub events: Vec<NotificationEvent>,
    pub trigger: TriggerData,
    pub contact: ContactData,
    #[serde(default)]
    pub plotting: PlottingData,
    /// Delivery attempts that already failed.
    #[serde(default)]
    pub fail_count: u32,
    #[serde(default)]
    pub throttled: bool,
    #[serde(default)]
    pub dont_resend: bool,
}

impl fmt::Display for NotificationPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "package of {} notifications to {} ({}) for trigger {}",
            self.events.len(),
            self.contact.value,
            self.contact.contact_type,
            self.trigger.id
        )
    }
}

/// A time-stamped delivery intent owned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub event: NotificationEvent,
    pub trigger: TriggerData,
    pub contact: ContactData,
    #[serde(default)]
    pub plotting: PlottingData,
    /// Number of failed sends that led to this notification.
    pub send_fail: u32,
    /// Planned delivery instant, Unix seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub throttled: bool,
}

impl ScheduledNotification {
    /// Rehydrate a single-event package for another delivery attempt.
    pub fn into_package(self) -> NotificationPackage {
        NotificationPackage {
            events: vec![self.event],
            trigger: self.trigger,
            contact: self.contact,
            plotting: self.plotting,
            fail_count: self.send_fail,
            throttled: self.throttled,
            dont_resend: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::State;

    #[test]
    fn test_scheduled_notification_into_package_keeps_fail_count() {
        let scheduled = ScheduledNotification {
            event: NotificationEvent {
                metric: "m".to_string(),
                timestamp: 10,
                state: State::Error,
                old_state: State::Ok,
                trigger_id: "t".to_string(),
                subscription_id: None,
                values: Default::default(),
                message: None,
                is_trigger_event: false,
            },
            trigger: TriggerData::default(),
            contact: ContactData::default(),
            plotting: PlottingData::default(),
            send_fail: 2,
            timestamp: 70,
            throttled: true,
        };

        let pkg = scheduled.into_package();
        assert_eq!(pkg.events.len(), 1);
        assert_eq!(pkg.fail_count, 2);
        assert!(pkg.throttled);
        assert!(!pkg.dont_resend);
    }
}
