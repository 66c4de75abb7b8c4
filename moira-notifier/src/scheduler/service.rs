//! Scheduler service: turns events into scheduled notifications.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{Level, warn};

use super::{calendar, throttle};
use crate::domain::{
    ContactData, NotificationEvent, PlottingData, ScheduledNotification, SubscriptionData,
    TriggerData,
};
use crate::logging::{LevelOverrides, event_at};
use crate::metrics::NotifierMetrics;
use crate::store::NotifierStore;
use crate::{Error, Result};

/// Delay applied to every resend attempt.
pub const RESEND_DELAY_SECS: i64 = 60;

/// Everything needed to schedule one event for one contact.
#[derive(Debug, Clone)]
pub struct ScheduleParams {
    pub event: NotificationEvent,
    pub trigger: TriggerData,
    pub contact: ContactData,
    pub plotting: PlottingData,
    /// Throttling decision of the previous attempt.
    pub throttled_old: bool,
    /// Failed sends so far, including the one being rescheduled.
    pub send_fail: u32,
}

/// Computes delivery instants from throttling state and subscription calendars.
pub struct Scheduler {
    store: Arc<dyn NotifierStore>,
    metrics: Arc<NotifierMetrics>,
    overrides: Arc<LevelOverrides>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn NotifierStore>,
        metrics: Arc<NotifierMetrics>,
        overrides: Arc<LevelOverrides>,
    ) -> Self {
        Self {
            store,
            metrics,
            overrides,
        }
    }

    /// Stamp an event with its delivery instant.
    ///
    /// Resends go out one minute from now with the previous throttling flag,
    /// test events go out now, everything else is left to [`Self::next_delivery`].
    /// Persisting the result is the caller's job.
    pub async fn schedule_notification(
        &self,
        now: DateTime<Utc>,
        params: ScheduleParams,
    ) -> ScheduledNotification {
        let (timestamp, throttled) = if params.send_fail > 0 {
            (now.timestamp() + RESEND_DELAY_SECS, params.throttled_old)
        } else if params.event.state.is_test() {
            (now.timestamp(), false)
        } else {
            self.next_delivery(now, &params.event).await
        };

        let level = self.overrides.level_or(
            Some(&params.contact.id),
            params.event.subscription_id.as_deref(),
            Level::DEBUG,
        );
        event_at!(
            level,
            trigger_id = %params.event.trigger_id,
            contact_id = %params.contact.id,
            contact_type = %params.contact.contact_type,
            send_fail = params.send_fail,
            timestamp,
            throttled,
            "Scheduled notification"
        );

        ScheduledNotification {
            event: params.event,
            trigger: params.trigger,
            contact: params.contact,
            plotting: params.plotting,
            send_fail: params.send_fail,
            timestamp,
            throttled,
        }
    }

    /// Earliest allowed delivery for an event and whether it is throttled.
    ///
    /// Never fails: store and subscription problems degrade to delivering at
    /// `now` with the current throttling flag, schedule problems to keeping
    /// the throttling instant.
    pub async fn next_delivery(
        &self,
        now: DateTime<Utc>,
        event: &NotificationEvent,
    ) -> (i64, bool) {
        let now = now.timestamp();
        if event.state.is_test() {
            return (now, false);
        }

        let record = match self.store.get_trigger_throttling(&event.trigger_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(trigger_id = %event.trigger_id, error = %e, "Failed to read trigger throttling");
                Default::default()
            }
        };
        let (mut next, mut throttled) = if record.next > now {
            (record.next, true)
        } else {
            (now, false)
        };

        let subscription = match self.resolve_subscription(event).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.metrics.record_subs_malformed();
                warn!(trigger_id = %event.trigger_id, error = %e, "Failed to get subscription");
                return (now, throttled);
            }
        };

        let level = self
            .overrides
            .level_or(None, Some(&subscription.id), Level::DEBUG);

        if subscription.throttling_enabled {
            if next > now {
                event_at!(
                    level,
                    trigger_id = %event.trigger_id,
                    subscription_id = %subscription.id,
                    next,
                    "Using existing throttling"
                );
            } else {
                match throttle::evaluate_levels(
                    self.store.as_ref(),
                    &event.trigger_id,
                    now,
                    record.beginning,
                )
                .await
                {
                    Ok(decision) => {
                        next = decision.next;
                        throttled |= decision.throttled;
                    }
                    Err(e) => {
                        warn!(trigger_id = %event.trigger_id, error = %e, "Failed to evaluate throttling");
                    }
                }
            }
        } else {
            next = now;
        }

        if throttled {
            self.metrics.record_event_throttled();
        }

        match calendar::next_allowed(&subscription.schedule, next) {
            Ok(aligned) => {
                if aligned != next {
                    event_at!(
                        level,
                        subscription_id = %subscription.id,
                        from = next,
                        to = aligned,
                        "Delivery moved to the next schedule window"
                    );
                }
                (aligned, throttled)
            }
            Err(e) => {
                warn!(subscription_id = %subscription.id, error = %e, "Failed to apply subscription schedule");
                (next, throttled)
            }
        }
    }

    /// The subscription an event was raised for.
    async fn resolve_subscription(&self, event: &NotificationEvent) -> Result<SubscriptionData> {
        let subscription_id = match event.subscription_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => {
                return Err(Error::MalformedSubscription {
                    subscription_id: String::new(),
                    reason: "event carries no subscription".to_string(),
                });
            }
        };
        self.store
            .get_subscription(subscription_id)
            .await
            .map_err(|e| Error::MalformedSubscription {
                subscription_id: subscription_id.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use mockall::predicate::eq;

    use super::*;
    use crate::domain::{ScheduleData, State};
    use crate::store::{InMemoryStore, MockNotifierStore, ThrottlingRecord};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 9, 1, 22, 0, 0).unwrap()
    }

    fn event(state: State) -> NotificationEvent {
        NotificationEvent {
            metric: "servers.web01.cpu".to_string(),
            timestamp: now().timestamp(),
            state,
            old_state: State::Ok,
            trigger_id: "trigger-1".to_string(),
            subscription_id: Some("sub-1".to_string()),
            values: Default::default(),
            message: None,
            is_trigger_event: false,
        }
    }

    fn params(state: State, send_fail: u32, throttled_old: bool) -> ScheduleParams {
        ScheduleParams {
            event: event(state),
            trigger: TriggerData::default(),
            contact: ContactData {
                id: "c1".to_string(),
                contact_type: "telegram".to_string(),
                value: "@ops".to_string(),
                ..Default::default()
            },
            plotting: PlottingData::default(),
            throttled_old,
            send_fail,
        }
    }

    fn subscription(throttling: bool, schedule: ScheduleData) -> SubscriptionData {
        SubscriptionData {
            id: "sub-1".to_string(),
            throttling_enabled: throttling,
            schedule,
            ..Default::default()
        }
    }

    fn scheduler(store: Arc<dyn NotifierStore>) -> (Scheduler, Arc<NotifierMetrics>) {
        let metrics = Arc::new(NotifierMetrics::new());
        (
            Scheduler::new(store, metrics.clone(), Arc::new(LevelOverrides::default())),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_event_fast_path_ignores_throttling() {
        let store = Arc::new(InMemoryStore::new());
        store.set_throttling_record(
            "trigger-1",
            ThrottlingRecord {
                next: now().timestamp() + 600,
                beginning: now().timestamp() - 600,
            },
        );
        store.insert_subscription(subscription(true, ScheduleData::always()));
        let (scheduler, _) = scheduler(store);

        let scheduled = scheduler
            .schedule_notification(now(), params(State::Test, 0, true))
            .await;
        assert_eq!(scheduled.timestamp, now().timestamp());
        assert!(!scheduled.throttled);
    }

    #[tokio::test]
    async fn test_resend_preserves_throttle_flag() {
        // Resends never touch the store
        let store = Arc::new(MockNotifierStore::new());
        let (scheduler, _) = scheduler(store);

        let scheduled = scheduler
            .schedule_notification(now(), params(State::Error, 3, true))
            .await;
        assert_eq!(scheduled.timestamp, now().timestamp() + 60);
        assert!(scheduled.throttled);
        assert_eq!(scheduled.send_fail, 3);
    }

    #[tokio::test]
    async fn test_schedule_crossing_midnight() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_subscription(subscription(
            false,
            ScheduleData::weekly([true; 7], 120, 0, -180),
        ));
        let (scheduler, _) = scheduler(store);

        let (next, throttled) = scheduler.next_delivery(now(), &event(State::Warn)).await;
        assert_eq!(next, 1441148400);
        assert!(!throttled);
    }

    #[tokio::test]
    async fn test_first_throttling_level_tripped() {
        let now_ts = now().timestamp();
        let mut store = MockNotifierStore::new();
        store
            .expect_get_trigger_throttling()
            .returning(|_| Ok(ThrottlingRecord::default()));
        store
            .expect_get_subscription()
            .returning(|_| Ok(subscription(true, ScheduleData::always())));
        store
            .expect_get_notification_event_count()
            .returning(|_, _| Ok(20));
        store
            .expect_set_trigger_throttling()
            .with(eq("trigger-1"), eq(now_ts + 3600))
            .times(1)
            .returning(|_, _| Ok(()));
        let (scheduler, metrics) = scheduler(Arc::new(store));

        let (next, throttled) = scheduler.next_delivery(now(), &event(State::Error)).await;
        assert_eq!(next, now_ts + 3600);
        assert!(throttled);
        assert_eq!(metrics.events_throttled(), 1);
    }

    #[tokio::test]
    async fn test_active_throttling_is_kept() {
        let now_ts = now().timestamp();
        let store = Arc::new(InMemoryStore::new());
        store.set_throttling_record(
            "trigger-1",
            ThrottlingRecord {
                next: now_ts + 900,
                beginning: now_ts - 900,
            },
        );
        store.insert_subscription(subscription(true, ScheduleData::always()));
        let (scheduler, _) = scheduler(store.clone());

        let (next, throttled) = scheduler.next_delivery(now(), &event(State::Error)).await;
        assert_eq!(next, now_ts + 900);
        assert!(throttled);
        assert_eq!(store.get_trigger_throttling("trigger-1").await.unwrap().next, now_ts + 900);
    }

    #[tokio::test]
    async fn test_throttling_disabled_delivers_now() {
        let now_ts = now().timestamp();
        let store = Arc::new(InMemoryStore::new());
        for i in 0..30 {
            let mut ev = event(State::Error);
            ev.timestamp = now_ts - i * 60;
            store.push_notification_event(ev);
        }
        store.insert_subscription(subscription(false, ScheduleData::always()));
        let (scheduler, _) = scheduler(store);

        let (next, throttled) = scheduler.next_delivery(now(), &event(State::Error)).await;
        assert_eq!(next, now_ts);
        assert!(!throttled);
    }

    #[tokio::test]
    async fn test_missing_subscription_counts_malformed() {
        let mut store = MockNotifierStore::new();
        store
            .expect_get_trigger_throttling()
            .returning(|_| Ok(ThrottlingRecord::default()));
        store
            .expect_get_subscription()
            .returning(|id| Err(Error::not_found("Subscription", id)));
        let (scheduler, metrics) = scheduler(Arc::new(store));

        let (next, throttled) = scheduler.next_delivery(now(), &event(State::Error)).await;
        assert_eq!(next, now().timestamp());
        assert!(!throttled);
        assert_eq!(metrics.subs_malformed(), 1);
    }

    #[tokio::test]
    async fn test_event_without_subscription_is_malformed() {
        let mut store = MockNotifierStore::new();
        store
            .expect_get_trigger_throttling()
            .returning(|_| Ok(ThrottlingRecord::default()));
        store.expect_get_subscription().never();
        let (scheduler, metrics) = scheduler(Arc::new(store));

        let mut orphan = event(State::Error);
        orphan.subscription_id = None;
        assert!(matches!(
            scheduler.resolve_subscription(&orphan).await,
            Err(Error::MalformedSubscription { .. })
        ));

        let (next, _) = scheduler.next_delivery(now(), &orphan).await;
        assert_eq!(next, now().timestamp());
        assert_eq!(metrics.subs_malformed(), 1);
    }

    #[tokio::test]
    async fn test_broken_schedule_keeps_candidate() {
        let mut schedule = ScheduleData::always();
        schedule.days.pop();
        let store = Arc::new(InMemoryStore::new());
        store.insert_subscription(subscription(false, schedule));
        let (scheduler, _) = scheduler(store);

        let (next, _) = scheduler.next_delivery(now(), &event(State::Error)).await;
        assert_eq!(next, now().timestamp());
    }
}
