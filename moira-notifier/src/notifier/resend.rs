//! Rescheduling of packages that could not be delivered.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use tracing::{Level, debug, error};

use super::NotifierCore;
use crate::domain::{NotificationPackage, ScheduledNotification};
use crate::logging::event_at;
use crate::scheduler::ScheduleParams;
use crate::{Error, Result};

/// Why a package goes back to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResendReason {
    /// No sender is registered for the contact type.
    UnknownContactType,
    /// The sender queue stayed full for the whole sending timeout.
    Timeout,
    /// The sender queue was closed while queueing.
    SenderStopped,
    /// The sender reported a retryable failure.
    SendFailed(String),
}

impl fmt::Display for ResendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownContactType => write!(f, "unknown contact type"),
            Self::Timeout => write!(f, "timeout"),
            Self::SenderStopped => write!(f, "sender stopped"),
            Self::SendFailed(reason) => write!(f, "{}", reason),
        }
    }
}

impl NotifierCore {
    /// Reschedule every event of a failed package one minute from now.
    ///
    /// Packages past the resending timeout are dropped.
    pub(crate) async fn resend(&self, pkg: NotificationPackage, reason: ResendReason) {
        if pkg.dont_resend {
            return;
        }

        self.metrics.record_sending_failed();
        // Worker failures were already counted against the sender.
        if matches!(reason, ResendReason::Timeout | ResendReason::SenderStopped) {
            self.metrics.record_send_failed(&pkg.contact.contact_type);
        }

        let level = self.package_level(&pkg, Level::WARN);
        event_at!(
            level,
            contact_id = %pkg.contact.id,
            contact_type = %pkg.contact.contact_type,
            trigger_id = %pkg.trigger.id,
            fail_count = pkg.fail_count,
            reason = %reason,
            "Cannot send {}, rescheduling",
            pkg
        );

        let elapsed = Duration::from_secs(60 * u64::from(pkg.fail_count));
        if elapsed > self.config.resending_timeout() {
            error!(
                contact_id = %pkg.contact.id,
                trigger_id = %pkg.trigger.id,
                fail_count = pkg.fail_count,
                "Stop resending; notification interval timed out"
            );
            return;
        }

        if pkg.fail_count == self.config.max_fail_attempt_to_send_available {
            self.metrics.record_contact_unavailable();
            error!(
                contact_id = %pkg.contact.id,
                contact_type = %pkg.contact.contact_type,
                contact_value = %pkg.contact.value,
                fail_count = pkg.fail_count,
                "Contact is unavailable after {} failed attempts",
                pkg.fail_count
            );
        }

        let now = Utc::now();
        for event in &pkg.events {
            let notification = self
                .scheduler
                .schedule_notification(
                    now,
                    ScheduleParams {
                        event: event.clone(),
                        trigger: pkg.trigger.clone(),
                        contact: pkg.contact.clone(),
                        plotting: pkg.plotting.clone(),
                        throttled_old: pkg.throttled,
                        send_fail: pkg.fail_count + 1,
                    },
                )
                .await;

            if let Err(e) = self.store_notification(&notification).await {
                error!(
                    contact_id = %pkg.contact.id,
                    trigger_id = %pkg.trigger.id,
                    error = %e,
                    "Failed to store rescheduled notification, it is lost"
                );
            }
        }
    }

    /// Persist a notification, retrying within the configured budget.
    async fn store_notification(&self, notification: &ScheduledNotification) -> Result<()> {
        let attempts = self.config.store_retry_attempts.max(1);
        let mut last_error = Error::store("no store attempt made");

        for attempt in 1..=attempts {
            match self.store.add_notification(notification).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(attempt, attempts, error = %e, "Storing notification failed");
                    last_error = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.store_retry_delay()).await;
            }
        }

        Err(last_error)
    }
}
