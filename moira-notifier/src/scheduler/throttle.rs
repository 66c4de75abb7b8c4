//! Trigger throttling levels.

use std::time::Duration;

use tracing::debug;

use crate::Result;
use crate::store::NotifierStore;

/// One throttling rule: `threshold` events within `window` delay delivery by `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlingLevel {
    pub window: Duration,
    pub delay: Duration,
    pub threshold: i64,
}

/// Levels evaluated in order; the first one that trips wins.
pub const THROTTLING_LEVELS: [ThrottlingLevel; 2] = [
    ThrottlingLevel {
        window: Duration::from_secs(3 * 60 * 60),
        delay: Duration::from_secs(60 * 60),
        threshold: 20,
    },
    ThrottlingLevel {
        window: Duration::from_secs(60 * 60),
        delay: Duration::from_secs(30 * 60),
        threshold: 10,
    },
];

/// Outcome of evaluating the throttling levels for one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleDecision {
    /// Earliest delivery instant, Unix seconds.
    pub next: i64,
    pub throttled: bool,
}

/// Count recent events of a trigger against each level.
///
/// A tripped level pushes delivery to `now + delay` and records it as the
/// trigger's new `Next`. A count one short of a threshold only flags the
/// decision as throttled so the message carries the throttling notice.
pub async fn evaluate_levels(
    store: &dyn NotifierStore,
    trigger_id: &str,
    now: i64,
    beginning: i64,
) -> Result<ThrottleDecision> {
    let mut decision = ThrottleDecision {
        next: now,
        throttled: false,
    };

    for level in &THROTTLING_LEVELS {
        let from = (now - level.window.as_secs() as i64).max(beginning);
        let count = store.get_notification_event_count(trigger_id, from).await?;

        if count >= level.threshold {
            decision.next = now + level.delay.as_secs() as i64;
            decision.throttled = true;
            store.set_trigger_throttling(trigger_id, decision.next).await?;
            debug!(
                trigger_id = %trigger_id,
                count,
                threshold = level.threshold,
                next = decision.next,
                "Trigger throttled"
            );
            break;
        }
        if count == level.threshold - 1 {
            decision.throttled = true;
        }
    }

    Ok(decision)
}
