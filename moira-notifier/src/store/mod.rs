//! Store contract consumed by the dispatch core.
//!
//! The datastore itself lives outside this crate. The core only relies on a
//! key/value + sorted-set view of it, expressed by [`NotifierStore`], and on
//! cluster-wide leases expressed by [`NotifierLock`].

pub mod memory;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{ContactData, NotifierState, ScheduledNotification, SubscriptionData};
use crate::{Error, Result};

pub use memory::InMemoryStore;

/// Throttling bookkeeping for one trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottlingRecord {
    /// Earliest allowed delivery, Unix seconds.
    pub next: i64,
    /// When throttling first engaged, Unix seconds.
    pub beginning: i64,
}

/// One end of a sorted-set score range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBound {
    NegInf,
    PosInf,
    /// Inclusive Unix-seconds bound.
    Value(i64),
}

impl ScoreBound {
    /// Whether `score` is at or above this lower bound.
    pub fn admits_from(self, score: i64) -> bool {
        match self {
            Self::NegInf => true,
            Self::PosInf => false,
            Self::Value(v) => score >= v,
        }
    }

    /// Whether `score` is at or below this upper bound.
    pub fn admits_to(self, score: i64) -> bool {
        match self {
            Self::NegInf => false,
            Self::PosInf => true,
            Self::Value(v) => score <= v,
        }
    }
}

impl fmt::Display for ScoreBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegInf => f.write_str("-inf"),
            Self::PosInf => f.write_str("+inf"),
            Self::Value(v) => write!(f, "{v}"),
        }
    }
}

impl FromStr for ScoreBound {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "-inf" => Ok(Self::NegInf),
            "+inf" | "inf" => Ok(Self::PosInf),
            other => other
                .parse::<i64>()
                .map(Self::Value)
                .map_err(|_| Error::validation(format!("invalid score bound '{other}'"))),
        }
    }
}

/// A held cluster-wide lease.
///
/// `lost` fires when the lease expires or is taken over before it is released.
#[derive(Debug, Clone)]
pub struct Lease {
    pub lost: CancellationToken,
}

/// A cluster-wide mutual exclusion lock with TTL.
#[async_trait]
pub trait NotifierLock: Send + Sync {
    /// Wait until the lock is held or `stop` fires.
    ///
    /// Returns an error if `stop` fires first.
    async fn acquire(&self, stop: CancellationToken) -> Result<Lease>;

    /// Give the lock up. Releasing a lock that is not held is a no-op.
    async fn release(&self);
}

/// Persistence operations the dispatch core needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotifierStore: Send + Sync {
    /// Throttling state for a trigger; a default record when none exists.
    async fn get_trigger_throttling(&self, trigger_id: &str) -> Result<ThrottlingRecord>;

    /// Record the earliest allowed delivery for a trigger.
    ///
    /// The beginning of throttling is set when none is recorded yet.
    async fn set_trigger_throttling(&self, trigger_id: &str, next: i64) -> Result<()>;

    /// Fails with [`Error::NotFound`] when missing.
    async fn get_subscription(&self, subscription_id: &str) -> Result<SubscriptionData>;

    /// Fails with [`Error::NotFound`] when missing.
    async fn get_contact(&self, contact_id: &str) -> Result<ContactData>;

    /// Number of notification events for a trigger with timestamp `>= from`.
    async fn get_notification_event_count(&self, trigger_id: &str, from: i64) -> Result<i64>;

    async fn add_notification(&self, notification: &ScheduledNotification) -> Result<()>;

    async fn get_notifier_state(&self) -> Result<NotifierState>;

    async fn set_notifier_state(&self, actor: &str, state: NotifierState) -> Result<()>;

    /// Add a probe payload to the sorted set of `contact_type`, scored by `timestamp`.
    async fn add_delivery_checks_data(
        &self,
        contact_type: &str,
        timestamp: i64,
        payload: &str,
    ) -> Result<()>;

    /// Payloads scored within `[from, to]`, in score order. Missing sets yield nothing.
    async fn get_delivery_checks_data(
        &self,
        contact_type: &str,
        from: ScoreBound,
        to: ScoreBound,
    ) -> Result<Vec<String>>;

    /// Remove payloads scored within `[from, to]` in one step. Returns how many were removed.
    async fn remove_delivery_checks_data(
        &self,
        contact_type: &str,
        from: ScoreBound,
        to: ScoreBound,
    ) -> Result<u64>;

    /// Remove exactly these payloads in one step. Members added since they
    /// were read stay put. Returns how many were removed.
    async fn remove_delivery_checks_members(&self, contact_type: &str, payloads: &[String]) -> Result<u64>;

    /// A lock keyed by `key` whose lease lasts `ttl` unless refreshed.
    fn new_lock(&self, key: &str, ttl: Duration) -> Arc<dyn NotifierLock>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bound_tokens() {
        assert_eq!("-inf".parse::<ScoreBound>().unwrap(), ScoreBound::NegInf);
        assert_eq!("+inf".parse::<ScoreBound>().unwrap(), ScoreBound::PosInf);
        assert_eq!("1441148400".parse::<ScoreBound>().unwrap(), ScoreBound::Value(1441148400));
        assert!("tomorrow".parse::<ScoreBound>().is_err());
        assert_eq!(ScoreBound::Value(5).to_string(), "5");
        assert_eq!(ScoreBound::NegInf.to_string(), "-inf");
    }

    #[test]
    fn test_score_bound_ranges() {
        assert!(ScoreBound::NegInf.admits_from(i64::MIN));
        assert!(ScoreBound::Value(10).admits_from(10));
        assert!(!ScoreBound::Value(10).admits_from(9));
        assert!(ScoreBound::Value(10).admits_to(10));
        assert!(!ScoreBound::Value(10).admits_to(11));
        assert!(ScoreBound::PosInf.admits_to(i64::MAX));
    }
}
