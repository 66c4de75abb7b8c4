//! In-memory store used by the daemon binary and by tests.
//!
//! Sorted sets follow the usual semantics: a member is identified by its
//! payload text, and adding an existing member only moves its score.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Lease, NotifierLock, NotifierStore, ScoreBound, ThrottlingRecord};
use crate::domain::{
    ContactData, NotificationEvent, NotifierState, ScheduledNotification, SubscriptionData,
};
use crate::{Error, Result};

/// Poll interval while waiting for a busy lock.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn add(&mut self, score: i64, member: &str) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn range(&self, from: ScoreBound, to: ScoreBound) -> Vec<(i64, String)> {
        self.ordered
            .iter()
            .filter(|(score, _)| from.admits_from(*score) && to.admits_to(*score))
            .cloned()
            .collect()
    }

    fn remove_range(&mut self, from: ScoreBound, to: ScoreBound) -> u64 {
        let doomed = self.range(from, to);
        for (score, member) in &doomed {
            self.ordered.remove(&(*score, member.clone()));
            self.scores.remove(member);
        }
        doomed.len() as u64
    }

    fn remove_members(&mut self, members: &[String]) -> u64 {
        let mut removed = 0;
        for member in members {
            if let Some(score) = self.scores.remove(member) {
                self.ordered.remove(&(score, member.clone()));
                removed += 1;
            }
        }
        removed
    }
}

#[derive(Debug, Clone, Copy)]
struct LeaseEntry {
    owner: u64,
    expires_at: Instant,
}

type LeaseTable = Arc<DashMap<String, LeaseEntry>>;

/// A complete, process-local [`NotifierStore`].
#[derive(Default)]
pub struct InMemoryStore {
    throttling: DashMap<String, ThrottlingRecord>,
    subscriptions: DashMap<String, SubscriptionData>,
    contacts: DashMap<String, ContactData>,
    events: RwLock<Vec<NotificationEvent>>,
    scheduled: Mutex<Vec<ScheduledNotification>>,
    notifier_state: RwLock<(NotifierState, String)>,
    delivery_checks: Mutex<HashMap<String, SortedSet>>,
    leases: LeaseTable,
    next_lock_owner: Arc<AtomicU64>,
    failing_writes: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_subscription(&self, subscription: SubscriptionData) {
        self.subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    pub fn insert_contact(&self, contact: ContactData) {
        self.contacts.insert(contact.id.clone(), contact);
    }

    pub fn remove_contact(&self, contact_id: &str) {
        self.contacts.remove(contact_id);
    }

    /// Record an event as emitted by the upstream event source.
    pub fn push_notification_event(&self, event: NotificationEvent) {
        self.events.write().push(event);
    }

    /// Overwrite the throttling record of a trigger.
    pub fn set_throttling_record(&self, trigger_id: &str, record: ThrottlingRecord) {
        self.throttling.insert(trigger_id.to_string(), record);
    }

    /// Snapshot of every scheduled notification, in insertion order.
    pub fn scheduled_notifications(&self) -> Vec<ScheduledNotification> {
        self.scheduled.lock().clone()
    }

    /// Make the next `count` scheduled-notification writes fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of probes stored for a contact type.
    pub fn delivery_checks_len(&self, contact_type: &str) -> usize {
        self.delivery_checks
            .lock()
            .get(contact_type)
            .map(|set| set.scores.len())
            .unwrap_or(0)
    }

    /// Scores and payloads stored for a contact type, in score order.
    pub fn delivery_checks_snapshot(&self, contact_type: &str) -> Vec<(i64, String)> {
        self.delivery_checks
            .lock()
            .get(contact_type)
            .map(|set| set.range(ScoreBound::NegInf, ScoreBound::PosInf))
            .unwrap_or_default()
    }

    /// Drop the lease held under `key`, as if its TTL had run out.
    pub fn expire_lock(&self, key: &str) {
        self.leases.remove(key);
    }

    /// Whether anyone currently holds a live lease under `key`.
    pub fn is_locked(&self, key: &str) -> bool {
        self.leases
            .get(key)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }

    fn take_write_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl NotifierStore for InMemoryStore {
    async fn get_trigger_throttling(&self, trigger_id: &str) -> Result<ThrottlingRecord> {
        Ok(self
            .throttling
            .get(trigger_id)
            .map(|r| *r)
            .unwrap_or_default())
    }

    async fn set_trigger_throttling(&self, trigger_id: &str, next: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut entry = self.throttling.entry(trigger_id.to_string()).or_default();
        if entry.beginning == 0 {
            entry.beginning = now;
        }
        entry.next = next;
        Ok(())
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<SubscriptionData> {
        self.subscriptions
            .get(subscription_id)
            .map(|s| s.clone())
            .ok_or_else(|| Error::not_found("Subscription", subscription_id))
    }

    async fn get_contact(&self, contact_id: &str) -> Result<ContactData> {
        self.contacts
            .get(contact_id)
            .map(|c| c.clone())
            .ok_or_else(|| Error::not_found("Contact", contact_id))
    }

    async fn get_notification_event_count(&self, trigger_id: &str, from: i64) -> Result<i64> {
        let count = self
            .events
            .read()
            .iter()
            .filter(|e| e.trigger_id == trigger_id && e.timestamp >= from)
            .count();
        Ok(count as i64)
    }

    async fn add_notification(&self, notification: &ScheduledNotification) -> Result<()> {
        if self.take_write_failure() {
            return Err(Error::store("injected write failure"));
        }
        self.scheduled.lock().push(notification.clone());
        Ok(())
    }

    async fn get_notifier_state(&self) -> Result<NotifierState> {
        Ok(self.notifier_state.read().0)
    }

    async fn set_notifier_state(&self, actor: &str, state: NotifierState) -> Result<()> {
        debug!(actor = %actor, state = %state, "Notifier state updated");
        *self.notifier_state.write() = (state, actor.to_string());
        Ok(())
    }

    async fn add_delivery_checks_data(
        &self,
        contact_type: &str,
        timestamp: i64,
        payload: &str,
    ) -> Result<()> {
        self.delivery_checks
            .lock()
            .entry(contact_type.to_string())
            .or_default()
            .add(timestamp, payload);
        Ok(())
    }

    async fn get_delivery_checks_data(
        &self,
        contact_type: &str,
        from: ScoreBound,
        to: ScoreBound,
    ) -> Result<Vec<String>> {
        Ok(self
            .delivery_checks
            .lock()
            .get(contact_type)
            .map(|set| set.range(from, to).into_iter().map(|(_, m)| m).collect())
            .unwrap_or_default())
    }

    async fn remove_delivery_checks_data(
        &self,
        contact_type: &str,
        from: ScoreBound,
        to: ScoreBound,
    ) -> Result<u64> {
        Ok(self
            .delivery_checks
            .lock()
            .get_mut(contact_type)
            .map(|set| set.remove_range(from, to))
            .unwrap_or(0))
    }

    async fn remove_delivery_checks_members(&self, contact_type: &str, payloads: &[String]) -> Result<u64> {
        Ok(self
            .delivery_checks
            .lock()
            .get_mut(contact_type)
            .map(|set| set.remove_members(payloads))
            .unwrap_or(0))
    }

    fn new_lock(&self, key: &str, ttl: Duration) -> Arc<dyn NotifierLock> {
        Arc::new(InMemoryLock {
            key: key.to_string(),
            ttl,
            owner: self.next_lock_owner.fetch_add(1, Ordering::SeqCst),
            leases: self.leases.clone(),
            refresher: Mutex::new(None),
        })
    }
}

/// Lease-based lock over the store's lease table.
pub struct InMemoryLock {
    key: String,
    ttl: Duration,
    owner: u64,
    leases: LeaseTable,
    refresher: Mutex<Option<CancellationToken>>,
}

impl InMemoryLock {
    fn try_take(&self) -> bool {
        let now = Instant::now();
        let mut entry = self.leases.entry(self.key.clone()).or_insert(LeaseEntry {
            owner: self.owner,
            expires_at: now + self.ttl,
        });
        if entry.owner == self.owner || entry.expires_at <= now {
            entry.owner = self.owner;
            entry.expires_at = now + self.ttl;
            true
        } else {
            false
        }
    }

    /// Extend the lease while we still own it; fire `lost` otherwise.
    fn spawn_refresher(&self, lost: CancellationToken) -> CancellationToken {
        let done = CancellationToken::new();
        let leases = self.leases.clone();
        let key = self.key.clone();
        let owner = self.owner;
        let ttl = self.ttl;
        let period = (ttl / 3).max(Duration::from_millis(10));
        let stop = done.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = tokio::time::sleep(period) => {}
                }
                let now = Instant::now();
                let still_ours = match leases.get_mut(&key) {
                    Some(mut entry) if entry.owner == owner && entry.expires_at > now => {
                        entry.expires_at = now + ttl;
                        true
                    }
                    _ => false,
                };
                if !still_ours {
                    debug!(key = %key, "Lease lost");
                    lost.cancel();
                    return;
                }
                trace!(key = %key, "Lease refreshed");
            }
        });

        done
    }
}

#[async_trait]
impl NotifierLock for InMemoryLock {
    async fn acquire(&self, stop: CancellationToken) -> Result<Lease> {
        loop {
            if self.try_take() {
                let lost = CancellationToken::new();
                let refresher = self.spawn_refresher(lost.clone());
                if let Some(previous) = self.refresher.lock().replace(refresher) {
                    previous.cancel();
                }
                debug!(key = %self.key, "Lock acquired");
                return Ok(Lease { lost });
            }
            tokio::select! {
                _ = stop.cancelled() => {
                    return Err(Error::Other(format!("lock {} acquisition cancelled", self.key)));
                }
                _ = tokio::time::sleep(LOCK_RETRY_INTERVAL) => {}
            }
        }
    }

    async fn release(&self) {
        if let Some(refresher) = self.refresher.lock().take() {
            refresher.cancel();
        }
        self.leases
            .remove_if(&self.key, |_, entry| entry.owner == self.owner);
        debug!(key = %self.key, "Lock released");
    }
}
