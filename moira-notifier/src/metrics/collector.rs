//! Metrics collector for the notification dispatch core.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Shared meters of one notifier instance.
#[derive(Debug)]
pub struct NotifierMetrics {
    // Sender metrics, keyed by sender ident
    sends_ok: DashMap<String, AtomicU64>,
    sends_failed: DashMap<String, AtomicU64>,

    // Dispatch metrics
    sending_failed: AtomicU64,
    subs_malformed: AtomicU64,
    events_throttled: AtomicU64,
    contacts_unavailable: AtomicU64,

    // Delivery check metrics, keyed by contact type
    delivery_ok: DashMap<String, AtomicU64>,
    delivery_failed: DashMap<String, AtomicU64>,
    delivery_checks_stopped: DashMap<String, AtomicU64>,

    // Alive gauge; -1 until first marked
    alive: AtomicI64,
}

fn bump(map: &DashMap<String, AtomicU64>, key: &str) {
    if let Some(counter) = map.get(key) {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    map.entry(key.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn read(map: &DashMap<String, AtomicU64>, key: &str) -> u64 {
    map.get(key)
        .map(|v| v.load(Ordering::Relaxed))
        .unwrap_or(0)
}

fn collect(map: &DashMap<String, AtomicU64>) -> HashMap<String, u64> {
    map.iter()
        .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
        .collect()
}

impl NotifierMetrics {
    pub fn new() -> Self {
        Self {
            sends_ok: DashMap::new(),
            sends_failed: DashMap::new(),
            sending_failed: AtomicU64::new(0),
            subs_malformed: AtomicU64::new(0),
            events_throttled: AtomicU64::new(0),
            contacts_unavailable: AtomicU64::new(0),
            delivery_ok: DashMap::new(),
            delivery_failed: DashMap::new(),
            delivery_checks_stopped: DashMap::new(),
            alive: AtomicI64::new(-1),
        }
    }

    // ========== Sender Metrics ==========

    /// Create the `sends_ok`/`sends_failed` meters of a sender at zero.
    pub fn register_sender(&self, ident: &str) {
        self.sends_ok
            .entry(ident.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        self.sends_failed
            .entry(ident.to_string())
            .or_insert_with(|| AtomicU64::new(0));
    }

    pub fn record_send_ok(&self, ident: &str) {
        bump(&self.sends_ok, ident);
    }

    pub fn record_send_failed(&self, ident: &str) {
        bump(&self.sends_failed, ident);
    }

    pub fn sends_ok(&self, ident: &str) -> u64 {
        read(&self.sends_ok, ident)
    }

    pub fn sends_failed(&self, ident: &str) -> u64 {
        read(&self.sends_failed, ident)
    }

    /// Idents that have registered meters.
    pub fn sender_idents(&self) -> Vec<String> {
        let mut idents: Vec<String> = self.sends_ok.iter().map(|e| e.key().clone()).collect();
        idents.sort();
        idents
    }

    // ========== Dispatch Metrics ==========

    pub fn record_sending_failed(&self) {
        self.sending_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sending_failed(&self) -> u64 {
        self.sending_failed.load(Ordering::Relaxed)
    }

    pub fn record_subs_malformed(&self) {
        self.subs_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subs_malformed(&self) -> u64 {
        self.subs_malformed.load(Ordering::Relaxed)
    }

    pub fn record_event_throttled(&self) {
        self.events_throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_throttled(&self) -> u64 {
        self.events_throttled.load(Ordering::Relaxed)
    }

    pub fn record_contact_unavailable(&self) {
        self.contacts_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn contacts_unavailable(&self) -> u64 {
        self.contacts_unavailable.load(Ordering::Relaxed)
    }

    // ========== Delivery Check Metrics ==========

    pub fn record_delivery_ok(&self, contact_type: &str) {
        bump(&self.delivery_ok, contact_type);
    }

    pub fn record_delivery_failed(&self, contact_type: &str) {
        bump(&self.delivery_failed, contact_type);
    }

    pub fn record_delivery_check_stopped(&self, contact_type: &str) {
        bump(&self.delivery_checks_stopped, contact_type);
    }

    pub fn delivery_ok(&self, contact_type: &str) -> u64 {
        read(&self.delivery_ok, contact_type)
    }

    pub fn delivery_failed(&self, contact_type: &str) -> u64 {
        read(&self.delivery_failed, contact_type)
    }

    pub fn delivery_checks_stopped(&self, contact_type: &str) -> u64 {
        read(&self.delivery_checks_stopped, contact_type)
    }

    // ========== Alive Gauge ==========

    /// Mark the alive gauge with 1 (usable) or 0.
    pub fn mark_alive(&self, alive: bool) {
        self.alive.store(i64::from(alive), Ordering::Relaxed);
    }

    /// Current value of the alive gauge, `None` if never marked.
    pub fn alive(&self) -> Option<bool> {
        match self.alive.load(Ordering::Relaxed) {
            v if v < 0 => None,
            v => Some(v == 1),
        }
    }

    // ========== Snapshot ==========

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sends_ok: collect(&self.sends_ok),
            sends_failed: collect(&self.sends_failed),
            sending_failed: self.sending_failed(),
            subs_malformed: self.subs_malformed(),
            events_throttled: self.events_throttled(),
            contacts_unavailable: self.contacts_unavailable(),
            delivery_ok: collect(&self.delivery_ok),
            delivery_failed: collect(&self.delivery_failed),
            delivery_checks_stopped: collect(&self.delivery_checks_stopped),
            alive: self.alive.load(Ordering::Relaxed).max(0) as u64,
        }
    }
}

impl Default for NotifierMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub sends_ok: HashMap<String, u64>,
    pub sends_failed: HashMap<String, u64>,
    pub sending_failed: u64,
    pub subs_malformed: u64,
    pub events_throttled: u64,
    pub contacts_unavailable: u64,
    pub delivery_ok: HashMap<String, u64>,
    pub delivery_failed: HashMap<String, u64>,
    pub delivery_checks_stopped: HashMap<String, u64>,
    pub alive: u64,
}
