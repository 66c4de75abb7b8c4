//! Singleton delivery-check worker for one contact type.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::checker::DeliveryChecker;
use crate::config::DeliveryCheckConfig;
use crate::domain::{DeliveryCheckData, DeliveryCheckState};
use crate::metrics::NotifierMetrics;
use crate::store::{NotifierStore, ScoreBound};
use crate::template::TemplateService;
use crate::Result;

const LOCK_KEY_PREFIX: &str = "moira-delivery-check-lock:";

/// Counts of one tick, by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub fetched: usize,
    pub checked: usize,
    pub rescheduled: usize,
    pub delivered: usize,
    pub failed: usize,
    pub stopped: usize,
    pub removed: u64,
}

/// Fetches due probes of one contact type, checks them and reschedules or
/// retires them.
pub struct DeliveryController {
    contact_type: String,
    config: DeliveryCheckConfig,
    store: Arc<dyn NotifierStore>,
    metrics: Arc<NotifierMetrics>,
    checker: DeliveryChecker,
}

impl DeliveryController {
    pub fn new(
        contact_type: impl Into<String>,
        config: DeliveryCheckConfig,
        store: Arc<dyn NotifierStore>,
        metrics: Arc<NotifierMetrics>,
        templates: Arc<TemplateService>,
    ) -> Result<Self> {
        config.validate()?;
        let checker = DeliveryChecker::new(config.clone(), templates)?;
        Ok(Self {
            contact_type: contact_type.into(),
            config,
            store,
            metrics,
            checker,
        })
    }

    pub fn contact_type(&self) -> &str {
        &self.contact_type
    }

    /// The cluster-wide lock key of this contact type.
    pub fn lock_key(&self) -> String {
        format!("{}{}", LOCK_KEY_PREFIX, self.contact_type)
    }

    /// Run check ticks while holding the contact-type lock, until `stop` fires.
    ///
    /// Losing the lease ends the current ticker loop; the lock is then
    /// acquired again before ticking resumes.
    pub async fn run(&self, stop: CancellationToken) {
        let lock = self
            .store
            .new_lock(&self.lock_key(), self.config.lock_ttl());
        info!(contact_type = %self.contact_type, "Delivery check worker started");

        loop {
            let lease = match lock.acquire(stop.clone()).await {
                Ok(lease) => lease,
                Err(e) => {
                    debug!(contact_type = %self.contact_type, error = %e, "Delivery check lock not acquired");
                    break;
                }
            };
            debug!(contact_type = %self.contact_type, "Delivery check lock acquired");

            let mut ticker = tokio::time::interval(self.config.check_timeout());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let stopped = loop {
                tokio::select! {
                    _ = stop.cancelled() => break true,
                    _ = lease.lost.cancelled() => {
                        warn!(contact_type = %self.contact_type, "Delivery check lock lost");
                        break false;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.check_tick(Utc::now().timestamp()).await {
                            error!(contact_type = %self.contact_type, error = %e, "Delivery check tick failed");
                        }
                    }
                }
            };

            lock.release().await;
            if stopped {
                break;
            }
        }

        info!(contact_type = %self.contact_type, "Delivery check worker stopped");
    }

    /// Check every probe due at `now` once.
    ///
    /// Whatever the verdicts, every fetched payload is removed and the
    /// retryable probes are added back `rescheduling_delay_secs` later.
    /// Probes stored after the fetch are left for the next tick.
    pub async fn check_tick(&self, now: i64) -> Result<TickSummary> {
        let payloads = self
            .store
            .get_delivery_checks_data(&self.contact_type, ScoreBound::NegInf, ScoreBound::Value(now))
            .await?;
        let mut summary = TickSummary {
            fetched: payloads.len(),
            ..Default::default()
        };
        if payloads.is_empty() {
            return Ok(summary);
        }

        let probes = dedup_probes(&payloads);
        let next_check = now + self.config.rescheduling_delay_secs.max(1) as i64;
        let mut requeued = HashSet::new();

        for probe in probes {
            let state = self.checker.check(&probe).await;
            summary.checked += 1;

            match state {
                DeliveryCheckState::Pending | DeliveryCheckState::Exception => {
                    let next = DeliveryCheckData {
                        attempts_count: probe.attempts_count + 1,
                        ..probe
                    };
                    if next.attempts_count < self.config.max_attempts_count {
                        if let Some(payload) = self.reschedule(&next, next_check).await {
                            requeued.insert(payload);
                        }
                        summary.rescheduled += 1;
                    } else {
                        warn!(
                            contact_type = %self.contact_type,
                            contact_id = %next.contact.id,
                            trigger_id = %next.trigger_id,
                            attempts = next.attempts_count,
                            "Delivery check attempts exhausted"
                        );
                        self.metrics.record_delivery_check_stopped(&self.contact_type);
                        summary.stopped += 1;
                    }
                }
                DeliveryCheckState::Ok => {
                    self.metrics.record_delivery_ok(&self.contact_type);
                    summary.delivered += 1;
                }
                DeliveryCheckState::Failed => {
                    warn!(
                        contact_type = %self.contact_type,
                        contact_id = %probe.contact.id,
                        contact_value = %probe.contact.value,
                        trigger_id = %probe.trigger_id,
                        "Downstream reports the notification was not delivered"
                    );
                    self.metrics.record_delivery_failed(&self.contact_type);
                    summary.failed += 1;
                }
                DeliveryCheckState::UserException | DeliveryCheckState::Stopped => {
                    self.metrics.record_delivery_check_stopped(&self.contact_type);
                    summary.stopped += 1;
                }
            }
        }

        // Only what was read goes; a rescheduled copy identical to a read one
        // already carries its new score.
        let checked: Vec<String> = payloads
            .into_iter()
            .filter(|payload| !requeued.contains(payload))
            .collect();
        summary.removed = self
            .store
            .remove_delivery_checks_members(&self.contact_type, &checked)
            .await?;
        if summary.removed != checked.len() as u64 {
            warn!(
                contact_type = %self.contact_type,
                fetched = summary.fetched,
                removed = summary.removed,
                "Removed a different number of delivery checks than fetched"
            );
        }

        debug!(
            contact_type = %self.contact_type,
            checked = summary.checked,
            rescheduled = summary.rescheduled,
            "Delivery check tick done"
        );
        Ok(summary)
    }

    /// Store `probe` for another check at `at`, returning the stored payload.
    async fn reschedule(&self, probe: &DeliveryCheckData, at: i64) -> Option<String> {
        let payload = match probe.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode delivery check");
                return None;
            }
        };
        match self
            .store
            .add_delivery_checks_data(&self.contact_type, at, &payload)
            .await
        {
            Ok(()) => Some(payload),
            Err(e) => {
                error!(contact_type = %self.contact_type, error = %e, "Failed to reschedule delivery check");
                None
            }
        }
    }
}

/// Decode payloads and collapse duplicates of the same probe, keeping the
/// copy with the most attempts. Order follows first appearance.
///
/// Payloads that do not decode are skipped.
pub fn dedup_probes(payloads: &[String]) -> Vec<DeliveryCheckData> {
    let mut probes: Vec<DeliveryCheckData> = Vec::with_capacity(payloads.len());
    let mut index = HashMap::new();

    for payload in payloads {
        let probe = match DeliveryCheckData::from_payload(payload) {
            Ok(probe) => probe,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable delivery check");
                continue;
            }
        };
        match index.get(&probe.dedup_key()) {
            Some(&at) => {
                let kept: &mut DeliveryCheckData = &mut probes[at];
                if probe.attempts_count > kept.attempts_count {
                    *kept = probe;
                }
            }
            None => {
                index.insert(probe.dedup_key(), probes.len());
                probes.push(probe);
            }
        }
    }

    probes
}
