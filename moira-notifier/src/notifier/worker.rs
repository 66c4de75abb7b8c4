//! Per-sender worker loop.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, warn};

use super::{NotifierCore, ResendReason};
use crate::domain::{DeliveryCheckData, NotificationPackage, TriggerData};
use crate::logging::event_at;
use crate::senders::{PendingCheck, SendRequest, Sender, SenderError};

/// Deliver packages from `rx` until the queue is closed.
pub(super) async fn run(
    core: Arc<NotifierCore>,
    ident: String,
    sender: Arc<dyn Sender>,
    mut rx: mpsc::Receiver<NotificationPackage>,
) {
    debug!(sender = %ident, "Sender worker started");
    while let Some(pkg) = rx.recv().await {
        core.process(&ident, sender.as_ref(), pkg).await;
    }
    debug!(sender = %ident, "Sender worker stopped");
}

impl NotifierCore {
    /// Put a package onto a sender queue, waiting at most the sending timeout.
    pub(super) async fn enqueue(&self, pkg: NotificationPackage, tx: mpsc::Sender<NotificationPackage>) {
        if pkg.fail_count > 0 {
            match self.store.get_contact(&pkg.contact.id).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    warn!(
                        contact_id = %pkg.contact.id,
                        trigger_id = %pkg.trigger.id,
                        "Contact was removed, dropping notification"
                    );
                    return;
                }
                Err(e) => {
                    warn!(contact_id = %pkg.contact.id, error = %e, "Failed to check contact, sending anyway");
                }
            }
        }

        match tokio::time::timeout(self.config.sending_timeout(), tx.reserve()).await {
            Ok(Ok(permit)) => permit.send(pkg),
            Ok(Err(_)) => {
                warn!(contact_type = %pkg.contact.contact_type, "Sender queue is closed");
                self.resend(pkg, ResendReason::SenderStopped).await;
            }
            Err(_) => {
                warn!(
                    contact_type = %pkg.contact.contact_type,
                    contact_id = %pkg.contact.id,
                    "Timed out queueing notification"
                );
                self.resend(pkg, ResendReason::Timeout).await;
            }
        }
    }

    /// Render, send and classify one package.
    pub(super) async fn process(&self, ident: &str, sender: &dyn Sender, pkg: NotificationPackage) {
        let level = self.package_level(&pkg, Level::INFO);
        event_at!(
            level,
            sender = %ident,
            contact_id = %pkg.contact.id,
            contact_value = %pkg.contact.value,
            trigger_id = %pkg.trigger.id,
            trigger_name = %pkg.trigger.name,
            "Start sending {}",
            pkg
        );

        let plots = match self
            .plotter
            .render(&pkg.trigger, &pkg.events, &pkg.plotting)
            .await
        {
            Ok(plots) => plots,
            Err(e) => {
                warn!(trigger_id = %pkg.trigger.id, error = %e, "Failed to render plots");
                Vec::new()
            }
        };

        let trigger = match self.templates.populate_description(&pkg.trigger, &pkg.events) {
            Ok(desc) => TriggerData {
                desc,
                ..pkg.trigger.clone()
            },
            Err(e) => {
                warn!(trigger_id = %pkg.trigger.id, error = %e, "Failed to populate trigger description");
                pkg.trigger.clone()
            }
        };

        let outcome = sender
            .send_events(SendRequest {
                events: &pkg.events,
                contact: &pkg.contact,
                trigger: &trigger,
                plots: &plots,
                throttled: pkg.throttled,
            })
            .await;

        match outcome {
            Ok(receipt) => {
                self.metrics.record_send_ok(ident);
                match receipt.delivery_check {
                    Some(PendingCheck::Ready(probe)) => {
                        self.store_delivery_probe(&pkg.contact.contact_type, &probe).await;
                    }
                    Some(PendingCheck::Unusable(reason)) => {
                        warn!(
                            sender = %ident,
                            contact_id = %pkg.contact.id,
                            trigger_id = %pkg.trigger.id,
                            reason = %reason,
                            "Cannot schedule delivery check"
                        );
                        self.metrics
                            .record_delivery_check_stopped(&pkg.contact.contact_type);
                    }
                    None => {}
                }
            }
            Err(SenderError::BrokenContact(reason)) => {
                warn!(
                    sender = %ident,
                    contact_id = %pkg.contact.id,
                    contact_value = %pkg.contact.value,
                    reason = %reason,
                    "Cannot send to broken contact"
                );
            }
            Err(SenderError::Failed(e)) => {
                self.metrics.record_send_failed(ident);
                warn!(
                    sender = %ident,
                    contact_id = %pkg.contact.id,
                    trigger_id = %pkg.trigger.id,
                    error = %e,
                    "Cannot send notification"
                );
                self.resend(pkg, ResendReason::SendFailed(e.to_string())).await;
            }
        }
    }

    async fn store_delivery_probe(&self, contact_type: &str, probe: &DeliveryCheckData) {
        let payload = match probe.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode delivery check");
                return;
            }
        };
        if let Err(e) = self
            .store
            .add_delivery_checks_data(contact_type, Utc::now().timestamp(), &payload)
            .await
        {
            error!(contact_type = %contact_type, error = %e, "Failed to store delivery check");
        }
    }
}
