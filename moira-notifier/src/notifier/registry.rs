//! Sender registration and shutdown.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{Notifier, SenderSlot, worker};
use crate::config::{DeliveryCheckConfig, SenderSettings};
use crate::delivery::DeliveryController;
use crate::senders::{Sender, build_sender};
use crate::{Error, Result};

impl Notifier {
    /// Register every sender of the configuration.
    ///
    /// Stops at the first sender that fails to initialize.
    pub fn register_senders(&self) -> Result<()> {
        let settings = self.core.config.senders.clone();
        for sender in &settings {
            self.register_sender_settings(sender)?;
        }
        info!("Notifier initialized with {} senders", self.senders.lock().len());
        Ok(())
    }

    /// Build a sender from its settings and register it under its ident.
    pub fn register_sender_settings(&self, settings: &SenderSettings) -> Result<()> {
        let ident = settings.ident()?.to_string();
        if self.senders.lock().contains_key(&ident) {
            return Err(duplicate(&ident));
        }
        let sender = build_sender(settings, &self.sender_ctx)?;
        self.register_sender(ident, sender)
    }

    /// Register an initialized sender: allocate its queue and meters and
    /// start its worker.
    pub fn register_sender(&self, ident: impl Into<String>, sender: Arc<dyn Sender>) -> Result<()> {
        let ident = ident.into();
        let mut senders = self.senders.lock();
        if senders.contains_key(&ident) {
            return Err(duplicate(&ident));
        }

        let (tx, rx) = mpsc::channel(self.core.config.sender_queue_capacity.max(1));
        self.core.metrics.register_sender(&ident);
        let worker = tokio::spawn(worker::run(
            self.core.clone(),
            ident.clone(),
            sender.clone(),
            rx,
        ));

        info!(sender = %ident, sender_type = sender.sender_type(), "Registered sender");
        senders.insert(ident, SenderSlot { sender, tx, worker });
        Ok(())
    }

    /// Idents of the registered senders, sorted.
    pub fn get_senders(&self) -> Vec<String> {
        let mut idents: Vec<String> = self.senders.lock().keys().cloned().collect();
        idents.sort();
        idents
    }

    /// Delivery check settings of the senders that confirm deliveries, by ident.
    pub fn delivery_checks(&self) -> Vec<(String, DeliveryCheckConfig)> {
        let mut checks: Vec<(String, DeliveryCheckConfig)> = self
            .senders
            .lock()
            .iter()
            .filter_map(|(ident, slot)| {
                slot.sender
                    .delivery_check()
                    .map(|check| (ident.clone(), check.clone()))
            })
            .collect();
        checks.sort_by(|a, b| a.0.cmp(&b.0));
        checks
    }

    /// One delivery-check controller per sender that confirms deliveries.
    pub fn delivery_controllers(&self) -> Result<Vec<DeliveryController>> {
        self.delivery_checks()
            .into_iter()
            .map(|(contact_type, check)| {
                DeliveryController::new(
                    contact_type,
                    check,
                    self.core.store.clone(),
                    self.core.metrics.clone(),
                    self.core.templates.clone(),
                )
            })
            .collect()
    }

    /// Close every sender queue and wait for every worker to drain and exit.
    pub async fn stop_senders(&self) {
        let slots: Vec<(String, SenderSlot)> = self.senders.lock().drain().collect();
        let workers = slots.into_iter().map(|(ident, slot)| {
            drop(slot.tx);
            async move {
                if let Err(e) = slot.worker.await {
                    warn!(sender = %ident, error = %e, "Sender worker ended abnormally");
                }
            }
        });
        join_all(workers).await;
        info!("All senders stopped");
    }
}

fn duplicate(ident: &str) -> Error {
    Error::config(format!("sender '{}' is already registered", ident))
}
