//! Sender fan-out.
//!
//! The [`Notifier`] owns one bounded queue and one worker per registered
//! sender. Packages are routed to the queue matching their contact type;
//! failed deliveries are rescheduled through the store.

mod alive;
mod registry;
mod resend;
mod worker;

pub use resend::ResendReason;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{Level, warn};

use crate::config::NotifierConfig;
use crate::domain::NotificationPackage;
use crate::logging::{LevelOverrides, event_at};
use crate::metrics::NotifierMetrics;
use crate::plotting::PlotRenderer;
use crate::scheduler::Scheduler;
use crate::senders::{Sender, SenderContext};
use crate::store::NotifierStore;
use crate::template::TemplateService;
use crate::Result;

/// A registered sender with its queue and worker.
struct SenderSlot {
    sender: Arc<dyn Sender>,
    tx: mpsc::Sender<NotificationPackage>,
    worker: JoinHandle<()>,
}

/// State shared by the notifier and its workers.
pub(crate) struct NotifierCore {
    config: NotifierConfig,
    store: Arc<dyn NotifierStore>,
    metrics: Arc<NotifierMetrics>,
    scheduler: Scheduler,
    plotter: Arc<dyn PlotRenderer>,
    templates: Arc<TemplateService>,
    overrides: Arc<LevelOverrides>,
}

impl NotifierCore {
    /// The log level of package-scoped lines for this package.
    fn package_level(&self, pkg: &NotificationPackage, default: Level) -> Level {
        let subscription_id = pkg
            .events
            .iter()
            .find_map(|e| e.subscription_id.as_deref());
        self.overrides
            .level_or(Some(&pkg.contact.id), subscription_id, default)
    }
}

/// Routes notification packages to sender workers.
pub struct Notifier {
    core: Arc<NotifierCore>,
    sender_ctx: SenderContext,
    senders: Mutex<HashMap<String, SenderSlot>>,
}

impl Notifier {
    /// Create a notifier without senders.
    pub fn new(
        config: NotifierConfig,
        store: Arc<dyn NotifierStore>,
        metrics: Arc<NotifierMetrics>,
        plotter: Arc<dyn PlotRenderer>,
    ) -> Result<Self> {
        let location = config.location()?;
        let sender_ctx = SenderContext::new(
            config.front_url.clone(),
            location,
            config.date_time_format.clone(),
        );
        let overrides = Arc::new(LevelOverrides::new(
            &config.log_contacts_to_level,
            &config.log_subscriptions_to_level,
        ));
        let scheduler = Scheduler::new(store.clone(), metrics.clone(), overrides.clone());

        Ok(Self {
            core: Arc::new(NotifierCore {
                templates: sender_ctx.templates.clone(),
                config,
                store,
                metrics,
                scheduler,
                plotter,
                overrides,
            }),
            sender_ctx,
            senders: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.core.config
    }

    pub fn metrics(&self) -> &Arc<NotifierMetrics> {
        &self.core.metrics
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.core.scheduler
    }

    /// Hand a package to its sender queue.
    ///
    /// Returns immediately; the enqueue runs on `tracker` so callers can wait
    /// for a batch with [`TaskTracker::wait`]. Packages without a registered
    /// sender, and packages that cannot be queued within the sending timeout,
    /// are rescheduled.
    pub fn send(&self, pkg: NotificationPackage, tracker: &TaskTracker) {
        let tx = self
            .senders
            .lock()
            .get(&pkg.contact.contact_type)
            .map(|slot| slot.tx.clone());
        let core = self.core.clone();

        let level = core.package_level(&pkg, Level::DEBUG);
        event_at!(
            level,
            contact_id = %pkg.contact.id,
            contact_type = %pkg.contact.contact_type,
            contact_value = %pkg.contact.value,
            trigger_id = %pkg.trigger.id,
            fail_count = pkg.fail_count,
            "Dispatching {}",
            pkg
        );

        tracker.spawn(async move {
            match tx {
                Some(tx) => core.enqueue(pkg, tx).await,
                None => {
                    warn!(
                        contact_type = %pkg.contact.contact_type,
                        contact_id = %pkg.contact.id,
                        "No sender registered for contact type"
                    );
                    core.resend(pkg, ResendReason::UnknownContactType).await;
                }
            }
        });
    }

    /// Dispatch a batch and wait until every package is queued or rescheduled.
    pub async fn send_batch(&self, packages: Vec<NotificationPackage>) {
        let tracker = TaskTracker::new();
        for pkg in packages {
            self.send(pkg, &tracker);
        }
        tracker.close();
        tracker.wait().await;
    }
}
