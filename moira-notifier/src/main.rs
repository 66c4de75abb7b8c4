use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use moira_notifier::config::NotifierConfig;
use moira_notifier::domain::NotificationPackage;
use moira_notifier::logging::{LoggingHandle, init_logging};
use moira_notifier::metrics::{NotifierMetrics, PrometheusExporter};
use moira_notifier::notifier::Notifier;
use moira_notifier::plotting::NoopPlotter;
use moira_notifier::store::InMemoryStore;

/// Dispatch a partial batch once input has been quiet this long.
const BATCH_IDLE_FLUSH: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NotifierConfig::load().context("failed to load configuration")?;
    let (logging, _log_guard) = init_logging(&config.logging)?;

    let store = Arc::new(InMemoryStore::new());
    let metrics = Arc::new(NotifierMetrics::new());
    let notifier = Arc::new(Notifier::new(
        config.clone(),
        store.clone(),
        metrics.clone(),
        Arc::new(NoopPlotter),
    )?);
    notifier
        .register_senders()
        .context("failed to register senders")?;

    let cancel = CancellationToken::new();
    let background = TaskTracker::new();

    background.spawn({
        let notifier = notifier.clone();
        let cancel = cancel.clone();
        async move { notifier.run_alive_watcher(cancel).await }
    });
    for controller in notifier.delivery_controllers()? {
        let cancel = cancel.clone();
        background.spawn(async move { controller.run(cancel).await });
    }
    #[cfg(unix)]
    spawn_filter_reload(logging, &background, cancel.clone())?;
    #[cfg(not(unix))]
    drop(logging);

    info!(senders = ?notifier.get_senders(), "moira-notifier started");

    let batch_size = config.read_batch_size;
    let mut batch = Vec::with_capacity(batch_size);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = tokio::time::sleep(BATCH_IDLE_FLUSH), if !batch.is_empty() => {
                notifier.send_batch(std::mem::take(&mut batch)).await;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("Input closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read input, shutting down");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let pkg: NotificationPackage = match serde_json::from_str(&line) {
                    Ok(pkg) => pkg,
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed package");
                        continue;
                    }
                };
                if !config.enabled {
                    debug!(trigger_id = %pkg.trigger.id, "Notifier disabled, dropping package");
                    continue;
                }
                store.insert_contact(pkg.contact.clone());
                batch.push(pkg);
                if batch.len() >= batch_size {
                    notifier.send_batch(std::mem::take(&mut batch)).await;
                }
            }
        }
    }

    notifier.send_batch(batch).await;
    notifier.stop_senders().await;

    cancel.cancel();
    background.close();
    background.wait().await;

    debug!("Final metrics:\n{}", PrometheusExporter::new(metrics).export());
    info!("moira-notifier stopped");
    Ok(())
}

/// Re-read the log filter from configuration on SIGHUP.
#[cfg(unix)]
fn spawn_filter_reload(
    logging: Arc<LoggingHandle>,
    tracker: &TaskTracker,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = signal(SignalKind::hangup()).context("failed to listen for SIGHUP")?;
    tracker.spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = hangups.recv() => {
                    if received.is_none() {
                        break;
                    }
                    match NotifierConfig::load() {
                        Ok(config) => {
                            if let Err(e) = logging.set_filter(&config.logging.filter) {
                                warn!(error = %e, "Failed to apply log filter");
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to reload configuration"),
                    }
                }
            }
        }
    });
    Ok(())
}
