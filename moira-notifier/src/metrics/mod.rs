//! Notifier metrics.
//!
//! Counters and gauges are kept in memory and exported in Prometheus text
//! format. Operators observe delivery health through them:
//!
//! - per-sender `sends_ok` / `sends_failed`
//! - `sending_failed`, `subs_malformed`, `events_throttled`, `contacts_unavailable`
//! - per-contact-type `delivery_ok` / `delivery_failed` / `delivery_checks_stopped`
//! - the `alive` gauge

mod collector;
mod prometheus;

pub use collector::{MetricsSnapshot, NotifierMetrics};
pub use prometheus::PrometheusExporter;
