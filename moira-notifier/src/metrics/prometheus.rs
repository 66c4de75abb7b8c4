//! Text-format exporter for the notifier meters.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use super::collector::NotifierMetrics;

/// Renders [`NotifierMetrics`] for a Prometheus scrape.
pub struct PrometheusExporter {
    metrics: Arc<NotifierMetrics>,
    namespace: String,
}

impl PrometheusExporter {
    pub fn new(metrics: Arc<NotifierMetrics>) -> Self {
        Self {
            metrics,
            namespace: "moira_notifier".to_string(),
        }
    }

    /// Prefix metric names with `namespace` instead of `moira_notifier`.
    pub fn with_namespace(metrics: Arc<NotifierMetrics>, namespace: impl Into<String>) -> Self {
        Self {
            metrics,
            namespace: namespace.into(),
        }
    }

    /// Render the current snapshot in the Prometheus text exposition format.
    ///
    /// Each family is written once with its `HELP` and `TYPE` lines; labelled
    /// samples follow in label order.
    pub fn export(&self) -> String {
        let snapshot = self.metrics.snapshot();
        let mut out = String::new();

        self.family(&mut out, "sends_ok_total", "counter", "Packages delivered by sender")
            .labelled("sender", &snapshot.sends_ok);
        self.family(&mut out, "sends_failed_total", "counter", "Packages that failed to deliver by sender")
            .labelled("sender", &snapshot.sends_failed);

        self.family(&mut out, "sending_failed_total", "counter", "Packages routed to the resend path")
            .single(snapshot.sending_failed);
        self.family(&mut out, "subs_malformed_total", "counter", "Events whose subscription could not be resolved")
            .single(snapshot.subs_malformed);
        self.family(&mut out, "events_throttled_total", "counter", "Events delayed by trigger throttling")
            .single(snapshot.events_throttled);
        self.family(
            &mut out,
            "contacts_unavailable_total",
            "counter",
            "Packages whose contact reached the unavailability threshold",
        )
        .single(snapshot.contacts_unavailable);

        self.family(&mut out, "delivery_ok_total", "counter", "Deliveries confirmed by the downstream system")
            .labelled("contact_type", &snapshot.delivery_ok);
        self.family(
            &mut out,
            "delivery_failed_total",
            "counter",
            "Deliveries reported failed by the downstream system",
        )
        .labelled("contact_type", &snapshot.delivery_failed);
        self.family(
            &mut out,
            "delivery_checks_stopped_total",
            "counter",
            "Delivery checks given up without a verdict",
        )
        .labelled("contact_type", &snapshot.delivery_checks_stopped);

        self.family(&mut out, "alive", "gauge", "Whether the notifier is usable")
            .single(snapshot.alive);

        out
    }

    fn family<'a>(&self, out: &'a mut String, name: &str, kind: &str, help: &str) -> Family<'a> {
        let name = format!("{}_{}", self.namespace, name);
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} {kind}");
        Family { out, name }
    }
}

/// A metric family whose header has been written.
struct Family<'a> {
    out: &'a mut String,
    name: String,
}

impl Family<'_> {
    fn single(self, value: u64) {
        let _ = writeln!(self.out, "{} {}", self.name, value);
    }

    fn labelled(self, label: &str, values: &HashMap<String, u64>) {
        let mut samples: Vec<(&String, &u64)> = values.iter().collect();
        samples.sort();
        for (key, value) in samples {
            let escaped = key.replace('\\', "\\\\").replace('"', "\\\"");
            let _ = writeln!(self.out, "{}{{{}=\"{}\"}} {}", self.name, label, escaped, value);
        }
    }
}
