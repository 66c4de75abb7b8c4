//! Plot rendering seam.
//!
//! Plots are produced by an external rendering service. Senders that can
//! attach images receive whatever the renderer returns.

use async_trait::async_trait;

use crate::Result;
use crate::domain::{NotificationEvent, PlottingData, TriggerData};

/// A rendered PNG image.
pub type Plot = Vec<u8>;

/// Produces plots for a batch of events.
#[async_trait]
pub trait PlotRenderer: Send + Sync {
    /// Zero or more PNG images. Failures are logged by the caller and never block a send.
    async fn render(
        &self,
        trigger: &TriggerData,
        events: &[NotificationEvent],
        plotting: &PlottingData,
    ) -> Result<Vec<Plot>>;
}

/// Renderer used when no plotting service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPlotter;

#[async_trait]
impl PlotRenderer for NoopPlotter {
    async fn render(
        &self,
        _trigger: &TriggerData,
        _events: &[NotificationEvent],
        _plotting: &PlottingData,
    ) -> Result<Vec<Plot>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_plotter_renders_nothing() {
        let plots = NoopPlotter
            .render(
                &TriggerData::default(),
                &[],
                &PlottingData {
                    enabled: true,
                    theme: "dark".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(plots.is_empty());
    }
}
