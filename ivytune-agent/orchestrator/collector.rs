// Centralized telemetry collection orchestrator
// Drives the exporter refresh and the fan watchdog from one async loop

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::fan::FanController;
use crate::prom::TelemetryExporter;

/// Centralized collector that refreshes telemetry on a fixed interval.
///
/// While a manual fan level is active the loop also re-arms the
/// firmware watchdog each tick, so a stalled agent falls back to
/// automatic fan control within the watchdog period.
pub struct TelemetryCollector {
    exporter: Arc<TelemetryExporter>,
    fan: Option<FanController>,
    interval: Duration,
}

impl TelemetryCollector {
    pub fn new(
        exporter: Arc<TelemetryExporter>,
        fan: Option<FanController>,
        interval: Duration,
    ) -> Self {
        Self {
            exporter,
            fan,
            interval,
        }
    }

    /// Start the collection loop; it runs until `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.collection_loop(cancel).await;
        })
    }

    async fn collection_loop(self, cancel: CancellationToken) {
        tracing::info!(
            "Starting telemetry collection loop (interval: {:?})",
            self.interval
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            self.exporter.collect().await;
            self.keep_watchdog_alive();
        }

        if let Some(fan) = &self.fan {
            tracing::info!("Collection loop stopping, returning fan to automatic control");
            fan.restore_auto();
        }
    }

    fn keep_watchdog_alive(&self) {
        let Some(fan) = &self.fan else {
            return;
        };

        match fan.status() {
            Ok(status) if !status.is_auto() => {
                if let Err(e) = fan.refresh_watchdog() {
                    tracing::warn!("Failed to re-arm fan watchdog: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Failed to read fan status: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::msr::Msr;
    use crate::common::topology::Topology;
    use crate::telemetry::CoreTemps;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cancelled_loop_restores_fan_auto() {
        let dir = TempDir::new().unwrap();
        let fan_path = dir.path().join("fan");
        std::fs::write(&fan_path, "status:\t\tenabled\nspeed:\t\t65535\nlevel:\t\tdisengaged\n")
            .unwrap();

        let missing = dir.path().join("nope");
        let exporter = TelemetryExporter::new(
            Msr::with_root(&missing),
            Topology::with_root(&missing),
            CoreTemps::with_root(&missing),
            None,
        )
        .unwrap();

        let collector = TelemetryCollector::new(
            Arc::new(exporter),
            Some(FanController::with_path(&fan_path)),
            Duration::from_secs(1),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        collector.start(cancel).await.unwrap();

        let written = std::fs::read_to_string(&fan_path).unwrap();
        assert!(written.ends_with("level auto\nwatchdog 0\n"));
    }
}
