use prometheus::{Gauge, Registry};
use std::collections::HashMap;
use std::sync::Arc;

use ivytune_raw::ivybridge::BCLK_MHZ;

use crate::common::msr::Msr;
use crate::common::topology::Topology;
use crate::error::Result;
use crate::fan::FanController;
use crate::telemetry::{CoreTemps, FreqMonitor};

/// Telemetry series exported at /metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryMetric {
    CpuRatio,
    CpuMhz,
    CoreTemperature,
    FanRpm,
}

impl TelemetryMetric {
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryMetric::CpuRatio => "CpuFrequencyRatio",
            TelemetryMetric::CpuMhz => "CpuFrequencyMhz",
            TelemetryMetric::CoreTemperature => "CoreTemperatureCelsius",
            TelemetryMetric::FanRpm => "FanRpm",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            TelemetryMetric::CpuRatio => "Current frequency multiplier per logical CPU",
            TelemetryMetric::CpuMhz => "Current frequency in MHz per logical CPU",
            TelemetryMetric::CoreTemperature => "Core temperature in degrees Celsius",
            TelemetryMetric::FanRpm => "Fan speed in RPM",
        }
    }
}

pub struct TelemetryExporter {
    registry: Arc<Registry>,
    freq: FreqMonitor,
    temps: CoreTemps,
    fan: Option<FanController>,
    cpus: Vec<u32>,
    cpu_gauges: HashMap<TelemetryMetric, HashMap<u32, Gauge>>,
    temp_gauges: HashMap<u32, Gauge>,
    fan_rpm: Option<Gauge>,
}

impl TelemetryExporter {
    /// Gauges are registered for the CPUs and cores online right now;
    /// the set is not revisited later. A CPU that goes offline
    /// mid-session simply stops updating its gauges.
    pub fn new(
        msr: Msr,
        topology: Topology,
        temps: CoreTemps,
        fan: Option<FanController>,
    ) -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let cpus = msr.online_cpus();

        let mut exporter = Self {
            registry: Arc::clone(&registry),
            freq: FreqMonitor::new(msr),
            temps,
            fan,
            cpus,
            cpu_gauges: HashMap::new(),
            temp_gauges: HashMap::new(),
            fan_rpm: None,
        };

        exporter.register_metrics(&topology)?;

        Ok(exporter)
    }

    fn register_metrics(&mut self, topology: &Topology) -> Result<()> {
        for metric in [TelemetryMetric::CpuRatio, TelemetryMetric::CpuMhz] {
            let opts = prometheus::Opts::new(metric.name(), metric.help());

            let mut cpu_map = HashMap::new();
            for &cpu in &self.cpus {
                let gauge = Gauge::with_opts(opts.clone().const_label("cpu", cpu.to_string()))?;
                self.registry.register(Box::new(gauge.clone()))?;
                cpu_map.insert(cpu, gauge);
            }
            self.cpu_gauges.insert(metric, cpu_map);
        }

        let metric = TelemetryMetric::CoreTemperature;
        let opts = prometheus::Opts::new(metric.name(), metric.help());
        let mut cores: Vec<u32> = self.cpus.iter().map(|&cpu| topology.core_id(cpu)).collect();
        cores.sort_unstable();
        cores.dedup();
        for core in cores {
            let gauge = Gauge::with_opts(opts.clone().const_label("core", core.to_string()))?;
            self.registry.register(Box::new(gauge.clone()))?;
            self.temp_gauges.insert(core, gauge);
        }

        if self.fan.is_some() {
            let metric = TelemetryMetric::FanRpm;
            let gauge = Gauge::with_opts(prometheus::Opts::new(metric.name(), metric.help()))?;
            self.registry.register(Box::new(gauge.clone()))?;
            self.fan_rpm = Some(gauge);
        }

        Ok(())
    }

    /// Refresh every gauge once (called by the orchestrator).
    ///
    /// A failed reading leaves its gauge at the previous value rather
    /// than erroring out; scrapes see the last good sample.
    pub async fn collect(&self) {
        for &cpu in &self.cpus {
            match self.freq.current_ratio(cpu) {
                Ok(ratio) => {
                    if let Some(gauge) = self
                        .cpu_gauges
                        .get(&TelemetryMetric::CpuRatio)
                        .and_then(|m| m.get(&cpu))
                    {
                        gauge.set(ratio as f64);
                    }
                    if let Some(gauge) = self
                        .cpu_gauges
                        .get(&TelemetryMetric::CpuMhz)
                        .and_then(|m| m.get(&cpu))
                    {
                        gauge.set(ratio as f64 * BCLK_MHZ);
                    }
                }
                Err(e) => {
                    tracing::debug!("Failed to read frequency ratio for CPU {cpu}: {e}");
                }
            }
        }

        for (core, temp) in self.temps.read() {
            if let Some(gauge) = self.temp_gauges.get(&core) {
                gauge.set(temp);
            }
        }

        if let (Some(fan), Some(gauge)) = (&self.fan, &self.fan_rpm) {
            match fan.status() {
                Ok(status) => {
                    if let Some(rpm) = status.rpm {
                        gauge.set(rpm as f64);
                    }
                }
                Err(e) => {
                    tracing::debug!("Failed to read fan status: {e}");
                }
            }
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }
}
