pub mod common;
pub mod config;
pub mod control;
pub mod error;
pub mod fan;
pub mod orchestrator;
pub mod prom;
pub mod telemetry;

pub use config::HwPaths;
pub use error::{Result, TuneError};
pub use orchestrator::TelemetryCollector;

pub use common::{Msr, Topology};
pub use control::{PowerLimiter, TurboController};
pub use fan::{FanController, FanLevel, FanStatus};
pub use prom::TelemetryExporter;
pub use telemetry::{CoreTemps, FreqMonitor};
