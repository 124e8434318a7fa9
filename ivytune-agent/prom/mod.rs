pub mod telemetry;

pub use telemetry::TelemetryExporter;
