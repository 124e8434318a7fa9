pub mod collector;

pub use collector::TelemetryCollector;
