pub mod controller;

pub use controller::{FanController, FanLevel, FanStatus};
