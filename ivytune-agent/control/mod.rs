pub mod power;
pub mod turbo;

pub use power::{PowerLimiter, PowerLimits};
pub use turbo::TurboController;
