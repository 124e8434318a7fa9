pub mod freq;
pub mod temps;

pub use freq::FreqMonitor;
pub use temps::CoreTemps;
