pub mod msr;
pub mod topology;

pub use msr::{Msr, MsrError};
pub use topology::Topology;
