//! # ivytune-raw
//!
//! Register layouts for Intel Ivy Bridge power management.
//!
//! This crate provides type-safe abstractions over the model-specific
//! registers that govern turbo boost, RAPL package power limits, and
//! frequency reporting on Ivy Bridge client parts. It is pure data: no
//! device files are opened here, callers supply the raw 64-bit values
//! and get structured layouts back.
//!
//! ## Usage
//!
//! ```ignore
//! use ivytune_raw::ivybridge::turbo::{self, msr::MSR_TURBO_RATIO_LIMIT};
//! use ivytune_raw::RegisterLayout;
//!
//! let raw = read_msr(0, MSR_TURBO_RATIO_LIMIT)?;
//! let mut table = turbo::TurboTable::from_msr_value(raw);
//! table.ratios[0] = 39;
//! write_msr(0, MSR_TURBO_RATIO_LIMIT, table.to_msr_value())?;
//! ```

pub mod fields;
pub mod ivybridge;
pub mod register;

// Re-export for convenience
pub use register::RegisterLayout;
