//! Intel Ivy Bridge (3rd generation Core) register definitions
//!
//! This module provides the register definitions needed to tune mobile
//! Ivy Bridge parts: turbo boost control, package power limits (RAPL),
//! and frequency reporting.
//!
//! ## Register Groups
//!
//! - **turbo** - Turbo boost enable and per-core-count ratio limits
//! - **rapl** - Package power limits and the RAPL scaling units
//! - **freq** - Current and base frequency ratios
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 4

pub mod freq;
pub mod rapl;
pub mod turbo;

/// Bus clock of Ivy Bridge client parts in MHz.
///
/// The core frequency is always `ratio * BCLK_MHZ`; unlike later
/// generations the bus clock is not adjustable.
pub const BCLK_MHZ: f64 = 100.0;
