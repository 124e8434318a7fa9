use std::io;
use thiserror::Error;

use crate::common::msr::MsrError;

#[derive(Error, Debug)]
pub enum TuneError {
    #[error("MSR operation failed: {0}")]
    MsrError(#[from] MsrError),

    /// A write that targets every online CPU stopped partway. CPUs
    /// visited before the failure keep the new value; callers should
    /// re-read hardware state rather than assume either outcome.
    #[error("Broadcast write of MSR 0x{msr:X} failed at CPU {cpu}; CPUs written earlier keep the new value: {source}")]
    BroadcastError {
        msr: u64,
        cpu: u32,
        source: MsrError,
    },

    /// Rejected before any hardware was touched.
    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Fan control interface not available at {0}")]
    FanUnavailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, TuneError>;
