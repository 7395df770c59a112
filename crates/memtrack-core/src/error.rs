//! Classification of everything that can go wrong in a tracking operation.

use thiserror::Error;

use crate::diag::LogLevel;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("zero-byte allocation requested")]
    ZeroSize,
    #[error("tracker full: all {capacity} slots occupied")]
    CapacityExhausted { capacity: usize },
    #[error("no free slot found although the occupied count allowed one")]
    SlotScanMiss,
    #[error("allocation of {size} bytes failed at {site}")]
    OutOfMemory { size: usize, site: String },
    #[error("attempted free of a null handle")]
    NullFree,
    #[error("free of untracked address {address:#x}")]
    Untracked { address: usize },
    #[error("{field} drifted: incremental {incremental}, recomputed {recomputed}")]
    Inconsistent {
        field: &'static str,
        incremental: usize,
        recomputed: usize,
    },
}

impl TrackError {
    /// Only a failing backing allocator is unrecoverable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }

    /// Log level diagnostics for this condition are emitted at.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        match self {
            Self::ZeroSize | Self::NullFree | Self::Untracked { .. } => LogLevel::Warn,
            Self::CapacityExhausted { .. } | Self::SlotScanMiss | Self::Inconsistent { .. } => {
                LogLevel::Error
            }
            Self::OutOfMemory { .. } => LogLevel::Fatal,
        }
    }

    /// Stable event name used in structured logs.
    #[must_use]
    pub const fn event(&self) -> &'static str {
        match self {
            Self::ZeroSize => "zero_size_allocation",
            Self::CapacityExhausted { .. } => "tracker_full",
            Self::SlotScanMiss => "slot_scan_miss",
            Self::OutOfMemory { .. } => "allocation_failed",
            Self::NullFree => "null_free",
            Self::Untracked { .. } => "untracked_free",
            Self::Inconsistent { .. } => "aggregate_drift",
        }
    }
}
