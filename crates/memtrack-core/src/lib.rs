//! Debug-time allocation tracker.
//!
//! Every tracked allocation goes through a [`Tracker`], which acquires the real
//! memory from a [`Backing`] allocator and records size, call site, category and
//! sequence number in a fixed-capacity slot table. A [`Report`] of everything
//! still live can be taken at any time, which is how leaks show up.
//!
//! # Architecture
//!
//! - **Records** (`record`): handles, call sites, categories and slot records
//! - **Slot table** (`table`): first-fit linear scan, incremental aggregates
//! - **Tracker** (`tracker`): allocate/free/report policy around the table
//! - **Backing allocators** (`backing`): `libc` malloc or a checked `System` pool
//! - **Diagnostics** (`diag`): structured JSONL or text log lines
//! - **Configuration** (`config`): capacity and logging knobs from the environment
//! - **Metrics** (`metrics`): atomic counters for every outcome
//!
//! ```
//! use memtrack_core::{Category, Tracker, track_alloc, track_free};
//!
//! let tracker = Tracker::new();
//! let buf = track_alloc!(tracker, 64, Category::Temporary);
//! assert_eq!(tracker.total_bytes(), 64);
//! // SAFETY: `buf` came from this tracker and is freed once.
//! unsafe { track_free!(tracker, buf) };
//! assert_eq!(tracker.occupied_count(), 0);
//! ```

#![deny(unsafe_code)]

pub mod backing;
pub mod config;
pub mod diag;
pub mod error;
pub mod metrics;
pub mod record;
pub mod report;
pub mod table;
pub mod tracker;

pub use backing::{Backing, CheckedBacking, SystemBacking};
pub use config::{LogFormat, TrackerConfig};
pub use diag::{LogEmitter, LogEntry, LogLevel, SharedBuffer};
pub use error::TrackError;
pub use metrics::{MetricsSnapshot, TrackerMetrics};
pub use record::{AllocationRecord, CallSite, Category, Handle, Status};
pub use report::{Report, ReportEntry};
pub use table::AllocationTable;
pub use tracker::{FreeOutcome, Tracker};

/// Capture the current source location as a [`CallSite`].
#[macro_export]
macro_rules! call_site {
    () => {
        $crate::CallSite::new(file!(), line!())
    };
}

/// Allocate through a tracker, recording the invoking file and line.
#[macro_export]
macro_rules! track_alloc {
    ($tracker:expr, $size:expr, $category:expr) => {
        $tracker.allocate($size, $crate::call_site!(), $category)
    };
}

/// Free through a tracker, recording the invoking file and line.
///
/// Expands to a call of the `unsafe` [`Tracker::free`], so it must be used
/// inside an `unsafe` block.
#[macro_export]
macro_rules! track_free {
    ($tracker:expr, $handle:expr) => {
        $tracker.free($handle, $crate::call_site!())
    };
}
