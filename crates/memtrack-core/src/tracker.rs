//! The allocation tracker.
//!
//! A [`Tracker`] owns one [`AllocationTable`] behind a single coarse lock, a
//! [`Backing`] allocator for the real memory, a diagnostic emitter and a set of
//! counters. Lock order is table first, emitter second; the emitter never
//! touches the table.

#![allow(unsafe_code)]

use std::alloc::Layout;

use parking_lot::Mutex;

use crate::backing::{Backing, SystemBacking};
use crate::config::{TrackerConfig, config};
use crate::diag::{LogEmitter, LogEntry, LogLevel};
use crate::error::TrackError;
use crate::metrics::{MetricsSnapshot, TrackerMetrics};
use crate::record::{AllocationRecord, CallSite, Category, Handle, Status};
use crate::report::{Report, ReportEntry};
use crate::table::AllocationTable;

/// What a call to [`Tracker::free`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// The handle was tracked; its slot was cleared and its memory released.
    Released { size: usize },
    /// `None` was passed. Nothing happened beyond a warning.
    NullHandle,
    /// The handle was not in the table (never tracked, or already freed).
    /// The memory was still handed to the backing allocator, which reports
    /// whether it accepted it.
    Untracked { released: bool },
}

impl FreeOutcome {
    #[must_use]
    pub const fn is_released(self) -> bool {
        matches!(self, Self::Released { .. })
    }
}

#[derive(Debug)]
struct TableState {
    table: AllocationTable,
    /// Next sequence number to hand out. Survives `initialize`.
    next_sequence: u64,
}

/// Allocation tracker over a backing allocator `B`.
#[derive(Debug)]
pub struct Tracker<B: Backing = SystemBacking> {
    config: TrackerConfig,
    state: Mutex<TableState>,
    backing: B,
    metrics: TrackerMetrics,
    emitter: Mutex<LogEmitter>,
}

impl Tracker {
    /// Tracker over the C heap, configured from the process-wide [`config`].
    ///
    /// Untracked frees are forwarded to `libc::free`, so memory malloc'd before
    /// tracking started is released correctly, but a double free reaches the C
    /// allocator twice and typically aborts the process. Use
    /// [`with_backing`](Tracker::with_backing) with a
    /// [`CheckedBacking`](crate::CheckedBacking) where double frees must be
    /// survivable.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(config().clone())
    }

    #[must_use]
    pub fn with_config(config: TrackerConfig) -> Self {
        Self::with_backing(config, SystemBacking)
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backing> Tracker<B> {
    /// Tracker with an explicit backing allocator. Diagnostics go to stderr at
    /// the configured level and format.
    #[must_use]
    pub fn with_backing(config: TrackerConfig, backing: B) -> Self {
        let emitter = LogEmitter::stderr("memtrack")
            .with_min_level(config.log_level)
            .with_format(config.log_format);
        Self {
            state: Mutex::new(TableState {
                table: AllocationTable::with_capacity(config.capacity.max(1)),
                next_sequence: 1,
            }),
            config,
            backing,
            metrics: TrackerMetrics::new(),
            emitter: Mutex::new(emitter),
        }
    }

    /// Replace the diagnostic sink. The emitter's own level and format apply.
    #[must_use]
    pub fn with_emitter(mut self, emitter: LogEmitter) -> Self {
        self.emitter = Mutex::new(emitter);
        self
    }

    fn emit(&self, entry: LogEntry) {
        if self.emitter.lock().emit_entry(entry).is_err() {
            TrackerMetrics::inc(&self.metrics.dropped_diagnostics);
        }
    }

    /// Reset the table to empty.
    ///
    /// Outstanding memory is *not* released: every live handle becomes
    /// untracked. The sequence counter keeps counting.
    pub fn initialize(&self) {
        let mut state = self.state.lock();
        let discarded = state.table.occupied();
        state.table.clear();
        let capacity = state.table.capacity();
        drop(state);

        self.emit(
            LogEntry::new(LogLevel::Info, "tracker_initialized")
                .with_capacity(capacity)
                .with_details(serde_json::json!({ "discarded": discarded })),
        );
    }

    /// Allocate `size` bytes and record them.
    ///
    /// Every failure is classified and logged; real allocation failure is
    /// reported as [`TrackError::OutOfMemory`] rather than halting.
    pub fn try_allocate(
        &self,
        size: usize,
        site: CallSite,
        category: Category,
    ) -> Result<Handle, TrackError> {
        if size == 0 {
            let err = TrackError::ZeroSize;
            TrackerMetrics::inc(&self.metrics.zero_size_rejections);
            self.emit(
                diagnostic(&err)
                    .with_site(&site)
                    .with_category(category)
                    .with_message("Zero-byte allocation"),
            );
            return Err(err);
        }

        let mut state = self.state.lock();
        if state.table.is_full() {
            let capacity = state.table.capacity();
            drop(state);
            let err = TrackError::CapacityExhausted { capacity };
            TrackerMetrics::inc(&self.metrics.exhaustion_failures);
            self.emit(
                diagnostic(&err)
                    .with_site(&site)
                    .with_size(size)
                    .with_category(category)
                    .with_capacity(capacity)
                    .with_message("Memory tracker full"),
            );
            return Err(err);
        }

        let Some(ptr) = self.backing.acquire(size) else {
            drop(state);
            let err = TrackError::OutOfMemory {
                size,
                site: site.to_string(),
            };
            TrackerMetrics::inc(&self.metrics.backing_failures);
            self.emit(
                diagnostic(&err)
                    .with_site(&site)
                    .with_size(size)
                    .with_category(category)
                    .with_message("Allocation failed"),
            );
            return Err(err);
        };

        let Some(slot) = state.table.find_free_slot() else {
            // SAFETY: `ptr` was acquired from this backing just above and has
            // not been handed to anyone.
            unsafe { self.backing.release(ptr) };
            drop(state);
            let err = TrackError::SlotScanMiss;
            self.emit(diagnostic(&err).with_site(&site).with_size(size));
            return Err(err);
        };

        let handle = Handle::from_non_null(ptr);
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.table.insert(
            slot,
            AllocationRecord {
                address: handle,
                size,
                site: site.render(self.config.site_limit),
                category,
                status: Status::Allocated,
                sequence,
            },
        );
        let (occupied, total) = (state.table.occupied(), state.table.total_bytes());
        drop(state);

        TrackerMetrics::inc(&self.metrics.allocations);
        TrackerMetrics::raise(&self.metrics.peak_bytes, total);
        TrackerMetrics::raise(&self.metrics.peak_occupied, occupied);

        if self.config.large_threshold > 0 && size >= self.config.large_threshold {
            TrackerMetrics::inc(&self.metrics.large_allocations);
            self.emit(
                LogEntry::new(LogLevel::Warn, "large_allocation")
                    .with_site(&site)
                    .with_size(size)
                    .with_address(handle.addr())
                    .with_slot(slot)
                    .with_category(category),
            );
        }
        Ok(handle)
    }

    /// Allocate `size` bytes and record them.
    ///
    /// Returns `None` for a zero-byte request or a full table (both logged).
    /// If the backing allocator fails the process is halted after a fatal
    /// diagnostic naming `site`.
    pub fn allocate(&self, size: usize, site: CallSite, category: Category) -> Option<Handle> {
        match self.try_allocate(size, site, category) {
            Ok(handle) => Some(handle),
            Err(TrackError::OutOfMemory { size, .. }) => {
                let _ = self.emitter.lock().flush();
                halt(size)
            }
            Err(_) => None,
        }
    }

    /// Release a handle.
    ///
    /// A tracked handle has its size debited, its memory released and its slot
    /// cleared, in that order, under the table lock. An untracked handle is
    /// logged and then still passed to the backing allocator.
    ///
    /// # Safety
    ///
    /// `handle` must either be live in this tracker or be a block the backing
    /// allocator may be asked to release. With [`SystemBacking`] an untracked
    /// handle must be a live `malloc` block; freeing the same handle twice is
    /// undefined behaviour. Validating backings such as
    /// [`CheckedBacking`](crate::CheckedBacking) refuse unknown blocks, so a
    /// stale handle is only a logic error there as long as its address has
    /// not been handed out again.
    pub unsafe fn free(&self, handle: Option<Handle>, site: CallSite) -> FreeOutcome {
        let Some(handle) = handle else {
            TrackerMetrics::inc(&self.metrics.null_frees);
            self.emit(
                diagnostic(&TrackError::NullFree)
                    .with_site(&site)
                    .with_message("Freeing NULL pointer"),
            );
            return FreeOutcome::NullHandle;
        };

        let mut state = self.state.lock();
        if let Some(index) = state.table.find(handle)
            && let Some(size) = state.table.debit(index)
        {
            // SAFETY: the record proves `handle` came from this backing and
            // has not been released since.
            unsafe { self.backing.release(handle.as_non_null()) };
            state.table.clear_slot(index);
            drop(state);
            TrackerMetrics::inc(&self.metrics.frees);
            return FreeOutcome::Released { size };
        }

        // SAFETY: forwarded from the caller's contract.
        let released = unsafe { self.backing.release(handle.as_non_null()) };
        drop(state);

        TrackerMetrics::inc(&self.metrics.untracked_frees);
        if !released {
            TrackerMetrics::inc(&self.metrics.refused_releases);
        }
        let err = TrackError::Untracked {
            address: handle.addr(),
        };
        self.emit(
            diagnostic(&err)
                .with_site(&site)
                .with_address(handle.addr())
                .with_message("Untracked memory free")
                .with_details(serde_json::json!({ "released": released })),
        );
        FreeOutcome::Untracked { released }
    }

    /// Every occupied slot in ascending index order, plus the aggregates.
    #[must_use]
    pub fn report(&self) -> Report {
        let state = self.state.lock();
        Report {
            entries: state
                .table
                .iter_occupied()
                .map(|(index, record)| ReportEntry::from_record(index, record))
                .collect(),
            occupied_count: state.table.occupied(),
            total_bytes: state.table.total_bytes(),
            capacity: state.table.capacity(),
        }
    }

    /// The record for `handle`, if it is live.
    #[must_use]
    pub fn lookup(&self, handle: Handle) -> Option<ReportEntry> {
        let state = self.state.lock();
        let index = state.table.find(handle)?;
        state
            .table
            .get(index)
            .map(|record| ReportEntry::from_record(index, record))
    }

    /// Recompute both aggregates from a full scan and compare.
    pub fn audit(&self) -> Result<(), TrackError> {
        let result = self.state.lock().table.audit();
        if let Err(err) = &result {
            self.emit(diagnostic(err).with_message(err.to_string()));
        }
        result
    }

    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.state.lock().table.total_bytes()
    }

    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.state.lock().table.occupied()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().table.capacity()
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[must_use]
    pub fn backing(&self) -> &B {
        &self.backing
    }

    pub fn flush_diagnostics(&self) -> std::io::Result<()> {
        self.emitter.lock().flush()
    }
}

/// Entry carrying the level and event name `err` is classified under.
fn diagnostic(err: &TrackError) -> LogEntry {
    LogEntry::new(err.level(), err.event())
}

fn halt(size: usize) -> ! {
    match Layout::from_size_align(size, 1) {
        Ok(layout) => std::alloc::handle_alloc_error(layout),
        Err(_) => std::process::abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::CheckedBacking;
    use crate::config::LogFormat;
    use crate::diag::{SharedBuffer, validate_log_line};

    fn checked_with(
        config: TrackerConfig,
        backing: CheckedBacking,
    ) -> (Tracker<CheckedBacking>, SharedBuffer) {
        let (emitter, buffer) = LogEmitter::to_buffer("test");
        let tracker = Tracker::with_backing(config, backing)
            .with_emitter(emitter.with_format(LogFormat::Json));
        (tracker, buffer)
    }

    fn checked(capacity: usize) -> (Tracker<CheckedBacking>, SharedBuffer) {
        checked_with(
            TrackerConfig::default().with_capacity(capacity),
            CheckedBacking::new(),
        )
    }

    fn events(buffer: &SharedBuffer) -> Vec<LogEntry> {
        buffer
            .lines()
            .iter()
            .enumerate()
            .map(|(i, line)| validate_log_line(line, i + 1).expect("valid diagnostic"))
            .collect()
    }

    fn site(line: u32) -> CallSite {
        CallSite::new("tracker_tests.rs", line)
    }

    #[test]
    fn round_trip_updates_aggregates() {
        let (tracker, _) = checked(8);
        let h1 = tracker.allocate(20, site(1), Category::Dynamic);
        let h2 = tracker.allocate(50, site(2), Category::Temporary);
        assert!(h1.is_some() && h2.is_some());
        assert_eq!((tracker.occupied_count(), tracker.total_bytes()), (2, 70));

        // SAFETY: h1 is live in this tracker.
        assert_eq!(unsafe { tracker.free(h1, site(3)) }, FreeOutcome::Released { size: 20 });
        assert_eq!((tracker.occupied_count(), tracker.total_bytes()), (1, 50));

        // SAFETY: h2 is live in this tracker.
        assert_eq!(unsafe { tracker.free(h2, site(4)) }, FreeOutcome::Released { size: 50 });
        assert_eq!((tracker.occupied_count(), tracker.total_bytes()), (0, 0));
        assert_eq!(tracker.backing().outstanding(), 0);
        assert!(tracker.audit().is_ok());
    }

    #[test]
    fn zero_size_is_rejected_without_touching_state() {
        let (tracker, buffer) = checked(4);
        assert!(tracker.allocate(0, site(10), Category::Static).is_none());
        assert_eq!(
            tracker.try_allocate(0, site(11), Category::Static),
            Err(TrackError::ZeroSize)
        );
        assert_eq!(tracker.occupied_count(), 0);
        assert_eq!(tracker.backing().outstanding(), 0);
        assert_eq!(tracker.metrics().zero_size_rejections, 2);

        let logged = events(&buffer);
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[0].event, "zero_size_allocation");
        assert_eq!(logged[0].level, LogLevel::Warn);
        assert_eq!(logged[0].site.as_deref(), Some("tracker_tests.rs:10"));
    }

    #[test]
    fn exhaustion_never_reaches_the_backing() {
        let (tracker, buffer) = checked(2);
        let a = tracker.allocate(8, site(1), Category::Dynamic).expect("slot 0");
        let b = tracker.allocate(8, site(2), Category::Dynamic).expect("slot 1");
        assert!(tracker.allocate(8, site(3), Category::Dynamic).is_none());
        assert_eq!(
            tracker.try_allocate(8, site(4), Category::Dynamic),
            Err(TrackError::CapacityExhausted { capacity: 2 })
        );
        assert_eq!(tracker.backing().outstanding(), 2);
        assert_eq!(tracker.lookup(a).map(|e| e.index), Some(0));
        assert_eq!(tracker.lookup(b).map(|e| e.index), Some(1));
        assert_eq!(tracker.metrics().exhaustion_failures, 2);

        let full = events(&buffer);
        assert_eq!(full[0].event, "tracker_full");
        assert_eq!(full[0].level, LogLevel::Error);
        assert_eq!(full[0].capacity, Some(2));
    }

    #[test]
    fn double_free_is_classified_untracked() {
        let (tracker, buffer) = checked(4);
        let keep = tracker.allocate(16, site(1), Category::Persistent);
        let h = tracker.allocate(32, site(2), Category::Dynamic);

        // SAFETY: h is live.
        assert!(unsafe { tracker.free(h, site(3)) }.is_released());
        let before = tracker.report();
        // SAFETY: CheckedBacking refuses the stale block and nothing reused it.
        let outcome = unsafe { tracker.free(h, site(4)) };
        assert_eq!(outcome, FreeOutcome::Untracked { released: false });
        assert_eq!(tracker.report(), before);
        assert!(tracker.audit().is_ok());
        assert!(keep.is_some_and(|k| tracker.lookup(k).is_some()));

        let snap = tracker.metrics();
        assert_eq!(snap.untracked_frees, 1);
        assert_eq!(snap.refused_releases, 1);

        let untracked = events(&buffer);
        let last = untracked.last().expect("untracked_free logged");
        assert_eq!(last.event, "untracked_free");
        assert_eq!(last.site.as_deref(), Some("tracker_tests.rs:4"));
        assert_eq!(last.details.as_ref().and_then(|d| d["released"].as_bool()), Some(false));
    }

    #[test]
    fn foreign_block_is_released_but_not_tracked() {
        let (tracker, buffer) = checked(4);
        let foreign = tracker.backing().acquire(40).expect("backing alloc");
        let handle = Handle::from_non_null(foreign);

        // SAFETY: the block belongs to the tracker's backing.
        let outcome = unsafe { tracker.free(Some(handle), site(7)) };
        assert_eq!(outcome, FreeOutcome::Untracked { released: true });
        assert_eq!(tracker.backing().outstanding(), 0);
        assert_eq!(tracker.occupied_count(), 0);
        assert_eq!(events(&buffer)[0].address, Some(format!("{:#x}", handle.addr())));
    }

    #[test]
    fn null_free_is_a_warning_only() {
        let (tracker, buffer) = checked(4);
        tracker.allocate(8, site(1), Category::Static);
        // SAFETY: None is always accepted.
        assert_eq!(unsafe { tracker.free(None, site(9)) }, FreeOutcome::NullHandle);
        assert_eq!((tracker.occupied_count(), tracker.total_bytes()), (1, 8));
        let logged = events(&buffer);
        assert_eq!(logged[0].event, "null_free");
        assert_eq!(tracker.metrics().null_frees, 1);
    }

    #[test]
    fn free_diagnostics_carry_the_error_classification() {
        let (tracker, buffer) = checked(4);
        let h = tracker.allocate(16, site(1), Category::Dynamic);
        // SAFETY: h is live; the second call hands back a block CheckedBacking refuses.
        unsafe {
            tracker.free(None, site(2));
            tracker.free(h, site(3));
            tracker.free(h, site(4));
        }
        let address = h.map(Handle::addr).unwrap_or_default();
        let logged = events(&buffer);
        let null = TrackError::NullFree;
        let untracked = TrackError::Untracked { address };
        assert_eq!((logged[0].level, logged[0].event.as_str()), (null.level(), null.event()));
        assert_eq!(
            (logged[1].level, logged[1].event.as_str()),
            (untracked.level(), untracked.event())
        );
        assert_eq!(logged[1].address, Some(format!("{address:#x}")));
    }

    #[test]
    fn allocation_diagnostics_carry_the_error_classification() {
        let (tracker, buffer) = checked_with(
            TrackerConfig::default().with_capacity(1),
            CheckedBacking::with_limit(64),
        );
        let zero = tracker.try_allocate(0, site(1), Category::Dynamic).expect_err("zero");
        let oom = tracker.try_allocate(128, site(2), Category::Dynamic).expect_err("oom");
        let h = tracker.allocate(8, site(3), Category::Dynamic);
        let full = tracker.try_allocate(8, site(4), Category::Dynamic).expect_err("full");
        let logged = events(&buffer);
        for (entry, err) in logged.iter().zip([&zero, &oom, &full]) {
            assert_eq!((entry.level, entry.event.as_str()), (err.level(), err.event()));
        }
        // SAFETY: h is live.
        unsafe { tracker.free(h, site(5)) };
    }

    #[test]
    fn backing_failure_is_classified_out_of_memory() {
        let (tracker, buffer) = checked_with(TrackerConfig::default(), CheckedBacking::with_limit(64));
        let err = tracker
            .try_allocate(128, site(21), Category::Dynamic)
            .expect_err("over the limit");
        assert!(err.is_fatal());
        assert_eq!(
            err,
            TrackError::OutOfMemory {
                size: 128,
                site: "tracker_tests.rs:21".into()
            }
        );
        assert_eq!(tracker.occupied_count(), 0);
        assert_eq!(tracker.metrics().backing_failures, 1);
        let logged = events(&buffer);
        assert_eq!(logged[0].event, "allocation_failed");
        assert_eq!(logged[0].level, LogLevel::Fatal);
    }

    #[test]
    fn sequence_survives_initialize_and_memory_is_kept() {
        let (tracker, buffer) = checked(4);
        let a = tracker.allocate(8, site(1), Category::Dynamic).unwrap();
        let b = tracker.allocate(8, site(2), Category::Dynamic).unwrap();
        assert_eq!(tracker.lookup(a).unwrap().sequence, 1);
        assert_eq!(tracker.lookup(b).unwrap().sequence, 2);

        tracker.initialize();
        assert_eq!((tracker.occupied_count(), tracker.total_bytes()), (0, 0));
        assert!(tracker.lookup(a).is_none());
        assert_eq!(tracker.backing().outstanding(), 2, "initialize must not free");

        let c = tracker.allocate(8, site(3), Category::Dynamic).unwrap();
        assert_eq!(tracker.lookup(c).unwrap().sequence, 3);

        let init = events(&buffer);
        assert_eq!(init[0].event, "tracker_initialized");
        assert_eq!(
            init[0].details.as_ref().and_then(|d| d["discarded"].as_u64()),
            Some(2)
        );
    }

    #[test]
    fn large_allocations_are_flagged() {
        let (tracker, buffer) = checked_with(
            TrackerConfig::default().with_large_threshold(100),
            CheckedBacking::new(),
        );
        tracker.allocate(99, site(1), Category::Dynamic).unwrap();
        tracker.allocate(100, site(2), Category::Dynamic).unwrap();
        let logged = events(&buffer);
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].event, "large_allocation");
        assert_eq!(logged[0].size, Some(100));
        assert_eq!(logged[0].slot, Some(1));
        assert_eq!(tracker.metrics().large_allocations, 1);
    }

    #[test]
    fn large_warning_can_be_disabled() {
        let (tracker, buffer) = checked_with(
            TrackerConfig::default().with_large_threshold(0),
            CheckedBacking::new(),
        );
        tracker.allocate(1 << 20, site(1), Category::Dynamic).unwrap();
        assert!(buffer.lines().is_empty());
    }

    #[test]
    fn long_sites_are_truncated_in_records() {
        let (tracker, _) = checked(2);
        let h = tracker
            .allocate(4, CallSite::owned("d/".repeat(300), 12), Category::Static)
            .unwrap();
        let entry = tracker.lookup(h).unwrap();
        assert_eq!(entry.site.len(), 255);
        assert!(entry.site.starts_with("d/d/"));
    }

    #[test]
    fn report_lists_slots_in_index_order_after_reuse() {
        let (tracker, _) = checked(4);
        let handles: Vec<_> = (1..=3)
            .map(|n| tracker.allocate(n * 10, site(n as u32), Category::Dynamic).unwrap())
            .collect();
        // SAFETY: handles[0] is live.
        unsafe { tracker.free(Some(handles[0]), site(9)) };
        let reused = tracker.allocate(5, site(10), Category::Temporary).unwrap();

        let report = tracker.report();
        let indices: Vec<usize> = report.entries.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(report.entries[0].address, reused.addr());
        assert_eq!(report.entries[0].sequence, 4);
        assert_eq!(report.occupied_count, 3);
        assert_eq!(report.total_bytes, 55);
    }

    #[test]
    fn peaks_track_high_water_marks() {
        let (tracker, _) = checked(4);
        let a = tracker.allocate(100, site(1), Category::Dynamic);
        let b = tracker.allocate(200, site(2), Category::Dynamic);
        // SAFETY: both live.
        unsafe {
            tracker.free(a, site(3));
            tracker.free(b, site(4));
        }
        tracker.allocate(10, site(5), Category::Dynamic);
        let snap = tracker.metrics();
        assert_eq!(snap.peak_bytes, 300);
        assert_eq!(snap.peak_occupied, 2);
        assert_eq!(snap.allocations, 3);
        assert_eq!(snap.frees, 2);
    }

    #[test]
    fn quiet_emitter_filters_warnings() {
        let (emitter, buffer) = LogEmitter::to_buffer("quiet");
        let tracker = Tracker::with_backing(TrackerConfig::default(), CheckedBacking::new())
            .with_emitter(emitter.with_min_level(LogLevel::Error));
        tracker.allocate(0, site(1), Category::Static);
        assert!(buffer.lines().is_empty());
        assert_eq!(tracker.metrics().zero_size_rejections, 1);
    }

    #[test]
    fn system_backing_round_trip() {
        let tracker = Tracker::with_config(TrackerConfig::default().with_capacity(4))
            .with_emitter(LogEmitter::sink("sys"));
        let h = crate::track_alloc!(tracker, 24, Category::Dynamic);
        let entry = tracker.lookup(h.unwrap()).unwrap();
        assert!(entry.site.contains("tracker.rs"));
        // SAFETY: h is live.
        assert!(unsafe { crate::track_free!(tracker, h) }.is_released());
        assert_eq!(tracker.occupied_count(), 0);
    }

    #[test]
    fn system_backing_releases_blocks_malloced_before_tracking() {
        let (emitter, buffer) = LogEmitter::to_buffer("sys");
        let tracker = Tracker::with_config(TrackerConfig::default().with_capacity(4))
            .with_emitter(emitter.with_format(LogFormat::Json));
        let live = tracker.allocate(8, site(1), Category::Persistent);
        let snapshot = tracker.report();

        // SAFETY: plain C allocation, freed exactly once below.
        let raw = unsafe { libc::malloc(32) };
        let foreign = Handle::from_raw(raw.cast()).expect("malloc(32)");
        // SAFETY: foreign came from libc::malloc and the tracker frees through libc::free.
        let outcome = unsafe { tracker.free(Some(foreign), site(2)) };
        assert_eq!(outcome, FreeOutcome::Untracked { released: true });
        assert_eq!(tracker.report(), snapshot);
        assert_eq!(tracker.metrics().untracked_frees, 1);

        let logged = events(&buffer);
        let last = logged.last().expect("warning logged");
        assert_eq!(last.event, "untracked_free");
        assert_eq!(last.level, LogLevel::Warn);

        // SAFETY: live is live.
        unsafe { tracker.free(live, site(3)) };
        assert_eq!(tracker.occupied_count(), 0);
    }

    #[test]
    fn tracker_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Tracker>();
        assert_send_sync::<Tracker<CheckedBacking>>();

        let (tracker, _) = checked(64);
        std::thread::scope(|scope| {
            for t in 0..4_u32 {
                let tracker = &tracker;
                scope.spawn(move || {
                    for i in 0..50_u32 {
                        let h = tracker.allocate(8, site(t * 100 + i), Category::Temporary);
                        // SAFETY: h is live and owned by this thread.
                        unsafe { tracker.free(h, site(t * 100 + i)) };
                    }
                });
            }
        });
        assert_eq!(tracker.occupied_count(), 0);
        assert_eq!(tracker.metrics().frees, 200);
        assert_eq!(tracker.backing().outstanding(), 0);
        assert!(tracker.audit().is_ok());
    }
}
