//! Deterministic operation sequences against a checked tracker.
//!
//! Each step picks one of: allocate, free a live handle, free a stale handle
//! again, request zero bytes, free a block the tracker never saw, or free
//! `None`. The tracker is audited after every step and the backing allocator's
//! outstanding block count must always equal the live set.

#![allow(unsafe_code)]

use memtrack_core::{
    Backing, Category, CheckedBacking, FreeOutcome, Handle, LogEmitter, MetricsSnapshot, Tracker,
    TrackerConfig, call_site,
};
use serde::Serialize;

use crate::error::HarnessError;

/// xorshift64* generator; the same seed always yields the same sequence.
#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// A zero seed would get stuck at zero and is replaced.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        debug_assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressConfig {
    pub seed: u64,
    pub steps: usize,
    pub capacity: usize,
    /// Largest single allocation requested.
    pub max_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            steps: 2_000,
            capacity: 32,
            max_size: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StressSummary {
    pub seed: u64,
    pub steps: usize,
    pub capacity: usize,
    pub audits: usize,
    pub refused_allocations: u64,
    pub double_frees: u64,
    pub foreign_frees: u64,
    pub live_at_end: usize,
    pub outstanding_after_cleanup: usize,
    pub metrics: MetricsSnapshot,
}

const STALE_LIMIT: usize = 64;

/// Run one sequence. Fails on the first audit mismatch or model divergence.
pub fn run_stress(
    config: StressConfig,
    emitter: LogEmitter,
) -> Result<StressSummary, HarnessError> {
    let tracker = Tracker::with_backing(
        TrackerConfig::default().with_capacity(config.capacity),
        CheckedBacking::new(),
    )
    .with_emitter(emitter);
    let mut rng = XorShift64::new(config.seed);

    let mut live: Vec<Handle> = Vec::new();
    let mut stale: Vec<Handle> = Vec::new();
    let mut refused = 0_u64;
    let mut double_frees = 0_u64;
    let mut foreign_frees = 0_u64;
    let mut audits = 0_usize;

    for step in 0..config.steps {
        match rng.gen_range_usize(0, 99) {
            0..=44 => {
                let size = rng.gen_range_usize(1, config.max_size.max(1));
                let category = Category::ALL[rng.gen_range_usize(0, Category::ALL.len() - 1)];
                match tracker.allocate(size, call_site!(), category) {
                    Some(handle) => {
                        stale.retain(|h| *h != handle);
                        live.push(handle);
                    }
                    None => refused += 1,
                }
            }
            45..=74 if !live.is_empty() => {
                let handle = live.swap_remove(rng.gen_range_usize(0, live.len() - 1));
                // SAFETY: `handle` is live in this tracker.
                let outcome = unsafe { tracker.free(Some(handle), call_site!()) };
                if !outcome.is_released() {
                    return Err(diverged(step, &tracker));
                }
                if stale.len() == STALE_LIMIT {
                    stale.remove(0);
                }
                stale.push(handle);
            }
            75..=84 if !stale.is_empty() => {
                let handle = stale[rng.gen_range_usize(0, stale.len() - 1)];
                // SAFETY: `handle` is not live (reissued addresses are pruned
                // from `stale`), and CheckedBacking refuses blocks it no
                // longer owns.
                let outcome = unsafe { tracker.free(Some(handle), call_site!()) };
                if outcome != (FreeOutcome::Untracked { released: false }) {
                    return Err(diverged(step, &tracker));
                }
                double_frees += 1;
            }
            85..=89 => {
                if tracker.allocate(0, call_site!(), Category::Temporary).is_some() {
                    return Err(diverged(step, &tracker));
                }
            }
            90..=94 => {
                let size = rng.gen_range_usize(1, 64);
                if let Some(block) = tracker.backing().acquire(size) {
                    // SAFETY: the block belongs to the tracker's backing.
                    let outcome =
                        unsafe { tracker.free(Some(Handle::from_non_null(block)), call_site!()) };
                    if outcome != (FreeOutcome::Untracked { released: true }) {
                        return Err(diverged(step, &tracker));
                    }
                    foreign_frees += 1;
                }
            }
            _ => {
                // SAFETY: None is always accepted.
                unsafe { tracker.free(None, call_site!()) };
            }
        }

        tracker
            .audit()
            .map_err(|source| HarnessError::Audit { step, source })?;
        audits += 1;
        if tracker.occupied_count() != live.len() || tracker.backing().outstanding() != live.len()
        {
            return Err(diverged(step, &tracker));
        }
    }

    let live_at_end = live.len();
    for handle in live.drain(..) {
        // SAFETY: every handle left in `live` is live in this tracker.
        unsafe { tracker.free(Some(handle), call_site!()) };
    }
    let outstanding = tracker.backing().outstanding();
    if outstanding != 0 {
        return Err(HarnessError::Leaked { count: outstanding });
    }

    Ok(StressSummary {
        seed: config.seed,
        steps: config.steps,
        capacity: tracker.capacity(),
        audits,
        refused_allocations: refused,
        double_frees,
        foreign_frees,
        live_at_end,
        outstanding_after_cleanup: outstanding,
        metrics: tracker.metrics(),
    })
}

fn diverged(step: usize, tracker: &Tracker<CheckedBacking>) -> HarnessError {
    HarnessError::Diverged {
        step,
        occupied: tracker.occupied_count(),
        outstanding: tracker.backing().outstanding(),
    }
}
