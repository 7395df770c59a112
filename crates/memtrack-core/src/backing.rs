//! Allocators the tracker delegates real memory to.
//!
//! - [`SystemBacking`]: `libc::malloc` / `libc::free`. Releasing memory that was
//!   malloc'd before tracking started is legal; releasing twice is not.
//! - [`CheckedBacking`]: `std::alloc::System` plus a table of every outstanding
//!   block. Unknown addresses are refused instead of released, which makes double
//!   free observable, and an optional byte limit simulates exhaustion.

#![allow(unsafe_code)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::collections::HashMap;
use std::ptr::NonNull;

use parking_lot::Mutex;

/// Alignment of every block handed out by [`CheckedBacking`].
pub const CHECKED_ALIGN: usize = 16;

/// Source of the real memory behind tracked allocations.
///
/// # Safety
///
/// Implementors must return from `acquire` only pointers valid for reads and
/// writes of `size` bytes, aligned for any fundamental type, and not aliased by
/// any other live block. `release` must accept every pointer `acquire` returned.
pub unsafe trait Backing: Send + Sync {
    /// Acquire `size` bytes (`size > 0`). `None` on exhaustion.
    fn acquire(&self, size: usize) -> Option<NonNull<u8>>;

    /// Release a block. Returns `false` if the backing refused to release it.
    ///
    /// # Safety
    ///
    /// `ptr` must be a block this backing can release. For backings that do not
    /// validate (like [`SystemBacking`]), that means it came from the same
    /// underlying allocator and has not been released already.
    unsafe fn release(&self, ptr: NonNull<u8>) -> bool;
}

/// The C heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBacking;

// SAFETY: malloc returns unique blocks of at least `size` bytes aligned for
// max_align_t, and free accepts every pointer malloc returned.
unsafe impl Backing for SystemBacking {
    fn acquire(&self, size: usize) -> Option<NonNull<u8>> {
        // SAFETY: malloc has no preconditions; null is handled below.
        let ptr = unsafe { libc::malloc(size) };
        NonNull::new(ptr.cast::<u8>())
    }

    unsafe fn release(&self, ptr: NonNull<u8>) -> bool {
        // SAFETY: caller guarantees `ptr` is a live malloc block.
        unsafe { libc::free(ptr.as_ptr().cast()) };
        true
    }
}

#[derive(Debug, Default)]
struct CheckedState {
    blocks: HashMap<usize, Layout>,
    bytes: usize,
}

/// System allocator with outstanding-block bookkeeping.
#[derive(Debug, Default)]
pub struct CheckedBacking {
    state: Mutex<CheckedState>,
    limit: Option<usize>,
}

impl CheckedBacking {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse any acquisition that would push outstanding bytes past `limit`.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            state: Mutex::new(CheckedState::default()),
            limit: Some(limit),
        }
    }

    /// Number of blocks acquired and not yet released.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Bytes acquired and not yet released.
    #[must_use]
    pub fn outstanding_bytes(&self) -> usize {
        self.state.lock().bytes
    }

    /// Whether `ptr` is a block this backing currently owns.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.state.lock().blocks.contains_key(&(ptr.as_ptr() as usize))
    }
}

// SAFETY: blocks come from System with a valid non-zero layout aligned to 16,
// and release only ever deallocates addresses recorded at acquisition.
unsafe impl Backing for CheckedBacking {
    fn acquire(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(size.max(1), CHECKED_ALIGN).ok()?;
        let mut state = self.state.lock();
        if let Some(limit) = self.limit
            && state.bytes.saturating_add(layout.size()) > limit
        {
            return None;
        }
        // SAFETY: layout has non-zero size.
        let ptr = NonNull::new(unsafe { System.alloc(layout) })?;
        state.blocks.insert(ptr.as_ptr() as usize, layout);
        state.bytes += layout.size();
        Some(ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>) -> bool {
        let mut state = self.state.lock();
        let Some(layout) = state.blocks.remove(&(ptr.as_ptr() as usize)) else {
            return false;
        };
        state.bytes -= layout.size();
        // SAFETY: the address was recorded with this layout when System
        // allocated it, and removing it from the map guarantees one release.
        unsafe { System.dealloc(ptr.as_ptr(), layout) };
        true
    }
}

impl Drop for CheckedBacking {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (addr, layout) in state.blocks.drain() {
            // SAFETY: every recorded block is still live and owned by us.
            unsafe { System.dealloc(addr as *mut u8, layout) };
        }
        state.bytes = 0;
    }
}
