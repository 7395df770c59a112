//! The two-structure walkthrough: build two example structures through the
//! tracker, print them, report, tear them down and report again.

#![allow(unsafe_code)]

use std::ffi::CStr;
use std::io::Write;
use std::mem::size_of;

use memtrack_core::{Backing, Category, Handle, Tracker, call_site};
use serde::Serialize;

use crate::error::HarnessError;

/// Bytes reserved for each structure's name, including the terminator.
pub const NAME_CAPACITY: usize = 50;

#[allow(clippy::approx_constant)]
const VALUE_SCALE: f64 = 3.14;

/// C-layout record the demo stores in tracked memory.
#[repr(C)]
#[derive(Debug)]
pub struct ExampleStruct {
    pub id: i32,
    /// Nul-terminated text in a separate tracked block.
    pub name: *mut u8,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DemoSummary {
    /// Blocks live while both structures existed.
    pub peak_blocks: usize,
    pub peak_bytes: usize,
    /// Blocks still live after teardown; non-zero means a leak.
    pub remaining_blocks: usize,
}

/// Allocate and fill one structure plus its name buffer.
pub fn create_example<B: Backing>(tracker: &Tracker<B>, id: i32) -> Result<Handle, HarnessError> {
    let handle = tracker
        .allocate(size_of::<ExampleStruct>(), call_site!(), Category::Dynamic)
        .ok_or(HarnessError::Refused {
            what: "example structure",
        })?;
    let Some(name) = tracker.allocate(NAME_CAPACITY, call_site!(), Category::Temporary) else {
        // SAFETY: `handle` was just allocated by this tracker.
        unsafe { tracker.free(Some(handle), call_site!()) };
        return Err(HarnessError::Refused {
            what: "example name",
        });
    };

    let text = format!("Example Structure {id}");
    let len = text.len().min(NAME_CAPACITY - 1);
    // SAFETY: `name` is a fresh block of NAME_CAPACITY bytes and `len + 1`
    // bytes are written.
    unsafe {
        std::ptr::copy_nonoverlapping(text.as_ptr(), name.as_ptr(), len);
        name.as_ptr().add(len).write(0);
    }
    // SAFETY: `handle` is a fresh block of `size_of::<ExampleStruct>()` bytes,
    // aligned for any fundamental type by the backing allocator.
    unsafe {
        handle.as_ptr().cast::<ExampleStruct>().write(ExampleStruct {
            id,
            name: name.as_ptr(),
            value: f64::from(id) * VALUE_SCALE,
        });
    }
    Ok(handle)
}

/// `ID=.., Name=.., Value=..` for a structure built by [`create_example`].
///
/// # Safety
///
/// `handle` must be live and have been returned by [`create_example`].
#[must_use]
pub unsafe fn describe(handle: Handle) -> String {
    // SAFETY: the contract guarantees an initialized ExampleStruct.
    let example = unsafe { &*handle.as_ptr().cast::<ExampleStruct>() };
    // SAFETY: create_example nul-terminates the name inside its block.
    let name = unsafe { CStr::from_ptr(example.name.cast()) };
    format!(
        "ID={}, Name={}, Value={:.6}",
        example.id,
        name.to_string_lossy(),
        example.value
    )
}

/// Free the name buffer, then the structure.
///
/// # Safety
///
/// `handle` must be live in `tracker` and have been returned by
/// [`create_example`] on it.
pub unsafe fn destroy_example<B: Backing>(tracker: &Tracker<B>, handle: Handle) {
    // SAFETY: the contract guarantees an initialized ExampleStruct.
    let name = unsafe { (*handle.as_ptr().cast::<ExampleStruct>()).name };
    // SAFETY: both blocks were allocated by create_example on this tracker
    // and are released exactly once here.
    unsafe {
        tracker.free(Handle::from_raw(name), call_site!());
        tracker.free(Some(handle), call_site!());
    }
}

/// Run the walkthrough on `tracker`, writing the console output to `out`.
pub fn run_demo<B: Backing, W: Write>(
    tracker: &Tracker<B>,
    out: &mut W,
) -> Result<DemoSummary, HarnessError> {
    tracker.initialize();

    let first = create_example(tracker, 1)?;
    let second = match create_example(tracker, 2) {
        Ok(handle) => handle,
        Err(err) => {
            // SAFETY: `first` is live and came from create_example.
            unsafe { destroy_example(tracker, first) };
            return Err(err);
        }
    };

    // SAFETY: both handles are live and came from create_example.
    let lines = unsafe { [describe(first), describe(second)] };
    let before = tracker.report();
    // SAFETY: both handles are live and are destroyed once.
    unsafe {
        destroy_example(tracker, first);
        destroy_example(tracker, second);
    }
    let after = tracker.report();

    for (n, line) in lines.iter().enumerate() {
        writeln!(out, "Struct {}: {line}", n + 1)?;
    }
    writeln!(out)?;
    write!(out, "{before}")?;
    writeln!(out)?;
    write!(out, "{after}")?;

    Ok(DemoSummary {
        peak_blocks: before.occupied_count,
        peak_bytes: before.total_bytes,
        remaining_blocks: after.occupied_count,
    })
}
