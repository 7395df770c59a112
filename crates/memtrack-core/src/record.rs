//! Allocation records and the value types stored in them.

#![allow(unsafe_code)]

use std::borrow::Cow;
use std::fmt;
use std::ptr::NonNull;

use serde::{Deserialize, Serialize};

/// Maximum number of bytes of call-site text kept per record.
pub const SITE_LIMIT: usize = 255;

/// Allocation category tag. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Lives for the whole program.
    Static,
    /// Ordinary heap allocation.
    Dynamic,
    /// Short-lived scratch memory.
    Temporary,
    /// Long-lived allocation expected to outlive most others.
    Persistent,
}

impl Category {
    pub const ALL: [Self; 4] = [
        Self::Static,
        Self::Dynamic,
        Self::Temporary,
        Self::Persistent,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Temporary => "temporary",
            Self::Persistent => "persistent",
        }
    }

    /// Parse from string (case-insensitive). Unknown names yield `None`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Some(Self::Static),
            "dynamic" | "heap" => Some(Self::Dynamic),
            "temporary" | "temp" | "scratch" => Some(Self::Temporary),
            "persistent" | "long" => Some(Self::Persistent),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a record.
///
/// Only `Allocated` records occupy a slot. `Freed` is set on the record for the
/// instant between bookkeeping and slot clearing. `Corrupted` is never assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Allocated,
    Freed,
    Corrupted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allocated => "allocated",
            Self::Freed => "freed",
            Self::Corrupted => "corrupted",
        })
    }
}

/// Opaque identity token for a tracked allocation.
///
/// The tracker only ever compares handles; it never reads or writes through
/// them. Callers get at the memory with [`Handle::as_ptr`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(NonNull<u8>);

// SAFETY: a handle is an address used as an identity key. Nothing in this crate
// dereferences it, so moving or sharing it across threads cannot race.
unsafe impl Send for Handle {}
// SAFETY: see above.
unsafe impl Sync for Handle {}

impl Handle {
    /// Wrap a raw pointer. Null yields `None`.
    #[must_use]
    pub fn from_raw(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[must_use]
    pub const fn from_non_null(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    #[must_use]
    pub const fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    #[must_use]
    pub const fn as_non_null(self) -> NonNull<u8> {
        self.0
    }

    /// Numeric address, for reports and logs.
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.addr())
    }
}

impl fmt::Pointer for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.0, f)
    }
}

/// Where a tracking operation was requested from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub file: Cow<'static, str>,
    pub line: u32,
}

impl CallSite {
    #[must_use]
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self {
            file: Cow::Borrowed(file),
            line,
        }
    }

    /// Call site built from runtime text, e.g. a location reported by an FFI caller.
    #[must_use]
    pub fn owned(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: Cow::Owned(file.into()),
            line,
        }
    }

    /// The location of the caller of the function this is invoked from.
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        let location = std::panic::Location::caller();
        Self::new(location.file(), location.line())
    }

    /// `file:line`, truncated to at most `limit` bytes.
    #[must_use]
    pub fn render(&self, limit: usize) -> String {
        truncate_site(&self.to_string(), limit)
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Cut `text` to at most `limit` bytes without splitting a UTF-8 character.
#[must_use]
pub fn truncate_site(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_owned();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_owned()
}

/// Metadata for one live tracked allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRecord {
    pub address: Handle,
    /// Requested size in bytes, never zero.
    pub size: usize,
    pub site: String,
    pub category: Category,
    pub status: Status,
    /// Allocation order, starting at 1.
    pub sequence: u64,
}
