//! Tracker configuration.
//!
//! Defaults can be overridden through the environment:
//! - `MEMTRACK_CAPACITY`: number of slots in the table (default 1000).
//! - `MEMTRACK_LARGE_THRESHOLD`: allocations at or above this many bytes are
//!   reported as large (default 1 MiB, `0` disables the warning).
//! - `MEMTRACK_LOG_LEVEL`: minimum diagnostic level (default `info`).
//! - `MEMTRACK_LOG_FORMAT`: `text` (default) or `json`.
//!
//! Unparseable values fall back to the default rather than failing.

use std::sync::OnceLock;

use crate::diag::LogLevel;
use crate::record::SITE_LIMIT;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_LARGE_THRESHOLD: usize = 1024 * 1024;

/// Output format for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogFormat {
    /// One human-readable line per event.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "json" | "jsonl" | "structured" => Self::Json,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Fixed number of slots; never grown.
    pub capacity: usize,
    /// Maximum bytes of call-site text stored per record.
    pub site_limit: usize,
    /// Size at which an allocation is flagged as large. `0` disables.
    pub large_threshold: usize,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            site_limit: SITE_LIMIT,
            large_threshold: DEFAULT_LARGE_THRESHOLD,
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
        }
    }
}

impl TrackerConfig {
    /// Read overrides from the `MEMTRACK_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse_usize = |key: &str, fallback: usize| {
            lookup(key)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(fallback)
        };
        Self {
            capacity: parse_usize("MEMTRACK_CAPACITY", defaults.capacity),
            site_limit: defaults.site_limit,
            large_threshold: parse_usize("MEMTRACK_LARGE_THRESHOLD", defaults.large_threshold),
            log_level: lookup("MEMTRACK_LOG_LEVEL")
                .and_then(|v| LogLevel::from_str_loose(&v))
                .unwrap_or(defaults.log_level),
            log_format: lookup("MEMTRACK_LOG_FORMAT")
                .map(|v| LogFormat::from_str_loose(&v))
                .unwrap_or(defaults.log_format),
        }
        .normalized()
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self.normalized()
    }

    #[must_use]
    pub fn with_large_threshold(mut self, bytes: usize) -> Self {
        self.large_threshold = bytes;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    #[must_use]
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// A table needs at least one slot.
    fn normalized(mut self) -> Self {
        self.capacity = self.capacity.max(1);
        self
    }
}

static GLOBAL_CONFIG: OnceLock<TrackerConfig> = OnceLock::new();

/// Process-wide configuration (reads the environment on first call, caches thereafter).
#[must_use]
pub fn config() -> &'static TrackerConfig {
    GLOBAL_CONFIG.get_or_init(TrackerConfig::from_env)
}
