//! Demonstration and stress harness for memtrack.
//!
//! This crate provides:
//! - Demo: the two-structure walkthrough with before/after reports
//! - Stress: deterministic pseudo-random operation sequences with a full audit
//!   after every step
//! - The `memtrack` binary wrapping both, plus a probe for the fatal path

#![deny(unsafe_code)]

pub mod demo;
pub mod error;
pub mod stress;

pub use demo::{DemoSummary, ExampleStruct, run_demo};
pub use error::HarnessError;
pub use stress::{StressConfig, StressSummary, XorShift64, run_stress};
