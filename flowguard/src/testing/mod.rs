//! Test doubles and helpers for code built on this crate.
//!
//! This module provides:
//! - Scripted completion providers
//! - Operations that fail a fixed number of times
//! - Assertions on resilience errors

mod assertions;
mod mocks;

pub use assertions::{
    assert_circuit_open, assert_exhausted_after, assert_operation_kind, assert_timed_out,
};
pub use mocks::{FlakyOperation, MockProvider, SlowProvider};
