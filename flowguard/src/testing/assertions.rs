//! Assertions on resilience errors.

use crate::errors::{ErrorKind, ResilienceError, ResilienceResult};
use std::fmt::Debug;

/// Asserts that the result is a circuit-open rejection.
///
/// # Panics
///
/// Panics if the result is not a [`ResilienceError::CircuitOpen`].
pub fn assert_circuit_open<T: Debug>(result: &ResilienceResult<T>) {
    match result {
        Err(ResilienceError::CircuitOpen { .. }) => {}
        other => panic!("Expected circuit open, got {other:?}"),
    }
}

/// Asserts that the result is a timeout.
///
/// # Panics
///
/// Panics if the result is not a [`ResilienceError::Timeout`].
pub fn assert_timed_out<T: Debug>(result: &ResilienceResult<T>) {
    match result {
        Err(e) if e.is_timeout() => {}
        other => panic!("Expected timeout, got {other:?}"),
    }
}

/// Asserts that retries ran out after exactly `attempts` attempts and
/// returns the last error.
///
/// # Panics
///
/// Panics if the result is not [`ResilienceError::RetriesExhausted`] or
/// the attempt count differs.
pub fn assert_exhausted_after<T: Debug>(result: &ResilienceResult<T>, attempts: u32) -> &ResilienceError {
    match result {
        Err(ResilienceError::RetriesExhausted { attempts: made, last }) => {
            assert_eq!(*made, attempts, "Expected {attempts} attempts, got {made}");
            last
        }
        other => panic!("Expected retries exhausted, got {other:?}"),
    }
}

/// Asserts that the root cause is an operation error of `kind`.
///
/// # Panics
///
/// Panics if the result is a success or the root cause has another kind.
pub fn assert_operation_kind<T: Debug>(result: &ResilienceResult<T>, kind: ErrorKind) {
    match result {
        Err(e) => match e.root_cause() {
            ResilienceError::Operation(op) => {
                assert_eq!(op.kind, kind, "Expected {kind} error, got {}", op.kind);
            }
            other => panic!("Expected operation error, got {other:?}"),
        },
        Ok(value) => panic!("Expected error, got Ok({value:?})"),
    }
}
