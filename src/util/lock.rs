//! Poison-tolerant access to std locks.
//!
//! State guarded by these locks is kept consistent before any call that could
//! panic, so a poisoned lock is recovered and logged instead of propagated.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::warn;

fn recovered<G>(poisoned: PoisonError<G>, target: &'static str, op: &'static str) -> G {
    warn!(
        op,
        target_module = target,
        lock_kind = "mutex.lock",
        result = "poisoned_recovered",
        "Recovered from poisoned lock"
    );
    poisoned.into_inner()
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock()
        .unwrap_or_else(|poisoned| recovered(poisoned, target, op))
}
