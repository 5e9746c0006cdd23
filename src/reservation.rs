use std::sync::atomic::{AtomicI64, Ordering};

use crate::arbiter::MemoryArbiter;

/// Private memory credit an operation carries into admission checks.
///
/// The arbiter never owns or enumerates holders; it only asks the caller's
/// holder to give up part of its balance when the owning operation allocates.
pub trait ReservationHolder {
    /// Consume up to `bytes` from the holder's balance, returning the amount
    /// actually consumed (`0..=bytes`). Must be thread-safe and must never
    /// drive the balance negative.
    fn consume(&self, bytes: i64) -> i64;
}

/// The canonical holder: an atomic balance an operator threads through its
/// allocation sites after pre-reserving from the shared ledger.
#[derive(Debug, Default)]
pub struct OperatorReservation {
    balance: AtomicI64,
}

impl OperatorReservation {
    pub fn new(bytes: i64) -> Self {
        Self {
            balance: AtomicI64::new(bytes.max(0)),
        }
    }

    /// Reserve `bytes` from the shared ledger, or `None` when the process is
    /// already too close to its soft thresholds to promise more memory.
    pub fn try_new(arbiter: &MemoryArbiter, bytes: i64) -> Option<Self> {
        if arbiter.try_reserve_process_memory(bytes) {
            Some(Self::new(bytes))
        } else {
            None
        }
    }

    /// Unconditional top-up, ledger included. Pairs with
    /// [`MemoryArbiter::reserve_process_memory`].
    pub fn grow(&self, arbiter: &MemoryArbiter, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        arbiter.reserve_process_memory(bytes);
        self.balance.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn remaining(&self) -> i64 {
        self.balance.load(Ordering::Relaxed)
    }

    /// Return the unspent balance to the shared ledger when the operation
    /// finishes. Idempotent.
    pub fn release_to(&self, arbiter: &MemoryArbiter) {
        let left = self.balance.swap(0, Ordering::Relaxed);
        if left > 0 {
            arbiter.shrink_process_reserved(left);
        }
    }
}

impl ReservationHolder for OperatorReservation {
    fn consume(&self, bytes: i64) -> i64 {
        if bytes <= 0 {
            return 0;
        }
        let mut current = self.balance.load(Ordering::Relaxed);
        loop {
            if current <= 0 {
                return 0;
            }
            let take = bytes.min(current);
            match self.balance.compare_exchange_weak(
                current,
                current - take,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return take,
                Err(observed) => current = observed,
            }
        }
    }
}
