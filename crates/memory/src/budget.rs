// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Block-granting memory budget shared by all stream queues.
//!
//! The budget never blocks: [`MemoryBudget::request_block`] either grants up
//! to one block or returns `0`, and the caller decides whether to park.
//! Parked callers wait on [`MemoryBudget::released`], which completes the
//! next time memory is returned.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::trace;
use triomphe::Arc;

/// A memory budget dispensing capacity in fixed-size blocks.
///
/// Cheaply cloneable (uses `Arc` internally). `allocated` only ever grows
/// through [`request_block`](Self::request_block), so it never exceeds the
/// limit; [`adopt`](Self::adopt) hands responsibility for a refund to a
/// [`MemoryLease`] without changing the counter.
#[derive(Debug, Clone)]
pub struct MemoryBudget {
    name: &'static str,
    inner: Arc<BudgetInner>,
}

#[derive(Debug)]
struct BudgetInner {
    limit: usize,
    block_size: usize,
    allocated: AtomicUsize,
    released: Notify,
}

impl MemoryBudget {
    /// Creates a budget with the given byte ceiling and block granularity.
    pub fn new(name: &'static str, limit: usize, block_size: usize) -> Self {
        debug_assert!(block_size > 0, "block size must be non-zero");
        Self {
            name,
            inner: Arc::new(BudgetInner {
                limit,
                block_size: block_size.max(1),
                allocated: AtomicUsize::new(0),
                released: Notify::new(),
            }),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    #[inline]
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.inner.limit.saturating_sub(self.allocated())
    }

    /// Grants up to one block of capacity.
    ///
    /// Returns `min(block_size, limit - allocated)`, or `0` when the budget
    /// is exhausted. Never blocks; racing callers are arbitrated by the
    /// compare-and-swap, and a loser that finds no headroom left receives
    /// `0` and is expected to retry after waiting on [`released`](Self::released).
    pub fn request_block(&self) -> usize {
        let mut granted = 0;
        let result = self
            .inner
            .allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |allocated| {
                let headroom = self.inner.limit.saturating_sub(allocated);
                if headroom == 0 {
                    return None;
                }
                granted = headroom.min(self.inner.block_size);
                Some(allocated + granted)
            });
        match result {
            Ok(_) => {
                trace!(budget = self.name, granted, "Granted memory block");
                granted
            }
            Err(_) => 0,
        }
    }

    /// Returns `bytes` to the budget and wakes parked callers.
    ///
    /// Refunding more than the current outstanding is a programmer error;
    /// the counter saturates at zero rather than wrapping.
    pub fn free(&self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let prev = self
            .inner
            .allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |allocated| {
                Some(allocated.saturating_sub(bytes))
            })
            .expect("update always succeeds");
        if prev < bytes {
            debug_assert!(false, "refunded {bytes} bytes with only {prev} outstanding");
            tracing::error!(
                budget = self.name,
                bytes,
                outstanding = prev,
                "Refund exceeds outstanding allocation, clamping to zero"
            );
        }
        self.inner.released.notify_waiters();
    }

    /// Wraps `bytes` of already-outstanding allocation into a lease so they
    /// are freed exactly once.
    ///
    /// Used when allocated memory changes hands: entries drained into a
    /// batch carry bytes that were granted to their queue, and the batch
    /// becomes responsible for refunding them. The counter is not touched
    /// here; only releasing the lease does.
    pub fn adopt(&self, bytes: usize) -> MemoryLease {
        if bytes > 0 {
            trace!(budget = self.name, bytes, "Lease adopted outstanding bytes");
        }
        MemoryLease {
            budget: self.clone(),
            bytes,
        }
    }

    /// Completes the next time memory is returned to the budget.
    ///
    /// Registration happens on first poll of the returned future, so callers
    /// racing with a concurrent `free` should bound the wait and re-check.
    pub async fn released(&self) {
        self.inner.released.notified().await;
    }
}

/// Responsibility for refunding outstanding bytes to a [`MemoryBudget`].
///
/// The bytes are returned on [`release`](Self::release) or, as a backstop,
/// on drop.
#[must_use]
#[derive(Debug)]
pub struct MemoryLease {
    budget: MemoryBudget,
    bytes: usize,
}

impl MemoryLease {
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Refunds all bytes, returning how many were released.
    ///
    /// Idempotent: a second call is a no-op returning `0`.
    pub fn release(&mut self) -> usize {
        let bytes = self.bytes;
        if bytes > 0 {
            self.bytes = 0;
            self.budget.free(bytes);
        }
        bytes
    }
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.budget.free(self.bytes);
        }
    }
}

const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<MemoryBudget>();
    assert_send_sync::<MemoryLease>();
};
