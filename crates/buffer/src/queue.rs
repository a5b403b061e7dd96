// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Byte-accounted FIFO queue for a single stream.

use std::collections::VecDeque;
use std::pin::pin;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

use weir_types::Message;

use crate::error::BufferError;

/// A message admitted into a queue, paired with the byte size it was charged.
///
/// The size recorded here is exactly what the queue debited from its capacity
/// and what the consumer refunds once the entry's batch closes.
#[derive(Debug)]
pub struct QueueEntry {
    pub message: Message,
    pub byte_size: usize,
}

/// Outcome of a size-bounded poll attempt.
#[derive(Debug)]
pub enum PollOutcome {
    /// The head entry, removed from the queue.
    Entry(QueueEntry),
    /// The head entry would overflow the caller's remaining target. It stays
    /// buffered and is not consumed.
    OverTarget,
    /// No entry became available within the timeout.
    Empty,
}

/// Blocking FIFO queue accounted in bytes rather than element count.
///
/// `offer` never blocks and never grows capacity; growing is the enqueue
/// facade's job. `poll` waits up to a per-attempt timeout for an entry and
/// transfers the entry's bytes out of the queue's capacity: the consumer
/// becomes responsible for refunding them to the global budget once its
/// batch closes.
///
/// Ordering is strict FIFO across concurrent producers and consumers,
/// serialized by the internal mutex.
#[derive(Debug)]
pub struct StreamQueue {
    state: Mutex<QueueState>,
    /// Signalled on every successful offer.
    enqueued: Notify,
    /// Signalled whenever bytes leave the queue.
    drained: Notify,
}

#[derive(Debug)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    capacity_bytes: usize,
    used_bytes: usize,
    last_enqueue: Option<SystemTime>,
    closed: bool,
}

impl StreamQueue {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                capacity_bytes,
                used_bytes: 0,
                last_enqueue: None,
                closed: false,
            }),
            enqueued: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Appends `message` iff the queue has `byte_size` of headroom left.
    ///
    /// Returns the message on rejection so the caller can retry after growing
    /// capacity or waiting for a consumer to drain.
    pub fn offer(&self, message: Message, byte_size: usize) -> Result<(), Message> {
        {
            let mut state = self.state.lock();
            if state.closed || state.used_bytes + byte_size > state.capacity_bytes {
                return Err(message);
            }
            state.used_bytes += byte_size;
            state.last_enqueue = Some(SystemTime::now());
            state.entries.push_back(QueueEntry { message, byte_size });
        }
        self.enqueued.notify_one();
        Ok(())
    }

    /// Removes and returns the head entry, waiting up to `timeout` for one to
    /// arrive.
    ///
    /// Returns `Ok(None)` when the timeout elapses on an empty queue and
    /// [`BufferError::Shutdown`] once the queue has been closed.
    pub async fn poll(&self, timeout: Duration) -> Result<Option<QueueEntry>, BufferError> {
        match self.poll_within(timeout, usize::MAX).await? {
            PollOutcome::Entry(entry) => Ok(Some(entry)),
            PollOutcome::OverTarget | PollOutcome::Empty => Ok(None),
        }
    }

    /// Like [`poll`](Self::poll), but only consumes the head entry if its
    /// size fits within `max_bytes`.
    ///
    /// An oversized head is reported as [`PollOutcome::OverTarget`] without
    /// being removed, so no entry is ever lost to a too-small batch target.
    /// A consumed entry takes its bytes of capacity with it (see the type
    /// docs); the caller must eventually refund them to the budget.
    pub async fn poll_within(
        &self,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<PollOutcome, BufferError> {
        let deadline = Instant::now() + timeout;
        // Use enable() before checking the queue to prevent lost wakeups
        let mut notified = pin!(self.enqueued.notified());

        loop {
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(BufferError::Shutdown);
                }
                if let Some(head) = state.entries.front() {
                    if head.byte_size > max_bytes {
                        return Ok(PollOutcome::OverTarget);
                    }
                    let entry = state.entries.pop_front().expect("head entry exists");
                    state.used_bytes -= entry.byte_size;
                    // the entry's bytes leave with it; capacity >= used still
                    // holds because the entry was resident
                    state.capacity_bytes -= entry.byte_size;
                    drop(state);
                    self.drained.notify_waiters();
                    return Ok(PollOutcome::Entry(entry));
                }
            }

            if tokio::time::timeout_at(deadline, notified.as_mut())
                .await
                .is_err()
            {
                return Ok(PollOutcome::Empty);
            }
            notified.set(self.enqueued.notified());
        }
    }

    /// Completes the next time bytes leave the queue.
    ///
    /// Used by parked producers; the wait must be bounded by the caller since
    /// registration only happens on first poll of the returned future.
    pub(crate) async fn drained(&self) {
        self.drained.notified().await;
    }

    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn used_bytes(&self) -> usize {
        self.state.lock().used_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.state.lock().capacity_bytes
    }

    pub fn last_enqueue_time(&self) -> Option<SystemTime> {
        self.state.lock().last_enqueue
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Raises the queue's capacity. Capacity is monotonic: attempting to
    /// lower it is a programmer error and is ignored.
    pub fn set_capacity(&self, capacity_bytes: usize) {
        let mut state = self.state.lock();
        if capacity_bytes < state.capacity_bytes {
            debug_assert!(
                false,
                "capacity lowered from {} to {capacity_bytes}",
                state.capacity_bytes
            );
            warn!(
                current = state.capacity_bytes,
                requested = capacity_bytes,
                "Ignoring attempt to lower queue capacity"
            );
            return;
        }
        state.capacity_bytes = capacity_bytes;
    }

    /// Raises capacity by up to `additional` bytes, clamped to `ceiling`.
    ///
    /// Returns the bytes actually applied, so the caller can refund the
    /// unused remainder of a block grant. Atomic with respect to concurrent
    /// growers.
    pub(crate) fn grow_capacity(&self, additional: usize, ceiling: usize) -> usize {
        let mut state = self.state.lock();
        let target = state
            .capacity_bytes
            .saturating_add(additional)
            .min(ceiling.max(state.capacity_bytes));
        let applied = target - state.capacity_bytes;
        state.capacity_bytes = target;
        applied
    }

    /// Drops all resident entries without refunding their bytes anywhere.
    ///
    /// Shutdown-only: the process is terminating and the budget goes away
    /// with it.
    pub fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.entries.clear();
            state.used_bytes = 0;
        }
        self.drained.notify_waiters();
    }

    /// Marks the queue closed and wakes pending pollers and parked producers.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.enqueued.notify_waiters();
        self.drained.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use weir_types::RecordPayload;

    const POLL: Duration = Duration::from_millis(5);

    fn record(id: u64) -> Message {
        Message::Record(RecordPayload::new(json!({ "id": id })))
    }

    #[tokio::test]
    async fn offer_and_poll_account_bytes() {
        let queue = StreamQueue::new(1024);
        assert!(queue.offer(record(1), 300).is_ok());
        assert!(queue.offer(record(2), 300).is_ok());
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.used_bytes(), 600);
        assert!(queue.last_enqueue_time().is_some());

        let entry = queue.poll(POLL).await.unwrap().unwrap();
        assert_eq!(entry.byte_size, 300);
        assert_eq!(queue.used_bytes(), 300);
        let entry = queue.poll(POLL).await.unwrap().unwrap();
        assert_eq!(entry.byte_size, 300);
        assert_eq!(queue.used_bytes(), 0);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn offer_rejects_beyond_capacity() {
        let queue = StreamQueue::new(500);
        assert!(queue.offer(record(1), 300).is_ok());
        let rejected = queue.offer(record(2), 300);
        assert!(rejected.is_err());
        assert_eq!(queue.used_bytes(), 300);

        // the polled entry takes its 300 bytes of capacity with it
        queue.poll(POLL).await.unwrap().unwrap();
        assert_eq!(queue.capacity_bytes(), 200);
        assert!(queue.offer(rejected.unwrap_err(), 300).is_err());
        assert!(queue.offer(record(3), 200).is_ok());
    }

    #[tokio::test]
    async fn poll_preserves_fifo_order() {
        let queue = StreamQueue::new(10_000);
        for id in 0..10 {
            assert!(queue.offer(record(id), 10).is_ok());
        }
        for id in 0..10 {
            let entry = queue.poll(POLL).await.unwrap().unwrap();
            assert_eq!(entry.message.as_record().unwrap().data["id"], json!(id));
        }
    }

    #[tokio::test]
    async fn poll_times_out_on_empty_queue() {
        let queue = StreamQueue::new(1024);
        let started = std::time::Instant::now();
        assert!(queue.poll(POLL).await.unwrap().is_none());
        assert!(started.elapsed() >= POLL);
    }

    #[tokio::test]
    async fn poll_wakes_on_concurrent_offer() {
        let queue = std::sync::Arc::new(StreamQueue::new(1024));

        let poller = queue.clone();
        let handle =
            tokio::spawn(async move { poller.poll(Duration::from_secs(5)).await.unwrap() });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.offer(record(1), 100).is_ok());

        let entry = handle.await.unwrap().unwrap();
        assert_eq!(entry.byte_size, 100);
    }

    #[tokio::test]
    async fn oversized_head_is_not_consumed() {
        let queue = StreamQueue::new(100_000);
        assert!(queue.offer(record(1), 50 * 1024).is_ok());

        let outcome = queue.poll_within(POLL, 40 * 1024).await.unwrap();
        assert!(matches!(outcome, PollOutcome::OverTarget));
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.used_bytes(), 50 * 1024);

        // a large enough limit consumes it, capacity leaving with the entry
        let outcome = queue.poll_within(POLL, 60 * 1024).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Entry(_)));
        assert_eq!(queue.used_bytes(), 0);
        assert_eq!(queue.capacity_bytes(), 50 * 1024);
    }

    #[tokio::test]
    async fn close_interrupts_pending_poll() {
        let queue = std::sync::Arc::new(StreamQueue::new(1024));

        let poller = queue.clone();
        let handle = tokio::spawn(async move { poller.poll(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        assert!(matches!(handle.await.unwrap(), Err(BufferError::Shutdown)));
        assert!(queue.offer(record(1), 100).is_err());
    }

    #[tokio::test]
    async fn clear_drops_entries_without_touching_capacity() {
        let queue = StreamQueue::new(1024);
        assert!(queue.offer(record(1), 100).is_ok());
        assert!(queue.offer(record(2), 100).is_ok());

        queue.clear();
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.used_bytes(), 0);
        assert_eq!(queue.capacity_bytes(), 1024);
    }

    #[test]
    fn grow_capacity_clamps_to_ceiling() {
        let queue = StreamQueue::new(1000);
        assert_eq!(queue.grow_capacity(500, 1200), 200);
        assert_eq!(queue.capacity_bytes(), 1200);
        // at the ceiling nothing more is applied
        assert_eq!(queue.grow_capacity(500, 1200), 0);
        assert_eq!(queue.capacity_bytes(), 1200);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "capacity lowered"))]
    fn lowering_capacity_is_a_programmer_error() {
        let queue = StreamQueue::new(1000);
        queue.set_capacity(500);
        // hardened builds ignore the request
        assert_eq!(queue.capacity_bytes(), 1000);
    }
}
