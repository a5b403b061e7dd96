// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use metrics::counter;
use tracing::warn;

use weir_memory::MemoryLease;
use weir_types::{Message, StreamDescriptor};

use crate::error::BufferError;
use crate::manager::Shared;
use crate::metric_definitions::BUFFER_BATCHES_TAKEN;
use crate::queue::{PollOutcome, StreamQueue};

/// Consumer-side facade: assembles size-capped batches and exposes queue
/// metadata for orchestration and telemetry.
///
/// Cheaply cloneable; every upload worker owns a clone.
#[derive(Debug, Clone)]
pub struct BufferDequeue {
    pub(crate) shared: Arc<Shared>,
}

impl BufferDequeue {
    /// Assembles a batch of up to `bytes_target` bytes from the head of
    /// `descriptor`'s queue.
    ///
    /// Extraction is greedy: entries are pulled until the queue stays empty
    /// for one poll interval or the next entry would overflow the target.
    /// A would-overflow entry is never consumed, so a head entry larger than
    /// `bytes_target` yields an empty batch and the caller is expected to
    /// retry with a larger target.
    ///
    /// The returned batch holds `reserved` bytes against the global budget
    /// until it is closed.
    pub async fn take(
        &self,
        descriptor: &StreamDescriptor,
        bytes_target: usize,
    ) -> Result<Batch, BufferError> {
        let queue = self
            .shared
            .queue(descriptor)
            .ok_or_else(|| BufferError::UnknownStream(descriptor.clone()))?;

        let mut reserved = 0usize;
        let mut messages = VecDeque::new();
        while reserved < bytes_target {
            match queue
                .poll_within(self.shared.poll_interval, bytes_target - reserved)
                .await
            {
                Ok(PollOutcome::Entry(entry)) => {
                    reserved += entry.byte_size;
                    messages.push_back(entry.message);
                }
                Ok(PollOutcome::OverTarget) | Ok(PollOutcome::Empty) => break,
                Err(err) => {
                    if reserved > 0 {
                        // the partial batch must still be closed: its entries
                        // already took their bytes out of the queue's capacity
                        warn!(
                            stream = %descriptor,
                            dropped = messages.len(),
                            "Shutdown interrupted batch assembly, dropping partial batch"
                        );
                        self.shared.budget.adopt(reserved).release();
                    }
                    return Err(err);
                }
            }
        }

        counter!(BUFFER_BATCHES_TAKEN).increment(1);
        Ok(Batch::new(messages, self.shared.budget.adopt(reserved)))
    }

    /// Point-in-time snapshot of all live queues.
    pub fn list_buffers(&self) -> HashMap<StreamDescriptor, Arc<StreamQueue>> {
        self.shared
            .queues
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn queue_record_count(&self, descriptor: &StreamDescriptor) -> Result<usize, BufferError> {
        self.queue(descriptor).map(|queue| queue.size())
    }

    pub fn queue_byte_size(&self, descriptor: &StreamDescriptor) -> Result<usize, BufferError> {
        self.queue(descriptor).map(|queue| queue.used_bytes())
    }

    pub fn time_of_last_record(
        &self,
        descriptor: &StreamDescriptor,
    ) -> Result<Option<SystemTime>, BufferError> {
        self.queue(descriptor).map(|queue| queue.last_enqueue_time())
    }

    /// Total resident bytes across all queues. Queues are sampled one at a
    /// time; the sum is not atomic across them.
    pub fn total_byte_size(&self) -> usize {
        self.shared
            .queues
            .iter()
            .map(|entry| entry.value().used_bytes())
            .sum()
    }

    fn queue(&self, descriptor: &StreamDescriptor) -> Result<Arc<StreamQueue>, BufferError> {
        self.shared
            .queue(descriptor)
            .ok_or_else(|| BufferError::UnknownStream(descriptor.clone()))
    }
}

/// A size-bounded, single-pass collection of messages handed to an upload
/// worker.
///
/// The batch holds its `size_in_bytes` against the global budget until
/// [`close`](Self::close) runs; dropping an unclosed batch refunds as a
/// backstop. Lifecycle: `Open` → `Draining` (first [`data`](Self::data)
/// call) → `Closed`.
#[derive(Debug)]
pub struct Batch {
    messages: VecDeque<Message>,
    size_in_bytes: usize,
    lease: MemoryLease,
    state: BatchState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Open,
    Draining,
    Closed,
}

impl Batch {
    fn new(messages: VecDeque<Message>, lease: MemoryLease) -> Self {
        Self {
            size_in_bytes: lease.size(),
            messages,
            lease,
            state: BatchState::Open,
        }
    }

    /// Bytes this batch reserved on its source queue.
    pub fn size_in_bytes(&self) -> usize {
        self.size_in_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the remaining messages as a single-pass iterator.
    ///
    /// Fails once the batch has been closed.
    pub fn data(&mut self) -> Result<BatchData<'_>, BufferError> {
        match self.state {
            BatchState::Closed => Err(BufferError::BatchAlreadyClosed),
            BatchState::Open | BatchState::Draining => {
                self.state = BatchState::Draining;
                Ok(BatchData {
                    messages: &mut self.messages,
                })
            }
        }
    }

    /// Refunds the batch's bytes to the budget. Idempotent; the refund
    /// happens exactly once.
    pub fn close(&mut self) {
        if self.state == BatchState::Closed {
            return;
        }
        self.state = BatchState::Closed;
        self.messages.clear();
        self.lease.release();
    }
}

/// Single-pass iterator over a batch's messages.
///
/// Consumed messages are gone: a second `data()` call only yields what was
/// not yet read.
#[derive(Debug)]
pub struct BatchData<'a> {
    messages: &'a mut VecDeque<Message>,
}

impl Iterator for BatchData<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.messages.len(), Some(self.messages.len()))
    }
}

impl ExactSizeIterator for BatchData<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use weir_memory::MemoryBudget;
    use weir_types::RecordPayload;

    fn message(id: u64) -> Message {
        Message::Record(RecordPayload::new(json!({ "id": id })))
    }

    /// A budget with one outstanding 1000-byte block, as if a queue had been
    /// granted it, and a batch that took over `bytes` of it.
    fn batch_of(budget: &MemoryBudget, ids: impl IntoIterator<Item = u64>, bytes: usize) -> Batch {
        assert_eq!(budget.request_block(), 1_000);
        let messages: VecDeque<_> = ids.into_iter().map(message).collect();
        Batch::new(messages, budget.adopt(bytes))
    }

    #[test]
    fn drains_in_order_and_closes() {
        let budget = MemoryBudget::new("test", 10_000, 1_000);
        let mut batch = batch_of(&budget, 0..3, 300);
        assert_eq!(batch.size_in_bytes(), 300);
        assert_eq!(budget.allocated(), 1_000);

        let ids: Vec<_> = batch
            .data()
            .unwrap()
            .map(|message| message.as_record().unwrap().data["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(0), json!(1), json!(2)]);

        batch.close();
        assert_eq!(budget.allocated(), 700);
    }

    #[test]
    fn data_is_single_pass() {
        let budget = MemoryBudget::new("test", 10_000, 1_000);
        let mut batch = batch_of(&budget, 0..3, 300);

        let first = batch.data().unwrap().next();
        assert!(first.is_some());
        // the second pass resumes where the first stopped
        assert_eq!(batch.data().unwrap().count(), 2);
        assert_eq!(batch.data().unwrap().count(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let budget = MemoryBudget::new("test", 10_000, 1_000);
        let mut batch = batch_of(&budget, 0..3, 300);

        batch.close();
        assert_eq!(budget.allocated(), 700);
        batch.close();
        assert_eq!(budget.allocated(), 700);
    }

    #[test]
    fn reading_a_closed_batch_fails() {
        let budget = MemoryBudget::new("test", 10_000, 1_000);
        let mut batch = batch_of(&budget, 0..3, 300);

        batch.close();
        assert!(matches!(
            batch.data(),
            Err(BufferError::BatchAlreadyClosed)
        ));
    }

    #[test]
    fn dropping_an_unclosed_batch_refunds() {
        let budget = MemoryBudget::new("test", 10_000, 1_000);
        {
            let _batch = batch_of(&budget, 0..3, 300);
            assert_eq!(budget.allocated(), 1_000);
        }
        assert_eq!(budget.allocated(), 700);
    }

    #[test]
    fn empty_batch_close_is_a_noop_refund() {
        let budget = MemoryBudget::new("test", 10_000, 1_000);
        let mut batch = batch_of(&budget, std::iter::empty(), 0);
        assert!(batch.is_empty());
        batch.close();
        assert_eq!(budget.allocated(), 1_000);
    }
}
