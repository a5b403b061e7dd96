// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;

use metrics::counter;
use tracing::trace;

use weir_types::{Message, StreamDescriptor};

use crate::error::BufferError;
use crate::manager::Shared;
use crate::metric_definitions::{BUFFER_ENQUEUED_MESSAGES, BUFFER_PRODUCER_PARKED};

/// Producer-side facade: routes messages into their stream's queue, growing
/// queue capacity on back-pressure and blocking only when the global budget
/// is exhausted or the stream hit its capacity ceiling.
///
/// Cheaply cloneable; every producer task owns a clone.
#[derive(Debug, Clone)]
pub struct BufferEnqueue {
    pub(crate) shared: Arc<Shared>,
}

impl BufferEnqueue {
    /// Admits `message` into the queue of `descriptor`, creating the queue on
    /// first use.
    ///
    /// Blocks (asynchronously) while the queue is full and no further block
    /// can be granted, until a consumer drains entries or returns memory to
    /// the budget. Fails only when the fabric is shutting down.
    pub async fn add_record(
        &self,
        descriptor: &StreamDescriptor,
        message: Message,
    ) -> Result<(), BufferError> {
        let queue = self.shared.queue_or_create(descriptor);
        let byte_size = self.shared.estimator.message_size(descriptor, &message);

        let mut message = message;
        loop {
            if queue.is_closed() {
                return Err(BufferError::Shutdown);
            }

            message = match queue.offer(message, byte_size) {
                Ok(()) => {
                    counter!(BUFFER_ENQUEUED_MESSAGES).increment(1);
                    return Ok(());
                }
                Err(returned) => returned,
            };

            // Queue is full. Grow it by one block unless it already reached
            // the per-stream ceiling.
            if queue.capacity_bytes() < self.shared.max_queue_bytes {
                let granted = self.shared.budget.request_block();
                if granted > 0 {
                    let applied = queue.grow_capacity(granted, self.shared.max_queue_bytes);
                    if applied < granted {
                        // ceiling clamp, return the unusable remainder
                        self.shared.budget.free(granted - applied);
                    }
                    if applied > 0 {
                        continue;
                    }
                }
            }

            // Budget exhausted or ceiling reached: park until a consumer
            // frees memory or drains this queue. The sleep bounds the wait
            // against wakeups lost between the failed offer and here.
            trace!(
                stream = %descriptor,
                byte_size,
                capacity = queue.capacity_bytes(),
                "Waiting for buffer memory to become available"
            );
            counter!(BUFFER_PRODUCER_PARKED).increment(1);
            tokio::select! {
                _ = self.shared.budget.released() => {}
                _ = queue.drained() => {}
                _ = tokio::time::sleep(self.shared.poll_interval) => {}
            }
        }
    }
}
