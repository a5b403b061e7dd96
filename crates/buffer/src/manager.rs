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
use std::time::Duration;

use dashmap::DashMap;
use metrics::gauge;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use weir_memory::MemoryBudget;
use weir_types::StreamDescriptor;

use crate::dequeue::BufferDequeue;
use crate::enqueue::BufferEnqueue;
use crate::estimator::RecordSizeEstimator;
use crate::metric_definitions::{
    BUFFER_ALLOCATED_BYTES, BUFFER_QUEUE_RECORDS, BUFFER_QUEUE_USED_BYTES, describe_metrics,
};
use crate::options::BufferOptions;
use crate::queue::StreamQueue;

/// State shared between the manager and its enqueue/dequeue facades.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) queues: DashMap<StreamDescriptor, Arc<StreamQueue>>,
    pub(crate) budget: MemoryBudget,
    pub(crate) estimator: RecordSizeEstimator,
    pub(crate) initial_queue_capacity: usize,
    pub(crate) max_queue_bytes: usize,
    pub(crate) poll_interval: Duration,
}

impl Shared {
    pub(crate) fn queue(&self, descriptor: &StreamDescriptor) -> Option<Arc<StreamQueue>> {
        self.queues.get(descriptor).map(|queue| queue.clone())
    }

    /// Resolves the queue for `descriptor`, creating it on first use.
    ///
    /// Creation is atomic over the registry entry, so concurrent first-writes
    /// observe a single queue. The initial capacity is debited from the
    /// budget and bounded by the per-stream ceiling, like every later grow;
    /// under an exhausted budget the queue starts at zero capacity and its
    /// producer parks until grants become available.
    pub(crate) fn queue_or_create(&self, descriptor: &StreamDescriptor) -> Arc<StreamQueue> {
        if let Some(queue) = self.queues.get(descriptor) {
            return queue.clone();
        }
        self.queues
            .entry(descriptor.clone())
            .or_insert_with(|| {
                let granted = self.budget.request_block();
                let capacity = granted
                    .min(self.initial_queue_capacity)
                    .min(self.max_queue_bytes);
                if granted > capacity {
                    self.budget.free(granted - capacity);
                }
                debug!(stream = %descriptor, capacity, "Created stream queue");
                Arc::new(StreamQueue::new(capacity))
            })
            .clone()
    }
}

/// Owner of the buffering fabric: the per-stream queue registry, the global
/// memory budget, and the periodic telemetry task.
///
/// Producers and consumers interact through the [`BufferEnqueue`] and
/// [`BufferDequeue`] handles. Shutdown ordering is external: upload workers
/// must drain and close their batches before [`close`](Self::close) runs.
#[derive(Debug)]
pub struct BufferManager {
    shared: Arc<Shared>,
    enqueue: BufferEnqueue,
    dequeue: BufferDequeue,
    telemetry: JoinHandle<()>,
}

impl BufferManager {
    /// Creates the fabric and starts its telemetry task. Must be called from
    /// within a tokio runtime.
    pub fn new(options: BufferOptions) -> Self {
        describe_metrics();

        let global_limit = options.global_memory_limit();
        let budget = MemoryBudget::new("buffer", global_limit, options.block_size());
        let shared = Arc::new(Shared {
            queues: DashMap::new(),
            budget,
            estimator: RecordSizeEstimator::new(),
            initial_queue_capacity: options.initial_queue_capacity(),
            max_queue_bytes: options.max_queue_size_bytes(),
            poll_interval: options.poll_interval(),
        });

        let telemetry = tokio::spawn(telemetry_loop(
            shared.clone(),
            options.telemetry_interval(),
        ));

        info!(
            global_limit,
            block_size = options.block_size(),
            max_queue_bytes = shared.max_queue_bytes,
            "Buffer manager started"
        );

        Self {
            enqueue: BufferEnqueue {
                shared: shared.clone(),
            },
            dequeue: BufferDequeue {
                shared: shared.clone(),
            },
            shared,
            telemetry,
        }
    }

    pub fn enqueue(&self) -> &BufferEnqueue {
        &self.enqueue
    }

    pub fn dequeue(&self) -> &BufferDequeue {
        &self.dequeue
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.shared.budget
    }

    /// Tears the fabric down: closes every queue, drops whatever is still
    /// resident, and stops the telemetry task.
    ///
    /// Dropped entries are not refunded anywhere; the process is terminating
    /// and the budget goes away with it. Call only after all upload workers
    /// have drained and closed their batches.
    pub fn close(self) {
        for entry in self.shared.queues.iter() {
            entry.value().clear();
            entry.value().close();
        }
        self.telemetry.abort();
        info!("Buffers cleared");
    }
}

/// Samples every queue and emits an observability record on each tick.
async fn telemetry_loop(shared: Arc<Shared>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        for entry in shared.queues.iter() {
            let (descriptor, queue) = entry.pair();
            let records = queue.size();
            let used_bytes = queue.used_bytes();
            debug!(
                stream = %descriptor,
                records,
                used_bytes,
                capacity_bytes = queue.capacity_bytes(),
                "Queue snapshot"
            );
            let stream_label = descriptor.to_string();
            gauge!(BUFFER_QUEUE_RECORDS, "stream" => stream_label.clone()).set(records as f64);
            gauge!(BUFFER_QUEUE_USED_BYTES, "stream" => stream_label).set(used_bytes as f64);
        }
        gauge!(BUFFER_ALLOCATED_BYTES).set(shared.budget.allocated() as f64);
    }
}
