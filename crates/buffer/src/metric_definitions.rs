// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

/// Optional to have but adds description/help message to the metrics emitted to
/// the metrics' sink.
use metrics::{Unit, describe_counter, describe_gauge};

pub const BUFFER_ENQUEUED_MESSAGES: &str = "weir.buffer.enqueued_messages.total";
pub const BUFFER_PRODUCER_PARKED: &str = "weir.buffer.producer_parked.total";
pub const BUFFER_BATCHES_TAKEN: &str = "weir.buffer.batches_taken.total";
pub const BUFFER_QUEUE_USED_BYTES: &str = "weir.buffer.queue.used_bytes";
pub const BUFFER_QUEUE_RECORDS: &str = "weir.buffer.queue.records";
pub const BUFFER_ALLOCATED_BYTES: &str = "weir.buffer.allocated_bytes";

pub(crate) fn describe_metrics() {
    describe_counter!(
        BUFFER_ENQUEUED_MESSAGES,
        Unit::Count,
        "Number of messages admitted into stream queues"
    );

    describe_counter!(
        BUFFER_PRODUCER_PARKED,
        Unit::Count,
        "Number of times a producer parked waiting for buffer memory"
    );

    describe_counter!(
        BUFFER_BATCHES_TAKEN,
        Unit::Count,
        "Number of batches handed to upload workers"
    );

    describe_gauge!(
        BUFFER_QUEUE_USED_BYTES,
        Unit::Bytes,
        "Resident bytes per stream queue"
    );

    describe_gauge!(
        BUFFER_QUEUE_RECORDS,
        Unit::Count,
        "Resident messages per stream queue"
    );

    describe_gauge!(
        BUFFER_ALLOCATED_BYTES,
        Unit::Bytes,
        "Bytes outstanding against the global memory budget"
    );
}
