// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use dashmap::DashMap;
use weir_types::{Message, RecordPayload, StreamDescriptor};

/// Nominal size charged for non-RECORD messages. They carry out-of-band
/// control data whose true size is small and not worth estimating.
pub const NON_RECORD_MESSAGE_SIZE: usize = 1024;

/// Serializing every record to measure it would defeat the point of an
/// estimate, so streams are re-sampled once every this many records.
const SAMPLE_EVERY: usize = 20;

/// Rolling per-stream estimate of serialized record size.
///
/// Record payloads reach the fabric as decoded JSON; their wire size is only
/// known by serializing them. The estimator samples one record out of
/// [`SAMPLE_EVERY`] per stream and blends the measurement into the current
/// estimate, which charges the records in between and keeps tracking payload
/// size drift no matter how long the stream has been running.
#[derive(Debug, Default)]
pub struct RecordSizeEstimator {
    streams: DashMap<StreamDescriptor, StreamStats>,
}

#[derive(Debug, Default)]
struct StreamStats {
    average: usize,
    samples: u64,
    until_next_sample: usize,
}

impl RecordSizeEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte size to charge for `message` on `descriptor`'s queue.
    pub fn message_size(&self, descriptor: &StreamDescriptor, message: &Message) -> usize {
        match message.as_record() {
            Some(record) => self.record_size(descriptor, record),
            None => NON_RECORD_MESSAGE_SIZE,
        }
    }

    /// Estimated serialized size of a single record.
    pub fn record_size(&self, descriptor: &StreamDescriptor, record: &RecordPayload) -> usize {
        let mut stats = self.streams.entry(descriptor.clone()).or_default();
        if stats.until_next_sample == 0 {
            let measured = serde_json::to_vec(&record.data)
                .map(|bytes| bytes.len())
                .unwrap_or(stats.average);
            stats.samples += 1;
            stats.average = smoothed_average(stats.average, measured, stats.samples);
            stats.until_next_sample = SAMPLE_EVERY - 1;
        } else {
            stats.until_next_sample -= 1;
        }
        // zero-sized entries would never shrink a batch target
        stats.average.max(1)
    }
}

/// Exponential smoothing with equal weight on the current estimate and the
/// new sample, so the estimate keeps adapting however many samples a stream
/// has seen.
fn smoothed_average(average: usize, measured: usize, samples: u64) -> usize {
    if samples <= 1 {
        return measured;
    }
    (average + measured) / 2
}
