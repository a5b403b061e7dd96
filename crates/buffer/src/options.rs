// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::num::NonZeroUsize;
use std::sync::LazyLock;
use std::time::Duration;

use serde_with::serde_as;
use sysinfo::System;

/// Fraction of available process memory used when no explicit global limit is
/// configured.
const DEFAULT_MEMORY_RATIO: f64 = 0.8;

/// Reading system memory is expensive, so it is sampled once per process.
static AVAILABLE_MEMORY: LazyLock<u64> = LazyLock::new(|| {
    let mut sys = System::new();
    sys.refresh_memory();
    match sys.cgroup_limits() {
        Some(limits) => limits.free_memory,
        None => sys.available_memory(),
    }
});

/// # Buffer options
#[serde_as]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, derive_builder::Builder)]
#[cfg_attr(feature = "options_schema", derive(schemars::JsonSchema))]
#[cfg_attr(feature = "options_schema", schemars(rename = "BufferOptions", default))]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct BufferOptions {
    /// # Global memory limit
    ///
    /// Ceiling on the total bytes the fabric may hold across all stream
    /// queues and in-flight batches. If unset, it defaults to 80% of the
    /// memory available to the process (cgroup-aware).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(strip_option))]
    global_memory_limit: Option<NonZeroUsize>,

    /// # Block size
    ///
    /// Granularity of the global allocator. Queue capacity only ever grows by
    /// whole blocks (the last grant before the limit may be partial).
    block_size: NonZeroUsize,

    /// # Initial queue capacity
    ///
    /// Capacity requested for a queue on first use. Defaults to one block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(setter(strip_option))]
    initial_queue_capacity: Option<NonZeroUsize>,

    /// # Maximum concurrent streams
    ///
    /// Divisor computing the per-stream capacity ceiling: no single queue may
    /// grow past `global-memory-limit / max-concurrent-streams`, so one
    /// stream can never consume the entire budget.
    max_concurrent_streams: NonZeroUsize,

    /// # Telemetry interval
    ///
    /// Cadence of the periodic queue-snapshot debug log.
    ///
    /// Can be configured using the [`humantime`](https://docs.rs/humantime/latest/humantime/fn.parse_duration.html) format.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    #[cfg_attr(feature = "options_schema", schemars(with = "String"))]
    telemetry_interval: humantime::Duration,

    /// # Poll interval
    ///
    /// Per-attempt wait of the consumer's inner poll loop, and the bounded
    /// sleep of a parked producer.
    ///
    /// Can be configured using the [`humantime`](https://docs.rs/humantime/latest/humantime/fn.parse_duration.html) format.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    #[cfg_attr(feature = "options_schema", schemars(with = "String"))]
    poll_interval: humantime::Duration,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            global_memory_limit: None,
            block_size: NonZeroUsize::new(10 * 1024 * 1024).unwrap(), // 10MiB
            initial_queue_capacity: None,
            max_concurrent_streams: NonZeroUsize::new(10).unwrap(),
            telemetry_interval: Duration::from_secs(10).into(),
            poll_interval: Duration::from_millis(5).into(),
        }
    }
}

impl BufferOptions {
    /// The configured global limit, or the derived default.
    pub fn global_memory_limit(&self) -> usize {
        self.global_memory_limit.map(NonZeroUsize::get).unwrap_or_else(|| {
            (*AVAILABLE_MEMORY as f64 * DEFAULT_MEMORY_RATIO) as usize
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size.get()
    }

    pub fn initial_queue_capacity(&self) -> usize {
        self.initial_queue_capacity
            .map(NonZeroUsize::get)
            .unwrap_or_else(|| self.block_size.get())
    }

    pub fn max_concurrent_streams(&self) -> usize {
        self.max_concurrent_streams.get()
    }

    /// Per-stream capacity ceiling.
    pub fn max_queue_size_bytes(&self) -> usize {
        self.global_memory_limit() / self.max_concurrent_streams.get()
    }

    pub fn telemetry_interval(&self) -> Duration {
        *self.telemetry_interval
    }

    pub fn poll_interval(&self) -> Duration {
        *self.poll_interval
    }
}
