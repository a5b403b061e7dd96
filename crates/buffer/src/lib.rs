// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Per-stream, memory-bounded buffering fabric.
//!
//! The fabric sits between many record-producing tasks and a pool of
//! batch-uploading consumers. Producers push messages tagged with a
//! [`StreamDescriptor`](weir_types::StreamDescriptor) through
//! [`BufferEnqueue`]; consumers drain each stream as size-bounded
//! [`Batch`]es through [`BufferDequeue`]. A single
//! [`MemoryBudget`](weir_memory::MemoryBudget), shared dynamically across an
//! open set of per-stream queues, bounds the total resident bytes: queues
//! grow in fixed-size blocks on back-pressure, producers park when no block
//! can be granted, and closing a batch returns its bytes to the pool.
//!
//! ```no_run
//! use weir_buffer::{BufferManager, BufferOptions};
//! use weir_types::{Message, RecordPayload, StreamDescriptor};
//!
//! # async fn example() -> Result<(), weir_buffer::BufferError> {
//! let manager = BufferManager::new(BufferOptions::default());
//! let stream = StreamDescriptor::new("users");
//!
//! let record = Message::Record(RecordPayload::new(serde_json::json!({"id": 1})));
//! manager.enqueue().add_record(&stream, record).await?;
//!
//! let mut batch = manager.dequeue().take(&stream, 32 * 1024).await?;
//! for message in batch.data()? {
//!     // hand off to the upload worker
//!     let _ = message;
//! }
//! batch.close();
//! # Ok(())
//! # }
//! ```

mod dequeue;
mod enqueue;
mod error;
mod estimator;
mod manager;
mod metric_definitions;
mod options;
mod queue;

pub use dequeue::{Batch, BatchData, BufferDequeue};
pub use enqueue::BufferEnqueue;
pub use error::BufferError;
pub use estimator::{NON_RECORD_MESSAGE_SIZE, RecordSizeEstimator};
pub use manager::BufferManager;
pub use options::{BufferOptions, BufferOptionsBuilder};
pub use queue::{PollOutcome, QueueEntry, StreamQueue};
