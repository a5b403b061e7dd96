// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use weir_types::StreamDescriptor;

/// Errors surfaced by the buffering fabric.
///
/// Budget exhaustion and the per-stream capacity ceiling are not part of this
/// taxonomy: both are recovered internally by parking the producer until a
/// consumer returns memory.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// No queue exists for the descriptor, no record was ever enqueued for it.
    #[error("unknown stream '{0}'")]
    UnknownStream(StreamDescriptor),
    /// The fabric is shutting down; the pending operation was interrupted.
    #[error("the buffer is shutting down")]
    Shutdown,
    /// The batch was closed; its data can no longer be read.
    #[error("the batch has already been closed")]
    BatchAlreadyClosed,
}
