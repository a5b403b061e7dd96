// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Process-wide memory budgeting for the buffering fabric.
//!
//! This crate provides:
//! - [`MemoryBudget`]: a byte allocator that hands out memory in fixed-size
//!   blocks and tracks the total outstanding against a hard ceiling
//! - [`MemoryLease`]: RAII guard for bytes held outside the queues (in-flight
//!   batches), returned to the budget on release or drop

mod budget;

pub use budget::{MemoryBudget, MemoryLease};
