// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Shared value types for the weir buffering fabric.
//!
//! This crate provides:
//! - [`StreamDescriptor`]: the identity of a logical stream, used to partition
//!   buffered messages into per-stream queues
//! - [`Message`]: the unit of data flowing through the fabric

mod descriptor;
mod message;

pub use descriptor::StreamDescriptor;
pub use message::{ControlPayload, Message, MessageKind, RecordPayload, StatePayload};
