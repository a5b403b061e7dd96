// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The unit of data flowing through the buffering fabric.
///
/// The fabric treats messages as opaque immutable values; only the kind and,
/// for records, the payload's estimated serialized size are ever inspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Message {
    Record(RecordPayload),
    State(StatePayload),
    Control(ControlPayload),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Record(_) => MessageKind::Record,
            Message::State(_) => MessageKind::State,
            Message::Control(_) => MessageKind::Control,
        }
    }

    /// Returns the record payload for RECORD messages, `None` otherwise.
    pub fn as_record(&self) -> Option<&RecordPayload> {
        match self {
            Message::Record(record) => Some(record),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Record,
    State,
    Control,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Record => write!(f, "RECORD"),
            MessageKind::State => write!(f, "STATE"),
            MessageKind::Control => write!(f, "CONTROL"),
        }
    }
}

/// A single decoded record, as produced by the upstream parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPayload {
    pub data: Value,
    /// Producer-assigned emission time, unix millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emitted_at: Option<u64>,
}

impl RecordPayload {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            emitted_at: None,
        }
    }
}

/// An out-of-band state checkpoint carried alongside records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatePayload {
    pub data: Value,
}

/// Any other control-plane message the fabric forwards untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPayload {
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn kind_discriminator() {
        let record = Message::Record(RecordPayload::new(json!({"id": 1})));
        let state = Message::State(StatePayload {
            data: json!({"cursor": "abc"}),
        });
        assert_eq!(record.kind(), MessageKind::Record);
        assert_eq!(state.kind(), MessageKind::State);
        assert!(record.as_record().is_some());
        assert!(state.as_record().is_none());
    }

    #[test]
    fn kind_display() {
        assert_eq!(MessageKind::Record.to_string(), "RECORD");
        assert_eq!(MessageKind::State.to_string(), "STATE");
    }
}
