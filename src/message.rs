//! # Value Grammar & Wire Message Schema
//!
//! Per the REDESIGN FLAGS (§9 of the design): the original system's codec can
//! deserialize arbitrary in-process objects, which is a security hazard and
//! non-portable. This module fixes a bounded, typed value grammar instead —
//! JSON-equivalent (null/bool/number/string/array/object) plus a raw-bytes
//! escape hatch for payloads the grammar can't represent faithfully — and the
//! three wire message shapes from §4.2.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::{NodeId, RequestId, Timestamp};

/// A value carried verbatim through the Store and the wire protocol.
///
/// Restricted to a JSON-equivalent grammar plus a `Bytes` variant, per the
/// design's REDESIGN FLAGS: no arbitrary in-process objects cross the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(items.into_iter().collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

/// The key type. Strings suffice in practice, per §3.
pub type Key = String;

/// The three wire message shapes from §4.2. Each carries an `origin_id` so
/// the receive task can filter self-originated frames before dispatch (§4.4
/// step 2), and `UPDATE` additionally carries the key, value and timestamp
/// of the write it propagates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Update {
        key: Key,
        value: Value,
        ts: Timestamp,
        origin_id: NodeId,
    },
    SyncReq {
        req_id: RequestId,
        origin_id: NodeId,
    },
    SyncClaim {
        req_id: RequestId,
        origin_id: NodeId,
    },
}

impl Message {
    /// The originating node of this message, regardless of its shape.
    pub fn origin_id(&self) -> NodeId {
        match self {
            Message::Update { origin_id, .. } => *origin_id,
            Message::SyncReq { origin_id, .. } => *origin_id,
            Message::SyncClaim { origin_id, .. } => *origin_id,
        }
    }
}
