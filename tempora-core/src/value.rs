//! # Document Values
//!
//! Documents map attribute names to values drawn from a closed sum type.
//! The closed enum replaces open per-type dispatch: every value the index
//! layer can encode is one of these variants, and composites (lists, maps)
//! are reduced to a digest of their canonical serialization.
//!
//! Collections kept in `BTreeMap` so that canonical serialization visits
//! keys in a deterministic order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Timestamp;

/// A single document attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Long(i64),
    Double(f64),
    /// A point in time, millisecond precision.
    Date(Timestamp),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// True for lists and maps, which are indexed by digest.
    pub fn is_composite(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Date(v)
    }
}
