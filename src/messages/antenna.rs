//! Tracker clock and raw antenna sample types.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Timestamp reported by the catheter guidance system (CGS).
///
/// Serialized as an ISO-8601 local date-time without offset, e.g.
/// `{"timestamp": "2024-03-01T10:15:30.250"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgsClock {
    pub timestamp: NaiveDateTime,
}

impl CgsClock {
    pub fn now() -> Self {
        Self {
            timestamp: Local::now().naive_local(),
        }
    }

    pub const fn at(timestamp: NaiveDateTime) -> Self {
        Self { timestamp }
    }
}

impl Default for CgsClock {
    fn default() -> Self {
        Self::now()
    }
}

/// Raw antenna sample. The layout belongs to the registration algorithm, so
/// it is carried as an opaque JSON object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CgsSample(pub Map<String, Value>);

impl CgsSample {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
