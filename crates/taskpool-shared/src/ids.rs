//! Stable identifiers shared across the pool, the message protocol and the
//! worker loop.

use std::fmt;

/// Stable identifier of a worker within a pool.
///
/// The original source allows either an int or a string index; this rewrite
/// always carries the string form (the pool assigns `"0".."N-1"` at
/// construction, matching `Pool._add_workers`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(index: impl Into<String>) -> Self {
        Self(index.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for WorkerId {
    fn from(index: usize) -> Self {
        Self(index.to_string())
    }
}

/// Metadata a worker stamps on every message it sends, and the pool mirrors
/// back so responses can be matched to the asking worker.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkerMetadata {
    pub index: WorkerId,
    /// Opaque identifier for the underlying execution carrier (here, a
    /// formatted `std::thread::ThreadId`). Used only for diagnostics.
    pub carrier_id: String,
}

impl WorkerMetadata {
    pub fn new(index: WorkerId, carrier_id: impl Into<String>) -> Self {
        Self {
            index,
            carrier_id: carrier_id.into(),
        }
    }
}

// Manual Serialize/Deserialize bridge for WorkerId (newtype over String).
impl serde::Serialize for WorkerId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for WorkerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(WorkerId)
    }
}
