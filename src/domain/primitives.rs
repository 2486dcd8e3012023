//! Domain primitives: HolderName, ClassId, RoundRef.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A founder, the employee option pool, or a named investor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderName(pub String);

impl HolderName {
    /// Create a HolderName from a string.
    pub fn new(name: impl Into<String>) -> Self {
        HolderName(name.into())
    }

    /// Get the name as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HolderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one security class (e.g. "series-b").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub String);

impl ClassId {
    /// Create a ClassId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        ClassId(id.into())
    }

    /// Get the id as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the funding round a snapshot was produced by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRef {
    /// Position of the round in the processed sequence (0-based).
    pub index: usize,
    pub name: String,
    pub date: NaiveDate,
}
