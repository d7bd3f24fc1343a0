//! Feature vectors

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sentinel for features whose inputs are absent (debut horse, unpublished odds)
///
/// Every real feature value is non-negative, so the sentinel is unambiguous.
pub const MISSING_FEATURE: f64 = -1.0;

/// Tag identifying the feature definitions a vector was built with
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSchemaVersion(pub String);

impl FeatureSchemaVersion {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureSchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed-schema numeric representation of one entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub horse_id: String,
    pub post_position: u8,
    pub schema_version: FeatureSchemaVersion,
    /// Feature name → value; sorted, so serialization is stable
    pub values: BTreeMap<String, f64>,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// True when the feature is absent from the schema or holds the sentinel
    pub fn is_missing(&self, name: &str) -> bool {
        match self.get(name) {
            Some(v) => v == MISSING_FEATURE,
            None => true,
        }
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }
}
