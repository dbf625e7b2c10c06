//! Scenario model: constraints, capacity, and prior attribute statistics.
//!
//! Everything here is plain data. The server hands back constraints and
//! (optionally) attribute statistics at game start; capacity comes from the
//! caller. Attribute maps are `BTreeMap` so iteration order — and therefore
//! every downstream decision — is deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque symbolic attribute name.
///
/// The set of identifiers used by a scenario is fixed at game start.
pub type AttributeId = String;

/// A boolean attribute vector, keyed by attribute id.
pub type AttributeVector = BTreeMap<AttributeId, bool>;

/// A per-attribute minimum quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub attribute: AttributeId,
    pub min_count: u64,
}

/// Prior attribute statistics reported by the server at game start.
///
/// `relative_frequencies` maps each attribute to its marginal arrival
/// probability in `[0, 1]`; `correlations` is symmetric with a unit
/// diagonal. Both are optional — policies fall back to neutral defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeStatistics {
    #[serde(default)]
    pub relative_frequencies: BTreeMap<AttributeId, f64>,
    #[serde(default)]
    pub correlations: BTreeMap<AttributeId, BTreeMap<AttributeId, f64>>,
}

/// One streamed candidate.
///
/// Indices arrive in strictly increasing order starting at 0. Attributes
/// not present in the map are treated as `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "personIndex")]
    pub index: u64,
    #[serde(default)]
    pub attributes: AttributeVector,
}

impl Candidate {
    /// Whether the candidate carries attribute `a`.
    pub fn has(&self, a: &str) -> bool {
        self.attributes.get(a).copied().unwrap_or(false)
    }
}

/// A full game scenario: ordered constraints, capacity, optional priors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub constraints: Vec<Constraint>,
    pub capacity: u64,
    #[serde(default)]
    pub statistics: AttributeStatistics,
}

impl Scenario {
    /// Scenario with the given constraints and capacity, no priors.
    pub fn new(constraints: Vec<Constraint>, capacity: u64) -> Self {
        Self {
            constraints,
            capacity,
            statistics: AttributeStatistics::default(),
        }
    }

    /// Attach prior statistics (builder-style).
    pub fn with_statistics(mut self, statistics: AttributeStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    /// Constrained attributes and their minimum counts.
    ///
    /// Constraint attributes are unique per scenario; if a duplicate slips
    /// through, the last entry wins.
    pub fn min_counts(&self) -> BTreeMap<AttributeId, u64> {
        self.constraints
            .iter()
            .map(|c| (c.attribute.clone(), c.min_count))
            .collect()
    }

    /// Prior arrival frequency for `a`, if the server reported one.
    pub fn prior(&self, a: &str) -> Option<f64> {
        self.statistics.relative_frequencies.get(a).copied()
    }

    /// Reported correlation between `a` and `b`, if present.
    pub fn correlation(&self, a: &str, b: &str) -> Option<f64> {
        self.statistics.correlations.get(a).and_then(|row| row.get(b).copied())
    }
}
