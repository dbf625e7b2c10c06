//! Admission accounting: the sole authority on game progress.
//!
//! Created once per game from the scenario, mutated only on accept, read by
//! every policy. Policies never own it and it holds no back-reference to
//! them; the controller threads it through each decision.

use crate::{AttributeId, AttributeVector, Error, Scenario};
use std::collections::BTreeMap;

/// Tracks admitted count and per-attribute admitted counts against the
/// scenario's capacity and minimum quotas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accounting {
    capacity: u64,
    admitted: u64,
    min_counts: BTreeMap<AttributeId, u64>,
    count_by_attr: BTreeMap<AttributeId, u64>,
}

impl Accounting {
    /// Fresh accounting for a scenario: zero admits, zero per-attribute
    /// counts for every constrained attribute.
    pub fn new(scenario: &Scenario) -> Self {
        let min_counts = scenario.min_counts();
        let count_by_attr = min_counts.keys().map(|a| (a.clone(), 0)).collect();
        Self {
            capacity: scenario.capacity,
            admitted: 0,
            min_counts,
            count_by_attr,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn admitted(&self) -> u64 {
        self.admitted
    }

    /// Remaining capacity `R = C - admitted`.
    pub fn remaining(&self) -> u64 {
        self.capacity - self.admitted
    }

    /// Minimum quota for `a` (0 for unconstrained attributes).
    pub fn min_count(&self, a: &str) -> u64 {
        self.min_counts.get(a).copied().unwrap_or(0)
    }

    /// Constrained attributes and their quotas.
    pub fn min_counts(&self) -> &BTreeMap<AttributeId, u64> {
        &self.min_counts
    }

    /// Admitted count for `a`.
    pub fn count(&self, a: &str) -> u64 {
        self.count_by_attr.get(a).copied().unwrap_or(0)
    }

    /// Per-attribute admitted counts (constrained attributes only).
    pub fn count_by_attr(&self) -> &BTreeMap<AttributeId, u64> {
        &self.count_by_attr
    }

    /// Remaining admits required for `a`: `max(0, minCount - count)`.
    pub fn need(&self, a: &str) -> u64 {
        self.min_count(a).saturating_sub(self.count(a))
    }

    /// `need` for every constrained attribute.
    pub fn remaining_needed(&self) -> BTreeMap<AttributeId, u64> {
        self.min_counts
            .keys()
            .map(|a| (a.clone(), self.need(a)))
            .collect()
    }

    /// Slack `S`: the sum of per-attribute needs — a lower bound on the
    /// helpful admits still required.
    pub fn slack(&self) -> u64 {
        self.min_counts.keys().map(|a| self.need(a)).sum()
    }

    /// Whether every quota is met.
    pub fn quotas_met(&self) -> bool {
        self.min_counts.keys().all(|a| self.need(a) == 0)
    }

    /// Whether a candidate with `attributes` reduces any current need.
    pub fn is_helpful(&self, attributes: &AttributeVector) -> bool {
        self.min_counts
            .keys()
            .any(|a| self.need(a) > 0 && attributes.get(a).copied().unwrap_or(false))
    }

    /// Apply an accept: bump `admitted` and every constrained attribute the
    /// candidate carries.
    ///
    /// Exceeding capacity is a programming error surfaced as
    /// [`Error::CapacityOverflow`]; the controller stops at capacity, so a
    /// correct run never hits it.
    pub fn apply_accept(&mut self, attributes: &AttributeVector) -> Result<(), Error> {
        if self.admitted >= self.capacity {
            return Err(Error::CapacityOverflow { capacity: self.capacity });
        }
        self.admitted += 1;
        for (a, count) in self.count_by_attr.iter_mut() {
            if attributes.get(a).copied().unwrap_or(false) {
                *count += 1;
            }
        }
        Ok(())
    }
}
