//! The admission-policy family as a closed sum type.
//!
//! All four policies share one small contract — decide, evaluate, observe —
//! and the controller dispatches over them uniformly. The family is a
//! closed set of variants, not an open trait hierarchy: there is no
//! extension point for external consumers, which keeps decision replay and
//! log reconstruction exhaustive by construction.
//!
//! [`PolicySpec`] is the serializable construction half: it is written into
//! the `start` event (as `policy` / `policyParams`) so a resumed run can
//! rebuild the exact policy that produced the log.

use crate::{
    Accounting, AttrEwmaConfig, AttrEwmaPolicy, AttributeId, AttributeVector, Candidate,
    EwmaConfig, EwmaPolicy, QuotaReserve, Scenario, Verdict, WindowConfig, WindowPolicy,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which policy to run, with its construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "policyParams", rename_all = "kebab-case")]
pub enum PolicySpec {
    Reserve,
    Window(WindowConfig),
    Ewma(EwmaConfig),
    AttrEwma(AttrEwmaConfig),
}

impl PolicySpec {
    /// Canonical policy name, as used on the CLI and in log paths.
    pub fn name(&self) -> &'static str {
        match self {
            PolicySpec::Reserve => "reserve",
            PolicySpec::Window(_) => "window",
            PolicySpec::Ewma(_) => "ewma",
            PolicySpec::AttrEwma(_) => "attr-ewma",
        }
    }
}

/// A live admission policy.
///
/// Deterministic given its construction parameters and the observation
/// stream; no internal randomness. `decide` mutates streaming estimates
/// before gating (see the module docs on [`crate::ewma`]), so it must be
/// called exactly once per candidate — re-arrivals after a resync go
/// through [`Policy::evaluate`] instead, which gates without observing.
#[derive(Debug, Clone, PartialEq)]
pub enum Policy {
    Reserve(QuotaReserve),
    Window(WindowPolicy),
    Ewma(EwmaPolicy),
    AttrEwma(AttrEwmaPolicy),
}

impl Policy {
    /// Build a policy over `scenario` from its construction parameters.
    pub fn new(spec: &PolicySpec, scenario: &Scenario) -> Self {
        match spec {
            PolicySpec::Reserve => Policy::Reserve(QuotaReserve::new()),
            PolicySpec::Window(cfg) => Policy::Window(WindowPolicy::new(*cfg)),
            PolicySpec::Ewma(cfg) => Policy::Ewma(EwmaPolicy::new(*cfg)),
            PolicySpec::AttrEwma(cfg) => Policy::AttrEwma(AttrEwmaPolicy::new(*cfg, scenario)),
        }
    }

    /// The construction parameters this policy is running with.
    pub fn spec(&self) -> PolicySpec {
        match self {
            Policy::Reserve(_) => PolicySpec::Reserve,
            Policy::Window(p) => PolicySpec::Window(*p.config()),
            Policy::Ewma(p) => PolicySpec::Ewma(*p.config()),
            Policy::AttrEwma(p) => PolicySpec::AttrEwma(*p.config()),
        }
    }

    /// Observe the candidate and decide. Exactly once per candidate.
    pub fn decide(&mut self, candidate: &Candidate, accounting: &Accounting) -> Verdict {
        match self {
            Policy::Reserve(p) => p.decide(candidate, accounting),
            Policy::Window(p) => p.decide(candidate, accounting),
            Policy::Ewma(p) => p.decide(candidate, accounting),
            Policy::AttrEwma(p) => p.decide(candidate, accounting),
        }
    }

    /// Gate against current estimator state without observing. Used for
    /// candidates that re-arrive after a resync: each index is observed
    /// exactly once, determined by log presence.
    pub fn evaluate(&self, candidate: &Candidate, accounting: &Accounting) -> Verdict {
        match self {
            Policy::Reserve(p) => p.evaluate(candidate, accounting),
            Policy::Window(p) => p.evaluate(candidate, accounting),
            Policy::Ewma(p) => p.evaluate(candidate, accounting),
            Policy::AttrEwma(p) => p.evaluate(candidate, accounting),
        }
    }

    /// Estimator update only, no decision. The reconstructor calls this
    /// while replaying logged requests; the full attribute vector is
    /// supplied so the per-attribute policy restores exact state.
    pub fn record_observation(&mut self, attributes: &AttributeVector, helpful: bool) {
        match self {
            Policy::Reserve(_) => {}
            Policy::Window(p) => p.observe(helpful),
            Policy::Ewma(p) => p.observe(helpful),
            Policy::AttrEwma(p) => p.observe(attributes),
        }
    }

    /// Hook invoked after an accept has been applied to accounting.
    ///
    /// Accounting is the sole authority on progress and is updated by the
    /// controller, so no current policy keeps accept-side state here.
    pub fn on_accept(&mut self, _candidate: &Candidate) {}

    /// Remaining per-attribute needs, derived from the given accounting.
    pub fn remaining_needed(&self, accounting: &Accounting) -> BTreeMap<AttributeId, u64> {
        accounting.remaining_needed()
    }
}
