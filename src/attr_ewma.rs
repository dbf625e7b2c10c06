//! Per-attribute EWMA relaxed policy.
//!
//! A single global helpful rate masks the case where one attribute arrives
//! rarely and becomes the bottleneck. This policy tracks an EWMA arrival
//! estimate per constrained attribute and accepts a non-helpful candidate
//! only when the expected helpful arrivals in the remaining seats cover
//! every gated attribute's quota with margin:
//!
//! ```text
//! count[a] + q[a] * (R - 1) >= min_count[a] * (1 + margin)
//! ```
//!
//! `(R - 1)` because a non-helpful accept consumes one of the `R` remaining
//! seats without progress. Two options sharpen the gate:
//!
//! - **Correlation-aware inflation**: `q[a]` is `p_hat[a]` inflated by the
//!   positively-correlated arrival mass of other still-needed attributes,
//!   clamped to `[0, 1]`.
//! - **Top-K gating**: only the `K` attributes with the smallest coverage
//!   ratio `q[a] * (R - 1) / need[a]` are checked (ties: smaller `q[a]`,
//!   then lexicographic attribute id), so a comfortably-covered attribute
//!   cannot veto an accept.

use crate::{reserve_rule, Accounting, AttributeId, AttributeVector, Candidate, DecisionNote, Scenario, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration for [`AttrEwmaPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AttrEwmaConfig {
    /// Smoothing factor in `(0, 1]`.
    pub alpha: f64,
    /// Multiplicative safety cushion on each quota.
    pub risk_margin: f64,
    /// Observations before relaxing the reserve rule.
    pub warmup: u64,
    /// Inflate effective rates with positively-correlated arrival mass.
    pub corr_aware: bool,
    /// Scale of the correlation inflation, in `[0, 1]`.
    pub corr_beta: f64,
    /// Gate only the K tightest attributes; 0 gates all.
    pub gate_top_k: usize,
}

impl Default for AttrEwmaConfig {
    fn default() -> Self {
        Self {
            alpha: 0.04,
            risk_margin: 0.15,
            warmup: 120,
            corr_aware: false,
            corr_beta: 0.25,
            gate_top_k: 0,
        }
    }
}

/// Per-attribute EWMA relaxed policy state.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrEwmaPolicy {
    cfg: AttrEwmaConfig,
    p_hat: BTreeMap<AttributeId, f64>,
    correlations: BTreeMap<AttributeId, BTreeMap<AttributeId, f64>>,
    observations: u64,
}

impl AttrEwmaPolicy {
    /// Build from the scenario: one estimate per constrained attribute,
    /// seeded from `relative_frequencies` where provided (0.5 otherwise).
    /// The correlation matrix is snapshotted only when `corr_aware` is set.
    pub fn new(cfg: AttrEwmaConfig, scenario: &Scenario) -> Self {
        let cfg = AttrEwmaConfig {
            alpha: cfg.alpha.clamp(1e-6, 1.0),
            corr_beta: cfg.corr_beta.clamp(0.0, 1.0),
            ..cfg
        };
        let p_hat = scenario
            .min_counts()
            .keys()
            .map(|a| (a.clone(), scenario.prior(a).unwrap_or(0.5).clamp(0.0, 1.0)))
            .collect();
        let correlations = if cfg.corr_aware {
            scenario.statistics.correlations.clone()
        } else {
            BTreeMap::new()
        };
        Self {
            cfg,
            p_hat,
            correlations,
            observations: 0,
        }
    }

    pub fn config(&self) -> &AttrEwmaConfig {
        &self.cfg
    }

    /// Current arrival estimate for `a` (constrained attributes only).
    pub fn p_hat(&self, a: &str) -> Option<f64> {
        self.p_hat.get(a).copied()
    }

    /// Observations consumed so far.
    pub fn observations(&self) -> u64 {
        self.observations
    }

    /// Fold one full attribute vector into every per-attribute estimate.
    pub fn observe(&mut self, attributes: &AttributeVector) {
        let alpha = self.cfg.alpha;
        for (a, p) in self.p_hat.iter_mut() {
            let x = if attributes.get(a).copied().unwrap_or(false) { 1.0 } else { 0.0 };
            *p = alpha * x + (1.0 - alpha) * *p;
        }
        self.observations += 1;
    }

    /// Observe the current candidate, then gate. Call exactly once per
    /// candidate; the warmup comparison uses the observation count prior to
    /// this candidate.
    pub fn decide(&mut self, candidate: &Candidate, accounting: &Accounting) -> Verdict {
        let seen = self.observations;
        self.observe(&candidate.attributes);
        self.gate(candidate, seen, accounting)
    }

    /// Pure gate against the current estimator state (no update).
    pub fn evaluate(&self, candidate: &Candidate, accounting: &Accounting) -> Verdict {
        self.gate(candidate, self.observations, accounting)
    }

    fn gate(&self, candidate: &Candidate, seen: u64, accounting: &Accounting) -> Verdict {
        let helpful = accounting.is_helpful(&candidate.attributes);
        let slack = accounting.slack();
        let remaining = accounting.remaining();
        if helpful || seen < self.cfg.warmup || slack >= remaining {
            return reserve_rule(helpful, accounting);
        }

        let future = remaining.saturating_sub(1) as f64;
        // Under-filled attributes with their effective rates and coverage
        // ratios, in attribute order.
        let mut underfilled: Vec<(f64, f64, &AttributeId)> = accounting
            .min_counts()
            .keys()
            .filter(|a| accounting.need(a) > 0)
            .map(|a| {
                let q = self.effective_rate(a, accounting);
                let ratio = q * future / accounting.need(a) as f64;
                (ratio, q, a)
            })
            .collect();

        if self.cfg.gate_top_k > 0 && underfilled.len() > self.cfg.gate_top_k {
            underfilled.sort_by(|x, y| {
                x.0.total_cmp(&y.0)
                    .then_with(|| x.1.total_cmp(&y.1))
                    .then_with(|| x.2.cmp(y.2))
            });
            underfilled.truncate(self.cfg.gate_top_k);
        }

        let target_scale = 1.0 + self.cfg.risk_margin;
        for (_, q, a) in &underfilled {
            let expected = accounting.count(a) as f64 + q * future;
            if expected < accounting.min_count(a) as f64 * target_scale {
                return Verdict::reject(DecisionNote::CoverageShort { attribute: (*a).clone() });
            }
        }
        Verdict::accept(DecisionNote::CoveragePassed)
    }

    /// `p_hat[a]`, optionally inflated by the positively-correlated arrival
    /// mass of other still-needed attributes, clamped to `[0, 1]`.
    fn effective_rate(&self, a: &AttributeId, accounting: &Accounting) -> f64 {
        let p = self.p_hat.get(a).copied().unwrap_or(0.0);
        if !self.cfg.corr_aware {
            return p;
        }
        let lift: f64 = self
            .p_hat
            .iter()
            .filter(|(b, _)| *b != a && accounting.need(b) > 0)
            .map(|(b, pb)| {
                let corr = self
                    .correlations
                    .get(a)
                    .and_then(|row| row.get(b).copied())
                    .unwrap_or(0.0);
                corr * pb
            })
            .sum();
        (p + self.cfg.corr_beta * lift.max(0.0)).clamp(0.0, 1.0)
    }
}
