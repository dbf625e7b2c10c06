//! Sliding-window relaxed policy.
//!
//! Keeps the last `W` helpfulness observations in a fixed-capacity ring and
//! relaxes the reserve rule once enough observations have accumulated: a
//! non-helpful candidate is accepted when the recent helpful rate clears
//! the break-even rate `S / (R - 1)` with a safety margin. Windowed
//! summaries are preferred over lifetime averages so the estimate tracks
//! non-stationary arrival streams.

use crate::{reserve_rule, Accounting, Candidate, DecisionNote, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Configuration for [`WindowPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WindowConfig {
    /// Ring capacity `W` (minimum 1).
    pub window_size: usize,
    /// Observations required before relaxing the reserve rule.
    pub min_observations: u64,
    /// Additive safety cushion on the break-even helpful rate.
    pub risk_margin: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: 500,
            min_observations: 80,
            risk_margin: 0.15,
        }
    }
}

/// Sliding-window relaxed policy state.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowPolicy {
    cfg: WindowConfig,
    ring: VecDeque<bool>,
    helpful_in_window: u64,
    observations: u64,
}

impl WindowPolicy {
    pub fn new(cfg: WindowConfig) -> Self {
        let cap = cfg.window_size.max(1);
        Self {
            cfg: WindowConfig { window_size: cap, ..cfg },
            ring: VecDeque::with_capacity(cap),
            helpful_in_window: 0,
            observations: 0,
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.cfg
    }

    /// Total observations consumed (not capped by the window).
    pub fn observations(&self) -> u64 {
        self.observations
    }

    /// Helpful count currently inside the ring.
    pub fn helpful_in_window(&self) -> u64 {
        self.helpful_in_window
    }

    /// Observations currently inside the ring (`min(n, W)`).
    pub fn window_len(&self) -> usize {
        self.ring.len()
    }

    /// Empirical helpful rate over the window; 0 before any observation.
    pub fn p_hat(&self) -> f64 {
        if self.ring.is_empty() {
            0.0
        } else {
            self.helpful_in_window as f64 / self.ring.len() as f64
        }
    }

    /// Push one helpfulness observation, evicting the oldest at capacity.
    pub fn observe(&mut self, helpful: bool) {
        if self.ring.len() == self.cfg.window_size {
            if self.ring.pop_front() == Some(true) {
                self.helpful_in_window -= 1;
            }
        }
        self.ring.push_back(helpful);
        if helpful {
            self.helpful_in_window += 1;
        }
        self.observations += 1;
    }

    /// Observe the current candidate, then gate.
    ///
    /// The current observation is included in the estimate before the
    /// threshold comparison; call exactly once per candidate.
    pub fn decide(&mut self, candidate: &Candidate, accounting: &Accounting) -> Verdict {
        let helpful = accounting.is_helpful(&candidate.attributes);
        self.observe(helpful);
        self.gate(helpful, accounting)
    }

    /// Pure gate against the current estimator state (no update). Used for
    /// candidates that re-arrive after a resync and were already observed.
    pub fn evaluate(&self, candidate: &Candidate, accounting: &Accounting) -> Verdict {
        self.gate(accounting.is_helpful(&candidate.attributes), accounting)
    }

    fn gate(&self, helpful: bool, accounting: &Accounting) -> Verdict {
        if helpful || self.observations < self.cfg.min_observations {
            return reserve_rule(helpful, accounting);
        }
        let slack = accounting.slack();
        let remaining = accounting.remaining();
        if slack >= remaining {
            return Verdict::reject(DecisionNote::NoSlack { slack, remaining });
        }
        let p_hat = self.p_hat();
        let threshold = slack as f64 / remaining.saturating_sub(1).max(1) as f64
            * (1.0 + self.cfg.risk_margin);
        if p_hat >= threshold {
            Verdict::accept(DecisionNote::RatePassed { p_hat, threshold })
        } else {
            Verdict::reject(DecisionNote::RateBelow { p_hat, threshold })
        }
    }
}
