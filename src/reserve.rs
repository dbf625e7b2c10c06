//! Quota-reserve policy: the feasibility-preserving baseline.
//!
//! Always accept a helpful candidate. Accept a non-helpful one only while
//! there is slack (`S < R`): when `S = R`, every remaining seat must be
//! reserved for a distinct still-needed attribute. Accepting a helpful
//! candidate can only decrease `S`, and a non-helpful accept under slack
//! decreases `R` by one while leaving `S` unchanged, so feasibility
//! (`S <= R`) is preserved by induction from a feasible start.

use crate::{Accounting, Candidate, DecisionNote, Verdict};

/// The reserve rule, shared verbatim by every relaxed policy's fallback
/// path: helpful accepts; non-helpful accepts iff `S < R` (strict).
pub fn reserve_rule(helpful: bool, accounting: &Accounting) -> Verdict {
    if helpful {
        return Verdict::accept(DecisionNote::Helpful);
    }
    let slack = accounting.slack();
    let remaining = accounting.remaining();
    if slack < remaining {
        Verdict::accept(DecisionNote::SlackAccept { slack, remaining })
    } else {
        Verdict::reject(DecisionNote::NoSlack { slack, remaining })
    }
}

/// Stateless quota-reserve policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaReserve;

impl QuotaReserve {
    pub fn new() -> Self {
        Self
    }

    /// Decide on a candidate. The reserve policy keeps no streaming state,
    /// so deciding and evaluating are the same operation.
    pub fn decide(&mut self, candidate: &Candidate, accounting: &Accounting) -> Verdict {
        self.evaluate(candidate, accounting)
    }

    /// Pure gate: no estimator to update.
    pub fn evaluate(&self, candidate: &Candidate, accounting: &Accounting) -> Verdict {
        reserve_rule(accounting.is_helpful(&candidate.attributes), accounting)
    }
}
