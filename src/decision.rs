//! Unified verdict envelope for policy outputs.
//!
//! Admission decisions are irrevocable, so runs want a single,
//! audit-friendly record of each decision that can be logged, replayed, and
//! asserted on in tests without heuristics. A [`Verdict`] pairs the binary
//! [`Decision`] with a typed [`DecisionNote`] explaining why it happened.

use serde::{Deserialize, Serialize};

/// The irrevocable accept/reject outcome for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn is_accept(self) -> bool {
        matches!(self, Decision::Accept)
    }
}

/// Why a policy decided the way it did.
///
/// Notes are intentionally small, typed, and stable. Prefer adding new
/// variants over changing existing semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionNote {
    /// The candidate reduces at least one under-filled quota.
    Helpful,

    /// Non-helpful, but slack remains (`S < R`): one seat can be spent
    /// without jeopardizing feasibility.
    SlackAccept { slack: u64, remaining: u64 },

    /// Non-helpful with no slack (`S >= R`): every remaining seat is
    /// reserved for a still-needed attribute.
    NoSlack { slack: u64, remaining: u64 },

    /// A relaxed policy's streaming estimate cleared the break-even
    /// threshold for a non-helpful accept.
    RatePassed { p_hat: f64, threshold: f64 },

    /// A relaxed policy's streaming estimate fell short of the break-even
    /// threshold.
    RateBelow { p_hat: f64, threshold: f64 },

    /// Expected helpful arrivals cover every gated attribute's quota with
    /// margin.
    CoveragePassed,

    /// `attribute`'s expected coverage falls short of its quota with
    /// margin.
    CoverageShort { attribute: String },
}

/// A single policy verdict: the decision plus its audit note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,
    pub note: DecisionNote,
}

impl Verdict {
    pub fn accept(note: DecisionNote) -> Self {
        Self { decision: Decision::Accept, note }
    }

    pub fn reject(note: DecisionNote) -> Self {
        Self { decision: Decision::Reject, note }
    }

    pub fn is_accept(&self) -> bool {
        self.decision.is_accept()
    }
}
