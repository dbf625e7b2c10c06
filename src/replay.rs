//! Reconstruction: rebuild accounting and policy state from an event log.
//!
//! The log is replayed, not snapshotted: each `request` event re-computes
//! helpfulness against the accounting *as of that moment* and feeds the
//! estimators through `record_observation`, and each accepting `response`
//! advances the accounting. The result differs from the live run only in
//! that wall-clock updates become sequential ones and that priors absent
//! from the log fall back to defaults.
//!
//! Both observation and accounting are deduplicated by `personIndex`: the
//! live controller logs and counts each candidate exactly once (re-arrivals
//! after a resync are re-submitted from its decision history without new
//! log events), and the reconstructor applies the same discipline so a log
//! that somehow carries duplicates still replays to exactly-once state.

use crate::{
    read_log, Accounting, AttributeStatistics, AttributeVector, Candidate, Constraint, Decision,
    Error, Event, Policy, PolicySpec, Scenario,
};
use std::collections::BTreeMap;
use std::path::Path;

/// Everything the controller needs to continue an interrupted game.
#[derive(Debug, Clone)]
pub struct ResumeState {
    pub scenario_id: u32,
    pub game_id: String,
    pub scenario: Scenario,
    pub accounting: Accounting,
    pub policy: Policy,
    /// Index to request next.
    pub next_index: u64,
    /// Highest `personIndex` the policy has observed, if any. Candidates at
    /// or below this index are re-decided without a second observation.
    pub observed_through: Option<u64>,
    /// Durable decision per index, for verbatim re-submission on replayed
    /// candidates.
    pub decision_history: BTreeMap<u64, Decision>,
    /// Decisions rendered so far (accepted + rejected responses).
    pub decisions: u64,
}

/// Rebuild run state from the log at `path`.
///
/// The first `start` event anchors the game; `spec_override` substitutes
/// different construction parameters for the logged ones (the estimator
/// replay then runs under the new parameters).
pub fn reconstruct(path: &Path, spec_override: Option<PolicySpec>) -> Result<ResumeState, Error> {
    let scan = read_log(path)?;
    if scan.skipped_lines > 0 {
        tracing::warn!(
            skipped = scan.skipped_lines,
            first_error = ?scan.first_error,
            "skipped unparseable log lines during reconstruction"
        );
    }

    let mut events = scan.events.into_iter();
    let (scenario_id, game_id, scenario, spec) = loop {
        match events.next() {
            Some(Event::Start {
                scenario,
                game_id,
                capacity,
                constraints,
                relative_frequencies,
                correlations,
                policy,
                ..
            }) => {
                let constraints = constraints
                    .into_iter()
                    .map(|(attribute, min_count)| Constraint { attribute, min_count })
                    .collect();
                let model = Scenario::new(constraints, capacity).with_statistics(
                    AttributeStatistics { relative_frequencies, correlations },
                );
                break (scenario, game_id, model, spec_override.unwrap_or(policy));
            }
            Some(_) => continue,
            None => return Err(Error::Resume("no start event found in log".into())),
        }
    };

    let mut accounting = Accounting::new(&scenario);
    let mut policy = Policy::new(&spec, &scenario);
    let mut observed_through: Option<u64> = None;
    let mut responded_through: Option<u64> = None;
    let mut decision_history: BTreeMap<u64, Decision> = BTreeMap::new();
    let mut decisions = 0u64;
    let mut last_request: Option<(u64, AttributeVector)> = None;

    for event in events {
        match event {
            Event::Request { person_index, attributes, .. } => {
                if observed_through.map_or(true, |t| person_index > t) {
                    let helpful = accounting.is_helpful(&attributes);
                    policy.record_observation(&attributes, helpful);
                    observed_through = Some(person_index);
                }
                last_request = Some((person_index, attributes));
            }
            Event::Response { person_index, decision, .. } => {
                if responded_through.map_or(false, |t| person_index <= t) {
                    continue;
                }
                decisions += 1;
                responded_through = Some(person_index);
                decision_history.insert(person_index, decision);
                if decision.is_accept() {
                    match &last_request {
                        Some((index, attributes)) if *index == person_index => {
                            accounting.apply_accept(attributes)?;
                        }
                        _ => {
                            return Err(Error::Resume(format!(
                                "response for person {person_index} has no matching request"
                            )))
                        }
                    }
                }
            }
            _ => {}
        }
    }

    // A trailing request without a response was observed but never decided
    // durably: resume at that index and re-decide it without re-observing.
    let next_index = match (observed_through, responded_through) {
        (Some(observed), Some(responded)) if observed > responded => observed,
        (Some(observed), Some(_)) => observed + 1,
        (Some(observed), None) => observed,
        (None, _) => 0,
    };

    Ok(ResumeState {
        scenario_id,
        game_id,
        scenario,
        accounting,
        policy,
        next_index,
        observed_through,
        decision_history,
        decisions,
    })
}

impl ResumeState {
    /// Whether `candidate` has already been observed by the policy.
    pub fn already_observed(&self, candidate: &Candidate) -> bool {
        self.observed_through.map_or(false, |t| candidate.index <= t)
    }
}
