//! Run controller: couples a policy to the remote protocol with a durable,
//! replayable event log.
//!
//! Single-threaded cooperative loop with at most one candidate outstanding:
//! receive candidate → log `request` → consult policy → update accounting →
//! log `response` → submit → receive next. The `request` event is written
//! *before* the policy call so a crash after deciding still leaves a
//! replayable trail, and every log write is fsynced before the decision is
//! submitted, which bounds the replay gap on crash to one candidate.
//!
//! Transient transport errors retry in place with exponential backoff.
//! Index-skew errors (`"Expected person X, got Y"`) are recovered locally:
//! log `resync`, drop the in-flight candidate, re-fetch from `X`.
//! A candidate that re-arrives after a resync with a durable `response` is
//! re-submitted verbatim from the decision history — not re-decided, not
//! re-logged, not re-counted — so each index is observed and applied
//! exactly once no matter how often the server replays it. A re-arrival
//! that was observed but never answered (crash between `request` and
//! `response`) is decided via `evaluate`, which gates against live
//! estimator state without a second observation.

use crate::{
    parse_index_skew, Accounting, AttributeId, DecideAndNext, Error, Event, EventLog, GameServer,
    Policy, PolicySpec, ResumeState, Scenario,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared stop signal, checked between candidates.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Scenario tag stamped on every event and sent to the server.
    pub scenario: u32,
    /// Player identifier for `new-game`.
    pub player_id: String,
    /// Transient-error retry budget per call.
    pub retries: u32,
    /// First backoff delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
    /// Emit a `progress` event every this many decisions (0 disables).
    pub progress_interval: u64,
    /// Emit a human-readable status line every this many decisions
    /// (0 disables).
    pub status_interval: u64,
}

impl ControllerConfig {
    pub fn new(scenario: u32, player_id: impl Into<String>) -> Self {
        Self {
            scenario,
            player_id: player_id.into(),
            retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(10),
            progress_interval: 100,
            status_interval: 100,
        }
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Capacity filled with every quota met.
    Completed,
    /// Server failure, unmet quotas at termination, or an unrecoverable
    /// local error.
    Failed,
    /// Stopped by the external cancel flag.
    Cancelled,
}

impl RunOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Failed => 1,
            RunOutcome::Cancelled => 2,
        }
    }
}

/// What happened, with final counts.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub game_id: Option<String>,
    pub admitted: u64,
    pub rejected: u64,
    pub remaining_needed: BTreeMap<AttributeId, u64>,
    pub error: Option<String>,
}

/// Live state for one game, threaded through the decision loop.
struct GameSession {
    game_id: String,
    scenario: Scenario,
    accounting: Accounting,
    policy: Policy,
    next_index: u64,
    observed_through: Option<u64>,
    decision_history: BTreeMap<u64, bool>,
    decisions: u64,
    rejected: u64,
}

impl GameSession {
    fn already_observed(&self, index: u64) -> bool {
        self.observed_through.map_or(false, |t| index <= t)
    }

    fn summary(&self, outcome: RunOutcome, rejected: u64, error: Option<String>) -> RunSummary {
        RunSummary {
            outcome,
            game_id: Some(self.game_id.clone()),
            admitted: self.accounting.admitted(),
            rejected,
            remaining_needed: self.accounting.remaining_needed(),
            error,
        }
    }
}

enum Call {
    Fetch(u64),
    Submit { index: u64, accept: bool },
}

/// Orchestrates one game (or one resumed segment) against a [`GameServer`].
pub struct RunController<S> {
    server: S,
    log: EventLog,
    cfg: ControllerConfig,
    cancel: CancelFlag,
}

impl<S: GameServer> RunController<S> {
    pub fn new(server: S, log: EventLog, cfg: ControllerConfig) -> Self {
        Self {
            server,
            log,
            cfg,
            cancel: CancelFlag::new(),
        }
    }

    /// Install an external cancel flag (defaults to a fresh, never-set one).
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Start a new game and drive it to a terminal state.
    ///
    /// `Err` is reserved for log-durability failures; every other failure
    /// is logged as a `failed` event and reported in the summary.
    pub fn run(&self, capacity: u64, spec: PolicySpec) -> Result<RunSummary, Error> {
        let new_game = match self.with_retry(|| {
            self.server.new_game(self.cfg.scenario, &self.cfg.player_id)
        }) {
            Ok(g) => g,
            Err(e) => return self.finish_failed(None, e),
        };
        let scenario = Scenario::new(new_game.constraints, capacity)
            .with_statistics(new_game.attribute_statistics);
        let accounting = Accounting::new(&scenario);
        let policy = Policy::new(&spec, &scenario);
        let session = GameSession {
            game_id: new_game.game_id,
            scenario,
            accounting,
            policy,
            next_index: 0,
            observed_through: None,
            decision_history: BTreeMap::new(),
            decisions: 0,
            rejected: 0,
        };
        self.log_start(&session, spec)?;
        self.drive(session)
    }

    /// Continue a reconstructed game from its next unobserved candidate.
    ///
    /// A fresh `start` event is written so the resumed segment's log is
    /// self-contained.
    pub fn resume(&self, state: ResumeState) -> Result<RunSummary, Error> {
        let spec = state.policy.spec();
        let rejected = state.decisions.saturating_sub(state.accounting.admitted());
        let session = GameSession {
            game_id: state.game_id,
            scenario: state.scenario,
            accounting: state.accounting,
            policy: state.policy,
            next_index: state.next_index,
            observed_through: state.observed_through,
            decision_history: state
                .decision_history
                .into_iter()
                .map(|(i, d)| (i, d.is_accept()))
                .collect(),
            decisions: state.decisions,
            rejected,
        };
        self.log_start(&session, spec)?;
        self.drive(session)
    }

    fn log_start(&self, session: &GameSession, spec: PolicySpec) -> Result<(), Error> {
        self.log.append(&Event::Start {
            ts: Utc::now(),
            scenario: self.cfg.scenario,
            game_id: session.game_id.clone(),
            capacity: session.scenario.capacity,
            constraints: session.scenario.min_counts(),
            relative_frequencies: session.scenario.statistics.relative_frequencies.clone(),
            correlations: session.scenario.statistics.correlations.clone(),
            policy: spec,
        })
    }

    fn drive(&self, mut session: GameSession) -> Result<RunSummary, Error> {
        // Feasibility must hold before any decision; a violation here is a
        // programming error, not a game state.
        let (slack, remaining) = (session.accounting.slack(), session.accounting.remaining());
        if slack > remaining {
            return self.finish_failed(Some(&session), Error::Infeasible { slack, remaining });
        }
        if remaining == 0 {
            return self.finish_terminal(&session, session.rejected, "capacity filled");
        }

        let first_fetch = Call::Fetch(session.next_index);
        let mut resp = match self.exchange(&mut session, first_fetch) {
            Ok(r) => r,
            Err(e) => return self.finish_failed(Some(&session), e),
        };

        loop {
            match resp {
                DecideAndNext::Completed { rejected_count, reason, .. } => {
                    let reason = reason.unwrap_or_else(|| "server completed".to_string());
                    return self.finish_terminal(&session, rejected_count, &reason);
                }
                DecideAndNext::Failed { error, rejected_count, .. } => {
                    let rejected = rejected_count.unwrap_or(session.rejected);
                    self.append_failed(Some(&session.game_id), &error)?;
                    tracing::error!(%error, "server reported failure");
                    return Ok(session.summary(RunOutcome::Failed, rejected, Some(error)));
                }
                DecideAndNext::Running { next_person, rejected_count, .. } => {
                    if self.cancel.is_cancelled() {
                        tracing::info!("cancelled between candidates");
                        return Ok(session.summary(RunOutcome::Cancelled, rejected_count, None));
                    }
                    let candidate = match next_person {
                        Some(c) => c,
                        None => {
                            let e = Error::Protocol("running response without nextPerson".into());
                            return self.finish_failed(Some(&session), e);
                        }
                    };
                    session.next_index = candidate.index;

                    // Re-arrival of an index with a durable response: the
                    // decision is already made, logged, and counted.
                    // Re-submit it verbatim so the server converges on the
                    // recorded stream.
                    let recorded = session.decision_history.get(&candidate.index).copied();
                    if let Some(accept) = recorded {
                        resp = match self.exchange(
                            &mut session,
                            Call::Submit { index: candidate.index, accept },
                        ) {
                            Ok(r) => r,
                            Err(e) => return self.finish_failed(Some(&session), e),
                        };
                        session.next_index = candidate.index + 1;
                        continue;
                    }

                    let verdict = if session.already_observed(candidate.index) {
                        // Observed but never answered (crash between the
                        // `request` and `response` writes): the request is
                        // already durable; gate without a second
                        // observation.
                        session.policy.evaluate(&candidate, &session.accounting)
                    } else {
                        self.log.append(&Event::Request {
                            ts: Utc::now(),
                            scenario: self.cfg.scenario,
                            game_id: session.game_id.clone(),
                            person_index: candidate.index,
                            attributes: candidate.attributes.clone(),
                        })?;
                        let v = session.policy.decide(&candidate, &session.accounting);
                        session.observed_through = Some(candidate.index);
                        v
                    };
                    if verdict.is_accept() {
                        if let Err(e) = session.accounting.apply_accept(&candidate.attributes) {
                            return self.finish_failed(Some(&session), e);
                        }
                        session.policy.on_accept(&candidate);
                        // An accept must never break feasibility; if it
                        // did, a policy gate is wrong.
                        let (slack, remaining) =
                            (session.accounting.slack(), session.accounting.remaining());
                        if slack > remaining {
                            let e = Error::Infeasible { slack, remaining };
                            return self.finish_failed(Some(&session), e);
                        }
                    } else {
                        session.rejected += 1;
                    }

                    self.log.append(&Event::Response {
                        ts: Utc::now(),
                        scenario: self.cfg.scenario,
                        game_id: session.game_id.clone(),
                        person_index: candidate.index,
                        decision: verdict.decision,
                    })?;
                    session.decision_history.insert(candidate.index, verdict.is_accept());
                    session.decisions += 1;
                    self.report_progress(&session)?;

                    if session.accounting.remaining() == 0 {
                        // Locally complete: log first, then tell the server
                        // about the final decision (best effort).
                        let summary =
                            self.finish_terminal(&session, session.rejected, "capacity filled")?;
                        let last = Call::Submit {
                            index: candidate.index,
                            accept: verdict.is_accept(),
                        };
                        if let Err(e) = self.exchange(&mut session, last) {
                            tracing::warn!(error = %e, "final submission failed after completion");
                        }
                        return Ok(summary);
                    }

                    resp = match self.exchange(
                        &mut session,
                        Call::Submit { index: candidate.index, accept: verdict.is_accept() },
                    ) {
                        Ok(r) => r,
                        Err(e) => return self.finish_failed(Some(&session), e),
                    };
                    session.next_index = candidate.index + 1;
                }
            }
        }
    }

    /// Issue one protocol call, absorbing transient errors (backoff retry)
    /// and index skew (resync) until a usable response or fatal error.
    fn exchange(
        &self,
        session: &mut GameSession,
        mut call: Call,
    ) -> Result<DecideAndNext, Error> {
        loop {
            let result = self.with_retry(|| match call {
                Call::Fetch(index) => {
                    self.server.decide_and_next(&session.game_id, index, None)
                }
                Call::Submit { index, accept } => {
                    self.server.decide_and_next(&session.game_id, index, Some(accept))
                }
            });
            let skew = match result {
                Ok(DecideAndNext::Failed { ref error, .. }) => parse_index_skew(error),
                Err(Error::IndexSkew { expected, submitted }) => Some((expected, submitted)),
                _ => None,
            };
            match (skew, result) {
                (Some((expected, submitted)), _) => {
                    tracing::warn!(expected, submitted, "index skew; resyncing");
                    self.log.append(&Event::Resync {
                        ts: Utc::now(),
                        scenario: self.cfg.scenario,
                        game_id: session.game_id.clone(),
                        expected,
                        submitted,
                    })?;
                    session.next_index = expected;
                    call = Call::Fetch(expected);
                }
                (None, Ok(resp)) => return Ok(resp),
                (None, Err(e)) => return Err(e),
            }
        }
    }

    /// Retry `f` on transient errors with exponential backoff.
    fn with_retry<T>(&self, mut f: impl FnMut() -> Result<T, Error>) -> Result<T, Error> {
        let mut attempt = 0u32;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.cfg.retries => {
                    let delay = self
                        .cfg
                        .backoff_base
                        .saturating_mul(1u32 << attempt.min(16))
                        .min(self.cfg.backoff_cap);
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "transient transport error; backing off");
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn report_progress(&self, session: &GameSession) -> Result<(), Error> {
        let interval = self.cfg.progress_interval;
        if interval > 0 && session.decisions % interval == 0 {
            self.log.append(&Event::Progress {
                ts: Utc::now(),
                scenario: self.cfg.scenario,
                game_id: session.game_id.clone(),
                admitted: session.accounting.admitted(),
                rejected: session.rejected,
                count_by_attr: session.accounting.count_by_attr().clone(),
            })?;
        }
        let status = self.cfg.status_interval;
        if status > 0 && session.decisions % status == 0 {
            tracing::info!(
                step = session.decisions,
                admitted = session.accounting.admitted(),
                rejected = session.rejected,
                cap_left = session.accounting.remaining(),
                need_sum = session.accounting.slack(),
                "progress"
            );
        }
        Ok(())
    }

    /// Terminal state: `completed` when every quota is met, `failed`
    /// otherwise (the game ended but the quotas cannot be satisfied).
    fn finish_terminal(
        &self,
        session: &GameSession,
        rejected: u64,
        reason: &str,
    ) -> Result<RunSummary, Error> {
        if session.accounting.quotas_met() {
            self.log.append(&Event::Completed {
                ts: Utc::now(),
                scenario: self.cfg.scenario,
                game_id: session.game_id.clone(),
                admitted: session.accounting.admitted(),
                rejected,
                reason: reason.to_string(),
            })?;
            tracing::info!(
                admitted = session.accounting.admitted(),
                rejected,
                reason,
                "completed"
            );
            Ok(session.summary(RunOutcome::Completed, rejected, None))
        } else {
            let error = format!("game ended with unmet quotas ({reason})");
            self.append_failed(Some(&session.game_id), &error)?;
            tracing::error!(%error, "failed");
            Ok(session.summary(RunOutcome::Failed, rejected, Some(error)))
        }
    }

    /// Fatal local error: log `failed` and fold into the summary. Log
    /// durability errors propagate instead — without the log, resume is
    /// compromised and the caller must decide.
    fn finish_failed(
        &self,
        session: Option<&GameSession>,
        err: Error,
    ) -> Result<RunSummary, Error> {
        if matches!(err, Error::LogWrite(_) | Error::LogFormat(_)) {
            return Err(err);
        }
        self.append_failed(session.map(|s| s.game_id.as_str()), &err.to_string())?;
        tracing::error!(error = %err, "run failed");
        Ok(match session {
            Some(s) => s.summary(RunOutcome::Failed, s.rejected, Some(err.to_string())),
            None => RunSummary {
                outcome: RunOutcome::Failed,
                game_id: None,
                admitted: 0,
                rejected: 0,
                remaining_needed: BTreeMap::new(),
                error: Some(err.to_string()),
            },
        })
    }

    fn append_failed(&self, game_id: Option<&str>, error: &str) -> Result<(), Error> {
        self.log.append(&Event::Failed {
            ts: Utc::now(),
            scenario: self.cfg.scenario,
            game_id: game_id.map(str::to_string),
            error: error.to_string(),
        })
    }
}
