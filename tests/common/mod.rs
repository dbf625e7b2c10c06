#![allow(dead_code)] // each test binary uses a different subset

//! Scripted in-memory game server shared by the integration tests.
//!
//! Mirrors the real server's contract: `decide_and_next` with a decision
//! submits for the expected index and serves the next candidate, with
//! `accept = None` it serves the requested index without recording
//! anything. Fault injection covers transient transport errors and
//! expected-index rollbacks (the resync trigger).

use std::cell::RefCell;
use std::collections::BTreeMap;
use turnstile::{
    AttributeStatistics, AttributeVector, Candidate, CancelFlag, Constraint, DecideAndNext, Error,
    GameServer, NewGameResponse,
};

pub const GAME_ID: &str = "g-test";

pub struct ScriptedServer {
    constraints: Vec<Constraint>,
    statistics: AttributeStatistics,
    capacity: u64,
    candidates: Vec<AttributeVector>,
    state: RefCell<ServerState>,
}

#[derive(Default)]
struct ServerState {
    expected: u64,
    /// Decisions currently applied, by index (rollbacks drop entries).
    applied: BTreeMap<u64, bool>,
    /// Full audit of successful submissions, in arrival order.
    submissions: Vec<(u64, bool)>,
    /// Fail the next N calls with a retryable transport error.
    transient_failures: u32,
    /// One-shot rollbacks `(trigger_index, new_expected)`, consumed in
    /// order when a submission for `trigger_index` arrives.
    rollbacks: Vec<(u64, u64)>,
    /// Cancel this flag after N successful submissions.
    cancel_after: Option<(u64, CancelFlag)>,
    calls: u64,
}

pub fn attrs(pairs: &[(&str, bool)]) -> AttributeVector {
    pairs.iter().map(|(a, v)| (a.to_string(), *v)).collect()
}

impl ScriptedServer {
    pub fn new(
        constraints: &[(&str, u64)],
        capacity: u64,
        candidates: Vec<AttributeVector>,
    ) -> Self {
        Self {
            constraints: constraints
                .iter()
                .map(|(a, m)| Constraint { attribute: a.to_string(), min_count: *m })
                .collect(),
            statistics: AttributeStatistics::default(),
            capacity,
            candidates,
            state: RefCell::new(ServerState::default()),
        }
    }

    pub fn with_statistics(mut self, statistics: AttributeStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn inject_transient_failures(&self, n: u32) {
        self.state.borrow_mut().transient_failures = n;
    }

    /// When a submission for `trigger` arrives, roll the expected index
    /// back to `to` and answer with the skew error.
    pub fn inject_rollback(&self, trigger: u64, to: u64) {
        self.state.borrow_mut().rollbacks.push((trigger, to));
    }

    pub fn cancel_after(&self, submissions: u64, flag: CancelFlag) {
        self.state.borrow_mut().cancel_after = Some((submissions, flag));
    }

    pub fn submissions(&self) -> Vec<(u64, bool)> {
        self.state.borrow().submissions.clone()
    }

    pub fn calls(&self) -> u64 {
        self.state.borrow().calls
    }

    pub fn admitted(&self) -> u64 {
        self.state.borrow().applied.values().filter(|a| **a).count() as u64
    }

    fn serve(&self, st: &ServerState, index: u64) -> DecideAndNext {
        let admitted = st.applied.values().filter(|a| **a).count() as u64;
        let rejected = st.applied.len() as u64 - admitted;
        match self.candidates.get(index as usize) {
            Some(attributes) => DecideAndNext::Running {
                next_person: Some(Candidate { index, attributes: attributes.clone() }),
                admitted_count: admitted,
                rejected_count: rejected,
            },
            None => DecideAndNext::Completed {
                admitted_count: admitted,
                rejected_count: rejected,
                reason: Some("stream exhausted".to_string()),
            },
        }
    }
}

impl GameServer for ScriptedServer {
    fn new_game(&self, _scenario: u32, _player_id: &str) -> Result<NewGameResponse, Error> {
        Ok(NewGameResponse {
            game_id: GAME_ID.to_string(),
            constraints: self.constraints.clone(),
            attribute_statistics: self.statistics.clone(),
        })
    }

    fn decide_and_next(
        &self,
        game_id: &str,
        person_index: u64,
        accept: Option<bool>,
    ) -> Result<DecideAndNext, Error> {
        let mut st = self.state.borrow_mut();
        st.calls += 1;
        if game_id != GAME_ID {
            return Err(Error::Game(format!("unknown game {game_id}")));
        }
        if st.transient_failures > 0 {
            st.transient_failures -= 1;
            return Err(Error::Transport {
                message: "injected timeout".to_string(),
                retryable: true,
            });
        }

        let accept = match accept {
            None => return Ok(self.serve(&st, person_index)),
            Some(accept) => accept,
        };

        if let Some(&(trigger, to)) = st.rollbacks.first() {
            if person_index == trigger {
                st.rollbacks.remove(0);
                st.expected = to;
                st.applied.retain(|i, _| *i < to);
            }
        }
        if person_index != st.expected {
            return Ok(DecideAndNext::Failed {
                error: format!("Expected person {}, got {}", st.expected, person_index),
                admitted_count: None,
                rejected_count: None,
            });
        }

        st.applied.insert(person_index, accept);
        st.submissions.push((person_index, accept));
        st.expected = person_index + 1;
        if let Some((after, flag)) = &st.cancel_after {
            if st.submissions.len() as u64 >= *after {
                flag.cancel();
            }
        }

        let admitted = st.applied.values().filter(|a| **a).count() as u64;
        if admitted >= self.capacity {
            let rejected = st.applied.len() as u64 - admitted;
            return Ok(DecideAndNext::Completed {
                admitted_count: admitted,
                rejected_count: rejected,
                reason: Some("capacity reached".to_string()),
            });
        }
        Ok(self.serve(&st, person_index + 1))
    }
}
