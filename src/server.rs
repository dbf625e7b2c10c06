//! Server collaborator: wire types and the transport seam.
//!
//! The controller talks to the game server through the [`GameServer`]
//! trait, so tests drive it with scripted in-memory servers and production
//! uses the blocking HTTP client in [`crate::client`]. The wire shapes
//! mirror the challenge API: `new-game` returns constraints plus attribute
//! statistics, and `decide-and-next` both submits a decision and fetches
//! the next candidate.

use crate::{AttributeStatistics, Candidate, Constraint, Error};
use serde::Deserialize;

/// The two remote operations the controller needs.
///
/// `decide_and_next` with `accept = None` is a plain fetch: it is issued
/// once at game start for candidate 0 and again after a resync to
/// re-request the server's expected index without submitting a decision.
pub trait GameServer {
    fn new_game(&self, scenario: u32, player_id: &str) -> Result<NewGameResponse, Error>;

    fn decide_and_next(
        &self,
        game_id: &str,
        person_index: u64,
        accept: Option<bool>,
    ) -> Result<DecideAndNext, Error>;
}

impl<S: GameServer + ?Sized> GameServer for &S {
    fn new_game(&self, scenario: u32, player_id: &str) -> Result<NewGameResponse, Error> {
        (**self).new_game(scenario, player_id)
    }

    fn decide_and_next(
        &self,
        game_id: &str,
        person_index: u64,
        accept: Option<bool>,
    ) -> Result<DecideAndNext, Error> {
        (**self).decide_and_next(game_id, person_index, accept)
    }
}

/// Response to `new-game`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGameResponse {
    pub game_id: String,
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub attribute_statistics: AttributeStatistics,
}

/// Response to `decide-and-next`, discriminated by `status`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum DecideAndNext {
    Running {
        next_person: Option<Candidate>,
        #[serde(default)]
        admitted_count: u64,
        #[serde(default)]
        rejected_count: u64,
    },
    Completed {
        #[serde(default)]
        admitted_count: u64,
        #[serde(default)]
        rejected_count: u64,
        #[serde(default)]
        reason: Option<String>,
    },
    Failed {
        #[serde(alias = "reason")]
        error: String,
        #[serde(default)]
        admitted_count: Option<u64>,
        #[serde(default)]
        rejected_count: Option<u64>,
    },
}

/// Parse the server's index-skew message `"Expected person X, got Y"`.
///
/// Returns `(expected, submitted)`. Tolerates surrounding text (the
/// message may be embedded in a larger error body).
pub fn parse_index_skew(message: &str) -> Option<(u64, u64)> {
    let rest = message.split("Expected person ").nth(1)?;
    let (expected, rest) = rest.split_once(", got ")?;
    let expected = expected.trim().parse::<u64>().ok()?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    let submitted = digits.parse::<u64>().ok()?;
    Some((expected, submitted))
}
