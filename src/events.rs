//! Durable NDJSON event log.
//!
//! One JSON object per line, seven event kinds. The log is the replay
//! source for crash-resume, so durability trumps throughput: every append
//! opens the file, writes a single line, flushes, fsyncs, and closes the
//! handle before the controller proceeds to the next submission. This
//! bounds the replay gap on crash to a single candidate.

use crate::{AttributeId, AttributeVector, Decision, Error, PolicySpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One logged event.
///
/// `ts` is wall-clock ISO-8601; `scenario` and `gameId` are stamped on
/// every kind so a log line is self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// Game opened: everything needed to reconstruct accounting and policy,
    /// including scenario priors (so a resumed run does not lose them).
    #[serde(rename_all = "camelCase")]
    Start {
        ts: DateTime<Utc>,
        scenario: u32,
        game_id: String,
        capacity: u64,
        constraints: BTreeMap<AttributeId, u64>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        relative_frequencies: BTreeMap<AttributeId, f64>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        correlations: BTreeMap<AttributeId, BTreeMap<AttributeId, f64>>,
        #[serde(flatten)]
        policy: PolicySpec,
    },

    /// A candidate was received. Written before the policy is consulted, so
    /// a crash after deciding still leaves a replayable trail.
    #[serde(rename_all = "camelCase")]
    Request {
        ts: DateTime<Utc>,
        scenario: u32,
        game_id: String,
        person_index: u64,
        attributes: AttributeVector,
    },

    /// The decision rendered for a candidate.
    #[serde(rename_all = "camelCase")]
    Response {
        ts: DateTime<Utc>,
        scenario: u32,
        game_id: String,
        person_index: u64,
        decision: Decision,
    },

    /// Periodic progress snapshot.
    #[serde(rename_all = "camelCase")]
    Progress {
        ts: DateTime<Utc>,
        scenario: u32,
        game_id: String,
        admitted: u64,
        rejected: u64,
        count_by_attr: BTreeMap<AttributeId, u64>,
    },

    /// The server reported an index skew and the controller realigned.
    #[serde(rename_all = "camelCase")]
    Resync {
        ts: DateTime<Utc>,
        scenario: u32,
        game_id: String,
        expected: u64,
        submitted: u64,
    },

    /// Terminal success.
    #[serde(rename_all = "camelCase")]
    Completed {
        ts: DateTime<Utc>,
        scenario: u32,
        game_id: String,
        admitted: u64,
        rejected: u64,
        reason: String,
    },

    /// Terminal failure.
    #[serde(rename_all = "camelCase")]
    Failed {
        ts: DateTime<Utc>,
        scenario: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        game_id: Option<String>,
        error: String,
    },
}

/// Append-only NDJSON writer with fsync-per-write durability.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// Open (or create) a log at `path`, creating parent directories.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(Error::LogWrite)?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event: open, write one line, flush, fsync, close.
    pub fn append(&self, event: &Event) -> Result<(), Error> {
        let mut line = serde_json::to_string(event).map_err(Error::LogFormat)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(Error::LogWrite)?;
        file.write_all(line.as_bytes()).map_err(Error::LogWrite)?;
        file.flush().map_err(Error::LogWrite)?;
        file.sync_all().map_err(Error::LogWrite)?;
        Ok(())
    }
}

/// Outcome of scanning a log file: parsed events plus a tally of lines
/// that did not parse (a crash can truncate the final line).
#[derive(Debug, Clone)]
pub struct LogScan {
    pub events: Vec<Event>,
    pub skipped_lines: usize,
    pub first_error: Option<(usize, String)>,
}

/// Read every parseable event from an NDJSON log, skipping blank and
/// malformed lines.
pub fn read_log(path: &Path) -> Result<LogScan, Error> {
    let file = std::fs::File::open(path).map_err(Error::LogRead)?;
    let mut events = Vec::new();
    let mut skipped_lines = 0usize;
    let mut first_error = None;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(Error::LogRead)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => events.push(event),
            Err(err) => {
                skipped_lines += 1;
                if first_error.is_none() {
                    first_error = Some((line_no + 1, err.to_string()));
                }
            }
        }
    }
    Ok(LogScan { events, skipped_lines, first_error })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EwmaConfig, PolicySpec};

    fn request(person_index: u64) -> Event {
        Event::Request {
            ts: Utc::now(),
            scenario: 1,
            game_id: "g-1".into(),
            person_index,
            attributes: BTreeMap::from([("x".to_string(), true)]),
        }
    }

    #[test]
    fn start_event_carries_policy_and_params() {
        let e = Event::Start {
            ts: Utc::now(),
            scenario: 2,
            game_id: "g-2".into(),
            capacity: 100,
            constraints: BTreeMap::from([("x".to_string(), 10)]),
            relative_frequencies: BTreeMap::from([("x".to_string(), 0.2)]),
            correlations: BTreeMap::new(),
            policy: PolicySpec::Ewma(EwmaConfig::default()),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "start");
        assert_eq!(json["gameId"], "g-2");
        assert_eq!(json["policy"], "ewma");
        assert_eq!(json["policyParams"]["alpha"], 0.03);
        assert_eq!(json["relativeFrequencies"]["x"], 0.2);
        // Empty correlations are omitted entirely.
        assert!(json.get("correlations").is_none());

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn request_and_response_use_wire_names() {
        let json = serde_json::to_value(request(4)).unwrap();
        assert_eq!(json["kind"], "request");
        assert_eq!(json["personIndex"], 4);
        assert_eq!(json["attributes"]["x"], true);

        let e = Event::Response {
            ts: Utc::now(),
            scenario: 1,
            game_id: "g-1".into(),
            person_index: 4,
            decision: Decision::Reject,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["decision"], "reject");
    }

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::create(dir.path().join("run.ndjson")).unwrap();
        for i in 0..3 {
            log.append(&request(i)).unwrap();
        }
        let scan = read_log(log.path()).unwrap();
        assert_eq!(scan.events.len(), 3);
        assert_eq!(scan.skipped_lines, 0);
        match &scan.events[2] {
            Event::Request { person_index, .. } => assert_eq!(*person_index, 2),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn reader_skips_torn_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.ndjson");
        let log = EventLog::create(&path).unwrap();
        log.append(&request(0)).unwrap();
        // Simulate a crash mid-write: a truncated trailing line.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"kind\":\"requ").unwrap();
        drop(f);

        let scan = read_log(&path).unwrap();
        assert_eq!(scan.events.len(), 1);
        assert_eq!(scan.skipped_lines, 1);
        assert_eq!(scan.first_error.as_ref().unwrap().0, 2);
    }

    #[test]
    fn create_makes_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/nested/run.ndjson");
        let log = EventLog::create(&path).unwrap();
        log.append(&request(0)).unwrap();
        assert!(path.exists());
    }
}
