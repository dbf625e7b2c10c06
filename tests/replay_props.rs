//! Property tests: the universal accounting/policy invariants, exact
//! reconstruction from a log at any cut point, and crash-resume producing
//! the same decision stream as an uninterrupted run.

mod common;

use common::{attrs, ScriptedServer};
use chrono::Utc;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::time::Duration;
use turnstile::{
    reconstruct, Accounting, AttrEwmaConfig, AttributeStatistics, AttributeVector, CancelFlag,
    Candidate, Constraint, ControllerConfig, Event, EventLog, EwmaConfig, Policy, PolicySpec,
    RunController, RunOutcome, Scenario, WindowConfig,
};

fn scenario(constraints: &[(&str, u64)], capacity: u64) -> Scenario {
    Scenario::new(
        constraints
            .iter()
            .map(|(a, m)| Constraint { attribute: a.to_string(), min_count: *m })
            .collect(),
        capacity,
    )
    .with_statistics(AttributeStatistics {
        relative_frequencies: BTreeMap::from([("x".to_string(), 0.4)]),
        correlations: BTreeMap::new(),
    })
}

/// Policy variants with warmups small enough for short streams to reach
/// the relaxed gates.
fn specs() -> Vec<PolicySpec> {
    vec![
        PolicySpec::Reserve,
        PolicySpec::Window(WindowConfig {
            window_size: 16,
            min_observations: 4,
            risk_margin: 0.1,
        }),
        PolicySpec::Ewma(EwmaConfig { warmup: 4, ..EwmaConfig::default() }),
        PolicySpec::AttrEwma(AttrEwmaConfig { warmup: 4, ..AttrEwmaConfig::default() }),
        PolicySpec::AttrEwma(AttrEwmaConfig {
            warmup: 4,
            gate_top_k: 1,
            corr_aware: true,
            ..AttrEwmaConfig::default()
        }),
    ]
}

fn candidate(index: usize, (x, y, z): (bool, bool, bool)) -> Candidate {
    Candidate {
        index: index as u64,
        attributes: attrs(&[("x", x), ("y", y), ("z", z)]),
    }
}

fn estimator_bounds_hold(policy: &Policy) -> bool {
    match policy {
        Policy::Reserve(_) => true,
        Policy::Window(w) => {
            w.window_len() <= w.config().window_size
                && (w.helpful_in_window() as usize) <= w.window_len()
                && (0.0..=1.0).contains(&w.p_hat())
        }
        Policy::Ewma(p) => (0.0..=1.0).contains(&p.p_hat()),
        Policy::AttrEwma(p) => ["x", "y"]
            .iter()
            .all(|a| p.p_hat(a).map_or(true, |v| (0.0..=1.0).contains(&v))),
    }
}

proptest! {
    #[test]
    fn universal_invariants_hold_for_every_policy(
        stream in prop::collection::vec(any::<(bool, bool, bool)>(), 1..120),
        need_x in 0u64..4,
        need_y in 0u64..4,
        capacity in 1u64..40,
    ) {
        let model = scenario(&[("x", need_x), ("y", need_y)], capacity);
        for spec in specs() {
            let mut policy = Policy::new(&spec, &model);
            let mut acct = Accounting::new(&model);
            let feasible_start = acct.slack() <= acct.remaining();
            for (i, arrival) in stream.iter().enumerate() {
                if acct.remaining() == 0 {
                    break;
                }
                let c = candidate(i, *arrival);
                let v = policy.decide(&c, &acct);
                if v.is_accept() {
                    acct.apply_accept(&c.attributes).unwrap();
                }
                prop_assert!(acct.admitted() <= capacity);
                for a in ["x", "y"] {
                    prop_assert!(acct.count(a) <= acct.admitted());
                }
                if feasible_start {
                    // Every policy preserves feasibility: non-helpful
                    // accepts require S < R, helpful accepts shrink S at
                    // least as fast as R.
                    prop_assert!(
                        acct.slack() <= acct.remaining(),
                        "policy {} broke feasibility",
                        spec.name()
                    );
                }
                prop_assert!(estimator_bounds_hold(&policy));
            }
            if acct.remaining() == 0 {
                prop_assert!(acct.quotas_met() || !feasible_start);
            }
        }
    }

    #[test]
    fn reconstruction_is_exact_at_any_cut(
        stream in prop::collection::vec(any::<(bool, bool, bool)>(), 1..60),
        cut_seed in any::<prop::sample::Index>(),
        trailing_request in any::<bool>(),
    ) {
        let model = scenario(&[("x", 3), ("y", 2)], 12);
        let cut = cut_seed.index(stream.len() + 1);
        for spec in specs() {
            let dir = tempfile::tempdir().unwrap();
            let log = EventLog::create(dir.path().join("run.ndjson")).unwrap();
            log.append(&Event::Start {
                ts: Utc::now(),
                scenario: 1,
                game_id: "g-prop".into(),
                capacity: model.capacity,
                constraints: model.min_counts(),
                relative_frequencies: model.statistics.relative_frequencies.clone(),
                correlations: model.statistics.correlations.clone(),
                policy: spec,
            }).unwrap();

            // Live run, logging with the controller's ordering: request,
            // decide, apply, response.
            let mut policy = Policy::new(&spec, &model);
            let mut acct = Accounting::new(&model);
            let mut responded = 0u64;
            for (i, arrival) in stream.iter().take(cut).enumerate() {
                if acct.remaining() == 0 {
                    break;
                }
                let c = candidate(i, *arrival);
                log.append(&Event::Request {
                    ts: Utc::now(),
                    scenario: 1,
                    game_id: "g-prop".into(),
                    person_index: c.index,
                    attributes: c.attributes.clone(),
                }).unwrap();
                let v = policy.decide(&c, &acct);
                if v.is_accept() {
                    acct.apply_accept(&c.attributes).unwrap();
                }
                log.append(&Event::Response {
                    ts: Utc::now(),
                    scenario: 1,
                    game_id: "g-prop".into(),
                    person_index: c.index,
                    decision: v.decision,
                }).unwrap();
                responded += 1;
            }

            // Optionally crash between `request` and `response`: the
            // request is durable and observed, accounting is not advanced.
            let acct_at_crash = acct.clone();
            if trailing_request && (responded as usize) < stream.len() && acct.remaining() > 0 {
                let c = candidate(responded as usize, stream[responded as usize]);
                log.append(&Event::Request {
                    ts: Utc::now(),
                    scenario: 1,
                    game_id: "g-prop".into(),
                    person_index: c.index,
                    attributes: c.attributes.clone(),
                }).unwrap();
                let _ = policy.decide(&c, &acct);
            }

            // Whether or not the trailing request exists, the resumed run
            // continues at the first index without a durable response.
            let state = reconstruct(log.path(), None).unwrap();
            prop_assert_eq!(state.game_id, "g-prop");
            prop_assert_eq!(&state.policy, &policy, "policy {} state diverged", spec.name());
            prop_assert_eq!(&state.accounting, &acct_at_crash);
            prop_assert_eq!(state.next_index, responded);
            prop_assert_eq!(state.decisions, responded);
        }
    }
}

#[test]
fn cancelled_run_resumes_to_the_same_stream_as_an_uninterrupted_one() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(42);
    let candidates: Vec<AttributeVector> = (0..400)
        .map(|_| attrs(&[("x", rng.gen_bool(0.35)), ("y", rng.gen_bool(0.2))]))
        .collect();
    let constraints: &[(&str, u64)] = &[("x", 12), ("y", 6)];
    let spec = PolicySpec::Ewma(EwmaConfig { warmup: 6, risk_margin: 0.0, ..EwmaConfig::default() });

    let mut cfg = ControllerConfig::new(1, "player-1");
    cfg.backoff_base = Duration::from_millis(1);
    cfg.status_interval = 0;

    // Interrupted run: cancel after 9 decisions, reconstruct, resume.
    let server = ScriptedServer::new(constraints, 40, candidates.clone());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.ndjson");
    let log = EventLog::create(&path).unwrap();
    let flag = CancelFlag::new();
    server.cancel_after(9, flag.clone());
    let summary = RunController::new(&server, log.clone(), cfg.clone())
        .with_cancel(flag)
        .run(40, spec)
        .unwrap();
    assert_eq!(summary.outcome, RunOutcome::Cancelled);

    let state = reconstruct(&path, None).unwrap();
    assert_eq!(state.next_index, 9);
    let resumed = RunController::new(&server, log, cfg.clone())
        .resume(state)
        .unwrap();
    assert_eq!(resumed.outcome, RunOutcome::Completed);
    assert_eq!(resumed.admitted, 40);

    // Reference run with no interruption.
    let reference = ScriptedServer::new(constraints, 40, candidates);
    let dir2 = tempfile::tempdir().unwrap();
    let log2 = EventLog::create(dir2.path().join("ref.ndjson")).unwrap();
    let baseline = RunController::new(&reference, log2, cfg)
        .run(40, spec)
        .unwrap();
    assert_eq!(baseline.outcome, RunOutcome::Completed);

    assert_eq!(
        server.submissions(),
        reference.submissions(),
        "resumed decision stream diverged from the uninterrupted one"
    );
    assert_eq!(resumed.rejected, baseline.rejected);
}

#[test]
fn seeded_stream_fills_capacity_and_meets_quotas() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(7);
    let candidates: Vec<AttributeVector> = (0..2000)
        .map(|_| attrs(&[("x", rng.gen_bool(0.5)), ("y", rng.gen_bool(0.4))]))
        .collect();
    let server = ScriptedServer::new(&[("x", 30), ("y", 20)], 100, candidates).with_statistics(
        AttributeStatistics {
            relative_frequencies: BTreeMap::from([
                ("x".to_string(), 0.5),
                ("y".to_string(), 0.4),
            ]),
            correlations: BTreeMap::new(),
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let log = EventLog::create(dir.path().join("run.ndjson")).unwrap();
    let mut cfg = ControllerConfig::new(2, "player-1");
    cfg.status_interval = 0;
    let summary = RunController::new(&server, log, cfg)
        .run(100, PolicySpec::AttrEwma(AttrEwmaConfig::default()))
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.admitted, 100);
    assert!(summary.remaining_needed.values().all(|n| *n == 0));
    assert_eq!(server.admitted(), 100);
}
