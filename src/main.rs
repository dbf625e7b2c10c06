use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use turnstile::{
    reconstruct, Accounting, AttrEwmaConfig, ControllerConfig, Error, EventLog, EwmaConfig,
    HttpGameServer, Policy, PolicySpec, ResumeState, RunController, RunSummary, Scenario,
    WindowConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyKind {
    Reserve,
    Window,
    Ewma,
    AttrEwma,
}

#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about = "Online admission-control agent")]
struct Args {
    /// API base URL.
    #[arg(long, env = "BASE_URL")]
    base_url: String,

    /// Player identifier.
    #[arg(long, env = "PLAYER_ID")]
    player_id: String,

    #[arg(long, default_value_t = 1)]
    scenario: u32,

    /// Capacity to fill.
    #[arg(long, default_value_t = 1000)]
    capacity: u64,

    /// Policy to run. New games default to `reserve`; resumed games keep
    /// the logged policy unless this (with any tuning flags) is passed.
    #[arg(long, value_enum)]
    policy: Option<PolicyKind>,

    /// Smoothing factor for the EWMA policies.
    #[arg(long)]
    alpha: Option<f64>,

    /// Safety margin for the relaxed policies.
    #[arg(long)]
    risk_margin: Option<f64>,

    /// Warmup observations before relaxing gates.
    #[arg(long)]
    warmup: Option<u64>,

    /// Window size for the window policy.
    #[arg(long)]
    window_size: Option<usize>,

    /// Minimum observations before relaxing the window policy.
    #[arg(long)]
    min_observations: Option<u64>,

    /// Gate only the K tightest under-filled attributes (0 gates all).
    #[arg(long)]
    gate_top_k: Option<usize>,

    /// Enable correlation-aware expectation (attr-ewma).
    #[arg(long, default_value_t = false)]
    corr_aware: bool,

    /// Scale for correlation inflation, 0 to 1 (attr-ewma).
    #[arg(long)]
    corr_beta: Option<f64>,

    /// HTTP timeout in seconds.
    #[arg(long, env = "TIMEOUT", default_value_t = 30.0)]
    timeout: f64,

    /// Transient-error retries per call.
    #[arg(long, env = "RETRIES", default_value_t = 3)]
    retries: u32,

    /// NDJSON event log path.
    #[arg(long)]
    log_json: Option<PathBuf>,

    /// Human-readable progress line every N decisions (0 disables).
    #[arg(long, default_value_t = 100)]
    log_interval: u64,

    /// Progress event in the NDJSON log every N decisions (0 disables).
    #[arg(long, default_value_t = 100)]
    progress_interval: u64,

    /// Resume a run from a prior NDJSON log.
    #[arg(long)]
    resume_from_log: Option<PathBuf>,

    /// Resume target gameId (overrides the log if set).
    #[arg(long)]
    game_id: Option<String>,

    /// Resume starting personIndex (overrides the log if set).
    #[arg(long)]
    start_index: Option<u64>,
}

impl Args {
    /// Whether any policy-selection or tuning flag was given. When none
    /// is, a resumed run rebuilds the policy logged in the `start` event.
    fn policy_flags_given(&self) -> bool {
        self.policy.is_some()
            || self.alpha.is_some()
            || self.risk_margin.is_some()
            || self.warmup.is_some()
            || self.window_size.is_some()
            || self.min_observations.is_some()
            || self.gate_top_k.is_some()
            || self.corr_aware
            || self.corr_beta.is_some()
    }

    fn policy_spec(&self) -> PolicySpec {
        match self.policy.unwrap_or(PolicyKind::Reserve) {
            PolicyKind::Reserve => PolicySpec::Reserve,
            PolicyKind::Window => {
                let d = WindowConfig::default();
                PolicySpec::Window(WindowConfig {
                    window_size: self.window_size.unwrap_or(d.window_size),
                    min_observations: self.min_observations.unwrap_or(d.min_observations),
                    risk_margin: self.risk_margin.unwrap_or(d.risk_margin),
                })
            }
            PolicyKind::Ewma => {
                let d = EwmaConfig::default();
                PolicySpec::Ewma(EwmaConfig {
                    alpha: self.alpha.unwrap_or(d.alpha),
                    risk_margin: self.risk_margin.unwrap_or(d.risk_margin),
                    warmup: self.warmup.unwrap_or(d.warmup),
                    prior: d.prior,
                })
            }
            PolicyKind::AttrEwma => {
                let d = AttrEwmaConfig::default();
                PolicySpec::AttrEwma(AttrEwmaConfig {
                    alpha: self.alpha.unwrap_or(d.alpha),
                    risk_margin: self.risk_margin.unwrap_or(d.risk_margin),
                    warmup: self.warmup.unwrap_or(d.warmup),
                    corr_aware: self.corr_aware,
                    corr_beta: self.corr_beta.unwrap_or(d.corr_beta),
                    gate_top_k: self.gate_top_k.unwrap_or(d.gate_top_k),
                })
            }
        }
    }

    fn log_path(&self, spec: &PolicySpec) -> PathBuf {
        if let Some(path) = &self.log_json {
            return path.clone();
        }
        let prefix = if self.resume_from_log.is_some() { "resume" } else { "run" };
        let ts = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        PathBuf::from("logs").join(format!(
            "{prefix}-{}-s{}-{ts}.ndjson",
            spec.name(),
            self.scenario
        ))
    }
}

fn resume_state(args: &Args) -> Result<ResumeState, Error> {
    // Only an explicit request changes the policy of a resumed run; with no
    // policy flags the logged `start` event's spec is rebuilt verbatim.
    let override_spec = if args.policy_flags_given() {
        if args.policy.is_none() && args.resume_from_log.is_some() {
            return Err(Error::Resume(
                "pass --policy alongside tuning flags to override a resumed run's policy".into(),
            ));
        }
        Some(args.policy_spec())
    } else {
        None
    };
    let mut state = match &args.resume_from_log {
        Some(path) => reconstruct(path, override_spec)?,
        None => {
            // Manual resume: gameId + startIndex only, constraints unknown.
            let (game_id, start_index) = match (&args.game_id, args.start_index) {
                (Some(g), Some(i)) => (g.clone(), i),
                _ => {
                    return Err(Error::Resume(
                        "provide --resume-from-log or both --game-id and --start-index".into(),
                    ))
                }
            };
            let scenario = Scenario::new(Vec::new(), args.capacity);
            let accounting = Accounting::new(&scenario);
            let policy = Policy::new(&args.policy_spec(), &scenario);
            ResumeState {
                scenario_id: args.scenario,
                game_id,
                scenario,
                accounting,
                policy,
                next_index: start_index,
                observed_through: start_index.checked_sub(1),
                decision_history: std::collections::BTreeMap::new(),
                decisions: 0,
            }
        }
    };
    if let Some(game_id) = &args.game_id {
        state.game_id = game_id.clone();
    }
    if let Some(start_index) = args.start_index {
        state.next_index = start_index;
    }
    Ok(state)
}

fn report(summary: &RunSummary) {
    let satisfied = summary.remaining_needed.values().all(|n| *n == 0);
    match summary.outcome {
        turnstile::RunOutcome::Completed => eprintln!(
            "Completed. Admitted: {}. Rejected: {}. Constraints: {}.",
            summary.admitted,
            summary.rejected,
            if satisfied { "satisfied" } else { "unsatisfied" }
        ),
        turnstile::RunOutcome::Failed => eprintln!(
            "Failed: {}. Admitted: {}. Rejected: {}.",
            summary.error.as_deref().unwrap_or("unknown error"),
            summary.admitted,
            summary.rejected
        ),
        turnstile::RunOutcome::Cancelled => eprintln!(
            "Cancelled. Admitted: {}. Rejected: {}.",
            summary.admitted, summary.rejected
        ),
    }
}

fn run(args: &Args) -> Result<RunSummary, Error> {
    let server = HttpGameServer::new(&args.base_url, Duration::from_secs_f64(args.timeout))?;
    let mut cfg = ControllerConfig::new(args.scenario, args.player_id.clone());
    cfg.retries = args.retries;
    cfg.progress_interval = args.progress_interval;
    cfg.status_interval = args.log_interval;

    let resuming =
        args.resume_from_log.is_some() || args.game_id.is_some() || args.start_index.is_some();
    if resuming {
        let state = resume_state(args)?;
        let spec = state.policy.spec();
        let log = EventLog::create(args.log_path(&spec))?;
        tracing::info!(path = %log.path().display(), policy = spec.name(), "logging to");
        RunController::new(server, log, cfg).resume(state)
    } else {
        let spec = args.policy_spec();
        let log = EventLog::create(args.log_path(&spec))?;
        tracing::info!(path = %log.path().display(), policy = spec.name(), "logging to");
        RunController::new(server, log, cfg).run(args.capacity, spec)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(summary) => {
            report(&summary);
            ExitCode::from(summary.outcome.exit_code() as u8)
        }
        Err(e) => {
            tracing::error!(error = %e, "unrecoverable error");
            ExitCode::from(1)
        }
    }
}
