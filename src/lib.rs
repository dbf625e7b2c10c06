//! `turnstile`: online admission control under per-attribute quotas.
//!
//! A remote game server streams candidates one at a time; each carries a
//! vector of boolean attributes. For every candidate the agent must
//! irrevocably accept or reject before seeing the next one, filling a fixed
//! capacity of admits while guaranteeing per-attribute minimum quotas. The
//! objective is to minimize rejections subject to quota feasibility.
//!
//! Goals:
//! - **Deterministic by default**: same scenario + observation stream +
//!   config → same decision stream. No internal randomness.
//! - **Feasibility first**: the quota-reserve baseline never jeopardizes a
//!   feasible position; relaxed policies only spend slack their streaming
//!   estimates say the future can repay.
//! - **Durable and replayable**: every candidate and decision is fsynced to
//!   an NDJSON event log before the decision is submitted, so an
//!   interrupted game reconstructs to the exact same decision stream.
//!
//! Included policies:
//! - [`QuotaReserve`]: conservative baseline — accept helpful candidates;
//!   spend a seat on a non-helpful one only while `S < R`.
//! - [`WindowPolicy`]: sliding-window empirical helpful rate against the
//!   break-even rate `S / (R - 1)` with a safety margin.
//! - [`EwmaPolicy`]: global EWMA helpful rate, same break-even gate.
//! - [`AttrEwmaPolicy`]: per-attribute EWMA arrival estimates with optional
//!   correlation-aware inflation and top-K gating.
//!
//! Non-goals:
//! - No offline training; no learned parameters beyond streaming estimates.
//! - No multi-game concurrency within a single controller instance.
//! - Feasibility is guaranteed when a feasible strategy exists and the
//!   relaxation's safety margin is respected — optimality is not.

#![forbid(unsafe_code)]

mod scenario;
pub use scenario::*;

mod accounting;
pub use accounting::*;

mod decision;
pub use decision::*;

mod error;
pub use error::*;

mod reserve;
pub use reserve::*;

mod window;
pub use window::*;

mod ewma;
pub use ewma::*;

mod attr_ewma;
pub use attr_ewma::*;

mod policy;
pub use policy::*;

mod events;
pub use events::*;

mod replay;
pub use replay::*;

mod server;
pub use server::*;

mod client;
pub use client::*;

mod controller;
pub use controller::*;

pub const TURNSTILE_VERSION: &str = env!("CARGO_PKG_VERSION");
