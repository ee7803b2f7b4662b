//! HealthQuest - goal and challenge progress for diabetes self-management.
//!
//! # Overview
//!
//! Patients log time-stamped health metrics (steps, glucose, diet, hydration, weight and so
//! on). From that append-only log HealthQuest derives, on every read:
//!
//! - progress towards personal goals over the current day, week or month, under each metric's
//!   aggregation behavior (cumulative, average, change, latest)
//! - progress on shared challenges, completing each at most once per owner and crediting its
//!   reward points exactly once
//! - point balances, reward claims, period summaries, logging streaks and leaderboards
//!
//! Periods are bucketed in a single operating time zone; timestamps are stored in UTC.
//!
//! # Modules
//!
//! - [`model`]: Records, responses and request types
//! - [`period`]: Calendar windows in the operating zone
//! - [`metrics`]: Metric catalogue (behavior, valid periods, health bands)
//! - [`aggregation`]: Reducing a history to a progress value and chart series
//! - [`goals`]: Goal progress calculator
//! - [`challenges`]: Challenge catalogue and completion state machine
//! - [`ledger`]: Points balance and reward claims
//! - [`leaderboard`]: Rankings over opted-in owners
//! - [`tracker`]: The engine facade tying the above to storage
//! - [`storage`]: SQLite storage layer
//! - [`api`]: HTTP API handlers
//! - [`config`]: Environment configuration
//! - [`clock`]: Injectable time source
//! - [`error`]: Error taxonomy

pub mod aggregation;
pub mod api;
pub mod challenges;
pub mod clock;
pub mod config;
pub mod error;
pub mod goals;
pub mod leaderboard;
pub mod ledger;
pub mod metrics;
pub mod model;
pub mod period;
pub mod storage;
pub mod tracker;
