//! The engine facade the HTTP layer talks to.
//!
//! [`Tracker`] owns the storage handle, the injected configuration (metric and challenge
//! catalogues, operating zone) and the clock. Goal and logging operations live here; challenge,
//! points and leaderboard operations are in their own modules as further `impl Tracker` blocks.
//!
//! Writes that read-modify-write an owner's state are serialised per owner in-process and run
//! inside a single transaction, retried a bounded number of times when SQLite reports lock
//! contention from another process.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};

use crate::aggregation::{AggregationEngine, summarize};
use crate::challenges::ChallengeCatalog;
use crate::clock::Clock;
use crate::error::{Result, TrackerError, ValidationError};
use crate::ledger::RewardCatalog;
use crate::goals::{GoalProgressCalculator, percent_complete, validate_goal};
use crate::metrics::MetricCatalog;
use crate::model::{
    Behavior, Goal, GoalProgressReport, MetricKey, MetricSample, MetricSummary, PeriodKind,
};
use crate::period::{Zone, resolve_period};
use crate::storage::Storage;

/// Attempts for a write transaction before a conflict is surfaced.
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Back-off step between write attempts.
const RETRY_BACKOFF_MS: u64 = 25;

pub const DEFAULT_LEADERBOARD_SIZE: u32 = 5;

/// Static configuration injected at construction.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub metrics: Arc<MetricCatalog>,
    pub challenges: Arc<ChallengeCatalog>,
    pub rewards: Arc<RewardCatalog>,
    pub zone: Zone,
    pub leaderboard_size: u32,
}

impl TrackerConfig {
    /// Production catalogues in the given zone.
    pub fn standard(zone: Zone) -> Result<Self> {
        Ok(Self {
            metrics: Arc::new(MetricCatalog::standard()),
            challenges: Arc::new(ChallengeCatalog::standard()?),
            rewards: Arc::new(RewardCatalog::standard()),
            zone,
            leaderboard_size: DEFAULT_LEADERBOARD_SIZE,
        })
    }
}

/// One async mutex per owner, so concurrent writes for the same owner run one at a time.
#[derive(Debug, Clone, Default)]
pub struct OwnerLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl OwnerLocks {
    pub async fn lock(&self, owner_id: i64) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(map.entry(owner_id).or_default())
        };
        mutex.lock_owned().await
    }
}

#[derive(Clone)]
pub struct Tracker {
    pub(crate) storage: Storage,
    pub(crate) metrics: Arc<MetricCatalog>,
    pub(crate) challenges: Arc<ChallengeCatalog>,
    pub(crate) rewards: Arc<RewardCatalog>,
    pub(crate) calculator: GoalProgressCalculator,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) locks: OwnerLocks,
    pub(crate) leaderboard_size: u32,
}

impl Tracker {
    pub fn new(storage: Storage, config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        let engine = AggregationEngine::new(Arc::clone(&config.metrics), config.zone);
        Self {
            storage,
            metrics: config.metrics,
            challenges: config.challenges,
            rewards: config.rewards,
            calculator: GoalProgressCalculator::new(engine),
            clock,
            locks: OwnerLocks::default(),
            leaderboard_size: config.leaderboard_size,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn metrics(&self) -> &MetricCatalog {
        &self.metrics
    }

    pub fn zone(&self) -> Zone {
        self.calculator.engine().zone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run a write transaction, retrying it while it loses lock races.
    pub(crate) async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut run: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match run().await {
                Err(e) if e.is_transient() && attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(operation, attempt, "Write conflict, retrying");
                    tokio::time::sleep(StdDuration::from_millis(RETRY_BACKOFF_MS * u64::from(attempt)))
                        .await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn require_owner(&self, owner_id: i64) -> Result<()> {
        if self.storage.owner_exists(owner_id).await? {
            Ok(())
        } else {
            Err(TrackerError::not_found(format!("owner {owner_id}")))
        }
    }

    // ------------------------------------------------------------------------
    // Logging
    // ------------------------------------------------------------------------

    /// Append a sample and re-evaluate the challenges that track its metric.
    #[instrument(skip(self))]
    pub async fn record_sample(
        &self,
        owner_id: i64,
        metric: MetricKey,
        value: f64,
        recorded_at: Option<DateTime<Utc>>,
    ) -> Result<MetricSample> {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue.into());
        }
        self.require_owner(owner_id).await?;

        let sample = MetricSample {
            owner_id,
            metric,
            value,
            recorded_at: recorded_at.unwrap_or_else(|| self.clock.now()),
        };
        self.storage.insert_sample(&sample).await?;
        info!(owner_id, metric = %metric, value, "Sample recorded");

        for challenge in self.storage.list_challenges().await? {
            let tracks_metric = self
                .challenges
                .metric_for(&challenge.name)
                .is_ok_and(|target| target.metric == metric);
            if !tracks_metric {
                continue;
            }
            if let Err(e) = self
                .update_challenge_progress(owner_id, challenge.id, false)
                .await
            {
                warn!(owner_id, challenge = %challenge.name, error = %e, "Challenge update after logging failed");
            }
        }

        Ok(sample)
    }

    /// The latest samples across every metric, newest first.
    pub async fn recent_activity(&self, owner_id: i64, limit: u32) -> Result<Vec<MetricSample>> {
        self.storage.recent_samples(owner_id, limit).await
    }

    // ------------------------------------------------------------------------
    // Goals
    // ------------------------------------------------------------------------

    /// Progress towards a goal in its current period.
    ///
    /// Missing data is not an error: an owner with no history gets an empty report.
    pub async fn get_goal_progress(
        &self,
        owner_id: i64,
        metric: MetricKey,
        period: PeriodKind,
        target_value: Option<f64>,
    ) -> Result<GoalProgressReport> {
        let history = self.storage.history(owner_id, metric).await?;
        let progress =
            self.calculator
                .calculate(metric, period, target_value, &history, self.clock.now());

        let percent = percent_complete(progress.behavior, progress.progress_value, target_value);
        Ok(GoalProgressReport {
            progress,
            target_value,
            percent_complete: percent,
        })
    }

    pub async fn list_goals(&self, owner_id: i64) -> Result<Vec<Goal>> {
        self.storage.list_goals(owner_id).await
    }

    /// Create the goal for (owner, metric, period) or overwrite its target. Returns its id.
    #[instrument(skip(self))]
    pub async fn upsert_goal(
        &self,
        owner_id: i64,
        metric: MetricKey,
        target_value: f64,
        period: PeriodKind,
    ) -> Result<i64> {
        validate_goal(&self.metrics, metric, target_value, period)?;
        self.require_owner(owner_id).await?;

        let _guard = self.locks.lock(owner_id).await;
        let id = self
            .with_retry("upsert_goal", || {
                self.storage.upsert_goal(owner_id, metric, target_value, period)
            })
            .await?;

        info!(owner_id, goal_id = id, metric = %metric, target_value, period = %period, "Goal saved");
        Ok(id)
    }

    pub async fn delete_goal(&self, goal_id: i64) -> Result<bool> {
        let deleted = self.storage.delete_goal(goal_id).await?;
        if deleted {
            info!(goal_id, "Goal deleted");
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------------
    // Summaries
    // ------------------------------------------------------------------------

    /// Every metric reduced over the current period, skipping metrics with no samples.
    pub async fn metric_summary(
        &self,
        owner_id: i64,
        period: PeriodKind,
    ) -> Result<Vec<MetricSummary>> {
        let window = resolve_period(self.clock.now(), period, self.zone());

        let mut summary = Vec::new();
        for definition in self.metrics.iter() {
            let samples = match &window {
                Some(window) => {
                    self.storage
                        .history_in_window(owner_id, definition.key, window)
                        .await?
                }
                None => self.storage.history(owner_id, definition.key).await?,
            };
            let refs: Vec<&MetricSample> = samples.iter().collect();

            if let Some(value) = summarize(definition.behavior, &refs) {
                // Bands describe single readings and daily totals, not changes or longer sums.
                let band = match (definition.behavior, period) {
                    (Behavior::Average | Behavior::Latest, _)
                    | (Behavior::Cumulative, PeriodKind::Daily) => {
                        self.metrics.classify(definition.key, value)
                    }
                    _ => None,
                };
                summary.push(MetricSummary {
                    metric: definition.key,
                    label: definition.label.to_string(),
                    unit: definition.unit.to_string(),
                    category: definition.category,
                    behavior: definition.behavior,
                    value,
                    band,
                });
            }
        }
        Ok(summary)
    }

    /// Consecutive local days, ending today, with at least one logged sample.
    pub async fn log_streak(&self, owner_id: i64) -> Result<u32> {
        let times = self.storage.sample_times(owner_id).await?;
        let zone = self.zone();
        let dates: Vec<NaiveDate> = times.into_iter().map(|t| zone.local_date(t)).collect();
        Ok(streak_ending(zone.local_date(self.clock.now()), &dates))
    }
}

/// Length of the run of consecutive days ending at `today`. `dates` must be newest first.
fn streak_ending(today: NaiveDate, dates: &[NaiveDate]) -> u32 {
    let mut expected = today;
    let mut streak = 0;
    for &date in dates {
        if date == expected {
            streak += 1;
            expected -= Duration::days(1);
        } else if date < expected {
            break;
        }
    }
    streak
}
