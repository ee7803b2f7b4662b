//! Challenges: the shared, point-awarding targets and the per-owner progress state machine.
//!
//! Every evaluation recomputes progress from the metric log over the challenge's current
//! period, clamps it to the goal, and completes the challenge the first time the goal is
//! reached. The `completed` flag is the only gate for the point award: the flag flip and the
//! credit are written in one transaction, and the flip is conditional on the flag still being
//! unset, so no interleaving of evaluations can award twice.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::aggregation::{window_decrease, window_total};
use crate::error::{Result, TrackerError};
use crate::model::{
    Challenge, ChallengeProgress, ChallengeState, ChallengeStatus, MetricKey, MetricSample,
    PeriodKind,
};
use crate::period::resolve_period;
use crate::storage::{self, NewChallenge};
use crate::tracker::Tracker;

/// How a challenge turns its metric's window into progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Measure {
    /// Sum of the window.
    Total,
    /// Drop from the first to the last sample of the window.
    Decrease,
}

impl Measure {
    pub fn apply(self, samples: &[MetricSample]) -> f64 {
        let refs: Vec<&MetricSample> = samples.iter().collect();
        match self {
            Measure::Total => window_total(&refs),
            Measure::Decrease => window_decrease(&refs),
        }
    }
}

/// The metric a challenge tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChallengeMetric {
    pub metric: MetricKey,
    pub measure: Measure,
}

/// A challenge as configured, before seeding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub challenge_type: PeriodKind,
    pub goal_value: f64,
    pub reward_points: i64,
    pub target: ChallengeMetric,
}

impl ChallengeDefinition {
    pub fn to_new(&self) -> NewChallenge {
        NewChallenge {
            name: self.name.to_string(),
            description: self.description.to_string(),
            challenge_type: self.challenge_type,
            goal_value: self.goal_value,
            reward_points: self.reward_points,
        }
    }
}

/// Validated challenge configuration: the seed list plus the name to metric mapping.
#[derive(Debug, Clone)]
pub struct ChallengeCatalog {
    definitions: Vec<ChallengeDefinition>,
    mapping: HashMap<String, ChallengeMetric>,
}

impl ChallengeCatalog {
    /// Build a catalogue, rejecting definitions that could never be evaluated.
    pub fn new(definitions: Vec<ChallengeDefinition>) -> Result<Self> {
        let mut seen = HashSet::new();
        for definition in &definitions {
            if !seen.insert(definition.name) {
                return Err(TrackerError::Config(format!(
                    "duplicate challenge '{}'",
                    definition.name
                )));
            }
            if !definition.challenge_type.is_calendar() {
                return Err(TrackerError::Config(format!(
                    "challenge '{}' must be daily, weekly or monthly",
                    definition.name
                )));
            }
            if !(definition.goal_value.is_finite() && definition.goal_value > 0.0) {
                return Err(TrackerError::Config(format!(
                    "challenge '{}' needs a positive goal",
                    definition.name
                )));
            }
            if definition.reward_points < 0 {
                return Err(TrackerError::Config(format!(
                    "challenge '{}' has negative reward points",
                    definition.name
                )));
            }
        }

        let mapping = definitions
            .iter()
            .map(|d| (d.name.to_string(), d.target))
            .collect();

        Ok(Self {
            definitions,
            mapping,
        })
    }

    pub fn definitions(&self) -> &[ChallengeDefinition] {
        &self.definitions
    }

    /// Metric mapping for a challenge name.
    pub fn metric_for(&self, name: &str) -> Result<ChallengeMetric> {
        self.mapping
            .get(name)
            .copied()
            .ok_or_else(|| TrackerError::UnmappedChallenge(name.to_string()))
    }

    /// The production challenge set.
    pub fn standard() -> Result<Self> {
        use Measure::{Decrease, Total};
        use MetricKey::*;
        use PeriodKind::{Daily, Monthly, Weekly};

        let def = |name, description, challenge_type, goal_value, reward_points, metric, measure| {
            ChallengeDefinition {
                name,
                description,
                challenge_type,
                goal_value,
                reward_points,
                target: ChallengeMetric { metric, measure },
            }
        };

        Self::new(vec![
            def("Daily Steps", "Walk 10,000 steps today.", Daily, 10_000.0, 50, StepsTaken, Total),
            def("Daily Calories Burned", "Burn 500 kcal today.", Daily, 500.0, 50, CaloriesBurned, Total),
            def("Daily Active Time", "Stay active for 30 minutes today.", Daily, 30.0, 40, ActiveMinutes, Total),
            def("Daily Hydration", "Drink 2 litres of water today.", Daily, 2.0, 30, WaterIntake, Total),
            def("Weekly Steps", "Walk 70,000 steps this week.", Weekly, 70_000.0, 150, StepsTaken, Total),
            def("Weekly Calories Burned", "Burn 3,500 kcal this week.", Weekly, 3_500.0, 150, CaloriesBurned, Total),
            def("Weekly Distance Walked", "Walk 30 km this week.", Weekly, 30.0, 120, DistanceWalked, Total),
            def("Weekly Running Distance", "Run 20 km this week.", Weekly, 20.0, 150, DistanceRan, Total),
            def("Monthly Steps", "Walk 300,000 steps this month.", Monthly, 300_000.0, 500, StepsTaken, Total),
            def("Monthly Calories Burned", "Burn 15,000 kcal this month.", Monthly, 15_000.0, 500, CaloriesBurned, Total),
            def("Monthly Weight Loss", "Lose 2 kg this month.", Monthly, 2.0, 400, Weight, Decrease),
            def("Monthly Fiber Intake", "Eat 750 g of fiber this month.", Monthly, 750.0, 300, FiberIntake, Total),
        ])
    }
}

/// What one evaluation decided for a progress row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub progress: f64,
    /// This evaluation completes the challenge and must award its points.
    pub completes: bool,
}

/// The state machine step. Progress is clamped to the goal; a completed row is terminal and
/// stays pinned at the goal whatever the current period measures.
pub fn transition(current: &ChallengeProgress, measured: f64, goal_value: f64) -> Transition {
    if current.completed {
        return Transition {
            progress: goal_value,
            completes: false,
        };
    }

    // Compared unrounded; 1.996 against a goal of 2 is not complete.
    let progress = measured.max(0.0).min(goal_value);
    Transition {
        progress,
        completes: progress >= goal_value,
    }
}

/// Outcome of a successful evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeUpdate {
    pub challenge_id: i64,
    pub progress: f64,
    pub completed: bool,
    /// Whether this evaluation performed the completion (and the credit).
    pub newly_completed: bool,
    pub points_awarded: i64,
}

/// Counts from re-evaluating every challenge for one owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshSummary {
    pub evaluated: usize,
    pub newly_completed: usize,
    pub failed: usize,
}

fn status(challenge: &Challenge, row: Option<&ChallengeProgress>) -> ChallengeStatus {
    let (progress, completed, state) = match row {
        Some(row) => (row.progress, row.completed, row.state()),
        None => (0.0, false, ChallengeState::NotStarted),
    };
    ChallengeStatus {
        challenge_id: challenge.id,
        name: challenge.name.clone(),
        description: challenge.description.clone(),
        challenge_type: challenge.challenge_type,
        progress,
        goal: challenge.goal_value,
        completed,
        state,
    }
}

impl Tracker {
    /// Insert the configured challenges that are not yet in the store.
    pub async fn seed_challenges(&self) -> Result<usize> {
        for definition in self.challenges.definitions() {
            self.storage.seed_challenge(&definition.to_new()).await?;
        }
        Ok(self.challenges.definitions().len())
    }

    pub async fn list_challenges(&self) -> Result<Vec<Challenge>> {
        self.storage.list_challenges().await
    }

    /// Re-derive an owner's progress on one challenge and complete it if the goal is reached.
    ///
    /// Completion and its point award happen at most once per (owner, challenge).
    /// `suppress_events` only quiets logging; it never changes what is written.
    #[instrument(skip(self))]
    pub async fn update_challenge_progress(
        &self,
        owner_id: i64,
        challenge_id: i64,
        suppress_events: bool,
    ) -> Result<ChallengeUpdate> {
        if !self.storage.owner_exists(owner_id).await? {
            return Err(TrackerError::not_found(format!("owner {owner_id}")));
        }
        let challenge = self
            .storage
            .get_challenge(challenge_id)
            .await?
            .ok_or_else(|| TrackerError::not_found(format!("challenge {challenge_id}")))?;

        let target = self.challenges.metric_for(&challenge.name).inspect_err(|_| {
            error!(challenge = %challenge.name, "No metric mapping for challenge");
        })?;

        let window = resolve_period(self.clock.now(), challenge.challenge_type, self.zone())
            .ok_or_else(|| {
                TrackerError::Config(format!(
                    "challenge '{}' has non-calendar type {}",
                    challenge.name, challenge.challenge_type
                ))
            })?;

        // The log is read under the owner lock so a slower evaluation of an older log can
        // never overwrite progress written from a newer one.
        let _guard = self.locks.lock(owner_id).await;
        let samples = self
            .storage
            .history_in_window(owner_id, target.metric, &window)
            .await?;
        let measured = target.measure.apply(&samples);

        self.with_retry("update_challenge_progress", || {
            self.apply_challenge_progress(owner_id, &challenge, measured, suppress_events)
        })
        .await
    }

    async fn apply_challenge_progress(
        &self,
        owner_id: i64,
        challenge: &Challenge,
        measured: f64,
        suppress_events: bool,
    ) -> Result<ChallengeUpdate> {
        let mut tx = self.storage.begin().await?;

        let (current, created) = storage::lock_progress_row(&mut tx, owner_id, challenge.id).await?;
        let step = transition(&current, measured, challenge.goal_value);

        storage::set_progress(&mut tx, owner_id, challenge.id, step.progress).await?;

        let mut newly_completed = false;
        let mut balance = None;
        if step.completes && storage::mark_completed(&mut tx, owner_id, challenge.id).await? {
            balance =
                Some(storage::add_points(&mut tx, owner_id, challenge.reward_points).await?);
            newly_completed = true;
        }

        tx.commit().await?;

        if !suppress_events {
            if created {
                info!(owner_id, challenge = %challenge.name, "Started tracking challenge progress");
            }
            if let Some(balance) = balance {
                info!(
                    owner_id,
                    challenge = %challenge.name,
                    points = challenge.reward_points,
                    balance,
                    "Challenge completed"
                );
            } else if current.completed {
                debug!(owner_id, challenge = %challenge.name, "Challenge already completed, no points awarded");
            }
        }
        if current.progress != step.progress {
            debug!(
                owner_id,
                challenge = %challenge.name,
                from = current.progress,
                to = step.progress,
                goal = challenge.goal_value,
                "Challenge progress moved"
            );
        }

        Ok(ChallengeUpdate {
            challenge_id: challenge.id,
            progress: step.progress,
            completed: current.completed || newly_completed,
            newly_completed,
            points_awarded: if newly_completed { challenge.reward_points } else { 0 },
        })
    }

    /// Re-evaluate every challenge for an owner. A failing challenge is logged and skipped.
    #[instrument(skip(self))]
    pub async fn refresh_all_challenges(&self, owner_id: i64) -> Result<RefreshSummary> {
        if !self.storage.owner_exists(owner_id).await? {
            return Err(TrackerError::not_found(format!("owner {owner_id}")));
        }

        let mut summary = RefreshSummary::default();
        for challenge in self.storage.list_challenges().await? {
            match self.update_challenge_progress(owner_id, challenge.id, true).await {
                Ok(update) => {
                    summary.evaluated += 1;
                    if update.newly_completed {
                        summary.newly_completed += 1;
                    }
                }
                Err(e @ TrackerError::UnmappedChallenge(_)) => {
                    error!(owner_id, challenge = %challenge.name, error = %e, "Skipping challenge");
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(owner_id, challenge = %challenge.name, error = %e, "Failed to refresh challenge");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Current progress on one challenge, re-derived from the log first.
    pub async fn get_challenge_progress(
        &self,
        owner_id: i64,
        challenge_id: i64,
    ) -> Result<ChallengeStatus> {
        self.update_challenge_progress(owner_id, challenge_id, true)
            .await?;

        let challenge = self
            .storage
            .get_challenge(challenge_id)
            .await?
            .ok_or_else(|| TrackerError::not_found(format!("challenge {challenge_id}")))?;
        let row = self.storage.get_progress(owner_id, challenge_id).await?;
        Ok(status(&challenge, row.as_ref()))
    }

    /// Status of every challenge for an owner, after a refresh.
    pub async fn challenge_statuses(&self, owner_id: i64) -> Result<Vec<ChallengeStatus>> {
        self.refresh_all_challenges(owner_id).await?;

        let mut statuses = Vec::new();
        for challenge in self.storage.list_challenges().await? {
            let row = self.storage.get_progress(owner_id, challenge.id).await?;
            statuses.push(status(&challenge, row.as_ref()));
        }
        Ok(statuses)
    }

    /// Up to `top_n` incomplete challenges closest to their goal.
    pub async fn nearly_completed_challenges(
        &self,
        owner_id: i64,
        top_n: u32,
    ) -> Result<Vec<ChallengeStatus>> {
        let rows = self.storage.nearly_completed(owner_id, top_n).await?;
        Ok(rows
            .iter()
            .map(|(challenge, row)| status(challenge, Some(row)))
            .collect())
    }
}
