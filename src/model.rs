//! Data models for HealthQuest.
//!
//! Everything here is plain data: the typed metric and period vocabularies, the persisted
//! records (samples, goals, challenges, progress rows) and the request/response bodies of the
//! HTTP surface.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::metrics::{Category, HealthBand};

/// A health measurement a patient can log.
///
/// The serialized form is the key the metric is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricKey {
    #[serde(rename = "latest_fasting_blood_sugar")]
    FastingBloodSugar,
    #[serde(rename = "latest_hba1c")]
    Hba1c,
    #[serde(rename = "latest_bmi")]
    Bmi,
    #[serde(rename = "latest_blood_pressure_systolic")]
    BloodPressureSystolic,
    #[serde(rename = "latest_calories_consumed")]
    CaloriesConsumed,
    #[serde(rename = "latest_protein_intake")]
    ProteinIntake,
    #[serde(rename = "latest_carbs_intake")]
    CarbsIntake,
    #[serde(rename = "latest_fats_intake")]
    FatsIntake,
    #[serde(rename = "latest_fiber_intake")]
    FiberIntake,
    #[serde(rename = "latest_water_intake")]
    WaterIntake,
    #[serde(rename = "latest_steps_taken")]
    StepsTaken,
    #[serde(rename = "latest_active_minutes")]
    ActiveMinutes,
    #[serde(rename = "latest_calories_burned")]
    CaloriesBurned,
    #[serde(rename = "latest_distance_walked")]
    DistanceWalked,
    #[serde(rename = "latest_workout_sessions")]
    WorkoutSessions,
    #[serde(rename = "latest_heart_rate")]
    HeartRate,
    #[serde(rename = "latest_distance_ran")]
    DistanceRan,
    #[serde(rename = "latest_weight")]
    Weight,
    #[serde(rename = "latest_height")]
    Height,
}

impl MetricKey {
    pub const ALL: [MetricKey; 19] = [
        MetricKey::FastingBloodSugar,
        MetricKey::Hba1c,
        MetricKey::Bmi,
        MetricKey::BloodPressureSystolic,
        MetricKey::CaloriesConsumed,
        MetricKey::ProteinIntake,
        MetricKey::CarbsIntake,
        MetricKey::FatsIntake,
        MetricKey::FiberIntake,
        MetricKey::WaterIntake,
        MetricKey::StepsTaken,
        MetricKey::ActiveMinutes,
        MetricKey::CaloriesBurned,
        MetricKey::DistanceWalked,
        MetricKey::WorkoutSessions,
        MetricKey::HeartRate,
        MetricKey::DistanceRan,
        MetricKey::Weight,
        MetricKey::Height,
    ];

    /// Storage key of the metric.
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKey::FastingBloodSugar => "latest_fasting_blood_sugar",
            MetricKey::Hba1c => "latest_hba1c",
            MetricKey::Bmi => "latest_bmi",
            MetricKey::BloodPressureSystolic => "latest_blood_pressure_systolic",
            MetricKey::CaloriesConsumed => "latest_calories_consumed",
            MetricKey::ProteinIntake => "latest_protein_intake",
            MetricKey::CarbsIntake => "latest_carbs_intake",
            MetricKey::FatsIntake => "latest_fats_intake",
            MetricKey::FiberIntake => "latest_fiber_intake",
            MetricKey::WaterIntake => "latest_water_intake",
            MetricKey::StepsTaken => "latest_steps_taken",
            MetricKey::ActiveMinutes => "latest_active_minutes",
            MetricKey::CaloriesBurned => "latest_calories_burned",
            MetricKey::DistanceWalked => "latest_distance_walked",
            MetricKey::WorkoutSessions => "latest_workout_sessions",
            MetricKey::HeartRate => "latest_heart_rate",
            MetricKey::DistanceRan => "latest_distance_ran",
            MetricKey::Weight => "latest_weight",
            MetricKey::Height => "latest_height",
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownMetric(s.to_string()))
    }
}

/// How a metric's samples combine into a single progress value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    /// Sum of the samples in the window.
    Cumulative,
    /// Mean of the samples in the window.
    Average,
    /// Percentage of the movement from the first-ever sample towards the target.
    Change,
    /// Most recent sample overall.
    Latest,
}

/// The period a goal or challenge is measured over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    Daily,
    Weekly,
    Monthly,
    /// Not a calendar period: the full span of the owner's history for the metric.
    LongTerm,
}

impl PeriodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PeriodKind::Daily => "daily",
            PeriodKind::Weekly => "weekly",
            PeriodKind::Monthly => "monthly",
            PeriodKind::LongTerm => "long_term",
        }
    }

    /// Parse a period, mapping anything that is not a calendar period to [`PeriodKind::LongTerm`].
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "daily" => PeriodKind::Daily,
            "weekly" => PeriodKind::Weekly,
            "monthly" => PeriodKind::Monthly,
            _ => PeriodKind::LongTerm,
        }
    }

    pub fn is_calendar(self) -> bool {
        !matches!(self, PeriodKind::LongTerm)
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(PeriodKind::Daily),
            "weekly" => Ok(PeriodKind::Weekly),
            "monthly" => Ok(PeriodKind::Monthly),
            "long_term" => Ok(PeriodKind::LongTerm),
            other => Err(ValidationError::UnknownPeriod(other.to_string())),
        }
    }
}

/// One recorded observation. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub owner_id: i64,
    pub metric: MetricKey,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// A patient whose metrics, goals and points are tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub id: i64,
    pub display_name: String,
    pub points: i64,
    pub show_on_leaderboard: bool,
}

/// A personal target. Unique per (owner, metric, period).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: i64,
    pub owner_id: i64,
    pub metric: MetricKey,
    pub target_value: f64,
    pub period: PeriodKind,
}

/// A shared, system-defined target that awards points on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub challenge_type: PeriodKind,
    pub goal_value: f64,
    pub reward_points: i64,
}

/// Lifecycle of a (owner, challenge) pair. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeState {
    NotStarted,
    InProgress,
    Completed,
}

/// Persisted per (owner, challenge) progress row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeProgress {
    pub owner_id: i64,
    pub challenge_id: i64,
    /// Clamped to the challenge's goal value.
    pub progress: f64,
    pub completed: bool,
}

impl ChallengeProgress {
    pub fn state(&self) -> ChallengeState {
        if self.completed {
            ChallengeState::Completed
        } else if self.progress > 0.0 {
            ChallengeState::InProgress
        } else {
            ChallengeState::NotStarted
        }
    }
}

/// A point on a progress chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Start of the bucket (hour or local day) the value belongs to, or the sample instant.
    pub x: DateTime<Utc>,
    pub y: f64,
}

/// Output of the goal progress calculator.
///
/// `progress_value` is behavior-dependent: a percentage (0-100) for `change` metrics and a
/// value in the metric's native unit for every other behavior.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalProgress {
    pub metric: MetricKey,
    pub period: PeriodKind,
    pub behavior: Behavior,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub series: Vec<SeriesPoint>,
    pub progress_value: f64,
    /// False when the window held no samples; `progress_value` is then 0.
    pub has_data: bool,
}

/// Goal progress as reported to the UI, with the derived percentage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalProgressReport {
    #[serde(flatten)]
    pub progress: GoalProgress,
    pub target_value: Option<f64>,
    pub percent_complete: f64,
}

/// Challenge progress as reported to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeStatus {
    pub challenge_id: i64,
    pub name: String,
    pub description: String,
    pub challenge_type: PeriodKind,
    pub progress: f64,
    pub goal: f64,
    pub completed: bool,
    pub state: ChallengeState,
}

/// A reward the owner has claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardClaim {
    pub reward_id: String,
    pub reward_name: String,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub owner_id: i64,
    pub display_name: String,
    pub score: f64,
}

/// A metric reduced over the current period, for the dashboard summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub metric: MetricKey,
    pub label: String,
    pub unit: String,
    pub category: Category,
    pub behavior: Behavior,
    pub value: f64,
    /// Reference band of `value`, when the value is a reading the bands describe.
    pub band: Option<HealthBand>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PointsResponse {
    pub owner_id: i64,
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreakResponse {
    pub owner_id: i64,
    pub days: u32,
}

/// Request body for POST /owners/{id}/samples.
#[derive(Debug, Clone, Deserialize)]
pub struct SampleRequest {
    pub metric: MetricKey,
    pub value: f64,

    /// Defaults to the server's clock.
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Request body for PUT /owners/{id}/goals.
#[derive(Debug, Clone, Deserialize)]
pub struct GoalRequest {
    pub metric: MetricKey,
    pub target_value: f64,
    #[serde(default = "default_period")]
    pub period: PeriodKind,
}

fn default_period() -> PeriodKind {
    PeriodKind::Daily
}

/// Request body for POST /owners/{id}/points.
#[derive(Debug, Clone, Deserialize)]
pub struct CreditRequest {
    pub amount: i64,
}

/// Query parameters for GET /owners/{id}/goals/progress.
#[derive(Debug, Deserialize)]
pub struct GoalProgressQuery {
    pub metric: MetricKey,
    pub period: String,
    pub target: Option<f64>,
}

/// Query parameters for endpoints scoped to a period.
#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    #[serde(default = "default_period")]
    pub period: PeriodKind,
}

/// Query parameters for GET /leaderboard/{metric}.
#[derive(Debug, Deserialize)]
pub struct TimeframeQuery {
    #[serde(default = "default_timeframe")]
    pub timeframe: PeriodKind,
}

fn default_timeframe() -> PeriodKind {
    PeriodKind::Weekly
}

/// Query parameters for GET /owners/{id}/challenges/nearly-complete.
#[derive(Debug, Deserialize)]
pub struct TopQuery {
    #[serde(default = "default_top_n")]
    pub top: u32,
}

fn default_top_n() -> u32 {
    3
}

/// Query parameters for GET /owners/{id}/samples.
#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(default = "default_activity_limit")]
    pub limit: u32,
}

fn default_activity_limit() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_key_round_trips_through_storage_key() {
        for key in MetricKey::ALL {
            assert_eq!(key.as_str().parse::<MetricKey>().unwrap(), key);
        }
        assert_eq!(
            "steps".parse::<MetricKey>(),
            Err(ValidationError::UnknownMetric("steps".to_string()))
        );
    }

    #[test]
    fn test_metric_key_serde_matches_storage_key() {
        let json = serde_json::to_string(&MetricKey::StepsTaken).unwrap();
        assert_eq!(json, "\"latest_steps_taken\"");
    }

    #[test]
    fn test_period_parse_lenient_falls_back_to_long_term() {
        assert_eq!(PeriodKind::parse_lenient("weekly"), PeriodKind::Weekly);
        assert_eq!(PeriodKind::parse_lenient("yearly"), PeriodKind::LongTerm);
        assert_eq!(PeriodKind::parse_lenient(""), PeriodKind::LongTerm);
        assert!("yearly".parse::<PeriodKind>().is_err());
    }

    #[test]
    fn test_challenge_state() {
        let mut row = ChallengeProgress {
            owner_id: 1,
            challenge_id: 1,
            progress: 0.0,
            completed: false,
        };
        assert_eq!(row.state(), ChallengeState::NotStarted);
        row.progress = 10.0;
        assert_eq!(row.state(), ChallengeState::InProgress);
        row.completed = true;
        assert_eq!(row.state(), ChallengeState::Completed);
    }
}
