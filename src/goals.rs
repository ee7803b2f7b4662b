//! Personal goal progress.
//!
//! The calculator resolves the goal's window, reduces the history through the aggregation
//! engine and hands back both the scalar and the chart series from the same pass. Turning the
//! scalar into a percentage is left to [`percent_complete`], because only the presentation
//! boundary knows the target it is being compared against.

use chrono::{DateTime, Utc};

use crate::aggregation::{AggregationEngine, round1};
use crate::error::ValidationError;
use crate::metrics::MetricCatalog;
use crate::model::{Behavior, GoalProgress, MetricKey, MetricSample, PeriodKind};
use crate::period::goal_window;

#[derive(Debug, Clone)]
pub struct GoalProgressCalculator {
    engine: AggregationEngine,
}

impl GoalProgressCalculator {
    pub fn new(engine: AggregationEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &AggregationEngine {
        &self.engine
    }

    /// Compute progress for a metric's full ordered `history` as of `now`.
    ///
    /// An empty history yields no window and a progress value of 0.
    pub fn calculate(
        &self,
        metric: MetricKey,
        period: PeriodKind,
        target: Option<f64>,
        history: &[MetricSample],
        now: DateTime<Utc>,
    ) -> GoalProgress {
        let behavior = self.engine.catalog().behavior(metric);
        let empty = GoalProgress {
            metric,
            period,
            behavior,
            window_start: None,
            window_end: None,
            series: Vec::new(),
            progress_value: 0.0,
            has_data: false,
        };

        // No history means no window at all, even for calendar periods.
        if history.is_empty() {
            return empty;
        }
        let Some(window) = goal_window(now, period, self.engine.zone(), history) else {
            return empty;
        };

        let aggregate = self.engine.aggregate(metric, period, &window, history, target);

        GoalProgress {
            metric,
            period,
            behavior,
            window_start: Some(window.start),
            window_end: Some(window.end),
            series: aggregate.series,
            progress_value: aggregate.value.unwrap_or(0.0),
            has_data: aggregate.value.is_some(),
        }
    }
}

/// Percentage of a goal reached, capped at 100 and rounded to one decimal.
///
/// `change` progress is already a percentage; every other behavior is divided by the target.
pub fn percent_complete(behavior: Behavior, progress_value: f64, target: Option<f64>) -> f64 {
    match behavior {
        Behavior::Change => progress_value.clamp(0.0, 100.0),
        _ => match target {
            Some(target) if target > 0.0 => round1(progress_value / target * 100.0).min(100.0),
            _ => 0.0,
        },
    }
}

/// Check a goal before it is saved.
pub fn validate_goal(
    catalog: &MetricCatalog,
    metric: MetricKey,
    target_value: f64,
    period: PeriodKind,
) -> Result<(), ValidationError> {
    if !(target_value.is_finite() && target_value > 0.0) {
        return Err(ValidationError::NonPositiveTarget(target_value));
    }
    catalog.check_period(metric, period)
}
