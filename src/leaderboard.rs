//! Leaderboards over opted-in owners.

use tracing::debug;

use crate::aggregation::round2;
use crate::error::Result;
use crate::model::{LeaderboardEntry, MetricKey, PeriodKind};
use crate::period::rolling_lookback;
use crate::tracker::Tracker;

fn ranked<T>(rows: Vec<(i64, String, T)>, score: impl Fn(T) -> f64) -> Vec<LeaderboardEntry> {
    rows.into_iter()
        .zip(1..)
        .map(|((owner_id, display_name, value), rank)| LeaderboardEntry {
            rank,
            owner_id,
            display_name,
            score: score(value),
        })
        .collect()
}

impl Tracker {
    /// Top owners by the sum of `metric` over a rolling lookback ending now.
    ///
    /// `timeframe` picks the lookback: one day, seven days, thirty days, or all time for
    /// `long_term`.
    pub async fn metric_leaderboard(
        &self,
        metric: MetricKey,
        timeframe: PeriodKind,
    ) -> Result<Vec<LeaderboardEntry>> {
        let since = rolling_lookback(self.clock.now(), timeframe);
        let rows = self
            .storage
            .metric_totals(metric, since, self.leaderboard_size)
            .await?;
        debug!(metric = %metric, timeframe = %timeframe, entries = rows.len(), "Metric leaderboard");

        Ok(ranked(rows, round2))
    }

    /// Top owners by points balance.
    pub async fn points_leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
        let rows = self.storage.top_points(self.leaderboard_size).await?;
        Ok(ranked(rows, |points| points as f64))
    }
}
