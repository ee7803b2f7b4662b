//! Aggregation engine: reducing a metric's samples inside a window to a progress value.
//!
//! Four behaviors are supported:
//!
//! - `cumulative`: running total of the window, grouped by hour (daily windows) or by local
//!   day (longer windows). The progress value is the last point of the running total.
//! - `average`: mean of the samples in the window.
//! - `change`: percentage of the movement from the first-ever sample towards the target,
//!   measured at the last sample in the window. Only counts movement in the target's direction.
//! - `latest`: the most recent sample overall, regardless of window.
//!
//! Accumulation runs at full precision; rounding is applied once to the reported value.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::metrics::MetricCatalog;
use crate::model::{Behavior, MetricKey, MetricSample, PeriodKind, SeriesPoint};
use crate::period::{Window, Zone, day_bucket, hour_bucket};

/// Result of reducing one window.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub behavior: Behavior,
    /// Chart points produced by the same grouping pass as `value`.
    pub series: Vec<SeriesPoint>,
    /// `None` when there was nothing to reduce.
    pub value: Option<f64>,
}

impl Aggregate {
    fn empty(behavior: Behavior) -> Self {
        Self {
            behavior,
            series: Vec::new(),
            value: None,
        }
    }
}

/// Aggregation bound to a metric catalogue and an operating zone.
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    catalog: Arc<MetricCatalog>,
    zone: Zone,
}

impl AggregationEngine {
    pub fn new(catalog: Arc<MetricCatalog>, zone: Zone) -> Self {
        Self { catalog, zone }
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    /// Reduce `history` (ordered oldest first) over `window` using the metric's behavior.
    ///
    /// `target` is only read by the `change` behavior.
    pub fn aggregate(
        &self,
        metric: MetricKey,
        period: PeriodKind,
        window: &Window,
        history: &[MetricSample],
        target: Option<f64>,
    ) -> Aggregate {
        let behavior = self.catalog.behavior(metric);
        aggregate(behavior, period, window, history, target, self.zone)
    }
}

/// Reduce `history` over `window` under `behavior`.
pub fn aggregate(
    behavior: Behavior,
    period: PeriodKind,
    window: &Window,
    history: &[MetricSample],
    target: Option<f64>,
    zone: Zone,
) -> Aggregate {
    let in_window = window.filter(history);

    match behavior {
        Behavior::Cumulative => cumulative(&in_window, period, zone),
        Behavior::Average => average(&in_window, period, zone),
        Behavior::Change => change(&in_window, history, target),
        Behavior::Latest => latest(&in_window, history),
    }
}

fn bucket(instant: DateTime<Utc>, period: PeriodKind, zone: Zone) -> DateTime<Utc> {
    match period {
        PeriodKind::Daily => hour_bucket(instant, zone),
        _ => day_bucket(instant, zone),
    }
}

fn cumulative(samples: &[&MetricSample], period: PeriodKind, zone: Zone) -> Aggregate {
    let mut groups: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
    for sample in samples {
        *groups.entry(bucket(sample.recorded_at, period, zone)).or_default() += sample.value;
    }

    let mut running = 0.0;
    let series: Vec<SeriesPoint> = groups
        .into_iter()
        .map(|(x, total)| {
            running += total;
            SeriesPoint { x, y: running }
        })
        .collect();

    let value = series.last().map(|point| round2(point.y));
    Aggregate {
        behavior: Behavior::Cumulative,
        series,
        value,
    }
}

fn average(samples: &[&MetricSample], period: PeriodKind, zone: Zone) -> Aggregate {
    if samples.is_empty() {
        return Aggregate::empty(Behavior::Average);
    }

    let series = samples
        .iter()
        .map(|sample| SeriesPoint {
            x: bucket(sample.recorded_at, period, zone),
            y: sample.value,
        })
        .collect();

    let sum: f64 = samples.iter().map(|sample| sample.value).sum();
    Aggregate {
        behavior: Behavior::Average,
        series,
        value: Some(round2(sum / samples.len() as f64)),
    }
}

fn change(samples: &[&MetricSample], history: &[MetricSample], target: Option<f64>) -> Aggregate {
    let (Some(baseline), Some(current)) = (history.first(), samples.last()) else {
        return Aggregate::empty(Behavior::Change);
    };

    let series = raw_series(samples);
    // Without a target there is no direction to move in.
    let value = target.map_or(0.0, |target| {
        change_progress(baseline.value, current.value, target)
    });

    Aggregate {
        behavior: Behavior::Change,
        series,
        value: Some(round2(value)),
    }
}

fn latest(samples: &[&MetricSample], history: &[MetricSample]) -> Aggregate {
    Aggregate {
        behavior: Behavior::Latest,
        series: raw_series(samples),
        value: history.last().map(|sample| round2(sample.value)),
    }
}

fn raw_series(samples: &[&MetricSample]) -> Vec<SeriesPoint> {
    samples
        .iter()
        .map(|sample| SeriesPoint {
            x: sample.recorded_at,
            y: sample.value,
        })
        .collect()
}

/// Percentage (0-100, one decimal) of the way from `baseline` to `target` that `current` has
/// moved. Movement away from the target counts as 0.
pub fn change_progress(baseline: f64, current: f64, target: f64) -> f64 {
    let required = (target - baseline).abs();
    // A target equal to the baseline is already met, whatever the current value.
    if required == 0.0 {
        return 100.0;
    }

    let towards_target = (target < baseline && current < baseline)
        || (target > baseline && current > baseline);
    if !towards_target {
        return 0.0;
    }

    let actual = (current - baseline).abs();
    round1(actual / required * 100.0).min(100.0)
}

/// Reduce the samples of a window for the dashboard summary. Unlike goal progress, `change`
/// here is the raw movement within the window (last minus first).
pub fn summarize(behavior: Behavior, samples: &[&MetricSample]) -> Option<f64> {
    let first = samples.first()?;
    let last = samples.last()?;

    let value = match behavior {
        Behavior::Cumulative => samples.iter().map(|s| s.value).sum(),
        Behavior::Average => {
            samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64
        }
        Behavior::Change => last.value - first.value,
        Behavior::Latest => last.value,
    };
    Some(round2(value))
}

/// Sum of the samples in the window.
pub fn window_total(samples: &[&MetricSample]) -> f64 {
    samples.iter().map(|s| s.value).sum()
}

/// Drop from the first to the last sample in the window, never negative.
pub fn window_decrease(samples: &[&MetricSample]) -> f64 {
    match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => (first.value - last.value).max(0.0),
        _ => 0.0,
    }
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::resolve_period;
    use chrono::TimeZone;

    fn utc(d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, h, min, 0).unwrap()
    }

    fn sample(at: DateTime<Utc>, value: f64) -> MetricSample {
        MetricSample {
            owner_id: 1,
            metric: MetricKey::StepsTaken,
            value,
            recorded_at: at,
        }
    }

    fn daily() -> Window {
        resolve_period(utc(14, 12, 0), PeriodKind::Daily, Zone::utc()).unwrap()
    }

    fn weekly() -> Window {
        resolve_period(utc(14, 12, 0), PeriodKind::Weekly, Zone::utc()).unwrap()
    }

    #[test]
    fn test_cumulative_daily_steps() {
        let history = vec![sample(utc(14, 8, 0), 2000.0), sample(utc(14, 18, 0), 3500.0)];

        let result = aggregate(
            Behavior::Cumulative,
            PeriodKind::Daily,
            &daily(),
            &history,
            None,
            Zone::utc(),
        );

        assert_eq!(result.value, Some(5500.0));
        assert_eq!(
            result.series,
            vec![
                SeriesPoint { x: utc(14, 8, 0), y: 2000.0 },
                SeriesPoint { x: utc(14, 18, 0), y: 5500.0 },
            ]
        );
    }

    #[test]
    fn test_cumulative_groups_by_hour_then_by_day() {
        let history = vec![
            sample(utc(13, 9, 0), 100.0),
            sample(utc(14, 8, 5), 10.0),
            sample(utc(14, 8, 55), 20.0),
            sample(utc(15, 7, 0), 5.0),
        ];

        let day = aggregate(Behavior::Cumulative, PeriodKind::Daily, &daily(), &history, None, Zone::utc());
        assert_eq!(day.series, vec![SeriesPoint { x: utc(14, 8, 0), y: 30.0 }]);
        assert_eq!(day.value, Some(30.0));

        let week = aggregate(Behavior::Cumulative, PeriodKind::Weekly, &weekly(), &history, None, Zone::utc());
        assert_eq!(
            week.series,
            vec![
                SeriesPoint { x: utc(13, 0, 0), y: 100.0 },
                SeriesPoint { x: utc(14, 0, 0), y: 130.0 },
                SeriesPoint { x: utc(15, 0, 0), y: 135.0 },
            ]
        );
        assert_eq!(week.value, Some(135.0));
    }

    #[test]
    fn test_cumulative_sample_at_window_end_belongs_to_next_period() {
        let window = daily();
        let history = vec![sample(window.start, 1.0), sample(window.end, 1000.0)];

        let result = aggregate(Behavior::Cumulative, PeriodKind::Daily, &window, &history, None, Zone::utc());

        assert_eq!(result.value, Some(1.0));
    }

    #[test]
    fn test_empty_window_has_no_value() {
        let history = vec![sample(utc(1, 8, 0), 10.0)];
        for behavior in [Behavior::Cumulative, Behavior::Average, Behavior::Change] {
            let result = aggregate(behavior, PeriodKind::Daily, &daily(), &history, Some(5.0), Zone::utc());
            assert_eq!(result.value, None, "{behavior:?}");
            assert!(result.series.is_empty());
        }
    }

    #[test]
    fn test_average_is_order_independent() {
        let history = vec![
            sample(utc(14, 7, 0), 90.0),
            sample(utc(14, 12, 0), 110.0),
            sample(utc(14, 19, 0), 100.0),
        ];
        let result = aggregate(Behavior::Average, PeriodKind::Daily, &daily(), &history, None, Zone::utc());
        assert_eq!(result.value, Some(100.0));
        assert_eq!(result.series.len(), 3);

        let shuffled = vec![
            sample(utc(14, 7, 0), 110.0),
            sample(utc(14, 12, 0), 100.0),
            sample(utc(14, 19, 0), 90.0),
        ];
        let result = aggregate(Behavior::Average, PeriodKind::Daily, &daily(), &shuffled, None, Zone::utc());
        assert_eq!(result.value, Some(100.0));
    }

    #[test]
    fn test_change_direction_check() {
        assert_eq!(change_progress(80.0, 85.0, 70.0), 0.0);
        assert_eq!(change_progress(80.0, 75.0, 70.0), 50.0);
        assert_eq!(change_progress(80.0, 60.0, 70.0), 100.0);
        assert_eq!(change_progress(60.0, 65.0, 70.0), 50.0);
        assert_eq!(change_progress(60.0, 55.0, 70.0), 0.0);
        assert_eq!(change_progress(80.0, 80.0, 70.0), 0.0);
        assert_eq!(change_progress(90.0, 87.0, 80.0), 30.0);
    }

    #[test]
    fn test_change_with_target_at_baseline_is_complete() {
        assert_eq!(change_progress(80.0, 85.0, 80.0), 100.0);
    }

    #[test]
    fn test_change_uses_first_ever_sample_as_baseline() {
        let history = vec![
            sample(utc(1, 8, 0), 80.0),
            sample(utc(14, 8, 0), 78.0),
            sample(utc(14, 20, 0), 75.0),
        ];

        let result = aggregate(Behavior::Change, PeriodKind::Daily, &daily(), &history, Some(70.0), Zone::utc());

        assert_eq!(result.value, Some(50.0));
        assert_eq!(result.series.len(), 2);
        assert_eq!(result.series[1].x, utc(14, 20, 0));
    }

    #[test]
    fn test_latest_ignores_window() {
        let history = vec![sample(utc(14, 8, 0), 172.0), sample(utc(20, 8, 0), 173.5)];

        let result = aggregate(Behavior::Latest, PeriodKind::Daily, &daily(), &history, None, Zone::utc());

        assert_eq!(result.value, Some(173.5));
        assert_eq!(result.series.len(), 1);
    }

    #[test]
    fn test_rounding_applied_once() {
        let history: Vec<_> = (0..10).map(|i| sample(utc(14, i, 0), 0.333)).collect();
        let result = aggregate(Behavior::Cumulative, PeriodKind::Daily, &daily(), &history, None, Zone::utc());
        assert_eq!(result.value, Some(3.33));
    }

    #[test]
    fn test_summarize() {
        let a = sample(utc(14, 8, 0), 82.0);
        let b = sample(utc(14, 9, 0), 80.5);
        let samples = vec![&a, &b];

        assert_eq!(summarize(Behavior::Cumulative, &samples), Some(162.5));
        assert_eq!(summarize(Behavior::Average, &samples), Some(81.25));
        assert_eq!(summarize(Behavior::Change, &samples), Some(-1.5));
        assert_eq!(summarize(Behavior::Latest, &samples), Some(80.5));
        assert_eq!(summarize(Behavior::Latest, &[]), None);
    }

    #[test]
    fn test_window_decrease() {
        let a = sample(utc(14, 8, 0), 82.0);
        let b = sample(utc(14, 9, 0), 80.5);
        assert_eq!(window_decrease(&[&a, &b]), 1.5);
        assert_eq!(window_decrease(&[&b, &a]), 0.0);
        assert_eq!(window_decrease(&[]), 0.0);
        assert_eq!(window_total(&[&a, &b]), 162.5);
    }

    #[test]
    fn test_engine_uses_catalog_behavior() {
        let engine = AggregationEngine::new(Arc::new(MetricCatalog::standard()), Zone::utc());
        let history = vec![sample(utc(14, 7, 0), 90.0), sample(utc(14, 12, 0), 110.0)];

        let steps = engine.aggregate(MetricKey::StepsTaken, PeriodKind::Daily, &daily(), &history, None);
        let sugar = engine.aggregate(MetricKey::FastingBloodSugar, PeriodKind::Daily, &daily(), &history, None);

        assert_eq!(steps.value, Some(200.0));
        assert_eq!(sugar.value, Some(100.0));
    }
}
