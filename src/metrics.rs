//! Static metric metadata: labels, units, aggregation behavior, the periods a goal may use,
//! and reference bands.
//!
//! The catalogue is built once and injected into the engine. Tests build their own with
//! [`MetricCatalog::new`].

use std::collections::HashMap;

use serde::Serialize;

use crate::error::ValidationError;
use crate::model::{Behavior, MetricKey, PeriodKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Medical,
    Nutrition,
    Activity,
    Body,
}

/// Where a reading sits relative to the metric's reference ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthBand {
    Normal,
    Warning,
    Critical,
}

/// Inclusive reference ranges for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub normal: (f64, f64),
    pub warning: (f64, f64),
    pub critical: (f64, f64),
}

impl Thresholds {
    const fn new(normal: (f64, f64), warning: (f64, f64), critical: (f64, f64)) -> Self {
        Self {
            normal,
            warning,
            critical,
        }
    }

    /// Normal wins over warning, warning over critical. Values in no band return `None`.
    pub fn classify(&self, value: f64) -> Option<HealthBand> {
        let within = |(low, high): (f64, f64)| value >= low && value <= high;
        if within(self.normal) {
            Some(HealthBand::Normal)
        } else if within(self.warning) {
            Some(HealthBand::Warning)
        } else if within(self.critical) {
            Some(HealthBand::Critical)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDefinition {
    pub key: MetricKey,
    pub label: &'static str,
    pub unit: &'static str,
    pub behavior: Behavior,
    pub periods: Vec<PeriodKind>,
    pub category: Category,
    pub thresholds: Option<Thresholds>,
}

impl MetricDefinition {
    pub fn new(key: MetricKey, behavior: Behavior, periods: &[PeriodKind]) -> Self {
        Self {
            key,
            label: key.as_str(),
            unit: "",
            behavior,
            periods: periods.to_vec(),
            category: Category::Body,
            thresholds: None,
        }
    }

    pub fn supports(&self, period: PeriodKind) -> bool {
        self.periods.contains(&period)
    }
}

/// Immutable lookup from metric key to its definition.
#[derive(Debug, Clone)]
pub struct MetricCatalog {
    definitions: HashMap<MetricKey, MetricDefinition>,
}

impl MetricCatalog {
    pub fn new(definitions: impl IntoIterator<Item = MetricDefinition>) -> Self {
        Self {
            definitions: definitions.into_iter().map(|d| (d.key, d)).collect(),
        }
    }

    pub fn get(&self, key: MetricKey) -> Option<&MetricDefinition> {
        self.definitions.get(&key)
    }

    /// Metrics without a definition aggregate as [`Behavior::Latest`].
    pub fn behavior(&self, key: MetricKey) -> Behavior {
        self.get(key).map_or(Behavior::Latest, |d| d.behavior)
    }

    /// Reject a goal period the metric does not support.
    pub fn check_period(&self, key: MetricKey, period: PeriodKind) -> Result<(), ValidationError> {
        match self.get(key) {
            Some(definition) if definition.supports(period) => Ok(()),
            _ => Err(ValidationError::UnsupportedPeriod {
                metric: key,
                period,
            }),
        }
    }

    pub fn classify(&self, key: MetricKey, value: f64) -> Option<HealthBand> {
        self.get(key)?.thresholds?.classify(value)
    }

    /// Definitions in [`MetricKey::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        MetricKey::ALL.iter().filter_map(|key| self.definitions.get(key))
    }

    /// The production metric table.
    pub fn standard() -> Self {
        use Behavior::*;
        use Category::*;
        use MetricKey::*;
        use PeriodKind::{Daily as D, Monthly as M, Weekly as W};

        let def = |key: MetricKey,
                   label: &'static str,
                   unit: &'static str,
                   behavior: Behavior,
                   periods: &[PeriodKind],
                   category: Category,
                   thresholds: Thresholds| MetricDefinition {
            key,
            label,
            unit,
            behavior,
            periods: periods.to_vec(),
            category,
            thresholds: Some(thresholds),
        };
        let t = Thresholds::new;

        MetricCatalog::new([
            def(FastingBloodSugar, "Fasting Blood Sugar (mg/dL)", "mg/dL", Average, &[D], Medical,
                t((70.0, 99.0), (100.0, 125.0), (126.0, 400.0))),
            def(Hba1c, "HbA1c Level (%)", "%", Average, &[M], Medical,
                t((4.0, 5.6), (5.7, 6.4), (6.5, 15.0))),
            def(Bmi, "Body Mass Index (BMI)", "BMI", Change, &[M], Medical,
                t((18.5, 24.9), (25.0, 29.9), (30.0, 60.0))),
            def(BloodPressureSystolic, "Systolic Blood Pressure (mmHg)", "mmHg", Average, &[D], Medical,
                t((90.0, 119.0), (120.0, 139.0), (140.0, 250.0))),
            def(CaloriesConsumed, "Calories Consumed (kcal)", "kcal", Cumulative, &[D, W, M], Nutrition,
                t((1500.0, 2500.0), (2501.0, 3000.0), (3001.0, 5000.0))),
            def(ProteinIntake, "Protein Intake (g)", "g", Cumulative, &[D, W], Nutrition,
                t((50.0, 100.0), (101.0, 130.0), (131.0, 200.0))),
            def(CarbsIntake, "Carbohydrates (g)", "g", Cumulative, &[D, W], Nutrition,
                t((130.0, 300.0), (301.0, 350.0), (351.0, 500.0))),
            def(FatsIntake, "Fats (g)", "g", Cumulative, &[D, W], Nutrition,
                t((40.0, 80.0), (81.0, 100.0), (101.0, 150.0))),
            def(FiberIntake, "Fiber Intake (g)", "g", Cumulative, &[D, W], Nutrition,
                t((25.0, 40.0), (10.0, 24.0), (0.0, 9.0))),
            def(WaterIntake, "Water Intake (L)", "L", Cumulative, &[D], Nutrition,
                t((2.0, 3.5), (1.5, 1.9), (0.0, 1.4))),
            def(StepsTaken, "Steps Taken", "steps", Cumulative, &[D, W, M], Activity,
                t((7000.0, 12000.0), (3000.0, 6999.0), (0.0, 2999.0))),
            def(ActiveMinutes, "Active Minutes", "minutes", Cumulative, &[D, W, M], Activity,
                t((30.0, 120.0), (10.0, 29.0), (0.0, 9.0))),
            def(CaloriesBurned, "Calories Burned", "kcal", Cumulative, &[D, W, M], Activity,
                t((300.0, 600.0), (150.0, 299.0), (0.0, 149.0))),
            def(DistanceWalked, "Distance Walked (km)", "km", Cumulative, &[D, W, M], Activity,
                t((2.0, 8.0), (1.0, 1.9), (0.0, 0.9))),
            def(WorkoutSessions, "Workout Sessions", "sessions", Cumulative, &[W, M], Activity,
                t((3.0, 5.0), (1.0, 2.0), (0.0, 0.0))),
            def(HeartRate, "Heart Rate (bpm)", "bpm", Average, &[D], Medical,
                t((60.0, 90.0), (91.0, 110.0), (111.0, 200.0))),
            def(DistanceRan, "Running Distance (km)", "km", Cumulative, &[D, W, M], Activity,
                t((3.0, 10.0), (1.0, 2.9), (0.0, 0.9))),
            def(Weight, "Weight (kg)", "kg", Change, &[M], Body,
                t((50.0, 80.0), (81.0, 100.0), (101.0, 200.0))),
            // Height is static: no goal periods, and it reports its latest reading.
            def(Height, "Height (cm)", "cm", Latest, &[], Body,
                t((150.0, 190.0), (191.0, 200.0), (201.0, 250.0))),
        ])
    }
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
