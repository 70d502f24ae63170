//! History statistics and chart scaling.
//!
//! Everything here is a pure function of the observations and goals handed in:
//! no I/O, no clock. Calling [`compute_history`] twice on the same input yields
//! the same [`HistoryView`].

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{Goals, Observation};

/// Padding added above and below the data on each weight axis, in pounds.
pub const AXIS_PADDING: f64 = 5.0;

/// Distance from the goal that still counts as "reached".
pub const GOAL_TOLERANCE: f64 = 0.05;

/// One user's input to the engine.
#[derive(Debug, Clone, Copy)]
pub struct UserHistory<'a> {
    pub name: &'a str,
    /// Observations in insertion order. Same-date entries keep this order.
    pub observations: &'a [Observation],
    pub goals: Goals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryView {
    pub summary: Summary,
    pub weight_chart: WeightChart,
    pub body_fat_chart: MetricChart,
    pub waist_chart: MetricChart,
    pub axes: AxisConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lowest: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_goal: Option<GoalProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_fat: Option<MetricStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waist: Option<MetricStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalProgress {
    pub label: String,
    pub class: GoalClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalClass {
    /// At or below the goal.
    Positive,
    /// Still above the goal.
    Negative,
}

impl GoalClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricStats {
    pub current: f64,
    pub highest: f64,
    pub lowest: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeightChart {
    pub labels: Vec<NaiveDate>,
    pub primary: Vec<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricChart {
    pub labels: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AxisConfig {
    pub primary_min: Option<f64>,
    pub primary_max: Option<f64>,
    pub secondary_label: Option<String>,
    pub secondary_min: Option<f64>,
    pub secondary_max: Option<f64>,
}

#[must_use]
pub fn compute_history(primary: &UserHistory, comparison: Option<&UserHistory>) -> HistoryView {
    let sorted = sorted_by_date(primary.observations);
    let primary_map = weight_by_date(&sorted);

    let primary_range = padded_range(
        primary_map
            .values()
            .copied()
            .chain(primary.goals.start_weight.filter(|v| is_set(*v)))
            .chain(primary.goals.goal_weight.filter(|v| is_set(*v))),
    );

    let mut axes = AxisConfig {
        primary_min: primary_range.map(|(lo, _)| lo),
        primary_max: primary_range.map(|(_, hi)| hi),
        ..AxisConfig::default()
    };

    let weight_chart = if let Some(other) = comparison {
        let other_sorted = sorted_by_date(other.observations);
        let other_map = weight_by_date(&other_sorted);

        let mut labels: Vec<NaiveDate> = primary_map.keys().chain(other_map.keys()).copied().collect();
        labels.sort_unstable();
        labels.dedup();

        let primary_series = labels.iter().map(|d| primary_map.get(d).copied()).collect();
        let other_series: Vec<Option<f64>> =
            labels.iter().map(|d| other_map.get(d).copied()).collect();

        axes.secondary_label = Some(format!("{} Weight (lbs)", other.name));
        let secondary = proportional_range(primary_range, primary.goals, other.goals).or_else(|| {
            padded_range(
                other_series
                    .iter()
                    .flatten()
                    .copied()
                    .chain(other.goals.start_weight.filter(|v| is_set(*v)))
                    .chain(other.goals.goal_weight.filter(|v| is_set(*v))),
            )
        });
        axes.secondary_min = secondary.map(|(lo, _)| lo);
        axes.secondary_max = secondary.map(|(_, hi)| hi);

        WeightChart {
            labels,
            primary: primary_series,
            comparison: Some(other_series),
        }
    } else {
        WeightChart {
            labels: primary_map.keys().copied().collect(),
            primary: primary_map.values().copied().map(Some).collect(),
            comparison: None,
        }
    };

    HistoryView {
        summary: summarize(&sorted, primary.goals),
        weight_chart,
        body_fat_chart: metric_chart(&sorted, |o| o.body_fat),
        waist_chart: metric_chart(&sorted, |o| o.waist),
        axes,
    }
}

/// Label and class for the gap between the current weight and the goal.
#[must_use]
pub fn goal_progress(current: f64, goal: f64) -> GoalProgress {
    let delta = current - goal;
    if delta > GOAL_TOLERANCE {
        GoalProgress {
            label: format!("lose {delta:.1} lbs"),
            class: GoalClass::Negative,
        }
    } else if delta < -GOAL_TOLERANCE {
        GoalProgress {
            label: format!("{:.1} lbs below goal", -delta),
            class: GoalClass::Positive,
        }
    } else {
        GoalProgress {
            label: "Goal reached!".to_string(),
            class: GoalClass::Positive,
        }
    }
}

// Stable: same-date observations keep their insertion order.
fn sorted_by_date(observations: &[Observation]) -> Vec<&Observation> {
    let mut sorted: Vec<&Observation> = observations.iter().collect();
    sorted.sort_by_key(|o| o.date);
    sorted
}

// Later entries overwrite earlier ones on the same date.
fn weight_by_date(sorted: &[&Observation]) -> BTreeMap<NaiveDate, f64> {
    sorted.iter().map(|o| (o.date, o.weight)).collect()
}

fn summarize(sorted: &[&Observation], goals: Goals) -> Summary {
    let current = sorted.last().map(|o| o.weight);
    let to_goal = match (current, goals.goal_weight) {
        (Some(c), Some(g)) if is_set(g) => Some(goal_progress(c, g)),
        _ => None,
    };

    Summary {
        current,
        highest: sorted.iter().map(|o| o.weight).reduce(f64::max),
        lowest: sorted.iter().map(|o| o.weight).reduce(f64::min),
        start: goals.start_weight,
        goal: goals.goal_weight,
        to_goal,
        body_fat: metric_stats(sorted, |o| o.body_fat),
        waist: metric_stats(sorted, |o| o.waist),
    }
}

fn metric_stats(
    sorted: &[&Observation],
    metric: fn(&Observation) -> Option<f64>,
) -> Option<MetricStats> {
    let values: Vec<f64> = sorted.iter().filter_map(|o| metric(o)).collect();
    let current = *values.last()?;
    Some(MetricStats {
        current,
        highest: values.iter().copied().fold(current, f64::max),
        lowest: values.iter().copied().fold(current, f64::min),
    })
}

fn metric_chart(sorted: &[&Observation], metric: fn(&Observation) -> Option<f64>) -> MetricChart {
    let (labels, values) = sorted
        .iter()
        .filter_map(|o| metric(o).map(|v| (o.date, v)))
        .unzip();
    MetricChart { labels, values }
}

fn padded_range(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .into_iter()
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
        })
        .map(|(lo, hi)| (lo - AXIS_PADDING, hi + AXIS_PADDING))
}

// A stored goal of zero means "not set".
fn is_set(goal: f64) -> bool {
    goal.abs() > f64::EPSILON
}

/// Scale the comparison axis so both users' start and goal weights line up.
fn proportional_range(
    primary_range: Option<(f64, f64)>,
    primary: Goals,
    comparison: Goals,
) -> Option<(f64, f64)> {
    let (min, max) = primary_range?;
    let p_start = primary.start_weight.filter(|v| *v > 0.0)?;
    let p_goal = primary.goal_weight.filter(|v| *v > 0.0)?;
    let c_start = comparison.start_weight.filter(|v| is_set(*v))?;
    let c_goal = comparison.goal_weight.filter(|v| is_set(*v))?;
    Some((min * (c_goal / p_goal), max * (c_start / p_start)))
}
