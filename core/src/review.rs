use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::goals::{month_start, next_month_start, percent_of};
use crate::models::{Run, StepEntry, WeightEntry, tracking_epoch};
use crate::pace::{format_duration, pace, round_to};

/// Month a review should show for `today`, if any.
///
/// The month just ending is shown on its last day; the month just ended is
/// shown during the first seven days of the next one.
#[must_use]
pub fn review_target(today: NaiveDate) -> Option<(i32, u32)> {
    let tomorrow = today + Duration::days(1);
    if tomorrow.month() != today.month() {
        return Some((today.year(), today.month()));
    }
    if today.day() <= 7 {
        return Some(previous_month(today.year(), today.month()));
    }
    None
}

/// The month before `month`. January of the earliest representable year
/// has no predecessor and maps to itself.
#[must_use]
pub fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month <= 1 {
        year.checked_sub(1).map_or((year, 1), |y| (y, 12))
    } else {
        (year, month - 1)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LongestRun {
    pub run_id: i64,
    pub run_type: String,
    pub distance_km: f64,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRollup {
    pub count: usize,
    pub total_km: f64,
    pub total_duration_seconds: i64,
    pub formatted_duration: String,
    pub average_pace: String,
    pub outdoor: usize,
    pub treadmill: usize,
    pub by_type: BTreeMap<String, usize>,
    pub longest_run: Option<LongestRun>,
    pub best_day_streak: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BestStepDay {
    pub steps: i64,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRollup {
    pub entries: usize,
    pub total: i64,
    pub average: i64,
    pub best_day: Option<BestStepDay>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeightRollup {
    pub entries: usize,
    pub first: Option<f64>,
    pub last: Option<f64>,
    pub change: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalRollup {
    pub goal_km: f64,
    pub percent: f64,
    pub met: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthComparison {
    pub previous_km: f64,
    pub previous_runs: usize,
    pub km_change: f64,
    pub runs_change: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthReview {
    pub available: bool,
    pub year: i32,
    pub month: u32,
    pub month_label: String,
    pub runs: RunRollup,
    pub steps: StepRollup,
    pub weight: WeightRollup,
    pub goal: GoalRollup,
    pub vs_previous: MonthComparison,
}

fn month_window(year: i32, month: u32) -> (NaiveDateTime, NaiveDateTime) {
    (
        month_start(year, month).max(tracking_epoch()),
        next_month_start(year, month),
    )
}

fn in_window(at: NaiveDateTime, (from, to): (NaiveDateTime, NaiveDateTime)) -> bool {
    at >= from && at < to
}

/// Longest chain of consecutive calendar days with at least one run.
#[must_use]
pub fn best_day_streak(runs: &[&Run]) -> usize {
    let days: BTreeSet<NaiveDate> = runs.iter().map(|r| r.completed_at.date()).collect();
    let mut best = 0;
    let mut current = 0;
    let mut previous: Option<NaiveDate> = None;
    for day in days {
        current = match previous {
            Some(prev) if day - prev == Duration::days(1) => current + 1,
            _ => 1,
        };
        best = best.max(current);
        previous = Some(day);
    }
    best
}

fn roll_up_runs(runs: &[&Run]) -> RunRollup {
    let total_km: f64 = runs.iter().map(|r| r.distance_km).sum();
    let total_duration_seconds: i64 = runs.iter().map(|r| r.duration_seconds).sum();
    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
    for run in runs {
        *by_type.entry(run.run_type.clone()).or_default() += 1;
    }
    let treadmill = runs.iter().filter(|r| r.category == "treadmill").count();
    let longest_run = runs
        .iter()
        .copied()
        .reduce(|best, r| if r.distance_km > best.distance_km { r } else { best })
        .map(|r| LongestRun {
            run_id: r.id,
            run_type: r.run_type.clone(),
            distance_km: r.distance_km,
            date: r.completed_at.format("%Y-%m-%d").to_string(),
        });

    RunRollup {
        count: runs.len(),
        total_km: round_to(total_km, 1),
        total_duration_seconds,
        formatted_duration: format_duration(total_duration_seconds),
        average_pace: pace(total_duration_seconds, total_km),
        outdoor: runs.len() - treadmill,
        treadmill,
        by_type,
        longest_run,
        best_day_streak: best_day_streak(runs),
    }
}

fn roll_up_steps(entries: &[&StepEntry]) -> StepRollup {
    let total: i64 = entries.iter().map(|e| e.step_count).sum();
    let count = i64::try_from(entries.len()).unwrap_or(i64::MAX);
    let best_day = entries
        .iter()
        .copied()
        .reduce(|best, e| if e.step_count > best.step_count { e } else { best })
        .map(|e| BestStepDay {
            steps: e.step_count,
            date: e.recorded_date.format("%Y-%m-%d").to_string(),
        });
    StepRollup {
        entries: entries.len(),
        total,
        average: if count > 0 { total / count } else { 0 },
        best_day,
    }
}

fn roll_up_weight(entries: &mut [&WeightEntry]) -> WeightRollup {
    entries.sort_by_key(|w| (w.recorded_at, w.id));
    let first = entries.first().map(|w| w.weight_lbs);
    let last = entries.last().map(|w| w.weight_lbs);
    WeightRollup {
        entries: entries.len(),
        first,
        last,
        change: first.zip(last).map(|(f, l)| round_to(l - f, 1)),
    }
}

/// Aggregate one calendar month and compare it with the month before.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn month_review(
    runs: &[Run],
    steps: &[StepEntry],
    weights: &[WeightEntry],
    monthly_goal_km: f64,
    year: i32,
    month: u32,
) -> MonthReview {
    let window = month_window(year, month);
    let month_runs: Vec<&Run> = runs.iter().filter(|r| in_window(r.completed_at, window)).collect();
    let month_steps: Vec<&StepEntry> = steps
        .iter()
        .filter(|e| in_window(e.recorded_date, window))
        .collect();
    let mut month_weights: Vec<&WeightEntry> = weights
        .iter()
        .filter(|w| in_window(w.recorded_at, window))
        .collect();

    let (prev_year, prev_month) = previous_month(year, month);
    let prev_window = month_window(prev_year, prev_month);
    let prev_runs: Vec<&Run> = runs
        .iter()
        .filter(|r| in_window(r.completed_at, prev_window))
        .collect();
    let prev_km: f64 = prev_runs.iter().map(|r| r.distance_km).sum();

    let rollup = roll_up_runs(&month_runs);
    let month_km: f64 = month_runs.iter().map(|r| r.distance_km).sum();

    MonthReview {
        available: true,
        year,
        month,
        month_label: month_start(year, month).format("%B %Y").to_string(),
        goal: GoalRollup {
            goal_km: monthly_goal_km,
            percent: round_to(percent_of(month_km, monthly_goal_km), 1),
            met: monthly_goal_km > 0.0 && month_km >= monthly_goal_km,
        },
        vs_previous: MonthComparison {
            previous_km: round_to(prev_km, 1),
            previous_runs: prev_runs.len(),
            km_change: round_to(month_km - prev_km, 1),
            runs_change: month_runs.len() as i64 - prev_runs.len() as i64,
        },
        runs: rollup,
        steps: roll_up_steps(&month_steps),
        weight: roll_up_weight(&mut month_weights),
    }
}
