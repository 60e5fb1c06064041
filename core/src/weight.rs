use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::models::{UserGoals, WeightEntry, tracking_epoch};
use crate::pace::round_to;

/// Slack allowed above the linear schedule before falling off track.
pub const ON_TRACK_BUFFER_LBS: f64 = 2.0;
/// Change between the compared entries that counts as a trend.
pub const TREND_THRESHOLD_LBS: f64 = 0.5;
pub const CHART_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeightProgress {
    pub start_weight: Option<f64>,
    pub current_weight: Option<f64>,
    pub goal_weight: Option<f64>,
    pub weight_lost: f64,
    pub weight_to_lose: Option<f64>,
    pub percent_complete: f64,
    pub on_track: bool,
    pub trend: Trend,
    pub entries_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub date: String,
    pub weight: f64,
    pub label: String,
}

fn in_scope_sorted(entries: &[WeightEntry]) -> Vec<&WeightEntry> {
    let epoch = tracking_epoch();
    let mut sorted: Vec<&WeightEntry> = entries.iter().filter(|e| e.recorded_at >= epoch).collect();
    sorted.sort_by_key(|e| (e.recorded_at, e.id));
    sorted
}

/// Direction of the last three entries (or last two when only two exist).
#[must_use]
pub fn trend(weights: &[f64]) -> Trend {
    let window = match weights.len() {
        0 | 1 => return Trend::Stable,
        2 => weights,
        n => &weights[n - 3..],
    };
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return Trend::Stable;
    };
    if *last < first - TREND_THRESHOLD_LBS {
        Trend::Down
    } else if *last > first + TREND_THRESHOLD_LBS {
        Trend::Up
    } else {
        Trend::Stable
    }
}

/// Weight expected on `today` when losing linearly from `start_weight` on
/// `start` to `goal_weight` on `end`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn scheduled_weight(
    start_weight: f64,
    goal_weight: f64,
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
) -> f64 {
    let total_days = (end - start).num_days();
    if total_days <= 0 {
        return goal_weight;
    }
    let elapsed = (today - start).num_days().clamp(0, total_days);
    start_weight - (start_weight - goal_weight) * (elapsed as f64 / total_days as f64)
}

#[must_use]
pub fn weight_progress(
    entries: &[WeightEntry],
    goals: &UserGoals,
    now: NaiveDateTime,
) -> WeightProgress {
    let sorted = in_scope_sorted(entries);
    let series: Vec<f64> = sorted.iter().map(|e| e.weight_lbs).collect();

    let start = goals.start_weight_lbs.or_else(|| series.first().copied());
    let current = series.last().copied().or(start);
    let goal = goals.goal_weight_lbs;

    let weight_lost = match (start, current) {
        (Some(s), Some(c)) => s - c,
        _ => 0.0,
    };
    let weight_to_lose = goal.zip(current).map(|(g, c)| (c - g).max(0.0));

    let percent_complete = match (start, current, goal) {
        (Some(s), Some(c), Some(g)) => {
            let total = s - g;
            if total > 0.0 {
                (weight_lost / total * 100.0).clamp(0.0, 100.0)
            } else if c <= g {
                100.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    };

    let on_track = match (start, current, goal, sorted.first()) {
        (Some(s), Some(c), Some(g), Some(first)) => {
            let end = goals.weight_goal_date.unwrap_or_else(|| {
                NaiveDate::from_ymd_opt(now.year(), 12, 31).unwrap_or(NaiveDate::MAX)
            });
            let expected = scheduled_weight(s, g, first.recorded_at.date(), end, now.date());
            c <= expected + ON_TRACK_BUFFER_LBS
        }
        _ => false,
    };

    WeightProgress {
        start_weight: start.map(|w| round_to(w, 1)),
        current_weight: current.map(|w| round_to(w, 1)),
        goal_weight: goal,
        weight_lost: round_to(weight_lost, 1),
        weight_to_lose: weight_to_lose.map(|w| round_to(w, 1)),
        percent_complete: round_to(percent_complete, 1),
        on_track,
        trend: trend(&series),
        entries_count: sorted.len(),
    }
}

/// Up to 100 in-scope entries, oldest first.
#[must_use]
pub fn weight_chart(entries: &[WeightEntry]) -> Vec<ChartPoint> {
    in_scope_sorted(entries)
        .into_iter()
        .take(CHART_LIMIT)
        .map(|e| ChartPoint {
            date: e.recorded_at.format("%Y-%m-%d").to_string(),
            weight: e.weight_lbs,
            label: e.recorded_at.format("%b %d").to_string(),
        })
        .collect()
}
