//! Weekly streaks over Sunday-to-Saturday weeks.
//!
//! A week counts toward a streak when it holds at least three runs, at least
//! one of them 10 km or longer and at least two shorter than 10 km.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::models::{Run, tracking_epoch};

pub const LONG_RUN_KM: f64 = 10.0;
pub const LONG_RUNS_NEEDED: usize = 1;
pub const SHORT_RUNS_NEEDED: usize = 2;
pub const MIN_RUNS_PER_WEEK: usize = 3;

/// Sunday 00:00:00 of the week containing `at`.
#[must_use]
pub fn week_start(at: NaiveDateTime) -> NaiveDateTime {
    let days_since_sunday = i64::from(at.weekday().num_days_from_sunday());
    (at.date() - Duration::days(days_since_sunday)).and_time(NaiveTime::MIN)
}

/// Sunday 00:00:00 through Saturday 23:59:59 of the week containing `at`.
#[must_use]
pub fn week_bounds(at: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let start = week_start(at);
    let end = start + Duration::days(6) + Duration::hours(23) + Duration::minutes(59)
        + Duration::seconds(59);
    (start, end)
}

/// Identifier for the plan week containing `now`, e.g. `2026-W10`.
///
/// Shifting by one day makes `%W` (Monday-based) behave as a Sunday-start week.
#[must_use]
pub fn current_week_id(now: NaiveDateTime) -> String {
    (now + Duration::days(1)).format("%Y-W%W").to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeekTally {
    pub long: usize,
    pub short: usize,
}

impl WeekTally {
    pub fn of<'a>(runs: impl IntoIterator<Item = &'a Run>) -> Self {
        let mut tally = Self::default();
        for run in runs {
            if run.distance_km >= LONG_RUN_KM {
                tally.long += 1;
            } else {
                tally.short += 1;
            }
        }
        tally
    }

    #[must_use]
    pub fn total(self) -> usize {
        self.long + self.short
    }

    #[must_use]
    pub fn is_valid(self) -> bool {
        self.total() >= MIN_RUNS_PER_WEEK
            && self.long >= LONG_RUNS_NEEDED
            && self.short >= SHORT_RUNS_NEEDED
    }
}

/// Bucket runs by the Sunday that starts their week.
#[must_use]
pub fn group_by_week(runs: &[Run]) -> BTreeMap<NaiveDate, Vec<&Run>> {
    let mut weeks: BTreeMap<NaiveDate, Vec<&Run>> = BTreeMap::new();
    for run in runs {
        weeks
            .entry(week_start(run.completed_at).date())
            .or_default()
            .push(run);
    }
    weeks
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Streaks {
    pub current: i64,
    pub longest: i64,
}

/// Current and longest run of consecutive valid weeks.
///
/// The week containing `now` is still in progress: if it is not valid yet it
/// is skipped rather than breaking the streak.
#[must_use]
pub fn calculate_streaks(runs: &[Run], now: NaiveDateTime) -> Streaks {
    let epoch = tracking_epoch();
    let in_scope: Vec<Run> = runs
        .iter()
        .filter(|r| r.completed_at >= epoch)
        .cloned()
        .collect();
    if in_scope.is_empty() {
        return Streaks::default();
    }

    let weeks: BTreeMap<NaiveDate, WeekTally> = group_by_week(&in_scope)
        .into_iter()
        .map(|(start, runs)| (start, WeekTally::of(runs)))
        .collect();
    let is_valid = |start: &NaiveDate| weeks.get(start).is_some_and(|t| t.is_valid());

    let this_week = week_start(now).date();
    let mut current = 0;
    if is_valid(&this_week) {
        current += 1;
    }
    let mut expected = this_week - Duration::days(7);
    while is_valid(&expected) {
        current += 1;
        expected -= Duration::days(7);
    }

    let mut longest = 0;
    let mut run_length = 0;
    let mut previous: Option<NaiveDate> = None;
    for (start, tally) in &weeks {
        if tally.is_valid() {
            run_length = match previous {
                Some(prev) if *start - prev == Duration::days(7) => run_length + 1,
                _ => 1,
            };
            longest = longest.max(run_length);
            previous = Some(*start);
        } else {
            run_length = 0;
            previous = None;
        }
    }

    Streaks { current, longest }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreakProgress {
    pub long_runs_completed: usize,
    pub long_runs_needed: usize,
    pub short_runs_completed: usize,
    pub short_runs_needed: usize,
    pub is_complete: bool,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub message: String,
}

/// This week's progress toward a streak-qualifying week.
#[must_use]
pub fn streak_progress(runs: &[Run], now: NaiveDateTime) -> StreakProgress {
    let (start, end) = week_bounds(now);
    let epoch = tracking_epoch();
    let tally = WeekTally::of(runs.iter().filter(|r| {
        r.completed_at >= start && r.completed_at <= end && r.completed_at >= epoch
    }));
    let is_complete = tally.long >= LONG_RUNS_NEEDED && tally.short >= SHORT_RUNS_NEEDED;
    let streaks = calculate_streaks(runs, now);

    let message = if is_complete {
        "Week complete! Streak secured!".to_string()
    } else {
        let mut needs = Vec::new();
        if tally.long < LONG_RUNS_NEEDED {
            needs.push("1 long run (10k+)".to_string());
        }
        if tally.short < SHORT_RUNS_NEEDED {
            let remaining = SHORT_RUNS_NEEDED - tally.short;
            let plural = if remaining > 1 { "s" } else { "" };
            needs.push(format!("{remaining} short run{plural}"));
        }
        format!("Need: {}", needs.join(" and "))
    };

    StreakProgress {
        long_runs_completed: tally.long,
        long_runs_needed: LONG_RUNS_NEEDED,
        short_runs_completed: tally.short,
        short_runs_needed: SHORT_RUNS_NEEDED,
        is_complete,
        current_streak: streaks.current,
        longest_streak: streaks.longest,
        message,
    }
}
