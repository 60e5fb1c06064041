use chrono::{Datelike, NaiveDateTime};
use rand::Rng;
use serde::Serialize;

use crate::goals::month_start;
use crate::models::{Run, UserStats, tracking_epoch};
use crate::pace::{pace, round_to};
use crate::streak::{calculate_streaks, week_start};

#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub total_runs: usize,
    pub total_km: f64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub average_pace: String,
    pub runs_this_week: usize,
    pub km_this_week: f64,
    pub runs_this_month: usize,
    pub km_this_month: f64,
}

/// Totals recomputed from raw runs. Rows before the tracking epoch are
/// ignored.
#[must_use]
pub fn stats_summary(runs: &[Run], now: NaiveDateTime) -> StatsSummary {
    let epoch = tracking_epoch();
    let in_scope: Vec<&Run> = runs.iter().filter(|r| r.completed_at >= epoch).collect();

    let this_week = week_start(now);
    let this_month = month_start(now.year(), now.month());
    let week: Vec<&&Run> = in_scope.iter().filter(|r| r.completed_at >= this_week).collect();
    let month: Vec<&&Run> = in_scope.iter().filter(|r| r.completed_at >= this_month).collect();

    let total_km: f64 = in_scope.iter().map(|r| r.distance_km).sum();
    let total_seconds: i64 = in_scope.iter().map(|r| r.duration_seconds).sum();
    let streaks = calculate_streaks(runs, now);

    StatsSummary {
        total_runs: in_scope.len(),
        total_km: round_to(total_km, 2),
        current_streak: streaks.current,
        longest_streak: streaks.longest,
        average_pace: pace(total_seconds, total_km),
        runs_this_week: week.len(),
        km_this_week: round_to(week.iter().map(|r| r.distance_km).sum(), 2),
        runs_this_month: month.len(),
        km_this_month: round_to(month.iter().map(|r| r.distance_km).sum(), 2),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Motivation {
    pub message: &'static str,
    pub emoji: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub achievement: Option<&'static str>,
}

const fn cheer(message: &'static str, emoji: &'static str) -> Motivation {
    Motivation {
        message,
        emoji,
        achievement: None,
    }
}

const fn milestone(message: &'static str, emoji: &'static str, title: &'static str) -> Motivation {
    Motivation {
        message,
        emoji,
        achievement: Some(title),
    }
}

pub const ENCOURAGEMENTS: [Motivation; 8] = [
    cheer("Every run makes you stronger!", "💪"),
    cheer("You're building something amazing!", "🌟"),
    cheer("One step at a time, one run at a time!", "👟"),
    cheer("Your future self will thank you!", "🙏"),
    cheer("Progress, not perfection!", "📈"),
    cheer("You showed up. That's what matters!", "🎯"),
    cheer("The hardest part is over - you started!", "🚀"),
    cheer("Running is moving meditation!", "🧘"),
];

pub const MILESTONES: [(i64, Motivation); 6] = [
    (1, milestone("First run complete! The journey begins!", "🎉", "First Steps")),
    (5, milestone("5 runs done! You're getting hooked!", "🔥", "Getting Started")),
    (10, milestone("Double digits! You're a runner now!", "🏆", "Double Digits")),
    (25, milestone("25 runs! Consistency is your superpower!", "⭐", "Quarter Century")),
    (50, milestone("50 runs! You're unstoppable!", "🚀", "Half Century")),
    (100, milestone("100 RUNS! You're a legend!", "👑", "Century Club")),
];

/// Milestone message when the cached run count sits exactly on one,
/// otherwise a random encouragement.
pub fn motivation(cached: &UserStats, rng: &mut impl Rng) -> Motivation {
    if let Some((_, message)) = MILESTONES.iter().find(|(n, _)| *n == cached.total_runs) {
        return message.clone();
    }
    ENCOURAGEMENTS[rng.random_range(0..ENCOURAGEMENTS.len())].clone()
}
