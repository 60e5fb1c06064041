use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::models::{Run, tracking_epoch};
use crate::pace::round_to;

pub const DEFAULT_YEARLY_GOAL_KM: f64 = 1000.0;
pub const DEFAULT_MONTHLY_GOAL_KM: f64 = 100.0;

#[derive(Debug, Clone, Serialize)]
pub struct YearlyProgress {
    pub goal_km: f64,
    pub current_km: f64,
    pub remaining_km: f64,
    pub percent: f64,
    pub days_remaining: i64,
    pub on_track: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyProgress {
    pub goal_km: f64,
    pub current_km: f64,
    pub remaining_km: f64,
    pub percent: f64,
    pub days_remaining: i64,
    pub month_name: String,
    pub is_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalsProgress {
    pub yearly: YearlyProgress,
    pub monthly: MonthlyProgress,
    pub monthly_goals_hit: i64,
}

/// Percent of `target` reached, clamped to 100. A zero target reads as 0%.
#[must_use]
pub fn percent_of(km: f64, target: f64) -> f64 {
    if target <= 0.0 {
        return 0.0;
    }
    (km / target * 100.0).min(100.0)
}

/// Midnight on the first day of `month`. Out-of-range input falls back to
/// the earliest representable date.
#[must_use]
pub fn month_start(year: i32, month: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap_or(NaiveDate::MIN)
        .and_time(NaiveTime::MIN)
}

/// Midnight on the first day of the following month. Past the last
/// representable year this saturates to `NaiveDateTime::MAX`.
#[must_use]
pub fn next_month_start(year: i32, month: u32) -> NaiveDateTime {
    if month >= 12 {
        year.checked_add(1).map_or(NaiveDateTime::MAX, |next| month_start(next, 1))
    } else {
        month_start(year, month + 1)
    }
}

/// Start of the aggregation window for the year containing `now`.
#[must_use]
pub fn year_window_start(now: NaiveDateTime) -> NaiveDateTime {
    month_start(now.year(), 1).max(tracking_epoch())
}

/// Total distance of runs completed in `[from, to)`.
#[must_use]
pub fn km_between(runs: &[Run], from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    runs.iter()
        .filter(|r| r.completed_at >= from && r.completed_at < to)
        .map(|r| r.distance_km)
        .sum()
}

/// Months of the tracked year, January through the current month, whose
/// distance met `monthly_target`.
#[must_use]
pub fn monthly_goals_hit(runs: &[Run], monthly_target: f64, now: NaiveDateTime) -> i64 {
    let year = now.year();
    let epoch = tracking_epoch();
    let hit = (1..=now.month())
        .filter(|&month| {
            let from = month_start(year, month).max(epoch);
            let to = next_month_start(year, month);
            from < to && km_between(runs, from, to) >= monthly_target
        })
        .count();
    i64::try_from(hit).unwrap_or(i64::MAX)
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn goals_progress(
    runs: &[Run],
    yearly_target: f64,
    monthly_target: f64,
    now: NaiveDateTime,
) -> GoalsProgress {
    let year_start = year_window_start(now);
    let year_end = month_start(now.year() + 1, 1);
    let yearly_km = km_between(runs, year_start, year_end);

    let this_month = month_start(now.year(), now.month()).max(tracking_epoch());
    let month_end = next_month_start(now.year(), now.month());
    let monthly_km = km_between(runs, this_month, month_end);

    let day_of_year = f64::from(now.ordinal());
    let on_track = yearly_km >= yearly_target * (day_of_year / 365.0);

    GoalsProgress {
        yearly: YearlyProgress {
            goal_km: yearly_target,
            current_km: round_to(yearly_km, 1),
            remaining_km: round_to((yearly_target - yearly_km).max(0.0), 1),
            percent: round_to(percent_of(yearly_km, yearly_target), 1),
            days_remaining: (year_end - now).num_days(),
            on_track,
        },
        monthly: MonthlyProgress {
            goal_km: monthly_target,
            current_km: round_to(monthly_km, 1),
            remaining_km: round_to((monthly_target - monthly_km).max(0.0), 1),
            percent: round_to(percent_of(monthly_km, monthly_target), 1),
            days_remaining: (month_end - now).num_days(),
            month_name: now.format("%B").to_string(),
            is_complete: monthly_km >= monthly_target,
        },
        monthly_goals_hit: monthly_goals_hit(runs, monthly_target, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pace::distance_for;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn run(id: i64, run_type: &str, when: &str) -> Run {
        Run {
            id,
            user_id: None,
            run_type: run_type.to_string(),
            duration_seconds: 3000,
            distance_km: distance_for(run_type),
            completed_at: at(when),
            notes: None,
            category: "outdoor".to_string(),
        }
    }

    #[test]
    fn test_percent_clamped_and_zero_target() {
        assert_eq!(percent_of(50.0, 100.0), 50.0);
        assert_eq!(percent_of(250.0, 100.0), 100.0);
        assert_eq!(percent_of(10.0, 0.0), 0.0);
    }

    #[test]
    fn test_month_boundaries() {
        assert_eq!(month_start(2026, 2), at("2026-02-01 00:00"));
        assert_eq!(next_month_start(2026, 12), at("2027-01-01 00:00"));
        assert_eq!(next_month_start(2026, 4), at("2026-05-01 00:00"));
    }

    #[test]
    fn test_next_month_start_saturates_at_last_year() {
        assert_eq!(next_month_start(i32::MAX, 12), NaiveDateTime::MAX);
    }

    #[test]
    fn test_yearly_percent_clamped_to_100() {
        let runs: Vec<Run> = (0..10).map(|i| run(i, "21k", "2026-02-10 07:00")).collect();
        let progress = goals_progress(&runs, 100.0, 100.0, at("2026-02-20 12:00"));
        assert_eq!(progress.yearly.current_km, 210.0);
        assert_eq!(progress.yearly.percent, 100.0);
        assert_eq!(progress.yearly.remaining_km, 0.0);
        assert!(progress.yearly.on_track);
    }

    #[test]
    fn test_monthly_progress_current_month_only() {
        let runs = vec![
            run(1, "10k", "2026-01-30 07:00"),
            run(2, "5k", "2026-02-01 07:00"),
            run(3, "10k", "2026-02-15 07:00"),
        ];
        let progress = goals_progress(&runs, 1000.0, 100.0, at("2026-02-20 12:00"));
        assert_eq!(progress.monthly.current_km, 15.0);
        assert_eq!(progress.monthly.percent, 15.0);
        assert_eq!(progress.monthly.month_name, "February");
        assert!(!progress.monthly.is_complete);
        assert_eq!(progress.monthly.days_remaining, 8);
        assert_eq!(progress.yearly.current_km, 25.0);
    }

    #[test]
    fn test_on_track_linear_pacing() {
        // Day 100 of 365 against 365 km needs 100 km
        let now = at("2026-04-10 12:00");
        assert_eq!(now.ordinal(), 100);
        let behind: Vec<Run> = (0..9).map(|i| run(i, "10k", "2026-03-01 07:00")).collect();
        assert!(!goals_progress(&behind, 365.0, 100.0, now).yearly.on_track);
        let ahead: Vec<Run> = (0..11).map(|i| run(i, "10k", "2026-03-01 07:00")).collect();
        assert!(goals_progress(&ahead, 365.0, 100.0, now).yearly.on_track);
    }

    #[test]
    fn test_monthly_goals_hit_counts_months_to_date() {
        let mut runs: Vec<Run> = (0..5).map(|i| run(i, "21k", "2026-01-10 07:00")).collect();
        runs.extend((10..15).map(|i| run(i, "21k", "2026-03-10 07:00")));
        runs.push(run(20, "10k", "2026-02-10 07:00"));
        assert_eq!(monthly_goals_hit(&runs, 100.0, at("2026-03-20 12:00")), 2);
        assert_eq!(monthly_goals_hit(&runs, 100.0, at("2026-02-20 12:00")), 1);
    }

    #[test]
    fn test_runs_before_epoch_excluded() {
        let runs = vec![run(1, "21k", "2025-12-30 07:00")];
        let progress = goals_progress(&runs, 1000.0, 100.0, at("2026-01-05 12:00"));
        assert_eq!(progress.yearly.current_km, 0.0);
    }

    #[test]
    fn test_empty_progress() {
        let progress = goals_progress(&[], 1000.0, 100.0, at("2026-06-15 12:00"));
        assert_eq!(progress.yearly.percent, 0.0);
        assert_eq!(progress.monthly.remaining_km, 100.0);
        assert_eq!(progress.monthly_goals_hit, 0);
    }
}
