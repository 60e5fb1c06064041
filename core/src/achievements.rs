//! Static achievement catalog, evaluated live against an aggregate snapshot.
//! Nothing here is persisted: unlock state is recomputed on every request.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{Run, StepEntry, tracking_epoch};

/// Aggregates every unlock rule reads from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AchievementStats {
    pub total_runs: i64,
    pub total_km: f64,
    pub runs_by_type: BTreeMap<String, i64>,
    pub longest_streak: i64,
    pub monthly_goals_hit: i64,
    pub outdoor_runs: i64,
    pub treadmill_runs: i64,
    pub step_entries: i64,
    pub days_20k: i64,
    pub days_25k: i64,
}

impl AchievementStats {
    /// Build a snapshot from raw rows. Rows before the tracking epoch are
    /// skipped.
    #[must_use]
    pub fn collect(
        runs: &[Run],
        steps: &[StepEntry],
        longest_streak: i64,
        monthly_goals_hit: i64,
    ) -> Self {
        let epoch = tracking_epoch();
        let mut stats = Self {
            longest_streak,
            monthly_goals_hit,
            ..Self::default()
        };
        for run in runs.iter().filter(|r| r.completed_at >= epoch) {
            stats.total_runs += 1;
            stats.total_km += run.distance_km;
            *stats.runs_by_type.entry(run.run_type.clone()).or_default() += 1;
            match run.category.as_str() {
                "treadmill" => stats.treadmill_runs += 1,
                _ => stats.outdoor_runs += 1,
            }
        }
        for entry in steps.iter().filter(|e| e.recorded_date >= epoch) {
            stats.step_entries += 1;
            if entry.step_count >= 20_000 {
                stats.days_20k += 1;
            }
            if entry.step_count >= 25_000 {
                stats.days_25k += 1;
            }
        }
        stats
    }

    fn runs_of(&self, run_type: &str) -> i64 {
        self.runs_by_type.get(run_type).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    TotalRuns(i64),
    TotalKm(f64),
    RunsOfType(&'static str, i64),
    LongestStreak(i64),
    MonthlyGoalsHit(i64),
    OutdoorRuns(i64),
    TreadmillRuns(i64),
    /// At least this many runs in each category.
    BothCategories(i64),
    StepEntries(i64),
    Days20k(i64),
    Days25k(i64),
}

impl Rule {
    #[must_use]
    pub fn is_met(self, stats: &AchievementStats) -> bool {
        match self {
            Self::TotalRuns(n) => stats.total_runs >= n,
            Self::TotalKm(km) => stats.total_km >= km,
            Self::RunsOfType(run_type, n) => stats.runs_of(run_type) >= n,
            Self::LongestStreak(n) => stats.longest_streak >= n,
            Self::MonthlyGoalsHit(n) => stats.monthly_goals_hit >= n,
            Self::OutdoorRuns(n) => stats.outdoor_runs >= n,
            Self::TreadmillRuns(n) => stats.treadmill_runs >= n,
            Self::BothCategories(n) => stats.outdoor_runs >= n && stats.treadmill_runs >= n,
            Self::StepEntries(n) => stats.step_entries >= n,
            Self::Days20k(n) => stats.days_20k >= n,
            Self::Days25k(n) => stats.days_25k >= n,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AchievementDef {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub emoji: &'static str,
    pub category: &'static str,
    pub rule: Rule,
}

const fn def(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    emoji: &'static str,
    category: &'static str,
    rule: Rule,
) -> AchievementDef {
    AchievementDef {
        id,
        name,
        description,
        emoji,
        category,
        rule,
    }
}

pub const CATALOG: &[AchievementDef] = &[
    // Run count
    def(
        "first_run",
        "First Steps",
        "Complete your first run",
        "👟",
        "milestone",
        Rule::TotalRuns(1),
    ),
    def("runs_10", "Double Digits", "Complete 10 runs", "🔟", "milestone", Rule::TotalRuns(10)),
    def("runs_25", "Quarter Century", "Complete 25 runs", "⭐", "milestone", Rule::TotalRuns(25)),
    def("runs_50", "Fifty Club", "Complete 50 runs", "🌟", "milestone", Rule::TotalRuns(50)),
    def("runs_100", "Century Runner", "Complete 100 runs", "💫", "milestone", Rule::TotalRuns(100)),
    // Total distance
    def("km_50", "Getting Started", "Run 50km total", "🌱", "distance", Rule::TotalKm(50.0)),
    def("km_100", "Century", "Run 100km total", "💯", "distance", Rule::TotalKm(100.0)),
    def("km_250", "Quarter Thousand", "Run 250km total", "🏃", "distance", Rule::TotalKm(250.0)),
    def("km_500", "Half Way There", "Run 500km total", "🔥", "distance", Rule::TotalKm(500.0)),
    def("km_1000", "Thousand Club", "Run 1000km total", "👑", "distance", Rule::TotalKm(1000.0)),
    // First completion per distance and specialization
    def(
        "first_10k",
        "Into Double Figures",
        "Complete your first 10k",
        "🏅",
        "distance_type",
        Rule::RunsOfType("10k", 1),
    ),
    def(
        "first_15k",
        "Going Long",
        "Complete your first 15k",
        "🎖️",
        "distance_type",
        Rule::RunsOfType("15k", 1),
    ),
    def(
        "first_18k",
        "Beast Mode",
        "Complete your first 18k",
        "🦁",
        "distance_type",
        Rule::RunsOfType("18k", 1),
    ),
    def(
        "first_21k",
        "Half Marathoner",
        "Complete your first 21k",
        "🏔️",
        "distance_type",
        Rule::RunsOfType("21k", 1),
    ),
    def(
        "ten_10ks",
        "10K Specialist",
        "Complete ten 10k runs",
        "🏆",
        "distance_type",
        Rule::RunsOfType("10k", 10),
    ),
    def(
        "five_21ks",
        "Half Marathon Habit",
        "Complete five 21k runs",
        "🥇",
        "distance_type",
        Rule::RunsOfType("21k", 5),
    ),
    // Weekly streaks
    def(
        "streak_2",
        "Consistency",
        "Achieve a 2-week streak",
        "🔥",
        "streak",
        Rule::LongestStreak(2),
    ),
    def(
        "streak_4",
        "Month Strong",
        "Achieve a 4-week streak",
        "💪",
        "streak",
        Rule::LongestStreak(4),
    ),
    def(
        "streak_8",
        "Unstoppable",
        "Achieve an 8-week streak",
        "⚡",
        "streak",
        Rule::LongestStreak(8),
    ),
    def(
        "streak_12",
        "Quarter Year",
        "Achieve a 12-week streak",
        "🚀",
        "streak",
        Rule::LongestStreak(12),
    ),
    // Monthly goals
    def(
        "monthly_goal_1",
        "Goal Getter",
        "Hit your monthly distance goal",
        "🎯",
        "goals",
        Rule::MonthlyGoalsHit(1),
    ),
    def(
        "monthly_goal_3",
        "Hat Trick",
        "Hit your monthly goal 3 times",
        "🎩",
        "goals",
        Rule::MonthlyGoalsHit(3),
    ),
    def(
        "monthly_goal_6",
        "Half Year Hero",
        "Hit your monthly goal 6 times",
        "🦸",
        "goals",
        Rule::MonthlyGoalsHit(6),
    ),
    // Category mix
    def(
        "outdoor_10",
        "Fresh Air",
        "Complete 10 outdoor runs",
        "🌳",
        "category",
        Rule::OutdoorRuns(10),
    ),
    def(
        "treadmill_10",
        "Belt Runner",
        "Complete 10 treadmill runs",
        "🏋️",
        "category",
        Rule::TreadmillRuns(10),
    ),
    def(
        "all_terrain",
        "All Terrain",
        "Complete 5 outdoor and 5 treadmill runs",
        "🌗",
        "category",
        Rule::BothCategories(5),
    ),
    // Steps
    def(
        "steps_first",
        "Step Counter",
        "Log your first step count",
        "👣",
        "steps",
        Rule::StepEntries(1),
    ),
    def("steps_20k_1", "Big Day", "Walk 20,000 steps in a day", "🚶", "steps", Rule::Days20k(1)),
    def(
        "steps_20k_10",
        "Step Machine",
        "Reach 20,000 steps on 10 days",
        "⚙️",
        "steps",
        Rule::Days20k(10),
    ),
    def(
        "steps_25k_1",
        "Marathon Walker",
        "Walk 25,000 steps in a day",
        "🥾",
        "steps",
        Rule::Days25k(1),
    ),
    def(
        "steps_25k_5",
        "Step Legend",
        "Reach 25,000 steps on 5 days",
        "🏅",
        "steps",
        Rule::Days25k(5),
    ),
];

#[derive(Debug, Clone, Serialize)]
pub struct Achievement {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub emoji: &'static str,
    pub category: &'static str,
    pub unlocked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AchievementReport {
    pub unlocked: Vec<Achievement>,
    pub locked: Vec<Achievement>,
    pub total: usize,
    pub unlocked_count: usize,
}

#[must_use]
pub fn evaluate(stats: &AchievementStats) -> AchievementReport {
    let (unlocked, locked): (Vec<_>, Vec<_>) = CATALOG
        .iter()
        .map(|def| Achievement {
            id: def.id,
            name: def.name,
            description: def.description,
            emoji: def.emoji,
            category: def.category,
            unlocked: def.rule.is_met(stats),
        })
        .partition(|a| a.unlocked);
    AchievementReport {
        unlocked_count: unlocked.len(),
        total: CATALOG.len(),
        unlocked,
        locked,
    }
}
