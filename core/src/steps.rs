use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::models::{StepEntry, tracking_epoch};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthSteps {
    pub month: String,
    pub total_entries: i64,
    pub days_15k: i64,
    pub days_20k: i64,
    pub days_25k: i64,
    pub highest: i64,
}

impl MonthSteps {
    fn empty(label: String) -> Self {
        Self {
            month: label,
            total_entries: 0,
            days_15k: 0,
            days_20k: 0,
            days_25k: 0,
            highest: 0,
        }
    }

    fn add(&mut self, step_count: i64) {
        self.total_entries += 1;
        if step_count >= 15_000 {
            self.days_15k += 1;
        }
        if step_count >= 20_000 {
            self.days_20k += 1;
        }
        if step_count >= 25_000 {
            self.days_25k += 1;
        }
        self.highest = self.highest.max(step_count);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllTimeSteps {
    pub days_15k: i64,
    pub days_20k: i64,
    pub days_25k: i64,
    pub total_entries: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepsSummary {
    pub current_month: MonthSteps,
    pub monthly_history: Vec<MonthSteps>,
    pub all_time: AllTimeSteps,
}

/// High-step-day counts per month, newest month first.
#[must_use]
pub fn steps_summary(entries: &[StepEntry], now: NaiveDateTime) -> StepsSummary {
    let epoch = tracking_epoch();
    let mut months: BTreeMap<String, MonthSteps> = BTreeMap::new();
    for entry in entries.iter().filter(|e| e.recorded_date >= epoch) {
        let key = entry.recorded_date.format("%Y-%m").to_string();
        months
            .entry(key)
            .or_insert_with(|| MonthSteps::empty(entry.recorded_date.format("%b %Y").to_string()))
            .add(entry.step_count);
    }

    let current_key = now.format("%Y-%m").to_string();
    let current_month = months
        .get(&current_key)
        .cloned()
        .unwrap_or_else(|| MonthSteps::empty(now.format("%b %Y").to_string()));

    let all_time = months.values().fold(
        AllTimeSteps {
            days_15k: 0,
            days_20k: 0,
            days_25k: 0,
            total_entries: 0,
        },
        |mut acc, m| {
            acc.days_15k += m.days_15k;
            acc.days_20k += m.days_20k;
            acc.days_25k += m.days_25k;
            acc.total_entries += m.total_entries;
            acc
        },
    );

    StepsSummary {
        current_month,
        monthly_history: months.into_values().rev().collect(),
        all_time,
    }
}
