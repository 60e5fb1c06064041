use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::models::{Run, RunType, tracking_epoch};
use crate::pace::{format_duration, pace};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonalRecord {
    pub time: String,
    pub duration_seconds: i64,
    pub pace: String,
    pub date: String,
    pub run_id: i64,
}

/// Fastest run per distance, in catalog order. Serializes as a map keyed by
/// run-type label with `null` for distances never run.
#[derive(Debug, Clone, Default)]
pub struct PersonalRecords(pub Vec<(RunType, Option<PersonalRecord>)>);

impl PersonalRecords {
    #[must_use]
    pub fn get(&self, run_type: RunType) -> Option<&PersonalRecord> {
        self.0
            .iter()
            .find(|(t, _)| *t == run_type)
            .and_then(|(_, record)| record.as_ref())
    }
}

impl Serialize for PersonalRecords {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (run_type, record) in &self.0 {
            map.serialize_entry(run_type.label(), record)?;
        }
        map.end()
    }
}

/// Fastest in-scope run for every distance. Ties go to the earlier run.
#[must_use]
pub fn personal_records(runs: &[Run]) -> PersonalRecords {
    let epoch = tracking_epoch();
    let records = RunType::ALL
        .into_iter()
        .map(|run_type| {
            let fastest = runs
                .iter()
                .filter(|r| r.run_type == run_type.label() && r.completed_at >= epoch)
                .min_by_key(|r| (r.duration_seconds, r.completed_at, r.id));
            let record = fastest.map(|r| PersonalRecord {
                time: format_duration(r.duration_seconds),
                duration_seconds: r.duration_seconds,
                pace: pace(r.duration_seconds, run_type.distance_km()),
                date: r.completed_at.format("%Y-%m-%d").to_string(),
                run_id: r.id,
            });
            (run_type, record)
        })
        .collect();
    PersonalRecords(records)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrCheck {
    pub is_first: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improvement_seconds: Option<i64>,
    pub message: String,
}

impl PrCheck {
    #[must_use]
    pub fn pr_type(run_type: &str) -> String {
        format!("fastest_{run_type}")
    }
}

/// Whether `run` beats every `previous` run of the same type.
///
/// `previous` must exclude `run` itself. Matching the best time is not a PR.
#[must_use]
pub fn check_new_pr(run: &Run, previous: &[Run]) -> Option<PrCheck> {
    let label = run.run_type.to_uppercase();
    let Some(best) = previous
        .iter()
        .filter(|r| r.run_type == run.run_type && r.id != run.id)
        .map(|r| r.duration_seconds)
        .min()
    else {
        return Some(PrCheck {
            is_first: true,
            improvement_seconds: None,
            message: format!("First {label} completed!"),
        });
    };

    if run.duration_seconds < best {
        let improvement = best - run.duration_seconds;
        Some(PrCheck {
            is_first: false,
            improvement_seconds: Some(improvement),
            message: format!("New {label} PR! {} faster!", format_duration(improvement)),
        })
    } else {
        None
    }
}
