use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// First calendar year covered by every date-windowed aggregation.
pub const TRACKING_EPOCH_YEAR: i32 = 2026;

/// Maximum number of members a circle can hold.
pub const CIRCLE_CAPACITY: i64 = 10;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Start of tracking. Rows stamped before this instant are ignored by
/// streaks, goals, records, achievements and reviews.
#[must_use]
pub fn tracking_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(TRACKING_EPOCH_YEAR, 1, 1)
        .unwrap_or(NaiveDate::MIN)
        .and_time(NaiveTime::MIN)
}

/// Whose rows an operation reads or writes.
///
/// Anonymous callers share the legacy bucket of rows without an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Anonymous,
    User(i64),
}

impl Scope {
    #[must_use]
    pub fn user_id(self) -> Option<i64> {
        match self {
            Self::Anonymous => None,
            Self::User(id) => Some(id),
        }
    }
}

impl From<Option<i64>> for Scope {
    fn from(user_id: Option<i64>) -> Self {
        user_id.map_or(Self::Anonymous, Self::User)
    }
}

// --- Run types & categories ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RunType {
    #[serde(rename = "3k")]
    ThreeK,
    #[serde(rename = "5k")]
    FiveK,
    #[serde(rename = "10k")]
    TenK,
    #[serde(rename = "15k")]
    FifteenK,
    #[serde(rename = "18k")]
    EighteenK,
    #[serde(rename = "21k")]
    TwentyOneK,
}

impl RunType {
    pub const ALL: [RunType; 6] = [
        RunType::ThreeK,
        RunType::FiveK,
        RunType::TenK,
        RunType::FifteenK,
        RunType::EighteenK,
        RunType::TwentyOneK,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::ThreeK => "3k",
            Self::FiveK => "5k",
            Self::TenK => "10k",
            Self::FifteenK => "15k",
            Self::EighteenK => "18k",
            Self::TwentyOneK => "21k",
        }
    }

    #[must_use]
    pub fn distance_km(self) -> f64 {
        match self {
            Self::ThreeK => 3.0,
            Self::FiveK => 5.0,
            Self::TenK => 10.0,
            Self::FifteenK => 15.0,
            Self::EighteenK => 18.0,
            Self::TwentyOneK => 21.0,
        }
    }

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.label() == label)
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RunType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        validate_run_type(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Outdoor,
    Treadmill,
}

impl Category {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Outdoor => "outdoor",
            Self::Treadmill => "treadmill",
        }
    }
}

// --- Users ---

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: Option<String>,
    pub handle: Option<String>,
    pub is_active: bool,
    pub onboarding_complete: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserGoals {
    pub start_weight_lbs: Option<f64>,
    pub goal_weight_lbs: Option<f64>,
    pub weight_goal_date: Option<NaiveDate>,
    pub yearly_km_goal: f64,
    pub monthly_km_goal: f64,
}

impl Default for UserGoals {
    fn default() -> Self {
        Self {
            start_weight_lbs: None,
            goal_weight_lbs: None,
            weight_goal_date: None,
            yearly_km_goal: crate::goals::DEFAULT_YEARLY_GOAL_KM,
            monthly_km_goal: crate::goals::DEFAULT_MONTHLY_GOAL_KM,
        }
    }
}

/// Partial goals update. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoalsUpdate {
    pub start_weight_lbs: Option<f64>,
    pub goal_weight_lbs: Option<f64>,
    pub weight_goal_date: Option<NaiveDate>,
    pub yearly_km_goal: Option<f64>,
    pub monthly_km_goal: Option<f64>,
}

// --- Runs ---

#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: i64,
    pub user_id: Option<i64>,
    pub run_type: String,
    pub duration_seconds: i64,
    pub distance_km: f64,
    pub completed_at: NaiveDateTime,
    pub notes: Option<String>,
    pub category: String,
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_type: RunType,
    pub duration_seconds: i64,
    pub notes: Option<String>,
    pub category: Category,
    pub completed_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct RunUpdate {
    pub run_type: Option<RunType>,
    pub duration_seconds: Option<i64>,
    pub notes: Option<String>,
    pub category: Option<Category>,
}

impl RunUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.run_type.is_none()
            && self.duration_seconds.is_none()
            && self.notes.is_none()
            && self.category.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct RunFilter {
    pub skip: i64,
    pub limit: i64,
    pub run_type: Option<String>,
}

impl Default for RunFilter {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 100,
            run_type: None,
        }
    }
}

// --- Weekly plans ---

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyPlan {
    pub id: i64,
    pub week_id: String,
    pub planned_runs: Vec<String>,
    pub created_at: NaiveDateTime,
}

// --- Aggregate cache ---

/// Advisory counters bumped on every logged run. Display only: every
/// correctness-sensitive figure is recomputed from raw rows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserStats {
    pub total_runs: i64,
    pub total_km: f64,
}

// --- Weight & steps ---

#[derive(Debug, Clone, Serialize)]
pub struct WeightEntry {
    pub id: i64,
    pub weight_lbs: f64,
    pub recorded_at: NaiveDateTime,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewWeightEntry {
    pub weight_lbs: f64,
    pub recorded_at: NaiveDateTime,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepEntry {
    pub id: i64,
    pub step_count: i64,
    pub recorded_date: NaiveDateTime,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewStepEntry {
    pub step_count: i64,
    pub recorded_date: NaiveDateTime,
    pub notes: Option<String>,
}

// --- Circles ---

#[derive(Debug, Clone, Serialize)]
pub struct Circle {
    pub id: i64,
    pub name: String,
    pub invite_code: String,
    pub created_by: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircleSummary {
    pub id: i64,
    pub name: String,
    pub invite_code: String,
    pub member_count: i64,
    pub is_creator: bool,
    pub joined_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Joined(Circle),
    NotFound,
    AlreadyMember,
    Full,
}

// --- Validation ---

pub fn validate_run_type(label: &str) -> Result<RunType> {
    let normalized = label.trim().to_lowercase();
    match RunType::from_label(&normalized) {
        Some(t) => Ok(t),
        None => {
            let valid: Vec<&str> = RunType::ALL.iter().map(|t| t.label()).collect();
            bail!(
                "Invalid run type '{label}'. Must be one of: {}",
                valid.join(", ")
            )
        }
    }
}

pub fn validate_category(category: &str) -> Result<Category> {
    match category.trim().to_lowercase().as_str() {
        "outdoor" => Ok(Category::Outdoor),
        "treadmill" => Ok(Category::Treadmill),
        _ => bail!("Invalid category '{category}'. Must be one of: outdoor, treadmill"),
    }
}

pub fn validate_duration(duration_seconds: i64) -> Result<()> {
    if duration_seconds < 0 {
        bail!("duration_seconds must not be negative");
    }
    Ok(())
}

pub fn validate_weight(weight_lbs: f64) -> Result<()> {
    if !weight_lbs.is_finite() || weight_lbs <= 0.0 {
        bail!("Weight must be a positive number");
    }
    Ok(())
}

pub fn validate_step_count(step_count: i64) -> Result<()> {
    if step_count <= 0 {
        bail!("Step count must be a positive number");
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
    if !valid || email.chars().any(char::is_whitespace) {
        bail!("Invalid email address");
    }
    Ok(email)
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        bail!("Password must be at least {MIN_PASSWORD_LEN} characters");
    }
    Ok(())
}

pub fn validate_handle(handle: &str) -> Result<String> {
    let handle = handle.trim().to_lowercase();
    if handle.len() < 3 {
        bail!("Handle must be at least 3 characters");
    }
    if handle.len() > 20 {
        bail!("Handle must be 20 characters or less");
    }
    if !handle
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        bail!("Handle can only contain letters, numbers, and underscores");
    }
    Ok(handle)
}

pub fn validate_circle_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.chars().count() < 2 {
        bail!("Circle name must be at least 2 characters");
    }
    if name.chars().count() > 50 {
        bail!("Circle name must be 50 characters or less");
    }
    Ok(name.to_string())
}

pub fn normalize_invite_code(code: &str) -> Result<String> {
    let code = code.trim().to_uppercase();
    if code.is_empty() {
        bail!("Invite code is required");
    }
    Ok(code)
}

/// Week ids look like `2026-W07`.
pub fn validate_week_id(week_id: &str) -> Result<()> {
    let bytes = week_id.as_bytes();
    let shaped = bytes.len() == 8
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5] == b'W'
        && bytes[6..].iter().all(u8::is_ascii_digit);
    if !shaped {
        bail!("Invalid week id '{week_id}'. Use YYYY-Www");
    }
    let week: u32 = week_id[6..].parse()?;
    if week > 53 {
        bail!("Invalid week id '{week_id}'. Week must be between 00 and 53");
    }
    Ok(())
}

pub fn validate_goals(update: &GoalsUpdate) -> Result<()> {
    for (field, value) in [
        ("yearly_km_goal", update.yearly_km_goal),
        ("monthly_km_goal", update.monthly_km_goal),
        ("start_weight_lbs", update.start_weight_lbs),
        ("goal_weight_lbs", update.goal_weight_lbs),
    ] {
        if let Some(v) = value {
            if !v.is_finite() || v <= 0.0 {
                bail!("{field} must be greater than 0");
            }
        }
    }
    Ok(())
}

/// Parse a client-supplied timestamp for backdating.
///
/// Accepts RFC 3339 (converted to local time), naive ISO date-times and plain
/// `YYYY-MM-DD` dates (midnight). Sub-second precision is dropped.
pub fn parse_timestamp(input: &str) -> Result<NaiveDateTime> {
    let s = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        let local = dt.with_timezone(&Local).naive_local();
        return Ok(local.with_nanosecond(0).unwrap_or(local));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt.with_nanosecond(0).unwrap_or(dt));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    bail!("Invalid timestamp '{input}'. Use YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS")
}
