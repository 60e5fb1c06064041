use std::path::Path;

use anyhow::{Result, bail};
use chrono::{Datelike, NaiveDateTime};
use rand::Rng;
use serde::Serialize;

use crate::achievements::{self, AchievementReport, AchievementStats};
use crate::auth::{self, verify_password};
use crate::db::Database;
use crate::goals::{self, GoalsProgress, month_start};
use crate::models::{
    CIRCLE_CAPACITY, Circle, CircleSummary, GoalsUpdate, JoinOutcome, NewRun, NewStepEntry,
    NewWeightEntry, Run, RunFilter, RunUpdate, Scope, StepEntry, User, UserGoals, UserStats,
    WeeklyPlan, WeightEntry, tracking_epoch, validate_email, validate_password,
};
use crate::pace::{format_duration, pace, round_to};
use crate::records::{self, PersonalRecords, PrCheck};
use crate::review::{self, MonthReview};
use crate::steps::{self, StepsSummary};
use crate::streak::{self, StreakProgress, calculate_streaks};
use crate::summary::{self, Motivation, StatsSummary};
use crate::weight::{self, ChartPoint, WeightProgress};

pub const MAX_PAGE_SIZE: i64 = 100;
const INVITE_CODE_LEN: usize = 8;
const INVITE_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const INVITE_CODE_ATTEMPTS: usize = 16;

/// A run as presented to clients, with display fields derived.
#[derive(Debug, Clone, Serialize)]
pub struct RunView {
    pub id: i64,
    pub run_type: String,
    pub duration_seconds: i64,
    pub distance_km: f64,
    pub completed_at: NaiveDateTime,
    pub notes: Option<String>,
    pub category: String,
    pub pace_per_km: String,
    pub formatted_duration: String,
}

impl From<&Run> for RunView {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id,
            run_type: run.run_type.clone(),
            duration_seconds: run.duration_seconds,
            distance_km: run.distance_km,
            completed_at: run.completed_at,
            notes: run.notes.clone(),
            category: run.category.clone(),
            pace_per_km: pace(run.duration_seconds, run.distance_km),
            formatted_duration: format_duration(run.duration_seconds),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggedRun {
    pub run: Run,
    pub personal_best: Option<PrCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub name: String,
    pub handle: Option<String>,
    pub total_runs: usize,
    pub total_km: f64,
    pub monthly_km: f64,
    pub monthly_runs: usize,
    pub is_you: bool,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircleDetail {
    pub id: i64,
    pub name: String,
    pub invite_code: String,
    pub member_count: usize,
    pub members: Vec<LeaderboardEntry>,
    pub created_by: i64,
    pub is_creator: bool,
}

#[derive(Debug, Clone)]
pub enum CircleAccess {
    Granted(CircleDetail),
    NotFound,
    NotMember,
}

/// Facade over the database and the derived-statistics modules.
///
/// String inputs are expected to be validated with the `models::validate_*`
/// helpers before reaching these methods. Misses and conflicts are reported
/// through `Option`, `bool` or an outcome enum; `Err` means an internal
/// failure.
pub struct TrackerService {
    db: Database,
    password_cost: u32,
}

impl TrackerService {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            db: Database::open(path)?,
            password_cost: bcrypt::DEFAULT_COST,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::open_in_memory()?,
            password_cost: bcrypt::DEFAULT_COST,
        })
    }

    #[must_use]
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    #[must_use]
    pub fn password_cost(&self) -> u32 {
        self.password_cost
    }

    // --- Users & auth ---

    /// Validate, hash and store a new account. `None` when the email is
    /// already registered.
    pub fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<Option<User>> {
        let email = validate_email(email)?;
        validate_password(password)?;
        let hash = auth::hash_password(password, self.password_cost)?;
        self.register_hashed(&email, &hash, name, now)
    }

    /// Store an account whose password was already hashed.
    pub fn register_hashed(
        &self,
        email: &str,
        password_hash: &str,
        name: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<Option<User>> {
        if self.db.get_user_by_email(email)?.is_some() {
            return Ok(None);
        }
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let user = self.db.insert_user(email, password_hash, name, now)?;
        tracing::info!(user_id = user.id, "user registered");
        Ok(Some(user))
    }

    pub fn login(&self, email: &str, password: &str) -> Result<Option<User>> {
        let email = email.trim().to_lowercase();
        Ok(self
            .db
            .get_user_by_email(&email)?
            .filter(|u| u.is_active && verify_password(password, &u.password_hash)))
    }

    pub fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.db.get_user_by_email(&email.trim().to_lowercase())
    }

    pub fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        self.db.get_user(id)
    }

    pub fn complete_onboarding(&self, user_id: i64) -> Result<bool> {
        self.db.set_onboarding_complete(user_id)
    }

    /// Claim `handle` for `user_id`. `false` when another user holds it.
    pub fn set_handle(&self, user_id: i64, handle: &str) -> Result<bool> {
        if self.db.handle_taken(handle, Some(user_id))? {
            return Ok(false);
        }
        self.db.set_handle(user_id, handle)
    }

    pub fn handle_available(&self, handle: &str) -> Result<bool> {
        Ok(!self.db.handle_taken(handle, None)?)
    }

    /// Stored goals, or the defaults when none were saved.
    pub fn goals(&self, user_id: i64) -> Result<UserGoals> {
        Ok(self.db.get_goals(user_id)?.unwrap_or_default())
    }

    pub fn set_goals(
        &self,
        user_id: i64,
        update: &GoalsUpdate,
        now: NaiveDateTime,
    ) -> Result<UserGoals> {
        crate::models::validate_goals(update)?;
        self.db.upsert_goals(user_id, update, now)
    }

    fn goals_for(&self, scope: Scope) -> Result<UserGoals> {
        match scope {
            Scope::User(id) => self.goals(id),
            Scope::Anonymous => Ok(UserGoals::default()),
        }
    }

    // --- Runs ---

    pub fn log_run(&self, scope: Scope, new: &NewRun) -> Result<LoggedRun> {
        let (run, _) = self.db.insert_run_and_bump(scope, new)?;

        let previous = self
            .db
            .other_runs_of_type(scope, &run.run_type, run.id, tracking_epoch())?;
        let personal_best = records::check_new_pr(&run, &previous);

        tracing::info!(
            run_id = run.id,
            user_id = ?scope.user_id(),
            run_type = %run.run_type,
            "run logged"
        );
        if let Some(pr) = &personal_best {
            tracing::info!(run_id = run.id, is_first = pr.is_first, "personal best");
        }
        Ok(LoggedRun { run, personal_best })
    }

    pub fn list_runs(&self, scope: Scope, filter: &RunFilter) -> Result<Vec<Run>> {
        let filter = RunFilter {
            skip: filter.skip.max(0),
            limit: filter.limit.clamp(0, MAX_PAGE_SIZE),
            run_type: filter.run_type.clone(),
        };
        self.db.list_runs(scope, &filter)
    }

    pub fn get_run(&self, scope: Scope, id: i64) -> Result<Option<Run>> {
        self.db.get_run(scope, id)
    }

    pub fn update_run(&self, scope: Scope, id: i64, update: &RunUpdate) -> Result<Option<Run>> {
        self.db.update_run(scope, id, update)
    }

    pub fn delete_run(&self, scope: Scope, id: i64) -> Result<bool> {
        let deleted = self.db.delete_run(scope, id)?;
        if deleted {
            tracing::info!(run_id = id, user_id = ?scope.user_id(), "run deleted");
        }
        Ok(deleted)
    }

    fn tracked_runs(&self, scope: Scope) -> Result<Vec<Run>> {
        self.db.runs_since(scope, tracking_epoch())
    }

    // --- Weekly plans ---

    pub fn save_plan(
        &self,
        scope: Scope,
        week_id: &str,
        planned_runs: &[String],
        now: NaiveDateTime,
    ) -> Result<WeeklyPlan> {
        self.db.upsert_plan(scope, week_id, planned_runs, now)
    }

    pub fn plan(&self, scope: Scope, week_id: &str) -> Result<Option<WeeklyPlan>> {
        self.db.get_plan(scope, week_id)
    }

    #[must_use]
    pub fn current_week_id(now: NaiveDateTime) -> String {
        streak::current_week_id(now)
    }

    // --- Stats ---

    /// Recompute totals from raw runs and refresh the cached counters.
    pub fn stats_summary(&self, scope: Scope, now: NaiveDateTime) -> Result<StatsSummary> {
        let runs = self.tracked_runs(scope)?;
        let summary = summary::stats_summary(&runs, now);
        self.db.store_stats(
            scope,
            &UserStats {
                total_runs: i64::try_from(summary.total_runs)?,
                total_km: summary.total_km,
            },
        )?;
        Ok(summary)
    }

    pub fn motivation(&self, scope: Scope, rng: &mut impl Rng) -> Result<Motivation> {
        let cached = self.db.get_stats(scope)?;
        Ok(summary::motivation(&cached, rng))
    }

    pub fn streak_progress(&self, scope: Scope, now: NaiveDateTime) -> Result<StreakProgress> {
        Ok(streak::streak_progress(&self.tracked_runs(scope)?, now))
    }

    pub fn personal_records(&self, scope: Scope) -> Result<PersonalRecords> {
        Ok(records::personal_records(&self.tracked_runs(scope)?))
    }

    pub fn goals_progress(&self, scope: Scope, now: NaiveDateTime) -> Result<GoalsProgress> {
        let goals = self.goals_for(scope)?;
        let runs = self.tracked_runs(scope)?;
        Ok(goals::goals_progress(
            &runs,
            goals.yearly_km_goal,
            goals.monthly_km_goal,
            now,
        ))
    }

    pub fn achievements(&self, scope: Scope, now: NaiveDateTime) -> Result<AchievementReport> {
        let goals = self.goals_for(scope)?;
        let runs = self.tracked_runs(scope)?;
        let steps = self.db.steps_since(scope, tracking_epoch())?;
        let longest = calculate_streaks(&runs, now).longest;
        let months_hit = goals::monthly_goals_hit(&runs, goals.monthly_km_goal, now);
        let stats = AchievementStats::collect(&runs, &steps, longest, months_hit);
        Ok(achievements::evaluate(&stats))
    }

    /// Review for an explicit month, or for the month the calendar gate
    /// selects. `None` when no month applies today.
    pub fn month_review(
        &self,
        scope: Scope,
        month: Option<(i32, u32)>,
        now: NaiveDateTime,
    ) -> Result<Option<MonthReview>> {
        let Some((year, month)) = month.or_else(|| review::review_target(now.date())) else {
            return Ok(None);
        };
        let goals = self.goals_for(scope)?;
        let epoch = tracking_epoch();
        let runs = self.db.runs_since(scope, epoch)?;
        let steps = self.db.steps_since(scope, epoch)?;
        let weights = self.db.weights_since(scope, epoch)?;
        Ok(Some(review::month_review(
            &runs,
            &steps,
            &weights,
            goals.monthly_km_goal,
            year,
            month,
        )))
    }

    // --- Weight ---

    pub fn log_weight(&self, scope: Scope, entry: &NewWeightEntry) -> Result<WeightEntry> {
        let stored = self.db.insert_weight(scope, entry)?;
        tracing::info!(weight_id = stored.id, user_id = ?scope.user_id(), "weight logged");
        Ok(stored)
    }

    pub fn list_weights(&self, scope: Scope, limit: i64) -> Result<Vec<WeightEntry>> {
        self.db.list_weights(scope, limit.clamp(0, MAX_PAGE_SIZE))
    }

    pub fn delete_weight(&self, scope: Scope, id: i64) -> Result<bool> {
        self.db.delete_weight(scope, id)
    }

    pub fn weight_progress(&self, scope: Scope, now: NaiveDateTime) -> Result<WeightProgress> {
        let goals = self.goals_for(scope)?;
        let entries = self.db.weights_since(scope, tracking_epoch())?;
        Ok(weight::weight_progress(&entries, &goals, now))
    }

    pub fn weight_chart(&self, scope: Scope) -> Result<Vec<ChartPoint>> {
        let entries = self.db.weights_since(scope, tracking_epoch())?;
        Ok(weight::weight_chart(&entries))
    }

    // --- Steps ---

    pub fn log_steps(&self, scope: Scope, entry: &NewStepEntry) -> Result<StepEntry> {
        let stored = self.db.insert_steps(scope, entry)?;
        tracing::info!(step_entry_id = stored.id, user_id = ?scope.user_id(), "steps logged");
        Ok(stored)
    }

    pub fn list_steps(&self, scope: Scope, limit: i64) -> Result<Vec<StepEntry>> {
        self.db.list_steps(scope, limit.clamp(0, MAX_PAGE_SIZE))
    }

    pub fn delete_steps(&self, scope: Scope, id: i64) -> Result<bool> {
        self.db.delete_steps(scope, id)
    }

    pub fn steps_summary(&self, scope: Scope, now: NaiveDateTime) -> Result<StepsSummary> {
        let entries = self.db.steps_since(scope, tracking_epoch())?;
        Ok(steps::steps_summary(&entries, now))
    }

    // --- Circles ---

    fn unused_invite_code(&self) -> Result<String> {
        let mut rng = rand::rng();
        for _ in 0..INVITE_CODE_ATTEMPTS {
            let code = generate_invite_code(&mut rng);
            if !self.db.invite_code_exists(&code)? {
                return Ok(code);
            }
        }
        bail!("Could not generate a unique invite code")
    }

    pub fn create_circle(&self, user_id: i64, name: &str, now: NaiveDateTime) -> Result<Circle> {
        let code = self.unused_invite_code()?;
        let circle = self.db.create_circle(name, &code, user_id, now)?;
        tracing::info!(circle_id = circle.id, user_id, "circle created");
        Ok(circle)
    }

    pub fn my_circles(&self, user_id: i64) -> Result<Vec<CircleSummary>> {
        self.db.circles_for_user(user_id)
    }

    pub fn join_circle(
        &self,
        user_id: i64,
        invite_code: &str,
        now: NaiveDateTime,
    ) -> Result<JoinOutcome> {
        let outcome = self
            .db
            .join_circle(invite_code, user_id, CIRCLE_CAPACITY, now)?;
        if let JoinOutcome::Joined(circle) = &outcome {
            tracing::info!(circle_id = circle.id, user_id, "circle joined");
        }
        Ok(outcome)
    }

    pub fn leave_circle(&self, user_id: i64, circle_id: i64) -> Result<bool> {
        let left = self.db.leave_circle(circle_id, user_id)?;
        if left {
            tracing::info!(circle_id, user_id, "circle left");
        }
        Ok(left)
    }

    /// Circle with its members ranked by distance run this month.
    pub fn circle_detail(
        &self,
        user_id: i64,
        circle_id: i64,
        now: NaiveDateTime,
    ) -> Result<CircleAccess> {
        let Some(circle) = self.db.get_circle(circle_id)? else {
            return Ok(CircleAccess::NotFound);
        };
        if !self.db.is_member(circle_id, user_id)? {
            return Ok(CircleAccess::NotMember);
        }

        let this_month = month_start(now.year(), now.month()).max(tracking_epoch());
        let mut members = Vec::new();
        for member in self.db.circle_members(circle_id)? {
            let runs = self.tracked_runs(Scope::User(member.id))?;
            let monthly: Vec<&Run> = runs.iter().filter(|r| r.completed_at >= this_month).collect();
            members.push(LeaderboardEntry {
                user_id: member.id,
                name: member.name.clone().unwrap_or_else(|| "Runner".to_string()),
                handle: member.handle.clone(),
                total_runs: runs.len(),
                total_km: round_to(runs.iter().map(|r| r.distance_km).sum(), 1),
                monthly_km: round_to(monthly.iter().map(|r| r.distance_km).sum(), 1),
                monthly_runs: monthly.len(),
                is_you: member.id == user_id,
                rank: 0,
            });
        }
        members.sort_by(|a, b| b.monthly_km.total_cmp(&a.monthly_km));
        for (i, member) in members.iter_mut().enumerate() {
            member.rank = i + 1;
        }

        Ok(CircleAccess::Granted(CircleDetail {
            id: circle.id,
            name: circle.name,
            invite_code: circle.invite_code,
            member_count: members.len(),
            members,
            created_by: circle.created_by,
            is_creator: circle.created_by == user_id,
        }))
    }
}

fn generate_invite_code(rng: &mut impl Rng) -> String {
    (0..INVITE_CODE_LEN)
        .map(|_| char::from(INVITE_CODE_ALPHABET[rng.random_range(0..INVITE_CODE_ALPHABET.len())]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, RunType};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn service() -> TrackerService {
        TrackerService::open_in_memory().unwrap().with_password_cost(4)
    }

    fn new_run(run_type: RunType, duration_seconds: i64, when: &str) -> NewRun {
        NewRun {
            run_type,
            duration_seconds,
            notes: None,
            category: Category::Outdoor,
            completed_at: at(when),
        }
    }

    fn signup(svc: &TrackerService, email: &str) -> i64 {
        svc.register(email, "secret1", Some("Runner"), at("2026-01-01 08:00"))
            .unwrap()
            .unwrap()
            .id
    }

    #[test]
    fn test_register_and_login() {
        let svc = service();
        let user = svc
            .register("  Ada@Example.com ", "secret1", Some("Ada"), at("2026-01-01 08:00"))
            .unwrap()
            .unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert_ne!(user.password_hash, "secret1");

        assert!(svc
            .register("ada@example.com", "another1", None, at("2026-01-02 08:00"))
            .unwrap()
            .is_none());
        assert!(svc.register("no-at-sign", "secret1", None, at("2026-01-02 08:00")).is_err());
        assert!(svc.register("bob@example.com", "short", None, at("2026-01-02 08:00")).is_err());

        assert_eq!(svc.login("ADA@example.com", "secret1").unwrap().unwrap().id, user.id);
        assert!(svc.login("ada@example.com", "wrong-pw").unwrap().is_none());
        assert!(svc.login("nobody@example.com", "secret1").unwrap().is_none());
    }

    #[test]
    fn test_log_run_scenario() {
        let svc = service();
        let logged = svc
            .log_run(Scope::Anonymous, &new_run(RunType::FiveK, 1500, "2026-02-01 07:00"))
            .unwrap();
        let view = RunView::from(&logged.run);
        assert_eq!(view.distance_km, 5.0);
        assert_eq!(view.pace_per_km, "5:00");
        assert_eq!(view.formatted_duration, "25:00");
        assert!(logged.personal_best.unwrap().is_first);
    }

    #[test]
    fn test_pr_detection_across_runs() {
        let svc = service();
        let scope = Scope::Anonymous;
        let first = svc.log_run(scope, &new_run(RunType::TenK, 3000, "2026-02-01 07:00")).unwrap();
        assert!(first.personal_best.unwrap().is_first);

        let slower = svc.log_run(scope, &new_run(RunType::TenK, 3100, "2026-02-03 07:00")).unwrap();
        assert!(slower.personal_best.is_none());

        let tie = svc.log_run(scope, &new_run(RunType::TenK, 3000, "2026-02-05 07:00")).unwrap();
        assert!(tie.personal_best.is_none());

        let faster = svc.log_run(scope, &new_run(RunType::TenK, 2925, "2026-02-07 07:00")).unwrap();
        let pr = faster.personal_best.unwrap();
        assert!(!pr.is_first);
        assert_eq!(pr.improvement_seconds, Some(75));
    }

    #[test]
    fn test_pr_is_per_user() {
        let svc = service();
        let alice = signup(&svc, "alice@example.com");
        let bob = signup(&svc, "bob@example.com");
        svc.log_run(Scope::User(alice), &new_run(RunType::FiveK, 1200, "2026-02-01 07:00"))
            .unwrap();
        let bobs = svc
            .log_run(Scope::User(bob), &new_run(RunType::FiveK, 1800, "2026-02-02 07:00"))
            .unwrap();
        assert!(bobs.personal_best.unwrap().is_first);
    }

    #[test]
    fn test_zero_runs_stats_summary() {
        let svc = service();
        let summary = svc.stats_summary(Scope::Anonymous, at("2026-03-01 12:00")).unwrap();
        assert_eq!(summary.total_runs, 0);
        assert_eq!(summary.total_km, 0.0);
        assert_eq!(summary.current_streak, 0);
        assert_eq!(summary.longest_streak, 0);
        assert_eq!(summary.average_pace, "0:00");
    }

    #[test]
    fn test_motivation_reads_cached_counter() {
        let svc = service();
        svc.log_run(Scope::Anonymous, &new_run(RunType::FiveK, 1500, "2026-02-01 07:00"))
            .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let m = svc.motivation(Scope::Anonymous, &mut rng).unwrap();
        assert_eq!(m.achievement, Some("First Steps"));
    }

    #[test]
    fn test_list_runs_clamps_page_size() {
        let svc = service();
        for day in 1..=3 {
            svc.log_run(
                Scope::Anonymous,
                &new_run(RunType::ThreeK, 900, &format!("2026-02-0{day} 07:00")),
            )
            .unwrap();
        }
        let runs = svc
            .list_runs(
                Scope::Anonymous,
                &RunFilter {
                    skip: -5,
                    limit: 5_000,
                    run_type: None,
                },
            )
            .unwrap();
        assert_eq!(runs.len(), 3);
    }

    #[test]
    fn test_goals_defaults_and_partial_update() {
        let svc = service();
        let alice = signup(&svc, "alice@example.com");
        let defaults = svc.goals(alice).unwrap();
        assert_eq!(defaults.yearly_km_goal, 1000.0);
        assert_eq!(defaults.monthly_km_goal, 100.0);

        let updated = svc
            .set_goals(
                alice,
                &GoalsUpdate {
                    monthly_km_goal: Some(50.0),
                    ..GoalsUpdate::default()
                },
                at("2026-01-02 08:00"),
            )
            .unwrap();
        assert_eq!(updated.monthly_km_goal, 50.0);
        assert_eq!(updated.yearly_km_goal, 1000.0);

        assert!(svc
            .set_goals(
                alice,
                &GoalsUpdate {
                    yearly_km_goal: Some(0.0),
                    ..GoalsUpdate::default()
                },
                at("2026-01-02 08:00"),
            )
            .is_err());
    }

    #[test]
    fn test_achievements_use_user_monthly_goal() {
        let svc = service();
        let alice = signup(&svc, "alice@example.com");
        svc.set_goals(
            alice,
            &GoalsUpdate {
                monthly_km_goal: Some(10.0),
                ..GoalsUpdate::default()
            },
            at("2026-01-02 08:00"),
        )
        .unwrap();
        svc.log_run(Scope::User(alice), &new_run(RunType::TenK, 3000, "2026-01-10 07:00"))
            .unwrap();
        let report = svc.achievements(Scope::User(alice), at("2026-01-20 12:00")).unwrap();
        let unlocked: Vec<&str> = report.unlocked.iter().map(|a| a.id).collect();
        assert!(unlocked.contains(&"first_run"));
        assert!(unlocked.contains(&"first_10k"));
        assert!(unlocked.contains(&"monthly_goal_1"));
    }

    #[test]
    fn test_month_review_gating() {
        let svc = service();
        let mid_month = at("2026-03-15 12:00");
        assert!(svc.month_review(Scope::Anonymous, None, mid_month).unwrap().is_none());

        let explicit = svc
            .month_review(Scope::Anonymous, Some((2026, 3)), mid_month)
            .unwrap()
            .unwrap();
        assert_eq!(explicit.month, 3);

        let early = svc
            .month_review(Scope::Anonymous, None, at("2026-04-03 12:00"))
            .unwrap()
            .unwrap();
        assert_eq!((early.year, early.month), (2026, 3));
    }

    #[test]
    fn test_handles() {
        let svc = service();
        let alice = signup(&svc, "alice@example.com");
        let bob = signup(&svc, "bob@example.com");
        assert!(svc.handle_available("roadrunner").unwrap());
        assert!(svc.set_handle(alice, "roadrunner").unwrap());
        assert!(!svc.handle_available("roadrunner").unwrap());
        assert!(svc.set_handle(alice, "roadrunner").unwrap());
        assert!(!svc.set_handle(bob, "roadrunner").unwrap());
    }

    #[test]
    fn test_invite_code_shape() {
        let mut rng = StdRng::seed_from_u64(42);
        let code = generate_invite_code(&mut rng);
        assert_eq!(code.len(), INVITE_CODE_LEN);
        assert!(code.bytes().all(|b| INVITE_CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_circle_leaderboard() {
        let svc = service();
        let now = at("2026-03-20 12:00");
        let alice = signup(&svc, "alice@example.com");
        let bob = signup(&svc, "bob@example.com");
        let outsider = signup(&svc, "eve@example.com");

        let circle = svc.create_circle(alice, "Dawn Patrol", now).unwrap();
        assert!(matches!(
            svc.join_circle(bob, &circle.invite_code, now).unwrap(),
            JoinOutcome::Joined(_)
        ));

        svc.log_run(Scope::User(alice), &new_run(RunType::FiveK, 1500, "2026-03-02 07:00"))
            .unwrap();
        svc.log_run(Scope::User(bob), &new_run(RunType::TwentyOneK, 7200, "2026-03-03 07:00"))
            .unwrap();
        svc.log_run(Scope::User(alice), &new_run(RunType::TenK, 3000, "2026-02-10 07:00"))
            .unwrap();

        let CircleAccess::Granted(detail) = svc.circle_detail(alice, circle.id, now).unwrap() else {
            panic!("member should see the circle");
        };
        assert_eq!(detail.member_count, 2);
        assert_eq!(detail.members[0].user_id, bob);
        assert_eq!(detail.members[0].rank, 1);
        assert_eq!(detail.members[0].monthly_km, 21.0);
        assert_eq!(detail.members[1].total_km, 15.0);
        assert!(detail.members[1].is_you);
        assert!(detail.is_creator);

        assert!(matches!(
            svc.circle_detail(outsider, circle.id, now).unwrap(),
            CircleAccess::NotMember
        ));
        assert!(matches!(
            svc.circle_detail(alice, 999, now).unwrap(),
            CircleAccess::NotFound
        ));

        assert!(svc.leave_circle(bob, circle.id).unwrap());
        assert!(!svc.leave_circle(bob, circle.id).unwrap());
    }
}
