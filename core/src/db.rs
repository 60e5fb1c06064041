use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::models::{
    Circle, CircleSummary, GoalsUpdate, JoinOutcome, NewRun, NewStepEntry, NewWeightEntry, Run,
    RunFilter, RunUpdate, Scope, StepEntry, User, UserGoals, UserStats, WeeklyPlan, WeightEntry,
};

/// Timestamps are stored as local naive text so lexical order is
/// chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

const USER_COLUMNS: &str =
    "id, email, password_hash, name, handle, is_active, onboarding_complete, created_at";
const RUN_COLUMNS: &str =
    "id, user_id, run_type, duration_seconds, distance_km, completed_at, notes, category";

pub struct Database {
    conn: Connection,
}

fn ts(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn ts_at(row: &Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn date_at(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, DATE_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn insert_run_row(conn: &Connection, scope: Scope, run: &NewRun) -> Result<i64> {
    conn.execute(
        "INSERT INTO runs
            (user_id, run_type, duration_seconds, distance_km, completed_at, notes, category)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            scope.user_id(),
            run.run_type.label(),
            run.duration_seconds,
            run.run_type.distance_km(),
            ts(run.completed_at),
            run.notes,
            run.category.as_str(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn read_stats(conn: &Connection, scope: Scope) -> Result<UserStats> {
    let stats = conn
        .query_row(
            "SELECT total_runs, total_km FROM user_stats WHERE user_id IS ?1",
            params![scope.user_id()],
            |row| {
                Ok(UserStats {
                    total_runs: row.get(0)?,
                    total_km: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(stats.unwrap_or_default())
}

/// Update-else-insert; callers own the transaction.
fn write_stats(conn: &Connection, scope: Scope, stats: &UserStats) -> Result<()> {
    let updated = conn.execute(
        "UPDATE user_stats SET total_runs = ?1, total_km = ?2 WHERE user_id IS ?3",
        params![stats.total_runs, stats.total_km, scope.user_id()],
    )?;
    if updated == 0 {
        conn.execute(
            "INSERT INTO user_stats (user_id, total_runs, total_km) VALUES (?1, ?2, ?3)",
            params![scope.user_id(), stats.total_runs, stats.total_km],
        )?;
    }
    Ok(())
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE,
                    password_hash TEXT NOT NULL,
                    name TEXT,
                    handle TEXT UNIQUE,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    onboarding_complete INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
                    run_type TEXT NOT NULL,
                    duration_seconds INTEGER NOT NULL,
                    distance_km REAL NOT NULL,
                    completed_at TEXT NOT NULL,
                    notes TEXT,
                    category TEXT NOT NULL DEFAULT 'outdoor'
                );

                CREATE TABLE IF NOT EXISTS weekly_plans (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
                    week_id TEXT NOT NULL,
                    planned_runs TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS user_stats (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
                    total_runs INTEGER NOT NULL DEFAULT 0,
                    total_km REAL NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS user_goals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                    start_weight_lbs REAL,
                    goal_weight_lbs REAL,
                    weight_goal_date TEXT,
                    yearly_km_goal REAL NOT NULL DEFAULT 1000,
                    monthly_km_goal REAL NOT NULL DEFAULT 100,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS weights (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
                    weight_lbs REAL NOT NULL,
                    recorded_at TEXT NOT NULL,
                    notes TEXT
                );

                CREATE TABLE IF NOT EXISTS step_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
                    step_count INTEGER NOT NULL CHECK (step_count > 0),
                    recorded_date TEXT NOT NULL,
                    notes TEXT
                );

                CREATE TABLE IF NOT EXISTS circles (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    invite_code TEXT NOT NULL UNIQUE,
                    created_by INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS circle_memberships (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    circle_id INTEGER NOT NULL REFERENCES circles(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    joined_at TEXT NOT NULL,
                    UNIQUE (circle_id, user_id)
                );

                CREATE INDEX IF NOT EXISTS idx_runs_user ON runs(user_id, completed_at);
                CREATE INDEX IF NOT EXISTS idx_weights_user ON weights(user_id, recorded_at);
                CREATE INDEX IF NOT EXISTS idx_steps_user ON step_entries(user_id, recorded_date);
                CREATE INDEX IF NOT EXISTS idx_memberships_user ON circle_memberships(user_id);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_plans_owner_week
                    ON weekly_plans(COALESCE(user_id, 0), week_id);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_stats_owner
                    ON user_stats(COALESCE(user_id, 0));

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            name: row.get(3)?,
            handle: row.get(4)?,
            is_active: row.get(5)?,
            onboarding_complete: row.get(6)?,
            created_at: ts_at(row, 7)?,
        })
    }

    fn run_from_row(row: &Row) -> rusqlite::Result<Run> {
        Ok(Run {
            id: row.get(0)?,
            user_id: row.get(1)?,
            run_type: row.get(2)?,
            duration_seconds: row.get(3)?,
            distance_km: row.get(4)?,
            completed_at: ts_at(row, 5)?,
            notes: row.get(6)?,
            category: row.get(7)?,
        })
    }

    fn weight_from_row(row: &Row) -> rusqlite::Result<WeightEntry> {
        Ok(WeightEntry {
            id: row.get(0)?,
            weight_lbs: row.get(1)?,
            recorded_at: ts_at(row, 2)?,
            notes: row.get(3)?,
        })
    }

    fn step_from_row(row: &Row) -> rusqlite::Result<StepEntry> {
        Ok(StepEntry {
            id: row.get(0)?,
            step_count: row.get(1)?,
            recorded_date: ts_at(row, 2)?,
            notes: row.get(3)?,
        })
    }

    fn circle_from_row(row: &Row) -> rusqlite::Result<Circle> {
        Ok(Circle {
            id: row.get(0)?,
            name: row.get(1)?,
            invite_code: row.get(2)?,
            created_by: row.get(3)?,
            created_at: ts_at(row, 4)?,
        })
    }

    fn plan_from_row(row: &Row) -> rusqlite::Result<WeeklyPlan> {
        let raw: String = row.get(2)?;
        let planned_runs = serde_json::from_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
        Ok(WeeklyPlan {
            id: row.get(0)?,
            week_id: row.get(1)?,
            planned_runs,
            created_at: ts_at(row, 3)?,
        })
    }

    // --- Users ---

    pub fn insert_user(
        &self,
        email: &str,
        password_hash: &str,
        name: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<User> {
        self.conn.execute(
            "INSERT INTO users (email, password_hash, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![email, password_hash, name, ts(now)],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_onboarding_complete(&self, user_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE users SET onboarding_complete = 1 WHERE id = ?1",
            params![user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn set_handle(&self, user_id: i64, handle: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE users SET handle = ?1 WHERE id = ?2",
            params![handle, user_id],
        )?;
        Ok(rows > 0)
    }

    /// Whether `handle` belongs to anyone other than `except`.
    pub fn handle_taken(&self, handle: &str, except: Option<i64>) -> Result<bool> {
        let taken: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE handle = ?1 AND id IS NOT ?2)",
            params![handle, except],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    // --- Goals ---

    pub fn get_goals(&self, user_id: i64) -> Result<Option<UserGoals>> {
        let goals = self
            .conn
            .query_row(
                "SELECT start_weight_lbs, goal_weight_lbs, weight_goal_date,
                        yearly_km_goal, monthly_km_goal
                 FROM user_goals WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserGoals {
                        start_weight_lbs: row.get(0)?,
                        goal_weight_lbs: row.get(1)?,
                        weight_goal_date: date_at(row, 2)?,
                        yearly_km_goal: row.get(3)?,
                        monthly_km_goal: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(goals)
    }

    /// Merge `update` into the stored goals, creating the row on first use.
    pub fn upsert_goals(
        &self,
        user_id: i64,
        update: &GoalsUpdate,
        now: NaiveDateTime,
    ) -> Result<UserGoals> {
        let tx = self.conn.unchecked_transaction()?;
        let current = self.get_goals(user_id)?.unwrap_or_default();
        let merged = UserGoals {
            start_weight_lbs: update.start_weight_lbs.or(current.start_weight_lbs),
            goal_weight_lbs: update.goal_weight_lbs.or(current.goal_weight_lbs),
            weight_goal_date: update.weight_goal_date.or(current.weight_goal_date),
            yearly_km_goal: update.yearly_km_goal.unwrap_or(current.yearly_km_goal),
            monthly_km_goal: update.monthly_km_goal.unwrap_or(current.monthly_km_goal),
        };
        tx.execute(
            "INSERT INTO user_goals
                (user_id, start_weight_lbs, goal_weight_lbs, weight_goal_date,
                 yearly_km_goal, monthly_km_goal, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id) DO UPDATE SET
                start_weight_lbs = excluded.start_weight_lbs,
                goal_weight_lbs = excluded.goal_weight_lbs,
                weight_goal_date = excluded.weight_goal_date,
                yearly_km_goal = excluded.yearly_km_goal,
                monthly_km_goal = excluded.monthly_km_goal,
                updated_at = excluded.updated_at",
            params![
                user_id,
                merged.start_weight_lbs,
                merged.goal_weight_lbs,
                merged
                    .weight_goal_date
                    .map(|d| d.format(DATE_FORMAT).to_string()),
                merged.yearly_km_goal,
                merged.monthly_km_goal,
                ts(now),
            ],
        )?;
        tx.commit()?;
        Ok(merged)
    }

    // --- Runs ---

    pub fn insert_run(&self, scope: Scope, run: &NewRun) -> Result<Run> {
        let id = insert_run_row(&self.conn, scope, run)?;
        self.get_run(scope, id)?.context("Run not found after insert")
    }

    /// Insert a run and count it in the cached counters as one write.
    pub fn insert_run_and_bump(&self, scope: Scope, run: &NewRun) -> Result<(Run, UserStats)> {
        let tx = self.conn.unchecked_transaction()?;
        let id = insert_run_row(&tx, scope, run)?;
        let mut stats = read_stats(&tx, scope)?;
        stats.total_runs += 1;
        stats.total_km += run.run_type.distance_km();
        write_stats(&tx, scope, &stats)?;
        let inserted = self.get_run(scope, id)?.context("Run not found after insert")?;
        tx.commit()?;
        Ok((inserted, stats))
    }

    pub fn get_run(&self, scope: Scope, id: i64) -> Result<Option<Run>> {
        let run = self
            .conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1 AND user_id IS ?2"),
                params![id, scope.user_id()],
                Self::run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    /// Newest first, optionally restricted to one run type.
    pub fn list_runs(&self, scope: Scope, filter: &RunFilter) -> Result<Vec<Run>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs
             WHERE user_id IS ?1 AND (?2 IS NULL OR run_type = ?2)
             ORDER BY completed_at DESC, id DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let runs = stmt
            .query_map(
                params![scope.user_id(), filter.run_type, filter.limit, filter.skip],
                Self::run_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Runs completed at or after `since`, oldest first.
    pub fn runs_since(&self, scope: Scope, since: NaiveDateTime) -> Result<Vec<Run>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs
             WHERE user_id IS ?1 AND completed_at >= ?2
             ORDER BY completed_at, id"
        ))?;
        let runs = stmt
            .query_map(params![scope.user_id(), ts(since)], Self::run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Other runs of `run_type` since `since`, excluding `exclude_id`.
    pub fn other_runs_of_type(
        &self,
        scope: Scope,
        run_type: &str,
        exclude_id: i64,
        since: NaiveDateTime,
    ) -> Result<Vec<Run>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs
             WHERE user_id IS ?1 AND run_type = ?2 AND id != ?3 AND completed_at >= ?4
             ORDER BY completed_at, id"
        ))?;
        let runs = stmt
            .query_map(
                params![scope.user_id(), run_type, exclude_id, ts(since)],
                Self::run_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Apply a partial update. Changing the run type re-derives the distance.
    pub fn update_run(&self, scope: Scope, id: i64, update: &RunUpdate) -> Result<Option<Run>> {
        let tx = self.conn.unchecked_transaction()?;
        if self.get_run(scope, id)?.is_none() {
            return Ok(None);
        }
        if let Some(run_type) = update.run_type {
            tx.execute(
                "UPDATE runs SET run_type = ?1, distance_km = ?2 WHERE id = ?3",
                params![run_type.label(), run_type.distance_km(), id],
            )?;
        }
        if let Some(duration) = update.duration_seconds {
            tx.execute(
                "UPDATE runs SET duration_seconds = ?1 WHERE id = ?2",
                params![duration, id],
            )?;
        }
        if let Some(notes) = &update.notes {
            tx.execute("UPDATE runs SET notes = ?1 WHERE id = ?2", params![notes, id])?;
        }
        if let Some(category) = update.category {
            tx.execute(
                "UPDATE runs SET category = ?1 WHERE id = ?2",
                params![category.as_str(), id],
            )?;
        }
        tx.commit()?;
        self.get_run(scope, id)
    }

    pub fn delete_run(&self, scope: Scope, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM runs WHERE id = ?1 AND user_id IS ?2",
            params![id, scope.user_id()],
        )?;
        Ok(rows > 0)
    }

    // --- Aggregate cache ---

    pub fn get_stats(&self, scope: Scope) -> Result<UserStats> {
        read_stats(&self.conn, scope)
    }

    /// Overwrite the cached counters for `scope`.
    pub fn store_stats(&self, scope: Scope, stats: &UserStats) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        write_stats(&tx, scope, stats)?;
        tx.commit()?;
        Ok(())
    }

    // --- Weekly plans ---

    pub fn upsert_plan(
        &self,
        scope: Scope,
        week_id: &str,
        planned_runs: &[String],
        now: NaiveDateTime,
    ) -> Result<WeeklyPlan> {
        let encoded = serde_json::to_string(planned_runs)?;
        let tx = self.conn.unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE weekly_plans SET planned_runs = ?1 WHERE week_id = ?2 AND user_id IS ?3",
            params![encoded, week_id, scope.user_id()],
        )?;
        if updated == 0 {
            tx.execute(
                "INSERT INTO weekly_plans (user_id, week_id, planned_runs, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![scope.user_id(), week_id, encoded, ts(now)],
            )?;
        }
        tx.commit()?;
        self.get_plan(scope, week_id)?
            .context("Weekly plan not found after upsert")
    }

    pub fn get_plan(&self, scope: Scope, week_id: &str) -> Result<Option<WeeklyPlan>> {
        let plan = self
            .conn
            .query_row(
                "SELECT id, week_id, planned_runs, created_at FROM weekly_plans
                 WHERE week_id = ?1 AND user_id IS ?2",
                params![week_id, scope.user_id()],
                Self::plan_from_row,
            )
            .optional()?;
        Ok(plan)
    }

    // --- Weight entries ---

    pub fn insert_weight(&self, scope: Scope, entry: &NewWeightEntry) -> Result<WeightEntry> {
        self.conn.execute(
            "INSERT INTO weights (user_id, weight_lbs, recorded_at, notes) VALUES (?1, ?2, ?3, ?4)",
            params![
                scope.user_id(),
                entry.weight_lbs,
                ts(entry.recorded_at),
                entry.notes
            ],
        )?;
        Ok(WeightEntry {
            id: self.conn.last_insert_rowid(),
            weight_lbs: entry.weight_lbs,
            recorded_at: entry.recorded_at,
            notes: entry.notes.clone(),
        })
    }

    /// Newest first.
    pub fn list_weights(&self, scope: Scope, limit: i64) -> Result<Vec<WeightEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, weight_lbs, recorded_at, notes FROM weights
             WHERE user_id IS ?1 ORDER BY recorded_at DESC, id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![scope.user_id(), limit], Self::weight_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Oldest first.
    pub fn weights_since(&self, scope: Scope, since: NaiveDateTime) -> Result<Vec<WeightEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, weight_lbs, recorded_at, notes FROM weights
             WHERE user_id IS ?1 AND recorded_at >= ?2 ORDER BY recorded_at, id",
        )?;
        let entries = stmt
            .query_map(params![scope.user_id(), ts(since)], Self::weight_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn delete_weight(&self, scope: Scope, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM weights WHERE id = ?1 AND user_id IS ?2",
            params![id, scope.user_id()],
        )?;
        Ok(rows > 0)
    }

    // --- Step entries ---

    pub fn insert_steps(&self, scope: Scope, entry: &NewStepEntry) -> Result<StepEntry> {
        self.conn.execute(
            "INSERT INTO step_entries (user_id, step_count, recorded_date, notes)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                scope.user_id(),
                entry.step_count,
                ts(entry.recorded_date),
                entry.notes
            ],
        )?;
        Ok(StepEntry {
            id: self.conn.last_insert_rowid(),
            step_count: entry.step_count,
            recorded_date: entry.recorded_date,
            notes: entry.notes.clone(),
        })
    }

    /// Newest first.
    pub fn list_steps(&self, scope: Scope, limit: i64) -> Result<Vec<StepEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, step_count, recorded_date, notes FROM step_entries
             WHERE user_id IS ?1 ORDER BY recorded_date DESC, id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![scope.user_id(), limit], Self::step_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Oldest first.
    pub fn steps_since(&self, scope: Scope, since: NaiveDateTime) -> Result<Vec<StepEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, step_count, recorded_date, notes FROM step_entries
             WHERE user_id IS ?1 AND recorded_date >= ?2 ORDER BY recorded_date, id",
        )?;
        let entries = stmt
            .query_map(params![scope.user_id(), ts(since)], Self::step_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn delete_steps(&self, scope: Scope, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM step_entries WHERE id = ?1 AND user_id IS ?2",
            params![id, scope.user_id()],
        )?;
        Ok(rows > 0)
    }

    // --- Circles ---

    pub fn invite_code_exists(&self, code: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM circles WHERE invite_code = ?1)",
            params![code],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Create a circle with its creator as the first member.
    pub fn create_circle(
        &self,
        name: &str,
        invite_code: &str,
        creator: i64,
        now: NaiveDateTime,
    ) -> Result<Circle> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO circles (name, invite_code, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, invite_code, creator, ts(now)],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO circle_memberships (circle_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
            params![id, creator, ts(now)],
        )?;
        tx.commit()?;
        self.get_circle(id)?.context("Circle not found after insert")
    }

    pub fn get_circle(&self, id: i64) -> Result<Option<Circle>> {
        let circle = self
            .conn
            .query_row(
                "SELECT id, name, invite_code, created_by, created_at FROM circles WHERE id = ?1",
                params![id],
                Self::circle_from_row,
            )
            .optional()?;
        Ok(circle)
    }

    pub fn get_circle_by_invite(&self, code: &str) -> Result<Option<Circle>> {
        let circle = self
            .conn
            .query_row(
                "SELECT id, name, invite_code, created_by, created_at
                 FROM circles WHERE invite_code = ?1",
                params![code],
                Self::circle_from_row,
            )
            .optional()?;
        Ok(circle)
    }

    pub fn is_member(&self, circle_id: i64, user_id: i64) -> Result<bool> {
        let member: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM circle_memberships WHERE circle_id = ?1 AND user_id = ?2)",
            params![circle_id, user_id],
            |row| row.get(0),
        )?;
        Ok(member)
    }

    pub fn member_count(&self, circle_id: i64) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM circle_memberships WHERE circle_id = ?1",
            params![circle_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Join by invite code. Lookup, duplicate check, capacity check and
    /// insert commit together.
    pub fn join_circle(
        &self,
        invite_code: &str,
        user_id: i64,
        capacity: i64,
        now: NaiveDateTime,
    ) -> Result<JoinOutcome> {
        let tx = self.conn.unchecked_transaction()?;
        let Some(circle) = self.get_circle_by_invite(invite_code)? else {
            return Ok(JoinOutcome::NotFound);
        };
        if self.is_member(circle.id, user_id)? {
            return Ok(JoinOutcome::AlreadyMember);
        }
        if self.member_count(circle.id)? >= capacity {
            return Ok(JoinOutcome::Full);
        }
        tx.execute(
            "INSERT INTO circle_memberships (circle_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
            params![circle.id, user_id, ts(now)],
        )?;
        tx.commit()?;
        Ok(JoinOutcome::Joined(circle))
    }

    pub fn leave_circle(&self, circle_id: i64, user_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM circle_memberships WHERE circle_id = ?1 AND user_id = ?2",
            params![circle_id, user_id],
        )?;
        Ok(rows > 0)
    }

    pub fn circles_for_user(&self, user_id: i64) -> Result<Vec<CircleSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.name, c.invite_code, c.created_by, m.joined_at,
                    (SELECT COUNT(*) FROM circle_memberships cm WHERE cm.circle_id = c.id)
             FROM circle_memberships m
             JOIN circles c ON c.id = m.circle_id
             WHERE m.user_id = ?1
             ORDER BY m.joined_at, c.id",
        )?;
        let circles = stmt
            .query_map(params![user_id], |row| {
                let created_by: i64 = row.get(3)?;
                Ok(CircleSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    invite_code: row.get(2)?,
                    is_creator: created_by == user_id,
                    joined_at: ts_at(row, 4)?,
                    member_count: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(circles)
    }

    /// Members in join order.
    pub fn circle_members(&self, circle_id: i64) -> Result<Vec<User>> {
        let columns = USER_COLUMNS
            .split(", ")
            .map(|c| format!("u.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {columns} FROM circle_memberships m
             JOIN users u ON u.id = m.user_id
             WHERE m.circle_id = ?1
             ORDER BY m.joined_at, m.id"
        ))?;
        let users = stmt
            .query_map(params![circle_id], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }
}
