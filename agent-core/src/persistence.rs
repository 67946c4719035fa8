//! Persistence capability: durable goals and action history
//!
//! The core only needs create/read/update of records keyed by an opaque agent
//! id. Multi-record writes are atomic. `SqliteStore` is the shipped
//! implementation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use std::path::Path;
use std::sync::Mutex;

use crate::goal_engine::Goal;
use crate::history::ActionRecord;

/// Durable storage of goals and action history
pub trait Persistence: Send + Sync {
    /// Insert or replace several goal records; all or none are written
    fn save_goals(&self, agent_id: &str, goals: &[&Goal]) -> Result<()>;

    /// Insert or replace a goal record
    fn save_goal(&self, agent_id: &str, goal: &Goal) -> Result<()> {
        self.save_goals(agent_id, &[goal])
    }

    /// All goals for an agent, in creation order
    fn load_goals(&self, agent_id: &str) -> Result<Vec<Goal>>;

    /// Save `goal` and make it the agent's active goal, atomically
    fn activate_goal(&self, agent_id: &str, goal: &Goal) -> Result<()>;

    /// Forget the agent's active goal
    fn clear_active_goal(&self, agent_id: &str) -> Result<()>;

    /// The saved active goal id, if any
    fn load_active_goal(&self, agent_id: &str) -> Result<Option<String>>;

    /// Append an executed action
    fn record_action(&self, agent_id: &str, record: &ActionRecord) -> Result<()>;

    /// Most recent actions for an agent, newest first
    fn recent_actions(&self, agent_id: &str, limit: usize) -> Result<Vec<ActionRecord>>;
}

/// SQLite-backed store (Mutex because Connection is !Sync)
pub struct SqliteStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file, creating parent directories as needed
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let db = rusqlite::Connection::open(db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(db)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(db: rusqlite::Connection) -> Result<Self> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS goals (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                description TEXT NOT NULL,
                mode TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                parent_id TEXT,
                sub_goals TEXT NOT NULL DEFAULT '[]',
                completion_criteria TEXT NOT NULL DEFAULT '[]',
                sequence INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                completed_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS agent_state (
                agent_id TEXT PRIMARY KEY,
                active_goal TEXT
            );
            CREATE TABLE IF NOT EXISTS actions (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                goal_id TEXT,
                action_type TEXT NOT NULL,
                action TEXT NOT NULL,
                success INTEGER NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                error TEXT,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_goals_agent ON goals(agent_id, sequence);
            CREATE INDEX IF NOT EXISTS idx_actions_agent ON actions(agent_id, timestamp);",
        )
        .context("Failed to create schema")?;

        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {e}"))
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_column<T: std::str::FromStr>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_json_list(idx: usize, raw: String) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn upsert_goal(db: &rusqlite::Connection, agent_id: &str, goal: &Goal) -> Result<()> {
    let sub_goals = serde_json::to_string(&goal.sub_goals)?;
    let criteria = serde_json::to_string(&goal.completion_criteria)?;
    db.execute(
        "INSERT OR REPLACE INTO goals (id, agent_id, description, mode, status, priority, \
         parent_id, sub_goals, completion_criteria, sequence, created_at, updated_at, completed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        rusqlite::params![
            goal.id,
            agent_id,
            goal.description,
            goal.mode.as_str(),
            goal.status.as_str(),
            goal.priority,
            goal.parent_id,
            sub_goals,
            criteria,
            goal.sequence as i64,
            goal.created_at.timestamp_millis(),
            goal.updated_at.timestamp_millis(),
            goal.completed_at.map(|t| t.timestamp_millis()),
        ],
    )
    .with_context(|| format!("Failed to save goal {}", goal.id))?;
    Ok(())
}

fn write_active(db: &rusqlite::Connection, agent_id: &str, goal_id: Option<&str>) -> Result<()> {
    db.execute(
        "INSERT OR REPLACE INTO agent_state (agent_id, active_goal) VALUES (?1, ?2)",
        rusqlite::params![agent_id, goal_id],
    )
    .context("Failed to save active goal")?;
    Ok(())
}

impl Persistence for SqliteStore {
    fn save_goals(&self, agent_id: &str, goals: &[&Goal]) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        for goal in goals {
            upsert_goal(&tx, agent_id, goal)?;
        }
        tx.commit().context("Failed to commit goals")?;
        Ok(())
    }

    fn activate_goal(&self, agent_id: &str, goal: &Goal) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        upsert_goal(&tx, agent_id, goal)?;
        write_active(&tx, agent_id, Some(&goal.id))?;
        tx.commit().context("Failed to commit active goal")?;
        Ok(())
    }

    fn clear_active_goal(&self, agent_id: &str) -> Result<()> {
        let db = self.conn()?;
        write_active(&db, agent_id, None)
    }

    fn load_active_goal(&self, agent_id: &str) -> Result<Option<String>> {
        let db = self.conn()?;
        let active = db
            .query_row(
                "SELECT active_goal FROM agent_state WHERE agent_id = ?1",
                [agent_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .context("Failed to load active goal")?;
        Ok(active.flatten())
    }

    fn load_goals(&self, agent_id: &str) -> Result<Vec<Goal>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, description, mode, status, priority, parent_id, sub_goals, \
             completion_criteria, sequence, created_at, updated_at, completed_at \
             FROM goals WHERE agent_id = ?1 ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map([agent_id], |row| {
            Ok(Goal {
                id: row.get(0)?,
                description: row.get(1)?,
                mode: parse_column(2, row.get(2)?)?,
                status: parse_column(3, row.get(3)?)?,
                priority: row.get(4)?,
                parent_id: row.get(5)?,
                sub_goals: parse_json_list(6, row.get(6)?)?,
                completion_criteria: parse_json_list(7, row.get(7)?)?,
                sequence: row.get::<_, i64>(8)? as u64,
                created_at: from_millis(row.get(9)?),
                updated_at: from_millis(row.get(10)?),
                completed_at: row.get::<_, Option<i64>>(11)?.map(from_millis),
            })
        })?;

        let goals = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load goals")?;
        Ok(goals)
    }

    fn record_action(&self, agent_id: &str, record: &ActionRecord) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO actions (id, agent_id, goal_id, action_type, action, success, summary, error, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                record.id,
                agent_id,
                record.goal_id,
                record.action_type,
                record.action,
                record.success,
                record.summary,
                record.error,
                record.timestamp.timestamp_millis(),
            ],
        )
        .context("Failed to record action")?;
        Ok(())
    }

    fn recent_actions(&self, agent_id: &str, limit: usize) -> Result<Vec<ActionRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, goal_id, action_type, action, success, summary, error, timestamp \
             FROM actions WHERE agent_id = ?1 ORDER BY timestamp DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![agent_id, limit as i64], |row| {
            Ok(ActionRecord {
                id: row.get(0)?,
                goal_id: row.get(1)?,
                action_type: row.get(2)?,
                action: row.get(3)?,
                success: row.get(4)?,
                summary: row.get(5)?,
                error: row.get(6)?,
                timestamp: from_millis(row.get(7)?),
            })
        })?;

        let actions = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load actions")?;
        Ok(actions)
    }
}
