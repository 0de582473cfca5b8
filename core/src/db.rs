use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{CalorieProfile, CalorieResult, SavedPlan};

type PlanRow = (i64, String, String, String, String);

pub struct Database {
    conn: Connection,
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
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS kv_store (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS calorie_plans (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    profile TEXT NOT NULL,
                    result TEXT NOT NULL,
                    calculation_method TEXT NOT NULL,
                    daily_calorie_goal INTEGER NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_calorie_plans_created ON calorie_plans(created_at);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Key/value storage ---

    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn kv_remove(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    /// Remove several keys in one transaction. Returns the number of rows deleted.
    pub fn kv_remove_many(&mut self, keys: &[&str]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        for key in keys {
            removed += tx.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        }
        tx.commit()?;
        Ok(removed)
    }

    // --- Calorie plans ---

    fn plan_from_row(row: &rusqlite::Row) -> rusqlite::Result<PlanRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
        ))
    }

    fn decode_plan(raw: PlanRow) -> Result<SavedPlan> {
        let (id, uuid, profile, result, created_at) = raw;
        let profile: CalorieProfile = serde_json::from_str(&profile)
            .with_context(|| format!("Corrupt profile in plan {id}"))?;
        let result: CalorieResult = serde_json::from_str(&result)
            .with_context(|| format!("Corrupt result in plan {id}"))?;
        Ok(SavedPlan {
            id,
            uuid,
            profile,
            result,
            created_at,
        })
    }

    pub fn insert_plan(&self, profile: &CalorieProfile, result: &CalorieResult) -> Result<SavedPlan> {
        let now = Local::now().to_rfc3339();
        let uuid = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO calorie_plans (uuid, profile, result, calculation_method, daily_calorie_goal, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uuid,
                serde_json::to_string(profile)?,
                serde_json::to_string(result)?,
                result.calculation_method.as_str(),
                result.daily_calorie_goal,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_plan(id)
    }

    pub fn get_plan(&self, id: i64) -> Result<SavedPlan> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, uuid, profile, result, created_at FROM calorie_plans WHERE id = ?1",
                params![id],
                Self::plan_from_row,
            )
            .with_context(|| format!("Plan {id} not found"))?;
        Self::decode_plan(raw)
    }

    /// Most recent plans first.
    pub fn list_plans(&self, limit: i64) -> Result<Vec<SavedPlan>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, profile, result, created_at FROM calorie_plans
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], Self::plan_from_row)?;

        let mut plans = Vec::new();
        for row in rows {
            plans.push(Self::decode_plan(row?)?);
        }
        Ok(plans)
    }

    pub fn plan_uuid(&self, id: i64) -> Result<Option<String>> {
        let uuid = self
            .conn
            .query_row(
                "SELECT uuid FROM calorie_plans WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(uuid)
    }

    pub fn delete_plan(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM calorie_plans WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }
}
