use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

use crate::cooldown::{CooldownState, ProcessedActivity};
use crate::error::DatabaseError;

/// Cooldown state as it is persisted between runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedCooldown {
    pub state: CooldownState,
    pub processed: Vec<ProcessedActivity>,
}

/// Storage for the cooldown state machine
pub trait CooldownStore: Send {
    /// Previously saved state, or `None` on first run
    fn load(&self) -> Result<Option<PersistedCooldown>, DatabaseError>;

    /// Replace the saved state and record any newly processed activities
    fn save(
        &mut self,
        state: &CooldownState,
        processed: &[ProcessedActivity],
    ) -> Result<(), DatabaseError>;

    /// Drop processed activities that started before `before`, keeping `keep_id`.
    /// Returns the number of records removed.
    fn prune_processed(
        &mut self,
        before: DateTime<Utc>,
        keep_id: Option<&str>,
    ) -> Result<usize, DatabaseError>;
}

/// Volatile store, used in tests and when persistence is disabled
#[derive(Debug, Default)]
pub struct MemoryCooldownStore {
    saved: Option<PersistedCooldown>,
}

impl MemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CooldownStore for MemoryCooldownStore {
    fn load(&self) -> Result<Option<PersistedCooldown>, DatabaseError> {
        Ok(self.saved.clone())
    }

    fn save(
        &mut self,
        state: &CooldownState,
        processed: &[ProcessedActivity],
    ) -> Result<(), DatabaseError> {
        let mut by_id: BTreeMap<String, DateTime<Utc>> = self
            .saved
            .take()
            .map(|saved| {
                saved
                    .processed
                    .into_iter()
                    .map(|p| (p.id, p.start_time))
                    .collect()
            })
            .unwrap_or_default();
        for p in processed {
            by_id.entry(p.id.clone()).or_insert(p.start_time);
        }

        self.saved = Some(PersistedCooldown {
            state: state.clone(),
            processed: by_id
                .into_iter()
                .map(|(id, start_time)| ProcessedActivity { id, start_time })
                .collect(),
        });
        Ok(())
    }

    fn prune_processed(
        &mut self,
        before: DateTime<Utc>,
        keep_id: Option<&str>,
    ) -> Result<usize, DatabaseError> {
        let Some(saved) = self.saved.as_mut() else {
            return Ok(0);
        };
        let len = saved.processed.len();
        saved
            .processed
            .retain(|p| p.start_time >= before || keep_id == Some(p.id.as_str()));
        Ok(len - saved.processed.len())
    }
}

/// SQLite-backed cooldown store
pub struct SqliteCooldownStore {
    conn: Connection,
}

impl SqliteCooldownStore {
    /// Create or open a store at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Store that lives only as long as the connection
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&mut self) -> Result<(), DatabaseError> {
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;

        // Single row, id is always 1
        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS cooldown_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_processed_activity_id TEXT,
                cooldown_start_time TEXT,
                expected_recovery_seconds REAL NOT NULL DEFAULT 0,
                initial_adjustment INTEGER NOT NULL DEFAULT 100,
                current_adjustment INTEGER NOT NULL DEFAULT 100,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS processed_activities (
                activity_id TEXT PRIMARY KEY,
                activity_start DATETIME NOT NULL,
                processed_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_processed_start ON processed_activities(activity_start)",
            [],
        )?;

        Ok(())
    }

    /// Number of activity ids recorded as processed
    pub fn processed_count(&self) -> Result<usize, DatabaseError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM processed_activities", [], |row| {
                    row.get(0)
                })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn load_processed(&self) -> Result<Vec<ProcessedActivity>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT activity_id, activity_start FROM processed_activities ORDER BY activity_id",
        )?;
        let processed = stmt
            .query_map([], |row| {
                Ok(ProcessedActivity {
                    id: row.get(0)?,
                    start_time: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(processed)
    }
}

fn adjustment_from_column(value: i64, column: &str) -> Result<u8, DatabaseError> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v <= 100)
        .ok_or_else(|| DatabaseError::Corrupted {
            table: "cooldown_state".to_string(),
            reason: format!("{} out of range: {}", column, value),
        })
}

impl CooldownStore for SqliteCooldownStore {
    fn load(&self) -> Result<Option<PersistedCooldown>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT last_processed_activity_id, cooldown_start_time,
                       expected_recovery_seconds, initial_adjustment, current_adjustment
                FROM cooldown_state
                WHERE id = 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<DateTime<Utc>>>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((last_id, start, expected, initial, current)) = row else {
            return Ok(None);
        };

        let state = CooldownState {
            last_processed_activity_id: last_id,
            cooldown_start_time: start,
            expected_recovery_seconds: expected,
            initial_adjustment: adjustment_from_column(initial, "initial_adjustment")?,
            current_adjustment: adjustment_from_column(current, "current_adjustment")?,
        };

        Ok(Some(PersistedCooldown {
            state,
            processed: self.load_processed()?,
        }))
    }

    fn save(
        &mut self,
        state: &CooldownState,
        processed: &[ProcessedActivity],
    ) -> Result<(), DatabaseError> {
        let tx = self.conn.transaction()?;

        tx.execute(
            r#"
            INSERT OR REPLACE INTO cooldown_state (
                id, last_processed_activity_id, cooldown_start_time,
                expected_recovery_seconds, initial_adjustment, current_adjustment, updated_at
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)
            "#,
            params![
                state.last_processed_activity_id,
                state.cooldown_start_time,
                state.expected_recovery_seconds,
                i64::from(state.initial_adjustment),
                i64::from(state.current_adjustment),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO processed_activities (activity_id, activity_start) VALUES (?1, ?2)",
            )?;
            for p in processed {
                stmt.execute(params![p.id, p.start_time])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn prune_processed(
        &mut self,
        before: DateTime<Utc>,
        keep_id: Option<&str>,
    ) -> Result<usize, DatabaseError> {
        let removed = self.conn.execute(
            r#"
            DELETE FROM processed_activities
            WHERE activity_start < ?1 AND (?2 IS NULL OR activity_id != ?2)
            "#,
            params![before, keep_id],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 23, 8, 0, 0).unwrap()
    }

    fn processed(id: &str, days_ago: i64) -> ProcessedActivity {
        ProcessedActivity {
            id: id.to_string(),
            start_time: t0() - chrono::Duration::days(days_ago),
        }
    }

    fn recovering_state() -> CooldownState {
        CooldownState {
            last_processed_activity_id: Some("run-1".to_string()),
            cooldown_start_time: Some(t0()),
            expected_recovery_seconds: 36.0 * 3600.0,
            initial_adjustment: 63,
            current_adjustment: 70,
        }
    }

    #[test]
    fn test_empty_store_loads_nothing() {
        let store = SqliteCooldownStore::in_memory().unwrap();
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.processed_count().unwrap(), 0);
    }

    #[test]
    fn test_save_and_load() {
        let mut store = SqliteCooldownStore::in_memory().unwrap();
        let state = recovering_state();

        store
            .save(&state, &[processed("run-0", 2), processed("run-1", 0)])
            .unwrap();
        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded.state, state);
        assert_eq!(loaded.processed, vec![processed("run-0", 2), processed("run-1", 0)]);
    }

    #[test]
    fn test_save_replaces_single_row() {
        let mut store = SqliteCooldownStore::in_memory().unwrap();
        store.save(&recovering_state(), &[processed("run-1", 0)]).unwrap();
        store
            .save(&CooldownState::default(), &[processed("run-1", 0)])
            .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.state, CooldownState::default());
        assert_eq!(store.processed_count().unwrap(), 1);

        let rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM cooldown_state", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cooldown.db");

        {
            let mut store = SqliteCooldownStore::new(&path).unwrap();
            store.save(&recovering_state(), &[processed("run-1", 0)]).unwrap();
        }

        let store = SqliteCooldownStore::new(&path).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.state.current_adjustment, 70);
        assert_eq!(loaded.processed, vec![processed("run-1", 0)]);
    }

    #[test]
    fn test_corrupted_adjustment() {
        let store = SqliteCooldownStore::in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO cooldown_state (id, current_adjustment) VALUES (1, 250)",
                [],
            )
            .unwrap();

        assert!(matches!(
            store.load(),
            Err(DatabaseError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_memory_store_accumulates_ids() {
        let mut store = MemoryCooldownStore::new();
        assert!(store.load().unwrap().is_none());

        store.save(&recovering_state(), &[processed("a", 40)]).unwrap();
        store.save(&CooldownState::default(), &[processed("b", 1)]).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.state, CooldownState::default());
        assert_eq!(loaded.processed, vec![processed("a", 40), processed("b", 1)]);

        assert_eq!(store.prune_processed(t0() - chrono::Duration::days(31), None).unwrap(), 1);
        assert_eq!(store.load().unwrap().unwrap().processed, vec![processed("b", 1)]);
    }

    #[test]
    fn test_prune_drops_old_records() {
        let mut store = SqliteCooldownStore::in_memory().unwrap();
        store
            .save(
                &recovering_state(),
                &[processed("ancient", 90), processed("old", 45), processed("run-1", 0)],
            )
            .unwrap();

        let cutoff = t0() - chrono::Duration::days(31);
        assert_eq!(store.prune_processed(cutoff, Some("ancient")).unwrap(), 1);
        assert_eq!(store.processed_count().unwrap(), 2);

        assert_eq!(store.prune_processed(cutoff, None).unwrap(), 1);
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.processed, vec![processed("run-1", 0)]);
    }
}
