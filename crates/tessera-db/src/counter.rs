//! # Counter Cache
//!
//! Per-table count of active rows, kept current by SQLite triggers so that
//! unfiltered list totals never scan a large table.
//!
//! ## Trigger Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  event on <table>                         counters.counter              │
//! │  ────────────────────────────────────     ────────────────              │
//! │  INSERT with deleted_at = 0               + 1                           │
//! │  UPDATE deleted_at 0 → non-zero           - 1   (soft delete)           │
//! │  UPDATE deleted_at non-zero → 0           + 1   (restore)               │
//! │  DELETE of a row with deleted_at = 0      - 1   (physical delete)       │
//! │                                                                         │
//! │  Invariant: counter == SELECT COUNT(*) FROM <table> WHERE deleted_at=0  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Triggers run inside the mutating statement's transaction, so a rolled
//! back request leaves the counter untouched.
//!
//! Reads never repair the counter. A missing or unreadable row yields
//! `None` and the caller counts directly; [`CounterCache::rebuild`] is the
//! explicit reconciliation.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use tessera_core::DELETED_AT_COLUMN;

use crate::error::{DbError, DbResult};
use crate::migrations::quote;

/// Trigger events, in the order they are created.
const TRIGGERS: [&str; 4] = ["insert", "soft_delete", "restore", "delete"];

/// Counter for one resource table. The counter row is keyed by table name.
#[derive(Debug, Clone)]
pub struct CounterCache {
    table: String,
}

impl CounterCache {
    pub fn new(table: impl Into<String>) -> Self {
        CounterCache {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn trigger_name(&self, event: &str) -> String {
        quote(&format!("trg_{}_counter_{}", self.table, event))
    }

    fn trigger_sql(&self, event: &str) -> String {
        let table = quote(&self.table);
        let col = DELETED_AT_COLUMN;
        let (timing, condition, delta) = match event {
            "insert" => (format!("AFTER INSERT ON {}", table), format!("NEW.{col} = 0"), "+ 1"),
            "soft_delete" => (
                format!("AFTER UPDATE OF {col} ON {}", table),
                format!("OLD.{col} = 0 AND NEW.{col} != 0"),
                "- 1",
            ),
            "restore" => (
                format!("AFTER UPDATE OF {col} ON {}", table),
                format!("OLD.{col} != 0 AND NEW.{col} = 0"),
                "+ 1",
            ),
            _ => (format!("AFTER DELETE ON {}", table), format!("OLD.{col} = 0"), "- 1"),
        };

        format!(
            "CREATE TRIGGER {name} {timing} FOR EACH ROW WHEN {condition} \
             BEGIN UPDATE counters SET counter = counter {delta} WHERE name = '{table_name}'; END",
            name = self.trigger_name(event),
            table_name = self.table,
        )
    }

    /// Statement that sets the counter row to a full count.
    fn recount_sql(&self) -> String {
        format!(
            "INSERT INTO counters (name, counter) \
             SELECT ?1, COUNT(*) FROM {} WHERE {} = 0 \
             ON CONFLICT(name) DO UPDATE SET counter = excluded.counter",
            quote(&self.table),
            DELETED_AT_COLUMN
        )
    }

    /// Counts the table and (re)creates the counter row and its triggers.
    ///
    /// Runs in its own transaction: either everything is in place or nothing
    /// changed. Returns the initial count.
    pub async fn initialize(&self, pool: &SqlitePool) -> DbResult<i64> {
        let mut tx = pool.begin().await?;

        for event in TRIGGERS {
            let statement = format!("DROP TRIGGER IF EXISTS {}", self.trigger_name(event));
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        sqlx::query(&self.recount_sql())
            .bind(&self.table)
            .execute(&mut *tx)
            .await?;

        for event in TRIGGERS {
            sqlx::query(&self.trigger_sql(event))
                .execute(&mut *tx)
                .await?;
        }

        let count = self.read_strict(&mut tx).await?;
        tx.commit().await?;

        info!(table = %self.table, count, "Counter initialized");
        Ok(count)
    }

    /// Reads the cached count.
    ///
    /// `None` when the row is missing or the read failed; failures are
    /// logged, never returned.
    pub async fn read(&self, conn: &mut SqliteConnection) -> Option<i64> {
        match sqlx::query_scalar::<_, i64>("SELECT counter FROM counters WHERE name = ?1")
            .bind(&self.table)
            .fetch_optional(conn)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(table = %self.table, error = %e, "Counter read failed");
                None
            }
        }
    }

    async fn read_strict(&self, conn: &mut SqliteConnection) -> DbResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT counter FROM counters WHERE name = ?1")
            .bind(&self.table)
            .fetch_one(conn)
            .await
            .map_err(DbError::from)
    }

    /// Adjusts the counter by `delta`.
    ///
    /// For callers that change row visibility without going through the
    /// triggers. Fails with `NotFound` when the counter row does not exist.
    pub async fn increment(&self, conn: &mut SqliteConnection, delta: i64) -> DbResult<()> {
        let result = sqlx::query("UPDATE counters SET counter = counter + ?1 WHERE name = ?2")
            .bind(delta)
            .bind(&self.table)
            .execute(conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("counter", &self.table));
        }
        debug!(table = %self.table, delta, "Counter adjusted");
        Ok(())
    }

    /// Recomputes the counter from the table and returns the new value.
    pub async fn rebuild(&self, conn: &mut SqliteConnection) -> DbResult<i64> {
        sqlx::query(&self.recount_sql())
            .bind(&self.table)
            .execute(&mut *conn)
            .await?;
        let count = self.read_strict(conn).await?;
        info!(table = %self.table, count, "Counter rebuilt");
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        sqlx::query(
            "CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             deleted_at INTEGER NOT NULL DEFAULT 0)",
        )
        .execute(db.pool())
        .await
        .unwrap();
        db
    }

    async fn exec(db: &Database, sql: &str) {
        sqlx::query(sql).execute(db.pool()).await.unwrap();
    }

    async fn actual(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE deleted_at = 0")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    async fn cached(db: &Database, counter: &CounterCache) -> Option<i64> {
        let mut conn = db.pool().acquire().await.unwrap();
        counter.read(&mut conn).await
    }

    #[tokio::test]
    async fn test_initialize_counts_existing_rows() {
        let db = setup().await;
        exec(&db, "INSERT INTO items (deleted_at) VALUES (0), (0), (7)").await;

        let counter = CounterCache::new("items");
        assert_eq!(counter.initialize(db.pool()).await.unwrap(), 2);
        assert_eq!(cached(&db, &counter).await, Some(2));

        // Re-initializing replaces rather than duplicating triggers
        assert_eq!(counter.initialize(db.pool()).await.unwrap(), 2);
        exec(&db, "INSERT INTO items (deleted_at) VALUES (0)").await;
        assert_eq!(cached(&db, &counter).await, Some(3));
    }

    #[tokio::test]
    async fn test_triggers_track_every_transition() {
        let db = setup().await;
        let counter = CounterCache::new("items");
        counter.initialize(db.pool()).await.unwrap();

        exec(&db, "INSERT INTO items (deleted_at) VALUES (0), (0), (0)").await;
        exec(&db, "INSERT INTO items (deleted_at) VALUES (9)").await;
        assert_eq!(cached(&db, &counter).await, Some(3));

        // soft delete, then deleting again is a no-op
        exec(&db, "UPDATE items SET deleted_at = 100 WHERE id = 1").await;
        exec(&db, "UPDATE items SET deleted_at = 200 WHERE id = 1").await;
        assert_eq!(cached(&db, &counter).await, Some(2));

        // restore
        exec(&db, "UPDATE items SET deleted_at = 0 WHERE id IN (1, 4)").await;
        assert_eq!(cached(&db, &counter).await, Some(4));

        // physical delete of active and of deleted rows
        exec(&db, "UPDATE items SET deleted_at = 5 WHERE id = 2").await;
        exec(&db, "DELETE FROM items WHERE id IN (2, 3)").await;

        assert_eq!(cached(&db, &counter).await, Some(actual(&db).await));
        assert_eq!(actual(&db).await, 2);
    }

    #[tokio::test]
    async fn test_missing_counter_reads_none() {
        let db = setup().await;
        let counter = CounterCache::new("items");
        assert_eq!(cached(&db, &counter).await, None);

        let mut conn = db.pool().acquire().await.unwrap();
        let err = counter.increment(&mut conn, 1).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_increment_and_rebuild() {
        let db = setup().await;
        exec(&db, "INSERT INTO items (deleted_at) VALUES (0), (0)").await;
        let counter = CounterCache::new("items");
        counter.initialize(db.pool()).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        counter.increment(&mut conn, 5).await.unwrap();
        assert_eq!(counter.read(&mut conn).await, Some(7));

        assert_eq!(counter.rebuild(&mut conn).await.unwrap(), 2);
        assert_eq!(counter.read(&mut conn).await, Some(2));
    }
}
