//! # Transaction Scope
//!
//! One database transaction per unit of work (normally one HTTP request),
//! released exactly once.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   begin() ──► Open ──┬── finish(), no errors recorded ──► Committed     │
//! │                      │                                                  │
//! │                      ├── finish(), error recorded ─────► RolledBack     │
//! │                      │                                                  │
//! │                      └── rollback() (panic path) ──────► RolledBack     │
//! │                                                                         │
//! │   A failed COMMIT still ends the scope: sqlx rolls the transaction     │
//! │   back when it is dropped, and finish() reports the failure.           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation in the unit borrows the same connection through
//! [`TransactionScope::connection`], so a batch either lands completely or
//! not at all.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::error::{DbError, DbResult};
use crate::pool::Database;

/// Where a scope ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Open,
    Committed,
    RolledBack,
}

#[derive(Debug)]
struct Inner {
    tx: Option<Transaction<'static, Sqlite>>,
    state: ScopeState,
}

/// A transaction shared by everything that runs inside one request.
#[derive(Debug)]
pub struct TransactionScope {
    inner: Mutex<Inner>,
    failed: AtomicBool,
}

impl TransactionScope {
    /// Starts a transaction on a pooled connection.
    pub async fn begin(pool: &SqlitePool) -> DbResult<Self> {
        let tx = pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        debug!("Transaction opened");

        Ok(TransactionScope {
            inner: Mutex::new(Inner {
                tx: Some(tx),
                state: ScopeState::Open,
            }),
            failed: AtomicBool::new(false),
        })
    }

    /// Borrows the transaction's connection.
    ///
    /// Holding the guard excludes every other user of the scope, so drop it
    /// before awaiting anything unrelated.
    pub async fn connection(&self) -> DbResult<MappedMutexGuard<'_, SqliteConnection>> {
        let guard = self.inner.lock().await;
        MutexGuard::try_map(guard, |inner| inner.tx.as_deref_mut())
            .map_err(|_| DbError::TransactionFailed("transaction already finished".to_string()))
    }

    /// Marks the unit of work as failed; `finish` will roll back.
    pub fn record_error(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn has_errors(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> ScopeState {
        self.inner.lock().await.state
    }

    /// Commits, or rolls back when an error was recorded.
    ///
    /// Returns the final state. A commit failure is returned as an error and
    /// the scope counts as rolled back.
    pub async fn finish(&self) -> DbResult<ScopeState> {
        let mut inner = self.inner.lock().await;
        let tx = inner
            .tx
            .take()
            .ok_or_else(|| DbError::TransactionFailed("transaction already finished".to_string()))?;

        if self.has_errors() {
            inner.state = ScopeState::RolledBack;
            tx.rollback()
                .await
                .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
            debug!("Transaction rolled back after recorded error");
            return Ok(ScopeState::RolledBack);
        }

        match tx.commit().await {
            Ok(()) => {
                inner.state = ScopeState::Committed;
                debug!("Transaction committed");
                Ok(ScopeState::Committed)
            }
            Err(e) => {
                inner.state = ScopeState::RolledBack;
                error!(error = %e, "Transaction commit failed");
                Err(DbError::TransactionFailed(e.to_string()))
            }
        }
    }

    /// Rolls back unconditionally.
    pub async fn rollback(&self) -> DbResult<()> {
        self.record_error();
        let mut inner = self.inner.lock().await;
        let tx = inner
            .tx
            .take()
            .ok_or_else(|| DbError::TransactionFailed("transaction already finished".to_string()))?;
        inner.state = ScopeState::RolledBack;
        tx.rollback()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        warn!("Transaction rolled back");
        Ok(())
    }
}

/// Runs `f` inside a transaction scope with the request contract:
///
/// - `Ok` with no recorded error commits;
/// - `Err` (or a recorded error) rolls back and the error is returned;
/// - a panic rolls back and then resumes unwinding.
///
/// ## Example
/// ```rust,ignore
/// let created = scoped(&db, |scope| async move {
///     let mut conn = scope.connection().await?;
///     repo.create_many(&mut conn, records).await
/// })
/// .await?;
/// ```
pub async fn scoped<F, Fut, T>(db: &Database, f: F) -> DbResult<T>
where
    F: FnOnce(Arc<TransactionScope>) -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let scope = Arc::new(db.begin().await?);

    match AssertUnwindSafe(f(Arc::clone(&scope))).catch_unwind().await {
        Err(panic) => {
            if let Err(e) = scope.rollback().await {
                error!(error = %e, "Rollback after panic failed");
            }
            std::panic::resume_unwind(panic)
        }
        Ok(Err(e)) => {
            scope.record_error();
            scope.finish().await?;
            Err(e)
        }
        Ok(Ok(value)) => {
            scope.finish().await?;
            Ok(value)
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DbConfig;

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        sqlx::query("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL)")
            .execute(db.pool())
            .await
            .unwrap();
        db
    }

    async fn count(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM notes")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    async fn insert(scope: &TransactionScope, body: &str) -> DbResult<()> {
        let mut conn = scope.connection().await?;
        sqlx::query("INSERT INTO notes (body) VALUES (?1)")
            .bind(body)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_clean_scope_commits() {
        let db = setup().await;
        let scope = db.begin().await.unwrap();
        insert(&scope, "a").await.unwrap();

        assert_eq!(scope.finish().await.unwrap(), ScopeState::Committed);
        assert_eq!(scope.state().await, ScopeState::Committed);
        assert_eq!(count(&db).await, 1);
    }

    #[tokio::test]
    async fn test_recorded_error_rolls_back() {
        let db = setup().await;
        let scope = db.begin().await.unwrap();
        insert(&scope, "a").await.unwrap();
        scope.record_error();

        assert_eq!(scope.finish().await.unwrap(), ScopeState::RolledBack);
        assert_eq!(count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_scope_finishes_exactly_once() {
        let db = setup().await;
        let scope = db.begin().await.unwrap();
        scope.finish().await.unwrap();

        assert!(matches!(scope.finish().await, Err(DbError::TransactionFailed(_))));
        assert!(matches!(scope.rollback().await, Err(DbError::TransactionFailed(_))));
        assert!(scope.connection().await.is_err());
        assert_eq!(scope.state().await, ScopeState::Committed);
    }

    #[tokio::test]
    async fn test_scoped_error_rolls_back() {
        let db = setup().await;
        let result = scoped(&db, |scope| async move {
            insert(&scope, "a").await?;
            insert(&scope, "b").await?;
            Err::<(), _>(DbError::not_found("note", 9))
        })
        .await;

        assert!(matches!(result, Err(DbError::NotFound { .. })));
        assert_eq!(count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_scoped_panic_rolls_back_and_resumes() {
        let db = setup().await;
        let outcome = AssertUnwindSafe(scoped(&db, |scope| async move {
            insert(&scope, "a").await?;
            if !scope.has_errors() {
                panic!("handler blew up");
            }
            Ok::<(), DbError>(())
        }))
        .catch_unwind()
        .await;

        assert!(outcome.is_err());
        assert_eq!(count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_scoped_success_commits() {
        let db = setup().await;
        let value = scoped(&db, |scope| async move {
            insert(&scope, "a").await?;
            insert(&scope, "b").await?;
            Ok::<_, DbError>(2)
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(count(&db).await, 2);
    }
}
