//! # Database Migrations
//!
//! Embedded SQL migrations for the engine's own tables, plus the runtime
//! bootstrap of resource tables from their schema descriptors.
//!
//! ## Two Kinds of Schema
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Engine tables (fixed)             Resource tables (declared in code)  │
//! │  ─────────────────────             ──────────────────────────────────   │
//! │  migrations/sqlite/*.sql           SchemaDescriptor                     │
//! │        │                                 │                              │
//! │        ▼                                 ▼                              │
//! │  sqlx::migrate! (embedded)         ensure_resource_table()              │
//! │        │                           ├── CREATE TABLE IF NOT EXISTS       │
//! │        ▼                           ├── ALTER TABLE ADD COLUMN (new)     │
//! │  counters                          └── deleted_at + unique indexes      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Resource tables only ever grow: columns removed from a declaration are
//! left in place, and existing columns are never retyped.
//!
//! ## Adding New Migrations
//!
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. Name format: `NNN_description.sql`
//! 3. **NEVER** modify existing migrations - always add new ones

use std::collections::HashSet;

use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use tessera_core::schema::{FieldDescriptor, FieldKind};
use tessera_core::{SchemaDescriptor, CREATED_AT_COLUMN, DELETED_AT_COLUMN, UPDATED_AT_COLUMN};

use crate::error::{DbError, DbResult};

/// Embedded migrations from the `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations.
///
/// - Idempotent: safe to run multiple times
/// - Ordered: migrations run in filename order (001, 002, ...)
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns (total_migrations, applied_migrations), for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}

// =============================================================================
// Resource Tables
// =============================================================================

/// Double-quotes an identifier for SQL.
///
/// Schema names are validated to `[a-z_][a-z0-9_]*`, so this never needs
/// escaping; quoting keeps keywords like `order` usable as field names.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident)
}

/// Column definition for a declared field.
///
/// Scalars get a zero default so omitted fields read back as `""`, `0` or
/// `false`. Composites are JSON text and default to NULL. Unique columns
/// default to NULL as well: SQLite treats NULLs as distinct, so rows that
/// omit the field never collide.
fn column_definition(field: &FieldDescriptor) -> String {
    let (ty, default) = match field.kind() {
        FieldKind::String => ("TEXT", Some("''")),
        FieldKind::Integer => ("INTEGER", Some("0")),
        FieldKind::Float => ("REAL", Some("0")),
        FieldKind::Bool => ("INTEGER", Some("0")),
        FieldKind::Object(_) | FieldKind::Sequence(_) | FieldKind::Map(_) => ("TEXT", None),
    };
    match default.filter(|_| !field.is_unique()) {
        Some(default) => format!("{} {} DEFAULT {}", quote(field.name()), ty, default),
        None => format!("{} {}", quote(field.name()), ty),
    }
}

/// Creates the table for `schema` if missing and adds newly declared columns.
pub async fn ensure_resource_table(pool: &SqlitePool, schema: &SchemaDescriptor) -> DbResult<()> {
    let table = quote(schema.table());

    let mut columns = vec![
        format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote(schema.identifier())),
        format!("{} INTEGER NOT NULL DEFAULT 0", quote(CREATED_AT_COLUMN)),
        format!("{} INTEGER NOT NULL DEFAULT 0", quote(UPDATED_AT_COLUMN)),
        format!("{} INTEGER NOT NULL DEFAULT 0", quote(DELETED_AT_COLUMN)),
    ];
    columns.extend(schema.fields().iter().map(column_definition));

    let create = format!("CREATE TABLE IF NOT EXISTS {} ({})", table, columns.join(", "));
    debug!(table = %schema.table(), "Ensuring resource table");
    sqlx::query(&create)
        .execute(pool)
        .await
        .map_err(|e| DbError::MigrationFailed(format!("{}: {}", schema.table(), e)))?;

    let existing: HashSet<String> = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>("name"))
        .collect::<Result<_, _>>()?;

    for field in schema.fields() {
        if existing.contains(field.name()) {
            continue;
        }
        info!(table = %schema.table(), column = %field.name(), "Adding column");
        let alter = format!("ALTER TABLE {} ADD COLUMN {}", table, column_definition(field));
        sqlx::query(&alter)
            .execute(pool)
            .await
            .map_err(|e| DbError::MigrationFailed(format!("{}.{}: {}", schema.table(), field.name(), e)))?;
    }

    let deleted_index = format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote(&format!("idx_{}_{}", schema.table(), DELETED_AT_COLUMN)),
        table,
        quote(DELETED_AT_COLUMN)
    );
    sqlx::query(&deleted_index).execute(pool).await?;

    // Partial: only active rows compete, whatever their deletion stamps.
    for field in schema.fields().iter().filter(|f| f.is_unique()) {
        let legacy_index = format!(
            "DROP INDEX IF EXISTS {}",
            quote(&format!("uq_{}_{}", schema.table(), field.name()))
        );
        sqlx::query(&legacy_index).execute(pool).await?;

        let unique_index = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({}) WHERE {} = 0",
            quote(&format!("uq_{}_{}_active", schema.table(), field.name())),
            table,
            quote(field.name()),
            quote(DELETED_AT_COLUMN)
        );
        sqlx::query(&unique_index).execute(pool).await?;
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use tessera_core::schema::{NamingStrategy, SchemaBuilder};

    fn widget(extra: bool) -> SchemaDescriptor {
        let mut builder = SchemaBuilder::new("Widget", &NamingStrategy::default())
            .identifier("id")
            .field(FieldDescriptor::string("name").unique())
            .field(FieldDescriptor::float("price"));
        if extra {
            builder = builder.field(FieldDescriptor::sequence("tags", FieldKind::String));
        }
        builder.build().unwrap()
    }

    async fn column_names(pool: &SqlitePool) -> Vec<String> {
        sqlx::query("PRAGMA table_info(\"widgets\")")
            .fetch_all(pool)
            .await
            .unwrap()
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect()
    }

    #[tokio::test]
    async fn test_table_is_created_with_system_columns() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        ensure_resource_table(db.pool(), &widget(false)).await.unwrap();

        assert_eq!(
            column_names(db.pool()).await,
            vec!["id", "created_at", "updated_at", "deleted_at", "name", "price"]
        );
    }

    #[tokio::test]
    async fn test_new_fields_are_added_and_bootstrap_is_idempotent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        ensure_resource_table(db.pool(), &widget(false)).await.unwrap();
        ensure_resource_table(db.pool(), &widget(true)).await.unwrap();
        ensure_resource_table(db.pool(), &widget(true)).await.unwrap();

        let columns = column_names(db.pool()).await;
        assert_eq!(columns.last().map(String::as_str), Some("tags"));
        assert_eq!(columns.len(), 7);
    }

    #[tokio::test]
    async fn test_unique_fields_are_scoped_to_active_rows() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        ensure_resource_table(db.pool(), &widget(false)).await.unwrap();

        // two tombstones sharing both value and deletion stamp
        for _ in 0..2 {
            sqlx::query("INSERT INTO widgets (name, deleted_at) VALUES ('a', 5)")
                .execute(db.pool())
                .await
                .unwrap();
        }
        sqlx::query("INSERT INTO widgets (name) VALUES ('a')")
            .execute(db.pool())
            .await
            .unwrap();

        let err = sqlx::query("INSERT INTO widgets (name) VALUES ('a')")
            .execute(db.pool())
            .await
            .unwrap_err();
        assert!(matches!(DbError::from(err), DbError::UniqueViolation { .. }));
    }
}
