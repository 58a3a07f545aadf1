//! # Generic Repository
//!
//! CRUD for any registered resource, driven entirely by its
//! [`SchemaDescriptor`].
//!
//! ## Query Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    GET /widgets?search=a&price=2&order=-name            │
//! │                                                                         │
//! │  ListQuery (planned in tessera-core)                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SELECT "id", "created_at", "updated_at", <visible fields>              │
//! │  FROM "widgets"                                                         │
//! │  WHERE "deleted_at" = 0                                                 │
//! │    AND "price" = ?                          ← equality filters          │
//! │    AND "name" LIKE ? ESCAPE '\'             ← _contains filters         │
//! │    AND ("name" LIKE ? ESCAPE '\' OR ...)    ← search                    │
//! │  ORDER BY "name" DESC                                                   │
//! │  LIMIT ? OFFSET ?                                                       │
//! │                                                                         │
//! │  total: counter cache when unfiltered, COUNT(*) otherwise              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Column names only ever come from the descriptor; request values are
//! always bound parameters.
//!
//! ## Stored Representation
//! - Scalars live in native columns (`Bool` as 0/1).
//! - Objects, sequences and maps are JSON text.
//! - `deleted_at` is 0 for active rows and the deletion time otherwise; it is
//!   never returned. Sensitive fields are written but never read back.

use std::sync::Arc;

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use tracing::{debug, warn};

use tessera_core::binder::bind_record;
use tessera_core::query::{like_pattern, FilterOp};
use tessera_core::validation::{bind_batch_update, bind_update};
use tessera_core::{
    now_millis, FieldKind, GenericRecord, ListQuery, Page, SchemaDescriptor, Value,
    CREATED_AT_COLUMN, DELETED_AT_COLUMN, UPDATED_AT_COLUMN,
};

use crate::counter::CounterCache;
use crate::error::{DbError, DbResult};
use crate::migrations::quote;

/// Repository for one resource.
///
/// ## Usage
/// ```rust,ignore
/// let repo = GenericRepository::new(schema);
///
/// let mut conn = scope.connection().await?;
/// let created = repo.create(&mut conn, record).await?;
/// let fetched = repo.get(&mut conn, created_id).await?;
/// ```
#[derive(Debug, Clone)]
pub struct GenericRepository {
    schema: Arc<SchemaDescriptor>,
    counter: CounterCache,
}

impl GenericRepository {
    pub fn new(schema: Arc<SchemaDescriptor>) -> Self {
        let counter = CounterCache::new(schema.table());
        GenericRepository { schema, counter }
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn counter(&self) -> &CounterCache {
        &self.counter
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Lists one page of active rows.
    ///
    /// ## Total Count
    /// - Unfiltered: read from the counter cache; if that read fails, count
    ///   directly.
    /// - Filtered or searched: always counted directly, since the cache only
    ///   knows unfiltered totals.
    pub async fn list(&self, conn: &mut SqliteConnection, query: &ListQuery) -> DbResult<Page<GenericRecord>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
        qb.push(self.select_columns())
            .push(" FROM ")
            .push(quote(self.schema.table()));
        self.push_where(&mut qb, query)?;

        if let Some(order) = &query.order {
            qb.push(" ORDER BY ")
                .push(quote(&order.field))
                .push(" ")
                .push(order.direction.as_sql());
        }
        qb.push(" LIMIT ").push_bind(query.limit());
        qb.push(" OFFSET ").push_bind(query.offset());

        let rows = qb.build().fetch_all(&mut *conn).await?;
        let data = rows
            .iter()
            .map(|row| self.decode_row(row))
            .collect::<DbResult<Vec<_>>>()?;

        let total = self.total(conn, query).await?;

        debug!(
            resource = %self.schema.resource(),
            total,
            returned = data.len(),
            "Listed records"
        );

        Ok(Page {
            total,
            page: query.page,
            page_size: query.page_size,
            data,
        })
    }

    async fn total(&self, conn: &mut SqliteConnection, query: &ListQuery) -> DbResult<i64> {
        if !query.is_filtered() {
            if let Some(count) = self.counter.read(&mut *conn).await {
                return Ok(count);
            }
            warn!(
                table = %self.schema.table(),
                "Counter unavailable, counting directly"
            );
        }

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM ");
        qb.push(quote(self.schema.table()));
        self.push_where(&mut qb, query)?;

        let total: i64 = qb.build_query_scalar().fetch_one(&mut *conn).await?;
        Ok(total)
    }

    /// Fetches one active row.
    pub async fn get(&self, conn: &mut SqliteConnection, id: i64) -> DbResult<GenericRecord> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT ");
        qb.push(self.select_columns())
            .push(" FROM ")
            .push(quote(self.schema.table()))
            .push(" WHERE ")
            .push(quote(self.schema.identifier()))
            .push(" = ")
            .push_bind(id)
            .push(" AND ")
            .push(quote(DELETED_AT_COLUMN))
            .push(" = 0");

        let row = qb.build().fetch_optional(&mut *conn).await?;
        match row {
            Some(row) => self.decode_row(&row),
            None => Err(DbError::not_found(self.schema.resource(), id)),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts one record and returns it as stored.
    ///
    /// Undeclared keys, the identifier and the timestamps in `raw` are
    /// ignored; the store assigns all three.
    pub async fn create(&self, conn: &mut SqliteConnection, raw: GenericRecord) -> DbResult<GenericRecord> {
        let record = bind_record(&self.schema, raw)?;
        let now = now_millis();

        let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO ");
        qb.push(quote(self.schema.table())).push(" (");
        {
            let mut columns = qb.separated(", ");
            columns.push(quote(CREATED_AT_COLUMN));
            columns.push(quote(UPDATED_AT_COLUMN));
            columns.push(quote(DELETED_AT_COLUMN));
            for field in record.keys() {
                columns.push(quote(field));
            }
        }
        qb.push(") VALUES (")
            .push_bind(now)
            .push(", ")
            .push_bind(now)
            .push(", 0");
        for (_, value) in record {
            qb.push(", ");
            push_value(&mut qb, value)?;
        }
        qb.push(")");

        let result = qb.build().execute(&mut *conn).await?;
        let id = result.last_insert_rowid();
        debug!(resource = %self.schema.resource(), id, "Created record");

        self.get(conn, id).await
    }

    /// Creates each record in order, stopping at the first failure.
    ///
    /// Records created before the failure stay in the transaction; it is the
    /// surrounding scope's rollback that makes the batch all-or-nothing.
    pub async fn create_many(
        &self,
        conn: &mut SqliteConnection,
        records: Vec<GenericRecord>,
    ) -> DbResult<Vec<GenericRecord>> {
        let mut created = Vec::with_capacity(records.len());
        for record in records {
            created.push(self.create(&mut *conn, record).await?);
        }
        Ok(created)
    }

    /// Updates one active row with the updatable subset of `raw`.
    ///
    /// ## Errors
    /// - `Invalid(WhitelistViolation)` when `raw` has no updatable field
    /// - `NotFound` when the row is missing or soft-deleted
    pub async fn update(&self, conn: &mut SqliteConnection, id: i64, raw: GenericRecord) -> DbResult<()> {
        let changes = bind_update(&self.schema, raw)?;
        self.apply_update(conn, id, changes).await
    }

    /// Applies a batch of `{"id": .., <fields>}` objects. Every object is
    /// validated before the first row is touched.
    pub async fn update_many(&self, conn: &mut SqliteConnection, objects: Vec<GenericRecord>) -> DbResult<usize> {
        let updates = bind_batch_update(&self.schema, objects)?;
        let count = updates.len();
        for update in updates {
            self.apply_update(&mut *conn, update.id, update.changes).await?;
        }
        Ok(count)
    }

    async fn apply_update(&self, conn: &mut SqliteConnection, id: i64, changes: GenericRecord) -> DbResult<()> {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE ");
        qb.push(quote(self.schema.table()))
            .push(" SET ")
            .push(quote(UPDATED_AT_COLUMN))
            .push(" = ")
            .push_bind(now_millis());
        for (field, value) in changes {
            qb.push(", ").push(quote(&field)).push(" = ");
            push_value(&mut qb, value)?;
        }
        qb.push(" WHERE ")
            .push(quote(self.schema.identifier()))
            .push(" = ")
            .push_bind(id)
            .push(" AND ")
            .push(quote(DELETED_AT_COLUMN))
            .push(" = 0");

        let result = qb.build().execute(&mut *conn).await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(self.schema.resource(), id));
        }
        debug!(resource = %self.schema.resource(), id, "Updated record");
        Ok(())
    }

    /// Soft-deletes the active rows among `ids`.
    ///
    /// Returns how many rows changed state; ids that are unknown or already
    /// deleted simply do not count.
    pub async fn delete(&self, conn: &mut SqliteConnection, ids: &[i64]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE ");
        qb.push(quote(self.schema.table()))
            .push(" SET ")
            .push(quote(DELETED_AT_COLUMN))
            .push(" = ")
            .push_bind(now_millis())
            .push(" WHERE ")
            .push(quote(DELETED_AT_COLUMN))
            .push(" = 0");
        self.push_id_list(&mut qb, ids);

        let affected = qb.build().execute(&mut *conn).await?.rows_affected();
        debug!(resource = %self.schema.resource(), requested = ids.len(), affected, "Deleted records");
        Ok(affected)
    }

    /// Brings soft-deleted rows among `ids` back. Returns rows affected.
    pub async fn restore(&self, conn: &mut SqliteConnection, ids: &[i64]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE ");
        qb.push(quote(self.schema.table()))
            .push(" SET ")
            .push(quote(DELETED_AT_COLUMN))
            .push(" = 0 WHERE ")
            .push(quote(DELETED_AT_COLUMN))
            .push(" != 0");
        self.push_id_list(&mut qb, ids);

        let affected = qb.build().execute(&mut *conn).await?.rows_affected();
        debug!(resource = %self.schema.resource(), affected, "Restored records");
        Ok(affected)
    }

    // =========================================================================
    // SQL Helpers
    // =========================================================================

    fn select_columns(&self) -> String {
        let mut columns = vec![
            quote(self.schema.identifier()),
            quote(CREATED_AT_COLUMN),
            quote(UPDATED_AT_COLUMN),
        ];
        columns.extend(self.schema.visible_fields().map(|f| quote(f.name())));
        columns.join(", ")
    }

    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>, query: &ListQuery) -> DbResult<()> {
        qb.push(" WHERE ").push(quote(DELETED_AT_COLUMN)).push(" = 0");

        for filter in &query.filters {
            qb.push(" AND ").push(quote(&filter.field));
            match filter.op {
                FilterOp::Eq => {
                    qb.push(" = ");
                    push_value(qb, filter.value.clone())?;
                }
                FilterOp::Contains => {
                    let term = match &filter.value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    qb.push(" LIKE ")
                        .push_bind(like_pattern(&term))
                        .push(" ESCAPE '\\'");
                }
            }
        }

        if let Some(search) = &query.search {
            let pattern = like_pattern(&search.term);
            qb.push(" AND (");
            {
                let mut any = qb.separated(" OR ");
                for field in &search.fields {
                    any.push(quote(field));
                    any.push_unseparated(" LIKE ");
                    any.push_bind_unseparated(pattern.clone());
                    any.push_unseparated(" ESCAPE '\\'");
                }
            }
            qb.push(")");
        }

        Ok(())
    }

    fn push_id_list(&self, qb: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
        qb.push(" AND ")
            .push(quote(self.schema.identifier()))
            .push(" IN (");
        {
            let mut list = qb.separated(", ");
            for id in ids {
                list.push_bind(*id);
            }
        }
        qb.push(")");
    }

    fn decode_row(&self, row: &SqliteRow) -> DbResult<GenericRecord> {
        let mut record = GenericRecord::new();
        record.insert(
            self.schema.identifier(),
            row.try_get::<i64, _>(self.schema.identifier())?,
        );
        record.insert(CREATED_AT_COLUMN, row.try_get::<i64, _>(CREATED_AT_COLUMN)?);
        record.insert(UPDATED_AT_COLUMN, row.try_get::<i64, _>(UPDATED_AT_COLUMN)?);

        for field in self.schema.visible_fields() {
            let value = decode_column(row, field.name(), field.kind())?;
            record.insert(field.name(), value);
        }
        Ok(record)
    }
}

/// Binds a value in its stored representation.
fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: Value) -> DbResult<()> {
    match value {
        Value::Null => qb.push_bind(None::<String>),
        Value::Bool(b) => qb.push_bind(b),
        Value::Integer(i) => qb.push_bind(i),
        Value::Float(x) => qb.push_bind(x),
        Value::String(s) => qb.push_bind(s),
        composite @ (Value::List(_) | Value::Object(_)) => qb.push_bind(serde_json::to_string(&composite)?),
    };
    Ok(())
}

fn decode_column(row: &SqliteRow, column: &str, kind: &FieldKind) -> DbResult<Value> {
    let value = match kind {
        FieldKind::String => row.try_get::<Option<String>, _>(column)?.map(Value::String),
        FieldKind::Integer => row.try_get::<Option<i64>, _>(column)?.map(Value::Integer),
        FieldKind::Float => row.try_get::<Option<f64>, _>(column)?.map(Value::Float),
        FieldKind::Bool => row.try_get::<Option<bool>, _>(column)?.map(Value::Bool),
        FieldKind::Object(_) | FieldKind::Sequence(_) | FieldKind::Map(_) => {
            match row.try_get::<Option<String>, _>(column)? {
                Some(text) => Some(Value::from(serde_json::from_str::<serde_json::Value>(&text)?)),
                None => None,
            }
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::transaction::scoped;
    use tessera_core::schema::{FieldDescriptor, NamingStrategy, SchemaBuilder};
    use tessera_core::{CoreError, Page};

    fn widget_schema() -> Arc<SchemaDescriptor> {
        Arc::new(
            SchemaBuilder::new("Widget", &NamingStrategy::default())
                .identifier("id")
                .tagged(FieldDescriptor::string("name"), "q,u,o")
                .tagged(FieldDescriptor::float("price"), "u,o")
                .tagged(FieldDescriptor::integer("stock"), "q")
                .field(FieldDescriptor::boolean("active"))
                .tagged(FieldDescriptor::sequence("tags", FieldKind::String), "u")
                .tagged(FieldDescriptor::string("secret").sensitive(), "u")
                .field(FieldDescriptor::string("sku").unique())
                .build()
                .unwrap(),
        )
    }

    async fn setup() -> (Database, GenericRepository) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let schema = widget_schema();
        db.register_resource(&schema).await.unwrap();
        let repo = db.repository(schema);
        (db, repo)
    }

    fn widget(name: &str, price: f64) -> GenericRecord {
        GenericRecord::new().with("name", name).with("price", price)
    }

    async fn list(db: &Database, repo: &GenericRepository, query: &str) -> Page<GenericRecord> {
        let query = ListQuery::from_query_string(repo.schema(), query);
        let mut conn = db.pool().acquire().await.unwrap();
        repo.list(&mut conn, &query).await.unwrap()
    }

    async fn active_rows(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM widgets WHERE deleted_at = 0")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_get_round_trips() {
        let (db, repo) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let raw = widget("anvil", 9.5)
            .with("stock", "12")
            .with("active", "true")
            .with("tags", Value::List(vec!["heavy".into(), "iron".into()]))
            .with("id", 99i64)
            .with("deleted_at", 5i64)
            .with("color", "red");
        let created = repo.create(&mut conn, raw).await.unwrap();

        let id = created.get("id").and_then(Value::as_i64).unwrap();
        assert_ne!(id, 99);
        let fetched = repo.get(&mut conn, id).await.unwrap();

        assert_eq!(fetched, created);
        assert_eq!(fetched.get("name"), Some(&Value::from("anvil")));
        assert_eq!(fetched.get("price"), Some(&Value::Float(9.5)));
        assert_eq!(fetched.get("stock"), Some(&Value::Integer(12)));
        assert_eq!(fetched.get("active"), Some(&Value::Bool(true)));
        assert_eq!(
            fetched.get("tags"),
            Some(&Value::List(vec!["heavy".into(), "iron".into()]))
        );
        assert!(fetched.get("created_at").and_then(Value::as_i64).unwrap() > 0);
        assert!(!fetched.contains("deleted_at"));
        assert!(!fetched.contains("color"));
    }

    #[tokio::test]
    async fn test_omitted_fields_read_back_as_defaults() {
        let (db, repo) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let created = repo
            .create(&mut conn, GenericRecord::new().with("name", "bare"))
            .await
            .unwrap();

        assert_eq!(created.get("price"), Some(&Value::Float(0.0)));
        assert_eq!(created.get("active"), Some(&Value::Bool(false)));
        assert_eq!(created.get("tags"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_sensitive_field_is_stored_but_never_returned() {
        let (db, repo) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let created = repo
            .create(&mut conn, widget("vault", 1.0).with("secret", "hunter2"))
            .await
            .unwrap();
        assert!(!created.contains("secret"));

        let stored: String = sqlx::query_scalar("SELECT secret FROM widgets WHERE name = 'vault'")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(stored, "hunter2");
        drop(conn);

        let page = list(&db, &repo, "search=hunter").await;
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_update_applies_only_updatable_fields() {
        let (db, repo) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        repo.create(&mut conn, widget("a", 1.0).with("stock", 3i64)).await.unwrap();

        // stock is queryable only
        let err = repo
            .update(&mut conn, 1, GenericRecord::new().with("stock", 50i64))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Invalid(CoreError::WhitelistViolation { .. })));

        repo.update(&mut conn, 1, GenericRecord::new().with("stock", 50i64).with("price", "2.5"))
            .await
            .unwrap();
        let fetched = repo.get(&mut conn, 1).await.unwrap();
        assert_eq!(fetched.get("price"), Some(&Value::Float(2.5)));
        assert_eq!(fetched.get("stock"), Some(&Value::Integer(3)));
    }

    #[tokio::test]
    async fn test_update_of_missing_or_deleted_row_is_not_found() {
        let (db, repo) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        repo.create(&mut conn, widget("a", 1.0)).await.unwrap();
        repo.delete(&mut conn, &[1]).await.unwrap();

        for id in [1, 42] {
            let err = repo
                .update(&mut conn, id, GenericRecord::new().with("price", 3.0))
                .await
                .unwrap_err();
            assert!(matches!(err, DbError::NotFound { .. }));
        }
    }

    #[tokio::test]
    async fn test_update_many_validates_before_writing() {
        let (db, repo) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        repo.create_many(&mut conn, vec![widget("a", 1.0), widget("b", 2.0)])
            .await
            .unwrap();

        let bad = vec![
            GenericRecord::new().with("id", 1i64).with("name", "z"),
            GenericRecord::new().with("name", "no id"),
        ];
        assert!(repo.update_many(&mut conn, bad).await.is_err());
        assert_eq!(repo.get(&mut conn, 1).await.unwrap().get("name"), Some(&Value::from("a")));

        let good = vec![
            GenericRecord::new().with("id", 1i64).with("name", "x"),
            GenericRecord::new().with("id", "2").with("price", 7.0),
        ];
        assert_eq!(repo.update_many(&mut conn, good).await.unwrap(), 2);
        assert_eq!(repo.get(&mut conn, 1).await.unwrap().get("name"), Some(&Value::from("x")));
        assert_eq!(repo.get(&mut conn, 2).await.unwrap().get("price"), Some(&Value::Float(7.0)));
    }

    #[tokio::test]
    async fn test_counter_tracks_create_delete_restore() {
        let (db, repo) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        repo.create_many(
            &mut conn,
            (0..5).map(|i| widget(&format!("w{}", i), i as f64)).collect(),
        )
        .await
        .unwrap();
        assert_eq!(repo.delete(&mut conn, &[1, 2, 3]).await.unwrap(), 3);
        assert_eq!(repo.restore(&mut conn, &[2, 4]).await.unwrap(), 1);
        drop(conn);

        let cached = {
            let mut conn = db.pool().acquire().await.unwrap();
            repo.counter().read(&mut conn).await
        };
        assert_eq!(cached, Some(3));
        assert_eq!(active_rows(&db).await, 3);
        assert_eq!(list(&db, &repo, "").await.total, 3);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (db, repo) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        repo.create(&mut conn, widget("a", 1.0)).await.unwrap();

        assert_eq!(repo.delete(&mut conn, &[1]).await.unwrap(), 1);
        assert_eq!(repo.delete(&mut conn, &[1]).await.unwrap(), 0);
        assert_eq!(repo.delete(&mut conn, &[77]).await.unwrap(), 0);
        assert_eq!(repo.delete(&mut conn, &[]).await.unwrap(), 0);
        assert!(matches!(repo.get(&mut conn, 1).await, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_pagination_covers_every_row_once() {
        let (db, repo) = setup().await;
        {
            let mut conn = db.pool().acquire().await.unwrap();
            repo.create_many(
                &mut conn,
                (0..23).map(|i| widget(&format!("w{:02}", i), (i % 4) as f64)).collect(),
            )
            .await
            .unwrap();
        }

        let mut seen = Vec::new();
        for page in 1..=5 {
            let result = list(&db, &repo, &format!("page={}&page_size=5&order=id", page)).await;
            assert_eq!(result.total, 23);
            seen.extend(result.data.iter().filter_map(|r| r.get("id").and_then(Value::as_i64)));
        }

        assert_eq!(seen, (1..=23).collect::<Vec<i64>>());
        assert!(list(&db, &repo, "page=6&page_size=5").await.data.is_empty());
    }

    #[tokio::test]
    async fn test_default_and_requested_order() {
        let (db, repo) = setup().await;
        {
            let mut conn = db.pool().acquire().await.unwrap();
            repo.create_many(&mut conn, vec![widget("b", 2.0), widget("c", 1.0), widget("a", 3.0)])
                .await
                .unwrap();
        }

        let names = |page: Page<GenericRecord>| -> Vec<String> {
            page.data
                .iter()
                .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
                .collect()
        };

        assert_eq!(names(list(&db, &repo, "").await), vec!["a", "c", "b"]);
        assert_eq!(names(list(&db, &repo, "order=name").await), vec!["a", "b", "c"]);
        assert_eq!(names(list(&db, &repo, "order=-price").await), vec!["a", "b", "c"]);
        // stock is not orderable: store default
        assert_eq!(list(&db, &repo, "order=stock").await.data.len(), 3);
    }

    #[tokio::test]
    async fn test_filters_and_search() {
        let (db, repo) = setup().await;
        {
            let mut conn = db.pool().acquire().await.unwrap();
            repo.create_many(
                &mut conn,
                vec![
                    widget("alpha", 1.0).with("stock", 5i64),
                    widget("beta", 2.0).with("stock", 5i64),
                    widget("100%_pure", 3.0).with("stock", 1i64),
                ],
            )
            .await
            .unwrap();
        }

        let page = list(&db, &repo, "search=a").await;
        assert_eq!(page.total, 2);

        let page = list(&db, &repo, "stock=5&name_contains=et").await;
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].get("name"), Some(&Value::from("beta")));

        // wildcards in the term match literally
        assert_eq!(list(&db, &repo, "search=%25_").await.total, 1);
        assert_eq!(list(&db, &repo, "name_contains=_").await.total, 1);

        // price is not queryable, so the filter is dropped
        assert_eq!(list(&db, &repo, "price=1").await.total, 3);
    }

    #[tokio::test]
    async fn test_missing_counter_falls_back_to_direct_count() {
        let (db, repo) = setup().await;
        {
            let mut conn = db.pool().acquire().await.unwrap();
            repo.create(&mut conn, widget("a", 1.0)).await.unwrap();
        }
        sqlx::query("DELETE FROM counters").execute(db.pool()).await.unwrap();

        assert_eq!(list(&db, &repo, "").await.total, 1);
    }

    #[tokio::test]
    async fn test_unique_field_rejects_duplicates() {
        let (db, repo) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        repo.create(&mut conn, widget("a", 1.0).with("sku", "A-1")).await.unwrap();

        let err = repo
            .create(&mut conn, widget("b", 1.0).with("sku", "A-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_unique_value_can_be_deleted_and_reused_repeatedly() {
        let (db, repo) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        // fast enough that several tombstones share a deletion millisecond
        for _ in 0..25 {
            let created = repo
                .create(&mut conn, widget("a", 1.0).with("sku", "A-1"))
                .await
                .unwrap();
            let id = created.get("id").and_then(Value::as_i64).unwrap();
            assert_eq!(repo.delete(&mut conn, &[id]).await.unwrap(), 1);
        }

        let tombstones: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM widgets WHERE sku = 'A-1'")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(tombstones, 25);
        drop(conn);
        assert_eq!(active_rows(&db).await, 0);
    }

    #[tokio::test]
    async fn test_batch_create_is_atomic_inside_scope() {
        let (db, repo) = setup().await;
        let batch: Vec<GenericRecord> = (0..5)
            .map(|i| {
                if i == 2 {
                    widget("bad", 1.0).with("stock", "lots")
                } else {
                    widget(&format!("w{}", i), 1.0)
                }
            })
            .collect();

        let scoped_repo = repo.clone();
        let result = scoped(&db, |scope| async move {
            let mut conn = scope.connection().await?;
            let created = scoped_repo.create_many(&mut conn, batch).await;
            created
        })
        .await;

        assert!(matches!(result, Err(DbError::Invalid(_))));
        assert_eq!(active_rows(&db).await, 0);
        assert_eq!(list(&db, &repo, "").await.total, 0);
    }
}
