//! # tessera-db: Database Layer for Tessera
//!
//! Executes the plans built by `tessera-core` against SQLite, using sqlx for
//! async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tessera Data Flow                                │
//! │                                                                         │
//! │  HTTP handler (GET /widgets?search=a)                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   tessera-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Generic      │    │  Counter     │  │   │
//! │  │   │   (pool.rs)   │    │  Repository   │    │  Cache       │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ SqlitePool    │    │ list / get    │───►│ counters     │  │   │
//! │  │   │ Transaction   │◄───│ create        │    │ + triggers   │  │   │
//! │  │   │ Scope         │    │ update/delete │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   one table per resource + counters                            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded migrations and resource table bootstrap
//! - [`counter`] - Trigger-maintained row counts
//! - [`transaction`] - Per-request transaction scope
//! - [`repository`] - Schema-driven CRUD
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_db::{scoped, Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/tessera.db")).await?;
//! let schema = registry.describe::<Widget>()?;
//! db.register_resource(&schema).await?;
//!
//! let repo = db.repository(schema);
//! let page = scoped(&db, |scope| async move {
//!     let mut conn = scope.connection().await?;
//!     repo.list(&mut conn, &query).await
//! })
//! .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod counter;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod transaction;

// =============================================================================
// Re-exports
// =============================================================================

pub use counter::CounterCache;
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use repository::GenericRepository;
pub use transaction::{scoped, ScopeState, TransactionScope};
