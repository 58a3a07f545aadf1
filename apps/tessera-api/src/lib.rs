//! # Tessera API
//!
//! REST surface over tessera-db. Every registered resource gets the same
//! CRUD routes; every request to them runs in one SQLite transaction.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  HTTP ──► request_context ──► transaction_scope ──► handler            │
//! │                                      │                 │                │
//! │                                      │          RawBody ──► Payload     │
//! │                                      │                 │                │
//! │                                      │                 ▼                │
//! │                                      │        GenericRepository         │
//! │                                      │                 │                │
//! │                                      ▼                 ▼                │
//! │                               commit / rollback ◄── ApiError?          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod binder;
pub mod config;
pub mod error;
pub mod middleware;
pub mod resources;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{ApiConfig, ConfigError};
pub use error::{ApiError, ApiResult, ErrorCode, StartupError};
pub use routes::build_router;
pub use state::AppState;
