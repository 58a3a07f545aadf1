//! # Repository Module
//!
//! Schema-driven data access. There is one repository type. It is
//! parameterized by a [`SchemaDescriptor`](tessera_core::SchemaDescriptor)
//! instead of being written once per record type.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    One Repository, Many Resources                       │
//! │                                                                         │
//! │  HTTP handler                                                          │
//! │       │                                                                 │
//! │       │  db.repository(schema).list(&mut conn, &query)                 │
//! │       ▼                                                                 │
//! │  GenericRepository { schema: widgets }                                 │
//! │  ├── list(conn, query)        → Page<GenericRecord>                    │
//! │  ├── get(conn, id)            → GenericRecord                          │
//! │  ├── create(conn, record)     → GenericRecord                          │
//! │  ├── update(conn, id, raw)    → ()                                     │
//! │  ├── delete(conn, ids)        → rows affected                          │
//! │  └── restore(conn, ids)       → rows affected                          │
//! │       │                                                                 │
//! │       │  SQL built from the descriptor, never from request keys        │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every method takes the connection it runs on, normally the one owned by
//! the request's [`TransactionScope`](crate::TransactionScope).

pub mod generic;

pub use generic::GenericRepository;
