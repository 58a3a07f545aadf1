//! # tessera-core: Schemas, Values and Binding
//!
//! This crate holds everything Tessera can decide without a database:
//! what a record type looks like, how request payloads become records, and
//! which parts of a list request are allowed to reach SQL.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tessera Request Flow                             │
//! │                                                                         │
//! │  HTTP request (GET /widget?name=foo, POST /widget, ...)                 │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tessera-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │  schema   │  │  binder   │  │   query   │  │ validation│  │   │
//! │  │   │ Resource  │  │  Payload  │  │ ListQuery │  │ whitelist │  │   │
//! │  │   │ Registry  │  │  coerce   │  │  Filter   │  │  updates  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 tessera-db (Database Layer)                     │   │
//! │  │        generic repository, counter cache, transactions          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`schema`] - Field descriptors, capabilities, the `Resource` trait and registry
//! - [`value`] - `Value` and `GenericRecord`, the type-erased record
//! - [`binder`] - Payload parsing and value coercion
//! - [`validation`] - Update whitelisting
//! - [`query`] - List request planning
//! - [`types`] - System columns and soft-delete state
//! - [`error`] - Binding, schema and core errors
//!
//! ## Example Usage
//!
//! ```rust
//! use tessera_core::schema::{FieldDescriptor, Resource, SchemaBuilder, SchemaRegistry};
//! use tessera_core::query::ListQuery;
//!
//! struct Widget;
//!
//! impl Resource for Widget {
//!     const TYPE_NAME: &'static str = "Widget";
//!
//!     fn declare(schema: SchemaBuilder) -> SchemaBuilder {
//!         schema
//!             .identifier("id")
//!             .tagged(FieldDescriptor::string("name"), "q,u,o")
//!             .tagged(FieldDescriptor::float("price"), "u,o")
//!     }
//! }
//!
//! let registry = SchemaRegistry::default();
//! let schema = registry.describe::<Widget>().unwrap();
//! assert_eq!(schema.table(), "widgets");
//!
//! // price is not Queryable, so the filter is dropped
//! let query = ListQuery::from_query_string(&schema, "price=3&order=-price");
//! assert!(query.filters.is_empty());
//! assert!(query.order.is_some());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod binder;
pub mod error;
pub mod query;
pub mod schema;
pub mod types;
pub mod validation;
pub mod value;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{BindingError, CoreError, CoreResult, SchemaError};
pub use query::{ListQuery, Page};
pub use schema::{FieldDescriptor, FieldKind, Resource, SchemaBuilder, SchemaDescriptor, SchemaRegistry};
pub use types::*;
pub use value::{GenericRecord, Value};
