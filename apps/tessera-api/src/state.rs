//! Shared application state.

use std::sync::Arc;

use tessera_core::{SchemaDescriptor, SchemaRegistry};
use tessera_db::Database;
use tracing::info;

use crate::error::StartupError;
use crate::resources;

/// Everything the router needs, built once at startup.
///
/// Cheap to clone: the database is a pool handle and the descriptors are
/// shared.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: Database,
    pub schemas: Vec<Arc<SchemaDescriptor>>,
    pub body_limit: usize,
}

impl AppState {
    /// Describes every resource and brings up its table and counter.
    ///
    /// Any failure here is a configuration error and should stop the
    /// process.
    pub async fn initialize(
        db: Database,
        registry: &SchemaRegistry,
        body_limit: usize,
    ) -> Result<Self, StartupError> {
        let schemas = resources::describe_all(registry)?;
        for schema in &schemas {
            db.register_resource(schema).await?;
        }
        info!(resources = schemas.len(), "Resources registered");

        Ok(AppState {
            db,
            schemas,
            body_limit,
        })
    }
}
