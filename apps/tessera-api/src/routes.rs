//! # Routes
//!
//! The same seven routes are mounted for every registered resource.
//!
//! ```text
//! GET    /<resource>        list      ?page&page_size&search&order&<field>&<field>_contains
//! POST   /<resource>        create    object → 201 object, array → 201 array
//! PUT    /<resource>        update    {"objs": [{"id": .., ..}, ..]}
//! DELETE /<resource>        delete    {"ids": [..]} | ?ids=1,2 | form ids=[..]
//! GET    /<resource>/{id}   get
//! PUT    /<resource>/{id}   update    object of updatable fields
//! DELETE /<resource>/{id}   delete
//! GET    /health            liveness (no transaction)
//! ```

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, RawQuery, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Serialize;
use serde_json::json;
use tessera_core::binder::{parse_id_str, resolve_ids, Payload};
use tessera_core::{GenericRecord, ListQuery, Page};
use tessera_db::{Database, GenericRepository, TransactionScope};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::binder::RawBody;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{request_context, transaction_scope};
use crate::state::AppState;

/// Transaction handle placed in request extensions by the middleware.
type Scope = Extension<Arc<TransactionScope>>;

/// Acknowledgement body for mutations.
#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Message {
            message: message.into(),
        })
    }
}

// =============================================================================
// Router
// =============================================================================

/// Builds the full application router.
pub fn build_router(state: AppState) -> Router {
    let mut resources = Router::new();
    for schema in &state.schemas {
        let path = format!("/{}", schema.resource());
        debug!(%path, "Mounting resource");
        resources = resources.nest(&path, resource_router(state.db.repository(Arc::clone(schema))));
    }
    let resources = resources.layer(from_fn_with_state(state.db.clone(), transaction_scope));

    Router::new()
        .route("/health", get(health))
        .with_state(state.db.clone())
        .merge(resources)
        .layer(DefaultBodyLimit::max(state.body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_context))
}

/// Routes for one resource, bound to its repository.
pub fn resource_router(repo: GenericRepository) -> Router {
    Router::new()
        .route("/", get(list).post(create).put(update_many).delete(delete_many))
        .route("/{id}", get(get_one).put(update_one).delete(delete_one))
        .with_state(repo)
}

// =============================================================================
// Handlers
// =============================================================================

async fn health(State(db): State<Database>) -> Response {
    if db.health_check().await {
        Json(json!({ "status": "ok" })).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "unavailable" }))).into_response()
    }
}

async fn list(
    State(repo): State<GenericRepository>,
    Extension(scope): Scope,
    RawQuery(query): RawQuery,
) -> ApiResult<Json<Page<GenericRecord>>> {
    let query = ListQuery::from_query_string(repo.schema(), query.as_deref().unwrap_or_default());
    let mut conn = scope.connection().await?;
    let page = repo.list(&mut conn, &query).await?;
    Ok(Json(page))
}

async fn get_one(
    State(repo): State<GenericRepository>,
    Extension(scope): Scope,
    Path(id): Path<String>,
) -> ApiResult<Json<GenericRecord>> {
    let id = path_id(&id)?;
    let mut conn = scope.connection().await?;
    let record = repo.get(&mut conn, id).await?;
    Ok(Json(record))
}

async fn create(
    State(repo): State<GenericRepository>,
    Extension(scope): Scope,
    body: RawBody,
) -> ApiResult<Response> {
    let payload = body.payload().await?;
    let is_batch = matches!(payload, Payload::Json(serde_json::Value::Array(_)));
    let records = payload.into_records()?;

    let mut conn = scope.connection().await?;
    let mut created = repo.create_many(&mut conn, records).await?;

    let response = if is_batch {
        (StatusCode::CREATED, Json(created)).into_response()
    } else {
        match created.pop() {
            Some(record) => (StatusCode::CREATED, Json(record)).into_response(),
            None => return Err(ApiError::internal("Nothing was created")),
        }
    };
    Ok(response)
}

async fn update_one(
    State(repo): State<GenericRepository>,
    Extension(scope): Scope,
    Path(id): Path<String>,
    body: RawBody,
) -> ApiResult<Json<Message>> {
    let id = path_id(&id)?;
    let raw = body.payload().await?.into_single_record()?;

    let mut conn = scope.connection().await?;
    repo.update(&mut conn, id, raw).await?;
    Ok(Message::new("single update successful"))
}

async fn update_many(
    State(repo): State<GenericRepository>,
    Extension(scope): Scope,
    body: RawBody,
) -> ApiResult<Json<Message>> {
    let objects = body.payload().await?.batch_objects()?;

    let mut conn = scope.connection().await?;
    repo.update_many(&mut conn, objects).await?;
    Ok(Message::new("batch update successful"))
}

async fn delete_one(
    State(repo): State<GenericRepository>,
    Extension(scope): Scope,
    Path(id): Path<String>,
) -> ApiResult<Json<Message>> {
    let id = path_id(&id)?;
    let mut conn = scope.connection().await?;
    let deleted = repo.delete(&mut conn, &[id]).await?;
    Ok(Message::new(format!("deleted {}", deleted)))
}

async fn delete_many(
    State(repo): State<GenericRepository>,
    Extension(scope): Scope,
    RawQuery(query): RawQuery,
    body: RawBody,
) -> ApiResult<Json<Message>> {
    // A body that does not parse is not an id source; the query may still be.
    let payload = match body.optional_payload().await {
        Ok(payload) => payload,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable delete body");
            None
        }
    };
    let query_ids = query.as_deref().and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(key, _)| key == "ids")
            .map(|(_, value)| value.into_owned())
    });
    let ids = resolve_ids(payload.as_ref(), query_ids.as_deref())?;

    let mut conn = scope.connection().await?;
    let deleted = repo.delete(&mut conn, &ids).await?;
    Ok(Message::new(format!("deleted {}", deleted)))
}

/// An id that does not parse cannot name a record.
fn path_id(raw: &str) -> ApiResult<i64> {
    parse_id_str(raw).map_err(|_| ApiError::not_found())
}

// =============================================================================
// Router Tests
// =============================================================================
