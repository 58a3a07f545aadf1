//! # Request Middleware
//!
//! ## Layer Order (outermost first)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  request_context     trace_id span + x-trace-id response header        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  TraceLayer          method / path / status / latency                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  transaction_scope   resource routes only, /health is outside          │
//! │       │                                                                 │
//! │       │   begin ──► handler ──┬── panic ────────► rollback, re-panic   │
//! │       │                       ├── error marked ─► rollback             │
//! │       │                       └── ok ───────────► commit               │
//! │       │                                           (fails → 500)        │
//! │       ▼                                                                 │
//! │  handler                                                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use tessera_db::{Database, ScopeState};
use tracing::{debug, error, info_span, Instrument};
use uuid::Uuid;

use crate::error::{ApiError, RecordedError};

/// Response header echoing the request's trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Opens one transaction per request and settles it once the handler is done.
///
/// Handlers reach the transaction through
/// `Extension<Arc<TransactionScope>>`.
pub async fn transaction_scope(State(db): State<Database>, mut request: Request, next: Next) -> Response {
    let scope = match db.begin().await {
        Ok(scope) => Arc::new(scope),
        Err(e) => return ApiError::from(e).into_response(),
    };
    request.extensions_mut().insert(Arc::clone(&scope));

    let response = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            if let Err(e) = scope.rollback().await {
                error!(error = %e, "Rollback after handler panic failed");
            }
            std::panic::resume_unwind(panic)
        }
    };

    if response.extensions().get::<RecordedError>().is_some() || !response.status().is_success() {
        scope.record_error();
    }

    match scope.finish().await {
        Ok(ScopeState::RolledBack) => {
            debug!(status = %response.status(), "Request rolled back");
            response
        }
        Ok(_) => response,
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Tags everything logged for a request with a fresh trace id and returns
/// the id to the client.
pub async fn request_context(request: Request, next: Next) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "request",
        trace_id = %trace_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}
