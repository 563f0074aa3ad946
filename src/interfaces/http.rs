//! Admin HTTP surface over the lock inspector.
//!
//! Routes:
//! - `GET /health`
//! - `GET /mutex` lists every tracked transaction id
//! - `GET /mutex/status` reports holder state per id
//! - `GET /mutex/stale[?kind=jar]` lists records persisted mid-transaction
//! - `GET|POST /mutex/unlock/:id[?clear=true]` force-releases a lock

use crate::application::inspector::LockInspector;
use crate::application::lock_registry::LockStatus;
use crate::domain::record::StoredRecord;
use crate::error::GuardError;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct AdminState {
    pub inspector: LockInspector,
}

impl AdminState {
    pub fn new(inspector: LockInspector) -> Self {
        Self { inspector }
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/mutex", get(list_ids))
        .route("/mutex/status", get(status))
        .route("/mutex/stale", get(stale))
        .route("/mutex/unlock/:id", get(unlock).post(unlock))
        .with_state(state)
}

/// Error body returned by every admin route.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub struct ApiError(GuardError);

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            GuardError::NotFound(_) => StatusCode::NOT_FOUND,
            GuardError::Validation(_) => StatusCode::BAD_REQUEST,
            GuardError::TransactionTimeout { .. } | GuardError::RateLimited => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GuardError::NotActive(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Admin request failed");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct IdsResponse {
    ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct UnlockResponse {
    id: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cleared: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct UnlockParams {
    #[serde(default)]
    clear: bool,
}

#[derive(Debug, Default, Deserialize)]
struct StaleParams {
    kind: Option<String>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_ids(State(state): State<AdminState>) -> Json<IdsResponse> {
    Json(IdsResponse {
        ids: state.inspector.tracked(),
    })
}

async fn status(State(state): State<AdminState>) -> Json<Vec<LockStatus>> {
    Json(state.inspector.status())
}

async fn stale(
    State(state): State<AdminState>,
    Query(params): Query<StaleParams>,
) -> Result<Json<Vec<StoredRecord>>, ApiError> {
    let records = state
        .inspector
        .stale_records(params.kind.as_deref())
        .await?;
    Ok(Json(records))
}

async fn unlock(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Query(params): Query<UnlockParams>,
) -> Result<Json<UnlockResponse>, ApiError> {
    // A restarted process has no registry entry for a record stranded by its
    // predecessor, so an unknown id is only fatal when nothing gets cleared.
    let released = match state.inspector.force_unlock(&id) {
        Ok(released) => released,
        Err(GuardError::NotFound(_)) if params.clear => false,
        Err(e) => return Err(e.into()),
    };

    let cleared = if params.clear {
        Some(state.inspector.clear_stale(&id).await?)
    } else {
        None
    };

    tracing::info!(id = %id, released, ?cleared, "Admin unlock");
    Ok(Json(UnlockResponse {
        id,
        status: if released { "unlocked" } else { "not_held" },
        cleared,
    }))
}
