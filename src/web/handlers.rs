//! HTTP request handlers.

use super::{AppState, MAX_BODY_BYTES};
use crate::auth::{AuthError, Caller};
use crate::catalog::Catalog;
use crate::db::Outage;
use crate::outage::{EntryOutcome, HealthReport, NewOutage, OutageError, OutagePatch, Transition};
use crate::status::{ComponentStatus, SubComponentStatus};

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
    Extension,
};
use chrono::Utc;
use serde::Serialize;

// ============================================================================
// Errors
// ============================================================================

/// Error returned by API handlers.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(AuthError),
    Outage(OutageError),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Unauthorized(e)
    }
}

impl From<OutageError> for ApiError {
    fn from(e: OutageError) -> Self {
        ApiError::Outage(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(e) => {
                // Callers get the same answer whatever went wrong.
                tracing::debug!("Rejected request: {}", e);
                (StatusCode::UNAUTHORIZED, "unauthorized".to_string())
            }
            ApiError::Outage(e) => match e {
                OutageError::Validation(_) => (StatusCode::BAD_REQUEST, e.to_string()),
                OutageError::UnknownComponent(_)
                | OutageError::UnknownSubComponent { .. }
                | OutageError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
                OutageError::Conflict(_) => (StatusCode::CONFLICT, e.to_string()),
                OutageError::Storage(ref err) => {
                    tracing::error!("Storage failure: {}", err);
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
                }
            },
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Verify credentials over the raw body, then hand the request on with the
/// [`Caller`] attached.
pub async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!("Failed to read request body: {}", e);
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    match state.auth.authenticate(&parts.method, &parts.uri, &parts.headers, &bytes) {
        Ok(caller) => {
            let mut req = Request::from_parts(parts, Body::from(bytes));
            req.extensions_mut().insert(caller);
            next.run(req).await
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

// ============================================================================
// API: Reports
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub results: Vec<EntryOutcome>,
}

pub async fn handle_report(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(report): Json<HealthReport>,
) -> Result<Json<ReportResponse>, ApiError> {
    tracing::debug!(
        "Report from {} ({:?}) with {} entries",
        report.monitor,
        caller,
        report.statuses.len()
    );
    let results = state.controller.ingest(&report)?;
    Ok(Json(ReportResponse { results }))
}

// ============================================================================
// API: Status
// ============================================================================

pub async fn handle_get_status(State(state): State<AppState>) -> Result<Json<Vec<ComponentStatus>>, ApiError> {
    Ok(Json(state.status.all(Utc::now())?))
}

pub async fn handle_get_component_status(
    State(state): State<AppState>,
    Path(component): Path<String>,
) -> Result<Json<ComponentStatus>, ApiError> {
    Ok(Json(state.status.component(&component, Utc::now())?))
}

pub async fn handle_get_sub_component_status(
    State(state): State<AppState>,
    Path((component, sub_component)): Path<(String, String)>,
) -> Result<Json<SubComponentStatus>, ApiError> {
    Ok(Json(state.status.sub_component(&component, &sub_component, Utc::now())?))
}

// ============================================================================
// API: Catalog
// ============================================================================

pub async fn handle_get_components(State(state): State<AppState>) -> Json<Catalog> {
    Json(state.catalog.get().as_ref().clone())
}

// ============================================================================
// API: Outages
// ============================================================================

pub async fn handle_list_outages(
    State(state): State<AppState>,
    Path((component, sub_component)): Path<(String, String)>,
) -> Result<Json<Vec<Outage>>, ApiError> {
    Ok(Json(state.controller.list_outages(&component, &sub_component)?))
}

pub async fn handle_create_outage(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((component, sub_component)): Path<(String, String)>,
    Json(req): Json<NewOutage>,
) -> Result<(StatusCode, Json<Outage>), ApiError> {
    let user = caller.user()?;
    let (transition, outage) = state
        .controller
        .create_outage(&component, &sub_component, &req, user)?;

    let status = match transition {
        Transition::Created { .. } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outage)))
}

pub async fn handle_get_outage(
    State(state): State<AppState>,
    Path((component, sub_component, id)): Path<(String, String, i64)>,
) -> Result<Json<Outage>, ApiError> {
    Ok(Json(state.controller.get_outage(&component, &sub_component, id)?))
}

pub async fn handle_update_outage(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((component, sub_component, id)): Path<(String, String, i64)>,
    Json(patch): Json<OutagePatch>,
) -> Result<Json<Outage>, ApiError> {
    let user = caller.user()?;
    Ok(Json(
        state
            .controller
            .update_outage(&component, &sub_component, id, &patch, user)?,
    ))
}

pub async fn handle_confirm_outage(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((component, sub_component, id)): Path<(String, String, i64)>,
) -> Result<Json<Outage>, ApiError> {
    let user = caller.user()?;
    Ok(Json(state.controller.confirm_outage(&component, &sub_component, id, user)?))
}

pub async fn handle_resolve_outage(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((component, sub_component, id)): Path<(String, String, i64)>,
) -> Result<Json<Outage>, ApiError> {
    let user = caller.user()?;
    Ok(Json(state.controller.resolve_outage(&component, &sub_component, id, user)?))
}

pub async fn handle_delete_outage(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((component, sub_component, id)): Path<(String, String, i64)>,
) -> Result<StatusCode, ApiError> {
    let user = caller.user()?;
    state.controller.delete_outage(&component, &sub_component, id)?;
    tracing::info!("{} deleted outage {}", user, id);
    Ok(StatusCode::NO_CONTENT)
}
