//! JSON-over-HTTP surface for the catalog.
//!
//! Every handler is a thin adapter: decode the request, call into the
//! catalog, reservation engine or redemption ledger, and encode the result.
//! Domain errors become [`ApiError`]s with a stable `{code, message}` body.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, CatalogError};
use crate::model::*;
use crate::observability::record_operation;
use crate::redemption::RedemptionLedger;
use crate::reservation::ReservationEngine;

/// Shared handler state.
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub reservations: ReservationEngine,
    pub redemptions: RedemptionLedger,
}

impl AppState {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            reservations: ReservationEngine::new(catalog.clone()),
            redemptions: RedemptionLedger::new(catalog.clone()),
            catalog,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/create-spot", post(create_spot))
        .route("/reserve/{spot_name}", post(reserve))
        .route("/redeem/{spot_id}/{ticket_id}", post(redeem))
        .route("/spots/{spot_name}/slots", get(list_slots))
        .with_state(state)
}

// ── Errors ───────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        let (status, code) = match &err {
            CatalogError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            CatalogError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            CatalogError::Invalid(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            CatalogError::Inconsistent(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INCONSISTENT"),
            CatalogError::TransactionFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TRANSACTION_FAILURE"),
            CatalogError::Identity(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR"),
        };
        Self { status, code, message: err.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, code = self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody { code: self.code.to_string(), message: self.message };
        (self.status, Json(body)).into_response()
    }
}

// ── Handlers ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedSpot {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ReserveParams {
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    now: Option<Secs>,
}

async fn create_spot(
    State(state): State<Arc<AppState>>,
    Json(spot): Json<SpotView>,
) -> Result<(StatusCode, Json<CreatedSpot>), ApiError> {
    let started = Instant::now();
    let result = state.catalog.create_spot(&spot).await;
    record_operation("create_spot", started, &result);
    Ok((StatusCode::CREATED, Json(CreatedSpot { id: result? })))
}

/// `null` body when the spot has nothing left.
async fn reserve(
    State(state): State<Arc<AppState>>,
    Path(spot_name): Path<String>,
    Query(params): Query<ReserveParams>,
) -> Result<Json<Option<TicketView>>, ApiError> {
    let started = Instant::now();
    let result = state.reservations.reserve(&spot_name, params.note, None).await;
    record_operation("reserve", started, &result);
    Ok(Json(result?))
}

async fn redeem(
    State(state): State<Arc<AppState>>,
    Path((spot_id, ticket_id)): Path<(i64, i64)>,
) -> Result<Json<i64>, ApiError> {
    let started = Instant::now();
    let result = state.redemptions.redeem(spot_id, ticket_id).await;
    record_operation("redeem", started, &result);
    Ok(Json(result?))
}

async fn list_slots(
    State(state): State<Arc<AppState>>,
    Path(spot_name): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<SlotView>>, ApiError> {
    let started = Instant::now();
    let now = params.now.unwrap_or_else(now_secs);
    let result = state
        .catalog
        .find_spot_id_by_name(&spot_name)
        .map(|spot_id| state.catalog.list_available_slots(spot_id, now));
    record_operation("list_slots", started, &result);
    Ok(Json(result?.iter().map(SlotRecord::to_view).collect()))
}
