use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::auth::{self, Actor, Capability};
use crate::engine::payouts;
use crate::error::AppError;
use crate::models::payout::Payout;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/couriers/:id/payouts",
            post(create_payout).get(list_payouts),
        )
        .route("/couriers/:id/payouts/summary", get(payout_summary))
        .route("/payouts/transfer-callback", post(transfer_callback))
}

async fn create_payout(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::RunPayouts)?;

    let payout = payouts::create_weekly_payout(&state, id).await?;
    Ok(Json(json!({ "payout": payout })))
}

async fn list_payouts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Payout>>, AppError> {
    if !state.couriers.contains_key(&id) {
        return Err(AppError::NotFound(format!("courier {id} not found")));
    }

    let mut payouts: Vec<Payout> = state
        .payouts
        .iter()
        .filter(|entry| entry.courier_id == id)
        .map(|entry| entry.value().clone())
        .collect();
    payouts.sort_by_key(|p| p.created_at);

    Ok(Json(payouts))
}

#[derive(Deserialize)]
pub struct TransferCallbackRequest {
    pub reference: String,
    /// Provider-side terminal state: "completed" or "failed".
    pub status: String,
}

async fn transfer_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<TransferCallbackRequest>,
) -> Result<Json<Payout>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::RunPayouts)?;

    let succeeded = match payload.status.as_str() {
        "completed" => true,
        "failed" => false,
        other => {
            return Err(AppError::Validation(format!(
                "unknown transfer status: {other}"
            )));
        }
    };

    let payout = payouts::apply_transfer_callback(&state, &payload.reference, succeeded)?;
    Ok(Json(payout))
}

async fn payout_summary(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<payouts::PayoutSummary>, AppError> {
    let summary = payouts::get_payout_summary(&state, id)?;
    Ok(Json(summary))
}
