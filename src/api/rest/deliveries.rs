use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{self, Actor, Capability, Role};
use crate::engine::{dispatch, eta, lifecycle, tracker};
use crate::error::AppError;
use crate::geo::{haversine_km, travel_minutes};
use crate::models::courier::{GeoPoint, LocationFix};
use crate::models::delivery::{
    ChatMessage, Delivery, DeliveryStatus, NewDelivery, ProofOfDelivery, ProofType,
};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", post(create_delivery))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/assign", post(assign_delivery))
        .route("/deliveries/:id/accept", post(accept_delivery))
        .route("/deliveries/:id/reject", post(reject_delivery))
        .route("/deliveries/:id/status", put(update_status))
        .route("/deliveries/:id/location", put(update_location))
        .route("/deliveries/:id/eta", get(get_eta))
        .route("/deliveries/:id/pod", post(submit_pod))
        .route("/deliveries/:id/tip", post(add_tip))
        .route("/deliveries/:id/rate", post(rate_delivery))
        .route("/deliveries/:id/chat", post(post_chat_message))
        .route("/deliveries/track/:code", get(track_delivery))
}

const DEFAULT_BASE_FEE: f64 = 3.50;
const MAX_TIP: f64 = 100.0;
/// A position fix this recent counts as on-site evidence for POD.
const POD_FIX_WINDOW_SECS: i64 = 300;

#[derive(Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct CreateDeliveryRequest {
    pub order_id: Uuid,
    pub restaurant_id: Uuid,
    pub customer_id: Uuid,
    pub pickup: Endpoint,
    pub dropoff: Endpoint,
    pub base_fee: Option<f64>,
    #[serde(default)]
    pub priority: bool,
}

async fn create_delivery(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateDeliveryRequest>,
) -> Result<Json<Delivery>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::CreateDelivery)?;

    validate_point(&payload.pickup.location)?;
    validate_point(&payload.dropoff.location)?;

    let base_fee = payload.base_fee.unwrap_or(DEFAULT_BASE_FEE);
    if base_fee <= 0.0 {
        return Err(AppError::Validation("base_fee must be positive".to_string()));
    }

    let distance_km = haversine_km(&payload.pickup.location, &payload.dropoff.location);
    let duration_minutes =
        travel_minutes(distance_km, state.config.fallback_speed_kmh) + state.config.prep_buffer_minutes;

    let delivery = Delivery::create(
        NewDelivery {
            order_id: payload.order_id,
            restaurant_id: payload.restaurant_id,
            customer_id: payload.customer_id,
            pickup_address: payload.pickup.address,
            pickup_location: payload.pickup.location,
            delivery_address: payload.dropoff.address,
            delivery_location: payload.dropoff.location,
            base_fee,
            priority: payload.priority,
        },
        distance_km,
        duration_minutes,
        Utc::now(),
    );

    // One live delivery per order; the entry guard makes the check-and-claim
    // atomic. Released before the deliveries map is touched.
    match state.live_orders.entry(payload.order_id) {
        Entry::Occupied(existing) => {
            return Err(AppError::Conflict(format!(
                "order {} already has live delivery {}",
                payload.order_id,
                existing.get()
            )));
        }
        Entry::Vacant(slot) => {
            slot.insert(delivery.id);
        }
    }

    state
        .tracking_codes
        .insert(delivery.tracking_code.clone(), delivery.id);
    state.deliveries.insert(delivery.id, delivery.clone());
    state.metrics.deliveries_active.inc();

    Ok(Json(delivery))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .deliveries
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;

    Ok(Json(delivery.value().clone()))
}

#[derive(Deserialize, Default)]
pub struct AssignRequest {
    pub courier_id: Option<Uuid>,
    #[serde(default)]
    pub auto: bool,
}

async fn assign_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Delivery>, AppError> {
    let actor = Actor::from_headers(&headers)?;

    if payload.courier_id.is_none() && !payload.auto {
        return Err(AppError::Validation(
            "either courier_id or auto must be given".to_string(),
        ));
    }

    let delivery = dispatch::assign(
        &state,
        id,
        dispatch::AssignmentRequest {
            courier_id: payload.courier_id,
        },
        &actor,
    )?;

    Ok(Json(delivery))
}

async fn accept_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Delivery>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    let delivery =
        lifecycle::request_transition(&state, id, DeliveryStatus::Accepted, None, &actor)?;
    Ok(Json(delivery))
}

#[derive(Deserialize, Default)]
pub struct RejectRequest {
    pub note: Option<String>,
}

async fn reject_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<Delivery>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    let delivery = dispatch::reject_assignment(&state, id, &actor, payload.note)?;
    Ok(Json(delivery))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DeliveryStatus,
    pub note: Option<String>,
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Delivery>, AppError> {
    let actor = Actor::from_headers(&headers)?;

    // Assignment goes through the dispatcher so the courier side stays in sync.
    if payload.status == DeliveryStatus::Assigned {
        return Err(AppError::Validation(
            "use the assign endpoint to assign a courier".to_string(),
        ));
    }

    let delivery =
        lifecycle::request_transition(&state, id, payload.status, payload.note, &actor)?;
    Ok(Json(delivery))
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub lat: f64,
    pub lng: f64,
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Delivery>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    let delivery = tracker::update_location(&state, id, payload.lat, payload.lng, &actor)?;
    Ok(Json(delivery))
}

async fn get_eta(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<eta::EtaResult>, AppError> {
    let result = eta::get_eta(&state, id).await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct PodRequest {
    pub proof_type: ProofType,
    pub payload: Option<String>,
    pub otp_code: Option<String>,
    pub location: Option<GeoPoint>,
}

async fn submit_pod(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<PodRequest>,
) -> Result<Json<Delivery>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::SubmitProof)?;

    let now = Utc::now();

    let mut delivery = state
        .deliveries
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;

    auth::require_assignee(&actor, delivery.courier.courier_id())?;

    if !matches!(
        delivery.status,
        DeliveryStatus::Arrived | DeliveryStatus::Delivered
    ) {
        return Err(AppError::Conflict(format!(
            "delivery is {}, proof can only be submitted at the door",
            delivery.status.as_str()
        )));
    }
    if delivery.proof_of_delivery.is_some() {
        return Err(AppError::Conflict(
            "proof of delivery already recorded".to_string(),
        ));
    }

    let otp_verified = match payload.proof_type {
        ProofType::Otp => {
            let supplied = payload
                .otp_code
                .as_deref()
                .or(payload.payload.as_deref())
                .ok_or_else(|| {
                    AppError::Validation("otp proof requires otp_code".to_string())
                })?;
            Some(supplied == delivery.otp_code)
        }
        _ => None,
    };

    let location_verified = delivery
        .current_location
        .is_some_and(|fix| (now - fix.recorded_at).num_seconds() <= POD_FIX_WINDOW_SECS);

    delivery.proof_of_delivery = Some(ProofOfDelivery {
        proof_type: payload.proof_type,
        payload: payload.payload,
        otp_verified,
        location: payload.location,
        location_verified,
        submitted_at: now,
    });

    Ok(Json(delivery.clone()))
}

#[derive(Deserialize)]
pub struct TipRequest {
    pub amount: f64,
}

async fn add_tip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<TipRequest>,
) -> Result<Json<Delivery>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::TipDelivery)?;

    if payload.amount <= 0.0 || payload.amount > MAX_TIP {
        return Err(AppError::Validation(format!(
            "tip must be between 0 and {MAX_TIP}"
        )));
    }

    let now = Utc::now();

    let mut delivery = state
        .deliveries
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;

    if delivery.status != DeliveryStatus::Delivered {
        return Err(AppError::Conflict(
            "tips can only be added to a delivered order".to_string(),
        ));
    }
    if delivery.tip.is_some() {
        return Err(AppError::Conflict("tip already recorded".to_string()));
    }

    delivery.tip = Some(payload.amount);
    if let Some(earnings) = delivery.earnings.as_mut() {
        earnings.tip += payload.amount;
        earnings.total += payload.amount;
    }

    // Tips pass through to the courier in full.
    if let Some(courier_id) = delivery.courier.courier_id() {
        if let Some(mut courier) = state.couriers.get_mut(&courier_id) {
            courier.balance += payload.amount;
            courier.lifetime_earnings += payload.amount;
            courier.updated_at = now;
        }
    }

    Ok(Json(delivery.clone()))
}

#[derive(Deserialize)]
pub struct RateRequest {
    pub rating: u8,
    pub comment: Option<String>,
}

async fn rate_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<RateRequest>,
) -> Result<Json<Delivery>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::RateDelivery)?;

    if !(1..=5).contains(&payload.rating) {
        return Err(AppError::Validation(
            "rating must be an integer from 1 to 5".to_string(),
        ));
    }

    let now = Utc::now();

    let mut delivery = state
        .deliveries
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;

    if delivery.status != DeliveryStatus::Delivered {
        return Err(AppError::Conflict(
            "only delivered orders can be rated".to_string(),
        ));
    }
    if delivery.customer_rating.is_some() {
        return Err(AppError::Conflict("rating already recorded".to_string()));
    }

    delivery.customer_rating = Some(payload.rating);
    delivery.rating_comment = payload.comment;

    // Running average over this courier's rated deliveries.
    if let Some(courier_id) = delivery.courier.courier_id() {
        if let Some(mut courier) = state.couriers.get_mut(&courier_id) {
            let rated = courier.stats.rated_deliveries as f64;
            courier.stats.average_rating =
                (courier.stats.average_rating * rated + payload.rating as f64) / (rated + 1.0);
            courier.stats.rated_deliveries += 1;
            courier.updated_at = now;
        }
    }

    Ok(Json(delivery.clone()))
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub body: String,
}

async fn post_chat_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<Delivery>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::PostChatMessage)?;

    if payload.body.trim().is_empty() {
        return Err(AppError::Validation("message cannot be empty".to_string()));
    }

    let mut delivery = state
        .deliveries
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;

    if actor.role == Role::Courier {
        auth::require_assignee(&actor, delivery.courier.courier_id())?;
    }

    let sender = match actor.role {
        Role::Courier => "courier",
        Role::Customer => "customer",
        Role::Manager => "manager",
        Role::System => "system",
    };

    delivery.chat_thread.push(ChatMessage {
        sender: sender.to_string(),
        body: payload.body,
        sent_at: Utc::now(),
    });

    Ok(Json(delivery.clone()))
}

/// What the public tracking page is allowed to see.
#[derive(Serialize)]
struct TrackView {
    tracking_code: String,
    status: DeliveryStatus,
    courier_name: Option<String>,
    current_location: Option<LocationFix>,
    estimated_duration_minutes: f64,
    delivery_address: String,
}

async fn track_delivery(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<TrackView>, AppError> {
    let delivery_id = state
        .tracking_codes
        .get(&code)
        .map(|entry| *entry.value())
        .ok_or_else(|| AppError::NotFound(format!("no delivery with tracking code {code}")))?;

    let delivery = state
        .deliveries
        .get(&delivery_id)
        .ok_or_else(|| AppError::NotFound(format!("no delivery with tracking code {code}")))?;

    Ok(Json(TrackView {
        tracking_code: delivery.tracking_code.clone(),
        status: delivery.status,
        courier_name: delivery.courier_contact.as_ref().map(|c| c.name.clone()),
        current_location: delivery.current_location,
        estimated_duration_minutes: delivery.estimated_duration_minutes,
        delivery_address: delivery.delivery_address.clone(),
    }))
}

fn validate_point(point: &GeoPoint) -> Result<(), AppError> {
    if !(-90.0..=90.0).contains(&point.lat) {
        return Err(AppError::Validation(format!(
            "latitude {} out of range",
            point.lat
        )));
    }
    if !(-180.0..=180.0).contains(&point.lng) {
        return Err(AppError::Validation(format!(
            "longitude {} out of range",
            point.lng
        )));
    }
    Ok(())
}
