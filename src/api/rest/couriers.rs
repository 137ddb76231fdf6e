use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, patch, post};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{self, Actor, Capability, Role};
use crate::error::AppError;
use crate::models::courier::{
    Courier, CourierStats, GeoPoint, LocationFix, ShiftStatus, Verification,
};
use crate::models::shift::{BreakInterval, Shift};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(create_courier).get(list_couriers))
        .route("/couriers/:id", get(get_courier))
        .route("/couriers/:id/verify", post(verify_courier))
        .route("/couriers/:id/location", patch(update_courier_location))
        .route("/couriers/:id/shift/start", post(start_shift))
        .route("/couriers/:id/shift/end", post(end_shift))
        .route("/couriers/:id/breaks/start", post(start_break))
        .route("/couriers/:id/breaks/end", post(end_break))
}

#[derive(Deserialize)]
pub struct CreateCourierRequest {
    pub name: String,
    pub phone: String,
    pub payout_account: String,
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::ManageCouriers)?;

    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }
    if payload.phone.trim().is_empty() {
        return Err(AppError::Validation("phone cannot be empty".to_string()));
    }

    let courier = Courier {
        id: Uuid::new_v4(),
        name: payload.name,
        phone: payload.phone,
        verification: Verification::Pending,
        shift_status: ShiftStatus::Offline,
        available: false,
        current_delivery: None,
        current_shift: None,
        current_location: None,
        stats: CourierStats::default(),
        balance: 0.0,
        lifetime_earnings: 0.0,
        payout_account: payload.payout_account,
        updated_at: Utc::now(),
    };

    state.couriers.insert(courier.id, courier.clone());
    Ok(Json(courier))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Json<Vec<Courier>> {
    let couriers = state
        .couriers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(couriers)
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Courier>, AppError> {
    let courier = state
        .couriers
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

    Ok(Json(courier.value().clone()))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub approve: bool,
}

async fn verify_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<Courier>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::ManageCouriers)?;

    let mut courier = state
        .couriers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

    courier.verification = if payload.approve {
        Verification::Verified
    } else {
        Verification::Rejected
    };
    courier.updated_at = Utc::now();

    Ok(Json(courier.clone()))
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn update_courier_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Courier>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::ReportLocation)?;
    require_self_or_staff(&actor, id)?;

    let mut courier = state
        .couriers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

    courier.current_location = Some(LocationFix {
        lat: payload.location.lat,
        lng: payload.location.lng,
        recorded_at: Utc::now(),
    });
    courier.updated_at = Utc::now();

    Ok(Json(courier.clone()))
}

async fn start_shift(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Shift>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::ManageShift)?;
    require_self_or_staff(&actor, id)?;

    let now = Utc::now();

    let mut courier = state
        .couriers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

    if courier.verification != Verification::Verified {
        return Err(AppError::Validation(
            "courier must be verified before going online".to_string(),
        ));
    }
    if courier.current_shift.is_some() {
        return Err(AppError::Conflict("shift already open".to_string()));
    }

    let shift = Shift::start(id, now);
    courier.current_shift = Some(shift.id);
    courier.shift_status = ShiftStatus::Online;
    courier.available = true;
    courier.updated_at = now;

    state.shifts.insert(shift.id, shift.clone());
    Ok(Json(shift))
}

async fn end_shift(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Shift>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::ManageShift)?;
    require_self_or_staff(&actor, id)?;

    let now = Utc::now();

    let mut courier = state
        .couriers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

    if courier.shift_status == ShiftStatus::OnDelivery {
        return Err(AppError::Conflict(
            "cannot end a shift while on a delivery".to_string(),
        ));
    }
    let Some(shift_id) = courier.current_shift else {
        return Err(AppError::Conflict("no open shift".to_string()));
    };

    courier.current_shift = None;
    courier.shift_status = ShiftStatus::Offline;
    courier.available = false;
    courier.updated_at = now;
    drop(courier);

    let mut shift = state
        .shifts
        .get_mut(&shift_id)
        .ok_or_else(|| AppError::Internal(format!("shift {shift_id} missing")))?;

    if shift.is_open() {
        shift.ended_at = Some(now);
    }
    if shift.on_break() {
        if let Some(open_break) = shift.breaks.last_mut() {
            open_break.ended_at = Some(now);
        }
    }

    Ok(Json(shift.clone()))
}

async fn start_break(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Shift>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::ManageShift)?;
    require_self_or_staff(&actor, id)?;

    let now = Utc::now();

    let mut courier = state
        .couriers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

    if courier.shift_status != ShiftStatus::Online {
        return Err(AppError::Conflict(format!(
            "breaks can only start while online, courier is {:?}",
            courier.shift_status
        )));
    }
    let Some(shift_id) = courier.current_shift else {
        return Err(AppError::Conflict("no open shift".to_string()));
    };

    courier.shift_status = ShiftStatus::OnBreak;
    courier.available = false;
    courier.updated_at = now;
    drop(courier);

    let mut shift = state
        .shifts
        .get_mut(&shift_id)
        .ok_or_else(|| AppError::Internal(format!("shift {shift_id} missing")))?;

    if !shift.on_break() {
        shift.breaks.push(BreakInterval {
            started_at: now,
            ended_at: None,
        });
    }

    Ok(Json(shift.clone()))
}

async fn end_break(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Shift>, AppError> {
    let actor = Actor::from_headers(&headers)?;
    auth::require(&actor, Capability::ManageShift)?;
    require_self_or_staff(&actor, id)?;

    let now = Utc::now();

    let mut courier = state
        .couriers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

    if courier.shift_status != ShiftStatus::OnBreak {
        return Err(AppError::Conflict("courier is not on a break".to_string()));
    }
    let Some(shift_id) = courier.current_shift else {
        return Err(AppError::Conflict("no open shift".to_string()));
    };

    courier.shift_status = ShiftStatus::Online;
    courier.available = true;
    courier.updated_at = now;
    drop(courier);

    let mut shift = state
        .shifts
        .get_mut(&shift_id)
        .ok_or_else(|| AppError::Internal(format!("shift {shift_id} missing")))?;

    if shift.on_break() {
        if let Some(open_break) = shift.breaks.last_mut() {
            open_break.ended_at = Some(now);
        }
    }

    Ok(Json(shift.clone()))
}

/// Couriers may only manage their own record; managers and the system may
/// manage anyone's.
fn require_self_or_staff(actor: &Actor, courier_id: Uuid) -> Result<(), AppError> {
    match actor.role {
        Role::Manager | Role::System => Ok(()),
        Role::Courier if actor.id == Some(courier_id) => Ok(()),
        _ => Err(AppError::Forbidden(
            "cannot act on another courier's record".to_string(),
        )),
    }
}
