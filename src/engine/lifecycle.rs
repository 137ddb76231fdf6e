use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::auth::{self, Actor, Capability, Role};
use crate::engine::earnings;
use crate::error::AppError;
use crate::geo::{haversine_km, travel_minutes};
use crate::models::courier::ShiftStatus;
use crate::models::delivery::{CourierRef, Delivery, DeliveryStatus, StatusHistoryEntry};
use crate::state::{AppState, DeliveryEvent};

/// Legal next states for each status. The only path out of `failed` is the
/// retry back to `pending`; `returned` is reached by back-office
/// reconciliation outside this table.
pub fn allowed_targets(from: DeliveryStatus) -> &'static [DeliveryStatus] {
    use DeliveryStatus::*;

    match from {
        Pending => &[Assigned, Cancelled],
        Assigned => &[Accepted, Cancelled],
        Accepted => &[ArrivingRestaurant, Cancelled],
        ArrivingRestaurant => &[AtRestaurant, Cancelled],
        AtRestaurant => &[PickedUp, Cancelled],
        PickedUp => &[InTransit, Cancelled],
        InTransit => &[Arrived, Failed],
        Arrived => &[Delivered, Failed],
        Failed => &[Pending],
        Delivered | Cancelled | Returned => &[],
    }
}

/// Validate a transition and produce the new state together with its history
/// entry. Pure: the caller applies both to the record in one mutation while
/// holding the entry guard, so status and history can never diverge.
pub fn plan_transition(
    current: DeliveryStatus,
    target: DeliveryStatus,
    now: DateTime<Utc>,
    note: Option<String>,
) -> Result<(DeliveryStatus, StatusHistoryEntry), AppError> {
    let allowed = allowed_targets(current);
    if !allowed.contains(&target) {
        let allowed = allowed
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(AppError::Conflict(format!(
            "cannot move delivery from {} to {}; allowed next states: [{}]",
            current.as_str(),
            target.as_str(),
            allowed
        )));
    }

    let entry = StatusHistoryEntry {
        event: target.as_str().to_string(),
        timestamp: now,
        note,
    };

    Ok((target, entry))
}

/// Drive a delivery to `target`, applying the per-transition side effects.
/// Status change and history append happen under the delivery's entry guard;
/// courier follow-up writes are conditional on the courier still pointing at
/// this delivery (lock order is always delivery, then courier).
pub fn request_transition(
    state: &AppState,
    delivery_id: Uuid,
    target: DeliveryStatus,
    note: Option<String>,
    actor: &Actor,
) -> Result<Delivery, AppError> {
    auth::require(actor, Capability::TransitionDelivery)?;

    let now = Utc::now();

    let mut delivery = state
        .deliveries
        .get_mut(&delivery_id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    // Cancel and retry are dispatcher-side operations; a courier may still
    // drive them, but only on their own delivery.
    match target {
        DeliveryStatus::Cancelled | DeliveryStatus::Pending => {
            if actor.role == Role::Courier {
                auth::require_assignee(actor, delivery.courier.courier_id())?;
            }
        }
        _ => auth::require_assignee(actor, delivery.courier.courier_id())?,
    }

    let was_terminal = delivery.status.is_terminal();
    let (new_status, entry) = plan_transition(delivery.status, target, now, note)?;

    delivery.status = new_status;
    delivery.status_history.push(entry);

    match new_status {
        DeliveryStatus::Accepted => {
            delivery.accepted_at = Some(now);
            delivery.provisional_eta_minutes = Some(provisional_eta(state, &delivery));
        }
        DeliveryStatus::PickedUp => {
            delivery.actual_pickup_time = Some(now);
            // Provisional figure for the courier app; finalized at delivered.
            let wait = wait_minutes(&delivery, now);
            delivery.earnings = Some(earnings::calculate_delivery_earnings(
                delivery.base_fee,
                delivery.estimated_distance_km,
                wait,
                0.0,
                now,
            ));
        }
        DeliveryStatus::Delivered => {
            delivery.actual_delivery_time = Some(now);
            if let Some(accepted) = delivery.accepted_at {
                delivery.actual_duration_minutes =
                    Some((now - accepted).num_seconds() as f64 / 60.0);
            }
            delivery.actual_distance_km = Some(travelled_km(&delivery));
            earnings::settle_delivered(state, &mut delivery, now);
            release_courier(state, &delivery, ReleaseOutcome::Completed, now);
        }
        DeliveryStatus::Failed | DeliveryStatus::Cancelled => {
            release_courier(state, &delivery, ReleaseOutcome::Abandoned, now);
        }
        DeliveryStatus::Pending => {
            // failed -> pending retry: the slate is clean for re-dispatch.
            delivery.courier = CourierRef::Unassigned;
            delivery.courier_contact = None;
        }
        _ => {}
    }

    // `failed` keeps its live-order slot: the record may retry to `pending`.
    if new_status.is_terminal() {
        state.live_orders.remove(&delivery.order_id);
        if !was_terminal {
            state.metrics.deliveries_active.dec();
        }
    }

    state
        .metrics
        .transitions_total
        .with_label_values(&[new_status.as_str()])
        .inc();

    let snapshot = delivery.clone();
    drop(delivery);

    info!(
        delivery_id = %delivery_id,
        status = new_status.as_str(),
        "delivery transitioned"
    );

    state.broadcast(DeliveryEvent::StatusChanged {
        delivery_id,
        status: new_status,
        at: now,
    });

    Ok(snapshot)
}

pub enum ReleaseOutcome {
    Completed,
    Abandoned,
}

/// Free the courier engaged on `delivery`, keyed on the courier still
/// pointing at it so a concurrent re-assignment is never clobbered.
pub fn release_courier(
    state: &AppState,
    delivery: &Delivery,
    outcome: ReleaseOutcome,
    now: DateTime<Utc>,
) {
    let Some(courier_id) = delivery.courier.courier_id() else {
        return;
    };
    let Some(mut courier) = state.couriers.get_mut(&courier_id) else {
        return;
    };
    if courier.current_delivery != Some(delivery.id) {
        return;
    }

    courier.current_delivery = None;
    courier.available = true;
    courier.shift_status = if courier.current_shift.is_some() {
        ShiftStatus::Online
    } else {
        ShiftStatus::Offline
    };

    if matches!(outcome, ReleaseOutcome::Completed) {
        courier.stats.completed_deliveries += 1;
    }
    if courier.stats.total_deliveries > 0 {
        courier.stats.completion_rate =
            courier.stats.completed_deliveries as f64 / courier.stats.total_deliveries as f64;
    }
    courier.updated_at = now;
}

/// Minutes the courier has been waiting at the restaurant, from the recorded
/// arrival up to `now`.
fn wait_minutes(delivery: &Delivery, now: DateTime<Utc>) -> f64 {
    delivery
        .history_timestamp(DeliveryStatus::AtRestaurant.as_str())
        .map(|arrived| ((now - arrived).num_seconds() as f64 / 60.0).max(0.0))
        .unwrap_or(0.0)
}

/// Distance actually covered, summed over the reported track; falls back to
/// the creation-time estimate when fewer than two fixes exist.
fn travelled_km(delivery: &Delivery) -> f64 {
    if delivery.location_history.len() < 2 {
        return delivery.estimated_distance_km;
    }

    delivery
        .location_history
        .windows(2)
        .map(|pair| haversine_km(&pair[0].point(), &pair[1].point()))
        .sum()
}

/// Coarse acceptance-time ETA: straight line from the courier's last fix to
/// the restaurant plus prep buffer, then on to the customer.
fn provisional_eta(state: &AppState, delivery: &Delivery) -> f64 {
    let speed = state.config.fallback_speed_kmh;
    let to_customer = travel_minutes(delivery.estimated_distance_km, speed);

    let to_restaurant = delivery
        .courier
        .courier_id()
        .and_then(|id| state.couriers.get(&id))
        .and_then(|courier| courier.current_location)
        .map(|fix| travel_minutes(haversine_km(&fix.point(), &delivery.pickup_location), speed))
        .unwrap_or(0.0);

    to_restaurant + state.config.prep_buffer_minutes + to_customer
}
