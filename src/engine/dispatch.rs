use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{self, Actor, Capability};
use crate::engine::lifecycle::{self, ReleaseOutcome};
use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::courier::{ShiftStatus, Verification};
use crate::models::delivery::{
    CourierContact, CourierRef, Delivery, DeliveryStatus, StatusHistoryEntry,
};
use crate::state::{AppState, DeliveryEvent};

pub struct AssignmentRequest {
    /// Explicit courier for manual dispatch; `None` selects the nearest
    /// available courier automatically.
    pub courier_id: Option<Uuid>,
}

/// Assign a courier to a pending delivery. The delivery guard is held across
/// the whole operation and the courier is engaged by a conditional update, so
/// two concurrent dispatch calls can never double-book either side.
pub fn assign(
    state: &AppState,
    delivery_id: Uuid,
    request: AssignmentRequest,
    actor: &Actor,
) -> Result<Delivery, AppError> {
    auth::require(actor, Capability::AssignDelivery)?;

    let start = Instant::now();
    let result = assign_inner(state, delivery_id, request);

    let outcome = if result.is_ok() { "success" } else { "error" };
    state
        .metrics
        .dispatch_latency_seconds
        .with_label_values(&[outcome])
        .observe(start.elapsed().as_secs_f64());
    state
        .metrics
        .dispatch_total
        .with_label_values(&[outcome])
        .inc();

    result
}

fn assign_inner(
    state: &AppState,
    delivery_id: Uuid,
    request: AssignmentRequest,
) -> Result<Delivery, AppError> {
    let now = Utc::now();

    let mut delivery = state
        .deliveries
        .get_mut(&delivery_id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    if delivery.status != DeliveryStatus::Pending {
        return Err(AppError::Conflict(format!(
            "delivery is {}, only pending deliveries can be assigned",
            delivery.status.as_str()
        )));
    }

    let candidates = match request.courier_id {
        Some(id) => vec![validate_manual_candidate(state, id)?],
        None => nearby_candidates(state, &delivery),
    };

    delivery.assignment_attempts += 1;

    let mut engaged: Option<(Uuid, CourierContact)> = None;
    for candidate_id in candidates {
        if let Some(contact) = try_engage(state, candidate_id, delivery_id, now) {
            engaged = Some((candidate_id, contact));
            break;
        }
    }

    let Some((courier_id, contact)) = engaged else {
        warn!(delivery_id = %delivery_id, "no courier available");
        return Err(AppError::NoCourierAvailable);
    };

    let (new_status, entry) = lifecycle::plan_transition(
        delivery.status,
        DeliveryStatus::Assigned,
        now,
        Some(match request.courier_id {
            Some(_) => "manual dispatch".to_string(),
            None => "auto dispatch: nearest courier".to_string(),
        }),
    )?;

    delivery.status = new_status;
    delivery.status_history.push(entry);
    delivery.courier = CourierRef::Assigned(courier_id);
    delivery.courier_contact = Some(contact);
    delivery.assigned_at = Some(now);

    let snapshot = delivery.clone();
    drop(delivery);

    info!(
        delivery_id = %delivery_id,
        courier_id = %courier_id,
        attempt = snapshot.assignment_attempts,
        "courier assigned"
    );

    state.broadcast(DeliveryEvent::Assigned {
        delivery_id,
        courier_id,
        at: now,
    });
    state.broadcast(DeliveryEvent::StatusChanged {
        delivery_id,
        status: DeliveryStatus::Assigned,
        at: now,
    });
    state
        .metrics
        .transitions_total
        .with_label_values(&[DeliveryStatus::Assigned.as_str()])
        .inc();

    Ok(snapshot)
}

/// Manual dispatch still has to name a real, verified, unengaged courier.
fn validate_manual_candidate(state: &AppState, courier_id: Uuid) -> Result<Uuid, AppError> {
    let courier = state
        .couriers
        .get(&courier_id)
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

    if courier.verification != Verification::Verified {
        return Err(AppError::Validation(format!(
            "courier {courier_id} is not verified"
        )));
    }
    if courier.current_delivery.is_some() {
        return Err(AppError::Conflict(format!(
            "courier {courier_id} is already on a delivery"
        )));
    }
    if !courier.is_assignable() {
        return Err(AppError::Conflict(format!(
            "courier {courier_id} is not online and available"
        )));
    }

    Ok(courier_id)
}

/// Verified, online, available couriers within the dispatch radius of the
/// pickup point, nearest first.
fn nearby_candidates(state: &AppState, delivery: &Delivery) -> Vec<Uuid> {
    let radius = state.config.dispatch_radius_km;

    let mut candidates: Vec<(Uuid, f64)> = state
        .couriers
        .iter()
        .filter_map(|entry| {
            let courier = entry.value();
            if !courier.is_assignable() {
                return None;
            }
            let fix = courier.current_location?;
            let distance = haversine_km(&fix.point(), &delivery.pickup_location);
            (distance <= radius).then_some((courier.id, distance))
        })
        .collect();

    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
    candidates.into_iter().map(|(id, _)| id).collect()
}

/// Conditionally engage the courier: the check and the mutation happen under
/// the courier's entry guard, so a courier that grabbed another delivery in
/// the meantime is skipped rather than double-booked.
fn try_engage(
    state: &AppState,
    courier_id: Uuid,
    delivery_id: Uuid,
    now: chrono::DateTime<Utc>,
) -> Option<CourierContact> {
    let mut courier = state.couriers.get_mut(&courier_id)?;
    if !courier.is_assignable() {
        return None;
    }

    courier.current_delivery = Some(delivery_id);
    courier.available = false;
    courier.shift_status = ShiftStatus::OnDelivery;
    courier.stats.total_deliveries += 1;
    courier.stats.completion_rate =
        courier.stats.completed_deliveries as f64 / courier.stats.total_deliveries as f64;
    courier.updated_at = now;

    Some(CourierContact {
        name: courier.name.clone(),
        phone: courier.phone.clone(),
    })
}

/// Courier declines the assignment: free the courier and put the delivery
/// back in the pending pool. The attempt counter survives so upstream can
/// apply backoff after repeated rejections.
pub fn reject_assignment(
    state: &AppState,
    delivery_id: Uuid,
    actor: &Actor,
    note: Option<String>,
) -> Result<Delivery, AppError> {
    auth::require(actor, Capability::TransitionDelivery)?;

    let now = Utc::now();

    let mut delivery = state
        .deliveries
        .get_mut(&delivery_id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    if delivery.status != DeliveryStatus::Assigned {
        return Err(AppError::Conflict(format!(
            "delivery is {}, only an assigned delivery can be rejected",
            delivery.status.as_str()
        )));
    }

    auth::require_assignee(actor, delivery.courier.courier_id())?;

    lifecycle::release_courier(state, &delivery, ReleaseOutcome::Abandoned, now);

    delivery.status = DeliveryStatus::Pending;
    delivery.status_history.push(StatusHistoryEntry {
        event: "courier_rejected".to_string(),
        timestamp: now,
        note,
    });
    delivery.courier = CourierRef::Unassigned;
    delivery.courier_contact = None;
    delivery.assigned_at = None;

    let snapshot = delivery.clone();
    drop(delivery);

    info!(delivery_id = %delivery_id, "assignment rejected, delivery back to pending");

    state.broadcast(DeliveryEvent::StatusChanged {
        delivery_id,
        status: DeliveryStatus::Pending,
        at: now,
    });

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{AssignmentRequest, assign, reject_assignment};
    use crate::auth::{Actor, Role};
    use crate::engine::test_support::{berlin, berlin_nearby, seed_courier, seed_delivery, test_state};
    use crate::error::AppError;
    use crate::models::courier::{ShiftStatus, Verification};
    use crate::models::delivery::{CourierRef, DeliveryStatus};

    fn manager() -> Actor {
        Actor {
            role: Role::Manager,
            id: None,
        }
    }

    fn auto() -> AssignmentRequest {
        AssignmentRequest { courier_id: None }
    }

    #[test]
    fn auto_assign_picks_the_nearest_courier() {
        let state = test_state();
        let near = seed_courier(&state, 52.521, 13.406);
        let _far = seed_courier(&state, 52.58, 13.50);
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());

        let delivery = assign(&state, delivery_id, auto(), &manager()).unwrap();

        assert_eq!(delivery.status, DeliveryStatus::Assigned);
        assert_eq!(delivery.courier, CourierRef::Assigned(near));
        assert_eq!(delivery.assignment_attempts, 1);
        assert!(delivery.courier_contact.is_some());

        let courier = state.couriers.get(&near).unwrap();
        assert_eq!(courier.current_delivery, Some(delivery_id));
        assert_eq!(courier.shift_status, ShiftStatus::OnDelivery);
    }

    #[test]
    fn no_courier_in_radius_leaves_delivery_pending() {
        let state = test_state();
        // ~60 km away, well outside the 10 km default radius.
        seed_courier(&state, 53.05, 13.405);
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());

        let err = assign(&state, delivery_id, auto(), &manager()).unwrap_err();
        assert!(matches!(err, AppError::NoCourierAvailable));

        let delivery = state.deliveries.get(&delivery_id).unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.assignment_attempts, 1);
    }

    #[test]
    fn engaged_courier_cannot_be_double_assigned() {
        let state = test_state();
        let courier_id = seed_courier(&state, 52.521, 13.406);
        let first = seed_delivery(&state, berlin(), berlin_nearby());
        let second = seed_delivery(&state, berlin(), berlin_nearby());

        assign(&state, first, auto(), &manager()).unwrap();

        let err = assign(
            &state,
            second,
            AssignmentRequest {
                courier_id: Some(courier_id),
            },
            &manager(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let courier = state.couriers.get(&courier_id).unwrap();
        assert_eq!(courier.current_delivery, Some(first));
    }

    #[test]
    fn assigned_delivery_cannot_be_assigned_again() {
        let state = test_state();
        seed_courier(&state, 52.521, 13.406);
        seed_courier(&state, 52.522, 13.407);
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());

        assign(&state, delivery_id, auto(), &manager()).unwrap();
        let err = assign(&state, delivery_id, auto(), &manager()).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn unverified_courier_is_rejected_for_manual_dispatch() {
        let state = test_state();
        let courier_id = seed_courier(&state, 52.521, 13.406);
        state.couriers.get_mut(&courier_id).unwrap().verification = Verification::Pending;
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());

        let err = assign(
            &state,
            delivery_id,
            AssignmentRequest {
                courier_id: Some(courier_id),
            },
            &manager(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn unknown_manual_courier_is_not_found() {
        let state = test_state();
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());

        let err = assign(
            &state,
            delivery_id,
            AssignmentRequest {
                courier_id: Some(Uuid::new_v4()),
            },
            &manager(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn reject_returns_delivery_to_pending_and_keeps_attempts() {
        let state = test_state();
        let courier_id = seed_courier(&state, 52.521, 13.406);
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());

        assign(&state, delivery_id, auto(), &manager()).unwrap();

        let courier_actor = Actor {
            role: Role::Courier,
            id: Some(courier_id),
        };
        let delivery =
            reject_assignment(&state, delivery_id, &courier_actor, Some("too far".to_string()))
                .unwrap();

        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.courier, CourierRef::Unassigned);
        assert_eq!(delivery.assignment_attempts, 1);
        assert!(
            delivery
                .status_history
                .iter()
                .any(|e| e.event == "courier_rejected")
        );

        let courier = state.couriers.get(&courier_id).unwrap();
        assert_eq!(courier.current_delivery, None);
        assert!(courier.available);
    }
}
