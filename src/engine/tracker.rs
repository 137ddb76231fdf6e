use chrono::Utc;
use uuid::Uuid;

use crate::auth::{self, Actor, Capability};
use crate::error::AppError;
use crate::models::courier::LocationFix;
use crate::models::delivery::{
    Delivery, LOCATION_HISTORY_CAP, LOCATION_HISTORY_TRIM,
};
use crate::state::{AppState, DeliveryEvent};

/// Ingest a courier position report for an in-flight delivery.
///
/// Last-write-wins: reports carry no sequence number, so a delayed network
/// retry can land after a fresher fix and win. Known limitation.
pub fn update_location(
    state: &AppState,
    delivery_id: Uuid,
    lat: f64,
    lng: f64,
    actor: &Actor,
) -> Result<Delivery, AppError> {
    auth::require(actor, Capability::ReportLocation)?;

    if !(-90.0..=90.0).contains(&lat) {
        return Err(AppError::Validation(format!("latitude {lat} out of range")));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(AppError::Validation(format!("longitude {lng} out of range")));
    }

    let now = Utc::now();
    let fix = LocationFix {
        lat,
        lng,
        recorded_at: now,
    };

    let mut delivery = state
        .deliveries
        .get_mut(&delivery_id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    auth::require_assignee(actor, delivery.courier.courier_id())?;

    if !delivery.status.is_active() {
        return Err(AppError::Conflict(format!(
            "delivery is {}, position reports are only accepted for an active delivery",
            delivery.status.as_str()
        )));
    }

    delivery.current_location = Some(fix);
    delivery.location_history.push(fix);
    if delivery.location_history.len() > LOCATION_HISTORY_CAP {
        let keep_from = delivery.location_history.len() - LOCATION_HISTORY_TRIM;
        delivery.location_history.drain(..keep_from);
    }

    let courier_id = delivery.courier.courier_id();
    let snapshot = delivery.clone();
    drop(delivery);

    // Propagate to the courier's own record so dispatch sees fresh positions.
    if let Some(courier_id) = courier_id {
        if let Some(mut courier) = state.couriers.get_mut(&courier_id) {
            courier.current_location = Some(fix);
            courier.updated_at = now;
        }

        state.broadcast(DeliveryEvent::LocationUpdated {
            delivery_id,
            courier_id,
            fix,
        });
    }

    state.metrics.location_updates_total.inc();

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::update_location;
    use crate::auth::{Actor, Role};
    use crate::engine::test_support::{
        berlin, berlin_nearby, force_status, seed_courier, seed_delivery, test_state,
    };
    use crate::models::delivery::{
        DeliveryStatus, LOCATION_HISTORY_CAP, LOCATION_HISTORY_TRIM,
    };

    fn courier_actor(id: Uuid) -> Actor {
        Actor {
            role: Role::Courier,
            id: Some(id),
        }
    }

    #[test]
    fn overwrites_current_and_propagates_to_courier() {
        let state = test_state();
        let courier_id = seed_courier(&state, 52.52, 13.40);
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());
        force_status(&state, delivery_id, courier_id, DeliveryStatus::InTransit);

        let updated = update_location(&state, delivery_id, 52.525, 13.41, &courier_actor(courier_id))
            .unwrap();

        let fix = updated.current_location.unwrap();
        assert!((fix.lat - 52.525).abs() < 1e-12);
        assert_eq!(updated.location_history.len(), 1);

        let courier = state.couriers.get(&courier_id).unwrap();
        let courier_fix = courier.current_location.unwrap();
        assert!((courier_fix.lat - 52.525).abs() < 1e-12);
    }

    #[test]
    fn history_trims_to_most_recent_entries_on_overflow() {
        let state = test_state();
        let courier_id = seed_courier(&state, 52.52, 13.40);
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());
        force_status(&state, delivery_id, courier_id, DeliveryStatus::InTransit);
        let actor = courier_actor(courier_id);

        for i in 0..=LOCATION_HISTORY_CAP {
            let lat = 52.0 + i as f64 * 1e-5;
            update_location(&state, delivery_id, lat, 13.40, &actor).unwrap();
        }

        let delivery = state.deliveries.get(&delivery_id).unwrap();
        assert_eq!(delivery.location_history.len(), LOCATION_HISTORY_TRIM);
        // The newest fix always survives the trim.
        let last = delivery.location_history.last().unwrap();
        assert!((last.lat - (52.0 + LOCATION_HISTORY_CAP as f64 * 1e-5)).abs() < 1e-12);
    }

    #[test]
    fn foreign_courier_is_rejected() {
        let state = test_state();
        let courier_id = seed_courier(&state, 52.52, 13.40);
        let other_id = seed_courier(&state, 52.55, 13.42);
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());
        force_status(&state, delivery_id, courier_id, DeliveryStatus::InTransit);

        let err =
            update_location(&state, delivery_id, 52.53, 13.41, &courier_actor(other_id))
                .unwrap_err();
        assert!(matches!(err, crate::error::AppError::Forbidden(_)));
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let state = test_state();
        let courier_id = seed_courier(&state, 52.52, 13.40);
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());
        force_status(&state, delivery_id, courier_id, DeliveryStatus::InTransit);

        let err = update_location(&state, delivery_id, 91.0, 13.41, &courier_actor(courier_id))
            .unwrap_err();
        assert!(matches!(err, crate::error::AppError::Validation(_)));
    }
}
