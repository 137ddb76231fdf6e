use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{haversine_km, travel_minutes};
use crate::models::courier::GeoPoint;
use crate::models::delivery::DeliveryStatus;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Restaurant,
    Customer,
}

/// ETA answers are values, not errors: a courier without a single position
/// fix is an expected situation, not a failure.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EtaResult {
    NoLocation,
    Completed {
        status: DeliveryStatus,
    },
    Estimate {
        destination: Destination,
        distance_km: f64,
        duration_minutes: f64,
        polyline: Option<String>,
        /// True when the routing provider was skipped or failed and the
        /// figure is a straight-line approximation.
        degraded: bool,
    },
}

pub async fn get_eta(state: &AppState, delivery_id: Uuid) -> Result<EtaResult, AppError> {
    // Snapshot under the guard, then drop it: provider calls must not hold
    // map locks across await points.
    let (status, origin, pickup, dropoff) = {
        let delivery = state
            .deliveries
            .get(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

        let origin = delivery.current_location.or_else(|| {
            delivery
                .courier
                .courier_id()
                .and_then(|id| state.couriers.get(&id))
                .and_then(|courier| courier.current_location)
        });

        (
            delivery.status,
            origin,
            delivery.pickup_location,
            delivery.delivery_location,
        )
    };

    if status.is_terminal() {
        return Ok(EtaResult::Completed { status });
    }

    let Some(origin_fix) = origin else {
        return Ok(EtaResult::NoLocation);
    };
    let origin = origin_fix.point();

    let (destination, target) = if status.is_past_pickup() {
        (Destination::Customer, dropoff)
    } else {
        (Destination::Restaurant, pickup)
    };

    let mut estimate = route_or_fallback(state, origin, target).await;

    // Food is still on the pass while the courier is inbound.
    if destination == Destination::Restaurant {
        estimate.duration_minutes += state.config.prep_buffer_minutes;
    }

    Ok(EtaResult::Estimate {
        destination,
        distance_km: estimate.distance_km,
        duration_minutes: estimate.duration_minutes,
        polyline: estimate.polyline,
        degraded: estimate.degraded,
    })
}

struct Estimate {
    distance_km: f64,
    duration_minutes: f64,
    polyline: Option<String>,
    degraded: bool,
}

async fn route_or_fallback(state: &AppState, origin: GeoPoint, target: GeoPoint) -> Estimate {
    if let Some(routing) = &state.routing {
        let deadline = Duration::from_millis(state.config.routing_timeout_ms);
        match timeout(deadline, routing.route(origin, target)).await {
            Ok(Ok(route)) => {
                return Estimate {
                    distance_km: route.distance_km,
                    duration_minutes: route.duration_minutes,
                    polyline: route.polyline,
                    degraded: false,
                };
            }
            Ok(Err(err)) => {
                warn!(error = %err, "routing provider failed, using straight-line estimate");
            }
            Err(_) => {
                warn!(
                    timeout_ms = state.config.routing_timeout_ms,
                    "routing provider timed out, using straight-line estimate"
                );
            }
        }
    }

    state.metrics.eta_degraded_total.inc();
    let distance_km = haversine_km(&origin, &target);
    Estimate {
        distance_km,
        duration_minutes: travel_minutes(distance_km, state.config.fallback_speed_kmh),
        polyline: None,
        degraded: true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Destination, EtaResult, get_eta};
    use crate::config::Config;
    use crate::engine::test_support::{
        berlin, berlin_nearby, force_status, seed_courier, seed_delivery, test_state,
    };
    use crate::models::delivery::DeliveryStatus;
    use crate::providers::payments::SimulatedProcessor;
    use crate::providers::routing::{FailingRouting, SimulatedRouting};
    use crate::state::AppState;

    #[tokio::test]
    async fn no_position_yields_no_location_not_an_error() {
        let state = test_state();
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());

        let result = get_eta(&state, delivery_id).await.unwrap();
        assert!(matches!(result, EtaResult::NoLocation));
    }

    #[tokio::test]
    async fn inbound_courier_gets_restaurant_target_with_prep_buffer() {
        let state = test_state();
        let courier_id = seed_courier(&state, 52.50, 13.39);
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());
        force_status(&state, delivery_id, courier_id, DeliveryStatus::Accepted);

        {
            let mut delivery = state.deliveries.get_mut(&delivery_id).unwrap();
            delivery.current_location = state.couriers.get(&courier_id).unwrap().current_location;
        }

        match get_eta(&state, delivery_id).await.unwrap() {
            EtaResult::Estimate {
                destination,
                duration_minutes,
                degraded,
                ..
            } => {
                assert_eq!(destination, Destination::Restaurant);
                assert!(degraded, "no provider wired, must degrade");
                // Straight-line leg is ~2.3 km at 25 km/h plus the 5 min buffer.
                assert!(duration_minutes > 5.0);
            }
            other => panic!("expected estimate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn after_pickup_destination_switches_to_customer() {
        let state = test_state();
        let courier_id = seed_courier(&state, 52.52, 13.405);
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());
        force_status(&state, delivery_id, courier_id, DeliveryStatus::InTransit);

        match get_eta(&state, delivery_id).await.unwrap() {
            EtaResult::Estimate { destination, .. } => {
                assert_eq!(destination, Destination::Customer);
            }
            other => panic!("expected estimate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn provider_failure_degrades_instead_of_erroring() {
        let state = AppState::new(
            Config::default(),
            Some(Arc::new(FailingRouting)),
            Arc::new(SimulatedProcessor),
        );
        let courier_id = seed_courier(&state, 52.52, 13.405);
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());
        force_status(&state, delivery_id, courier_id, DeliveryStatus::InTransit);

        match get_eta(&state, delivery_id).await.unwrap() {
            EtaResult::Estimate { degraded, .. } => assert!(degraded),
            other => panic!("expected estimate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn healthy_provider_is_not_degraded() {
        let state = AppState::new(
            Config::default(),
            Some(Arc::new(SimulatedRouting {
                road_speed_kmh: 30.0,
            })),
            Arc::new(SimulatedProcessor),
        );
        let courier_id = seed_courier(&state, 52.52, 13.405);
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());
        force_status(&state, delivery_id, courier_id, DeliveryStatus::InTransit);

        match get_eta(&state, delivery_id).await.unwrap() {
            EtaResult::Estimate { degraded, .. } => assert!(!degraded),
            other => panic!("expected estimate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminal_delivery_reports_completed() {
        let state = test_state();
        let courier_id = seed_courier(&state, 52.52, 13.405);
        let delivery_id = seed_delivery(&state, berlin(), berlin_nearby());
        force_status(&state, delivery_id, courier_id, DeliveryStatus::Delivered);

        match get_eta(&state, delivery_id).await.unwrap() {
            EtaResult::Completed { status } => assert_eq!(status, DeliveryStatus::Delivered),
            other => panic!("expected completed, got {other:?}"),
        }
    }
}
