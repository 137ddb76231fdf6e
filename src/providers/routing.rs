use axum::async_trait;
use thiserror::Error;

use crate::geo::{haversine_km, travel_minutes};
use crate::models::courier::GeoPoint;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("routing provider unreachable: {0}")]
    Unreachable(String),
    #[error("no route between points")]
    NoRoute,
}

#[derive(Debug, Clone)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub polyline: Option<String>,
}

#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn route(&self, origin: GeoPoint, destination: GeoPoint)
    -> Result<RouteEstimate, RoutingError>;
}

/// Road distances run longer than the great-circle line; urban routing
/// providers report roughly this much overhead.
const ROAD_WINDING_FACTOR: f64 = 1.3;

/// Stand-in for a managed routing API: inflates the straight-line distance by
/// a winding factor and assumes the configured road speed. Wired when
/// `ROUTING_ENABLED` is set and no real provider credentials exist.
pub struct SimulatedRouting {
    pub road_speed_kmh: f64,
}

#[async_trait]
impl RoutingProvider for SimulatedRouting {
    async fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<RouteEstimate, RoutingError> {
        let distance_km = haversine_km(&origin, &destination) * ROAD_WINDING_FACTOR;
        Ok(RouteEstimate {
            distance_km,
            duration_minutes: travel_minutes(distance_km, self.road_speed_kmh),
            polyline: None,
        })
    }
}

#[cfg(test)]
pub struct FailingRouting;

#[cfg(test)]
#[async_trait]
impl RoutingProvider for FailingRouting {
    async fn route(
        &self,
        _origin: GeoPoint,
        _destination: GeoPoint,
    ) -> Result<RouteEstimate, RoutingError> {
        Err(RoutingError::Unreachable("connection refused".to_string()))
    }
}
