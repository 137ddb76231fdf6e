use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::Config;
use crate::models::courier::{Courier, LocationFix};
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::payout::Payout;
use crate::models::shift::Shift;
use crate::observability::metrics::Metrics;
use crate::providers::payments::PaymentProcessor;
use crate::providers::routing::RoutingProvider;

/// Fan-out payload for the realtime channel. At-least-once, unordered;
/// subscribers that lag past the buffer drop messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Assigned {
        delivery_id: Uuid,
        courier_id: Uuid,
        at: DateTime<Utc>,
    },
    StatusChanged {
        delivery_id: Uuid,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    },
    LocationUpdated {
        delivery_id: Uuid,
        courier_id: Uuid,
        fix: LocationFix,
    },
    PayoutCompleted {
        payout_id: Uuid,
        courier_id: Uuid,
        net: f64,
    },
}

pub struct AppState {
    pub config: Config,
    pub deliveries: DashMap<Uuid, Delivery>,
    pub couriers: DashMap<Uuid, Courier>,
    pub shifts: DashMap<Uuid, Shift>,
    pub payouts: DashMap<Uuid, Payout>,
    /// order id -> live (non-terminal) delivery id; enforces one live
    /// delivery per order via the entry API.
    pub live_orders: DashMap<Uuid, Uuid>,
    /// public tracking code -> delivery id.
    pub tracking_codes: DashMap<String, Uuid>,
    pub events_tx: broadcast::Sender<DeliveryEvent>,
    pub metrics: Metrics,
    pub routing: Option<Arc<dyn RoutingProvider>>,
    pub payments: Arc<dyn PaymentProcessor>,
}

impl AppState {
    pub fn new(
        config: Config,
        routing: Option<Arc<dyn RoutingProvider>>,
        payments: Arc<dyn PaymentProcessor>,
    ) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);

        Self {
            config,
            deliveries: DashMap::new(),
            couriers: DashMap::new(),
            shifts: DashMap::new(),
            payouts: DashMap::new(),
            live_orders: DashMap::new(),
            tracking_codes: DashMap::new(),
            events_tx,
            metrics: Metrics::new(),
            routing,
            payments,
        }
    }

    pub fn broadcast(&self, event: DeliveryEvent) {
        // Nobody listening is fine; the channel is telemetry, not state.
        let _ = self.events_tx.send(event);
    }
}
