use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::models::courier::{
    Courier, CourierStats, GeoPoint, LocationFix, ShiftStatus, Verification,
};
use crate::models::delivery::{Delivery, DeliveryStatus, NewDelivery};
use crate::providers::payments::SimulatedProcessor;
use crate::state::AppState;

pub fn test_state() -> AppState {
    AppState::new(Config::default(), None, Arc::new(SimulatedProcessor))
}

pub fn seed_courier(state: &AppState, lat: f64, lng: f64) -> Uuid {
    let now = Utc::now();
    let courier = Courier {
        id: Uuid::new_v4(),
        name: "Test Courier".to_string(),
        phone: "+49 30 1234567".to_string(),
        verification: Verification::Verified,
        shift_status: ShiftStatus::Online,
        available: true,
        current_delivery: None,
        current_shift: None,
        current_location: Some(LocationFix {
            lat,
            lng,
            recorded_at: now,
        }),
        stats: CourierStats::default(),
        balance: 0.0,
        lifetime_earnings: 0.0,
        payout_account: "acct_test".to_string(),
        updated_at: now,
    };
    let id = courier.id;
    state.couriers.insert(id, courier);
    id
}

pub fn seed_delivery(state: &AppState, pickup: GeoPoint, dropoff: GeoPoint) -> Uuid {
    let delivery = Delivery::create(
        NewDelivery {
            order_id: Uuid::new_v4(),
            restaurant_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            pickup_address: "Langemarckstr. 1".to_string(),
            pickup_location: pickup,
            delivery_address: "Hauptstr. 99".to_string(),
            delivery_location: dropoff,
            base_fee: 3.50,
            priority: false,
        },
        crate::geo::haversine_km(&pickup, &dropoff),
        12.0,
        Utc::now(),
    );
    let id = delivery.id;
    state.live_orders.insert(delivery.order_id, id);
    state.tracking_codes.insert(delivery.tracking_code.clone(), id);
    state.deliveries.insert(id, delivery);
    id
}

/// Force a delivery into `status` with the courier engaged, bypassing the
/// transition table. Test plumbing only.
pub fn force_status(state: &AppState, delivery_id: Uuid, courier_id: Uuid, status: DeliveryStatus) {
    {
        let mut delivery = state.deliveries.get_mut(&delivery_id).unwrap();
        delivery.status = status;
        delivery.courier = crate::models::delivery::CourierRef::Assigned(courier_id);
    }
    let mut courier = state.couriers.get_mut(&courier_id).unwrap();
    courier.current_delivery = Some(delivery_id);
    courier.available = false;
    courier.shift_status = ShiftStatus::OnDelivery;
}

pub fn berlin() -> GeoPoint {
    GeoPoint {
        lat: 52.520,
        lng: 13.405,
    }
}

pub fn berlin_nearby() -> GeoPoint {
    GeoPoint {
        lat: 52.530,
        lng: 13.415,
    }
}
