use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::{GeoPoint, LocationFix};

/// Position history bounds: append up to `LOCATION_HISTORY_CAP` fixes, then
/// drop down to the most recent `LOCATION_HISTORY_TRIM`.
pub const LOCATION_HISTORY_CAP: usize = 500;
pub const LOCATION_HISTORY_TRIM: usize = 300;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    Accepted,
    ArrivingRestaurant,
    AtRestaurant,
    PickedUp,
    InTransit,
    Arrived,
    Delivered,
    Failed,
    Cancelled,
    Returned,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Cancelled | DeliveryStatus::Returned
        )
    }

    /// The courier has confirmed the job and is working it.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Accepted
                | DeliveryStatus::ArrivingRestaurant
                | DeliveryStatus::AtRestaurant
                | DeliveryStatus::PickedUp
                | DeliveryStatus::InTransit
                | DeliveryStatus::Arrived
        )
    }

    /// Courier has the package on board.
    pub fn is_past_pickup(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::PickedUp | DeliveryStatus::InTransit | DeliveryStatus::Arrived
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::Accepted => "accepted",
            DeliveryStatus::ArrivingRestaurant => "arriving_restaurant",
            DeliveryStatus::AtRestaurant => "at_restaurant",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Arrived => "arrived",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Cancelled => "cancelled",
            DeliveryStatus::Returned => "returned",
        }
    }
}

/// Courier slot on a delivery. A delivery is either unassigned or carries the
/// id of exactly one courier; there is no half-assigned state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "courier_id", rename_all = "snake_case")]
pub enum CourierRef {
    Unassigned,
    Assigned(Uuid),
}

impl CourierRef {
    pub fn courier_id(&self) -> Option<Uuid> {
        match self {
            CourierRef::Unassigned => None,
            CourierRef::Assigned(id) => Some(*id),
        }
    }
}

/// Contact details copied onto the delivery at assignment time so order
/// screens render without a courier lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierContact {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EarningsBreakdown {
    pub base_fee: f64,
    pub distance_bonus: f64,
    pub wait_time_bonus: f64,
    pub peak_hour_bonus: f64,
    pub tip: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProofType {
    Photo,
    Signature,
    Otp,
    CustomerConfirm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofOfDelivery {
    pub proof_type: ProofType,
    /// Photo URL, signature blob reference, or the OTP digits as supplied.
    pub payload: Option<String>,
    /// For `otp`: did the supplied code match the stored one.
    pub otp_verified: Option<bool>,
    pub location: Option<GeoPoint>,
    /// True when the courier reported a position shortly before submitting.
    pub location_verified: bool,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub restaurant_id: Uuid,
    pub customer_id: Uuid,
    pub courier: CourierRef,
    pub courier_contact: Option<CourierContact>,
    pub status: DeliveryStatus,
    pub pickup_address: String,
    pub pickup_location: GeoPoint,
    pub delivery_address: String,
    pub delivery_location: GeoPoint,
    pub base_fee: f64,
    pub estimated_distance_km: f64,
    pub estimated_duration_minutes: f64,
    pub actual_distance_km: Option<f64>,
    pub actual_duration_minutes: Option<f64>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub actual_pickup_time: Option<DateTime<Utc>>,
    pub actual_delivery_time: Option<DateTime<Utc>>,
    pub provisional_eta_minutes: Option<f64>,
    pub earnings: Option<EarningsBreakdown>,
    pub tip: Option<f64>,
    pub proof_of_delivery: Option<ProofOfDelivery>,
    #[serde(skip_serializing, default)]
    pub otp_code: String,
    pub customer_rating: Option<u8>,
    pub rating_comment: Option<String>,
    pub status_history: Vec<StatusHistoryEntry>,
    pub location_history: Vec<LocationFix>,
    pub current_location: Option<LocationFix>,
    pub assignment_attempts: u32,
    pub priority: bool,
    pub tracking_code: String,
    pub chat_thread: Vec<ChatMessage>,
    pub settled: bool,
    pub payout_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Creation parameters; everything else starts at its zero state.
pub struct NewDelivery {
    pub order_id: Uuid,
    pub restaurant_id: Uuid,
    pub customer_id: Uuid,
    pub pickup_address: String,
    pub pickup_location: GeoPoint,
    pub delivery_address: String,
    pub delivery_location: GeoPoint,
    pub base_fee: f64,
    pub priority: bool,
}

impl Delivery {
    pub fn create(
        params: NewDelivery,
        estimated_distance_km: f64,
        estimated_duration_minutes: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::new_v4();
        // Short, URL-safe handle for the public tracking page; the OTP digits
        // come from a different slice of the same random id.
        let simple = id.simple().to_string();
        let tracking_code = simple[..8].to_string();
        let bytes = id.as_bytes();
        let otp_seed = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        let otp_code = format!("{:06}", otp_seed % 1_000_000);

        Self {
            id,
            order_id: params.order_id,
            restaurant_id: params.restaurant_id,
            customer_id: params.customer_id,
            courier: CourierRef::Unassigned,
            courier_contact: None,
            status: DeliveryStatus::Pending,
            pickup_address: params.pickup_address,
            pickup_location: params.pickup_location,
            delivery_address: params.delivery_address,
            delivery_location: params.delivery_location,
            base_fee: params.base_fee,
            estimated_distance_km,
            estimated_duration_minutes,
            actual_distance_km: None,
            actual_duration_minutes: None,
            assigned_at: None,
            accepted_at: None,
            actual_pickup_time: None,
            actual_delivery_time: None,
            provisional_eta_minutes: None,
            earnings: None,
            tip: None,
            proof_of_delivery: None,
            otp_code,
            customer_rating: None,
            rating_comment: None,
            status_history: vec![StatusHistoryEntry {
                event: "created".to_string(),
                timestamp: now,
                note: None,
            }],
            location_history: Vec::new(),
            current_location: None,
            assignment_attempts: 0,
            priority: params.priority,
            tracking_code,
            chat_thread: Vec::new(),
            settled: false,
            payout_id: None,
            created_at: now,
        }
    }

    /// Timestamp of the given history event, if it was recorded.
    pub fn history_timestamp(&self, event: &str) -> Option<DateTime<Utc>> {
        self.status_history
            .iter()
            .rev()
            .find(|entry| entry.event == event)
            .map(|entry| entry.timestamp)
    }
}
