use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// A timestamped position report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    pub recorded_at: DateTime<Utc>,
}

impl LocationFix {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Pending,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    Online,
    OnDelivery,
    OnBreak,
    Offline,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierStats {
    pub total_deliveries: u32,
    pub completed_deliveries: u32,
    pub completion_rate: f64,
    pub average_rating: f64,
    pub rated_deliveries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub verification: Verification,
    pub shift_status: ShiftStatus,
    pub available: bool,
    pub current_delivery: Option<Uuid>,
    pub current_shift: Option<Uuid>,
    pub current_location: Option<LocationFix>,
    pub stats: CourierStats,
    pub balance: f64,
    pub lifetime_earnings: f64,
    pub payout_account: String,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    /// Eligible to receive a new assignment right now.
    pub fn is_assignable(&self) -> bool {
        self.verification == Verification::Verified
            && self.shift_status == ShiftStatus::Online
            && self.available
            && self.current_delivery.is_none()
    }
}
