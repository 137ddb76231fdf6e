use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayoutBreakdown {
    pub base_fees: f64,
    pub distance_bonuses: f64,
    pub wait_time_bonuses: f64,
    pub peak_hour_bonuses: f64,
    pub tips: f64,
    pub deductions: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub courier_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Idempotence key: ISO year-week of the batching call, e.g. "2026-W32".
    pub period_key: String,
    pub breakdown: PayoutBreakdown,
    pub gross: f64,
    pub net: f64,
    pub delivery_count: u32,
    pub status: PayoutStatus,
    pub transfer_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
