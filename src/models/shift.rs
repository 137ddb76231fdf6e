use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakInterval {
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One working session. Earnings and delivery counts accumulate here as the
/// courier completes deliveries while the shift is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shift {
    pub id: Uuid,
    pub courier_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub breaks: Vec<BreakInterval>,
    pub deliveries_completed: u32,
    pub earnings: f64,
    pub tips: f64,
}

impl Shift {
    pub fn start(courier_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            courier_id,
            started_at: now,
            ended_at: None,
            breaks: Vec::new(),
            deliveries_completed: 0,
            earnings: 0.0,
            tips: 0.0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn on_break(&self) -> bool {
        self.breaks
            .last()
            .is_some_and(|interval| interval.ended_at.is_none())
    }
}
