use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    /// Auto-dispatch search radius around the pickup point.
    pub dispatch_radius_km: f64,
    /// Added to the ETA while the courier is still inbound to the restaurant.
    pub prep_buffer_minutes: f64,
    /// Average speed for the straight-line ETA fallback.
    pub fallback_speed_kmh: f64,
    pub routing_enabled: bool,
    pub routing_timeout_ms: u64,
    pub transfer_timeout_ms: u64,
    pub payout_retry_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            dispatch_radius_km: parse_or_default("DISPATCH_RADIUS_KM", 10.0)?,
            prep_buffer_minutes: parse_or_default("PREP_BUFFER_MINUTES", 5.0)?,
            fallback_speed_kmh: parse_or_default("FALLBACK_SPEED_KMH", 25.0)?,
            routing_enabled: parse_or_default("ROUTING_ENABLED", false)?,
            routing_timeout_ms: parse_or_default("ROUTING_TIMEOUT_MS", 2_000)?,
            transfer_timeout_ms: parse_or_default("TRANSFER_TIMEOUT_MS", 5_000)?,
            payout_retry_interval_secs: parse_or_default("PAYOUT_RETRY_INTERVAL_SECS", 300)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            dispatch_radius_km: 10.0,
            prep_buffer_minutes: 5.0,
            fallback_speed_kmh: 25.0,
            routing_enabled: false,
            routing_timeout_ms: 2_000,
            transfer_timeout_ms: 5_000,
            payout_retry_interval_secs: 300,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
