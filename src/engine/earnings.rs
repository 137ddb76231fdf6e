use chrono::{DateTime, Timelike, Utc};

use crate::models::delivery::{Delivery, EarningsBreakdown};
use crate::state::AppState;

const FREE_DISTANCE_KM: f64 = 3.0;
const DISTANCE_BONUS_PER_KM: f64 = 0.50;
const FREE_WAIT_MINUTES: f64 = 10.0;
const WAIT_BONUS_PER_MINUTE: f64 = 0.15;
const PEAK_HOUR_RATE: f64 = 0.20;

/// Lunch and dinner rush, half-open on the UTC hour.
const PEAK_WINDOWS: [(u32, u32); 2] = [(11, 14), (18, 22)];

/// Share of non-tip earnings credited to the courier; tips pass through whole.
pub const COURIER_SHARE: f64 = 0.80;

pub fn is_peak_hour(timestamp: DateTime<Utc>) -> bool {
    let hour = timestamp.hour();
    PEAK_WINDOWS
        .iter()
        .any(|&(start, end)| hour >= start && hour < end)
}

/// Per-delivery earnings. Deterministic, no I/O; the single source of truth
/// for how a delivery's fee decomposes.
pub fn calculate_delivery_earnings(
    base_fee: f64,
    distance_km: f64,
    wait_minutes: f64,
    tip: f64,
    timestamp: DateTime<Utc>,
) -> EarningsBreakdown {
    let distance_bonus = (distance_km - FREE_DISTANCE_KM).max(0.0) * DISTANCE_BONUS_PER_KM;
    let wait_time_bonus = (wait_minutes - FREE_WAIT_MINUTES).max(0.0) * WAIT_BONUS_PER_MINUTE;
    let peak_hour_bonus = if is_peak_hour(timestamp) {
        (base_fee + distance_bonus) * PEAK_HOUR_RATE
    } else {
        0.0
    };
    let total = base_fee + distance_bonus + wait_time_bonus + peak_hour_bonus + tip;

    EarningsBreakdown {
        base_fee,
        distance_bonus,
        wait_time_bonus,
        peak_hour_bonus,
        tip,
        total,
    }
}

/// Amount credited to the courier's balance for a breakdown: the courier
/// share of everything except the tip, plus the whole tip.
pub fn courier_credit(earnings: &EarningsBreakdown) -> f64 {
    (earnings.total - earnings.tip) * COURIER_SHARE + earnings.tip
}

/// Final settlement on `delivered`. Recomputes the breakdown from the actual
/// wait interval and credits the courier's balance, lifetime earnings, and
/// open shift. The caller holds the delivery's entry guard; courier and shift
/// writes nest inside it (delivery-then-courier lock order).
pub fn settle_delivered(state: &AppState, delivery: &mut Delivery, now: DateTime<Utc>) {
    let wait = match (
        delivery.history_timestamp("at_restaurant"),
        delivery.actual_pickup_time,
    ) {
        (Some(arrived), Some(picked_up)) => {
            ((picked_up - arrived).num_seconds() as f64 / 60.0).max(0.0)
        }
        _ => 0.0,
    };

    let distance = delivery
        .actual_distance_km
        .unwrap_or(delivery.estimated_distance_km);
    let tip = delivery.tip.unwrap_or(0.0);

    let breakdown = calculate_delivery_earnings(delivery.base_fee, distance, wait, tip, now);
    let credit = courier_credit(&breakdown);
    delivery.earnings = Some(breakdown);
    delivery.settled = true;

    let Some(courier_id) = delivery.courier.courier_id() else {
        return;
    };
    let Some(mut courier) = state.couriers.get_mut(&courier_id) else {
        return;
    };

    courier.balance += credit;
    courier.lifetime_earnings += credit;
    courier.updated_at = now;

    if let Some(shift_id) = courier.current_shift {
        if let Some(mut shift) = state.shifts.get_mut(&shift_id) {
            shift.deliveries_completed += 1;
            shift.earnings += credit;
            shift.tips += delivery.tip.unwrap_or(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{calculate_delivery_earnings, courier_credit, is_peak_hour};

    fn at_hour(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, hour, 30, 0).unwrap()
    }

    #[test]
    fn peak_windows_are_half_open() {
        assert!(!is_peak_hour(at_hour(10)));
        assert!(is_peak_hour(at_hour(11)));
        assert!(is_peak_hour(at_hour(13)));
        assert!(!is_peak_hour(at_hour(14)));
        assert!(!is_peak_hour(at_hour(17)));
        assert!(is_peak_hour(at_hour(18)));
        assert!(is_peak_hour(at_hour(21)));
        assert!(!is_peak_hour(at_hour(22)));
    }

    #[test]
    fn short_off_peak_delivery_earns_only_base_fee() {
        let earnings = calculate_delivery_earnings(3.50, 2.0, 5.0, 0.0, at_hour(9));

        assert_eq!(earnings.distance_bonus, 0.0);
        assert_eq!(earnings.wait_time_bonus, 0.0);
        assert_eq!(earnings.peak_hour_bonus, 0.0);
        assert!((earnings.total - 3.50).abs() < 1e-9);
    }

    #[test]
    fn long_peak_delivery_with_tip_stacks_all_bonuses() {
        let earnings = calculate_delivery_earnings(4.00, 6.0, 15.0, 3.00, at_hour(12));

        assert!((earnings.distance_bonus - 1.50).abs() < 1e-9);
        assert!((earnings.wait_time_bonus - 0.75).abs() < 1e-9);
        assert!((earnings.peak_hour_bonus - 1.10).abs() < 1e-9);
        assert!((earnings.total - 10.35).abs() < 1e-9);
    }

    #[test]
    fn total_always_equals_sum_of_components() {
        for (base, km, wait, tip, hour) in [
            (2.50, 0.0, 0.0, 0.0, 4),
            (3.50, 3.0, 10.0, 1.25, 11),
            (5.00, 12.5, 42.0, 7.0, 20),
            (4.00, 2.9, 9.9, 0.01, 13),
        ] {
            let e = calculate_delivery_earnings(base, km, wait, tip, at_hour(hour));
            let sum =
                e.base_fee + e.distance_bonus + e.wait_time_bonus + e.peak_hour_bonus + e.tip;
            assert!((e.total - sum).abs() < 1e-9);
        }
    }

    #[test]
    fn courier_keeps_eighty_percent_plus_full_tip() {
        let earnings = calculate_delivery_earnings(4.00, 6.0, 15.0, 3.00, at_hour(12));
        // (10.35 - 3.00) * 0.8 + 3.00
        assert!((courier_credit(&earnings) - 8.88).abs() < 1e-9);
    }
}
