use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::earnings::COURIER_SHARE;
use crate::error::AppError;
use crate::models::delivery::DeliveryStatus;
use crate::models::payout::{Payout, PayoutBreakdown, PayoutStatus};
use crate::state::{AppState, DeliveryEvent};

/// Batch the courier's settled, not-yet-paid deliveries from the trailing
/// 7-day window into one payout and drive the external transfer.
///
/// Idempotent per (courier, ISO week): repeat calls in the same week return
/// `None`, and every batched delivery is stamped with the payout id under its
/// own entry guard, so no delivery can ever be paid twice.
pub async fn create_weekly_payout(
    state: &AppState,
    courier_id: Uuid,
) -> Result<Option<Payout>, AppError> {
    let account = {
        let courier = state
            .couriers
            .get(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;
        courier.payout_account.clone()
    };

    let now = Utc::now();
    let period_end = now;
    let period_start = now - chrono::Duration::days(7);
    let week = now.iso_week();
    let period_key = format!("{}-W{:02}", week.year(), week.week());

    let duplicate = state.payouts.iter().any(|entry| {
        entry.courier_id == courier_id && entry.period_key == period_key
    });
    if duplicate {
        info!(courier_id = %courier_id, period = %period_key, "payout already exists, no-op");
        return Ok(None);
    }

    let candidate_ids: Vec<Uuid> = state
        .deliveries
        .iter()
        .filter_map(|entry| {
            let d = entry.value();
            let eligible = d.courier.courier_id() == Some(courier_id)
                && d.status == DeliveryStatus::Delivered
                && d.settled
                && d.payout_id.is_none()
                && d.actual_delivery_time
                    .is_some_and(|at| at > period_start && at <= period_end);
            eligible.then_some(d.id)
        })
        .collect();

    let payout_id = Uuid::new_v4();
    let mut breakdown = PayoutBreakdown::default();
    let mut gross = 0.0;
    let mut claimed = 0u32;

    // Claim each delivery under its guard; a concurrent batch that got there
    // first simply wins that delivery.
    for delivery_id in candidate_ids {
        let Some(mut delivery) = state.deliveries.get_mut(&delivery_id) else {
            continue;
        };
        if delivery.payout_id.is_some() {
            continue;
        }
        let Some(earnings) = delivery.earnings.clone() else {
            continue;
        };

        delivery.payout_id = Some(payout_id);

        breakdown.base_fees += earnings.base_fee;
        breakdown.distance_bonuses += earnings.distance_bonus;
        breakdown.wait_time_bonuses += earnings.wait_time_bonus;
        breakdown.peak_hour_bonuses += earnings.peak_hour_bonus;
        breakdown.tips += earnings.tip;
        gross += earnings.total;
        claimed += 1;
    }

    if claimed == 0 {
        info!(courier_id = %courier_id, "no settled deliveries to pay out, no-op");
        return Ok(None);
    }

    let net = (gross - breakdown.tips) * COURIER_SHARE + breakdown.tips;

    let payout = Payout {
        id: payout_id,
        courier_id,
        period_start,
        period_end,
        period_key,
        breakdown,
        gross,
        net,
        delivery_count: claimed,
        status: PayoutStatus::Pending,
        transfer_ref: None,
        created_at: now,
        completed_at: None,
    };
    state.payouts.insert(payout_id, payout);

    info!(
        courier_id = %courier_id,
        payout_id = %payout_id,
        deliveries = claimed,
        net,
        "payout batched"
    );

    drive_transfer(state, payout_id, &account).await;

    Ok(state.payouts.get(&payout_id).map(|p| p.clone()))
}

/// Push one payout through the payment processor. Failure leaves the payout
/// in `failed` for the retry job; it is never dropped.
async fn drive_transfer(state: &AppState, payout_id: Uuid, account: &str) {
    let (courier_id, net, memo) = {
        let Some(mut payout) = state.payouts.get_mut(&payout_id) else {
            return;
        };
        payout.status = PayoutStatus::Processing;
        (
            payout.courier_id,
            payout.net,
            format!("weekly payout {}", payout.period_key),
        )
    };

    let amount_cents = (net * 100.0).round() as i64;
    let deadline = Duration::from_millis(state.config.transfer_timeout_ms);
    let result = timeout(deadline, state.payments.transfer(account, amount_cents, &memo)).await;

    match result {
        Ok(Ok(receipt)) => {
            if let Some(mut payout) = state.payouts.get_mut(&payout_id) {
                payout.transfer_ref = Some(receipt.reference);
            }
            complete_payout(state, payout_id);
        }
        Ok(Err(err)) => {
            mark_failed(state, payout_id);
            warn!(payout_id = %payout_id, error = %err, "payout transfer failed, will retry");
        }
        Err(_) => {
            mark_failed(state, payout_id);
            warn!(
                payout_id = %payout_id,
                timeout_ms = state.config.transfer_timeout_ms,
                "payout transfer timed out, will retry"
            );
        }
    }
}

/// Settle a payout as completed. The courier's balance is debited only on the
/// first completion, so a retry that lands after a late success callback
/// cannot debit twice.
fn complete_payout(state: &AppState, payout_id: Uuid) {
    let now = Utc::now();

    let (courier_id, net, first_completion) = {
        let Some(mut payout) = state.payouts.get_mut(&payout_id) else {
            return;
        };
        let first = payout.completed_at.is_none();
        payout.status = PayoutStatus::Completed;
        if first {
            payout.completed_at = Some(now);
        }
        (payout.courier_id, payout.net, first)
    };

    if first_completion {
        if let Some(mut courier) = state.couriers.get_mut(&courier_id) {
            courier.balance -= net;
            courier.updated_at = now;
        }
        state
            .metrics
            .payouts_total
            .with_label_values(&["completed"])
            .inc();
        state.broadcast(DeliveryEvent::PayoutCompleted {
            payout_id,
            courier_id,
            net,
        });
    }

    info!(payout_id = %payout_id, net, "payout transfer completed");
}

fn mark_failed(state: &AppState, payout_id: Uuid) {
    if let Some(mut payout) = state.payouts.get_mut(&payout_id) {
        payout.status = PayoutStatus::Failed;
    }
    state
        .metrics
        .payouts_total
        .with_label_values(&["failed"])
        .inc();
}

/// Processor callback: the transfer we drove earlier has settled (or bounced)
/// on the provider side. Looked up by the transfer reference we were handed.
pub fn apply_transfer_callback(
    state: &AppState,
    reference: &str,
    succeeded: bool,
) -> Result<Payout, AppError> {
    let payout_id = state
        .payouts
        .iter()
        .find(|entry| entry.transfer_ref.as_deref() == Some(reference))
        .map(|entry| entry.id)
        .ok_or_else(|| {
            AppError::NotFound(format!("no payout with transfer reference {reference}"))
        })?;

    if succeeded {
        complete_payout(state, payout_id);
    } else {
        mark_failed(state, payout_id);
        warn!(payout_id = %payout_id, reference, "transfer bounced, payout queued for retry");
    }

    state
        .payouts
        .get(&payout_id)
        .map(|p| p.clone())
        .ok_or_else(|| AppError::Internal(format!("payout {payout_id} disappeared")))
}

/// Background job: periodically re-drives transfers for payouts stuck in
/// `pending` or `failed`.
pub async fn run_payout_retry(state: Arc<AppState>) {
    let interval = Duration::from_secs(state.config.payout_retry_interval_secs);
    info!(
        interval_secs = state.config.payout_retry_interval_secs,
        "payout retry job started"
    );

    loop {
        tokio::time::sleep(interval).await;
        retry_stuck_payouts(&state).await;
    }
}

/// One retry pass over stuck payouts; the loop above and tests share it.
pub async fn retry_stuck_payouts(state: &AppState) {
    let stuck: Vec<(Uuid, Uuid)> = state
        .payouts
        .iter()
        .filter(|entry| matches!(entry.status, PayoutStatus::Pending | PayoutStatus::Failed))
        .map(|entry| (entry.id, entry.courier_id))
        .collect();

    for (payout_id, courier_id) in stuck {
        let Some(account) = state
            .couriers
            .get(&courier_id)
            .map(|c| c.payout_account.clone())
        else {
            error!(payout_id = %payout_id, "payout references unknown courier");
            continue;
        };

        info!(payout_id = %payout_id, "retrying payout transfer");
        drive_transfer(state, payout_id, &account).await;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutSummary {
    pub courier_id: Uuid,
    pub balance: f64,
    pub pending_payout_total: f64,
    pub lifetime_earnings: f64,
    pub last_completed_payout: Option<Payout>,
}

pub fn get_payout_summary(state: &AppState, courier_id: Uuid) -> Result<PayoutSummary, AppError> {
    let (balance, lifetime_earnings) = {
        let courier = state
            .couriers
            .get(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;
        (courier.balance, courier.lifetime_earnings)
    };

    let mut pending_payout_total = 0.0;
    let mut last_completed: Option<Payout> = None;

    for entry in state.payouts.iter() {
        if entry.courier_id != courier_id {
            continue;
        }
        match entry.status {
            PayoutStatus::Completed => {
                let newer = last_completed
                    .as_ref()
                    .map(|p| entry.completed_at > p.completed_at)
                    .unwrap_or(true);
                if newer {
                    last_completed = Some(entry.clone());
                }
            }
            _ => pending_payout_total += entry.net,
        }
    }

    Ok(PayoutSummary {
        courier_id,
        balance,
        pending_payout_total,
        lifetime_earnings,
        last_completed_payout: last_completed,
    })
}
