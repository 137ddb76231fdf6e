use axum::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment processor rejected transfer: {0}")]
    Rejected(String),
    #[error("payment processor unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub reference: String,
}

/// External money movement. Amounts cross this boundary in integer cents;
/// float arithmetic stays inside the engine.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn transfer(
        &self,
        account: &str,
        amount_cents: i64,
        memo: &str,
    ) -> Result<TransferReceipt, PaymentError>;
}

/// Default processor for environments without live payment credentials.
/// Accepts every transfer and mints a local reference.
pub struct SimulatedProcessor;

#[async_trait]
impl PaymentProcessor for SimulatedProcessor {
    async fn transfer(
        &self,
        account: &str,
        amount_cents: i64,
        _memo: &str,
    ) -> Result<TransferReceipt, PaymentError> {
        if account.trim().is_empty() {
            return Err(PaymentError::Rejected("missing payout account".to_string()));
        }
        if amount_cents <= 0 {
            return Err(PaymentError::Rejected("non-positive amount".to_string()));
        }

        Ok(TransferReceipt {
            reference: format!("sim-{}", Uuid::new_v4().simple()),
        })
    }
}
