//! Payment provider abstraction layer
//!
//! This module defines the `PaymentProvider` trait, which covers the three gateway interactions
//! the marketplace needs: creating an order for a pending transaction, querying its status, and
//! verifying a signed callback. Applying a confirmed payment to the database lives in
//! [`settlement`], independent of the provider.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    auth::password::generate_reference_token,
    config::PaymentConfig,
    db::errors::DbError,
    types::{TransactionId, UserId, vietnam_time},
};

pub mod dummy;
pub mod settlement;
pub mod signing;
pub mod zalopay;

/// Create a payment provider from configuration
///
/// This is the single point where we convert config into provider instances.
pub fn create_provider(config: PaymentConfig) -> Result<Arc<dyn PaymentProvider>> {
    Ok(match config {
        PaymentConfig::ZaloPay(zalopay_config) => Arc::new(zalopay::ZaloPayProvider::new(zalopay_config)?),
        PaymentConfig::Dummy(dummy_config) => Arc::new(dummy::DummyProvider::from(dummy_config)),
    })
}

/// Result type for payment provider operations
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors that can occur during payment processing
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("No payment provider is configured")]
    NotConfigured,

    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    #[error("Payment gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Callback signature does not match")]
    InvalidSignature,

    #[error("Invalid payment data: {0}")]
    InvalidData(String),

    #[error(transparent)]
    Database(#[from] DbError),
}

/// A gateway order reference (ZaloPay `app_trans_id`): the Vietnam date as `yyMMdd`, an
/// underscore, and a random suffix.
pub fn new_order_reference(now: DateTime<Utc>) -> String {
    format!("{}_{}", vietnam_time(now).format("%y%m%d"), generate_reference_token(12))
}

/// What the gateway needs to open an order.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub transaction_id: TransactionId,
    pub reference: String,
    pub payer_id: UserId,
    pub amount: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    /// Where the payer completes the payment
    pub order_url: String,
    /// Gateway token for the order (ZaloPay `zp_trans_token`)
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    Paid {
        gateway_transaction_id: Option<String>,
        amount: Option<i64>,
    },
    Failed {
        message: String,
    },
    Processing,
}

impl OrderStatus {
    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Paid { .. } => "paid",
            OrderStatus::Failed { .. } => "failed",
            OrderStatus::Processing => "processing",
        }
    }
}

/// A verified payment confirmation pushed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub reference: String,
    pub gateway_transaction_id: Option<String>,
    pub amount: i64,
}

/// Abstract payment provider interface
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Short provider name, as reported by `/api/config`
    fn name(&self) -> &'static str;

    /// Open a gateway order. The caller stores the returned URL against the transaction.
    async fn create_order(&self, order: &OrderRequest) -> Result<CreatedOrder>;

    /// Ask the gateway for the state of an order.
    async fn query_order(&self, reference: &str) -> Result<OrderStatus>;

    /// Verify a callback's MAC and decode its payload.
    ///
    /// Returns [`PaymentError::InvalidSignature`] when the MAC does not match, and
    /// [`PaymentError::InvalidData`] when the signed payload cannot be decoded.
    fn verify_callback(&self, data: &str, mac: &str) -> Result<PaymentConfirmation>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_reference_uses_vietnam_date() {
        let late_evening_utc = DateTime::parse_from_rfc3339("2026-03-31T18:30:00Z").unwrap().with_timezone(&Utc);
        let reference = new_order_reference(late_evening_utc);
        let (date, suffix) = reference.split_once('_').unwrap();
        assert_eq!(date, "260401");
        assert_eq!(suffix.len(), 16);
        assert!(reference.len() <= 40);
    }

    #[test]
    fn test_order_references_are_unique() {
        let now = Utc::now();
        assert_ne!(new_order_reference(now), new_order_reference(now));
    }
}
