//! Dummy payment provider implementation
//!
//! Opens orders without contacting any gateway. Useful for local development and tests: the
//! sync endpoint settles orders when `auto_complete` is set, and callbacks can be simulated by
//! signing the `data` document with [`DUMMY_CALLBACK_KEY`].

use async_trait::async_trait;

use crate::{
    config::DummyConfig,
    payment_providers::{CreatedOrder, OrderRequest, OrderStatus, PaymentConfirmation, PaymentError, PaymentProvider, Result, signing, zalopay},
};

/// Fixed development key for signing dummy callbacks
pub const DUMMY_CALLBACK_KEY: &str = "holarental-dummy-callback-key";

/// Dummy payment provider that completes orders locally
pub struct DummyProvider {
    auto_complete: bool,
}

impl From<DummyConfig> for DummyProvider {
    fn from(config: DummyConfig) -> Self {
        Self {
            auto_complete: config.auto_complete,
        }
    }
}

/// Sign a callback body the way the dummy gateway would.
pub fn sign_callback(data: &str) -> Result<String> {
    signing::sign(DUMMY_CALLBACK_KEY, data)
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    fn name(&self) -> &'static str {
        "dummy"
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<CreatedOrder> {
        tracing::info!(
            "Dummy provider opened order {} for transaction {}",
            order.reference,
            order.transaction_id
        );
        Ok(CreatedOrder {
            order_url: format!("/payments/dummy/{}", order.reference),
            token: None,
        })
    }

    async fn query_order(&self, reference: &str) -> Result<OrderStatus> {
        if reference.is_empty() {
            return Err(PaymentError::InvalidData("Empty order reference".to_string()));
        }
        if self.auto_complete {
            Ok(OrderStatus::Paid {
                gateway_transaction_id: Some(format!("dummy_{reference}")),
                amount: None,
            })
        } else {
            Ok(OrderStatus::Processing)
        }
    }

    fn verify_callback(&self, data: &str, mac: &str) -> Result<PaymentConfirmation> {
        if !signing::verify(DUMMY_CALLBACK_KEY, data, mac) {
            return Err(PaymentError::InvalidSignature);
        }
        zalopay::decode_callback(data)
    }
}
