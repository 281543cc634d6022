//! API models for gateway checkout and the ZaloPay callback.

use super::transactions::TransactionResponse;
use crate::types::TransactionId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result of `POST /payments/{id}/checkout`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    #[schema(value_type = String, format = "uuid")]
    pub transaction_id: TransactionId,
    /// Where the payer completes the payment
    pub order_url: String,
    /// Gateway order reference (`app_trans_id`)
    pub gateway_reference: String,
    /// Name of the configured provider
    pub provider: String,
}

/// Result of `POST /payments/{id}/sync`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentSyncResponse {
    pub transaction: TransactionResponse,
    /// `paid`, `failed` or `processing`, as reported by the gateway
    pub gateway_status: String,
}

/// Body ZaloPay posts to the callback URL.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ZaloPayCallbackRequest {
    /// JSON-encoded order data, signed with key2
    pub data: String,
    pub mac: String,
    #[serde(rename = "type", default)]
    pub callback_type: Option<i32>,
}

/// Reply expected by ZaloPay. `1` acknowledges, `-1` rejects, `0` asks for a retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ZaloPayCallbackResponse {
    pub return_code: i32,
    pub return_message: String,
}

impl ZaloPayCallbackResponse {
    pub fn success() -> Self {
        Self {
            return_code: 1,
            return_message: "success".to_string(),
        }
    }

    pub fn mac_mismatch() -> Self {
        Self {
            return_code: -1,
            return_message: "mac not equal".to_string(),
        }
    }

    pub fn retry(message: impl Into<String>) -> Self {
        Self {
            return_code: 0,
            return_message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_body_uses_type_key() {
        let body: ZaloPayCallbackRequest =
            serde_json::from_str(r#"{"data":"{}","mac":"abc","type":1}"#).unwrap();
        assert_eq!(body.callback_type, Some(1));

        let body: ZaloPayCallbackRequest = serde_json::from_str(r#"{"data":"{}","mac":"abc"}"#).unwrap();
        assert_eq!(body.callback_type, None);
    }

    #[test]
    fn test_callback_replies() {
        assert_eq!(
            serde_json::to_value(ZaloPayCallbackResponse::mac_mismatch()).unwrap(),
            serde_json::json!({"return_code": -1, "return_message": "mac not equal"})
        );
        assert_eq!(ZaloPayCallbackResponse::success().return_code, 1);
        assert_eq!(ZaloPayCallbackResponse::retry("unknown order").return_code, 0);
    }
}
