//! ZaloPay v2 payment provider.
//!
//! Create and query requests are form-encoded POSTs signed with `key1`. Callbacks carry a JSON
//! `data` string signed with `key2`.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{CreatedOrder, OrderRequest, OrderStatus, PaymentConfirmation, PaymentError, PaymentProvider, Result, signing};
use crate::config::ZaloPayConfig;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const EMPTY_ITEMS: &str = "[]";

pub struct ZaloPayProvider {
    config: ZaloPayConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    return_code: i32,
    #[serde(default)]
    return_message: String,
    #[serde(default)]
    sub_return_message: Option<String>,
    order_url: Option<String>,
    zp_trans_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryOrderResponse {
    return_code: i32,
    #[serde(default)]
    return_message: String,
    #[serde(default)]
    sub_return_message: Option<String>,
    amount: Option<i64>,
    zp_trans_id: Option<serde_json::Value>,
}

/// The JSON document inside a callback's `data` field.
#[derive(Debug, Deserialize)]
struct CallbackData {
    app_trans_id: String,
    zp_trans_id: Option<serde_json::Value>,
    amount: i64,
}

/// ZaloPay sends `zp_trans_id` as a number; keep it as text.
fn id_text(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn gateway_message(return_code: i32, message: &str, sub_message: Option<&str>) -> String {
    match sub_message.filter(|s| !s.is_empty()) {
        Some(sub) => format!("return_code {return_code}: {message} ({sub})"),
        None => format!("return_code {return_code}: {message}"),
    }
}

/// Decode a verified callback `data` document.
pub(super) fn decode_callback(data: &str) -> Result<PaymentConfirmation> {
    let payload: CallbackData =
        serde_json::from_str(data).map_err(|e| PaymentError::InvalidData(format!("callback data: {e}")))?;
    Ok(PaymentConfirmation {
        reference: payload.app_trans_id,
        gateway_transaction_id: id_text(payload.zp_trans_id),
        amount: payload.amount,
    })
}

impl ZaloPayProvider {
    pub fn new(config: ZaloPayConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// `app_id|app_trans_id|app_user|amount|app_time|embed_data|item`
    fn create_mac(&self, reference: &str, app_user: &str, amount: i64, app_time: i64, embed_data: &str) -> Result<String> {
        let data = format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.config.app_id, reference, app_user, amount, app_time, embed_data, EMPTY_ITEMS
        );
        signing::sign(&self.config.key1, &data)
    }

    /// `app_id|app_trans_id|key1`
    fn query_mac(&self, reference: &str) -> Result<String> {
        let data = format!("{}|{}|{}", self.config.app_id, reference, self.config.key1);
        signing::sign(&self.config.key1, &data)
    }

    async fn post_form<T: serde::de::DeserializeOwned>(&self, url: &url::Url, fields: &[(&str, String)]) -> Result<T> {
        let body = serde_urlencoded::to_string(fields).map_err(|e| PaymentError::InvalidData(format!("encode form: {e}")))?;
        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PaymentProvider for ZaloPayProvider {
    fn name(&self) -> &'static str {
        "zalopay"
    }

    #[instrument(skip(self, order), fields(reference = %order.reference, amount = order.amount), err)]
    async fn create_order(&self, order: &OrderRequest) -> Result<CreatedOrder> {
        let app_time = Utc::now().timestamp_millis();
        let app_user = order.payer_id.to_string();
        let embed_data = serde_json::json!({
            "redirecturl": self.config.redirect_url.as_ref().map(|u| u.as_str()).unwrap_or_default(),
            "transaction_id": order.transaction_id,
        })
        .to_string();
        let mac = self.create_mac(&order.reference, &app_user, order.amount, app_time, &embed_data)?;

        let mut fields = vec![
            ("app_id", self.config.app_id.to_string()),
            ("app_user", app_user),
            ("app_time", app_time.to_string()),
            ("amount", order.amount.to_string()),
            ("app_trans_id", order.reference.clone()),
            ("embed_data", embed_data),
            ("item", EMPTY_ITEMS.to_string()),
            ("description", order.description.clone()),
            ("bank_code", String::new()),
        ];
        if let Some(callback_url) = &self.config.callback_url {
            fields.push(("callback_url", callback_url.to_string()));
        }
        fields.push(("mac", mac));

        let response: CreateOrderResponse = self.post_form(&self.config.create_endpoint, &fields).await?;
        if response.return_code != 1 {
            return Err(PaymentError::ProviderApi(gateway_message(
                response.return_code,
                &response.return_message,
                response.sub_return_message.as_deref(),
            )));
        }
        let order_url = response
            .order_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| PaymentError::ProviderApi("order created without an order_url".to_string()))?;

        debug!("ZaloPay order created");
        Ok(CreatedOrder {
            order_url,
            token: response.zp_trans_token,
        })
    }

    #[instrument(skip(self), err)]
    async fn query_order(&self, reference: &str) -> Result<OrderStatus> {
        let fields = [
            ("app_id", self.config.app_id.to_string()),
            ("app_trans_id", reference.to_string()),
            ("mac", self.query_mac(reference)?),
        ];

        let response: QueryOrderResponse = self.post_form(&self.config.query_endpoint, &fields).await?;
        match response.return_code {
            1 => Ok(OrderStatus::Paid {
                gateway_transaction_id: id_text(response.zp_trans_id),
                amount: response.amount,
            }),
            2 => Ok(OrderStatus::Failed {
                message: gateway_message(2, &response.return_message, response.sub_return_message.as_deref()),
            }),
            3 => Ok(OrderStatus::Processing),
            code => {
                warn!(return_code = code, "Unexpected ZaloPay query response");
                Err(PaymentError::ProviderApi(gateway_message(
                    code,
                    &response.return_message,
                    response.sub_return_message.as_deref(),
                )))
            }
        }
    }

    fn verify_callback(&self, data: &str, mac: &str) -> Result<PaymentConfirmation> {
        if !signing::verify(&self.config.key2, data, mac) {
            return Err(PaymentError::InvalidSignature);
        }
        decode_callback(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &str) -> ZaloPayConfig {
        ZaloPayConfig {
            app_id: 2553,
            key1: "PcY4iZIKFCIdgZvA6ueMcMHHUbRLYjPL".to_string(),
            key2: "kLtgPl8HHhfvMuDHPwKfgfsY4Ydm9eIz".to_string(),
            create_endpoint: format!("{server}/v2/create").parse().unwrap(),
            query_endpoint: format!("{server}/v2/query").parse().unwrap(),
            callback_url: Some("https://api.holarental.vn/api/payments/zalopay/callback".parse().unwrap()),
            redirect_url: Some("https://holarental.vn/payments/done".parse().unwrap()),
            timeout: Duration::from_secs(5),
        }
    }

    fn install_crypto_provider() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    fn order() -> OrderRequest {
        OrderRequest {
            transaction_id: Uuid::new_v4(),
            reference: "260401_abcdef".to_string(),
            payer_id: Uuid::new_v4(),
            amount: 3_500_000,
            description: "HolaRental - deposit".to_string(),
        }
    }

    #[test]
    fn test_create_mac_signs_the_pipe_joined_fields() {
        let provider = ZaloPayProvider::new(config("http://localhost")).unwrap();
        let mac = provider
            .create_mac("260401_abcdef", "user-1", 50000, 1_775_000_000_000, "{}")
            .unwrap();
        let expected = signing::sign(
            "PcY4iZIKFCIdgZvA6ueMcMHHUbRLYjPL",
            "2553|260401_abcdef|user-1|50000|1775000000000|{}|[]",
        )
        .unwrap();
        assert_eq!(mac, expected);
    }

    #[test]
    fn test_query_mac_includes_key1() {
        let provider = ZaloPayProvider::new(config("http://localhost")).unwrap();
        let expected = signing::sign(
            "PcY4iZIKFCIdgZvA6ueMcMHHUbRLYjPL",
            "2553|260401_abcdef|PcY4iZIKFCIdgZvA6ueMcMHHUbRLYjPL",
        )
        .unwrap();
        assert_eq!(provider.query_mac("260401_abcdef").unwrap(), expected);
    }

    #[test]
    fn test_verify_callback_accepts_key2_signature() {
        let provider = ZaloPayProvider::new(config("http://localhost")).unwrap();
        let data = r#"{"app_id":2553,"app_trans_id":"260401_abcdef","zp_trans_id":240401000012345,"amount":3500000}"#;
        let mac = signing::sign("kLtgPl8HHhfvMuDHPwKfgfsY4Ydm9eIz", data).unwrap();

        let confirmation = provider.verify_callback(data, &mac).unwrap();
        assert_eq!(confirmation.reference, "260401_abcdef");
        assert_eq!(confirmation.gateway_transaction_id.as_deref(), Some("240401000012345"));
        assert_eq!(confirmation.amount, 3_500_000);
    }

    #[test]
    fn test_verify_callback_rejects_tampered_data_and_key1_signatures() {
        let provider = ZaloPayProvider::new(config("http://localhost")).unwrap();
        let data = r#"{"app_trans_id":"260401_abcdef","zp_trans_id":1,"amount":3500000}"#;
        let mac = signing::sign("kLtgPl8HHhfvMuDHPwKfgfsY4Ydm9eIz", data).unwrap();

        let tampered = data.replace("3500000", "35");
        assert!(matches!(
            provider.verify_callback(&tampered, &mac),
            Err(PaymentError::InvalidSignature)
        ));

        let signed_with_key1 = signing::sign("PcY4iZIKFCIdgZvA6ueMcMHHUbRLYjPL", data).unwrap();
        assert!(matches!(
            provider.verify_callback(data, &signed_with_key1),
            Err(PaymentError::InvalidSignature)
        ));
    }

    #[test]
    fn test_verify_callback_with_valid_mac_but_bad_payload() {
        let provider = ZaloPayProvider::new(config("http://localhost")).unwrap();
        let data = r#"{"unexpected":true}"#;
        let mac = signing::sign("kLtgPl8HHhfvMuDHPwKfgfsY4Ydm9eIz", data).unwrap();
        assert!(matches!(provider.verify_callback(data, &mac), Err(PaymentError::InvalidData(_))));
    }

    #[test_log::test(tokio::test)]
    async fn test_create_order_posts_signed_form() {
        install_crypto_provider();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/create"))
            .and(header("content-type", FORM_CONTENT_TYPE))
            .and(body_string_contains("app_id=2553"))
            .and(body_string_contains("app_trans_id=260401_abcdef"))
            .and(body_string_contains("amount=3500000"))
            .and(body_string_contains("item=%5B%5D"))
            .and(body_string_contains("mac="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "return_code": 1,
                "return_message": "Giao dịch thành công",
                "order_url": "https://qcgateway.zalopay.vn/openinapp?order=abc",
                "zp_trans_token": "ACtoken123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ZaloPayProvider::new(config(&server.uri())).unwrap();
        let created = provider.create_order(&order()).await.unwrap();
        assert_eq!(created.order_url, "https://qcgateway.zalopay.vn/openinapp?order=abc");
        assert_eq!(created.token.as_deref(), Some("ACtoken123"));
    }

    #[test_log::test(tokio::test)]
    async fn test_create_order_surfaces_gateway_rejection() {
        install_crypto_provider();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "return_code": 2,
                "return_message": "Giao dịch thất bại",
                "sub_return_message": "Invalid mac"
            })))
            .mount(&server)
            .await;

        let provider = ZaloPayProvider::new(config(&server.uri())).unwrap();
        let err = provider.create_order(&order()).await.unwrap_err();
        match err {
            PaymentError::ProviderApi(message) => assert!(message.contains("Invalid mac"), "{message}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_query_order_maps_return_codes() {
        install_crypto_provider();
        let server = MockServer::start().await;
        for (reference, body) in [
            (
                "260401_paid",
                serde_json::json!({"return_code": 1, "return_message": "ok", "amount": 3500000, "zp_trans_id": 240401000012345_i64}),
            ),
            ("260401_failed", serde_json::json!({"return_code": 2, "return_message": "failed"})),
            ("260401_pending", serde_json::json!({"return_code": 3, "return_message": "processing"})),
        ] {
            Mock::given(method("POST"))
                .and(path("/v2/query"))
                .and(body_string_contains(format!("app_trans_id={reference}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .mount(&server)
                .await;
        }

        let provider = ZaloPayProvider::new(config(&server.uri())).unwrap();
        assert_eq!(
            provider.query_order("260401_paid").await.unwrap(),
            OrderStatus::Paid {
                gateway_transaction_id: Some("240401000012345".to_string()),
                amount: Some(3_500_000),
            }
        );
        assert!(matches!(
            provider.query_order("260401_failed").await.unwrap(),
            OrderStatus::Failed { .. }
        ));
        assert_eq!(provider.query_order("260401_pending").await.unwrap(), OrderStatus::Processing);
    }

    #[test_log::test(tokio::test)]
    async fn test_query_order_http_error_is_reported() {
        install_crypto_provider();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/query"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let provider = ZaloPayProvider::new(config(&server.uri())).unwrap();
        assert!(matches!(provider.query_order("260401_x").await, Err(PaymentError::Http(_))));
    }
}
