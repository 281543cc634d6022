//! HTTP handlers for configuration retrieval endpoints.

use axum::{Json, extract::State};

use crate::{AppState, api::models::config::PublicConfigResponse};

#[utoipa::path(
    get,
    path = "/config",
    tag = "config",
    summary = "Get marketplace settings",
    description = "Public marketplace settings: fees, boost pricing, listing limits and the payment provider",
    responses(
        (status = 200, description = "Marketplace settings", body = PublicConfigResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_config(State(state): State<AppState>) -> Json<PublicConfigResponse> {
    let config = &state.config;
    let market = &config.marketplace;

    Json(PublicConfigResponse {
        service_fee_percent: market.service_fee_percent,
        boosting_price_per_day: market.boosting_price_per_day,
        max_boost_days: market.max_boost_days,
        min_contract_months: market.min_contract_months,
        max_images: market.max_images,
        listings_require_approval: market.listings_require_approval,
        payment_provider: state.payment_provider.as_ref().map(|provider| provider.name().to_string()),
        registration_enabled: config.auth.native.enabled && config.auth.native.allow_registration,
        supabase_auth_enabled: config.auth.supabase.enabled,
    })
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{create_test_config, create_test_server, create_test_state, create_test_state_with};
    use axum::http::StatusCode;
    use serde_json::Value;

    #[tokio::test]
    async fn test_get_config_is_public() {
        let server = create_test_server(create_test_state());

        let response = server.get("/api/config").await;

        response.assert_status(StatusCode::OK);
        let json: Value = response.json();
        assert_eq!(json["payment_provider"], "dummy");
        assert_eq!(json["service_fee_percent"], "5");
        assert_eq!(json["boosting_price_per_day"], 20_000);
        assert_eq!(json["registration_enabled"], true);
    }

    #[tokio::test]
    async fn test_get_config_without_payments() {
        let mut config = create_test_config();
        config.payment = None;
        config.auth.native.allow_registration = false;
        let server = create_test_server(create_test_state_with(config));

        let json: Value = server.get("/api/config").await.json();
        assert!(json["payment_provider"].is_null());
        assert_eq!(json["registration_enabled"], false);
    }
}
