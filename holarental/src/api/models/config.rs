//! Public marketplace settings exposed to clients.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublicConfigResponse {
    /// Percentage of the monthly rent charged to the owner once per contract
    #[schema(value_type = String)]
    pub service_fee_percent: rust_decimal::Decimal,
    /// VND per boosted day
    pub boosting_price_per_day: i64,
    pub max_boost_days: i64,
    pub min_contract_months: u32,
    pub max_images: usize,
    pub listings_require_approval: bool,
    /// `zalopay`, `dummy`, or absent when payments are disabled
    pub payment_provider: Option<String>,
    pub registration_enabled: bool,
    pub supabase_auth_enabled: bool,
}
