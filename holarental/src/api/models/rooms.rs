//! API request/response models for rooms.

use super::housing_areas::{MAX_IMAGES_CEILING, MAX_TAG_LEN, MAX_TAGS};
use super::pagination::Pagination;
use crate::db::models::rooms::RoomDBResponse;
use crate::types::{HousingAreaId, RoomId};
use crate::validation::{Validate, Validator};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::fmt;
use utoipa::{IntoParams, ToSchema};

pub const MAX_AREA_M2: i64 = 10_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "room_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Available,
    Reserved,
    Rented,
    Maintenance,
}

impl RoomStatus {
    /// `reserved` and `rented` belong to the contract lifecycle.
    pub fn is_manually_settable(self) -> bool {
        matches!(self, RoomStatus::Available | RoomStatus::Maintenance)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Reserved => "reserved",
            RoomStatus::Rented => "rented",
            RoomStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoomCreate {
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = String)]
    pub area_m2: Decimal,
    pub price_per_month: i64,
    #[serde(default)]
    pub deposit_amount: i64,
    #[serde(default)]
    pub electricity_price: i64,
    #[serde(default)]
    pub water_price: i64,
    pub max_occupants: i32,
    #[serde(default)]
    pub facilities: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl Validate for RoomCreate {
    fn validate(&self, v: &mut Validator) {
        v.text("name", &self.name, 1, 100)
            .optional_text("description", self.description.as_deref(), 2000)
            .positive_decimal("area_m2", self.area_m2, Decimal::from(MAX_AREA_M2))
            .positive("price_per_month", self.price_per_month)
            .non_negative("deposit_amount", self.deposit_amount)
            .non_negative("electricity_price", self.electricity_price)
            .non_negative("water_price", self.water_price)
            .range("max_occupants", self.max_occupants.into(), 1, 20)
            .tags("facilities", &self.facilities, MAX_TAGS, MAX_TAG_LEN)
            .urls("images", &self.images, MAX_IMAGES_CEILING);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RoomUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<String>)]
    pub area_m2: Option<Decimal>,
    pub price_per_month: Option<i64>,
    pub deposit_amount: Option<i64>,
    pub electricity_price: Option<i64>,
    pub water_price: Option<i64>,
    pub max_occupants: Option<i32>,
    pub facilities: Option<Vec<String>>,
    pub images: Option<Vec<String>>,
    /// Only `available` or `maintenance`
    pub status: Option<RoomStatus>,
}

impl Validate for RoomUpdate {
    fn validate(&self, v: &mut Validator) {
        let present = self.name.is_some()
            || self.description.is_some()
            || self.area_m2.is_some()
            || self.price_per_month.is_some()
            || self.deposit_amount.is_some()
            || self.electricity_price.is_some()
            || self.water_price.is_some()
            || self.max_occupants.is_some()
            || self.facilities.is_some()
            || self.images.is_some()
            || self.status.is_some();
        v.any_present(present);

        if let Some(name) = &self.name {
            v.text("name", name, 1, 100);
        }
        v.optional_text("description", self.description.as_deref(), 2000);
        if let Some(area) = self.area_m2 {
            v.positive_decimal("area_m2", area, Decimal::from(MAX_AREA_M2));
        }
        if let Some(price) = self.price_per_month {
            v.positive("price_per_month", price);
        }
        for (field, value) in [
            ("deposit_amount", self.deposit_amount),
            ("electricity_price", self.electricity_price),
            ("water_price", self.water_price),
        ] {
            if let Some(value) = value {
                v.non_negative(field, value);
            }
        }
        if let Some(occupants) = self.max_occupants {
            v.range("max_occupants", occupants.into(), 1, 20);
        }
        if let Some(facilities) = &self.facilities {
            v.tags("facilities", facilities, MAX_TAGS, MAX_TAG_LEN);
        }
        if let Some(images) = &self.images {
            v.urls("images", images, MAX_IMAGES_CEILING);
        }
        if let Some(status) = self.status {
            v.check(
                status.is_manually_settable(),
                "status",
                "may only be set to available or maintenance",
            );
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoomResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: RoomId,
    #[schema(value_type = String, format = "uuid")]
    pub housing_area_id: HousingAreaId,
    pub housing_area_name: String,
    pub city: String,
    pub district: Option<String>,
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = String)]
    pub area_m2: Decimal,
    pub price_per_month: i64,
    pub deposit_amount: i64,
    pub electricity_price: i64,
    pub water_price: i64,
    pub max_occupants: i32,
    pub facilities: Vec<String>,
    pub images: Vec<String>,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RoomDBResponse> for RoomResponse {
    fn from(db: RoomDBResponse) -> Self {
        Self {
            id: db.id,
            housing_area_id: db.housing_area_id,
            housing_area_name: db.housing_area_name,
            city: db.city,
            district: db.district,
            name: db.name,
            description: db.description,
            area_m2: db.area_m2,
            price_per_month: db.price_per_month,
            deposit_amount: db.deposit_amount,
            electricity_price: db.electricity_price,
            water_price: db.water_price,
            max_occupants: db.max_occupants,
            facilities: db.facilities,
            images: db.images,
            status: db.status,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// Room search. Only rooms in approved areas are returned.
#[serde_as]
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListRoomsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
    pub city: Option<String>,
    pub district: Option<String>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub min_price: Option<i64>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub max_price: Option<i64>,
    #[param(value_type = Option<String>)]
    #[schema(value_type = Option<String>)]
    pub min_area: Option<Decimal>,
    /// Rooms that fit at least this many occupants
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub max_occupants: Option<i32>,
    pub status: Option<RoomStatus>,
    /// Comma-separated; every listed facility must be present
    pub facility: Option<String>,
    /// Substring match on room name or description
    pub search: Option<String>,
}

impl ListRoomsQuery {
    pub fn facilities(&self) -> Vec<String> {
        self.facility
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_matches_wire_name() {
        for status in [
            RoomStatus::Available,
            RoomStatus::Reserved,
            RoomStatus::Rented,
            RoomStatus::Maintenance,
        ] {
            assert_eq!(serde_json::to_value(status).unwrap(), status.to_string());
        }
    }

    fn valid_room() -> RoomCreate {
        RoomCreate {
            name: "P.201".to_string(),
            description: Some("Phòng có ban công".to_string()),
            area_m2: Decimal::new(255, 1),
            price_per_month: 3_500_000,
            deposit_amount: 3_500_000,
            electricity_price: 3_800,
            water_price: 100_000,
            max_occupants: 2,
            facilities: vec!["wifi".to_string(), "air conditioner".to_string()],
            images: vec![],
        }
    }

    fn fields(v: &Validator) -> Vec<&str> {
        v.errors().iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn test_valid_room_passes() {
        assert!(valid_room().validate_request().is_ok());
    }

    #[test]
    fn test_room_rules_report_every_field() {
        let room = RoomCreate {
            name: String::new(),
            area_m2: Decimal::ZERO,
            price_per_month: 0,
            deposit_amount: -1,
            max_occupants: 21,
            facilities: vec!["wifi".to_string(), "WIFI".to_string()],
            ..valid_room()
        };
        let mut v = Validator::new();
        room.validate(&mut v);
        assert_eq!(
            fields(&v),
            vec![
                "name",
                "area_m2",
                "price_per_month",
                "deposit_amount",
                "max_occupants",
                "facilities[1]"
            ]
        );
    }

    #[test]
    fn test_update_cannot_set_lifecycle_statuses() {
        for status in [RoomStatus::Reserved, RoomStatus::Rented] {
            let update = RoomUpdate {
                status: Some(status),
                ..Default::default()
            };
            assert!(update.validate_request().is_err());
        }
        let update = RoomUpdate {
            status: Some(RoomStatus::Maintenance),
            ..Default::default()
        };
        assert!(update.validate_request().is_ok());
    }

    #[test]
    fn test_update_applies_rules_to_present_fields_only() {
        let update = RoomUpdate {
            price_per_month: Some(-5),
            water_price: Some(-1),
            ..Default::default()
        };
        let mut v = Validator::new();
        update.validate(&mut v);
        assert_eq!(fields(&v), vec!["price_per_month", "water_price"]);

        let mut v = Validator::new();
        RoomUpdate::default().validate(&mut v);
        assert_eq!(fields(&v), vec!["body"]);
    }

    #[test]
    fn test_search_query_parses_numbers_and_facilities() {
        let query: ListRoomsQuery =
            serde_urlencoded::from_str("city=Hanoi&min_price=1000000&min_area=15.5&facility=wifi,%20parking,&limit=5")
                .unwrap();
        assert_eq!(query.min_price, Some(1_000_000));
        assert_eq!(query.min_area, Some(Decimal::new(155, 1)));
        assert_eq!(query.facilities(), vec!["wifi".to_string(), "parking".to_string()]);
        assert_eq!(query.pagination.limit(), 5);
    }
}
