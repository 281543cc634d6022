//! Database models for rooms.

use super::housing_areas::trim_all;
use crate::api::models::rooms::{RoomCreate, RoomStatus, RoomUpdate};
use crate::types::{HousingAreaId, RoomId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct RoomCreateDBRequest {
    pub housing_area_id: HousingAreaId,
    pub name: String,
    pub description: Option<String>,
    pub area_m2: Decimal,
    pub price_per_month: i64,
    pub deposit_amount: i64,
    pub electricity_price: i64,
    pub water_price: i64,
    pub max_occupants: i32,
    pub facilities: Vec<String>,
    pub images: Vec<String>,
}

impl RoomCreateDBRequest {
    pub fn new(housing_area_id: HousingAreaId, create: RoomCreate) -> Self {
        Self {
            housing_area_id,
            name: create.name.trim().to_string(),
            description: create.description,
            area_m2: create.area_m2,
            price_per_month: create.price_per_month,
            deposit_amount: create.deposit_amount,
            electricity_price: create.electricity_price,
            water_price: create.water_price,
            max_occupants: create.max_occupants,
            facilities: trim_all(create.facilities),
            images: create.images,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoomUpdateDBRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub area_m2: Option<Decimal>,
    pub price_per_month: Option<i64>,
    pub deposit_amount: Option<i64>,
    pub electricity_price: Option<i64>,
    pub water_price: Option<i64>,
    pub max_occupants: Option<i32>,
    pub facilities: Option<Vec<String>>,
    pub images: Option<Vec<String>>,
    pub status: Option<RoomStatus>,
}

impl From<RoomUpdate> for RoomUpdateDBRequest {
    fn from(update: RoomUpdate) -> Self {
        Self {
            name: update.name.map(|s| s.trim().to_string()),
            description: update.description,
            area_m2: update.area_m2,
            price_per_month: update.price_per_month,
            deposit_amount: update.deposit_amount,
            electricity_price: update.electricity_price,
            water_price: update.water_price,
            max_occupants: update.max_occupants,
            facilities: update.facilities.map(trim_all),
            images: update.images,
            status: update.status,
        }
    }
}

/// A room joined with the listing fields clients display next to it.
#[derive(Debug, Clone, FromRow)]
pub struct RoomDBResponse {
    pub id: RoomId,
    pub housing_area_id: HousingAreaId,
    pub housing_area_name: String,
    pub city: String,
    pub district: Option<String>,
    pub name: String,
    pub description: Option<String>,
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
