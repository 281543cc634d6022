//! Database models for housing areas.

use crate::api::models::housing_areas::{HousingAreaCreate, HousingAreaStatus, HousingAreaUpdate};
use crate::types::{HousingAreaId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct HousingAreaCreateDBRequest {
    pub owner_id: UserId,
    pub name: String,
    pub description: Option<String>,
    pub address: String,
    pub ward: Option<String>,
    pub district: Option<String>,
    pub city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub amenities: Vec<String>,
    pub images: Vec<String>,
    pub status: HousingAreaStatus,
}

impl HousingAreaCreateDBRequest {
    pub fn new(owner_id: UserId, create: HousingAreaCreate, status: HousingAreaStatus) -> Self {
        Self {
            owner_id,
            name: create.name.trim().to_string(),
            description: create.description,
            address: create.address.trim().to_string(),
            ward: create.ward,
            district: create.district,
            city: create.city.trim().to_string(),
            latitude: create.latitude,
            longitude: create.longitude,
            amenities: trim_all(create.amenities),
            images: create.images,
            status,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HousingAreaUpdateDBRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub ward: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub amenities: Option<Vec<String>>,
    pub images: Option<Vec<String>>,
    pub status: Option<HousingAreaStatus>,
}

impl From<HousingAreaUpdate> for HousingAreaUpdateDBRequest {
    fn from(update: HousingAreaUpdate) -> Self {
        Self {
            name: update.name.map(|s| s.trim().to_string()),
            description: update.description,
            address: update.address.map(|s| s.trim().to_string()),
            ward: update.ward,
            district: update.district,
            city: update.city.map(|s| s.trim().to_string()),
            latitude: update.latitude,
            longitude: update.longitude,
            amenities: update.amenities.map(trim_all),
            images: update.images,
            status: update.status,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct HousingAreaDBResponse {
    pub id: HousingAreaId,
    pub owner_id: UserId,
    pub name: String,
    pub description: Option<String>,
    pub address: String,
    pub ward: Option<String>,
    pub district: Option<String>,
    pub city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub amenities: Vec<String>,
    pub images: Vec<String>,
    pub status: HousingAreaStatus,
    pub review_note: Option<String>,
    pub boosted_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn trim_all(values: Vec<String>) -> Vec<String> {
    values.into_iter().map(|v| v.trim().to_string()).collect()
}
