//! API request/response models for housing areas.

use super::pagination::Pagination;
use crate::db::models::housing_areas::HousingAreaDBResponse;
use crate::types::{HousingAreaId, UserId};
use crate::validation::{Validate, Validator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::{IntoParams, ToSchema};

/// Facilities, amenities: at most this many labels per listing
pub const MAX_TAGS: usize = 30;
pub const MAX_TAG_LEN: usize = 50;
/// Hard ceiling on image URLs; the configured cap is applied in handlers
pub const MAX_IMAGES_CEILING: usize = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "housing_area_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HousingAreaStatus {
    Pending,
    Approved,
    Rejected,
    Hidden,
}

impl HousingAreaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HousingAreaStatus::Pending => "pending",
            HousingAreaStatus::Approved => "approved",
            HousingAreaStatus::Rejected => "rejected",
            HousingAreaStatus::Hidden => "hidden",
        }
    }
}

impl fmt::Display for HousingAreaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct HousingAreaCreate {
    pub name: String,
    pub description: Option<String>,
    pub address: String,
    pub ward: Option<String>,
    pub district: Option<String>,
    pub city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub amenities: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl Validate for HousingAreaCreate {
    fn validate(&self, v: &mut Validator) {
        v.text("name", &self.name, 1, 150)
            .optional_text("description", self.description.as_deref(), 5000)
            .text("address", &self.address, 1, 255)
            .text("city", &self.city, 1, 255)
            .optional_text("ward", self.ward.as_deref(), 100)
            .optional_text("district", self.district.as_deref(), 100)
            .coordinates(self.latitude, self.longitude)
            .tags("amenities", &self.amenities, MAX_TAGS, MAX_TAG_LEN)
            .urls("images", &self.images, MAX_IMAGES_CEILING);
    }
}

/// Partial update. An owner may only move `status` between `approved` and `hidden`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct HousingAreaUpdate {
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

impl HousingAreaUpdate {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.address.is_none()
            && self.ward.is_none()
            && self.district.is_none()
            && self.city.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.amenities.is_none()
            && self.images.is_none()
            && self.status.is_none()
    }
}

impl Validate for HousingAreaUpdate {
    fn validate(&self, v: &mut Validator) {
        v.any_present(!self.is_empty());
        if let Some(name) = &self.name {
            v.text("name", name, 1, 150);
        }
        if let Some(address) = &self.address {
            v.text("address", address, 1, 255);
        }
        if let Some(city) = &self.city {
            v.text("city", city, 1, 255);
        }
        v.optional_text("description", self.description.as_deref(), 5000)
            .optional_text("ward", self.ward.as_deref(), 100)
            .optional_text("district", self.district.as_deref(), 100)
            .coordinates(self.latitude, self.longitude);
        if let Some(amenities) = &self.amenities {
            v.tags("amenities", amenities, MAX_TAGS, MAX_TAG_LEN);
        }
        if let Some(images) = &self.images {
            v.urls("images", images, MAX_IMAGES_CEILING);
        }
        if let Some(status) = self.status {
            v.check(
                matches!(status, HousingAreaStatus::Approved | HousingAreaStatus::Hidden),
                "status",
                "may only be set to approved or hidden",
            );
        }
    }
}

/// Admin review decision.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HousingAreaReview {
    /// `approved` or `rejected`
    pub status: HousingAreaStatus,
    pub note: Option<String>,
}

impl Validate for HousingAreaReview {
    fn validate(&self, v: &mut Validator) {
        match self.status {
            HousingAreaStatus::Approved => {}
            HousingAreaStatus::Rejected => {
                v.text("note", self.note.as_deref().unwrap_or_default(), 1, 1000);
            }
            _ => {
                v.error("status", "must be approved or rejected");
            }
        }
        v.optional_text("note", self.note.as_deref(), 1000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HousingAreaResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: HousingAreaId,
    #[schema(value_type = String, format = "uuid")]
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
    pub is_boosted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<HousingAreaDBResponse> for HousingAreaResponse {
    fn from(db: HousingAreaDBResponse) -> Self {
        Self {
            is_boosted: db.boosted_until.is_some_and(|until| until > Utc::now()),
            id: db.id,
            owner_id: db.owner_id,
            name: db.name,
            description: db.description,
            address: db.address,
            ward: db.ward,
            district: db.district,
            city: db.city,
            latitude: db.latitude,
            longitude: db.longitude,
            amenities: db.amenities,
            images: db.images,
            status: db.status,
            review_note: db.review_note,
            boosted_until: db.boosted_until,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListHousingAreasQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
    /// Case-insensitive exact city match
    pub city: Option<String>,
    pub district: Option<String>,
    /// Substring match on name or address
    pub search: Option<String>,
    #[param(value_type = Option<String>, format = "uuid")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub owner_id: Option<UserId>,
    /// Only honoured for admins and for owners listing their own areas
    pub status: Option<HousingAreaStatus>,
}
