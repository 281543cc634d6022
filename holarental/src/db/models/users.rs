//! Database models for users and profiles.

use crate::api::models::users::{Gender, ProfileUpdate, Role};
use crate::types::UserId;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub roles: Vec<Role>,
    pub auth_source: String,
    pub password_hash: Option<String>,
    pub external_id: Option<String>,
}

/// Database request for updating a user. `None` leaves a column unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserUpdateDBRequest {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub roles: Option<Vec<Role>>,
    pub password_hash: Option<String>,
}

/// Database response for a user
#[derive(Debug, Clone)]
pub struct UserDBResponse {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub auth_source: String,
    pub external_id: Option<String>,
    pub password_hash: Option<String>,
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Row of `user_details`
#[derive(Debug, Clone, FromRow)]
pub struct UserDetailDBResponse {
    pub user_id: UserId,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub address: Option<String>,
    pub bio: Option<String>,
    pub id_card_number: Option<String>,
    pub identity_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UserDetailDBResponse {
    /// Profile of a user who never saved one.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            full_name: None,
            phone: None,
            date_of_birth: None,
            gender: None,
            address: None,
            bio: None,
            id_card_number: None,
            identity_verified: false,
            verified_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// Full replacement of the profile columns.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpsertDBRequest {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub address: Option<String>,
    pub bio: Option<String>,
    pub id_card_number: Option<String>,
    /// Mirrored onto `users` when present
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<ProfileUpdate> for ProfileUpsertDBRequest {
    fn from(update: ProfileUpdate) -> Self {
        Self {
            full_name: update.full_name,
            phone: update.phone,
            date_of_birth: update.date_of_birth,
            gender: update.gender,
            address: update.address,
            bio: update.bio,
            id_card_number: update.id_card_number,
            display_name: update.display_name,
            avatar_url: update.avatar_url,
        }
    }
}
