//! API request/response models for users and profiles.

use super::pagination::Pagination;
use crate::db::models::users::{UserDBResponse, UserDetailDBResponse};
use crate::types::UserId;
use crate::validation::{Validate, Validator};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Marketplace roles. Every account is a tenant; landlord and admin are added on top.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, ToSchema)]
#[sqlx(type_name = "user_role", rename_all = "UPPERCASE")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tenant,
    Landlord,
    Admin,
}

/// Normalise a requested role set: tenant is always present, no duplicates.
pub fn with_tenant_role(roles: &[Role]) -> Vec<Role> {
    let mut normalised = vec![Role::Tenant];
    for role in roles {
        if !normalised.contains(role) {
            normalised.push(*role);
        }
    }
    normalised
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "gender", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

// User response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    pub roles: Vec<Role>,
    pub auth_source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            username: db.username,
            email: db.email,
            display_name: db.display_name,
            avatar_url: db.avatar_url,
            is_admin: db.roles.contains(&Role::Admin),
            roles: db.roles,
            auth_source: db.auth_source,
            created_at: db.created_at,
            updated_at: db.updated_at,
            last_login: db.last_login,
        }
    }
}

/// Query parameters for listing users
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListUsersQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Case-insensitive substring match on username, email or display name
    pub search: Option<String>,

    /// Only users holding this role
    pub role: Option<Role>,
}

/// Admin role assignment. `tenant` is always kept.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRolesUpdate {
    pub roles: Vec<Role>,
}

impl Validate for UserRolesUpdate {
    fn validate(&self, v: &mut Validator) {
        v.check(self.roles.len() <= 3, "roles", "must contain at most 3 entries");
    }
}

/// The authenticated caller, resolved once per request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

impl From<UserDBResponse> for CurrentUser {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            username: db.username,
            email: db.email,
            roles: db.roles,
            display_name: db.display_name,
            avatar_url: db.avatar_url,
        }
    }
}

impl From<UserResponse> for CurrentUser {
    fn from(user: UserResponse) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            roles: user.roles,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
        }
    }
}

/// Public profile of a user. Private fields are only present for the user themselves and admins.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub full_name: Option<String>,
    pub gender: Option<Gender>,
    pub address: Option<String>,
    pub bio: Option<String>,
    pub identity_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_card_number: Option<String>,
}

impl ProfileResponse {
    pub fn new(user: &UserDBResponse, detail: Option<UserDetailDBResponse>) -> Self {
        let detail = detail.unwrap_or_else(|| UserDetailDBResponse::empty(user.id));
        Self {
            user_id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
            full_name: detail.full_name,
            gender: detail.gender,
            address: detail.address,
            bio: detail.bio,
            identity_verified: detail.identity_verified,
            verified_at: detail.verified_at,
            phone: detail.phone,
            date_of_birth: detail.date_of_birth,
            id_card_number: detail.id_card_number,
        }
    }

    /// Strip fields only the owner and admins may see
    pub fn redacted(mut self) -> Self {
        self.phone = None;
        self.date_of_birth = None;
        self.id_card_number = None;
        self
    }
}

/// Full replacement of the profile. `display_name` and `avatar_url` are mirrored onto the account
/// when given.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub address: Option<String>,
    pub bio: Option<String>,
    pub id_card_number: Option<String>,
}

pub const MIN_AGE_YEARS: u32 = 16;

impl Validate for ProfileUpdate {
    fn validate(&self, v: &mut Validator) {
        if let Some(name) = &self.display_name {
            v.text("display_name", name, 1, 100);
        }
        if let Some(url) = &self.avatar_url {
            v.url("avatar_url", url);
        }
        v.optional_text("full_name", self.full_name.as_deref(), 100)
            .optional_text("address", self.address.as_deref(), 255)
            .optional_text("bio", self.bio.as_deref(), 1000);
        if let Some(phone) = &self.phone {
            v.phone("phone", phone);
        }
        if let Some(dob) = self.date_of_birth {
            v.birth_date("date_of_birth", dob, crate::types::vietnam_today(), MIN_AGE_YEARS);
        }
        if let Some(id_card) = &self.id_card_number {
            let ok = matches!(id_card.len(), 9 | 12) && id_card.chars().all(|c| c.is_ascii_digit());
            v.check(ok, "id_card_number", "must be 9 or 12 digits");
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerificationUpdate {
    pub identity_verified: bool,
}

impl Validate for VerificationUpdate {
    fn validate(&self, _v: &mut Validator) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_tenant_role_always_keeps_tenant() {
        assert_eq!(with_tenant_role(&[]), vec![Role::Tenant]);
        assert_eq!(
            with_tenant_role(&[Role::Admin, Role::Tenant, Role::Admin]),
            vec![Role::Tenant, Role::Admin]
        );
    }

    #[test]
    fn test_roles_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Landlord).unwrap(), "\"landlord\"");
        let role: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(role, Role::Admin);
    }

    #[test]
    fn test_profile_validation_collects_every_problem() {
        let update = ProfileUpdate {
            phone: Some("12ab".to_string()),
            id_card_number: Some("0123456789".to_string()),
            bio: Some("x".repeat(1001)),
            avatar_url: Some("javascript:alert(1)".to_string()),
            date_of_birth: Some(crate::types::vietnam_today()),
            ..Default::default()
        };
        let mut v = Validator::new();
        update.validate(&mut v);
        let fields: Vec<_> = v.errors().iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["avatar_url", "bio", "phone", "date_of_birth", "id_card_number"]);
    }

    #[test]
    fn test_profile_validation_accepts_cccd_and_cmnd() {
        for id_card in ["012345678", "001203004567"] {
            let update = ProfileUpdate {
                id_card_number: Some(id_card.to_string()),
                phone: Some("+84901234567".to_string()),
                ..Default::default()
            };
            assert!(update.validate_request().is_ok(), "{id_card}");
        }
    }
}
