//! Database repository for users and profiles.

use crate::types::{UserId, abbrev_uuid};
use crate::{
    api::models::users::{Role, with_tenant_role},
    db::{
        errors::{DbError, Result},
        handlers::{repository::Repository, search::contains_pattern},
        models::users::{ProfileUpsertDBRequest, UserCreateDBRequest, UserDBResponse, UserDetailDBResponse, UserUpdateDBRequest},
    },
};
use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, PgConnection, Postgres, QueryBuilder};
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

/// Filter for listing users
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub skip: i64,
    pub limit: i64,
    pub search: Option<String>,
    pub role: Option<Role>,
}

impl UserFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            ..Default::default()
        }
    }
}

// Database entity model
#[derive(Debug, Clone, FromRow)]
struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub auth_source: String,
    pub external_id: Option<String>,
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

const USER_COLUMNS: &str = "id, username, email, display_name, avatar_url, auth_source, external_id, password_hash, \
     created_at, updated_at, last_login";

impl From<(Vec<Role>, User)> for UserDBResponse {
    fn from((roles, user): (Vec<Role>, User)) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            auth_source: user.auth_source,
            external_id: user.external_id,
            password_hash: user.password_hash,
            roles,
            created_at: user.created_at,
            updated_at: user.updated_at,
            last_login: user.last_login,
        }
    }
}

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        query.push(" AND (LOWER(username) LIKE ");
        query.push_bind(pattern.clone());
        query.push(" ESCAPE '\\' OR LOWER(email) LIKE ");
        query.push_bind(pattern.clone());
        query.push(" ESCAPE '\\' OR LOWER(COALESCE(display_name, '')) LIKE ");
        query.push_bind(pattern);
        query.push(" ESCAPE '\\')");
    }
    if let Some(role) = filter.role {
        query.push(" AND id IN (SELECT user_id FROM user_roles WHERE role = ");
        query.push_bind(role);
        query.push(")");
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type UpdateRequest = UserUpdateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;
    type Filter = UserFilter;

    #[instrument(skip(self, request), fields(username = %request.username), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let user_id = Uuid::new_v4();
        let roles = with_tenant_role(&request.roles);

        let mut tx = self.db.begin().await?;
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, username, email, display_name, avatar_url, auth_source, external_id, password_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(&request.username)
        .bind(&request.email)
        .bind(&request.display_name)
        .bind(&request.avatar_url)
        .bind(&request.auth_source)
        .bind(&request.external_id)
        .bind(&request.password_hash)
        .fetch_one(&mut *tx)
        .await?;

        for role in &roles {
            sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2)")
                .bind(user_id)
                .bind(role)
                .execute(&mut *tx)
                .await?;
        }

        // Every account starts with an empty profile row
        sqlx::query("INSERT INTO user_details (user_id) VALUES ($1)")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(UserDBResponse::from((roles, user)))
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        match user {
            Some(user) => {
                let roles = self.roles_of(user.id).await?;
                Ok(Some(UserDBResponse::from((roles, user))))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users WHERE 1=1"));
        push_filters(&mut query, filter);
        query.push(" ORDER BY created_at DESC LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let users = query.build_query_as::<User>().fetch_all(&mut *self.db).await?;
        self.attach_roles(users).await
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        // Touches users and user_roles, so always run in a transaction
        let mut tx = self.db.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET \
                display_name = COALESCE($2, display_name), \
                avatar_url = COALESCE($3, avatar_url), \
                password_hash = COALESCE($4, password_hash), \
                updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(&request.display_name)
        .bind(&request.avatar_url)
        .bind(&request.password_hash)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound)?;

        if let Some(roles) = &request.roles {
            sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            for role in with_tenant_role(roles) {
                sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2)")
                    .bind(id)
                    .bind(role)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let roles = roles_of(&mut *tx, id).await?;
        tx.commit().await?;

        Ok(UserDBResponse::from((roles, user)))
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn has_history(&mut self, id: UserId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (SELECT 1 FROM contracts WHERE tenant_id = $1 OR owner_id = $1)
                OR EXISTS (SELECT 1 FROM transactions WHERE user_id = $1)
            "#,
        )
        .bind(id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(exists)
    }
}

async fn roles_of(conn: &mut PgConnection, user_id: UserId) -> Result<Vec<Role>> {
    let mut roles: Vec<Role> = sqlx::query_scalar("SELECT role FROM user_roles WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(conn)
        .await?;
    roles.sort_by_key(|role| *role as u8);
    Ok(roles)
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    async fn roles_of(&mut self, user_id: UserId) -> Result<Vec<Role>> {
        roles_of(&mut *self.db, user_id).await
    }

    async fn attach_roles(&mut self, users: Vec<User>) -> Result<Vec<UserDBResponse>> {
        let ids: Vec<UserId> = users.iter().map(|u| u.id).collect();
        let rows: Vec<(UserId, Role)> = sqlx::query_as("SELECT user_id, role FROM user_roles WHERE user_id = ANY($1)")
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;

        let mut by_user: HashMap<UserId, Vec<Role>> = HashMap::new();
        for (user_id, role) in rows {
            by_user.entry(user_id).or_default().push(role);
        }

        Ok(users
            .into_iter()
            .map(|user| {
                let mut roles = by_user.remove(&user.id).unwrap_or_default();
                roles.sort_by_key(|role| *role as u8);
                UserDBResponse::from((roles, user))
            })
            .collect())
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &UserFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM users WHERE 1=1");
        push_filters(&mut query, filter);
        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }

    #[instrument(skip(self, email), err)]
    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"))
            .bind(email)
            .fetch_optional(&mut *self.db)
            .await?;

        match user {
            Some(user) => {
                let roles = self.roles_of(user.id).await?;
                Ok(Some(UserDBResponse::from((roles, user))))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, external_id), err)]
    pub async fn get_by_external_id(&mut self, external_id: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE external_id = $1"))
            .bind(external_id)
            .fetch_optional(&mut *self.db)
            .await?;

        match user {
            Some(user) => {
                let roles = self.roles_of(user.id).await?;
                Ok(Some(UserDBResponse::from((roles, user))))
            }
            None => Ok(None),
        }
    }

    /// Attach an external identity to an existing account found by email.
    #[instrument(skip(self, external_id), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn link_external_id(&mut self, id: UserId, external_id: &str) -> Result<()> {
        sqlx::query("UPDATE users SET external_id = $2, updated_at = NOW() WHERE id = $1 AND external_id IS NULL")
            .bind(id)
            .bind(external_id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn update_last_login(&mut self, id: UserId) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn get_profile(&mut self, id: UserId) -> Result<Option<UserDetailDBResponse>> {
        let detail = sqlx::query_as::<_, UserDetailDBResponse>("SELECT * FROM user_details WHERE user_id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(detail)
    }

    /// Replace the profile and mirror the display fields onto the account, atomically.
    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn upsert_profile(
        &mut self,
        id: UserId,
        request: &ProfileUpsertDBRequest,
    ) -> Result<(UserDBResponse, UserDetailDBResponse)> {
        let mut tx = self.db.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET \
                display_name = COALESCE($2, display_name), \
                avatar_url = COALESCE($3, avatar_url), \
                updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(&request.display_name)
        .bind(&request.avatar_url)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound)?;

        let detail = sqlx::query_as::<_, UserDetailDBResponse>(
            r#"
            INSERT INTO user_details (user_id, full_name, phone, date_of_birth, gender, address, bio, id_card_number)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id) DO UPDATE SET
                full_name = EXCLUDED.full_name,
                phone = EXCLUDED.phone,
                date_of_birth = EXCLUDED.date_of_birth,
                gender = EXCLUDED.gender,
                address = EXCLUDED.address,
                bio = EXCLUDED.bio,
                id_card_number = EXCLUDED.id_card_number,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.full_name)
        .bind(&request.phone)
        .bind(request.date_of_birth)
        .bind(request.gender)
        .bind(&request.address)
        .bind(&request.bio)
        .bind(&request.id_card_number)
        .fetch_one(&mut *tx)
        .await?;

        let roles = roles_of(&mut *tx, id).await?;
        tx.commit().await?;

        Ok((UserDBResponse::from((roles, user)), detail))
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn set_identity_verified(&mut self, id: UserId, verified: bool) -> Result<UserDetailDBResponse> {
        let detail = sqlx::query_as::<_, UserDetailDBResponse>(
            r#"
            INSERT INTO user_details (user_id, identity_verified, verified_at)
            VALUES ($1, $2, CASE WHEN $2 THEN NOW() END)
            ON CONFLICT (user_id) DO UPDATE SET
                identity_verified = EXCLUDED.identity_verified,
                verified_at = EXCLUDED.verified_at,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(verified)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(detail)
    }

    /// Whether the user is tenant or owner on any live contract.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn has_live_contracts(&mut self, id: UserId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM contracts WHERE (tenant_id = $1 OR owner_id = $1) \
             AND status IN ('signed', 'active', 'extension_requested', 'termination_requested', 'disputed'))",
        )
        .bind(id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{
        contracts::ContractStatus,
        transactions::{TransactionKind, TransactionStatus},
    };
    use crate::test_utils::{
        create_test_area, create_test_contract, create_test_room, create_test_transaction, create_test_user,
        force_contract_status,
    };
    use chrono::NaiveDate;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_expired_contract_is_history_not_live(pool: PgPool) {
        let owner = create_test_user(&pool, &[Role::Landlord]).await;
        let tenant = create_test_user(&pool, &[Role::Tenant]).await;
        let area = create_test_area(&pool, owner.id).await;
        let room = create_test_room(&pool, &area, "P501").await;
        let contract = create_test_contract(&pool, &area, &room, tenant.id).await;
        force_contract_status(&pool, contract.id, ContractStatus::Expired, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap())
            .await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        for user_id in [tenant.id, owner.id] {
            assert!(!repo.has_live_contracts(user_id).await.unwrap());
            assert!(repo.has_history(user_id).await.unwrap());
        }

        // Without the check the delete would hit the restricting key
        assert!(matches!(repo.delete(tenant.id).await, Err(DbError::ForeignKeyViolation { .. })));
        assert!(repo.get_by_id(tenant.id).await.unwrap().is_some());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_payment_alone_is_history(pool: PgPool) {
        let payer = create_test_user(&pool, &[Role::Landlord]).await;
        let newcomer = create_test_user(&pool, &[Role::Tenant]).await;
        create_test_transaction(&pool, payer.id, TransactionKind::BoostingAds, 60_000, TransactionStatus::Cancelled, None)
            .await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);
        assert!(repo.has_history(payer.id).await.unwrap());
        assert!(!repo.has_history(newcomer.id).await.unwrap());

        assert!(repo.delete(newcomer.id).await.unwrap());
        assert!(repo.get_by_id(newcomer.id).await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_search_underscore_is_literal(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);
        let create = |username: &str| UserCreateDBRequest {
            username: username.to_string(),
            email: format!("{}@test.holarental.vn", username.replace('_', ".")),
            display_name: None,
            avatar_url: None,
            roles: vec![Role::Tenant],
            auth_source: "native".to_string(),
            password_hash: None,
            external_id: None,
        };
        let lan = repo.create(&create("lan_nguyen")).await.unwrap();
        repo.create(&create("lanxnguyen")).await.unwrap();

        let filter = UserFilter {
            search: Some("N_N".to_string()),
            ..UserFilter::new(0, 10)
        };
        let found = repo.list(&filter).await.unwrap();
        assert_eq!(found.iter().map(|u| u.id).collect::<Vec<_>>(), vec![lan.id]);
    }
}
