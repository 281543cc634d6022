//! Database repository for housing areas.

use crate::api::models::housing_areas::HousingAreaStatus;
use crate::db::{
    errors::{DbError, Result},
    handlers::{repository::Repository, search::contains_pattern},
    models::housing_areas::{HousingAreaCreateDBRequest, HousingAreaDBResponse, HousingAreaUpdateDBRequest},
};
use crate::types::{HousingAreaId, UserId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

/// Who is listing, which decides the statuses they may see.
#[derive(Debug, Clone, Copy)]
pub enum AreaVisibility {
    /// Every status
    All,
    /// Approved areas, plus any area owned by this user
    ApprovedOr(UserId),
    Approved,
}

#[derive(Debug, Clone)]
pub struct HousingAreaFilter {
    pub skip: i64,
    pub limit: i64,
    pub visibility: AreaVisibility,
    pub city: Option<String>,
    pub district: Option<String>,
    pub search: Option<String>,
    pub owner_id: Option<UserId>,
    pub status: Option<HousingAreaStatus>,
}

impl HousingAreaFilter {
    pub fn new(skip: i64, limit: i64, visibility: AreaVisibility) -> Self {
        Self {
            skip,
            limit,
            visibility,
            city: None,
            district: None,
            search: None,
            owner_id: None,
            status: None,
        }
    }
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &HousingAreaFilter) {
    match filter.visibility {
        AreaVisibility::All => {}
        AreaVisibility::Approved => {
            query.push(" AND status = 'approved'");
        }
        AreaVisibility::ApprovedOr(user_id) => {
            query.push(" AND (status = 'approved' OR owner_id = ");
            query.push_bind(user_id);
            query.push(")");
        }
    }
    if let Some(city) = filter.city.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query.push(" AND LOWER(city) = ");
        query.push_bind(city.to_lowercase());
    }
    if let Some(district) = filter.district.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query.push(" AND LOWER(district) = ");
        query.push_bind(district.to_lowercase());
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        query.push(" AND (LOWER(name) LIKE ");
        query.push_bind(pattern.clone());
        query.push(" ESCAPE '\\' OR LOWER(address) LIKE ");
        query.push_bind(pattern);
        query.push(" ESCAPE '\\')");
    }
    if let Some(owner_id) = filter.owner_id {
        query.push(" AND owner_id = ");
        query.push_bind(owner_id);
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ");
        query.push_bind(status);
    }
}

pub struct HousingAreas<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for HousingAreas<'c> {
    type CreateRequest = HousingAreaCreateDBRequest;
    type UpdateRequest = HousingAreaUpdateDBRequest;
    type Response = HousingAreaDBResponse;
    type Id = HousingAreaId;
    type Filter = HousingAreaFilter;

    #[instrument(skip(self, request), fields(owner_id = %abbrev_uuid(&request.owner_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let area = sqlx::query_as::<_, HousingAreaDBResponse>(
            r#"
            INSERT INTO housing_areas
                (id, owner_id, name, description, address, ward, district, city, latitude, longitude, amenities, images, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.owner_id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(&request.address)
        .bind(&request.ward)
        .bind(&request.district)
        .bind(&request.city)
        .bind(request.latitude)
        .bind(request.longitude)
        .bind(&request.amenities)
        .bind(&request.images)
        .bind(request.status)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(area)
    }

    #[instrument(skip(self), fields(area_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let area = sqlx::query_as::<_, HousingAreaDBResponse>("SELECT * FROM housing_areas WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(area)
    }

    /// Boosted areas first, then newest.
    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new("SELECT * FROM housing_areas WHERE 1=1");
        push_filters(&mut query, filter);
        query.push(
            " ORDER BY (boosted_until IS NOT NULL AND boosted_until > NOW()) DESC, created_at DESC, id LIMIT ",
        );
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let areas = query
            .build_query_as::<HousingAreaDBResponse>()
            .fetch_all(&mut *self.db)
            .await?;
        Ok(areas)
    }

    /// Rooms go with the area. Callers check for contracts first.
    #[instrument(skip(self), fields(area_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM housing_areas WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(area_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let area = sqlx::query_as::<_, HousingAreaDBResponse>(
            r#"
            UPDATE housing_areas SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                address = COALESCE($4, address),
                ward = COALESCE($5, ward),
                district = COALESCE($6, district),
                city = COALESCE($7, city),
                latitude = COALESCE($8, latitude),
                longitude = COALESCE($9, longitude),
                amenities = COALESCE($10, amenities),
                images = COALESCE($11, images),
                status = COALESCE($12, status),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(&request.address)
        .bind(&request.ward)
        .bind(&request.district)
        .bind(&request.city)
        .bind(request.latitude)
        .bind(request.longitude)
        .bind(&request.amenities)
        .bind(&request.images)
        .bind(request.status)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(area)
    }

    #[instrument(skip(self), fields(area_id = %abbrev_uuid(&id)), err)]
    async fn has_history(&mut self, id: HousingAreaId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM contracts c JOIN rooms r ON r.id = c.room_id WHERE r.housing_area_id = $1)",
        )
        .bind(id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(exists)
    }
}

impl<'c> HousingAreas<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &HousingAreaFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM housing_areas WHERE 1=1");
        push_filters(&mut query, filter);
        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }

    #[instrument(skip(self, note), fields(area_id = %abbrev_uuid(&id)), err)]
    pub async fn review(
        &mut self,
        id: HousingAreaId,
        status: HousingAreaStatus,
        note: Option<&str>,
    ) -> Result<HousingAreaDBResponse> {
        let area = sqlx::query_as::<_, HousingAreaDBResponse>(
            "UPDATE housing_areas SET status = $2, review_note = $3, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .bind(note)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(area)
    }

    /// Extend `boosted_until` by `days`, counting from the later of now and the current value.
    #[instrument(skip(self), fields(area_id = %abbrev_uuid(&id)), err)]
    pub async fn extend_boost(&mut self, id: HousingAreaId, days: i32) -> Result<DateTime<Utc>> {
        let until: DateTime<Utc> = sqlx::query_scalar(
            r#"
            UPDATE housing_areas
            SET boosted_until = GREATEST(COALESCE(boosted_until, NOW()), NOW()) + make_interval(days => $2),
                updated_at = NOW()
            WHERE id = $1
            RETURNING boosted_until
            "#,
        )
        .bind(id)
        .bind(days)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(until)
    }

    /// Whether any room of the area carries a live contract.
    #[instrument(skip(self), fields(area_id = %abbrev_uuid(&id)), err)]
    pub async fn has_live_contracts(&mut self, id: HousingAreaId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM contracts c JOIN rooms r ON r.id = c.room_id
                WHERE r.housing_area_id = $1
                  AND c.status IN ('signed', 'active', 'extension_requested', 'termination_requested', 'disputed')
            )
            "#,
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
    use crate::api::models::users::Role;
    use crate::test_utils::{create_test_area, create_test_contract, create_test_room, create_test_user};
    use chrono::{TimeDelta, Utc};
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_extend_boost_counts_from_later_of_now_and_expiry(pool: PgPool) {
        let owner = create_test_user(&pool, &[Role::Landlord]).await;
        let area = create_test_area(&pool, owner.id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = HousingAreas::new(&mut conn);

        // Never boosted: counts from now
        let slack = TimeDelta::seconds(1);
        let before = Utc::now();
        let first = repo.extend_boost(area.id, 3).await.unwrap();
        assert!(first >= before + TimeDelta::days(3) - slack);
        assert!(first <= Utc::now() + TimeDelta::days(3) + slack);

        // Still boosted: stacks on the current expiry
        let second = repo.extend_boost(area.id, 2).await.unwrap();
        assert_eq!(second, first + TimeDelta::days(2));

        // Lapsed: counts from now again
        sqlx::query("UPDATE housing_areas SET boosted_until = NOW() - INTERVAL '10 days' WHERE id = $1")
            .bind(area.id)
            .execute(&mut *conn)
            .await
            .unwrap();
        let mut repo = HousingAreas::new(&mut conn);
        let before = Utc::now();
        let renewed = repo.extend_boost(area.id, 1).await.unwrap();
        assert!(renewed >= before + TimeDelta::days(1) - slack);
        assert!(renewed < second);

        assert!(matches!(repo.extend_boost(uuid::Uuid::new_v4(), 1).await, Err(DbError::NotFound)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_area_history_follows_its_rooms(pool: PgPool) {
        let owner = create_test_user(&pool, &[Role::Landlord]).await;
        let tenant = create_test_user(&pool, &[Role::Tenant]).await;
        let rented = create_test_area(&pool, owner.id).await;
        let empty = create_test_area(&pool, owner.id).await;
        let room = create_test_room(&pool, &rented, "P601").await;
        create_test_room(&pool, &empty, "P601").await;
        create_test_contract(&pool, &rented, &room, tenant.id).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = HousingAreas::new(&mut conn);
        assert!(repo.has_history(rented.id).await.unwrap());
        assert!(!repo.has_history(empty.id).await.unwrap());

        // Rooms cascade with the area; the contract's key stops that
        assert!(matches!(repo.delete(rented.id).await, Err(DbError::ForeignKeyViolation { .. })));
        assert!(repo.delete(empty.id).await.unwrap());
    }
}
