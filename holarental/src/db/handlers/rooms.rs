//! Database repository for rooms.

use crate::api::models::rooms::RoomStatus;
use crate::db::{
    errors::{DbError, Result},
    handlers::{repository::Repository, search::contains_pattern},
    models::rooms::{RoomCreateDBRequest, RoomDBResponse, RoomUpdateDBRequest},
};
use crate::types::{HousingAreaId, RoomId, UserId, abbrev_uuid};
use rust_decimal::Decimal;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

const ROOM_COLUMNS: &str = r#"
    r.id, r.housing_area_id, h.name AS housing_area_name, h.city, h.district,
    r.name, r.description, r.area_m2, r.price_per_month, r.deposit_amount,
    r.electricity_price, r.water_price, r.max_occupants, r.facilities, r.images,
    r.status, r.created_at, r.updated_at
"#;

/// Room search. The public search only sees rooms of approved areas.
#[derive(Debug, Clone, Default)]
pub struct RoomFilter {
    pub skip: i64,
    pub limit: i64,
    pub housing_area_id: Option<HousingAreaId>,
    /// Restrict to approved areas, unless the area is owned by this user
    pub approved_only: bool,
    pub viewer: Option<UserId>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub min_area: Option<Decimal>,
    pub min_occupants: Option<i32>,
    pub status: Option<RoomStatus>,
    pub facilities: Vec<String>,
    pub search: Option<String>,
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &RoomFilter) {
    if let Some(area_id) = filter.housing_area_id {
        query.push(" AND r.housing_area_id = ");
        query.push_bind(area_id);
    }
    if filter.approved_only {
        match filter.viewer {
            Some(viewer) => {
                query.push(" AND (h.status = 'approved' OR h.owner_id = ");
                query.push_bind(viewer);
                query.push(")");
            }
            None => {
                query.push(" AND h.status = 'approved'");
            }
        }
    }
    if let Some(city) = filter.city.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query.push(" AND LOWER(h.city) = ");
        query.push_bind(city.to_lowercase());
    }
    if let Some(district) = filter.district.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query.push(" AND LOWER(h.district) = ");
        query.push_bind(district.to_lowercase());
    }
    if let Some(min_price) = filter.min_price {
        query.push(" AND r.price_per_month >= ");
        query.push_bind(min_price);
    }
    if let Some(max_price) = filter.max_price {
        query.push(" AND r.price_per_month <= ");
        query.push_bind(max_price);
    }
    if let Some(min_area) = filter.min_area {
        query.push(" AND r.area_m2 >= ");
        query.push_bind(min_area);
    }
    if let Some(occupants) = filter.min_occupants {
        query.push(" AND r.max_occupants >= ");
        query.push_bind(occupants);
    }
    if let Some(status) = filter.status {
        query.push(" AND r.status = ");
        query.push_bind(status);
    }
    if !filter.facilities.is_empty() {
        query.push(" AND r.facilities @> ");
        query.push_bind(filter.facilities.clone());
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        query.push(" AND (LOWER(r.name) LIKE ");
        query.push_bind(pattern.clone());
        query.push(" ESCAPE '\\' OR LOWER(COALESCE(r.description, '')) LIKE ");
        query.push_bind(pattern);
        query.push(" ESCAPE '\\')");
    }
}

pub struct Rooms<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Rooms<'c> {
    type CreateRequest = RoomCreateDBRequest;
    type UpdateRequest = RoomUpdateDBRequest;
    type Response = RoomDBResponse;
    type Id = RoomId;
    type Filter = RoomFilter;

    #[instrument(skip(self, request), fields(area_id = %abbrev_uuid(&request.housing_area_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let id: RoomId = sqlx::query_scalar(
            r#"
            INSERT INTO rooms
                (id, housing_area_id, name, description, area_m2, price_per_month, deposit_amount,
                 electricity_price, water_price, max_occupants, facilities, images)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.housing_area_id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.area_m2)
        .bind(request.price_per_month)
        .bind(request.deposit_amount)
        .bind(request.electricity_price)
        .bind(request.water_price)
        .bind(request.max_occupants)
        .bind(&request.facilities)
        .bind(&request.images)
        .fetch_one(&mut *self.db)
        .await?;

        self.get_by_id(id).await?.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), fields(room_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let room = sqlx::query_as::<_, RoomDBResponse>(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms r JOIN housing_areas h ON h.id = r.housing_area_id WHERE r.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(room)
    }

    /// Rooms of boosted areas first, then newest.
    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {ROOM_COLUMNS} FROM rooms r JOIN housing_areas h ON h.id = r.housing_area_id WHERE 1=1"
        ));
        push_filters(&mut query, filter);
        query.push(
            " ORDER BY (h.boosted_until IS NOT NULL AND h.boosted_until > NOW()) DESC, r.created_at DESC, r.id LIMIT ",
        );
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let rooms = query.build_query_as::<RoomDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(rooms)
    }

    #[instrument(skip(self), fields(room_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM rooms WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(room_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let result = sqlx::query(
            r#"
            UPDATE rooms SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                area_m2 = COALESCE($4, area_m2),
                price_per_month = COALESCE($5, price_per_month),
                deposit_amount = COALESCE($6, deposit_amount),
                electricity_price = COALESCE($7, electricity_price),
                water_price = COALESCE($8, water_price),
                max_occupants = COALESCE($9, max_occupants),
                facilities = COALESCE($10, facilities),
                images = COALESCE($11, images),
                status = COALESCE($12, status),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.area_m2)
        .bind(request.price_per_month)
        .bind(request.deposit_amount)
        .bind(request.electricity_price)
        .bind(request.water_price)
        .bind(request.max_occupants)
        .bind(&request.facilities)
        .bind(&request.images)
        .bind(request.status)
        .execute(&mut *self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        self.get_by_id(id).await?.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), fields(room_id = %abbrev_uuid(&id)), err)]
    async fn has_history(&mut self, id: RoomId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM contracts WHERE room_id = $1)")
            .bind(id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(exists)
    }
}

impl<'c> Rooms<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &RoomFilter) -> Result<i64> {
        let mut query =
            QueryBuilder::new("SELECT COUNT(*) FROM rooms r JOIN housing_areas h ON h.id = r.housing_area_id WHERE 1=1");
        push_filters(&mut query, filter);
        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }

    /// Owner of the area the room belongs to.
    #[instrument(skip(self), fields(room_id = %abbrev_uuid(&id)), err)]
    pub async fn owner_of(&mut self, id: RoomId) -> Result<Option<UserId>> {
        let owner = sqlx::query_scalar(
            "SELECT h.owner_id FROM rooms r JOIN housing_areas h ON h.id = r.housing_area_id WHERE r.id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(owner)
    }

    /// Write `to` only if the room is still `from`. Returns whether the row changed.
    #[instrument(skip(self), fields(room_id = %abbrev_uuid(&id), from = ?from, to = ?to), err)]
    pub async fn compare_and_set_status(&mut self, id: RoomId, from: RoomStatus, to: RoomStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE rooms SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from)
            .bind(to)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(room_id = %abbrev_uuid(&id)), err)]
    pub async fn has_live_contract(&mut self, id: RoomId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM contracts
                WHERE room_id = $1
                  AND status IN ('signed', 'active', 'extension_requested', 'termination_requested', 'disputed')
            )
            "#,
        )
        .bind(id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(exists)
    }
}
