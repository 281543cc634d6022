//! Database repository for contracts.
//!
//! Lifecycle writes go through [`Contracts::apply_transition`], which persists the row built by
//! [`crate::lifecycle::apply`] under a `version` compare-and-set and writes the room status
//! change in the same transaction.

use crate::api::models::contracts::{ContractRole, ContractStatus};
use crate::api::models::rooms::RoomStatus;
use crate::db::{
    errors::{DbError, Result},
    handlers::rooms::Rooms,
    models::contracts::{ContractCreateDBRequest, ContractDBResponse},
};
use crate::lifecycle::Applied;
use crate::types::{ContractId, RoomId, UserId, abbrev_uuid};
use chrono::NaiveDate;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::{instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub skip: i64,
    pub limit: i64,
    /// Only contracts where this user is tenant or owner
    pub party: Option<UserId>,
    /// Narrows `party` to one side
    pub role: Option<ContractRole>,
    pub status: Option<ContractStatus>,
    pub room_id: Option<RoomId>,
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &ContractFilter) {
    if let Some(user_id) = filter.party {
        match filter.role {
            Some(ContractRole::Tenant) => {
                query.push(" AND tenant_id = ");
                query.push_bind(user_id);
            }
            Some(ContractRole::Owner) => {
                query.push(" AND owner_id = ");
                query.push_bind(user_id);
            }
            None => {
                query.push(" AND (tenant_id = ");
                query.push_bind(user_id);
                query.push(" OR owner_id = ");
                query.push_bind(user_id);
                query.push(")");
            }
        }
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ");
        query.push_bind(status);
    }
    if let Some(room_id) = filter.room_id {
        query.push(" AND room_id = ");
        query.push_bind(room_id);
    }
}

pub struct Contracts<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Contracts<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(room_id = %abbrev_uuid(&request.room_id), tenant_id = %abbrev_uuid(&request.tenant_id)), err)]
    pub async fn create(&mut self, request: &ContractCreateDBRequest) -> Result<ContractDBResponse> {
        let contract = sqlx::query_as::<_, ContractDBResponse>(
            r#"
            INSERT INTO contracts
                (id, room_id, tenant_id, owner_id, start_date, end_date, monthly_rent, deposit_amount, terms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.room_id)
        .bind(request.tenant_id)
        .bind(request.owner_id)
        .bind(request.start_date)
        .bind(request.end_date)
        .bind(request.monthly_rent)
        .bind(request.deposit_amount)
        .bind(&request.terms)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(contract)
    }

    #[instrument(skip(self), fields(contract_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: ContractId) -> Result<Option<ContractDBResponse>> {
        let contract = sqlx::query_as::<_, ContractDBResponse>("SELECT * FROM contracts WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(contract)
    }

    /// Lock the row for the rest of the surrounding transaction. Refunds take this lock before
    /// reading the refundable amount so two refunds on one contract run one after the other.
    #[instrument(skip(self), fields(contract_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id_for_update(&mut self, id: ContractId) -> Result<Option<ContractDBResponse>> {
        let contract = sqlx::query_as::<_, ContractDBResponse>("SELECT * FROM contracts WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(contract)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    pub async fn list(&mut self, filter: &ContractFilter) -> Result<Vec<ContractDBResponse>> {
        let mut query = QueryBuilder::new("SELECT * FROM contracts WHERE 1=1");
        push_filters(&mut query, filter);
        query.push(" ORDER BY created_at DESC, id LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let contracts = query
            .build_query_as::<ContractDBResponse>()
            .fetch_all(&mut *self.db)
            .await?;
        Ok(contracts)
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &ContractFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM contracts WHERE 1=1");
        push_filters(&mut query, filter);
        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }

    /// Persist a lifecycle transition.
    ///
    /// The contract row is written only if its `version` still matches `previous`; otherwise
    /// the write fails with [`DbError::StaleWrite`] for the contract. A room change that
    /// reserves the room must find it `available`, or the write fails with
    /// [`DbError::StaleWrite`] for the room. Other room changes whose precondition no longer
    /// holds are logged and skipped, since the contract transition itself is still valid.
    #[instrument(
        skip(self, previous, applied),
        fields(contract_id = %abbrev_uuid(&previous.id), from = %previous.status, to = %applied.contract.status),
        err
    )]
    pub async fn apply_transition(
        &mut self,
        previous: &ContractDBResponse,
        applied: Applied,
    ) -> Result<ContractDBResponse> {
        let next = applied.contract;
        let mut tx = self.db.begin().await?;

        let updated = sqlx::query_as::<_, ContractDBResponse>(
            r#"
            UPDATE contracts SET
                status = $3,
                end_date = $4,
                tenant_signed_at = $5,
                owner_signed_at = $6,
                requested_end_date = $7,
                extension_note = $8,
                termination_requested_by = $9,
                termination_reason = $10,
                terminated_at = $11,
                cancelled_by = $12,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(previous.id)
        .bind(previous.version)
        .bind(next.status)
        .bind(next.end_date)
        .bind(next.tenant_signed_at)
        .bind(next.owner_signed_at)
        .bind(next.requested_end_date)
        .bind(&next.extension_note)
        .bind(next.termination_requested_by)
        .bind(&next.termination_reason)
        .bind(next.terminated_at)
        .bind(next.cancelled_by)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::stale("contract", previous.id))?;

        if let Some(change) = applied.room {
            let changed = Rooms::new(&mut tx)
                .compare_and_set_status(previous.room_id, change.from, change.to)
                .await?;
            if !changed {
                if change.from == RoomStatus::Available {
                    return Err(DbError::stale("room", previous.room_id));
                }
                warn!(
                    room_id = %abbrev_uuid(&previous.room_id),
                    from = ?change.from,
                    to = ?change.to,
                    "Room was not in the expected status, leaving it unchanged"
                );
            }
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Running contracts whose end date has passed.
    #[instrument(skip(self), err)]
    pub async fn list_expirable(&mut self, today: NaiveDate, limit: i64) -> Result<Vec<ContractDBResponse>> {
        let contracts = sqlx::query_as::<_, ContractDBResponse>(
            r#"
            SELECT * FROM contracts
            WHERE status IN ('active', 'extension_requested', 'termination_requested')
              AND end_date < $1
            ORDER BY end_date
            LIMIT $2
            "#,
        )
        .bind(today)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(contracts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::errors::Error;
    use crate::lifecycle::{self, Event, Party};
    use crate::test_utils::{create_test_area, create_test_contract, create_test_room, create_test_user, force_contract_status};
    use axum::http::StatusCode;
    use chrono::Utc;
    use sqlx::PgPool;

    async fn sign(pool: &PgPool, contract: &ContractDBResponse, party: Party, actor: UserId) -> Result<ContractDBResponse> {
        let applied = lifecycle::apply(contract, &Event::Sign, party, Some(actor), Utc::now()).unwrap();
        let mut tx = pool.begin().await.unwrap();
        let signed = Contracts::new(&mut tx).apply_transition(contract, applied).await?;
        tx.commit().await.unwrap();
        Ok(signed)
    }

    async fn room_status(pool: &PgPool, room_id: RoomId) -> RoomStatus {
        sqlx::query_scalar("SELECT status FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_transition_from_outdated_version_is_stale(pool: PgPool) {
        let owner = create_test_user(&pool, &[Role::Landlord]).await;
        let tenant = create_test_user(&pool, &[Role::Tenant]).await;
        let area = create_test_area(&pool, owner.id).await;
        let room = create_test_room(&pool, &area, "P101").await;
        let contract = create_test_contract(&pool, &area, &room, tenant.id).await;

        let owner_signed = sign(&pool, &contract, Party::Owner, owner.id).await.unwrap();
        assert_eq!(owner_signed.version, contract.version + 1);
        assert_eq!(owner_signed.status, ContractStatus::Pending);

        // The tenant acts on the copy read before the owner signed
        let result = sign(&pool, &contract, Party::Tenant, tenant.id).await;
        match result {
            Err(DbError::StaleWrite { entity_type, .. }) => assert_eq!(entity_type, "contract"),
            other => panic!("expected a stale contract write, got {other:?}"),
        }

        let mut conn = pool.acquire().await.unwrap();
        let stored = Contracts::new(&mut conn).get_by_id(contract.id).await.unwrap().unwrap();
        assert_eq!(stored.version, owner_signed.version);
        assert!(stored.tenant_signed_at.is_none());
        assert_eq!(room_status(&pool, room.id).await, RoomStatus::Available);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reserving_unavailable_room_is_stale_and_rolls_back(pool: PgPool) {
        let owner = create_test_user(&pool, &[Role::Landlord]).await;
        let tenant = create_test_user(&pool, &[Role::Tenant]).await;
        let area = create_test_area(&pool, owner.id).await;
        let room = create_test_room(&pool, &area, "P102").await;
        let contract = create_test_contract(&pool, &area, &room, tenant.id).await;
        let owner_signed = sign(&pool, &contract, Party::Owner, owner.id).await.unwrap();

        {
            let mut conn = pool.acquire().await.unwrap();
            let changed = Rooms::new(&mut conn)
                .compare_and_set_status(room.id, RoomStatus::Available, RoomStatus::Maintenance)
                .await
                .unwrap();
            assert!(changed);
        }

        let result = sign(&pool, &owner_signed, Party::Tenant, tenant.id).await;
        match result {
            Err(DbError::StaleWrite { entity_type, .. }) => assert_eq!(entity_type, "room"),
            other => panic!("expected a stale room write, got {other:?}"),
        }
        assert_eq!(
            Error::Database(DbError::stale("room", room.id)).status_code(),
            StatusCode::CONFLICT
        );

        // The contract update was rolled back with the room write
        let mut conn = pool.acquire().await.unwrap();
        let stored = Contracts::new(&mut conn).get_by_id(contract.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ContractStatus::Pending);
        assert_eq!(stored.version, owner_signed.version);
        assert!(stored.tenant_signed_at.is_none());
        assert_eq!(room_status(&pool, room.id).await, RoomStatus::Maintenance);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_signing_reserves_the_room(pool: PgPool) {
        let owner = create_test_user(&pool, &[Role::Landlord]).await;
        let tenant = create_test_user(&pool, &[Role::Tenant]).await;
        let area = create_test_area(&pool, owner.id).await;
        let room = create_test_room(&pool, &area, "P103").await;
        let contract = create_test_contract(&pool, &area, &room, tenant.id).await;

        let pending = sign(&pool, &contract, Party::Tenant, tenant.id).await.unwrap();
        let signed = sign(&pool, &pending, Party::Owner, owner.id).await.unwrap();

        assert_eq!(signed.status, ContractStatus::Signed);
        assert_eq!(signed.version, contract.version + 2);
        assert_eq!(room_status(&pool, room.id).await, RoomStatus::Reserved);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_second_live_contract_on_room_conflicts(pool: PgPool) {
        let owner = create_test_user(&pool, &[Role::Landlord]).await;
        let first_tenant = create_test_user(&pool, &[Role::Tenant]).await;
        let second_tenant = create_test_user(&pool, &[Role::Tenant]).await;
        let area = create_test_area(&pool, owner.id).await;
        let room = create_test_room(&pool, &area, "P104").await;

        let first = create_test_contract(&pool, &area, &room, first_tenant.id).await;
        let first = sign(&pool, &first, Party::Tenant, first_tenant.id).await.unwrap();
        sign(&pool, &first, Party::Owner, owner.id).await.unwrap();

        // Pending offers on a reserved room are allowed; signing one is not
        let second = create_test_contract(&pool, &area, &room, second_tenant.id).await;
        let second = sign(&pool, &second, Party::Tenant, second_tenant.id).await.unwrap();
        let err = sign(&pool, &second, Party::Owner, owner.id).await.unwrap_err();

        match &err {
            DbError::UniqueViolation { constraint, .. } => {
                assert_eq!(constraint.as_deref(), Some("contracts_one_live_per_room"))
            }
            other => panic!("expected a unique violation, got {other:?}"),
        }
        let api_error = Error::Database(err);
        assert_eq!(api_error.status_code(), StatusCode::CONFLICT);
        assert_eq!(api_error.user_message(), "This room already has a live contract");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_expirable_returns_overdue_running_contracts_in_batches(pool: PgPool) {
        let owner = create_test_user(&pool, &[Role::Landlord]).await;
        let tenant = create_test_user(&pool, &[Role::Tenant]).await;
        let area = create_test_area(&pool, owner.id).await;
        let today = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();

        let mut overdue = Vec::new();
        for (name, status, days_ago) in [
            ("P201", ContractStatus::Active, 3),
            ("P202", ContractStatus::ExtensionRequested, 10),
            ("P203", ContractStatus::TerminationRequested, 1),
        ] {
            let room = create_test_room(&pool, &area, name).await;
            let contract = create_test_contract(&pool, &area, &room, tenant.id).await;
            let end_date = today - chrono::Days::new(days_ago);
            overdue.push(force_contract_status(&pool, contract.id, status, end_date).await.id);
        }

        // Not running, or not yet due
        let room = create_test_room(&pool, &area, "P204").await;
        let contract = create_test_contract(&pool, &area, &room, tenant.id).await;
        force_contract_status(&pool, contract.id, ContractStatus::Disputed, today - chrono::Days::new(5)).await;
        let room = create_test_room(&pool, &area, "P205").await;
        let contract = create_test_contract(&pool, &area, &room, tenant.id).await;
        force_contract_status(&pool, contract.id, ContractStatus::Active, today).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Contracts::new(&mut conn);

        let batch = repo.list_expirable(today, 2).await.unwrap();
        assert_eq!(batch.len(), 2);
        // Oldest end date first
        assert_eq!(batch[0].id, overdue[1]);
        assert_eq!(batch[1].id, overdue[0]);

        let all = repo.list_expirable(today, 100).await.unwrap();
        let mut ids: Vec<_> = all.iter().map(|c| c.id).collect();
        ids.sort();
        overdue.sort();
        assert_eq!(ids, overdue);
    }
}
