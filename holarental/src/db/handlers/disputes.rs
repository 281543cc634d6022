//! Database repository for disputes.

use crate::api::models::disputes::DisputeStatus;
use crate::db::{
    errors::Result,
    models::disputes::{DisputeCreateDBRequest, DisputeDBResponse, DisputeResolutionDBRequest},
};
use crate::types::{ContractId, DisputeId, UserId, abbrev_uuid};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct DisputeFilter {
    pub skip: i64,
    pub limit: i64,
    /// Only disputes this user raised or responds to
    pub party: Option<UserId>,
    pub status: Option<DisputeStatus>,
    pub contract_id: Option<ContractId>,
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &DisputeFilter) {
    if let Some(user_id) = filter.party {
        query.push(" AND (raised_by = ");
        query.push_bind(user_id);
        query.push(" OR respondent_id = ");
        query.push_bind(user_id);
        query.push(")");
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ");
        query.push_bind(status);
    }
    if let Some(contract_id) = filter.contract_id {
        query.push(" AND contract_id = ");
        query.push_bind(contract_id);
    }
}

pub struct Disputes<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Disputes<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(contract_id = %abbrev_uuid(&request.contract_id)), err)]
    pub async fn create(&mut self, request: &DisputeCreateDBRequest) -> Result<DisputeDBResponse> {
        let dispute = sqlx::query_as::<_, DisputeDBResponse>(
            r#"
            INSERT INTO disputes
                (id, contract_id, raised_by, respondent_id, category, description, evidence_urls, contract_status_before)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.contract_id)
        .bind(request.raised_by)
        .bind(request.respondent_id)
        .bind(request.category)
        .bind(&request.description)
        .bind(&request.evidence_urls)
        .bind(request.contract_status_before)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(dispute)
    }

    #[instrument(skip(self), fields(dispute_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: DisputeId) -> Result<Option<DisputeDBResponse>> {
        let dispute = sqlx::query_as::<_, DisputeDBResponse>("SELECT * FROM disputes WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(dispute)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    pub async fn list(&mut self, filter: &DisputeFilter) -> Result<Vec<DisputeDBResponse>> {
        let mut query = QueryBuilder::new("SELECT * FROM disputes WHERE 1=1");
        push_filters(&mut query, filter);
        query.push(" ORDER BY created_at DESC, id LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let disputes = query.build_query_as::<DisputeDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(disputes)
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &DisputeFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM disputes WHERE 1=1");
        push_filters(&mut query, filter);
        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }

    /// Move an open dispute to `to`. Returns `None` if the dispute was not in `from`.
    #[instrument(skip(self), fields(dispute_id = %abbrev_uuid(&id), from = ?from, to = ?to), err)]
    pub async fn compare_and_set_status(
        &mut self,
        id: DisputeId,
        from: DisputeStatus,
        to: DisputeStatus,
    ) -> Result<Option<DisputeDBResponse>> {
        let dispute = sqlx::query_as::<_, DisputeDBResponse>(
            "UPDATE disputes SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2 RETURNING *",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(dispute)
    }

    /// Close an open or under-review dispute. Returns `None` if it was already closed.
    #[instrument(skip(self, request), fields(dispute_id = %abbrev_uuid(&id), resolution = ?request.resolution), err)]
    pub async fn resolve(
        &mut self,
        id: DisputeId,
        request: &DisputeResolutionDBRequest,
    ) -> Result<Option<DisputeDBResponse>> {
        let dispute = sqlx::query_as::<_, DisputeDBResponse>(
            r#"
            UPDATE disputes SET
                status = 'resolved',
                resolution = $2,
                resolution_note = $3,
                refund_amount = $4,
                resolved_by = $5,
                resolved_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('open', 'under_review')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(request.resolution)
        .bind(&request.note)
        .bind(request.refund_amount)
        .bind(request.resolved_by)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(dispute)
    }

    /// Withdraw an open or under-review dispute. Returns `None` if it was already closed.
    #[instrument(skip(self), fields(dispute_id = %abbrev_uuid(&id)), err)]
    pub async fn withdraw(&mut self, id: DisputeId) -> Result<Option<DisputeDBResponse>> {
        let dispute = sqlx::query_as::<_, DisputeDBResponse>(
            r#"
            UPDATE disputes SET status = 'withdrawn', updated_at = NOW()
            WHERE id = $1 AND status IN ('open', 'under_review')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(dispute)
    }
}
