//! Database repository for payment transactions.

use crate::api::models::transactions::{TransactionKind, TransactionStatus};
use crate::db::{
    errors::Result,
    models::transactions::{TransactionCreateDBRequest, TransactionDBResponse},
};
use crate::types::{ContractId, TransactionId, UserId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub skip: i64,
    pub limit: i64,
    pub user_id: Option<UserId>,
    pub kind: Option<TransactionKind>,
    pub status: Option<TransactionStatus>,
    pub contract_id: Option<ContractId>,
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &TransactionFilter) {
    if let Some(user_id) = filter.user_id {
        query.push(" AND user_id = ");
        query.push_bind(user_id);
    }
    if let Some(kind) = filter.kind {
        query.push(" AND kind = ");
        query.push_bind(kind);
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

pub struct Transactions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Transactions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), kind = %request.kind, amount = request.amount), err)]
    pub async fn create(&mut self, request: &TransactionCreateDBRequest) -> Result<TransactionDBResponse> {
        let transaction = sqlx::query_as::<_, TransactionDBResponse>(
            r#"
            INSERT INTO transactions
                (id, user_id, kind, amount, status, payment_method, contract_id, housing_area_id,
                 dispute_id, boost_days, description, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    CASE WHEN $5 = 'completed'::transaction_status THEN NOW() END)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(request.kind)
        .bind(request.amount)
        .bind(request.status)
        .bind(request.payment_method)
        .bind(request.contract_id)
        .bind(request.housing_area_id)
        .bind(request.dispute_id)
        .bind(request.boost_days)
        .bind(&request.description)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(transaction)
    }

    #[instrument(skip(self), fields(transaction_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: TransactionId) -> Result<Option<TransactionDBResponse>> {
        let transaction = sqlx::query_as::<_, TransactionDBResponse>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(transaction)
    }

    /// Lock the row for the rest of the surrounding transaction.
    #[instrument(skip(self), err)]
    pub async fn get_by_reference_for_update(&mut self, reference: &str) -> Result<Option<TransactionDBResponse>> {
        let transaction =
            sqlx::query_as::<_, TransactionDBResponse>("SELECT * FROM transactions WHERE gateway_reference = $1 FOR UPDATE")
                .bind(reference)
                .fetch_optional(&mut *self.db)
                .await?;
        Ok(transaction)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    pub async fn list(&mut self, filter: &TransactionFilter) -> Result<Vec<TransactionDBResponse>> {
        let mut query = QueryBuilder::new("SELECT * FROM transactions WHERE 1=1");
        push_filters(&mut query, filter);
        query.push(" ORDER BY created_at DESC, id LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let transactions = query
            .build_query_as::<TransactionDBResponse>()
            .fetch_all(&mut *self.db)
            .await?;
        Ok(transactions)
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &TransactionFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM transactions WHERE 1=1");
        push_filters(&mut query, filter);
        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }

    /// Record the gateway order on a pending transaction. Returns `None` if the transaction is
    /// no longer pending or already has an order.
    #[instrument(skip(self, order_url), fields(transaction_id = %abbrev_uuid(&id)), err)]
    pub async fn set_order(
        &mut self,
        id: TransactionId,
        reference: &str,
        order_url: &str,
    ) -> Result<Option<TransactionDBResponse>> {
        let transaction = sqlx::query_as::<_, TransactionDBResponse>(
            r#"
            UPDATE transactions
            SET gateway_reference = $2, order_url = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'pending' AND gateway_reference IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reference)
        .bind(order_url)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(transaction)
    }

    /// `pending` -> `completed`. Returns `None` if the row was not pending.
    #[instrument(skip(self), fields(transaction_id = %abbrev_uuid(&id)), err)]
    pub async fn settle(
        &mut self,
        id: TransactionId,
        gateway_transaction_id: Option<&str>,
    ) -> Result<Option<TransactionDBResponse>> {
        let transaction = sqlx::query_as::<_, TransactionDBResponse>(
            r#"
            UPDATE transactions
            SET status = 'completed',
                gateway_transaction_id = COALESCE($2, gateway_transaction_id),
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(gateway_transaction_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(transaction)
    }

    /// `pending` -> `to`, for `failed` and `cancelled`. Returns `None` if the row was not pending.
    #[instrument(skip(self), fields(transaction_id = %abbrev_uuid(&id), to = ?to), err)]
    pub async fn close_pending(&mut self, id: TransactionId, to: TransactionStatus) -> Result<Option<TransactionDBResponse>> {
        let transaction = sqlx::query_as::<_, TransactionDBResponse>(
            "UPDATE transactions SET status = $2, updated_at = NOW() WHERE id = $1 AND status = 'pending' RETURNING *",
        )
        .bind(id)
        .bind(to)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(transaction)
    }

    /// Completed deposits of the contract minus completed refunds linked to it.
    #[instrument(skip(self), fields(contract_id = %abbrev_uuid(&contract_id)), err)]
    pub async fn refundable_amount(&mut self, contract_id: ContractId) -> Result<i64> {
        let amount: i64 = sqlx::query_scalar(
            r#"
            SELECT (
                COALESCE(SUM(amount) FILTER (WHERE kind = 'deposit'), 0)
                - COALESCE(SUM(amount) FILTER (WHERE kind = 'refund'), 0)
            )::BIGINT
            FROM transactions
            WHERE contract_id = $1 AND status = 'completed'
            "#,
        )
        .bind(contract_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(amount.max(0))
    }

    /// Cancel pending transactions created before `cutoff`. Returns how many were cancelled.
    #[instrument(skip(self), err)]
    pub async fn cancel_stale(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'cancelled', updated_at = NOW() WHERE status = 'pending' AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected())
    }
}
