//! Background sweeper for time-driven state changes.
//!
//! Each pass expires running contracts whose end date has passed (Vietnam calendar) and
//! cancels pending transactions nobody paid within `sweeper.pending_payment_timeout`.
//! Every contract expires in its own database transaction through the contract lifecycle,
//! so a contract changed by a user mid-sweep is skipped and picked up on the next pass.

use chrono::{DateTime, TimeDelta, Utc};
use metrics::counter;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::{
    config::SweeperConfig,
    db::{errors::DbError, handlers::Contracts, handlers::Transactions},
    lifecycle::{self, Event, Party},
    types::{abbrev_uuid, vietnam_today},
};

/// Contracts expired per query; a pass keeps fetching until none are left.
const EXPIRY_BATCH: i64 = 100;

/// What a single pass changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub contracts_expired: u64,
    pub contracts_skipped: u64,
    pub payments_cancelled: u64,
}

pub async fn run_sweeper(config: SweeperConfig, pool: PgPool, shutdown: CancellationToken) {
    tracing::info!(interval = ?config.interval, "Starting sweeper");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Sweeper shutting down");
                return;
            }
            _ = tokio::time::sleep(config.interval) => {}
        }

        match sweep_once(&pool, &config, Utc::now()).await {
            Ok(report) if report == SweepReport::default() => tracing::debug!("Sweep found nothing to do"),
            Ok(report) => tracing::info!(
                contracts_expired = report.contracts_expired,
                contracts_skipped = report.contracts_skipped,
                payments_cancelled = report.payments_cancelled,
                "Sweep complete"
            ),
            Err(e) => tracing::warn!(error = %e, "Sweep failed, retrying next interval"),
        }
    }
}

#[tracing::instrument(skip_all)]
pub async fn sweep_once(pool: &PgPool, config: &SweeperConfig, now: DateTime<Utc>) -> anyhow::Result<SweepReport> {
    let mut report = SweepReport::default();
    let today = vietnam_today();

    loop {
        let batch = {
            let mut conn = pool.acquire().await?;
            Contracts::new(&mut conn).list_expirable(today, EXPIRY_BATCH).await?
        };
        let fetched = batch.len() as i64;
        let mut expired_this_batch = 0;

        for contract in batch {
            let applied = match lifecycle::apply(&contract, &Event::Expire, Party::System, None, now) {
                Ok(applied) => applied,
                Err(e) => {
                    tracing::debug!(contract_id = %abbrev_uuid(&contract.id), "Not expiring contract: {e}");
                    report.contracts_skipped += 1;
                    continue;
                }
            };

            let mut tx = pool.begin().await?;
            match Contracts::new(&mut tx).apply_transition(&contract, applied).await {
                Ok(_) => {
                    tx.commit().await?;
                    report.contracts_expired += 1;
                    expired_this_batch += 1;
                    tracing::info!(contract_id = %abbrev_uuid(&contract.id), end_date = %contract.end_date, "Contract expired");
                }
                Err(DbError::StaleWrite { .. }) => {
                    report.contracts_skipped += 1;
                    tracing::debug!(contract_id = %abbrev_uuid(&contract.id), "Contract changed during sweep, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Skipped contracts would come back in the next query, so stop once a batch makes no progress
        if fetched < EXPIRY_BATCH || expired_this_batch == 0 {
            break;
        }
    }
    counter!("holarental_contracts_expired_total").increment(report.contracts_expired);

    let mut conn = pool.acquire().await?;
    report.payments_cancelled = Transactions::new(&mut conn)
        .cancel_stale(stale_cutoff(now, config))
        .await?;
    counter!("holarental_stale_payments_cancelled_total").increment(report.payments_cancelled);

    Ok(report)
}

/// Pending transactions created before this instant are abandoned.
fn stale_cutoff(now: DateTime<Utc>, config: &SweeperConfig) -> DateTime<Utc> {
    TimeDelta::from_std(config.pending_payment_timeout)
        .ok()
        .and_then(|timeout| now.checked_sub_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{
        contracts::ContractStatus,
        rooms::RoomStatus,
        transactions::{TransactionKind, TransactionStatus},
        users::Role,
    };
    use crate::db::handlers::{Repository, Rooms};
    use crate::test_utils::{
        create_test_area, create_test_config, create_test_contract, create_test_room, create_test_transaction,
        create_test_user, force_contract_status, lazy_pool,
    };
    use chrono::Days;
    use std::time::Duration;

    #[test]
    fn test_stale_cutoff_subtracts_timeout() {
        let config = SweeperConfig {
            pending_payment_timeout: Duration::from_secs(30 * 60),
            ..Default::default()
        };
        let now = Utc::now();
        assert_eq!(stale_cutoff(now, &config), now - TimeDelta::minutes(30));
    }

    #[test]
    fn test_stale_cutoff_saturates() {
        let config = SweeperConfig {
            pending_payment_timeout: Duration::MAX,
            ..Default::default()
        };
        assert_eq!(stale_cutoff(Utc::now(), &config), DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let config = create_test_config();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(
            Duration::from_secs(1),
            run_sweeper(config.sweeper.clone(), lazy_pool(&config), shutdown),
        )
        .await
        .expect("sweeper exits once cancelled");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_sweep_expires_overdue_contracts_across_batches(pool: PgPool) {
        let owner = create_test_user(&pool, &[Role::Landlord]).await;
        let tenant = create_test_user(&pool, &[Role::Tenant]).await;
        let area = create_test_area(&pool, owner.id).await;
        let overdue_until = vietnam_today() - Days::new(3);

        let mut rooms = Vec::new();
        for n in 0..(EXPIRY_BATCH + 1) {
            let room = create_test_room(&pool, &area, &format!("A{n:03}")).await;
            let contract = create_test_contract(&pool, &area, &room, tenant.id).await;
            force_contract_status(&pool, contract.id, ContractStatus::Active, overdue_until).await;
            let mut conn = pool.acquire().await.unwrap();
            Rooms::new(&mut conn)
                .compare_and_set_status(room.id, RoomStatus::Available, RoomStatus::Rented)
                .await
                .unwrap();
            rooms.push(room.id);
        }
        // Still running
        let room = create_test_room(&pool, &area, "B001").await;
        let current = create_test_contract(&pool, &area, &room, tenant.id).await;
        force_contract_status(&pool, current.id, ContractStatus::Active, vietnam_today() + Days::new(30)).await;

        let config = create_test_config().sweeper;
        let report = sweep_once(&pool, &config, Utc::now()).await.unwrap();
        assert_eq!(report.contracts_expired, EXPIRY_BATCH as u64 + 1);
        assert_eq!(report.contracts_skipped, 0);

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Rooms::new(&mut conn);
        for room_id in rooms {
            assert_eq!(repo.get_by_id(room_id).await.unwrap().unwrap().status, RoomStatus::Available);
        }
        let still_active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contracts WHERE status = 'active'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(still_active, 1);

        // Nothing left on the next pass
        assert_eq!(sweep_once(&pool, &config, Utc::now()).await.unwrap(), SweepReport::default());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_sweep_cancels_abandoned_payments(pool: PgPool) {
        let payer = create_test_user(&pool, &[Role::Landlord]).await;
        let abandoned =
            create_test_transaction(&pool, payer.id, TransactionKind::BoostingAds, 20_000, TransactionStatus::Pending, None)
                .await;
        let recent =
            create_test_transaction(&pool, payer.id, TransactionKind::BoostingAds, 20_000, TransactionStatus::Pending, None)
                .await;

        let config = SweeperConfig {
            pending_payment_timeout: Duration::from_secs(24 * 60 * 60),
            ..create_test_config().sweeper
        };
        sqlx::query("UPDATE transactions SET created_at = NOW() - INTERVAL '25 hours' WHERE id = $1")
            .bind(abandoned.id)
            .execute(&pool)
            .await
            .unwrap();

        let report = sweep_once(&pool, &config, Utc::now()).await.unwrap();
        assert_eq!(report.payments_cancelled, 1);

        let status = |id: uuid::Uuid| {
            sqlx::query_scalar::<_, TransactionStatus>("SELECT status FROM transactions WHERE id = $1")
                .bind(id)
                .fetch_one(&pool)
        };
        assert_eq!(status(abandoned.id).await.unwrap(), TransactionStatus::Cancelled);
        assert_eq!(status(recent.id).await.unwrap(), TransactionStatus::Pending);
    }
}
