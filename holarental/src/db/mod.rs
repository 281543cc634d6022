//! PostgreSQL persistence for the marketplace.
//!
//! Repositories in [`handlers`] wrap a borrowed `PgConnection` (pooled or inside a transaction)
//! and return the row types in [`models`]. The schema lives in `migrations/` and is applied by
//! [`crate::migrator`] at startup and by every `#[sqlx::test]`.
//!
//! Most integrity rules are enforced here rather than in handlers, so that two requests racing
//! on the same row cannot both win.
//!
//! # Contracts: version compare-and-set
//!
//! Every contract row carries a `version`. [`handlers::Contracts::apply_transition`] writes the
//! next state with `WHERE id = $1 AND version = $2` and fails with
//! [`errors::DbError::StaleWrite`] when another request moved the contract first. The room
//! status follows in the same transaction through its own status compare-and-set: reserving a
//! room that is no longer `available` is also a stale write, while releasing a room that is
//! already in the target state is only logged.
//!
//! ```ignore
//! let applied = lifecycle::apply(&contract, &Event::Sign, Party::Owner, Some(owner_id), now)?;
//! let mut tx = pool.begin().await?;
//! let signed = Contracts::new(&mut tx).apply_transition(&contract, applied).await?;
//! tx.commit().await?;
//! ```
//!
//! # Row locks
//!
//! - Settlement locks the transaction with `SELECT ... FOR UPDATE` by gateway reference, so a
//!   gateway callback and a manual sync settle it exactly once.
//! - Refunds lock the contract row before reading its refundable deposit, so a manual refund and
//!   a dispute resolution cannot both spend it.
//!
//! # Unique indexes
//!
//! "At most one live X" rules are partial unique indexes over the live statuses. A violation of
//! those, or of a plain unique constraint, surfaces as
//! [`errors::DbError::UniqueViolation`] carrying the index name, which the API maps to a 409
//! with a readable message:
//!
//! | Index | Rule |
//! |-------|------|
//! | `contracts_one_live_per_room` | one signed, active or pending-change contract per room |
//! | `disputes_one_open_per_contract` | one open or under-review dispute per contract |
//! | `transactions_one_live_deposit_per_contract` | one pending or completed deposit |
//! | `transactions_one_live_service_fee_per_contract` | one pending or completed service fee |
//! | `conversations_pair_unique` | one conversation per ordered pair of users (not partial) |
//!
//! # Retained records
//!
//! Contracts and transactions are never deleted. Their keys to users and rooms are
//! `ON DELETE RESTRICT`, and the editable repositories expose
//! [`handlers::Repository::has_history`] so deletes can be refused up front. Columns that only
//! record who acted (`cancelled_by`, `resolved_by`, ...) are cleared instead.

pub mod errors;
pub mod handlers;
pub mod models;
