//! Repository implementations for database access.
//!
//! Each repository wraps a borrowed `PgConnection`, which may be a pooled connection or an open
//! transaction, and returns the row types in [`crate::db::models`].
//!
//! # Available Repositories
//!
//! - [`Users`]: accounts, roles and profiles
//! - [`HousingAreas`]: listings and their review state
//! - [`Rooms`]: rooms, search, and lifecycle-driven status changes
//! - [`Contracts`]: contracts and version-checked lifecycle writes
//! - [`Transactions`]: payment records and settlement state
//! - [`Disputes`]: disputes and their resolution
//! - [`Conversations`]: chat contacts and messages
//!
//! # Common Pattern
//!
//! ```ignore
//! use holarental::db::handlers::{Rooms, Repository};
//!
//! async fn example(pool: &sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tx = pool.begin().await?;
//!     let mut repo = Rooms::new(&mut tx);
//!     let room = repo.get_by_id(room_id).await?;
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```
//!
//! Writes that touch more than one row open their own transaction on the borrowed connection,
//! which becomes a savepoint when the caller is already inside one.

pub mod chat;
pub mod contracts;
pub mod disputes;
pub mod housing_areas;
pub mod repository;
pub mod rooms;
pub mod search;
pub mod transactions;
pub mod users;

pub use chat::Conversations;
pub use contracts::Contracts;
pub use disputes::Disputes;
pub use housing_areas::HousingAreas;
pub use repository::Repository;
pub use rooms::Rooms;
pub use transactions::Transactions;
pub use users::Users;
