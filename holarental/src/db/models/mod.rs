//! Database record models matching table schemas.
//!
//! Request structs (`*CreateDBRequest`, `*UpdateDBRequest`) carry already validated data into
//! the repositories; response structs (`*DBResponse`) are what the repositories return. Most
//! responses derive `sqlx::FromRow` directly, users are assembled from `users` and `user_roles`.
//!
//! Database models are distinct from the API models in [`crate::api::models`], which convert
//! from them with `From`.
//!
//! - [`users`]: Accounts, roles and profiles
//! - [`housing_areas`]: Landlord listings
//! - [`rooms`]: Rooms, joined with their listing
//! - [`contracts`]: Tenancy contracts
//! - [`transactions`]: Deposits, fees, boosts and refunds
//! - [`disputes`]: Contract disputes
//! - [`chat`]: Conversations and messages

pub mod chat;
pub mod contracts;
pub mod disputes;
pub mod housing_areas;
pub mod rooms;
pub mod transactions;
pub mod users;
