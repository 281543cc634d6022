//! API request and response data models.
//!
//! These structures define the public API contract. They are kept apart from the database
//! models in [`crate::db::models`] so that storage and wire formats can evolve independently.
//! Every request body implements [`crate::validation::Validate`] and every type is annotated
//! with `utoipa` for the OpenAPI document.
//!
//! # Model Categories
//!
//! ## Accounts
//!
//! - [`auth`]: Login, registration, and password management payloads
//! - [`users`]: Users, roles, and profiles
//!
//! ## Listings
//!
//! - [`housing_areas`]: Landlord properties and their review state
//! - [`rooms`]: Rentable rooms and the room search query
//!
//! ## Tenancy
//!
//! - [`contracts`]: Contract requests, extension and termination payloads
//! - [`disputes`]: Disputes and their admin resolution
//!
//! ## Money
//!
//! - [`transactions`]: Deposits, service fees, boosting ads and refunds, plus the amount rules
//! - [`payments`]: Gateway checkout and the ZaloPay callback
//!
//! ## Other
//!
//! - [`chat`]: Conversations and messages
//! - [`config`]: Public marketplace settings
//! - [`pagination`]: Shared `skip`/`limit` parameters and list envelope

pub mod auth;
pub mod chat;
pub mod config;
pub mod contracts;
pub mod disputes;
pub mod housing_areas;
pub mod pagination;
pub mod payments;
pub mod rooms;
pub mod transactions;
pub mod users;
