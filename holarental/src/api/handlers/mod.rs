//! HTTP request handlers for all API endpoints.
//!
//! This module contains Axum route handlers organized by resource type.
//! Each handler is responsible for:
//! - Request validation and deserialization
//! - Authentication and authorization checks
//! - Running the business rules against the database repositories
//! - Response serialization
//!
//! # Handler Modules
//!
//! - [`auth`]: Registration, login, logout, and password changes
//! - [`chat`]: Conversations, messages, read receipts, and the live message stream
//! - [`config`]: Public marketplace settings
//! - [`contracts`]: Contract requests and every lifecycle transition after them
//! - [`disputes`]: Raising, withdrawing, and resolving disputes
//! - [`housing_areas`]: Listing CRUD and admin moderation
//! - [`payments`]: Gateway checkout, status sync, and the ZaloPay callback
//! - [`rooms`]: Room CRUD and the public room search
//! - [`transactions`]: Deposits, service fees, boosts, and admin refunds
//! - [`users`]: User administration, profiles, and identity verification
//!
//! # Authentication
//!
//! Most handlers require a session cookie or a bearer token. The [`CurrentUser`]
//! extractor resolves the caller and [`RequiresPermission`] checks the role grants
//! before the handler body runs.
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which converts into the matching HTTP
//! status code and a JSON error body.
//!
//! [`CurrentUser`]: crate::api::models::users::CurrentUser
//! [`RequiresPermission`]: crate::auth::permissions::RequiresPermission

pub mod auth;
pub mod chat;
pub mod config;
pub mod contracts;
pub mod disputes;
pub mod housing_areas;
pub mod payments;
pub mod rooms;
pub mod transactions;
pub mod users;
