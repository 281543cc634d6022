//! API layer for HTTP request handling and data models.
//!
//! This module contains the REST API implementation, organized into:
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! Every endpoint lives under `/api`:
//!
//! - **Authentication** (`/api/auth/*`): Registration, login, logout, password changes
//! - **Users** (`/api/users/*`): User administration, profiles, verification
//! - **Listings** (`/api/housing-areas/*`, `/api/rooms/*`): Housing areas, rooms, search
//! - **Contracts** (`/api/contracts/*`): Contract requests and lifecycle transitions
//! - **Money** (`/api/transactions/*`, `/api/payments/*`): Transactions, checkout, ZaloPay callback
//! - **Disputes** (`/api/disputes/*`): Raising and resolving disputes
//! - **Chat** (`/api/chat/*`): Conversations, messages, and the SSE stream
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa` annotations. The rendered
//! documentation is served at `/docs` when the server is running.

pub mod handlers;
pub mod models;
