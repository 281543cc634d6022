//! Authentication and authorization.
//!
//! # Authentication Methods
//!
//! [`CurrentUser`](crate::api::models::users::CurrentUser) is resolved once per request by the
//! extractor in [`current_user`], trying in order:
//!
//! 1. `Authorization: Bearer <token>` as a native session token ([`session`])
//! 2. the same bearer token as a Supabase access token ([`supabase`]), when enabled. Unknown
//!    Supabase users are created on first sight if `auth.supabase.auto_create_users` is set.
//! 3. the session cookie (`holarental_session` by default)
//!
//! Native accounts log in with email and password via `/api/auth/login`; passwords are hashed
//! with Argon2id ([`password`]).
//!
//! # Authorization
//!
//! Roles (tenant, landlord, admin) map to `(Resource, Operation)` grants in [`permissions`].
//! Handlers declare their requirement with the
//! [`RequiresPermission`](permissions::RequiresPermission) extractor and check row ownership
//! themselves once the row is loaded.
//!
//! ```ignore
//! use holarental::auth::permissions::{RequiresPermission, operation, resource};
//!
//! async fn list_contracts(
//!     State(state): State<AppState>,
//!     _perm: RequiresPermission<resource::Contracts, operation::ReadOwn>,
//!     current_user: CurrentUser,
//! ) -> Result<Json<PaginatedResponse<ContractResponse>>> { ... }
//! ```

pub mod current_user;
pub mod password;
pub mod permissions;
pub mod session;
pub mod supabase;
