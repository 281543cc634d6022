use crate::{
    AppState,
    api::models::users::{CurrentUser, Role},
    auth::{
        session,
        supabase::{self, SupabaseClaims},
    },
    config::Config,
    db::{
        errors::DbError,
        handlers::{Repository, Users},
        models::users::UserCreateDBRequest,
    },
    errors::{Error, Result},
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use sqlx::PgPool;
use tracing::{debug, info, instrument, trace};

/// The bearer token, if the request carries one.
/// Returns:
/// - None: no Authorization header, or not a Bearer token
/// - Some(Ok(token)): the token
/// - Some(Err(error)): the header is not valid ASCII
fn bearer_token(parts: &Parts) -> Option<Result<&str>> {
    let header = parts.headers.get(header::AUTHORIZATION)?;
    let value = match header.to_str() {
        Ok(value) => value,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };
    value.strip_prefix("Bearer ").map(|token| Ok(token.trim()))
}

/// Extract user from the JWT session cookie if present and valid
#[instrument(skip(parts, config))]
fn try_cookie_session_auth(parts: &Parts, config: &Config) -> Option<Result<CurrentUser>> {
    let cookie_header = parts.headers.get(header::COOKIE)?;

    let cookie_str = match cookie_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid cookie header: {e}"),
            }));
        }
    };
    let cookie_name = &config.auth.native.session.cookie_name;

    for cookie in cookie_str.split(';') {
        if let Some((name, value)) = cookie.trim().split_once('=')
            && name == cookie_name
        {
            // Expired tokens are expected here; keep looking rather than failing the request
            if let Ok(user) = session::verify_session_token(value, config) {
                return Some(Ok(user));
            }
        }
    }
    None
}

/// A username derived from the email's local part, suffixed with part of the external id so
/// that two accounts with the same local part do not collide.
fn username_for(email: &str, external_id: &str) -> String {
    let local: String = email
        .split('@')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .take(40)
        .collect();
    let local = if local.is_empty() { "user".to_string() } else { local };
    let suffix: String = external_id.chars().filter(char::is_ascii_alphanumeric).take(6).collect();
    format!("{local}_{suffix}")
}

/// Resolve the account behind verified Supabase claims.
///
/// Looks the user up by `external_id`, then by email (linking the external id on first use),
/// then creates it when `auto_create_users` is set. All of it runs in one transaction.
#[instrument(skip(claims, config, db), err)]
async fn resolve_supabase_user(claims: SupabaseClaims, config: &Config, db: &PgPool) -> Result<Option<CurrentUser>> {
    let mut tx = db.begin().await.map_err(DbError::from)?;
    let mut users = Users::new(&mut tx);

    let user = if let Some(user) = users.get_by_external_id(&claims.sub).await? {
        Some(user)
    } else if let Some(email) = claims.email.as_deref() {
        match users.get_user_by_email(email).await? {
            Some(user) => {
                users.link_external_id(user.id, &claims.sub).await?;
                Some(user)
            }
            None if config.auth.supabase.auto_create_users => {
                let request = UserCreateDBRequest {
                    username: username_for(email, &claims.sub),
                    email: email.to_string(),
                    display_name: claims.user_metadata.full_name.clone(),
                    avatar_url: claims.user_metadata.avatar_url.clone(),
                    roles: vec![Role::Tenant],
                    auth_source: "supabase".to_string(),
                    password_hash: None,
                    external_id: Some(claims.sub.clone()),
                };
                let created = users.create(&request).await?;
                info!(user_id = %created.id, "Created user from Supabase token");
                Some(created)
            }
            None => None,
        }
    } else {
        None
    };

    tx.commit().await.map_err(DbError::from)?;
    Ok(user.map(CurrentUser::from))
}

/// Try the bearer token as a native session token, then as a Supabase access token.
#[instrument(skip(token, state))]
async fn try_bearer_auth(token: &str, state: &AppState) -> Result<CurrentUser> {
    let config = &state.config;

    if config.auth.native.enabled && config.secret_key.is_some() {
        match session::verify_session_token(token, config) {
            Ok(user) => return Ok(user),
            Err(e) => trace!("Bearer token is not a session token: {e}"),
        }
    }

    if config.auth.supabase.enabled {
        let claims = supabase::verify_supabase_token(token, &config.auth.supabase)?;
        return resolve_supabase_user(claims, config, &state.db)
            .await?
            .ok_or(Error::Unauthenticated {
                message: Some("No account is linked to this token".to_string()),
            });
    }

    Err(Error::Unauthenticated { message: None })
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // Resolved once per request; RequiresPermission and the handler share it
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let mut bearer_error = None;
        if let Some(token) = bearer_token(parts) {
            match try_bearer_auth(token?, state).await {
                Ok(user) => {
                    debug!("Authenticated user {} by bearer token", user.id);
                    parts.extensions.insert(user.clone());
                    return Ok(user);
                }
                Err(e) => {
                    trace!("Bearer authentication failed: {:?}", e);
                    bearer_error = Some(e);
                }
            }
        }

        if state.config.auth.native.enabled
            && let Some(result) = try_cookie_session_auth(parts, &state.config)
        {
            let user = result?;
            debug!("Authenticated user {} by session cookie", user.id);
            parts.extensions.insert(user.clone());
            return Ok(user);
        }

        match bearer_error {
            // Key problems and database failures are not the caller's fault
            Some(e @ (Error::Internal { .. } | Error::Database(_))) => Err(e),
            Some(Error::Unauthenticated { message }) => Err(Error::Unauthenticated { message }),
            _ => Err(Error::Unauthenticated { message: None }),
        }
    }
}

/// Optional authentication: `None` when the request carries no valid credentials.
pub struct MaybeCurrentUser(pub Option<CurrentUser>);

impl FromRequestParts<AppState> for MaybeCurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(Self(Some(user))),
            Err(Error::Unauthenticated { .. }) => Ok(Self(None)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_state, test_user};
    use axum::http::{Request, StatusCode};

    fn parts_with(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("http://localhost/api/auth/me");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_username_for_supabase_accounts() {
        assert_eq!(username_for("hoa.tran@example.vn", "0b6f2a9e-2a43"), "hoa.tran_0b6f2a");
        assert_eq!(username_for("@example.vn", "abc"), "user_abc");
        assert_eq!(username_for("a+b c@example.vn", "xyz987"), "abc_xyz987");
    }

    #[tokio::test]
    async fn test_missing_credentials_are_unauthenticated() {
        let state = create_test_state();
        let mut parts = parts_with(&[]);
        let err = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_session_bearer_token_authenticates() {
        let state = create_test_state();
        let user = test_user(&[Role::Tenant, Role::Landlord]);
        let token = session::create_session_token(&user, &state.config).unwrap();
        let mut parts = parts_with(&[("authorization", &format!("Bearer {token}"))]);

        let resolved = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(resolved.id, user.id);
        assert_eq!(resolved.roles, user.roles);
    }

    #[tokio::test]
    async fn test_session_cookie_authenticates() {
        let state = create_test_state();
        let user = test_user(&[Role::Tenant]);
        let token = session::create_session_token(&user, &state.config).unwrap();
        let cookie = format!("theme=dark; {}={token}", state.config.auth.native.session.cookie_name);
        let mut parts = parts_with(&[("cookie", &cookie)]);

        let resolved = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn test_garbage_bearer_falls_back_to_cookie() {
        let state = create_test_state();
        let user = test_user(&[Role::Tenant]);
        let token = session::create_session_token(&user, &state.config).unwrap();
        let cookie = format!("{}={token}", state.config.auth.native.session.cookie_name);
        let mut parts = parts_with(&[("authorization", "Bearer not-a-token"), ("cookie", &cookie)]);

        let resolved = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn test_garbage_bearer_alone_is_unauthenticated() {
        let state = create_test_state();
        let mut parts = parts_with(&[("authorization", "Bearer not-a-token")]);
        let err = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[tokio::test]
    async fn test_maybe_current_user_tolerates_anonymous_requests() {
        let state = create_test_state();
        let mut parts = parts_with(&[]);
        let MaybeCurrentUser(user) = MaybeCurrentUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert!(user.is_none());
    }
}
