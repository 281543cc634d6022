//! Native session tokens.
//!
//! A session is an HS256 JWT signed with `secret_key`. It carries the account id and the
//! account's marketplace roles, so [`RequiresPermission`](crate::auth::permissions::RequiresPermission)
//! can check the role matrix without a database round trip. Roles are fixed when the token is
//! issued: a role change made by an admin takes effect at the user's next login, or once the
//! token expires after `auth.security.jwt_expiry`.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    api::models::users::{CurrentUser, Role, with_tenant_role},
    config::Config,
    errors::Error,
    types::UserId,
};

/// `iss` of every session token. Tokens from other issuers signed with the same secret are
/// rejected.
pub const SESSION_ISSUER: &str = "holarental";

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: UserId,
    pub email: String,
    pub username: String,
    /// Marketplace roles at issue time
    pub roles: Vec<Role>,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn issue(user: &CurrentUser, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            sub: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            roles: with_tenant_role(&user.roles),
            iss: SESSION_ISSUER.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }
}

impl From<SessionClaims> for CurrentUser {
    fn from(claims: SessionClaims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            username: claims.username,
            // Every account is a tenant, whatever an older token says
            roles: with_tenant_role(&claims.roles),
            display_name: None,
            avatar_url: None,
        }
    }
}

fn session_secret(config: &Config) -> Result<&[u8], Error> {
    config
        .secret_key
        .as_deref()
        .map(str::as_bytes)
        .ok_or_else(|| Error::Internal {
            operation: "JWT sessions: secret_key is required".to_string(),
        })
}

/// Issue a session token for `user` with its current roles.
pub fn create_session_token(user: &CurrentUser, config: &Config) -> Result<String, Error> {
    let claims = SessionClaims::issue(user, config.auth.security.jwt_expiry, Utc::now());
    let key = EncodingKey::from_secret(session_secret(config)?);

    encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Verify a session token and return the user it was issued to.
pub fn verify_session_token(token: &str, config: &Config) -> Result<CurrentUser, Error> {
    let key = DecodingKey::from_secret(session_secret(config)?);
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[SESSION_ISSUER]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);

    let token_data = decode::<SessionClaims>(token, &key, &validation).map_err(verification_error)?;
    Ok(CurrentUser::from(token_data.claims))
}

/// Anything wrong with the token itself is the client's problem (401). Only key and crypto
/// failures on our side are internal.
fn verification_error(e: jsonwebtoken::errors::Error) -> Error {
    match e.kind() {
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::ExpiredSignature
        | ErrorKind::ImmatureSignature
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::Base64(_)
        // Claims that do not fit SessionClaims, e.g. a role this server does not know
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => Error::Unauthenticated { message: None },
        _ => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, SecurityConfig};
    use serde_json::json;
    use uuid::Uuid;

    const SECRET: &str = "holarental-session-test-secret";

    fn session_config() -> Config {
        Config {
            secret_key: Some(SECRET.to_string()),
            auth: AuthConfig {
                security: SecurityConfig {
                    jwt_expiry: Duration::from_secs(3600),
                    cors: crate::config::CorsConfig::default(),
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn user_with(roles: &[Role]) -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            email: "lan.nguyen@example.vn".to_string(),
            username: "lan_nguyen".to_string(),
            roles: roles.to_vec(),
            display_name: Some("Nguyễn Lan".to_string()),
            avatar_url: None,
        }
    }

    fn sign(claims: serde_json::Value) -> String {
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[test]
    fn test_landlord_session_keeps_its_roles() {
        let config = session_config();
        let landlord = user_with(&[Role::Tenant, Role::Landlord]);

        let token = create_session_token(&landlord, &config).unwrap();
        let verified = verify_session_token(&token, &config).unwrap();

        assert_eq!(verified.id, landlord.id);
        assert_eq!(verified.email, landlord.email);
        assert_eq!(verified.roles, vec![Role::Tenant, Role::Landlord]);
        assert!(verified.has_role(Role::Landlord));
        assert!(!verified.is_admin());
        // Display fields are not carried in the token
        assert_eq!(verified.display_name, None);
    }

    #[test]
    fn test_admin_session_is_admin() {
        let config = session_config();
        let admin = user_with(&[Role::Admin]);

        let verified = verify_session_token(&create_session_token(&admin, &config).unwrap(), &config).unwrap();

        assert!(verified.is_admin());
        assert!(verified.has_role(Role::Tenant));
        assert!(!verified.has_role(Role::Landlord));
    }

    #[test]
    fn test_issue_always_includes_tenant() {
        let now = Utc::now();
        let claims = SessionClaims::issue(&user_with(&[Role::Landlord]), Duration::from_secs(60), now);
        assert_eq!(claims.roles, vec![Role::Tenant, Role::Landlord]);
        assert_eq!(claims.iss, SESSION_ISSUER);
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn test_token_without_tenant_role_verifies_as_tenant() {
        let now = Utc::now().timestamp();
        let token = sign(json!({
            "sub": Uuid::new_v4(),
            "email": "minh@example.vn",
            "username": "minh",
            "roles": ["admin"],
            "iss": SESSION_ISSUER,
            "iat": now,
            "exp": now + 600,
        }));

        let verified = verify_session_token(&token, &session_config()).unwrap();
        assert_eq!(verified.roles, vec![Role::Tenant, Role::Admin]);
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let now = Utc::now().timestamp();
        let token = sign(json!({
            "sub": Uuid::new_v4(),
            "email": "minh@example.vn",
            "username": "minh",
            "roles": ["tenant", "superuser"],
            "iss": SESSION_ISSUER,
            "iat": now,
            "exp": now + 600,
        }));

        let result = verify_session_token(&token, &session_config());
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }

    #[test]
    fn test_foreign_issuer_is_rejected() {
        let now = Utc::now().timestamp();
        let token = sign(json!({
            "sub": Uuid::new_v4(),
            "email": "minh@example.vn",
            "username": "minh",
            "roles": ["tenant", "admin"],
            "iss": "someone-else",
            "iat": now,
            "exp": now + 600,
        }));

        let result = verify_session_token(&token, &session_config());
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }

    #[test]
    fn test_expired_admin_session_is_rejected() {
        let config = session_config();
        let past = Utc::now() - chrono::Duration::hours(2);
        let claims = SessionClaims::issue(&user_with(&[Role::Admin]), Duration::from_secs(3600), past);
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();

        let result = verify_session_token(&token, &config);
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let mut config = session_config();
        let token = create_session_token(&user_with(&[Role::Landlord]), &config).unwrap();

        config.secret_key = Some("different-secret".to_string());
        let result = verify_session_token(&token, &config);
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }

    #[test]
    fn test_missing_secret_is_internal() {
        let mut config = session_config();
        config.secret_key = None;

        let result = create_session_token(&user_with(&[Role::Tenant]), &config);
        assert!(matches!(result, Err(Error::Internal { .. })));
    }

    #[test]
    fn test_malformed_tokens_are_rejected() {
        let config = session_config();
        for token in ["not.a.token", "invalid", "", "too.many.parts.in.this.token"] {
            let result = verify_session_token(token, &config);
            assert!(
                matches!(result, Err(Error::Unauthenticated { .. })),
                "expected 401 for {token:?}"
            );
        }
    }
}
