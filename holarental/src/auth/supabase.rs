//! Verification of Supabase-issued access tokens.
//!
//! Supabase signs access tokens with the project's JWT secret (HS256). The `sub` claim is the
//! Supabase user id, which is stored as the user's `external_id`.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::{config::SupabaseAuthConfig, errors::Error};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupabaseUserMetadata {
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseClaims {
    pub sub: String,
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: SupabaseUserMetadata,
    pub exp: i64,
    pub aud: String,
}

/// Verify a Supabase access token against the configured secret, audience and issuer.
pub fn verify_supabase_token(token: &str, config: &SupabaseAuthConfig) -> Result<SupabaseClaims, Error> {
    let secret = config.jwt_secret.as_ref().ok_or_else(|| Error::Internal {
        operation: "Supabase auth: jwt_secret is required".to_string(),
    })?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[config.audience.as_str()]);
    if let Some(issuer) = &config.issuer {
        validation.set_issuer(&[issuer.as_str()]);
    }

    let key = DecodingKey::from_secret(secret.as_bytes());
    decode::<SupabaseClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidKeyFormat | ErrorKind::Crypto(_) => Error::Internal {
                operation: format!("Supabase token verification: {e}"),
            },
            _ => Error::Unauthenticated { message: None },
        })
}
