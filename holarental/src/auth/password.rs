//! Password hashing and random reference tokens.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::{Engine as _, engine::general_purpose};
use rand::prelude::RngExt;
use rand::rng;

use crate::errors::Error;

/// Argon2 hashing parameters.
#[derive(Debug, Clone, Copy)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Params {
    fn to_argon2(self) -> Result<Argon2<'static>, Error> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None).map_err(|e| Error::Internal {
            operation: format!("create argon2 params: {e}"),
        })?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for Argon2Params {
    /// Argon2id with 19 MiB, 2 iterations, parallelism 1
    fn default() -> Self {
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

pub fn hash_string_with_params(input: &str, params: Option<Argon2Params>) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = params.unwrap_or_default().to_argon2()?;

    let hash = argon2.hash_password(input.as_bytes(), &salt).map_err(|e| Error::Internal {
        operation: format!("hash password: {e}"),
    })?;

    Ok(hash.to_string())
}

pub fn hash_string(input: &str) -> Result<String, Error> {
    hash_string_with_params(input, None)
}

/// Verify a string against a PHC hash. The parameters embedded in the hash are used.
pub fn verify_string(input: &str, hash: &str) -> Result<bool, Error> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| Error::Internal {
        operation: format!("parse password hash: {e}"),
    })?;

    Ok(Argon2::default().verify_password(input.as_bytes(), &parsed_hash).is_ok())
}

/// Hash on the blocking pool; Argon2 takes tens of milliseconds.
pub async fn hash_password(password: String) -> Result<String, Error> {
    tokio::task::spawn_blocking(move || hash_string(&password))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })?
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, Error> {
    tokio::task::spawn_blocking(move || verify_string(&password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })?
}

/// A random base64url token of `bytes` random bytes, without padding.
pub fn generate_reference_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rng().fill(&mut buf[..]);
    general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> Option<Argon2Params> {
        Some(Argon2Params {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
    }

    #[test]
    fn test_password_hash_verifies_only_the_original() {
        let hash = hash_string_with_params("mat-khau-an-toan", fast_params()).unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_string("mat-khau-an-toan", &hash).unwrap());
        assert!(!verify_string("mat-khau-sai", &hash).unwrap());
    }

    #[test]
    fn test_same_input_is_salted_differently() {
        let first = hash_string_with_params("same_password", fast_params()).unwrap();
        let second = hash_string_with_params("same_password", fast_params()).unwrap();
        assert_ne!(first, second);
        assert!(verify_string("same_password", &first).unwrap());
        assert!(verify_string("same_password", &second).unwrap());
    }

    #[test]
    fn test_default_params_are_argon2id_19_mib() {
        let hash = hash_string("default-params").unwrap();
        assert!(hash.contains("m=19456,t=2,p=1"), "{hash}");
    }

    #[test]
    fn test_garbage_hash_is_an_internal_error() {
        assert!(matches!(verify_string("x", "not-a-phc-string"), Err(Error::Internal { .. })));
    }

    #[tokio::test]
    async fn test_async_helpers_round_trip() {
        let hash = hash_password("tro-xinh-quan-7".to_string()).await.unwrap();
        assert!(verify_password("tro-xinh-quan-7".to_string(), hash.clone()).await.unwrap());
        assert!(!verify_password("tro-xau".to_string(), hash).await.unwrap());
    }

    #[test]
    fn test_reference_tokens_are_url_safe_and_unique() {
        let first = generate_reference_token(12);
        let second = generate_reference_token(12);
        assert_ne!(first, second);
        assert_eq!(first.len(), 16);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
