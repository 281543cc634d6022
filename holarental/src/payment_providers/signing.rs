//! HMAC-SHA256 request signing, hex encoded.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{PaymentError, Result};

type HmacSha256 = Hmac<Sha256>;

fn keyed(key: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| PaymentError::ProviderApi(format!("invalid signing key: {e}")))
}

/// Lowercase hex HMAC-SHA256 of `data` under `key`.
pub fn sign(key: &str, data: &str) -> Result<String> {
    let mut mac = keyed(key)?;
    mac.update(data.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex MAC in constant time. Malformed hex never verifies.
pub fn verify(key: &str, data: &str, mac_hex: &str) -> bool {
    let Ok(expected) = hex::decode(mac_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = keyed(key) else {
        return false;
    };
    mac.update(data.as_bytes());
    mac.verify_slice(&expected).is_ok()
}
