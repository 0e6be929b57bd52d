//! Password hashing
//! Mission: salted password verification in the `"salt$digest"` on-disk
//! format, compared in constant time. The design leaves the KDF choice
//! open beyond that shape; this implementation uses HMAC-SHA256 keyed by
//! the salt, built on the `hmac`/`sha2` dependencies already used
//! elsewhere in this codebase for bearer-token signing.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SALT_BYTES: usize = 16;

/// Hash `password` under a freshly generated salt, returning `"salt$digest"`.
pub fn hash(password: &str) -> String {
    let mut salt_bytes = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = hex::encode(salt_bytes);
    let digest = digest_hex(password, &salt);
    format!("{salt}${digest}")
}

/// Verify `password` against a stored `"salt$digest"` record in constant time.
pub fn verify(password: &str, stored: &str) -> bool {
    let Some((salt, expected_digest)) = stored.split_once('$') else {
        return false;
    };
    let actual_digest = digest_hex(password, salt);
    constant_time_eq(actual_digest.as_bytes(), expected_digest.as_bytes())
}

fn digest_hex(password: &str, salt: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(salt.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(password.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
