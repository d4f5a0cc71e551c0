//! SHA-256 and HMAC-SHA256 byte routines shared by the request signer.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 digest of `data`, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// HMAC-SHA256 of `message` under `key`.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Recursive HMAC chain: `H1 = HMAC(seed, parts[0])`,
/// `Hk = HMAC(Hk-1, parts[k-1])`.
///
/// # Panics
///
/// Panics when `parts` is empty; a chain needs at least one message after
/// the seed.
pub fn hmac_sha256_chain(seed: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    assert!(
        !parts.is_empty(),
        "hmac chain needs at least one message after the seed"
    );
    let mut digest = hmac_sha256(seed, parts[0]);
    for part in &parts[1..] {
        digest = hmac_sha256(&digest, part);
    }
    digest
}
