//! Digest primitives behind the challenge-response protocol.
//!
//! Every value that crosses the wire or lands in the user database is the
//! standard base64 encoding of a SHA-384 digest, so all of them are exactly
//! [`ENCODED_DIGEST_LEN`] characters long.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha384};

/// Raw SHA-384 digest length in bytes.
pub const DIGEST_LEN: usize = 48;

/// Length of a base64-encoded digest.
pub const ENCODED_DIGEST_LEN: usize = 64;

/// Random bytes drawn for every new session.
pub const SESSION_ENTROPY_BYTES: usize = 1024;

/// Hashes a plaintext password into its stored form.
#[must_use]
pub fn hash_password(password: &str) -> String {
    STANDARD.encode(Sha384::digest(password.as_bytes()))
}

/// Draws a fresh session value from the operating system's CSPRNG.
#[must_use]
pub fn generate_session() -> String {
    let mut entropy = vec![0_u8; SESSION_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut entropy);
    STANDARD.encode(Sha384::digest(&entropy))
}

/// Binds a session to a password hash.
///
/// Both inputs are base64 digests; their decoded bytes are concatenated and
/// hashed. Text that is not valid base64 contributes its raw bytes instead so
/// that a malformed client value still yields a (wrong) response rather than
/// an error.
#[must_use]
pub fn generate_challenge(session: &str, password_hash: &str) -> String {
    let mut hasher = Sha384::new();
    hasher.update(decode_or_raw(session));
    hasher.update(decode_or_raw(password_hash));
    STANDARD.encode(hasher.finalize())
}

fn decode_or_raw(text: &str) -> Vec<u8> {
    STANDARD
        .decode(text)
        .unwrap_or_else(|_| text.as_bytes().to_vec())
}
