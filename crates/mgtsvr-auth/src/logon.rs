//! Deterministic logon password derivation.
//!
//! A passphrase and a four digit PIN always produce the same 16 character
//! password, so an operator can recreate an account password without ever
//! writing it down.

use std::ops::RangeInclusive;

use sha2::{Digest, Sha512};
use thiserror::Error;

/// Characters a derived password may contain.
pub const LOGON_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";

/// Accepted PIN values.
pub const PIN_RANGE: RangeInclusive<u16> = 1000..=9999;

/// Length of every derived password.
pub const LOGON_PASSWORD_LEN: usize = 16;

const UPPER: (usize, usize) = (0, 26);
const LOWER: (usize, usize) = (26, 26);
const DIGIT: (usize, usize) = (52, 10);
const SYMBOL: (usize, usize) = (62, 8);

/// Rejected PIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("PIN must be a 4 digit number, got {pin}")]
pub struct LogonError {
    /// The value supplied.
    pub pin: u32,
}

/// Derives the logon password for `passphrase` and `pin`.
///
/// The passphrase is hashed with SHA-512 and the digest is re-hashed `pin`
/// more times. Successive big-endian 32-bit words of the final digest pick
/// one upper-case letter, one digit, one lower-case letter and one symbol,
/// then twelve characters from the whole alphabet.
pub fn derive_logon_password(passphrase: &str, pin: u32) -> Result<String, LogonError> {
    let rounds = u16::try_from(pin)
        .ok()
        .filter(|value| PIN_RANGE.contains(value))
        .ok_or(LogonError { pin })?;

    let mut digest = Sha512::digest(passphrase.as_bytes());
    for _ in 0..rounds {
        digest = Sha512::digest(digest);
    }

    let alphabet = LOGON_ALPHABET.as_bytes();
    let mut words = digest
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .cycle();
    let mut pick = |(offset, span): (usize, usize)| {
        let word = words.next().unwrap_or_default();
        let index = offset + usize::try_from(word).unwrap_or_default() % span;
        char::from(alphabet[index])
    };

    let mut password = String::with_capacity(LOGON_PASSWORD_LEN);
    for class in [UPPER, DIGIT, LOWER, SYMBOL] {
        password.push(pick(class));
    }
    while password.len() < LOGON_PASSWORD_LEN {
        password.push(pick((0, alphabet.len())));
    }
    Ok(password)
}
