//! Coach invite codes: short, human-shareable, case-insensitive.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

pub const INVITE_CODE_LENGTH: usize = 6;

/// Uppercase letters and digits without the look-alikes 0, O, I and 1.
pub const INVITE_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

static INVITE_CODE_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-HJ-NP-Z2-9]{6}$").expect("invite code pattern is valid")
});

/// Trims surrounding whitespace and uppercases, the form codes are stored in.
pub fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Whether `code` can possibly be a code this service handed out.
pub fn is_well_formed(code: &str) -> bool {
    INVITE_CODE_FORMAT.is_match(&normalize(code))
}

pub fn generate() -> String {
    generate_with(&mut rand::rng())
}

pub fn generate_with<R: Rng>(rng: &mut R) -> String {
    (0..INVITE_CODE_LENGTH)
        .map(|_| {
            let idx = rng.random_range(0..INVITE_CODE_ALPHABET.len());
            INVITE_CODE_ALPHABET[idx] as char
        })
        .collect()
}
