//! Temporary credential generation.
//!
//! Credentials come from the OS entropy source, never a seeded PRNG.
//! Every credential carries all four character classes so it clears the
//! directory service's complexity policy on the first try.

use rand::Rng;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use secrecy::SecretString;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*";

/// Generated credential length. The directory policy floor is 16.
pub const CREDENTIAL_LENGTH: usize = 20;

/// Generate a temporary credential for a new account.
///
/// The holder is forced to change it at first login, so it only has to
/// survive one delivery — but it still never appears in logs or the
/// ledger, which is why it is wrapped in [`SecretString`] immediately.
pub fn generate() -> SecretString {
    let mut rng = OsRng;

    let mut chars: Vec<u8> = Vec::with_capacity(CREDENTIAL_LENGTH);
    // One from each class keeps the mixed-classes guarantee unconditional.
    for class in [LOWER, UPPER, DIGITS, SYMBOLS] {
        chars.push(class[rng.gen_range(0..class.len())]);
    }

    let alphabet: Vec<u8> = [LOWER, UPPER, DIGITS, SYMBOLS].concat();
    while chars.len() < CREDENTIAL_LENGTH {
        chars.push(alphabet[rng.gen_range(0..alphabet.len())]);
    }
    chars.shuffle(&mut rng);

    SecretString::from(String::from_utf8_lossy(&chars).into_owned())
}
