//! Session-hash generation.
//!
//! A session hash is the correlation token a caller embeds in outbound
//! payloads (`session_hash` field) so the server can tie the queue
//! events back to one client session.

use rand::Rng;

/// Number of characters in a generated session hash.
pub const SESSION_HASH_LENGTH: usize = 10;

/// Characters a session hash is drawn from.
const ALPHABET: &[u8] = b"1234567890abcdefghijklmnopqrstuvwxyz";

/// Generate a session hash using the thread-local RNG.
pub fn session_hash() -> String {
    session_hash_with(&mut rand::rng())
}

/// Generate a session hash from the given RNG.
///
/// Every character of the alphabet is reachable, including the final
/// `z`. Pass a seeded RNG for reproducible hashes.
pub fn session_hash_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SESSION_HASH_LENGTH)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect()
}
