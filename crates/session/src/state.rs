//! Anti-forgery state generation
//!
//! The state value ties an authorization callback to the browser that started
//! the flow. It is drawn from the OS-seeded thread RNG.

use rand::RngExt;

/// Length of a generated state value.
pub const STATE_LEN: usize = 48;

const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Largest multiple of the alphabet size that fits in a byte. Bytes at or
/// above it are discarded so every symbol is equally likely.
const ACCEPT_BELOW: u8 = 252;

/// Generate a fresh 48-character state value from `A-Z0-9`.
pub fn generate_state() -> String {
    let mut rng = rand::rng();
    let mut out = String::with_capacity(STATE_LEN);
    let mut buf = [0u8; 64];
    while out.len() < STATE_LEN {
        rng.fill(&mut buf);
        for &byte in buf.iter().filter(|b| **b < ACCEPT_BELOW) {
            if out.len() == STATE_LEN {
                break;
            }
            out.push(ALPHABET[usize::from(byte) % ALPHABET.len()] as char);
        }
    }
    out
}
