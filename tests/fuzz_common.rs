//! Shared fuzz harness: per-test deterministic rngs and hostile text
//! aimed at the value-encoding boundary.

use rand::{Rng, SeedableRng, rngs::StdRng};
use sha2::{Digest, Sha256};

/// Characters weighted toward what breaks naive query building: quotes,
/// the multi-value separator, control characters, multi-byte text.
const HOSTILE_PALETTE: &[char] = &[
    'a', 'b', 'z', 'Z', '0', '9', ' ', '\'', '"', '`', ';', ',', '-', '_', '%', '(', ')', '\\',
    '\n', '\r', '\t', '\u{0}', '\u{1f}', '\u{7f}', 'é', '🦀',
];

pub fn fuzz_iterations() -> usize {
    std::env::var("ENTITYGRAPH_FUZZ_ITERS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(128)
}

/// Seeded from the label so a failure replays without a recorded seed.
pub fn labeled_rng(label: &str) -> StdRng {
    let digest = Sha256::digest(label.as_bytes());
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest);
    StdRng::from_seed(seed)
}

pub fn hostile_text(rng: &mut StdRng, max_len: usize) -> String {
    let len = rng.gen_range(0..=max_len);
    (0..len)
        .map(|_| HOSTILE_PALETTE[rng.gen_range(0..HOSTILE_PALETTE.len())])
        .collect()
}
