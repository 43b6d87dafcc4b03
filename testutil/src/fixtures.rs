/// Deterministic byte fixtures
///
/// Seeded data for tests that need the same bytes on every node and every
/// run (cross-node convergence tests, golden encodings).

/// Deterministic pseudo-random bytes from a seed (xorshift, not crypto)
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state & 0xff) as u8
        })
        .collect()
}

/// Deterministic 20-byte address for validator `i`
pub fn fixture_address(i: usize) -> [u8; 20] {
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&seeded_bytes(i as u64 + 1, 20));
    bytes
}

/// Standard voting-power ladder used across quorum tests
pub fn fixture_powers(count: usize) -> Vec<u128> {
    (0..count).map(|i| 100 + (i as u128) * 50).collect()
}
