/// Test data generators

use rand::Rng;

/// Generate random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

/// Generate a random 32-byte message payload
pub fn random_message() -> Vec<u8> {
    random_bytes(32)
}

/// Generate a random 20-byte address
pub fn random_address_bytes() -> [u8; 20] {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill(&mut bytes);
    bytes
}

/// Generate a random voting power in a realistic band
pub fn random_voting_power() -> u128 {
    rand::thread_rng().gen_range(1..1_000_000)
}
