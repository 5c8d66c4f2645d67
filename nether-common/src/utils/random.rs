use rand::{rngs::OsRng, Rng, RngCore};

const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random alphanumeric string with a length in `[min_len, max_len]`.
pub fn random_string(min_len: usize, max_len: usize) -> String {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(min_len..=max_len.max(min_len));
    (0..len)
        .map(|_| ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())] as char)
        .collect()
}

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}
