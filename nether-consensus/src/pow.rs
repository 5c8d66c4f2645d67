//! Proof-of-work nonce search.
//!
//! A proof for `message` at difficulty `z` is a nonce string such that
//! `SHA256(message ∥ nonce)` starts with at least `z` zero bits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nether_common::crypto::hash::sha256_concat;
use nether_common::Hash;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Digits used to render nonce counters, lowest value first.
pub const NONCE_ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Consecutive counters scanned by one worker before jumping to its next block.
pub const BLOCK_SPAN: u64 = 100_000;

pub const MAX_DIFFICULTY: u32 = 256;

/// Renders `n` in base 62, most significant digit first.
pub fn render_nonce(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::with_capacity(11);
    while n > 0 {
        digits.push(NONCE_ALPHABET[(n % 62) as usize]);
        n /= 62;
    }
    digits.reverse();
    // The alphabet is ASCII.
    digits.into_iter().map(char::from).collect()
}

/// Zero bits before the first set bit, counting from the MSB of byte 0.
pub fn leading_zero_bits(digest: &Hash) -> u32 {
    let mut bits = 0;
    for byte in digest {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

pub fn proof_digest(message: &str, nonce: &str) -> Hash {
    sha256_concat(&[message.as_bytes(), nonce.as_bytes()])
}

pub fn validate_proof(message: &str, nonce: &str, difficulty: u32) -> bool {
    difficulty <= MAX_DIFFICULTY && leading_zero_bits(&proof_digest(message, nonce)) >= difficulty
}

/// Parallel nonce search over interleaved counter blocks.
#[derive(Debug, Clone)]
pub struct ProofOfWorkEngine {
    workers: usize,
}

impl ProofOfWorkEngine {
    /// `workers == 0` uses the available parallelism.
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            workers
        };
        Self { workers }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Searches for a nonce until one is found or `cancel` fires.
    ///
    /// Dropping the returned future stops the workers as well.
    pub async fn mine(&self, message: &str, difficulty: u32, cancel: &CancellationToken) -> Option<String> {
        if difficulty > MAX_DIFFICULTY {
            debug!("difficulty {} is unsatisfiable", difficulty);
            return None;
        }

        let round = cancel.child_token();
        let _stop_on_drop = round.clone().drop_guard();
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::channel::<String>(1);
        let offset: u64 = rand::random();

        for worker in 0..self.workers {
            let search = Search {
                message: message.to_owned(),
                difficulty,
                first_block: offset.wrapping_add(worker as u64 * BLOCK_SPAN),
                stride: self.workers as u64 * BLOCK_SPAN,
                stop: stop.clone(),
            };
            let tx = tx.clone();
            tokio::task::spawn_blocking(move || search.run(&tx));
        }
        drop(tx);

        let watcher = {
            let stop = stop.clone();
            let round = round.clone();
            tokio::spawn(async move {
                round.cancelled().await;
                stop.store(true, Ordering::Relaxed);
            })
        };

        let found = tokio::select! {
            found = rx.recv() => found,
            _ = round.cancelled() => None,
        };

        round.cancel();
        stop.store(true, Ordering::Relaxed);
        watcher.abort();
        found
    }
}

struct Search {
    message: String,
    difficulty: u32,
    first_block: u64,
    stride: u64,
    stop: Arc<AtomicBool>,
}

impl Search {
    fn run(&self, tx: &mpsc::Sender<String>) {
        let mut block = self.first_block;
        loop {
            for i in 0..BLOCK_SPAN {
                if self.stop.load(Ordering::Relaxed) {
                    return;
                }
                let nonce = render_nonce(block.wrapping_add(i));
                if validate_proof(&self.message, &nonce, self.difficulty) {
                    self.stop.store(true, Ordering::Relaxed);
                    let _ = tx.try_send(nonce);
                    return;
                }
            }
            block = block.wrapping_add(self.stride);
        }
    }
}
