//! Keyword-hashing embedding provider.
//!
//! Not semantically meaningful, but deterministic and dependency-free:
//! words (and word bigrams, at half weight) are hashed into vector
//! dimensions and the result is L2-normalized. Sufficient for similarity
//! on shared keywords, and the default backend for tests and local runs.

use async_trait::async_trait;

use super::{EmbeddingProvider, EMBEDDING_DIM};
use crate::error::Result;

/// Deterministic hashing provider.
#[derive(Default)]
pub struct SimpleProvider;

impl SimpleProvider {
    pub fn new() -> Self {
        Self
    }
}

/// FNV-1a, fixed here so the dimension mapping never shifts under a std
/// hasher change.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl EmbeddingProvider for SimpleProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vec = vec![0.0f32; EMBEDDING_DIM];
        let words = tokenize(text);

        for word in &words {
            let idx = (fnv1a(word.as_bytes()) % EMBEDDING_DIM as u64) as usize;
            vec[idx] += 1.0;
        }

        // Bigrams capture a little word ordering.
        for pair in words.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            let idx = (fnv1a(bigram.as_bytes()) % EMBEDDING_DIM as u64) as usize;
            vec[idx] += 0.5;
        }

        let norm: f64 = vec.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in &mut vec {
                *v = (*v as f64 / norm) as f32;
            }
        }

        Ok(vec)
    }

    fn model(&self) -> &str {
        "simple"
    }
}
