//! In-memory vector index with brute-force cosine similarity search.
//!
//! One index per property document. Indexes are built once at startup and
//! only read afterwards, so no locking is needed.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// A chunk returned from a similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub text: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct IndexedChunk {
    text: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    chunks: Vec<IndexedChunk>,
    fingerprints: HashSet<String>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk; identical chunk text is stored once. Returns whether
    /// the chunk was new.
    pub fn insert(&mut self, text: String, embedding: Vec<f32>) -> bool {
        if !self.fingerprints.insert(fingerprint(&text)) {
            return false;
        }
        self.chunks.push(IndexedChunk { text, embedding });
        true
    }

    /// Top `k` chunks by descending cosine similarity
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .map(|chunk| ScoredChunk {
                text: chunk.text.clone(),
                score: cosine_similarity(query, &chunk.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.trim().as_bytes()))
}

/// Returns 0.0 for mismatched lengths or zero-magnitude vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
