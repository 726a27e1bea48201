//! Feature-hashing embedding provider.
//!
//! Each lower-cased alphanumeric token, and each adjacent token pair, is
//! hashed with SHA-256 into one of `dims` buckets with a ±1 sign taken from
//! the digest. The summed vector is L2-normalized. Texts with the same token
//! multiset embed identically; texts sharing vocabulary score higher under
//! cosine similarity.
//!
//! Quality is far below a trained model, but the output is deterministic
//! across platforms and runs, needs no network and no model files.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use script_rag_core::embedding::{normalize, EmbeddingProvider};
use script_rag_core::error::RagResult;

pub const DEFAULT_DIMS: usize = 384;
const DEFAULT_MODEL: &str = "feature-hash";

#[derive(Debug, Clone)]
pub struct HashProvider {
    model: String,
    dims: usize,
}

impl HashProvider {
    pub fn new(model: Option<&str>, dims: usize) -> Result<Self> {
        if dims == 0 {
            bail!("hash provider dims must be > 0");
        }
        Ok(Self {
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            dims,
        })
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        let tokens = tokenize(text);

        for token in &tokens {
            self.accumulate(&mut vector, token.as_bytes());
        }
        for pair in tokens.windows(2) {
            let mut joined = Vec::with_capacity(pair[0].len() + pair[1].len() + 1);
            joined.extend_from_slice(pair[0].as_bytes());
            joined.push(0x1f);
            joined.extend_from_slice(pair[1].as_bytes());
            self.accumulate(&mut vector, &joined);
        }

        normalize(&mut vector);
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8]) {
        let digest = Sha256::digest(feature);
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
