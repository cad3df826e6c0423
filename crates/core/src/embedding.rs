use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 64,
            seed: 1337,
        }
    }
}

/// Deterministic bag-of-tokens embedder. Not semantically meaningful, but
/// stable across runs, which is what offline pipelines and tests need.
#[derive(Clone)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions.max(1)
    }

    pub fn model_id(&self) -> String {
        format!("hash-{}", self.dimensions())
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dims = self.dimensions();
        let mut vector = vec![0f32; dims];
        for token in text.split_whitespace() {
            vector[self.bucket_for(token)] += 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }

    fn bucket_for(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(self.config.seed);
        token.to_lowercase().hash(&mut hasher);
        (hasher.finish() as usize) % self.dimensions()
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
