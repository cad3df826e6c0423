use std::env;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::blocking::Client;
use serde::Deserialize;

use filinglens_core::{HashEmbedder, HashEmbedderConfig};

const MAX_EMBED_ATTEMPTS: usize = 4;

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    Remote(RemoteEmbeddingClient),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    pub fn from_env() -> Result<Self> {
        match env::var("EMBEDDING_PROVIDER")
            .unwrap_or_else(|_| "hash".to_string())
            .to_lowercase()
            .as_str()
        {
            "openai" => {
                let model = env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "text-embedding-3-small".to_string());
                Ok(Self {
                    backend: EmbeddingBackend::Remote(RemoteEmbeddingClient::new(&model)?),
                })
            }
            _ => {
                let dims = env::var("HASH_EMBED_DIMENSIONS")
                    .ok()
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(64);
                Ok(Self {
                    backend: EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig {
                        dimensions: dims,
                        seed: 1337,
                    })),
                })
            }
        }
    }

    pub fn hash() -> Self {
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig::default())),
        }
    }

    /// Identifier persisted with every embedding row; a mismatch against
    /// the index marks an incompatible embedding space.
    pub fn model_id(&self) -> String {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => embedder.model_id(),
            EmbeddingBackend::Remote(client) => client.model.clone(),
        }
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Ok(inputs
                .iter()
                .map(|text| embedder.embed_text(text))
                .collect()),
            EmbeddingBackend::Remote(client) => client.embed_batch(inputs),
        }
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let inputs = vec![text.to_string()];
        let mut output = self.embed_batch(&inputs)?;
        output.pop().ok_or_else(|| anyhow!("empty embedding batch"))
    }
}

#[derive(Clone)]
pub struct RemoteEmbeddingClient {
    http: Client,
    model: String,
    api_key: String,
}

impl RemoteEmbeddingClient {
    pub fn new(model: &str) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY is required for remote embeddings"))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            model: model.to_string(),
            api_key,
        })
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let result = self
                .http
                .post("https://api.openai.com/v1/embeddings")
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send();
            let retryable_err = match result {
                Ok(response) if response.status().is_success() => {
                    let parsed: EmbeddingResponse = response.json()?;
                    return Ok(parsed.data.into_iter().map(|d| d.embedding).collect());
                }
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 || status.is_server_error() {
                        anyhow!("embedding request returned status {status}")
                    } else {
                        return Err(anyhow!("embedding request failed: {status}"));
                    }
                }
                Err(err) => anyhow!(err),
            };
            if attempt >= MAX_EMBED_ATTEMPTS {
                return Err(retryable_err
                    .context(format!("embedding provider failed after {MAX_EMBED_ATTEMPTS} attempts")));
            }
            thread::sleep(Duration::from_millis(500 * (1 << attempt.min(4)) as u64));
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_backend_reports_model_and_embeds() {
        let client = EmbeddingClient::hash();
        assert_eq!(client.model_id(), "hash-64");
        let vectors = client
            .embed_batch(&["one text".to_string(), "another text".to_string()])
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 64);
    }
}
