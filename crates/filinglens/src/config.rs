use std::collections::HashMap;
use std::env;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use filinglens_core::{FilingMeta, FilingType};
use filinglens_llm::LlmProvider;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_CHUNK_TOKENS: usize = 400;
pub const DEFAULT_OVERLAP_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub llm_delay_ms: u64,
    pub workers: usize,
    pub max_chunk_tokens: usize,
    pub overlap_chars: usize,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let provider_name =
            env::var("FILINGLENS_PROVIDER").unwrap_or_else(|_| "anthropic".to_string());
        let provider = LlmProvider::from_str(&provider_name)
            .ok_or_else(|| anyhow!(format!("unknown provider {provider_name}")))?;
        let model = env::var("FILINGLENS_MODEL")
            .unwrap_or_else(|_| default_model(provider).to_string());
        let llm_delay_ms = env::var("FILINGLENS_THROTTLE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let workers = env::var("FILINGLENS_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_WORKERS);
        let max_chunk_tokens = env::var("FILINGLENS_MAX_CHUNK_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_CHUNK_TOKENS);
        let overlap_chars = env::var("FILINGLENS_OVERLAP_CHARS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_OVERLAP_CHARS);
        Ok(Self {
            provider,
            model,
            llm_delay_ms,
            workers: workers.max(1),
            max_chunk_tokens,
            overlap_chars,
        })
    }
}

fn default_model(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Anthropic => "claude-sonnet-4-20250514",
        LlmProvider::OpenAi => "gpt-4.1-mini",
        LlmProvider::Local => "local",
    }
}

/// YAML manifest naming the filings a `process` run covers.
#[derive(Debug, Deserialize)]
pub struct RunManifest {
    pub filings: Vec<FilingEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilingEntry {
    pub path: String,
    pub cik: String,
    pub ticker: String,
    #[serde(default)]
    pub company_name: String,
    pub filing_type: String,
    pub accession: String,
    pub period_end: String,
    /// Structured line items straight from the filing data source. When
    /// present they bypass model extraction entirely (exact values, full
    /// confidence).
    #[serde(default)]
    pub line_items: HashMap<String, f64>,
}

impl FilingEntry {
    pub fn to_meta(&self) -> Result<FilingMeta> {
        let filing_type = FilingType::from_str(&self.filing_type)
            .ok_or_else(|| anyhow!(format!("unknown filing type {}", self.filing_type)))?;
        let period_end = NaiveDate::parse_from_str(&self.period_end, "%Y-%m-%d")
            .map_err(|err| anyhow!(format!("bad period_end {}: {err}", self.period_end)))?;
        Ok(FilingMeta {
            cik: self.cik.clone(),
            ticker: self.ticker.clone(),
            company_name: self.company_name.clone(),
            filing_type,
            accession: self.accession.clone(),
            period_end,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct UniverseSeed {
    pub companies: Vec<CompanySeed>,
}

#[derive(Debug, Deserialize)]
pub struct CompanySeed {
    pub cik: String,
    pub ticker: String,
    pub name: String,
    #[serde(default)]
    pub sic_code: Option<u32>,
}
