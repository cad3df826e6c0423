use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::section::FilingSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilingType {
    #[serde(rename = "10-K")]
    TenK,
    #[serde(rename = "10-Q")]
    TenQ,
    #[serde(rename = "8-K")]
    EightK,
}

impl FilingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilingType::TenK => "10-K",
            FilingType::TenQ => "10-Q",
            FilingType::EightK => "8-K",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().replace('_', "-").as_str() {
            "10-K" | "10K" => Some(FilingType::TenK),
            "10-Q" | "10Q" => Some(FilingType::TenQ),
            "8-K" | "8K" => Some(FilingType::EightK),
            _ => None,
        }
    }
}

/// Identity of a single filing instance as reported by the data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingMeta {
    pub cik: String,
    pub ticker: String,
    pub company_name: String,
    pub filing_type: FilingType,
    pub accession: String,
    pub period_end: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub cik: String,
    pub ticker: String,
    pub filing_type: FilingType,
    pub accession: String,
    pub period_end: NaiveDate,
    pub section: FilingSection,
    pub text: String,
    pub ordinal: usize,
    #[serde(default)]
    pub token_count: usize,
    #[serde(default)]
    pub meta: Value,
}
