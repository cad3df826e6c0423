use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::metrics::round2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCategory {
    Financial,
    Operational,
    Market,
    Regulatory,
    Litigation,
    Accounting,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 6] = [
        RiskCategory::Financial,
        RiskCategory::Operational,
        RiskCategory::Market,
        RiskCategory::Regulatory,
        RiskCategory::Litigation,
        RiskCategory::Accounting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Financial => "FINANCIAL",
            RiskCategory::Operational => "OPERATIONAL",
            RiskCategory::Market => "MARKET",
            RiskCategory::Regulatory => "REGULATORY",
            RiskCategory::Litigation => "LITIGATION",
            RiskCategory::Accounting => "ACCOUNTING",
        }
    }

    /// Strict parse: anything outside the closed enumeration is `None`.
    /// Model output naming an unknown category must be discarded upstream,
    /// never coerced onto a nearby label.
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "FINANCIAL" => Some(RiskCategory::Financial),
            "OPERATIONAL" => Some(RiskCategory::Operational),
            "MARKET" => Some(RiskCategory::Market),
            "REGULATORY" => Some(RiskCategory::Regulatory),
            "LITIGATION" => Some(RiskCategory::Litigation),
            "ACCOUNTING" => Some(RiskCategory::Accounting),
            _ => None,
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            RiskCategory::Accounting => 1.5,
            RiskCategory::Financial => 1.3,
            RiskCategory::Litigation => 1.2,
            RiskCategory::Regulatory => 1.1,
            RiskCategory::Operational => 1.0,
            RiskCategory::Market => 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn score(&self) -> f64 {
        match self {
            Severity::Low => 25.0,
            Severity::Medium => 50.0,
            Severity::High => 75.0,
            Severity::Critical => 100.0,
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "LOW" => Some(Severity::Low),
            "MEDIUM" => Some(Severity::Medium),
            "HIGH" => Some(Severity::High),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSpan {
    pub chunk_id: String,
    pub quote: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub assessment_id: String,
    pub cik: String,
    pub ticker: String,
    pub period_end: NaiveDate,
    pub category: RiskCategory,
    pub score: f64,
    pub summary: String,
    pub evidence: Vec<EvidenceSpan>,
}

impl RiskAssessment {
    pub fn natural_id(cik: &str, period_end: NaiveDate, category: RiskCategory) -> String {
        format!("{cik}_{period_end}_{}", category.as_str())
    }
}

const RED_FLAG_CONTEXT_CHARS: usize = 100;

static RED_FLAG_PATTERNS: Lazy<Vec<(RiskCategory, Regex)>> = Lazy::new(|| {
    let table: [(RiskCategory, &str); 4] = [
        (
            RiskCategory::Litigation,
            r"(?i)lawsuit|litigation|legal proceedings|plaintiff|defendant|settlement|damages|injunction",
        ),
        (
            RiskCategory::Accounting,
            r"(?i)restatement|material weakness|going concern|auditor change|internal control deficiency|irregularities",
        ),
        (
            RiskCategory::Financial,
            r"(?i)default|covenant violation|liquidity concerns|credit downgrade|impairment|write-off",
        ),
        (
            RiskCategory::Regulatory,
            r"(?i)investigation|subpoena|SEC inquiry|DOJ|enforcement action|consent decree|penalty",
        ),
    ];
    table
        .into_iter()
        .map(|(category, pattern)| (category, Regex::new(pattern).expect("valid regex")))
        .collect()
});

#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub category: RiskCategory,
    pub keyword: String,
    pub context: String,
}

/// Scans for red-flag terms; at most one hit per category, with the
/// surrounding text window kept as evidence.
pub fn detect_keyword_risks(text: &str) -> Vec<KeywordHit> {
    let mut hits = Vec::new();
    for (category, pattern) in RED_FLAG_PATTERNS.iter() {
        if let Some(found) = pattern.find(text) {
            let start = snap_back(text, found.start().saturating_sub(RED_FLAG_CONTEXT_CHARS));
            let end = snap_forward(text, (found.end() + RED_FLAG_CONTEXT_CHARS).min(text.len()));
            hits.push(KeywordHit {
                category: *category,
                keyword: found.as_str().to_string(),
                context: text[start..end].to_string(),
            });
        }
    }
    hits
}

fn snap_back(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn snap_forward(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Category-weighted average of assessment scores.
pub fn overall_risk_score(assessments: &[RiskAssessment]) -> f64 {
    if assessments.is_empty() {
        return 0.0;
    }
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for assessment in assessments {
        let weight = assessment.category.weight();
        weighted_sum += assessment.score * weight;
        total_weight += weight;
    }
    if total_weight == 0.0 {
        return 0.0;
    }
    round2(weighted_sum / total_weight)
}
