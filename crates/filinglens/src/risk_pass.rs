use std::collections::HashSet;

use serde_json::Value;

use filinglens_core::{
    detect_keyword_risks, ChunkRecord, EvidenceSpan, FilingError, FilingMeta, FilingSection,
    Result, RiskAssessment, RiskCategory, Severity,
};
use filinglens_llm::LlmResponse;
use filinglens_rag::extract_json_object;

use crate::logging;
use crate::model::PassCounters;

const RISK_SYSTEM_PROMPT: &str = "You are a financial analyst specializing in SEC filing \
analysis. Analyze the provided text, identify key risks and red flags, and return structured \
JSON.";
const RISK_CONTEXT_CHARS: usize = 8_000;

pub struct RiskOutcome {
    pub assessments: Vec<RiskAssessment>,
    pub counters: PassCounters,
}

/// Model-led risk classification with a keyword red-flag backstop. Model
/// output is validated before anything is kept: the category must parse
/// into the closed enumeration, the score must land in 0-100, and the
/// evidence quote must appear verbatim in one of the input chunks.
/// Anything else is discarded and counted, never coerced. At most one
/// assessment per category survives; the model wins over the keyword scan.
pub fn assess_filing_risks(
    filing: &FilingMeta,
    chunks: &[ChunkRecord],
    invoke: &impl Fn(Option<&str>, &str) -> anyhow::Result<LlmResponse>,
) -> Result<RiskOutcome> {
    let mut counters = PassCounters::default();
    let source = risk_chunks(chunks);
    if source.is_empty() {
        counters.skipped += 1;
        return Ok(RiskOutcome {
            assessments: Vec::new(),
            counters,
        });
    }

    let context = risk_context(&source);
    let prompt = build_risk_prompt(&filing.company_name, &context);
    let response = invoke(Some(RISK_SYSTEM_PROMPT), &prompt)
        .map_err(|err| FilingError::ScoringUnavailable(err.to_string()))?;

    let mut assessments: Vec<RiskAssessment> = Vec::new();
    let mut seen: HashSet<RiskCategory> = HashSet::new();
    for finding in parse_findings(&response.content, &mut counters) {
        match validate_finding(&finding, filing, &source) {
            Ok(assessment) => {
                if seen.insert(assessment.category) {
                    assessments.push(assessment);
                }
            }
            Err(reason) => {
                logging::verbose(format!("discarding risk finding: {reason}"));
                counters.validation_failures += 1;
            }
        }
    }

    // red-flag keywords backstop categories the model did not cover
    for chunk in &source {
        for hit in detect_keyword_risks(&chunk.text) {
            if seen.insert(hit.category) {
                assessments.push(RiskAssessment {
                    assessment_id: RiskAssessment::natural_id(
                        &filing.cik,
                        filing.period_end,
                        hit.category,
                    ),
                    cik: filing.cik.clone(),
                    ticker: filing.ticker.clone(),
                    period_end: filing.period_end,
                    category: hit.category,
                    score: Severity::Medium.score(),
                    summary: format!("Mention of '{}' detected", hit.keyword),
                    evidence: vec![EvidenceSpan {
                        chunk_id: chunk.chunk_id.clone(),
                        quote: hit.context,
                    }],
                });
            }
        }
    }

    counters.processed = assessments.len();
    Ok(RiskOutcome {
        assessments,
        counters,
    })
}

fn risk_chunks(chunks: &[ChunkRecord]) -> Vec<&ChunkRecord> {
    let preferred: Vec<&ChunkRecord> = chunks
        .iter()
        .filter(|c| {
            matches!(
                c.section,
                FilingSection::RiskFactors
                    | FilingSection::LegalProceedings
                    | FilingSection::Controls
            )
        })
        .collect();
    if preferred.is_empty() {
        chunks.iter().collect()
    } else {
        preferred
    }
}

fn risk_context(source: &[&ChunkRecord]) -> String {
    let mut context = String::new();
    for chunk in source {
        if context.len() + chunk.text.len() > RISK_CONTEXT_CHARS && !context.is_empty() {
            break;
        }
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(&chunk.text);
    }
    context
}

fn build_risk_prompt(company_name: &str, context: &str) -> String {
    format!(
        "Analyze the following SEC filing excerpt for {company_name}.\n\
         Identify and categorize risks into these categories:\n\
         - REGULATORY: regulatory and compliance risks\n\
         - LITIGATION: legal proceedings and litigation risks\n\
         - FINANCIAL: financial and credit risks\n\
         - OPERATIONAL: operational and business risks\n\
         - MARKET: market and competitive risks\n\
         - ACCOUNTING: accounting and reporting concerns\n\n\
         For each risk found, provide:\n\
         - category: one of the categories above\n\
         - severity: LOW, MEDIUM, HIGH, or CRITICAL\n\
         - description: brief description of the risk\n\
         - evidence: an exact quote from the text supporting this finding\n\n\
         Return as JSON with format: {{\"risks\": [...]}}\n\n\
         Filing text:\n{context}",
    )
}

fn parse_findings(raw: &str, counters: &mut PassCounters) -> Vec<Value> {
    let Some(body) = extract_json_object(raw) else {
        counters.validation_failures += 1;
        return Vec::new();
    };
    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        counters.validation_failures += 1;
        return Vec::new();
    };
    match parsed.get("risks").and_then(|r| r.as_array()) {
        Some(findings) => findings.clone(),
        None => {
            counters.validation_failures += 1;
            Vec::new()
        }
    }
}

fn validate_finding(
    finding: &Value,
    filing: &FilingMeta,
    source: &[&ChunkRecord],
) -> std::result::Result<RiskAssessment, String> {
    let fields = finding.as_object().ok_or("finding is not an object")?;
    let category_raw = fields
        .get("category")
        .and_then(|c| c.as_str())
        .ok_or("missing category")?;
    let category = RiskCategory::from_str(category_raw)
        .ok_or_else(|| format!("category '{category_raw}' is outside the enumeration"))?;

    let score = match (fields.get("severity"), fields.get("score")) {
        (Some(severity), _) if severity.is_string() => Severity::from_str(
            severity.as_str().unwrap_or_default(),
        )
        .map(|s| s.score())
        .ok_or_else(|| format!("unknown severity '{severity}'"))?,
        (_, Some(score)) if score.is_number() => {
            let value = score.as_f64().unwrap_or(f64::NAN);
            if !(0.0..=100.0).contains(&value) {
                return Err(format!("score {value} outside 0-100"));
            }
            value
        }
        _ => return Err("missing severity and score".to_string()),
    };

    let quote = fields
        .get("evidence")
        .and_then(|e| e.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or("missing evidence quote")?;
    let backing = source
        .iter()
        .find(|chunk| chunk.text.contains(quote))
        .ok_or("evidence quote not found in any input chunk")?;

    let summary = fields
        .get("description")
        .and_then(|d| d.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(RiskAssessment {
        assessment_id: RiskAssessment::natural_id(&filing.cik, filing.period_end, category),
        cik: filing.cik.clone(),
        ticker: filing.ticker.clone(),
        period_end: filing.period_end,
        category,
        score,
        summary,
        evidence: vec![EvidenceSpan {
            chunk_id: backing.chunk_id.clone(),
            quote: quote.to_string(),
        }],
    })
}
