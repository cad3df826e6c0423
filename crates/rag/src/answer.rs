use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use filinglens_core::{count_tokens, FilingError, FilingSection, Result};
use filinglens_llm::LlmResponse;

use crate::embedding::EmbeddingClient;
use crate::retrieval::retrieve_chunks;
use crate::store::{FilingStore, ScoredChunk};

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.15;
const MAX_CONTEXT_CHUNKS: usize = 8;
const MAX_CONTEXT_TOKENS: usize = 6000;
const ANSWER_SYSTEM_PROMPT: &str = "You are a financial analyst assistant. Answer questions about \
companies from their SEC filings, be precise with figures, and say clearly when the filings do \
not support an answer.";

#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub question: String,
    pub company_filter: Option<String>,
    pub top_k: usize,
    pub min_similarity: f32,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            company_filter: None,
            top_k: DEFAULT_TOP_K,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub chunk_id: String,
    pub ticker: String,
    pub section: FilingSection,
    pub period_end: NaiveDate,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub confidence: String,
    pub citations: Vec<Citation>,
    pub caveats: Vec<String>,
}

#[derive(Deserialize)]
struct AnswerContract {
    answer: String,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    caveats: Vec<String>,
}

/// Full query path: retrieve then synthesize.
pub fn answer_question(
    store: &FilingStore,
    embeddings: &EmbeddingClient,
    invoke: &impl Fn(Option<&str>, &str) -> anyhow::Result<LlmResponse>,
    request: &AnswerRequest,
) -> Result<RagAnswer> {
    let hits = retrieve_chunks(
        store,
        embeddings,
        &request.question,
        request.company_filter.as_deref(),
        request.top_k,
    )?;
    synthesize_answer(&request.question, &hits, request.min_similarity, invoke)
}

/// Builds a grounded prompt from the retrieved chunks (bounded in count and
/// tokens), asks the model for the JSON answer contract, and attaches a
/// citation for every chunk placed in context. An empty or uniformly weak
/// retrieval produces an explicit low-confidence answer instead of a
/// fabricated one.
pub fn synthesize_answer(
    question: &str,
    hits: &[ScoredChunk],
    min_similarity: f32,
    invoke: &impl Fn(Option<&str>, &str) -> anyhow::Result<LlmResponse>,
) -> Result<RagAnswer> {
    let usable: Vec<&ScoredChunk> = hits
        .iter()
        .filter(|hit| hit.score >= min_similarity)
        .collect();
    if usable.is_empty() {
        return Ok(RagAnswer {
            answer: "No relevant passages were found in the indexed filings to answer this \
                     question."
                .to_string(),
            confidence: "LOW".to_string(),
            citations: Vec::new(),
            caveats: vec!["no relevant documents found".to_string()],
        });
    }

    let mut context = String::new();
    let mut citations = Vec::new();
    for hit in usable.into_iter().take(MAX_CONTEXT_CHUNKS) {
        let block = format!(
            "[Source: {} - {} period {}]\n{}\n\n",
            hit.chunk.section.as_str(),
            hit.chunk.filing_type.as_str(),
            hit.chunk.period_end,
            hit.chunk.text,
        );
        if !context.is_empty()
            && count_tokens(&context) + count_tokens(&block) > MAX_CONTEXT_TOKENS
        {
            break;
        }
        context.push_str(&block);
        citations.push(Citation {
            chunk_id: hit.chunk.chunk_id.clone(),
            ticker: hit.chunk.ticker.clone(),
            section: hit.chunk.section,
            period_end: hit.chunk.period_end,
            similarity: hit.score,
        });
    }

    let prompt = format!(
        "Based on the following SEC filing excerpts, answer this question: {question}\n\n\
         Context from SEC filings:\n{context}\
         Provide a clear, concise answer grounded only in the context above. If the context \
         does not contain enough information, say so.\n\n\
         Format your response as JSON:\n\
         {{\n  \"answer\": \"...\",\n  \"confidence\": \"HIGH/MEDIUM/LOW\",\n  \"caveats\": [\"...\"]\n}}",
    );
    let response = invoke(Some(ANSWER_SYSTEM_PROMPT), &prompt)
        .map_err(|err| FilingError::GenerationUnavailable(err.to_string()))?;
    Ok(parse_answer(&response.content, citations))
}

fn parse_answer(raw: &str, citations: Vec<Citation>) -> RagAnswer {
    if let Some(body) = extract_json_object(raw) {
        if let Ok(contract) = serde_json::from_str::<AnswerContract>(body) {
            let confidence = contract
                .confidence
                .map(|c| c.trim().to_uppercase())
                .filter(|c| matches!(c.as_str(), "HIGH" | "MEDIUM" | "LOW"))
                .unwrap_or_else(|| "LOW".to_string());
            return RagAnswer {
                answer: contract.answer,
                confidence,
                citations,
                caveats: contract.caveats,
            };
        }
    }
    RagAnswer {
        answer: raw.trim().to_string(),
        confidence: "LOW".to_string(),
        citations,
        caveats: vec!["response parsing failed".to_string()],
    }
}

/// Slice from the first `{` to the last `}`, the envelope models actually
/// wrap JSON answers in when they add prose around the contract.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use filinglens_core::{ChunkRecord, FilingType};
    use serde_json::json;

    fn scored(id: &str, text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: ChunkRecord {
                chunk_id: id.to_string(),
                cik: "0001".to_string(),
                ticker: "TEST".to_string(),
                filing_type: FilingType::TenK,
                accession: "acc-1".to_string(),
                period_end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
                section: FilingSection::RiskFactors,
                text: text.to_string(),
                ordinal: 0,
                token_count: 0,
                meta: json!({}),
            },
            score,
        }
    }

    fn stub(content: &str) -> impl Fn(Option<&str>, &str) -> anyhow::Result<LlmResponse> + '_ {
        move |_, _| {
            Ok(LlmResponse {
                content: content.to_string(),
                prompt_tokens: 10,
                completion_tokens: 5,
            })
        }
    }

    #[test]
    fn empty_retrieval_yields_low_confidence_not_fabrication() {
        let invoke = |_: Option<&str>, _: &str| -> anyhow::Result<LlmResponse> {
            panic!("model must not be called without context");
        };
        let answer = synthesize_answer("what changed?", &[], 0.1, &invoke).unwrap();
        assert_eq!(answer.confidence, "LOW");
        assert!(answer.citations.is_empty());
        assert!(!answer.caveats.is_empty());
    }

    #[test]
    fn weak_scores_are_treated_as_no_evidence() {
        let hits = vec![scored("c1", "irrelevant", 0.01)];
        let invoke = |_: Option<&str>, _: &str| -> anyhow::Result<LlmResponse> {
            panic!("model must not be called for weak retrievals");
        };
        let answer = synthesize_answer("question", &hits, 0.2, &invoke).unwrap();
        assert_eq!(answer.confidence, "LOW");
    }

    #[test]
    fn citations_cover_every_chunk_in_context() {
        let hits = vec![
            scored("c1", "litigation reserves rose", 0.9),
            scored("c2", "new consent decree signed", 0.8),
        ];
        let body = r#"{"answer": "Reserves rose.", "confidence": "HIGH", "caveats": []}"#;
        let answer = synthesize_answer("what happened?", &hits, 0.1, &stub(body)).unwrap();
        assert_eq!(answer.confidence, "HIGH");
        assert_eq!(answer.citations.len(), 2);
        assert_eq!(answer.citations[0].chunk_id, "c1");
    }

    #[test]
    fn unparseable_model_output_degrades_to_low_confidence() {
        let hits = vec![scored("c1", "context text", 0.9)];
        let answer =
            synthesize_answer("question", &hits, 0.1, &stub("plain prose, no json")).unwrap();
        assert_eq!(answer.confidence, "LOW");
        assert_eq!(answer.answer, "plain prose, no json");
        assert!(answer
            .caveats
            .iter()
            .any(|c| c.contains("parsing failed")));
    }

    #[test]
    fn invalid_confidence_label_is_clamped_to_low() {
        let hits = vec![scored("c1", "context", 0.9)];
        let body = r#"{"answer": "ok", "confidence": "VERY_SURE"}"#;
        let answer = synthesize_answer("question", &hits, 0.1, &stub(body)).unwrap();
        assert_eq!(answer.confidence, "LOW");
    }

    #[test]
    fn provider_failure_surfaces_as_generation_unavailable() {
        let hits = vec![scored("c1", "context", 0.9)];
        let invoke = |_: Option<&str>, _: &str| -> anyhow::Result<LlmResponse> {
            Err(anyhow::anyhow!("rate limited"))
        };
        let err = synthesize_answer("question", &hits, 0.1, &invoke).unwrap_err();
        assert!(matches!(err, FilingError::GenerationUnavailable(_)));
    }

    #[test]
    fn json_envelope_extraction_handles_surrounding_prose() {
        assert_eq!(
            extract_json_object("Sure! {\"a\": 1} hope that helps"),
            Some("{\"a\": 1}")
        );
        assert!(extract_json_object("no json here").is_none());
    }
}
