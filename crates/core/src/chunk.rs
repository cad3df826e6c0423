use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tiktoken_rs::CoreBPE;

use crate::error::Result;
use crate::filing::{ChunkRecord, FilingMeta};
use crate::section::{extract_sections, normalize_text, FilingSection, SectionSpan};

static TOKENIZER: Lazy<CoreBPE> = Lazy::new(|| tiktoken_rs::cl100k_base().expect("tokenizer"));
static SENTENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+").expect("valid regex"));
const CHUNK_VERSION: u32 = 1;

pub fn count_tokens(text: &str) -> usize {
    TOKENIZER.encode_with_special_tokens(text).len()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub max_chunk_tokens: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 400,
            overlap_chars: 200,
        }
    }
}

pub struct SectionChunker {
    config: ChunkConfig,
}

impl SectionChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Splits a filing into section-aligned chunks. Ordinals restart at zero
    /// for every section. Errors with `MalformedDocument` when the filing is
    /// nonempty but carries no recognizable section markers.
    pub fn chunk_filing(&self, filing: &FilingMeta, filing_text: &str) -> Result<Vec<ChunkRecord>> {
        let spans = extract_sections(filing_text)?;
        let mut records = Vec::new();
        for span in spans {
            self.chunk_span(filing, &span, &mut records);
        }
        Ok(records)
    }

    /// Fallback for filings without structure markers: the whole document
    /// becomes a single FULL_TEXT pseudo-section.
    pub fn chunk_whole_document(&self, filing: &FilingMeta, filing_text: &str) -> Vec<ChunkRecord> {
        let text = normalize_text(filing_text);
        if text.is_empty() {
            return Vec::new();
        }
        let span = SectionSpan {
            section: FilingSection::FullText,
            text,
        };
        let mut records = Vec::new();
        self.chunk_span(filing, &span, &mut records);
        records
    }

    fn chunk_span(&self, filing: &FilingMeta, span: &SectionSpan, out: &mut Vec<ChunkRecord>) {
        for (ordinal, text) in self.split_section(&span.text).into_iter().enumerate() {
            let token_count = count_tokens(&text);
            let chunk_id = stable_chunk_id(
                &filing.accession,
                span.section.as_str(),
                ordinal,
                &text,
                CHUNK_VERSION,
            );
            out.push(ChunkRecord {
                chunk_id,
                cik: filing.cik.clone(),
                ticker: filing.ticker.clone(),
                filing_type: filing.filing_type,
                accession: filing.accession.clone(),
                period_end: filing.period_end,
                section: span.section,
                meta: json!({ "char_count": text.len() }),
                text,
                ordinal,
                token_count,
            });
        }
    }

    /// Greedy paragraph packing under the token budget. Oversized paragraphs
    /// fall back to sentence pieces (word-wrapped if a single sentence still
    /// blows the budget), so every produced chunk fits `max_chunk_tokens`.
    fn split_section(&self, text: &str) -> Vec<String> {
        let max = self.config.max_chunk_tokens.max(1);
        let mut units: Vec<String> = Vec::new();
        for para in text.split("\n\n") {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }
            if count_tokens(para) > max {
                units.extend(self.split_oversized(para, max));
            } else {
                units.push(para.to_string());
            }
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut i = 0usize;
        while i < units.len() {
            let mut current = match chunks.last() {
                Some(prev) => self.overlap_tail(prev),
                None => String::new(),
            };
            let mut added = 0usize;
            while i < units.len() {
                let candidate = if current.is_empty() {
                    units[i].clone()
                } else {
                    format!("{current}\n\n{}", units[i])
                };
                if count_tokens(&candidate) > max {
                    if added == 0 && !current.is_empty() {
                        // overlap seed left no room for even one unit
                        current.clear();
                        continue;
                    }
                    break;
                }
                current = candidate;
                added += 1;
                i += 1;
            }
            if added == 0 {
                // single unit over budget even alone; emit as-is rather than loop
                current = units[i].clone();
                i += 1;
            }
            chunks.push(current.trim().to_string());
        }
        chunks
    }

    fn split_oversized(&self, para: &str, max: usize) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current = String::new();
        for sentence in split_sentences(para) {
            if count_tokens(sentence) > max {
                if !current.is_empty() {
                    pieces.push(std::mem::take(&mut current));
                }
                pieces.extend(word_wrap(sentence, max));
                continue;
            }
            let candidate = if current.is_empty() {
                sentence.to_string()
            } else {
                format!("{current} {sentence}")
            };
            if count_tokens(&candidate) > max && !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current = sentence.to_string();
            } else {
                current = candidate;
            }
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }

    fn overlap_tail(&self, prev: &str) -> String {
        if self.config.overlap_chars == 0 {
            return String::new();
        }
        let start = prev
            .char_indices()
            .rev()
            .map(|(idx, _)| idx)
            .nth(self.config.overlap_chars.saturating_sub(1))
            .unwrap_or(0);
        format!("{} ", &prev[start..])
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for found in SENTENCE_RE.find_iter(text) {
        let end = found.start() + 1;
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            out.push(sentence);
        }
        start = found.end();
    }
    if start < text.len() {
        let tail = text[start..].trim();
        if !tail.is_empty() {
            out.push(tail);
        }
    }
    out
}

fn word_wrap(text: &str, max: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if count_tokens(&candidate) > max && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
            current = word.to_string();
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn stable_chunk_id(
    accession: &str,
    section: &str,
    ordinal: usize,
    text: &str,
    version: u32,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(accession.as_bytes());
    hasher.update(version.to_be_bytes());
    hasher.update(section.as_bytes());
    hasher.update(ordinal.to_be_bytes());
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filing::FilingType;
    use chrono::NaiveDate;

    fn sample_filing() -> FilingMeta {
        FilingMeta {
            cik: "0000320193".to_string(),
            ticker: "AAPL".to_string(),
            company_name: "Apple Inc.".to_string(),
            filing_type: FilingType::TenK,
            accession: "0000320193-24-000123".to_string(),
            period_end: NaiveDate::from_ymd_opt(2024, 9, 28).unwrap(),
        }
    }

    fn section_text(label: &str, paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| format!("{label} paragraph {i} with a little narrative body to chunk over."))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn ordinals_restart_per_section_and_respect_budget() {
        let chunker = SectionChunker::new(ChunkConfig {
            max_chunk_tokens: 60,
            overlap_chars: 40,
        });
        let text = format!(
            "Item 1A. Risk Factors\n\n{}\n\nItem 7. Management's Discussion\n\n{}",
            section_text("risk", 10),
            section_text("mdna", 10),
        );
        let chunks = chunker.chunk_filing(&sample_filing(), &text).unwrap();
        assert!(chunks.len() > 2);
        for chunk in &chunks {
            assert!(chunk.token_count <= 60, "chunk over budget: {}", chunk.token_count);
        }
        for section in [FilingSection::RiskFactors, FilingSection::MdAndA] {
            let ordinals: Vec<_> = chunks
                .iter()
                .filter(|c| c.section == section)
                .map(|c| c.ordinal)
                .collect();
            assert_eq!(ordinals, (0..ordinals.len()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn consecutive_chunks_share_an_overlap_window() {
        let chunker = SectionChunker::new(ChunkConfig {
            max_chunk_tokens: 50,
            overlap_chars: 30,
        });
        let text = format!(
            "Item 1A. Risk Factors\n\n{}",
            section_text("overlapping", 12)
        );
        let chunks = chunker.chunk_filing(&sample_filing(), &text).unwrap();
        assert!(chunks.len() >= 2);
        let prev = &chunks[0].text;
        let start = prev
            .char_indices()
            .rev()
            .map(|(idx, _)| idx)
            .nth(29)
            .unwrap_or(0);
        let tail = prev[start..].trim();
        assert!(chunks[1].text.starts_with(tail));
    }

    #[test]
    fn chunk_ids_are_stable_and_content_sensitive() {
        let chunker = SectionChunker::new(ChunkConfig::default());
        let filing = sample_filing();
        let text = format!("Item 1A. Risk Factors\n\n{}", section_text("stable", 4));
        let first = chunker.chunk_filing(&filing, &text).unwrap();
        let second = chunker.chunk_filing(&filing, &text).unwrap();
        assert_eq!(first[0].chunk_id, second[0].chunk_id);

        let altered = format!("Item 1A. Risk Factors\n\n{}", section_text("changed", 4));
        let third = chunker.chunk_filing(&filing, &altered).unwrap();
        assert_ne!(first[0].chunk_id, third[0].chunk_id);
    }

    #[test]
    fn whole_document_fallback_uses_full_text_section() {
        let chunker = SectionChunker::new(ChunkConfig {
            max_chunk_tokens: 80,
            overlap_chars: 0,
        });
        let chunks =
            chunker.chunk_whole_document(&sample_filing(), &section_text("unstructured", 6));
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.section == FilingSection::FullText));
        assert_eq!(chunks[0].ordinal, 0);
    }

    #[test]
    fn oversized_paragraph_falls_back_to_sentences() {
        let chunker = SectionChunker::new(ChunkConfig {
            max_chunk_tokens: 30,
            overlap_chars: 0,
        });
        let monster = "One clause after another keeps this sentence going. "
            .repeat(10)
            .trim()
            .to_string();
        let text = format!("Item 1A. Risk Factors\n\n{monster}\n\n{}", "tail paragraph with enough characters to survive the section length floor in extraction.");
        let chunks = chunker.chunk_filing(&sample_filing(), &text).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 30);
        }
    }
}
