use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FilingError, Result};

/// Sections go below this length when a marker matched boilerplate such as a
/// table-of-contents line; they carry no retrievable content and are dropped.
const MIN_SECTION_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilingSection {
    #[serde(rename = "BUSINESS")]
    Business,
    #[serde(rename = "RISK_FACTORS")]
    RiskFactors,
    #[serde(rename = "LEGAL_PROCEEDINGS")]
    LegalProceedings,
    #[serde(rename = "MD&A")]
    MdAndA,
    #[serde(rename = "FINANCIAL_STATEMENTS")]
    FinancialStatements,
    #[serde(rename = "CONTROLS")]
    Controls,
    #[serde(rename = "FULL_TEXT")]
    FullText,
}

impl FilingSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilingSection::Business => "BUSINESS",
            FilingSection::RiskFactors => "RISK_FACTORS",
            FilingSection::LegalProceedings => "LEGAL_PROCEEDINGS",
            FilingSection::MdAndA => "MD&A",
            FilingSection::FinancialStatements => "FINANCIAL_STATEMENTS",
            FilingSection::Controls => "CONTROLS",
            FilingSection::FullText => "FULL_TEXT",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "BUSINESS" => Some(FilingSection::Business),
            "RISK_FACTORS" => Some(FilingSection::RiskFactors),
            "LEGAL_PROCEEDINGS" => Some(FilingSection::LegalProceedings),
            "MD&A" | "MDA" | "MD_AND_A" => Some(FilingSection::MdAndA),
            "FINANCIAL_STATEMENTS" => Some(FilingSection::FinancialStatements),
            "CONTROLS" => Some(FilingSection::Controls),
            "FULL_TEXT" => Some(FilingSection::FullText),
            _ => None,
        }
    }
}

static SECTION_PATTERNS: Lazy<Vec<(FilingSection, Regex)>> = Lazy::new(|| {
    vec![
        (
            FilingSection::Business,
            Regex::new(r"(?i)item\s*1\.?\s*business").expect("valid regex"),
        ),
        (
            FilingSection::RiskFactors,
            Regex::new(r"(?i)item\s*1a\.?\s*risk\s*factors").expect("valid regex"),
        ),
        (
            FilingSection::LegalProceedings,
            Regex::new(r"(?i)item\s*3\.?\s*legal\s*proceedings").expect("valid regex"),
        ),
        (
            FilingSection::MdAndA,
            Regex::new(r"(?i)item\s*7\.?\s*management['’]?s?\s*discussion").expect("valid regex"),
        ),
        (
            FilingSection::FinancialStatements,
            Regex::new(r"(?i)item\s*8\.?\s*financial\s*statements").expect("valid regex"),
        ),
        (
            FilingSection::Controls,
            Regex::new(r"(?i)item\s*9a\.?\s*controls").expect("valid regex"),
        ),
    ]
});

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static HSPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r]+").expect("valid regex"));
static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n[\s\n]*").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct SectionSpan {
    pub section: FilingSection,
    pub text: String,
}

/// Strips residual markup and collapses whitespace while keeping paragraph
/// breaks intact; the chunker relies on the `\n\n` boundaries downstream.
pub fn normalize_text(text: &str) -> String {
    let stripped = TAG_RE.replace_all(text, " ");
    let collapsed = HSPACE_RE.replace_all(&stripped, " ");
    let paragraphs = BLANK_RUN_RE.replace_all(&collapsed, "\n\n");
    paragraphs.trim().to_string()
}

/// Locates the known filing structure markers and slices the text between
/// them. When the same marker matches more than once (table of contents plus
/// body), the later match wins. Nonempty text with no recognizable marker is
/// a `MalformedDocument`; the caller may fall back to whole-document
/// chunking.
pub fn extract_sections(filing_text: &str) -> Result<Vec<SectionSpan>> {
    let text = normalize_text(filing_text);
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let mut positions: Vec<(usize, FilingSection)> = Vec::new();
    for (section, pattern) in SECTION_PATTERNS.iter() {
        for found in pattern.find_iter(&text) {
            positions.push((found.start(), *section));
        }
    }
    if positions.is_empty() {
        return Err(FilingError::MalformedDocument(
            "no recognizable section markers".to_string(),
        ));
    }
    positions.sort_by_key(|(start, _)| *start);

    let mut spans: Vec<SectionSpan> = Vec::new();
    for (idx, (start, section)) in positions.iter().enumerate() {
        let end = positions
            .get(idx + 1)
            .map(|(next, _)| *next)
            .unwrap_or(text.len());
        let body = text[*start..end].trim();
        if body.len() <= MIN_SECTION_CHARS {
            continue;
        }
        // later occurrence supersedes an earlier (usually TOC) match
        spans.retain(|span| span.section != *section);
        spans.push(SectionSpan {
            section: *section,
            text: body.to_string(),
        });
    }
    Ok(spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filler(label: &str) -> String {
        format!("{label} narrative sentence. ").repeat(12)
    }

    #[test]
    fn extract_sections_orders_by_position() {
        let text = format!(
            "Item 1. Business\n\n{}\n\nItem 1A. Risk Factors\n\n{}\n\nItem 7. Management's Discussion\n\n{}",
            filler("business"),
            filler("risks"),
            filler("mdna"),
        );
        let spans = extract_sections(&text).unwrap();
        let names: Vec<_> = spans.iter().map(|s| s.section).collect();
        assert_eq!(
            names,
            vec![
                FilingSection::Business,
                FilingSection::RiskFactors,
                FilingSection::MdAndA
            ]
        );
        assert!(spans[1].text.contains("risks narrative"));
    }

    #[test]
    fn later_marker_occurrence_supersedes_toc_entry() {
        let text = format!(
            "Item 1A. Risk Factors ......... page 12\n\nsome table of contents padding to clear the length floor, repeated a few times over {}\n\nItem 1A. Risk Factors\n\n{}",
            "x".repeat(80),
            filler("body")
        );
        let spans = extract_sections(&text).unwrap();
        let risk: Vec<_> = spans
            .iter()
            .filter(|s| s.section == FilingSection::RiskFactors)
            .collect();
        assert_eq!(risk.len(), 1);
        assert!(risk[0].text.contains("body narrative"));
    }

    #[test]
    fn short_sections_are_skipped() {
        let text = format!(
            "Item 3. Legal Proceedings\n\nNone.\n\nItem 7. Management's Discussion\n\n{}",
            filler("mdna")
        );
        let spans = extract_sections(&text).unwrap();
        assert!(spans
            .iter()
            .all(|s| s.section != FilingSection::LegalProceedings));
    }

    #[test]
    fn markerless_text_is_malformed() {
        let err = extract_sections("just a plain press release with no items").unwrap_err();
        assert!(matches!(err, FilingError::MalformedDocument(_)));
    }

    #[test]
    fn empty_text_yields_no_sections() {
        assert!(extract_sections("   \n\n  ").unwrap().is_empty());
    }

    #[test]
    fn normalize_strips_tags_and_keeps_paragraphs() {
        let cleaned = normalize_text("<p>first   para</p>\n\n\n\n<b>second</b> para");
        assert_eq!(cleaned, "first para\n\nsecond para");
    }
}
