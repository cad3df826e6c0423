use std::collections::HashMap;

use serde_json::{json, Value};

use filinglens_core::{
    compute_derived, flag_anomalies, is_raw_metric, raw_metric_unit, yoy_change, ChunkRecord,
    FilingError, FilingMeta, FilingSection, MetricRecord, Result, RAW_METRICS,
};
use filinglens_llm::LlmResponse;
use filinglens_rag::{extract_json_object, FilingStore};

use crate::logging;
use crate::model::PassCounters;

const METRICS_SYSTEM_PROMPT: &str = "You are a financial analyst extracting structured financial \
data from SEC filings. Extract precise numerical values and return structured JSON.";
const METRICS_CONTEXT_CHARS: usize = 10_000;
const LLM_EXTRACTION_CONFIDENCE: f64 = 0.6;

#[derive(Debug)]
pub struct MetricsOutcome {
    pub records: Vec<MetricRecord>,
    pub counters: PassCounters,
}

/// Two extraction paths: structured line items from the data source when
/// the manifest carries them (exact, confidence 1.0), otherwise
/// model-assisted parsing of the financial narrative (confidence 0.6,
/// provenance recorded). Either way the derived ratios, YoY changes against
/// the stored prior period, and anomaly flags are computed here.
pub fn extract_filing_metrics(
    store: &FilingStore,
    filing: &FilingMeta,
    chunks: &[ChunkRecord],
    line_items: &HashMap<String, f64>,
    invoke: &impl Fn(Option<&str>, &str) -> anyhow::Result<LlmResponse>,
) -> Result<MetricsOutcome> {
    let mut counters = PassCounters::default();
    let mut raw: HashMap<String, f64> = HashMap::new();
    let mut provenance: HashMap<String, Value> = HashMap::new();

    if !line_items.is_empty() {
        for (name, value) in line_items {
            if !is_raw_metric(name) {
                logging::verbose(format!("discarding unknown line item '{name}'"));
                counters.validation_failures += 1;
                continue;
            }
            raw.insert(name.clone(), *value);
            provenance.insert(
                name.clone(),
                json!({ "source": "structured", "confidence": 1.0 }),
            );
        }
    } else {
        let (context, source_ids) = metrics_context(chunks);
        if context.is_empty() {
            counters.skipped += 1;
            return Ok(MetricsOutcome {
                records: Vec::new(),
                counters,
            });
        }
        let prompt = build_metrics_prompt(&filing.company_name, &context);
        let response = invoke(Some(METRICS_SYSTEM_PROMPT), &prompt)
            .map_err(|err| FilingError::GenerationUnavailable(err.to_string()))?;
        parse_model_metrics(
            &response.content,
            &source_ids,
            &mut raw,
            &mut provenance,
            &mut counters,
        );
    }

    let mut records = Vec::new();
    for (name, value) in &raw {
        records.push(build_record(
            filing,
            name,
            *value,
            raw_metric_unit(name),
            provenance
                .get(name)
                .cloned()
                .unwrap_or_else(|| json!({ "source": "extracted" })),
        ));
    }
    for (name, value, unit) in compute_derived(&raw) {
        records.push(build_record(
            filing,
            name,
            value,
            unit,
            json!({ "source": "derived" }),
        ));
    }

    for record in records.iter_mut() {
        let prior = store.prior_metric_value(&record.cik, &record.name, record.period_end)?;
        record.yoy_change = yoy_change(record.value, prior);
    }
    flag_anomalies(&mut records);
    counters.processed = records.len();
    Ok(MetricsOutcome { records, counters })
}

fn build_record(
    filing: &FilingMeta,
    name: &str,
    value: f64,
    unit: filinglens_core::MetricUnit,
    meta: Value,
) -> MetricRecord {
    MetricRecord {
        metric_id: MetricRecord::natural_id(&filing.cik, filing.period_end, name),
        cik: filing.cik.clone(),
        ticker: filing.ticker.clone(),
        filing_type: filing.filing_type,
        period_end: filing.period_end,
        name: name.to_string(),
        value,
        unit,
        yoy_change: None,
        is_anomaly: false,
        meta,
    }
}

fn metrics_context(chunks: &[ChunkRecord]) -> (String, Vec<String>) {
    let preferred: Vec<&ChunkRecord> = chunks
        .iter()
        .filter(|c| {
            matches!(
                c.section,
                FilingSection::FinancialStatements | FilingSection::MdAndA
            )
        })
        .collect();
    let selected: Vec<&ChunkRecord> = if preferred.is_empty() {
        chunks.iter().collect()
    } else {
        preferred
    };
    let mut context = String::new();
    let mut ids = Vec::new();
    for chunk in selected {
        if context.len() + chunk.text.len() > METRICS_CONTEXT_CHARS && !context.is_empty() {
            break;
        }
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(&chunk.text);
        ids.push(chunk.chunk_id.clone());
    }
    (context, ids)
}

fn build_metrics_prompt(company_name: &str, context: &str) -> String {
    let catalogue = RAW_METRICS.join(", ");
    format!(
        "Extract the following financial metrics from this SEC filing for {company_name}.\n\n\
         Required metrics (extract actual values in millions USD, use null if not found): \
         {catalogue}.\n\n\
         For each metric provide:\n\
         - value: the numerical value\n\
         - source: a brief quote showing where it was found\n\n\
         Return as JSON: {{\"metrics\": {{\"metric_name\": {{\"value\": X, \"source\": \"...\"}}}}}}\n\n\
         Filing text:\n{context}",
    )
}

fn parse_model_metrics(
    raw_response: &str,
    source_ids: &[String],
    raw: &mut HashMap<String, f64>,
    provenance: &mut HashMap<String, Value>,
    counters: &mut PassCounters,
) {
    let Some(body) = extract_json_object(raw_response) else {
        counters.validation_failures += 1;
        return;
    };
    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        counters.validation_failures += 1;
        return;
    };
    let Some(metrics) = parsed.get("metrics").and_then(|m| m.as_object()) else {
        counters.validation_failures += 1;
        return;
    };
    for (name, entry) in metrics {
        if !is_raw_metric(name) {
            logging::verbose(format!("model named unknown metric '{name}', discarding"));
            counters.validation_failures += 1;
            continue;
        }
        match interpret_entry(entry) {
            EntryOutcome::Found { value, source } => {
                raw.insert(name.clone(), value);
                provenance.insert(
                    name.clone(),
                    json!({
                        "source": "llm",
                        "confidence": LLM_EXTRACTION_CONFIDENCE,
                        "source_chunks": source_ids,
                        "quote": source,
                    }),
                );
            }
            EntryOutcome::Missing => {}
            EntryOutcome::Invalid => counters.validation_failures += 1,
        }
    }
}

enum EntryOutcome {
    Found { value: f64, source: Option<String> },
    Missing,
    Invalid,
}

fn interpret_entry(entry: &Value) -> EntryOutcome {
    match entry {
        Value::Null => EntryOutcome::Missing,
        Value::Number(number) => match number.as_f64() {
            Some(value) => EntryOutcome::Found {
                value,
                source: None,
            },
            None => EntryOutcome::Invalid,
        },
        Value::Object(fields) => match fields.get("value") {
            Some(Value::Null) | None => EntryOutcome::Missing,
            Some(Value::Number(number)) => match number.as_f64() {
                Some(value) => EntryOutcome::Found {
                    value,
                    source: fields
                        .get("source")
                        .and_then(|s| s.as_str())
                        .map(|s| s.to_string()),
                },
                None => EntryOutcome::Invalid,
            },
            Some(_) => EntryOutcome::Invalid,
        },
        _ => EntryOutcome::Invalid,
    }
}
