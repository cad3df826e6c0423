use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;

use filinglens_core::{
    sector_for_sic, ChunkConfig, ChunkRecord, Company, FilingError, FilingMeta, SectionChunker,
};
use filinglens_llm::{LlmClient, LlmRequest, LlmResponse};
use filinglens_rag::{index_chunks, EmbeddingClient, FilingStore};

use crate::config::{FilingEntry, PipelineConfig, RunManifest, UniverseSeed};
use crate::logging;
use crate::metrics_pass::extract_filing_metrics;
use crate::model::{FilingReport, RunReport};
use crate::risk_pass::assess_filing_risks;

pub const REPORT_FILE: &str = "filinglens_report.json";

#[derive(Debug, Clone, Copy, Default)]
pub struct PassSet {
    pub chunk: bool,
    pub embed: bool,
    pub metrics: bool,
    pub risks: bool,
}

impl PassSet {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut passes = PassSet::default();
        for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match name {
                "chunk" => passes.chunk = true,
                "embed" => passes.embed = true,
                "metrics" => passes.metrics = true,
                "risks" => passes.risks = true,
                other => return Err(anyhow!("unknown pass '{other}'")),
            }
        }
        Ok(passes)
    }
}

pub fn load_universe(db: &str, seed_path: &str) -> Result<()> {
    let raw = fs::read_to_string(seed_path)
        .with_context(|| format!("failed to read seed {seed_path}"))?;
    let seed: UniverseSeed = serde_yaml::from_str(&raw).context("invalid universe seed")?;
    let store = FilingStore::open(db)?;
    for entry in &seed.companies {
        let company = Company {
            cik: entry.cik.clone(),
            ticker: entry.ticker.clone(),
            name: entry.name.clone(),
            sic_code: entry.sic_code,
            sector: entry
                .sic_code
                .map(sector_for_sic)
                .unwrap_or("Unclassified")
                .to_string(),
            active: true,
        };
        store.upsert_company(&company)?;
    }
    logging::stage(
        "universe",
        format!("loaded {} companies into {db}", seed.companies.len()),
    );
    Ok(())
}

pub fn run_process(db: &str, manifest_path: &str, passes_raw: &str) -> Result<()> {
    let passes = PassSet::parse(passes_raw)?;
    let config = PipelineConfig::from_env()?;
    let raw = fs::read_to_string(manifest_path)
        .with_context(|| format!("failed to read manifest {manifest_path}"))?;
    let manifest: RunManifest = serde_yaml::from_str(&raw).context("invalid run manifest")?;
    if manifest.filings.is_empty() {
        return Err(anyhow!("manifest names no filings"));
    }
    let base = Path::new(manifest_path)
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let store = FilingStore::open(db)?;
    let embeddings = EmbeddingClient::from_env()?;
    let llm = LlmClient::new(config.provider, config.model.clone())?;
    let throttle = Duration::from_millis(config.llm_delay_ms);
    let invoke = move |system: Option<&str>, user: &str| -> Result<LlmResponse> {
        if !throttle.is_zero() {
            thread::sleep(throttle);
        }
        llm.chat_blocking(&LlmRequest {
            system: system.map(str::to_string),
            user: user.to_string(),
        })
    };

    let cancel = AtomicBool::new(false);
    let report = run_passes(
        &store,
        &config,
        &manifest.filings,
        &base,
        passes,
        &invoke,
        &embeddings,
        &cancel,
    )?;

    let report_path = Path::new(db)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(REPORT_FILE);
    fs::write(&report_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("failed to write {}", report_path.display()))?;
    logging::stage("report", format!("written to {}", report_path.display()));
    Ok(())
}

/// Filings fan out across the worker pool one company at a time; a single
/// company's filings run oldest-first so later periods find their stored
/// priors for the YoY computation. Every stage failure is scoped to its
/// filing and recorded; the run always completes with a report.
#[allow(clippy::too_many_arguments)]
pub fn run_passes(
    store: &FilingStore,
    config: &PipelineConfig,
    filings: &[FilingEntry],
    base: &Path,
    passes: PassSet,
    invoke: &(impl Fn(Option<&str>, &str) -> Result<LlmResponse> + Sync),
    embeddings: &EmbeddingClient,
    cancel: &AtomicBool,
) -> Result<RunReport> {
    let chunker = SectionChunker::new(ChunkConfig {
        max_chunk_tokens: config.max_chunk_tokens,
        overlap_chars: config.overlap_chars,
    });

    let mut groups: BTreeMap<&str, Vec<&FilingEntry>> = BTreeMap::new();
    for entry in filings {
        groups.entry(entry.cik.as_str()).or_default().push(entry);
    }
    let mut groups: Vec<Vec<&FilingEntry>> = groups.into_values().collect();
    for group in groups.iter_mut() {
        // ISO dates sort chronologically as strings
        group.sort_by(|a, b| a.period_end.cmp(&b.period_end));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .context("failed to build worker pool")?;
    let reports: Vec<FilingReport> = pool.install(|| {
        groups
            .par_iter()
            .flat_map_iter(|group| {
                group.iter().map(|entry| {
                    process_filing(store, &chunker, entry, base, passes, invoke, embeddings, cancel)
                })
            })
            .collect()
    });

    let mut run = RunReport::default();
    for filing in reports {
        run.absorb(filing);
    }
    logging::stage(
        "run",
        format!(
            "chunks {} embedded {} metrics {} risks {} failures {}",
            run.chunking.processed,
            run.indexing.processed,
            run.metrics.processed,
            run.risks.processed,
            run.failures.len(),
        ),
    );
    Ok(run)
}

#[allow(clippy::too_many_arguments)]
fn process_filing(
    store: &FilingStore,
    chunker: &SectionChunker,
    entry: &FilingEntry,
    base: &Path,
    passes: PassSet,
    invoke: &(impl Fn(Option<&str>, &str) -> Result<LlmResponse> + Sync),
    embeddings: &EmbeddingClient,
    cancel: &AtomicBool,
) -> FilingReport {
    let mut report = FilingReport::new(&entry.accession);
    let meta = match entry.to_meta() {
        Ok(meta) => meta,
        Err(err) => {
            report.record_failure("manifest", &entry.accession, err);
            return report;
        }
    };
    if cancel.load(Ordering::Relaxed) {
        return report;
    }

    let chunks: Vec<ChunkRecord> = if passes.chunk {
        match chunk_stage(store, chunker, entry, &meta, base, cancel, &mut report) {
            Some(chunks) => chunks,
            None => return report,
        }
    } else {
        match store.chunks_for_filing(&entry.accession) {
            Ok(chunks) => chunks,
            Err(err) => {
                report.record_failure("chunk", &entry.accession, err);
                return report;
            }
        }
    };

    if passes.embed && !cancel.load(Ordering::Relaxed) {
        match index_chunks(store, embeddings, &chunks, cancel) {
            Ok(outcome) => {
                report.indexing.processed = outcome.embedded;
                report.indexing.skipped = outcome.unchanged;
                report.indexing.provider_failures = outcome.failed;
            }
            Err(err) => report.record_failure("embed", &entry.accession, err),
        }
    }

    if passes.metrics && !cancel.load(Ordering::Relaxed) {
        match extract_filing_metrics(store, &meta, &chunks, &entry.line_items, invoke) {
            Ok(outcome) => {
                report.metrics = outcome.counters;
                for record in &outcome.records {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Err(err) = store.upsert_metric(record) {
                        report.record_failure("metrics", &record.name, err);
                    }
                }
            }
            Err(err) => {
                report.metrics.provider_failures += 1;
                report.record_failure("metrics", &entry.accession, err);
            }
        }
    }

    if passes.risks && !cancel.load(Ordering::Relaxed) {
        match assess_filing_risks(&meta, &chunks, invoke) {
            Ok(outcome) => {
                report.risks = outcome.counters;
                for assessment in &outcome.assessments {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Err(err) = store.upsert_assessment(assessment) {
                        report.record_failure("risks", assessment.category.as_str(), err);
                    }
                }
            }
            Err(err) => {
                report.risks.provider_failures += 1;
                report.record_failure("risks", &entry.accession, err);
            }
        }
    }

    report
}

/// Chunks one filing from disk, falling back to whole-document chunking
/// when no structure markers are found. Old chunk generations for the same
/// accession are retired before the new rows are written.
fn chunk_stage(
    store: &FilingStore,
    chunker: &SectionChunker,
    entry: &FilingEntry,
    meta: &FilingMeta,
    base: &Path,
    cancel: &AtomicBool,
    report: &mut FilingReport,
) -> Option<Vec<ChunkRecord>> {
    let path = resolve_path(base, &entry.path);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) => {
            report.record_failure(
                "chunk",
                &entry.accession,
                format!("read {}: {err}", path.display()),
            );
            return None;
        }
    };
    let chunks = match chunker.chunk_filing(meta, &text) {
        Ok(chunks) => chunks,
        Err(FilingError::MalformedDocument(reason)) => {
            logging::stage(
                "chunk",
                format!("{}: {reason}; chunking whole document", entry.accession),
            );
            chunker.chunk_whole_document(meta, &text)
        }
        Err(err) => {
            report.record_failure("chunk", &entry.accession, err);
            return None;
        }
    };
    if let Err(err) = store.retire_filing_chunks(&entry.accession) {
        report.record_failure("chunk", &entry.accession, err);
        return None;
    }
    for chunk in &chunks {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        match store.upsert_chunk(chunk) {
            Ok(()) => report.chunking.processed += 1,
            Err(err) => {
                report.chunking.skipped += 1;
                report.record_failure("chunk", &chunk.chunk_id, err);
            }
        }
    }
    Some(chunks)
}

fn resolve_path(base: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
