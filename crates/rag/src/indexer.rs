use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use sha2::{Digest, Sha256};

use filinglens_core::{ChunkRecord, Result};

use crate::embedding::EmbeddingClient;
use crate::store::FilingStore;

const EMBED_BATCH_SIZE: usize = 16;

#[derive(Debug, Default, Clone, Serialize)]
pub struct IndexReport {
    pub embedded: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub fn content_sha(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Embeds chunks in provider-sized batches. Idempotent per chunk id: a
/// stored vector whose model and content hash still match is left alone;
/// anything else is (re)embedded and upserted. Provider failures are scoped
/// to the batch that hit them; remaining chunks still index. The cancel
/// flag is honored between batches and between row writes, so an
/// interrupted run leaves only complete rows behind.
pub fn index_chunks(
    store: &FilingStore,
    client: &EmbeddingClient,
    chunks: &[ChunkRecord],
    cancel: &AtomicBool,
) -> Result<IndexReport> {
    let model = client.model_id();
    store.validate_embedding_space(&model)?;

    let mut report = IndexReport::default();
    let mut pending: Vec<(&ChunkRecord, String)> = Vec::new();
    for chunk in chunks {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            break;
        }
        let sha = content_sha(&chunk.text);
        match store.embedding_state(&chunk.chunk_id)? {
            Some((stored_model, stored_sha)) if stored_model == model && stored_sha == sha => {
                report.unchanged += 1;
            }
            _ => pending.push((chunk, sha)),
        }
        if pending.len() >= EMBED_BATCH_SIZE {
            flush_batch(store, client, &model, &mut pending, &mut report, cancel)?;
        }
    }
    if !report.cancelled && !pending.is_empty() {
        flush_batch(store, client, &model, &mut pending, &mut report, cancel)?;
    }
    Ok(report)
}

fn flush_batch(
    store: &FilingStore,
    client: &EmbeddingClient,
    model: &str,
    pending: &mut Vec<(&ChunkRecord, String)>,
    report: &mut IndexReport,
    cancel: &AtomicBool,
) -> Result<()> {
    let texts: Vec<String> = pending.iter().map(|(chunk, _)| chunk.text.clone()).collect();
    match client.embed_batch(&texts) {
        Ok(vectors) => {
            for ((chunk, sha), vector) in pending.iter().zip(vectors) {
                if cancel.load(Ordering::Relaxed) {
                    report.cancelled = true;
                    break;
                }
                match store.upsert_embedding(&chunk.chunk_id, model, sha, &vector) {
                    Ok(()) => report.embedded += 1,
                    Err(err) => {
                        tracing::warn!("failed to store embedding for {}: {err}", chunk.chunk_id);
                        report.failed += 1;
                    }
                }
            }
        }
        Err(err) => {
            tracing::warn!("embedding batch of {} failed: {err}", pending.len());
            report.failed += pending.len();
        }
    }
    pending.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use filinglens_core::{FilingSection, FilingType};
    use serde_json::json;
    use tempfile::tempdir;

    fn chunk(id: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            chunk_id: id.to_string(),
            cik: "0001".to_string(),
            ticker: "TEST".to_string(),
            filing_type: FilingType::TenK,
            accession: "acc-1".to_string(),
            period_end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            section: FilingSection::RiskFactors,
            text: text.to_string(),
            ordinal: 0,
            token_count: 4,
            meta: json!({}),
        }
    }

    #[test]
    fn reindexing_unchanged_chunks_is_a_noop() {
        let dir = tempdir().unwrap();
        let store = FilingStore::open(dir.path().join("s.sqlite")).unwrap();
        let client = EmbeddingClient::hash();
        let chunks = vec![chunk("c1", "liquidity risk narrative")];
        for record in &chunks {
            store.upsert_chunk(record).unwrap();
        }
        let cancel = AtomicBool::new(false);

        let first = index_chunks(&store, &client, &chunks, &cancel).unwrap();
        assert_eq!(first.embedded, 1);
        assert_eq!(first.unchanged, 0);

        let second = index_chunks(&store, &client, &chunks, &cancel).unwrap();
        assert_eq!(second.embedded, 0);
        assert_eq!(second.unchanged, 1);
        assert_eq!(store.count_embeddings().unwrap(), 1);
    }

    #[test]
    fn changed_text_replaces_the_stored_vector() {
        let dir = tempdir().unwrap();
        let store = FilingStore::open(dir.path().join("s.sqlite")).unwrap();
        let client = EmbeddingClient::hash();
        let cancel = AtomicBool::new(false);

        let original = vec![chunk("c1", "original chunk body")];
        store.upsert_chunk(&original[0]).unwrap();
        index_chunks(&store, &client, &original, &cancel).unwrap();
        let (_, sha_before) = store.embedding_state("c1").unwrap().unwrap();

        let revised = vec![chunk("c1", "revised chunk body")];
        store.upsert_chunk(&revised[0]).unwrap();
        let report = index_chunks(&store, &client, &revised, &cancel).unwrap();
        assert_eq!(report.embedded, 1);
        assert_eq!(store.count_embeddings().unwrap(), 1);
        let (_, sha_after) = store.embedding_state("c1").unwrap().unwrap();
        assert_ne!(sha_before, sha_after);
    }

    #[test]
    fn cancellation_stops_before_new_work() {
        let dir = tempdir().unwrap();
        let store = FilingStore::open(dir.path().join("s.sqlite")).unwrap();
        let client = EmbeddingClient::hash();
        let chunks = vec![chunk("c1", "first"), chunk("c2", "second")];
        for record in &chunks {
            store.upsert_chunk(record).unwrap();
        }
        let cancel = AtomicBool::new(true);
        let report = index_chunks(&store, &client, &chunks, &cancel).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.embedded, 0);
        assert_eq!(store.count_embeddings().unwrap(), 0);
    }
}
