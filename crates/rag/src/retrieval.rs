use filinglens_core::{FilingError, Result};

use crate::embedding::EmbeddingClient;
use crate::store::{FilingStore, ScoredChunk};

/// Embeds the query with the same client used for indexing and runs the
/// filtered cosine scan. The embedding-space check runs first so a query
/// against an index built with another model fails loudly instead of
/// returning nonsense rankings.
pub fn retrieve_chunks(
    store: &FilingStore,
    embeddings: &EmbeddingClient,
    query_text: &str,
    company_filter: Option<&str>,
    top_k: usize,
) -> Result<Vec<ScoredChunk>> {
    store.validate_embedding_space(&embeddings.model_id())?;
    let query = embeddings
        .embed(query_text)
        .map_err(|err| FilingError::EmbeddingUnavailable(err.to_string()))?;
    store.search_similar(&query, company_filter, top_k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use filinglens_core::{ChunkRecord, FilingSection, FilingType};
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;

    use crate::indexer::index_chunks;

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
            meta: json!({}),
            token_count: 0,
        }
    }

    #[test]
    fn retrieval_ranks_lexically_similar_chunks_first() {
        let dir = tempdir().unwrap();
        let store = FilingStore::open(dir.path().join("s.sqlite")).unwrap();
        let client = EmbeddingClient::hash();
        let chunks = vec![
            chunk("on_topic", "litigation settlement damages lawsuit exposure"),
            chunk("off_topic", "supply chain inventory logistics freight"),
        ];
        for record in &chunks {
            store.upsert_chunk(record).unwrap();
        }
        index_chunks(&store, &client, &chunks, &AtomicBool::new(false)).unwrap();

        let hits = retrieve_chunks(
            &store,
            &client,
            "pending litigation and lawsuit damages",
            Some("0001"),
            2,
        )
        .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk_id, "on_topic");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn empty_index_returns_empty_not_error() {
        let dir = tempdir().unwrap();
        let store = FilingStore::open(dir.path().join("s.sqlite")).unwrap();
        let client = EmbeddingClient::hash();
        let hits = retrieve_chunks(&store, &client, "anything", None, 3).unwrap();
        assert!(hits.is_empty());
    }
}
