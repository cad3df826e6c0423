mod answer;
mod embedding;
mod indexer;
mod retrieval;
mod store;

pub use answer::{
    answer_question, extract_json_object, synthesize_answer, AnswerRequest, Citation, RagAnswer,
    DEFAULT_MIN_SIMILARITY, DEFAULT_TOP_K,
};
pub use embedding::{EmbeddingBackend, EmbeddingClient, RemoteEmbeddingClient};
pub use indexer::{content_sha, index_chunks, IndexReport};
pub use retrieval::retrieve_chunks;
pub use store::{
    cosine_similarity, CategoryBreakdown, FilingStore, MetricPoint, MetricsSummary, RiskFlag,
    RiskSummary, ScoredChunk,
};
