mod anomaly;
mod chunk;
mod company;
mod embedding;
mod error;
mod filing;
mod metrics;
mod risk;
mod section;

pub use anomaly::{flag_anomalies, is_anomalous, thresholds_for, Thresholds};
pub use chunk::{count_tokens, ChunkConfig, SectionChunker};
pub use company::{sector_for_sic, Company};
pub use embedding::{HashEmbedder, HashEmbedderConfig};
pub use error::{FilingError, Result};
pub use filing::{ChunkRecord, FilingMeta, FilingType};
pub use metrics::{
    compute_derived, is_catalogue_metric, is_raw_metric, raw_metric_unit, round2, yoy_change,
    DerivedMetric, MetricRecord, MetricUnit, DERIVED_METRICS, RAW_METRICS,
};
pub use risk::{
    detect_keyword_risks, overall_risk_score, EvidenceSpan, KeywordHit, RiskAssessment,
    RiskCategory, Severity,
};
pub use section::{extract_sections, normalize_text, FilingSection, SectionSpan};
