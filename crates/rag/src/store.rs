use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use bytemuck::{cast_slice, try_cast_slice};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use filinglens_core::{
    Company, ChunkRecord, FilingError, FilingSection, FilingType, MetricRecord, MetricUnit,
    Result, RiskAssessment, RiskCategory,
};

const WRITE_ATTEMPTS: usize = 3;
const RISK_FLAG_FLOOR: f64 = 70.0;

#[derive(Clone)]
pub struct FilingStore {
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: ChunkRecord,
    pub score: f32,
}

impl FilingStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(read_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(read_err)?;
        Ok(conn)
    }

    fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS companies (
                cik TEXT PRIMARY KEY,
                ticker TEXT NOT NULL,
                name TEXT NOT NULL,
                sic_code INTEGER,
                sector TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                cik TEXT NOT NULL,
                ticker TEXT NOT NULL,
                filing_type TEXT NOT NULL,
                accession TEXT NOT NULL,
                period_end TEXT NOT NULL,
                section TEXT NOT NULL,
                chunk_text TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                token_count INTEGER NOT NULL DEFAULT 0,
                meta TEXT NOT NULL DEFAULT '{}',
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_cik ON chunks(cik);
            CREATE INDEX IF NOT EXISTS idx_chunks_accession ON chunks(accession);
            CREATE TABLE IF NOT EXISTS embeddings (
                chunk_id TEXT PRIMARY KEY,
                model TEXT NOT NULL,
                dims INTEGER NOT NULL,
                content_sha TEXT NOT NULL,
                vector BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS metrics (
                metric_id TEXT PRIMARY KEY,
                cik TEXT NOT NULL,
                ticker TEXT NOT NULL,
                filing_type TEXT NOT NULL,
                period_end TEXT NOT NULL,
                name TEXT NOT NULL,
                value REAL NOT NULL,
                unit TEXT NOT NULL,
                yoy_change REAL,
                is_anomaly INTEGER NOT NULL DEFAULT 0,
                meta TEXT NOT NULL DEFAULT '{}',
                UNIQUE(cik, period_end, name)
            );
            CREATE INDEX IF NOT EXISTS idx_metrics_cik_name ON metrics(cik, name);
            CREATE TABLE IF NOT EXISTS risk_assessments (
                assessment_id TEXT PRIMARY KEY,
                cik TEXT NOT NULL,
                ticker TEXT NOT NULL,
                period_end TEXT NOT NULL,
                category TEXT NOT NULL,
                score REAL NOT NULL,
                summary TEXT NOT NULL,
                evidence TEXT NOT NULL DEFAULT '[]',
                UNIQUE(cik, period_end, category)
            );
            CREATE INDEX IF NOT EXISTS idx_risk_cik ON risk_assessments(cik);
            "#,
        )
        .map_err(read_err)?;
        Ok(())
    }

    pub fn upsert_company(&self, company: &Company) -> Result<()> {
        let conn = self.connection()?;
        self.with_write_retry(|| {
            conn.execute(
                "INSERT INTO companies (cik, ticker, name, sic_code, sector, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(cik) DO UPDATE SET
                    ticker = excluded.ticker,
                    name = excluded.name,
                    sic_code = excluded.sic_code,
                    sector = excluded.sector,
                    active = excluded.active",
                params![
                    company.cik,
                    company.ticker,
                    company.name,
                    company.sic_code,
                    company.sector,
                    company.active as i64,
                ],
            )
        })?;
        Ok(())
    }

    pub fn get_company(&self, cik: &str) -> Result<Option<Company>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT cik, ticker, name, sic_code, sector, active FROM companies WHERE cik = ?1",
            [cik],
            |row| {
                Ok(Company {
                    cik: row.get(0)?,
                    ticker: row.get(1)?,
                    name: row.get(2)?,
                    sic_code: row.get(3)?,
                    sector: row.get(4)?,
                    active: row.get::<_, i64>(5)? != 0,
                })
            },
        )
        .optional()
        .map_err(read_err)
    }

    pub fn list_companies(&self) -> Result<Vec<Company>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT cik, ticker, name, sic_code, sector, active FROM companies ORDER BY ticker")
            .map_err(read_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Company {
                    cik: row.get(0)?,
                    ticker: row.get(1)?,
                    name: row.get(2)?,
                    sic_code: row.get(3)?,
                    sector: row.get(4)?,
                    active: row.get::<_, i64>(5)? != 0,
                })
            })
            .map_err(read_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(read_err)
    }

    /// Reprocessing a filing supersedes its chunks: old rows (and their
    /// embeddings) are retired before the new generation is written.
    pub fn retire_filing_chunks(&self, accession: &str) -> Result<usize> {
        let conn = self.connection()?;
        self.with_write_retry(|| {
            conn.execute(
                "DELETE FROM embeddings WHERE chunk_id IN
                    (SELECT chunk_id FROM chunks WHERE accession = ?1)",
                [accession],
            )?;
            conn.execute("DELETE FROM chunks WHERE accession = ?1", [accession])
        })
    }

    pub fn upsert_chunk(&self, chunk: &ChunkRecord) -> Result<()> {
        let conn = self.connection()?;
        let meta = chunk.meta.to_string();
        self.with_write_retry(|| {
            conn.execute(
                "INSERT INTO chunks
                    (chunk_id, cik, ticker, filing_type, accession, period_end,
                     section, chunk_text, ordinal, token_count, meta)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(chunk_id) DO UPDATE SET
                    chunk_text = excluded.chunk_text,
                    token_count = excluded.token_count,
                    meta = excluded.meta",
                params![
                    chunk.chunk_id,
                    chunk.cik,
                    chunk.ticker,
                    chunk.filing_type.as_str(),
                    chunk.accession,
                    chunk.period_end.to_string(),
                    chunk.section.as_str(),
                    chunk.text,
                    chunk.ordinal as i64,
                    chunk.token_count as i64,
                    meta,
                ],
            )
        })?;
        Ok(())
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Result<Option<ChunkRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!("{CHUNK_SELECT} WHERE chunk_id = ?1"))
            .map_err(read_err)?;
        let mut rows = stmt.query([chunk_id]).map_err(read_err)?;
        match rows.next().map_err(read_err)? {
            Some(row) => Ok(Some(chunk_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn chunks_for_filing(&self, accession: &str) -> Result<Vec<ChunkRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "{CHUNK_SELECT} WHERE accession = ?1 ORDER BY section, ordinal"
            ))
            .map_err(read_err)?;
        let mut rows = stmt.query([accession]).map_err(read_err)?;
        let mut chunks = Vec::new();
        while let Some(row) = rows.next().map_err(read_err)? {
            chunks.push(chunk_from_row(row)?);
        }
        Ok(chunks)
    }

    pub fn count_chunks(&self) -> Result<usize> {
        let conn = self.connection()?;
        conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(read_err)
    }

    pub fn embedding_state(&self, chunk_id: &str) -> Result<Option<(String, String)>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT model, content_sha FROM embeddings WHERE chunk_id = ?1",
            [chunk_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(read_err)
    }

    pub fn upsert_embedding(
        &self,
        chunk_id: &str,
        model: &str,
        content_sha: &str,
        vector: &[f32],
    ) -> Result<()> {
        let conn = self.connection()?;
        let blob = cast_slice::<f32, u8>(vector);
        self.with_write_retry(|| {
            conn.execute(
                "INSERT INTO embeddings (chunk_id, model, dims, content_sha, vector)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(chunk_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    content_sha = excluded.content_sha,
                    vector = excluded.vector",
                params![chunk_id, model, vector.len() as i64, content_sha, blob],
            )
        })?;
        Ok(())
    }

    pub fn count_embeddings(&self) -> Result<usize> {
        let conn = self.connection()?;
        conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as usize)
        .map_err(read_err)
    }

    /// Mixing embedding models in one index breaks similarity comparisons,
    /// so an index holding vectors from another model is rejected up front.
    pub fn validate_embedding_space(&self, model: &str) -> Result<()> {
        let conn = self.connection()?;
        let foreign: Option<String> = conn
            .query_row(
                "SELECT model FROM embeddings WHERE model != ?1 LIMIT 1",
                [model],
                |row| row.get(0),
            )
            .optional()
            .map_err(read_err)?;
        match foreign {
            Some(other) => Err(FilingError::Other(format!(
                "embedding space mismatch: index holds '{other}' vectors, client embeds with '{model}'"
            ))),
            None => Ok(()),
        }
    }

    /// Linear cosine scan over the (optionally company-filtered) candidate
    /// set. Ties order by most recent period first, then ordinal.
    pub fn search_similar(
        &self,
        query: &[f32],
        cik_filter: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Err(FilingError::InvalidArgument("top_k must be positive"));
        }
        let conn = self.connection()?;
        let sql = format!(
            "SELECT c.chunk_id, c.cik, c.ticker, c.filing_type, c.accession, c.period_end,
                    c.section, c.chunk_text, c.ordinal, c.token_count, c.meta, e.vector
             FROM chunks c JOIN embeddings e ON e.chunk_id = c.chunk_id{}",
            if cik_filter.is_some() {
                " WHERE c.cik = ?1"
            } else {
                ""
            }
        );
        let mut stmt = conn.prepare(&sql).map_err(read_err)?;
        let mut rows = match cik_filter {
            Some(cik) => stmt.query(params![cik]),
            None => stmt.query(params![]),
        }
        .map_err(read_err)?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next().map_err(read_err)? {
            let blob: Vec<u8> = row.get(11).map_err(read_err)?;
            let vector: &[f32] = try_cast_slice(&blob)
                .map_err(|_| FilingError::Other("invalid embedding blob".to_string()))?;
            if vector.len() != query.len() {
                return Err(FilingError::Other(format!(
                    "embedding dimension mismatch: index {} vs query {}",
                    vector.len(),
                    query.len()
                )));
            }
            let score = cosine_similarity(query, vector);
            hits.push(ScoredChunk {
                chunk: chunk_from_row(row)?,
                score,
            });
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.chunk.period_end.cmp(&a.chunk.period_end))
                .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    pub fn upsert_metric(&self, record: &MetricRecord) -> Result<()> {
        let conn = self.connection()?;
        let meta = record.meta.to_string();
        self.with_write_retry(|| {
            conn.execute(
                "INSERT INTO metrics
                    (metric_id, cik, ticker, filing_type, period_end, name,
                     value, unit, yoy_change, is_anomaly, meta)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(cik, period_end, name) DO UPDATE SET
                    metric_id = excluded.metric_id,
                    value = excluded.value,
                    unit = excluded.unit,
                    yoy_change = excluded.yoy_change,
                    is_anomaly = excluded.is_anomaly,
                    meta = excluded.meta",
                params![
                    record.metric_id,
                    record.cik,
                    record.ticker,
                    record.filing_type.as_str(),
                    record.period_end.to_string(),
                    record.name,
                    record.value,
                    record.unit.as_str(),
                    record.yoy_change,
                    record.is_anomaly as i64,
                    meta,
                ],
            )
        })?;
        Ok(())
    }

    /// Latest prior-period value for (company, metric), if any.
    pub fn prior_metric_value(
        &self,
        cik: &str,
        name: &str,
        before: NaiveDate,
    ) -> Result<Option<f64>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT value FROM metrics
             WHERE cik = ?1 AND name = ?2 AND period_end < ?3
             ORDER BY period_end DESC LIMIT 1",
            params![cik, name, before.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(read_err)
    }

    pub fn metrics_for_company(&self, cik: &str) -> Result<Vec<MetricRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT metric_id, cik, ticker, filing_type, period_end, name,
                        value, unit, yoy_change, is_anomaly, meta
                 FROM metrics WHERE cik = ?1 ORDER BY period_end DESC, name",
            )
            .map_err(read_err)?;
        let mut rows = stmt.query([cik]).map_err(read_err)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(read_err)? {
            records.push(metric_from_row(row)?);
        }
        Ok(records)
    }

    pub fn metric_history(&self, cik: &str, name: &str) -> Result<Vec<(NaiveDate, f64)>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT period_end, value FROM metrics
                 WHERE cik = ?1 AND name = ?2 ORDER BY period_end",
            )
            .map_err(read_err)?;
        let mut rows = stmt.query(params![cik, name]).map_err(read_err)?;
        let mut history = Vec::new();
        while let Some(row) = rows.next().map_err(read_err)? {
            let period: String = row.get(0).map_err(read_err)?;
            let value: f64 = row.get(1).map_err(read_err)?;
            history.push((parse_date(&period)?, value));
        }
        Ok(history)
    }

    pub fn upsert_assessment(&self, assessment: &RiskAssessment) -> Result<()> {
        let conn = self.connection()?;
        let evidence = serde_json::to_string(&assessment.evidence)?;
        self.with_write_retry(|| {
            conn.execute(
                "INSERT INTO risk_assessments
                    (assessment_id, cik, ticker, period_end, category, score, summary, evidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(cik, period_end, category) DO UPDATE SET
                    assessment_id = excluded.assessment_id,
                    score = excluded.score,
                    summary = excluded.summary,
                    evidence = excluded.evidence",
                params![
                    assessment.assessment_id,
                    assessment.cik,
                    assessment.ticker,
                    assessment.period_end.to_string(),
                    assessment.category.as_str(),
                    assessment.score,
                    assessment.summary,
                    evidence,
                ],
            )
        })?;
        Ok(())
    }

    pub fn assessments_for_company(&self, cik: &str) -> Result<Vec<RiskAssessment>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT assessment_id, cik, ticker, period_end, category, score, summary, evidence
                 FROM risk_assessments WHERE cik = ?1 ORDER BY period_end DESC, category",
            )
            .map_err(read_err)?;
        let mut rows = stmt.query([cik]).map_err(read_err)?;
        let mut assessments = Vec::new();
        while let Some(row) = rows.next().map_err(read_err)? {
            assessments.push(assessment_from_row(row)?);
        }
        Ok(assessments)
    }

    pub fn company_metrics_summary(&self, cik: &str) -> Result<MetricsSummary> {
        let records = self.metrics_for_company(cik)?;
        let mut latest: Vec<MetricPoint> = Vec::new();
        let mut anomalies = Vec::new();
        for record in &records {
            if latest.iter().any(|p| p.name == record.name) {
                continue;
            }
            let point = MetricPoint {
                name: record.name.clone(),
                value: record.value,
                unit: record.unit,
                period_end: record.period_end,
                yoy_change: record.yoy_change,
            };
            if record.is_anomaly {
                anomalies.push(point.clone());
            }
            latest.push(point);
        }
        Ok(MetricsSummary {
            cik: cik.to_string(),
            metrics: latest,
            anomalies,
        })
    }

    pub fn company_risk_summary(&self, cik: &str) -> Result<RiskSummary> {
        let assessments = self.assessments_for_company(cik)?;
        if assessments.is_empty() {
            return Ok(RiskSummary {
                cik: cik.to_string(),
                overall_score: 0.0,
                breakdown: Vec::new(),
                flags: Vec::new(),
            });
        }
        let mut breakdown: Vec<CategoryBreakdown> = Vec::new();
        let mut flags = Vec::new();
        for assessment in &assessments {
            if assessment.score >= RISK_FLAG_FLOOR {
                flags.push(RiskFlag {
                    category: assessment.category,
                    score: assessment.score,
                    summary: assessment.summary.clone(),
                    period_end: assessment.period_end,
                });
            }
            match breakdown
                .iter_mut()
                .find(|b| b.category == assessment.category)
            {
                Some(entry) => {
                    entry.count += 1;
                    entry.score_sum += assessment.score;
                }
                None => breakdown.push(CategoryBreakdown {
                    category: assessment.category,
                    count: 1,
                    score_sum: assessment.score,
                    average_score: 0.0,
                    latest_score: assessment.score,
                    latest_period: assessment.period_end,
                }),
            }
        }
        for entry in breakdown.iter_mut() {
            entry.average_score =
                filinglens_core::round2(entry.score_sum / entry.count as f64);
        }
        Ok(RiskSummary {
            cik: cik.to_string(),
            overall_score: filinglens_core::overall_risk_score(&assessments),
            breakdown,
            flags,
        })
    }

    fn with_write_retry<T>(&self, mut op: impl FnMut() -> rusqlite::Result<T>) -> Result<T> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if is_busy(&err) && attempt < WRITE_ATTEMPTS => {
                    tracing::warn!("store write busy, retrying (attempt {attempt}): {err}");
                    thread::sleep(Duration::from_millis(50 * attempt as u64));
                }
                Err(err) => return Err(FilingError::StoreWriteFailure(err.to_string())),
            }
        }
    }
}

const CHUNK_SELECT: &str = "SELECT chunk_id, cik, ticker, filing_type, accession, period_end,
        section, chunk_text, ordinal, token_count, meta FROM chunks";

fn chunk_from_row(row: &rusqlite::Row<'_>) -> Result<ChunkRecord> {
    let filing_type: String = row.get(3).map_err(read_err)?;
    let period_end: String = row.get(5).map_err(read_err)?;
    let section: String = row.get(6).map_err(read_err)?;
    let meta: String = row.get(10).map_err(read_err)?;
    Ok(ChunkRecord {
        chunk_id: row.get(0).map_err(read_err)?,
        cik: row.get(1).map_err(read_err)?,
        ticker: row.get(2).map_err(read_err)?,
        filing_type: parse_filing_type(&filing_type)?,
        accession: row.get(4).map_err(read_err)?,
        period_end: parse_date(&period_end)?,
        section: FilingSection::from_str(&section)
            .ok_or_else(|| FilingError::Other(format!("unknown section '{section}'")))?,
        text: row.get(7).map_err(read_err)?,
        ordinal: row.get::<_, i64>(8).map_err(read_err)? as usize,
        token_count: row.get::<_, i64>(9).map_err(read_err)? as usize,
        meta: serde_json::from_str(&meta).unwrap_or_default(),
    })
}

fn metric_from_row(row: &rusqlite::Row<'_>) -> Result<MetricRecord> {
    let filing_type: String = row.get(3).map_err(read_err)?;
    let period_end: String = row.get(4).map_err(read_err)?;
    let unit: String = row.get(7).map_err(read_err)?;
    let meta: String = row.get(10).map_err(read_err)?;
    Ok(MetricRecord {
        metric_id: row.get(0).map_err(read_err)?,
        cik: row.get(1).map_err(read_err)?,
        ticker: row.get(2).map_err(read_err)?,
        filing_type: parse_filing_type(&filing_type)?,
        period_end: parse_date(&period_end)?,
        name: row.get(5).map_err(read_err)?,
        value: row.get(6).map_err(read_err)?,
        unit: MetricUnit::from_str(&unit)
            .ok_or_else(|| FilingError::Other(format!("unknown unit '{unit}'")))?,
        yoy_change: row.get(8).map_err(read_err)?,
        is_anomaly: row.get::<_, i64>(9).map_err(read_err)? != 0,
        meta: serde_json::from_str(&meta).unwrap_or_default(),
    })
}

fn assessment_from_row(row: &rusqlite::Row<'_>) -> Result<RiskAssessment> {
    let period_end: String = row.get(3).map_err(read_err)?;
    let category: String = row.get(4).map_err(read_err)?;
    let evidence: String = row.get(7).map_err(read_err)?;
    Ok(RiskAssessment {
        assessment_id: row.get(0).map_err(read_err)?,
        cik: row.get(1).map_err(read_err)?,
        ticker: row.get(2).map_err(read_err)?,
        period_end: parse_date(&period_end)?,
        category: RiskCategory::from_str(&category)
            .ok_or_else(|| FilingError::Other(format!("unknown category '{category}'")))?,
        score: row.get(5).map_err(read_err)?,
        summary: row.get(6).map_err(read_err)?,
        evidence: serde_json::from_str(&evidence).unwrap_or_default(),
    })
}

fn parse_filing_type(value: &str) -> Result<FilingType> {
    FilingType::from_str(value)
        .ok_or_else(|| FilingError::Other(format!("unknown filing type '{value}'")))
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|err| FilingError::Other(format!("bad period_end '{value}': {err}")))
}

fn read_err(err: rusqlite::Error) -> FilingError {
    FilingError::Other(err.to_string())
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub period_end: NaiveDate,
    pub yoy_change: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub cik: String,
    pub metrics: Vec<MetricPoint>,
    pub anomalies: Vec<MetricPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryBreakdown {
    pub category: RiskCategory,
    pub count: usize,
    #[serde(skip)]
    score_sum: f64,
    pub average_score: f64,
    pub latest_score: f64,
    pub latest_period: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskFlag {
    pub category: RiskCategory,
    pub score: f64,
    pub summary: String,
    pub period_end: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub cik: String,
    pub overall_score: f64,
    pub breakdown: Vec<CategoryBreakdown>,
    pub flags: Vec<RiskFlag>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_chunk(id: &str, cik: &str, period: NaiveDate, ordinal: usize) -> ChunkRecord {
        ChunkRecord {
            chunk_id: id.to_string(),
            cik: cik.to_string(),
            ticker: "TEST".to_string(),
            filing_type: FilingType::TenK,
            accession: format!("{cik}-acc-1"),
            period_end: period,
            section: FilingSection::RiskFactors,
            text: format!("chunk body {id}"),
            ordinal,
            token_count: 3,
            meta: json!({}),
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> FilingStore {
        FilingStore::open(dir.path().join("store.sqlite")).unwrap()
    }

    #[test]
    fn chunk_upsert_roundtrips_and_replaces() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let mut chunk = sample_chunk("c1", "0001", date(2024, 12, 31), 0);
        store.upsert_chunk(&chunk).unwrap();
        chunk.text = "revised body".to_string();
        store.upsert_chunk(&chunk).unwrap();
        assert_eq!(store.count_chunks().unwrap(), 1);
        let loaded = store.get_chunk("c1").unwrap().unwrap();
        assert_eq!(loaded.text, "revised body");
        assert_eq!(loaded.section, FilingSection::RiskFactors);
    }

    #[test]
    fn retiring_a_filing_drops_chunks_and_embeddings() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let chunk = sample_chunk("c1", "0001", date(2024, 12, 31), 0);
        store.upsert_chunk(&chunk).unwrap();
        store
            .upsert_embedding("c1", "hash-4", "sha", &[1.0, 0.0, 0.0, 0.0])
            .unwrap();
        store.retire_filing_chunks(&chunk.accession).unwrap();
        assert_eq!(store.count_chunks().unwrap(), 0);
        assert_eq!(store.count_embeddings().unwrap(), 0);
    }

    #[test]
    fn search_orders_by_similarity_then_recency_then_ordinal() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let specs = [
            ("far", date(2023, 12, 31), 0, vec![0.0, 1.0, 0.0, 0.0]),
            ("near", date(2023, 12, 31), 0, vec![1.0, 0.0, 0.0, 0.0]),
            ("tie_old", date(2022, 12, 31), 0, vec![0.7, 0.7, 0.0, 0.0]),
            ("tie_new_b", date(2023, 12, 31), 1, vec![0.7, 0.7, 0.0, 0.0]),
            ("tie_new_a", date(2023, 12, 31), 0, vec![0.7, 0.7, 0.0, 0.0]),
        ];
        for (id, period, ordinal, vector) in &specs {
            let chunk = sample_chunk(id, "0001", *period, *ordinal);
            store.upsert_chunk(&chunk).unwrap();
            store.upsert_embedding(id, "hash-4", id, vector).unwrap();
        }
        let hits = store
            .search_similar(&[1.0, 0.0, 0.0, 0.0], Some("0001"), 4)
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "tie_new_a", "tie_new_b", "tie_old"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn search_respects_company_filter_and_empty_corpus() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let chunk = sample_chunk("c1", "0001", date(2024, 12, 31), 0);
        store.upsert_chunk(&chunk).unwrap();
        store
            .upsert_embedding("c1", "hash-4", "sha", &[1.0, 0.0, 0.0, 0.0])
            .unwrap();
        let other = store
            .search_similar(&[1.0, 0.0, 0.0, 0.0], Some("0999"), 3)
            .unwrap();
        assert!(other.is_empty());
        let err = store.search_similar(&[1.0, 0.0, 0.0, 0.0], None, 0);
        assert!(matches!(err, Err(FilingError::InvalidArgument(_))));
    }

    #[test]
    fn embedding_space_validation_rejects_mixed_models() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let chunk = sample_chunk("c1", "0001", date(2024, 12, 31), 0);
        store.upsert_chunk(&chunk).unwrap();
        store
            .upsert_embedding("c1", "hash-4", "sha", &[1.0, 0.0, 0.0, 0.0])
            .unwrap();
        assert!(store.validate_embedding_space("hash-4").is_ok());
        assert!(store.validate_embedding_space("other-model").is_err());
    }

    #[test]
    fn metric_upsert_replaces_by_natural_key() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let period = date(2024, 12, 31);
        let mut record = MetricRecord {
            metric_id: MetricRecord::natural_id("0001", period, "net_income"),
            cik: "0001".to_string(),
            ticker: "TEST".to_string(),
            filing_type: FilingType::TenK,
            period_end: period,
            name: "net_income".to_string(),
            value: 20.0,
            unit: MetricUnit::MillionsUsd,
            yoy_change: None,
            is_anomaly: false,
            meta: json!({}),
        };
        store.upsert_metric(&record).unwrap();
        record.value = 21.5;
        store.upsert_metric(&record).unwrap();
        let records = store.metrics_for_company("0001").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 21.5);
    }

    #[test]
    fn prior_metric_lookup_and_history() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        for (period, value) in [(date(2022, 12, 31), 10.0), (date(2023, 12, 31), 16.0)] {
            let record = MetricRecord {
                metric_id: MetricRecord::natural_id("0001", period, "net_income"),
                cik: "0001".to_string(),
                ticker: "TEST".to_string(),
                filing_type: FilingType::TenK,
                period_end: period,
                name: "net_income".to_string(),
                value,
                unit: MetricUnit::MillionsUsd,
                yoy_change: None,
                is_anomaly: false,
                meta: json!({}),
            };
            store.upsert_metric(&record).unwrap();
        }
        let prior = store
            .prior_metric_value("0001", "net_income", date(2024, 12, 31))
            .unwrap();
        assert_eq!(prior, Some(16.0));
        assert!(store
            .prior_metric_value("0001", "net_income", date(2022, 1, 1))
            .unwrap()
            .is_none());
        let history = store.metric_history("0001", "net_income").unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].0 < history[1].0);
    }

    #[test]
    fn assessment_upsert_is_keyed_per_category_and_period() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let period = date(2024, 12, 31);
        let mut assessment = RiskAssessment {
            assessment_id: RiskAssessment::natural_id("0001", period, RiskCategory::Litigation),
            cik: "0001".to_string(),
            ticker: "TEST".to_string(),
            period_end: period,
            category: RiskCategory::Litigation,
            score: 50.0,
            summary: "pending suits".to_string(),
            evidence: Vec::new(),
        };
        store.upsert_assessment(&assessment).unwrap();
        assessment.score = 75.0;
        store.upsert_assessment(&assessment).unwrap();
        let loaded = store.assessments_for_company("0001").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].score, 75.0);

        let summary = store.company_risk_summary("0001").unwrap();
        assert_eq!(summary.overall_score, 75.0);
        assert_eq!(summary.flags.len(), 1);
    }

    #[test]
    fn company_reference_roundtrip() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let company = Company {
            cik: "0000320193".to_string(),
            ticker: "AAPL".to_string(),
            name: "Apple Inc.".to_string(),
            sic_code: Some(3571),
            sector: "Manufacturing".to_string(),
            active: true,
        };
        store.upsert_company(&company).unwrap();
        let loaded = store.get_company("0000320193").unwrap().unwrap();
        assert_eq!(loaded.ticker, "AAPL");
        assert_eq!(store.list_companies().unwrap().len(), 1);
    }
}
