use serde::Serialize;

#[derive(Debug, Default, Clone, Serialize)]
pub struct PassCounters {
    pub processed: usize,
    pub skipped: usize,
    pub validation_failures: usize,
    pub provider_failures: usize,
}

impl PassCounters {
    pub fn absorb(&mut self, other: &PassCounters) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.validation_failures += other.validation_failures;
        self.provider_failures += other.provider_failures;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureItem {
    pub stage: String,
    pub item: String,
    pub error: String,
}

/// Per-filing result; one failed stage never aborts the others.
#[derive(Debug, Default, Serialize)]
pub struct FilingReport {
    pub accession: String,
    pub chunking: PassCounters,
    pub indexing: PassCounters,
    pub metrics: PassCounters,
    pub risks: PassCounters,
    pub failures: Vec<FailureItem>,
}

impl FilingReport {
    pub fn new(accession: &str) -> Self {
        Self {
            accession: accession.to_string(),
            ..Default::default()
        }
    }

    pub fn record_failure(&mut self, stage: &str, item: &str, error: impl ToString) {
        self.failures.push(FailureItem {
            stage: stage.to_string(),
            item: item.to_string(),
            error: error.to_string(),
        });
    }
}

#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub chunking: PassCounters,
    pub indexing: PassCounters,
    pub metrics: PassCounters,
    pub risks: PassCounters,
    pub failures: Vec<FailureItem>,
}

impl RunReport {
    pub fn absorb(&mut self, filing: FilingReport) {
        self.chunking.absorb(&filing.chunking);
        self.indexing.absorb(&filing.indexing);
        self.metrics.absorb(&filing.metrics);
        self.risks.absorb(&filing.risks);
        self.failures.extend(filing.failures);
    }
}
