//! Batch orchestration: normalize → group → classify each thread → report.
//!
//! Threads are classified strictly one at a time in grouping order. A failed
//! classification is recorded as an `ERROR` result and the batch continues.

use std::time::{Duration, Instant};

use tracing::info;

use crate::error::DataError;
use crate::ingest::LoadedRows;
use crate::pipeline::classifier::OutcomeClassifier;
use crate::pipeline::grouper::{Conversations, group_conversations};
use crate::pipeline::normalizer::{MessageNormalizer, NormalizeSummary};
use crate::pipeline::report::{ReportStats, render_report};
use crate::pipeline::types::{ConversationRecord, RawRow};

/// Everything a batch run produced.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub summary: NormalizeSummary,
    /// In processing order.
    pub records: Vec<ConversationRecord>,
    pub stats: ReportStats,
    /// Rendered Markdown.
    pub report: String,
}

impl AnalysisOutcome {
    pub fn error_count(&self) -> usize {
        self.records.iter().filter(|r| r.result.is_error()).count()
    }

    /// Time spent waiting on classification across all threads.
    pub fn classification_time(&self) -> Duration {
        self.records.iter().map(|r| r.elapsed).sum()
    }
}

pub struct ConversationAnalyzer {
    normalizer: MessageNormalizer,
    classifier: OutcomeClassifier,
}

impl ConversationAnalyzer {
    pub fn new(normalizer: MessageNormalizer, classifier: OutcomeClassifier) -> Self {
        Self {
            normalizer,
            classifier,
        }
    }

    /// Run the full pipeline over a static set of rows.
    ///
    /// Only a strict-mode data error aborts the batch.
    pub async fn run(&self, rows: Vec<RawRow>) -> Result<AnalysisOutcome, DataError> {
        let start = Instant::now();
        info!(model = %self.classifier.model_name(), "Starting analysis pipeline...");

        let normalized = self.normalizer.normalize(rows)?;
        let conversations = group_conversations(normalized.messages);
        let records = self.process_conversations(&conversations).await;

        let stats = ReportStats::compute(&records);
        let report = render_report(&records);

        info!(
            conversations = stats.total,
            with_queries = stats.with_queries,
            resolution_rate = %format!("{:.1}", stats.resolution_rate),
            elapsed_secs = %format!("{:.2}", start.elapsed().as_secs_f64()),
            "Analysis complete"
        );

        Ok(AnalysisOutcome {
            summary: normalized.summary,
            records,
            stats,
            report,
        })
    }

    /// Run over rows read from an export, counting rows the reader
    /// rejected as skipped input.
    pub async fn run_loaded(&self, loaded: LoadedRows) -> Result<AnalysisOutcome, DataError> {
        let mut outcome = self.run(loaded.rows).await?;
        outcome.summary.rows_in += loaded.skipped;
        outcome.summary.invalid_skipped += loaded.skipped;
        Ok(outcome)
    }

    /// Classify every thread in order, appending one record per thread.
    pub async fn process_conversations(&self, conversations: &Conversations) -> Vec<ConversationRecord> {
        let total = conversations.len();
        info!(total, "Starting to process conversations...");

        let mut records = Vec::with_capacity(total);
        for (idx, (counterparty, thread)) in conversations.iter().enumerate() {
            let position = idx + 1;
            info!(
                position,
                total,
                customer = %counterparty,
                "Processing conversation"
            );

            let started = Instant::now();
            let result = self.classifier.classify(thread).await;
            let elapsed = started.elapsed();

            info!(
                position,
                total,
                resolution = %result.resolution,
                elapsed_secs = %format!("{:.2}", elapsed.as_secs_f64()),
                "Conversation analyzed"
            );
            records.push(ConversationRecord::new(thread, result, elapsed));
        }

        records
    }
}
