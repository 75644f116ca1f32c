//! Report aggregation: overview statistics plus a per-conversation listing.

use std::fmt::Write;

use crate::pipeline::types::{ConversationRecord, Resolution, ResolutionType};

/// Overview numbers derived from the results collection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReportStats {
    pub total: usize,
    pub without_queries: usize,
    pub with_queries: usize,
    pub resolved: usize,
    /// Percentage of with-query conversations resolved; 0 when there are none.
    pub resolution_rate: f64,
    pub hard: usize,
    pub soft: usize,
}

impl ReportStats {
    /// Compute stats. Only conversations with `has_query` feed the rate and
    /// the Hard/Soft counts.
    pub fn compute(records: &[ConversationRecord]) -> Self {
        let with_query: Vec<&ConversationRecord> =
            records.iter().filter(|r| r.result.has_query).collect();
        let with_queries = with_query.len();

        let resolved = with_query
            .iter()
            .filter(|r| r.result.resolution == Resolution::Resolved)
            .count();
        let hard = with_query
            .iter()
            .filter(|r| r.result.resolution_type == ResolutionType::Hard)
            .count();
        let soft = with_query
            .iter()
            .filter(|r| r.result.resolution_type == ResolutionType::Soft)
            .count();

        let resolution_rate = if with_queries > 0 {
            resolved as f64 / with_queries as f64 * 100.0
        } else {
            0.0
        };

        Self {
            total: records.len(),
            without_queries: records.len() - with_queries,
            with_queries,
            resolved,
            resolution_rate,
            hard,
            soft,
        }
    }
}

/// Render the Markdown report.
pub fn render_report(records: &[ConversationRecord]) -> String {
    let stats = ReportStats::compute(records);
    let mut out = String::with_capacity(512 + records.len() * 400);

    // Writing to a String cannot fail.
    let _ = write!(
        out,
        "# Conversation Analysis Report\n\n\
         ## Overview\n\
         - Total Conversations: {}\n\
         - Conversations Without Queries: {}\n\
         - Conversations With Queries: {}\n\
         - Resolution Rate (for conversations with queries): {:.1}%\n\
         - Hard Resolutions: {}\n\
         - Soft Resolutions: {}\n\n\
         ## Detailed Analysis\n",
        stats.total,
        stats.without_queries,
        stats.with_queries,
        stats.resolution_rate,
        stats.hard,
        stats.soft,
    );

    for record in records {
        let result = &record.result;
        let query_status = if result.has_query {
            "Query Present"
        } else {
            "No Query"
        };
        let _ = write!(
            out,
            "\n### Conversation {}\n\
             **Messages:** {}\n\
             **Query Status:** {}\n\
             **Query Type:** {}\n\
             **Resolution Status:** {}\n\
             **Resolution Type:** {}\n\n\
             **Analysis:**\n\
             {}\n\n\
             ---\n",
            record.conversation_id,
            record.message_count,
            query_status,
            single_line(&result.query_type),
            result.resolution,
            result.resolution_type,
            escape_block_markers(&result.reasoning),
        );
    }

    out
}

/// Collapse free text onto one line so it stays inside its field.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Backslash-escape lines that would read as a heading, field label or
/// block separator, so detail blocks can be split back apart.
fn escape_block_markers(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') || trimmed.starts_with("**") || trimmed.starts_with("---") {
                format!("\\{trimmed}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
