//! Shared types for the conversation analysis pipeline.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display format for timestamps in transcripts and conversation ids.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sentinel `query_type` for threads without a customer query.
pub const NO_QUERY: &str = "NO_QUERY";

/// Sentinel `query_type` for threads whose classification failed.
pub const ERROR: &str = "ERROR";

// ── Raw input ───────────────────────────────────────────────────────

/// One row of the exported message log, before any cleaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    /// Message text. Missing bodies are kept as empty text.
    pub message_body: Option<String>,
    /// Date-time string in one of the accepted formats.
    pub message_timestamp: String,
    /// Comma-separated endpoint identifiers.
    pub message_members: Option<String>,
    /// 1-based data row in the source export, when read from one.
    #[serde(skip)]
    pub source_row: Option<usize>,
}

impl RawRow {
    pub fn new(body: &str, timestamp: &str, members: &str) -> Self {
        Self {
            message_body: Some(body.to_string()),
            message_timestamp: timestamp.to_string(),
            message_members: Some(members.to_string()),
            source_row: None,
        }
    }
}

// ── Messages and threads ────────────────────────────────────────────

/// A cleaned message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub timestamp: DateTime<Utc>,
    pub body: String,
    /// Sent by the automated support line.
    pub is_operator: bool,
    /// Endpoint identifiers listed on the row.
    pub participants: Vec<String>,
    /// The customer side; `None` when the row has no single non-operator
    /// participant and must not be grouped.
    pub counterparty: Option<String>,
}

impl Message {
    /// Speaker label used in transcripts.
    pub fn role_label(&self) -> &'static str {
        if self.is_operator { "AI" } else { "Customer" }
    }

    /// `YYYY-MM-DD HH:MM:SS - Role: body`
    pub fn transcript_line(&self) -> String {
        format!(
            "{} - {}: {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.role_label(),
            self.body
        )
    }
}

/// All messages exchanged with one counterparty, oldest first.
///
/// Never empty: threads only come into existence with a first message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    counterparty: String,
    messages: Vec<Message>,
}

impl Thread {
    pub(crate) fn start(counterparty: String, first: Message) -> Self {
        Self {
            counterparty,
            messages: vec![first],
        }
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Build a thread from loose messages, sorting them by timestamp.
    ///
    /// Returns `None` for an empty list.
    pub fn from_messages(counterparty: impl Into<String>, mut messages: Vec<Message>) -> Option<Self> {
        if messages.is_empty() {
            return None;
        }
        messages.sort_by_key(|m| m.timestamp);
        Some(Self {
            counterparty: counterparty.into(),
            messages,
        })
    }

    pub fn counterparty(&self) -> &str {
        &self.counterparty
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn first(&self) -> &Message {
        // Non-empty by construction.
        &self.messages[0]
    }

    pub fn operator_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_operator)
    }

    pub fn has_operator_messages(&self) -> bool {
        self.messages.iter().any(|m| m.is_operator)
    }

    /// `<counterparty>-<first message timestamp>`
    pub fn conversation_id(&self) -> String {
        format!(
            "{}-{}",
            self.counterparty,
            self.first().timestamp.format(TIMESTAMP_FORMAT)
        )
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Whether the customer's query was handled by the automated side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Resolution {
    Resolved,
    Unresolved,
    NoQuery,
    Error,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolved => "RESOLVED",
            Self::Unresolved => "UNRESOLVED",
            Self::NoQuery => "NO_QUERY",
            Resolution::Error => "ERROR",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive: services answer "Resolved" as often as "RESOLVED".
impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RESOLVED" => Ok(Self::Resolved),
            "UNRESOLVED" => Ok(Self::Unresolved),
            "NO_QUERY" => Ok(Self::NoQuery),
            "ERROR" => Ok(Resolution::Error),
            _ => Err(format!("unknown resolution: '{s}'")),
        }
    }
}

impl TryFrom<String> for Resolution {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.as_str().to_string()
    }
}

/// Strength of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResolutionType {
    Hard,
    Soft,
    None,
    NoQuery,
    Error,
}

impl ResolutionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hard => "Hard",
            Self::Soft => "Soft",
            Self::None => "None",
            Self::NoQuery => "NO_QUERY",
            ResolutionType::Error => "ERROR",
        }
    }
}

impl fmt::Display for ResolutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact-case: "hard" is not a Hard resolution.
impl FromStr for ResolutionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Hard" => Ok(Self::Hard),
            "Soft" => Ok(Self::Soft),
            "None" => Ok(Self::None),
            "NO_QUERY" => Ok(Self::NoQuery),
            "ERROR" => Ok(ResolutionType::Error),
            _ => Err(format!("unknown resolution_type: '{s}'")),
        }
    }
}

impl TryFrom<String> for ResolutionType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

impl From<ResolutionType> for String {
    fn from(value: ResolutionType) -> Self {
        value.as_str().to_string()
    }
}

/// Outcome of classifying one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationResult {
    pub has_query: bool,
    pub query_type: String,
    pub resolution: Resolution,
    pub resolution_type: ResolutionType,
    pub reasoning: String,
}

impl ClassificationResult {
    /// Terminal result for threads the operator never wrote in.
    pub fn no_operator_messages() -> Self {
        Self {
            has_query: false,
            query_type: NO_QUERY.to_string(),
            resolution: Resolution::NoQuery,
            resolution_type: ResolutionType::NoQuery,
            reasoning: "No AI messages found in conversation".to_string(),
        }
    }

    /// Terminal result for a failed classification.
    pub fn error(detail: impl fmt::Display) -> Self {
        Self {
            has_query: false,
            query_type: ERROR.to_string(),
            resolution: Resolution::Error,
            resolution_type: ResolutionType::Error,
            reasoning: format!("Error analyzing conversation: {detail}"),
        }
    }

    pub fn is_error(&self) -> bool {
        self.resolution == Resolution::Error
    }
}

/// A classified thread, as it appears in the report.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRecord {
    /// `<counterparty>-<first message timestamp>`
    pub conversation_id: String,
    pub counterparty: String,
    pub message_count: usize,
    pub result: ClassificationResult,
    /// Wall time spent classifying.
    pub elapsed: Duration,
}

impl ConversationRecord {
    pub fn new(thread: &Thread, result: ClassificationResult, elapsed: Duration) -> Self {
        Self {
            conversation_id: thread.conversation_id(),
            counterparty: thread.counterparty().to_string(),
            message_count: thread.len(),
            result,
            elapsed,
        }
    }
}
