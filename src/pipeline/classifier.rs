//! Outcome classifier: decides whether a thread held a customer query and
//! whether the automated side resolved it on its own.
//!
//! Flow per thread:
//! 1. No operator messages → `NO_QUERY` without calling the LLM
//! 2. Render full and operator-only transcripts
//! 3. LLM judgment under a fixed decision policy → structured JSON
//! 4. Any failure (call, timeout, parse) → `ERROR` result; never fatal

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ClassificationError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{
    ClassificationResult, Message, Resolution, ResolutionType, Thread,
};

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Near-deterministic judgments.
    pub temperature: f32,
    pub max_tokens: u32,
    /// Upper bound on one LLM call; expiry becomes an `ERROR` result.
    pub timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 1024,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Classifies one thread at a time through an `LlmProvider`.
pub struct OutcomeClassifier {
    llm: Arc<dyn LlmProvider>,
    config: ClassifierConfig,
}

impl OutcomeClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, config: ClassifierConfig) -> Self {
        Self { llm, config }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Classify a thread. Always yields a result.
    pub async fn classify(&self, thread: &Thread) -> ClassificationResult {
        if !thread.has_operator_messages() {
            debug!(
                counterparty = %thread.counterparty(),
                "No operator messages, skipping LLM judgment"
            );
            return ClassificationResult::no_operator_messages();
        }

        match self.judge(thread).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    counterparty = %thread.counterparty(),
                    error = %e,
                    "Classification failed, recording ERROR"
                );
                ClassificationResult::error(e)
            }
        }
    }

    async fn judge(&self, thread: &Thread) -> Result<ClassificationResult, ClassificationError> {
        let full = format_transcript(thread.messages().iter());
        let operator_only = format_transcript(thread.operator_messages());

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(build_user_prompt(&full, &operator_only)),
        ])
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        let response = tokio::time::timeout(self.config.timeout, self.llm.complete(request))
            .await
            .map_err(|_| ClassificationError::Timeout(self.config.timeout))??;

        parse_classification_response(&response.content).map_err(|e| {
            warn!(
                raw_response = %response.content,
                error = %e,
                "Failed to parse classification response"
            );
            ClassificationError::Parse(e)
        })
    }
}

// ── Transcripts ─────────────────────────────────────────────────────

/// One `timestamp - Role: body` line per message.
pub fn format_transcript<'a>(messages: impl Iterator<Item = &'a Message>) -> String {
    messages
        .map(Message::transcript_line)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Prompt construction ─────────────────────────────────────────────

/// Decision policy given to the judgment service.
fn build_system_prompt() -> String {
    "You are an expert at analyzing customer service conversations between an automated AI \
     support line and a customer. Decide whether the AI successfully handled the customer query.\n\
     Be generous in identifying resolutions: if the AI provided helpful information and the \
     customer did not indicate dissatisfaction, consider it resolved.\n\n\
     You MUST respond with ONLY a JSON object with this exact structure:\n\
     {\"has_query\": boolean, \"query_type\": string, \
     \"resolution\": \"RESOLVED\" | \"UNRESOLVED\" | \"NO_QUERY\", \
     \"resolution_type\": \"Hard\" | \"Soft\" | \"None\" | \"NO_QUERY\", \"reasoning\": string}\n\n\
     Remember:\n\
     - If the AI provides clear information and the customer acknowledges or does not express \
     dissatisfaction, mark RESOLVED with Soft resolution\n\
     - If the customer explicitly confirms the solution worked, mark RESOLVED with Hard resolution\n\
     - Mark UNRESOLVED if the AI clearly failed to help or had to escalate to a human"
        .to_string()
}

/// User instruction embedding both transcripts.
fn build_user_prompt(full_transcript: &str, operator_transcript: &str) -> String {
    let mut prompt = String::with_capacity(2048 + full_transcript.len() + operator_transcript.len());

    prompt.push_str(
        "Analyze this conversation and determine:\n\
         1. If there is a customer query\n\
         2. If present, whether the query was resolved by the AI\n\n\
         Rules:\n\
         1. First determine if there is a clear customer query or question\n\
         2. If no query exists, set has_query to false, query_type to \"NO_QUERY\", and both \
         resolution and resolution_type to \"NO_QUERY\"\n\
         3. If a query exists, determine if the AI resolved it without human intervention\n\n\
         RESOLVED (the AI must do one of these without human help):\n\
         - AI provides a complete answer and the customer confirms satisfaction\n\
         - AI solves the technical issue and the customer confirms it works\n\
         - AI answers the question and the customer acknowledges understanding\n\n\
         The following do NOT count as AI resolution:\n\
         - AI assigns the conversation to a human agent\n\
         - AI asks for more information then hands off to a human\n\
         - A human agent provides the actual solution\n\
         Any escalation to a human is UNRESOLVED, even if the human later solved the problem.\n\n\
         Resolution types:\n\
         RESOLVED with Hard resolution:\n\
         - Customer explicitly confirms the AI's answer helped or the solution worked\n\
         - Customer expresses satisfaction with the AI's response\n\
         Example: \"Thanks, that worked!\" or \"Perfect, exactly what I needed\"\n\n\
         RESOLVED with Soft resolution:\n\
         - The AI gave a complete answer and the customer did not follow up with dissatisfaction\n\
         - Customer exits silently or acknowledges neutrally (\"ok\", \"thanks\")\n\
         - No human intervention needed\n\n\
         UNRESOLVED (resolution_type \"None\"):\n\
         - AI hands off to human support\n\
         - Customer explicitly expresses dissatisfaction\n\
         - Problem clearly persists after the AI's attempt\n\
         - AI admits it cannot help\n\
         - A human agent provides the actual resolution\n\n",
    );

    prompt.push_str("Full Conversation (for context):\n");
    prompt.push_str(full_transcript);
    prompt.push_str("\n\nAI Messages to Analyze:\n");
    prompt.push_str(operator_transcript);

    prompt.push_str(
        "\n\nFocus on the AI responses. Determine if the AI alone handled and resolved the \
         query, or if human intervention was needed or requested.\n\n\
         Respond ONLY with a JSON object containing exactly these fields:\n\
         - has_query: true/false\n\
         - query_type: what the customer was asking about (or \"NO_QUERY\")\n\
         - resolution: \"RESOLVED\", \"UNRESOLVED\", or \"NO_QUERY\"\n\
         - resolution_type: \"Hard\", \"Soft\", \"None\", or \"NO_QUERY\"\n\
         - reasoning: detailed explanation of your analysis",
    );

    prompt
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse the judgment service output into a `ClassificationResult`.
///
/// The `ERROR` sentinels are reserved for local failures and rejected here.
fn parse_classification_response(raw: &str) -> Result<ClassificationResult, String> {
    let json_str = extract_json_object(raw);
    let result: ClassificationResult =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    if result.resolution == Resolution::Error {
        return Err("resolution 'ERROR' is not a valid judgment".into());
    }
    if result.resolution_type == ResolutionType::Error {
        return Err("resolution_type 'ERROR' is not a valid judgment".into());
    }

    Ok(result)
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    // Already a JSON object
    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    // Wrapped in markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    // Try to find object bounds
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
