//! Conversation analysis pipeline.
//!
//! Raw rows flow strictly through:
//! 1. `MessageNormalizer::normalize()`: drop notices, parse, derive roles
//! 2. `group_conversations()`: per-counterparty threads
//! 3. `OutcomeClassifier::classify()`: LLM judgment per thread
//! 4. `render_report()`: overview statistics and per-thread detail
//!
//! `ConversationAnalyzer` runs the steps in order for a batch.

pub mod analyzer;
pub mod classifier;
pub mod grouper;
pub mod normalizer;
pub mod report;
pub mod types;
