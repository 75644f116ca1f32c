//! Support Analyzer: reconstructs customer-support SMS threads and grades
//! how well the automated line resolved them.

pub mod config;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod pipeline;
