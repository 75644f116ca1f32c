use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use support_analyzer::config::AnalyzerConfig;
use support_analyzer::ingest::{load_rows, write_report};
use support_analyzer::llm::{LlmBackend, create_provider};
use support_analyzer::pipeline::analyzer::ConversationAnalyzer;
use support_analyzer::pipeline::classifier::OutcomeClassifier;
use support_analyzer::pipeline::normalizer::MessageNormalizer;

#[derive(Parser, Debug)]
#[command(name = "support-analyzer")]
#[command(
    version,
    about = "Group support SMS logs into customer threads and report how many the AI resolved",
    after_help = "The API key is read from OPENAI_API_KEY or ANTHROPIC_API_KEY depending on the backend."
)]
struct Cli {
    /// CSV export with message_body, message_timestamp and message_members columns
    input: PathBuf,

    /// Report output path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// LLM backend: openai or anthropic
    #[arg(long)]
    backend: Option<String>,

    /// Model name sent to the backend
    #[arg(long)]
    model: Option<String>,

    /// Operator (automated support line) phone number
    #[arg(long)]
    operator: Option<String>,

    /// Per-conversation classification timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Abort on the first row with an unparsable timestamp
    #[arg(long)]
    strict: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Layer command-line flags over environment configuration.
    fn apply(&self, mut config: AnalyzerConfig) -> anyhow::Result<AnalyzerConfig> {
        if let Some(ref backend) = self.backend {
            config.backend = backend.parse::<LlmBackend>()?;
            config.model = config.backend.default_model().to_string();
        }
        if let Some(ref model) = self.model {
            config.model = model.clone();
        }
        if let Some(ref operator) = self.operator {
            config.operator_number = operator.trim().to_string();
        }
        if let Some(secs) = self.timeout_secs {
            config.request_timeout = std::time::Duration::from_secs(secs);
        }
        if let Some(ref output) = self.output {
            config.report_path = output.clone();
        }
        config.strict |= self.strict;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let config = cli.apply(AnalyzerConfig::from_env()?)?;
    let api_key = config.api_key_from_env()?;
    let llm = create_provider(&config.llm_config(api_key))?;

    let analyzer = ConversationAnalyzer::new(
        MessageNormalizer::new(config.normalizer_config()),
        OutcomeClassifier::new(llm, config.classifier_config()),
    );

    let loaded = load_rows(&cli.input, config.strict)
        .with_context(|| format!("failed to load {}", cli.input.display()))?;
    let outcome = analyzer.run_loaded(loaded).await?;

    write_report(&config.report_path, &outcome.report)
        .with_context(|| format!("failed to write {}", config.report_path.display()))?;

    eprintln!(
        "Analyzed {} conversations ({} with queries, {:.1}% resolved, {} errors, {} rows skipped) in {:.1}s. Report: {}",
        outcome.stats.total,
        outcome.stats.with_queries,
        outcome.stats.resolution_rate,
        outcome.error_count(),
        outcome.summary.invalid_skipped,
        outcome.classification_time().as_secs_f64(),
        config.report_path.display()
    );

    Ok(())
}
