//! Configuration types.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::pipeline::classifier::ClassifierConfig;
use crate::pipeline::normalizer::NormalizerConfig;

/// The automated support line's phone number.
pub const DEFAULT_OPERATOR_NUMBER: &str = "+14159436084";

/// System-generated notice sent when a number is provisioned.
pub const DEFAULT_ACTIVATION_NOTICE: &str = "Congratulations 🎉, your phone number is now active!";

/// Where the Markdown report lands unless overridden.
pub const DEFAULT_REPORT_PATH: &str = "conversation_analysis.md";

/// Batch run configuration.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Which judgment-service backend to call.
    pub backend: LlmBackend,
    /// Model identifier sent with each request.
    pub model: String,
    /// Operator endpoint identifier; never a counterparty.
    pub operator_number: String,
    /// Bodies containing any of these are dropped before grouping.
    pub activation_notices: Vec<String>,
    /// Upper bound on a single classification call.
    pub request_timeout: Duration,
    /// Sampling temperature for classification.
    pub temperature: f32,
    /// Max tokens for the classification response.
    pub max_tokens: u32,
    /// Report output path.
    pub report_path: PathBuf,
    /// Abort the batch on the first malformed row instead of skipping it.
    pub strict: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::OpenAi,
            model: LlmBackend::OpenAi.default_model().to_string(),
            operator_number: DEFAULT_OPERATOR_NUMBER.to_string(),
            activation_notices: vec![DEFAULT_ACTIVATION_NOTICE.to_string()],
            request_timeout: Duration::from_secs(60),
            temperature: 0.1,
            max_tokens: 1024,
            report_path: PathBuf::from(DEFAULT_REPORT_PATH),
            strict: false,
        }
    }
}
impl AnalyzerConfig {
    /// Load from process environment variables, falling back to `./.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_value)
    }

    /// Load from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(backend) = lookup("ANALYZER_BACKEND") {
            config.backend = backend.parse()?;
            config.model = config.backend.default_model().to_string();
        }

        if let Some(model) = lookup("ANALYZER_MODEL").filter(|m| !m.trim().is_empty()) {
            config.model = model.trim().to_string();
        }

        if let Some(number) = lookup("ANALYZER_OPERATOR_NUMBER").filter(|n| !n.trim().is_empty()) {
            config.operator_number = number.trim().to_string();
        }

        if let Some(secs) = lookup("ANALYZER_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "ANALYZER_TIMEOUT_SECS".to_string(),
                message: format!("expected whole seconds, got '{secs}'"),
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(path) = lookup("ANALYZER_REPORT_PATH").filter(|p| !p.trim().is_empty()) {
            config.report_path = PathBuf::from(path);
        }

        if let Some(strict) = lookup("ANALYZER_STRICT") {
            config.strict = parse_flag("ANALYZER_STRICT", &strict)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.operator_number.contains(',') {
            return Err(ConfigError::InvalidValue {
                key: "operator_number".to_string(),
                message: "must be a single identifier".to_string(),
            });
        }
        Ok(())
    }

    /// Read the backend's API key from the environment or `./.env`.
    pub fn api_key_from_env(&self) -> Result<SecretString, ConfigError> {
        self.api_key_from_lookup(env_value)
    }

    pub fn api_key_from_lookup<F>(&self, lookup: F) -> Result<SecretString, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = self.backend.api_key_var();
        lookup(var)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    }

    pub fn llm_config(&self, api_key: SecretString) -> LlmConfig {
        LlmConfig {
            backend: self.backend,
            api_key,
            model: self.model.clone(),
        }
    }

    pub fn normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            operator_number: self.operator_number.clone(),
            activation_notices: self.activation_notices.clone(),
            strict: self.strict,
        }
    }

    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: self.request_timeout,
        }
    }
}

static DOTENV_VALUES: OnceLock<HashMap<String, String>> = OnceLock::new();

/// Read a value from the process environment first, then `./.env`.
pub fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().or_else(|| {
        DOTENV_VALUES
            .get_or_init(|| load_dotenv_file(Path::new(".env")))
            .get(key)
            .cloned()
    })
}

/// Parse a dotenv file. A missing or unreadable file yields no values.
pub fn load_dotenv_file(path: &Path) -> HashMap<String, String> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            tracing::debug!(path = %path.display(), "Loaded dotenv file");
            parse_dotenv_contents(&contents)
        }
        Err(_) => HashMap::new(),
    }
}

/// `KEY=value` lines; blank lines, `#` comments and an `export ` prefix are
/// accepted. Quoted values keep their inner text verbatim.
pub fn parse_dotenv_contents(contents: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), parse_dotenv_value(value.trim()));
    }
    map
}

fn parse_dotenv_value(raw: &str) -> String {
    for quote in ['"', '\''] {
        if let Some(inner) = raw.strip_prefix(quote)
            && let Some(end) = inner.find(quote)
        {
            return inner[..end].to_string();
        }
    }
    match raw.find(" #") {
        Some(idx) => raw[..idx].trim_end().to_string(),
        None => raw.to_string(),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
