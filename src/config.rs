//! Configuration parsing and validation.
//!
//! Artisync is configured with a TOML file (default
//! `./config/artisync.toml`). Every section is optional; omitted keys take
//! the defaults below. API keys are never read from the file; providers pull
//! them from the environment.
//!
//! ```toml
//! [model]
//! provider = "anthropic"          # "anthropic" | "openai" | "disabled"
//! model = "claude-sonnet-4-5"
//! max_tokens = 16000
//! timeout_secs = 120
//! max_retries = 3
//!
//! [direct]
//! max_rows = 500
//! max_text_chars = 60000
//! repair_retries = 1
//!
//! [differ]
//! cell_cap = 50
//! domain_low = 0.3
//! domain_high = 0.75
//! model_judge = true
//!
//! [classifier]
//! max_schema_changes = 3
//! model_assist = true
//!
//! [sandbox]
//! provider = "local"              # "local" | "disabled"
//! command = "claude"
//! args = ["-p", "{prompt}", "--output-format", "json", "--max-turns", "{max_turns}"]
//! max_turns = 30
//! session_timeout_secs = 900
//! command_timeout_secs = 600
//! env_passthrough = ["ANTHROPIC_API_KEY"]
//!
//! [billing]
//! output_weight = 5
//! tokens_per_credit = 1000
//!
//! [validation]
//! min_length = 200
//! ```

use anyhow::{Context, Result};
use artisync_core::billing::BillingRates;
use artisync_core::classify::ClassifierRules;
use artisync_core::diff::DiffOptions;
use artisync_core::artifact::ValidationRules;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub direct: DirectConfig,
    #[serde(default)]
    pub differ: DifferConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Override the provider's API base URL (proxies, test servers).
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            base_url: None,
        }
    }
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_tokens() -> u32 {
    16_000
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirectConfig {
    /// Larger tables skip Direct generation and go straight to the sandbox.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    #[serde(default = "default_repair_retries")]
    pub repair_retries: u32,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            max_text_chars: default_max_text_chars(),
            repair_retries: default_repair_retries(),
        }
    }
}

fn default_max_rows() -> usize {
    500
}
fn default_max_text_chars() -> usize {
    60_000
}
fn default_repair_retries() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct DifferConfig {
    #[serde(default = "default_cell_cap")]
    pub cell_cap: usize,
    #[serde(default = "default_domain_low")]
    pub domain_low: f64,
    #[serde(default = "default_domain_high")]
    pub domain_high: f64,
    /// Ask the model when the domain heuristic is ambiguous.
    #[serde(default = "default_true")]
    pub model_judge: bool,
}

impl Default for DifferConfig {
    fn default() -> Self {
        Self {
            cell_cap: default_cell_cap(),
            domain_low: default_domain_low(),
            domain_high: default_domain_high(),
            model_judge: true,
        }
    }
}

impl DifferConfig {
    pub fn options(&self) -> DiffOptions {
        DiffOptions {
            cell_cap: self.cell_cap,
            domain_low: self.domain_low,
            domain_high: self.domain_high,
        }
    }
}

fn default_cell_cap() -> usize {
    50
}
fn default_domain_low() -> f64 {
    0.3
}
fn default_domain_high() -> f64 {
    0.75
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_max_schema_changes")]
    pub max_schema_changes: usize,
    #[serde(default = "default_true")]
    pub model_assist: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_schema_changes: default_max_schema_changes(),
            model_assist: true,
        }
    }
}

impl ClassifierConfig {
    pub fn rules(&self) -> ClassifierRules {
        ClassifierRules {
            max_schema_changes: self.max_schema_changes,
        }
    }
}

fn default_max_schema_changes() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_provider")]
    pub provider: String,
    /// Parent directory for session directories. Defaults to the system temp dir.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_command")]
    pub command: String,
    /// Arguments; `{prompt}`, `{max_turns}` and `{output}` are substituted.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_output_file")]
    pub output_file: String,
    #[serde(default = "default_env_passthrough")]
    pub env_passthrough: Vec<String>,
    /// Model label recorded in artifact metadata for sandboxed runs.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            provider: default_sandbox_provider(),
            root: None,
            command: default_command(),
            args: default_args(),
            max_turns: default_max_turns(),
            session_timeout_secs: default_session_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            output_file: default_output_file(),
            env_passthrough: default_env_passthrough(),
            model: None,
        }
    }
}

fn default_sandbox_provider() -> String {
    "local".to_string()
}
fn default_command() -> String {
    "claude".to_string()
}
fn default_args() -> Vec<String> {
    ["-p", "{prompt}", "--output-format", "json", "--max-turns", "{max_turns}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_turns() -> u32 {
    30
}
fn default_session_timeout_secs() -> u64 {
    900
}
fn default_command_timeout_secs() -> u64 {
    600
}
fn default_output_file() -> String {
    "output.html".to_string()
}
fn default_env_passthrough() -> Vec<String> {
    vec!["ANTHROPIC_API_KEY".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    #[serde(default = "default_output_weight")]
    pub output_weight: u64,
    #[serde(default = "default_tokens_per_credit")]
    pub tokens_per_credit: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            output_weight: default_output_weight(),
            tokens_per_credit: default_tokens_per_credit(),
        }
    }
}

impl BillingConfig {
    pub fn rates(&self) -> BillingRates {
        BillingRates {
            output_weight: self.output_weight,
            tokens_per_credit: self.tokens_per_credit,
        }
    }
}

fn default_output_weight() -> u64 {
    5
}
fn default_tokens_per_credit() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
        }
    }
}

impl ValidationConfig {
    pub fn rules(&self) -> ValidationRules {
        ValidationRules {
            min_length: self.min_length,
        }
    }
}

fn default_min_length() -> usize {
    200
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.model.provider.as_str() {
        "disabled" | "anthropic" | "openai" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled, anthropic, or openai.",
            other
        ),
    }
    if config.model.is_enabled() && config.model.model.is_none() {
        anyhow::bail!(
            "model.model must be specified when provider is '{}'",
            config.model.provider
        );
    }
    if config.model.max_tokens == 0 {
        anyhow::bail!("model.max_tokens must be > 0");
    }
    if config.model.timeout_secs == 0 {
        anyhow::bail!("model.timeout_secs must be > 0");
    }

    let differ = &config.differ;
    if !(0.0..=1.0).contains(&differ.domain_low) || !(0.0..=1.0).contains(&differ.domain_high) {
        anyhow::bail!("differ.domain_low and differ.domain_high must be in [0.0, 1.0]");
    }
    if differ.domain_low > differ.domain_high {
        anyhow::bail!("differ.domain_low must be <= differ.domain_high");
    }

    match config.sandbox.provider.as_str() {
        "disabled" | "local" => {}
        other => anyhow::bail!(
            "Unknown sandbox provider: '{}'. Must be disabled or local.",
            other
        ),
    }
    if config.sandbox.command.trim().is_empty() {
        anyhow::bail!("sandbox.command must not be empty");
    }
    if config.sandbox.max_turns == 0 {
        anyhow::bail!("sandbox.max_turns must be > 0");
    }
    if config.sandbox.session_timeout_secs == 0 || config.sandbox.command_timeout_secs == 0 {
        anyhow::bail!("sandbox.session_timeout_secs and sandbox.command_timeout_secs must be > 0");
    }
    if config.sandbox.output_file.trim().is_empty() {
        anyhow::bail!("sandbox.output_file must not be empty");
    }
    if config.sandbox.output_file.contains("..") || config.sandbox.output_file.starts_with('/') {
        anyhow::bail!("sandbox.output_file must be a relative path inside the session");
    }

    if config.billing.tokens_per_credit == 0 {
        anyhow::bail!("billing.tokens_per_credit must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.model.provider, "disabled");
        assert_eq!(config.direct.max_rows, 500);
        assert_eq!(config.direct.repair_retries, 1);
        assert_eq!(config.differ.cell_cap, 50);
        assert_eq!(config.classifier.max_schema_changes, 3);
        assert_eq!(config.sandbox.output_file, "output.html");
        assert_eq!(config.billing.rates(), BillingRates::default());
        assert_eq!(config.validation.min_length, 200);
    }

    #[test]
    fn test_partial_sections() {
        let config = parse_config(
            r#"
            [model]
            provider = "anthropic"
            model = "claude-sonnet-4-5"

            [differ]
            domain_high = 0.9
            "#,
        )
        .unwrap();
        assert!(config.model.is_enabled());
        assert_eq!(config.model.max_retries, 3);
        assert_eq!(config.differ.options().domain_high, 0.9);
        assert_eq!(config.differ.options().domain_low, 0.3);
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let err = parse_config("[model]\nprovider = \"cohere\"\nmodel = \"x\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown model provider"));
    }

    #[test]
    fn test_enabled_provider_needs_model() {
        let err = parse_config("[model]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("model.model must be specified"));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = parse_config("[differ]\ndomain_low = 0.8\ndomain_high = 0.5\n").unwrap_err();
        assert!(err.to_string().contains("differ.domain_low must be <="));
    }

    #[test]
    fn test_rejects_escaping_output_file() {
        let err = parse_config("[sandbox]\noutput_file = \"../out.html\"\n").unwrap_err();
        assert!(err.to_string().contains("sandbox.output_file"));
    }

    #[test]
    fn test_rejects_blank_output_file() {
        let err = parse_config("[sandbox]\noutput_file = \"  \"\n").unwrap_err();
        assert!(err.to_string().contains("sandbox.output_file must not be empty"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/artisync.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
