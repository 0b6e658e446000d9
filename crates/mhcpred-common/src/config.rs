//! Predictor configuration.
//!
//! Everything a backend needs (executable locations, service URLs, timeouts,
//! retry counts) is supplied here at construction time. Nothing is read from
//! the process environment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Complete predictor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictorOptions {
    /// Batching, concurrency, timeout and retry behaviour
    #[serde(default)]
    pub execution: ExecutionOptions,

    /// Settings for locally installed command-line predictors
    #[serde(default)]
    pub local: LocalToolOptions,

    /// Settings for remote prediction services
    #[serde(default)]
    pub remote: RemoteServiceOptions,
}

// ── Execution ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Maximum number of invocations in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-invocation timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Peptide lengths to score. Empty means the backend's defaults.
    #[serde(default)]
    pub peptide_lengths: Vec<usize>,

    /// Caps applied on top of the backend's own batch limits
    #[serde(default)]
    pub max_peptides_per_call: Option<usize>,
    #[serde(default)]
    pub max_alleles_per_call: Option<usize>,
    #[serde(default)]
    pub max_sequences_per_call: Option<usize>,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_concurrency() -> usize { 4 }
fn default_timeout_secs() -> u64 { 600 }

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            peptide_lengths: Vec::new(),
            max_peptides_per_call: None,
            max_alleles_per_call: None,
            max_sequences_per_call: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl ExecutionOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per invocation, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 500 }
fn default_max_backoff_ms() -> u64 { 30_000 }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0 = first retry).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(16));
        let ms = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Upper bound on any single wait between attempts.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

// ── Local tools ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalToolOptions {
    /// Explicit path to the executable. Takes precedence over `search_path`.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Directories searched, in order, for the tool's default program name
    #[serde(default)]
    pub search_path: Vec<PathBuf>,

    /// Root of the tool's data bundle, exported to the child as the tool's home variable
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Parent directory for per-invocation scratch space
    #[serde(default)]
    pub tmp_dir: Option<PathBuf>,

    /// `HOME` for the child process
    #[serde(default)]
    pub home_dir: Option<PathBuf>,

    /// Additional environment overrides scoped to each invocation
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Extra command-line flags appended to every invocation
    #[serde(default)]
    pub extra_flags: Vec<String>,
}

// ── Remote services ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteServiceOptions {
    /// Service root; the class I/II endpoint path is appended
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String { "http://tools-api.iedb.org/tools_api/".to_string() }
fn default_user_agent() -> String { concat!("mhcpred/", env!("CARGO_PKG_VERSION")).to_string() }

impl Default for RemoteServiceOptions {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            headers: BTreeMap::new(),
            user_agent: default_user_agent(),
        }
    }
}

// ── Helper Methods ───────────────────────────────────────────────────────────

impl PredictorOptions {
    /// Load from YAML file
    pub fn from_yaml(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let options: Self = serde_yaml::from_str(&content)?;
        Ok(options)
    }

    /// Load from TOML file
    pub fn from_toml(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let options: Self = toml::from_str(&content)?;
        Ok(options)
    }

    /// Load from JSON file
    pub fn from_json(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let options: Self = serde_json::from_str(&content)?;
        Ok(options)
    }

    /// Save to YAML file
    pub fn to_yaml(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
