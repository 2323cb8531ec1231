//! Application configuration for SubjectScan.
//!
//! User config lives at `~/.subjectscan/subjectscan.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "subjectscan.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".subjectscan";

// ---------------------------------------------------------------------------
// Config structs (matching subjectscan.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Web search API settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// LLM text-completion settings.
    #[serde(default)]
    pub llm: LlmConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding the database and exports (`~` is expanded).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// API-call budget per scan when none is given.
    #[serde(default = "default_budget")]
    pub budget: u32,

    /// Timeframe descriptor used when none is given.
    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    /// How many learned keywords to suggest.
    #[serde(default = "default_suggestion_count")]
    pub suggestion_count: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            budget: default_budget(),
            timeframe: default_timeframe(),
            suggestion_count: default_suggestion_count(),
        }
    }
}

fn default_data_dir() -> String {
    "~/.subjectscan/data".into()
}
fn default_budget() -> u32 {
    50
}
fn default_timeframe() -> String {
    "30 days".into()
}
fn default_suggestion_count() -> usize {
    10
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Name of the env var holding the search API key (never store the key itself).
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Name of the env var holding the search-context (engine) identifier.
    #[serde(default = "default_engine_id_env")]
    pub engine_id_env: String,

    /// Search endpoint.
    #[serde(default = "default_search_url")]
    pub base_url: String,

    /// Pages fetched per keyword batch at most.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Keywords OR-joined into one query.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between consecutive search calls.
    #[serde(default = "default_request_interval")]
    pub request_interval_ms: u64,

    /// Pause before retrying a failed page.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// HTTP timeout per search call.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Explicit keyword lists are truncated to this many entries.
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            engine_id_env: default_engine_id_env(),
            base_url: default_search_url(),
            max_pages: default_max_pages(),
            batch_size: default_batch_size(),
            request_interval_ms: default_request_interval(),
            retry_backoff_ms: default_retry_backoff(),
            timeout_secs: default_search_timeout(),
            max_keywords: default_max_keywords(),
        }
    }
}

fn default_search_key_env() -> String {
    "GOOGLE_API_KEY".into()
}
fn default_engine_id_env() -> String {
    "SEARCH_ENGINE_ID".into()
}
fn default_search_url() -> String {
    "https://www.googleapis.com/customsearch/v1".into()
}
fn default_max_pages() -> u32 {
    10
}
fn default_batch_size() -> usize {
    1
}
fn default_request_interval() -> u64 {
    2000
}
fn default_retry_backoff() -> u64 {
    2000
}
fn default_search_timeout() -> u64 {
    30
}
fn default_max_keywords() -> usize {
    10
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API base (`/chat/completions` is appended).
    #[serde(default = "default_llm_url")]
    pub base_url: String,

    /// Model used for keyword generation.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_key_env(),
            base_url: default_llm_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_llm_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "openai/gpt-3.5-turbo".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    400
}
fn default_llm_timeout() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Scan settings (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime orchestrator knobs, merged from the config file and CLI flags.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Pages fetched per batch at most.
    pub max_pages: u32,
    /// Keywords per OR-joined query.
    pub batch_size: usize,
    /// Pause between consecutive search calls.
    pub request_interval: Duration,
    /// Pause before retrying a failed page.
    pub retry_backoff: Duration,
    /// Cap for explicit keyword lists.
    pub max_keywords: usize,
    /// Budget used when a request does not carry one.
    pub default_budget: u32,
    /// Number of suggestions returned by the keyword suggestion API.
    pub suggestion_count: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ScanSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_pages: config.search.max_pages,
            batch_size: config.search.batch_size.max(1),
            request_interval: Duration::from_millis(config.search.request_interval_ms),
            retry_backoff: Duration::from_millis(config.search.retry_backoff_ms),
            max_keywords: config.search.max_keywords,
            default_budget: config.defaults.budget,
            suggestion_count: config.defaults.suggestion_count,
        }
    }
}

/// Endpoint settings for the search client. Credentials are resolved from the env.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub base_url: String,
    pub api_key: String,
    pub engine_id: String,
    pub timeout: Duration,
}

impl SearchSettings {
    /// Resolve settings from config, reading credentials from the named env vars.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.search.base_url.clone(),
            api_key: read_secret(&config.search.api_key_env, "search API key")?,
            engine_id: read_secret(&config.search.engine_id_env, "search engine ID")?,
            timeout: Duration::from_secs(config.search.timeout_secs),
        })
    }
}

/// Endpoint and sampling settings for the completion client.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl LlmSettings {
    /// Resolve settings from config, reading the API key from the named env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.llm.base_url.clone(),
            api_key: read_secret(&config.llm.api_key_env, "LLM API key")?,
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            timeout: Duration::from_secs(config.llm.timeout_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.subjectscan/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| ScanError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.subjectscan/subjectscan.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ScanError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ScanError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ScanError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config).map_err(|e| ScanError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ScanError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve `defaults.data_dir`, expanding a leading `~/`.
pub fn resolve_data_dir(config: &AppConfig) -> Result<PathBuf> {
    expand_home(&config.defaults.data_dir)
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ScanError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

/// Read a required secret from the env var named by `var_name`.
pub fn read_secret(var_name: &str, what: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ScanError::config(format!(
            "{what} not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that the search and LLM credentials are present in the environment.
pub fn validate_credentials(config: &AppConfig) -> Result<()> {
    read_secret(&config.search.api_key_env, "search API key")?;
    read_secret(&config.search.engine_id_env, "search engine ID")?;
    read_secret(&config.llm.api_key_env, "LLM API key")?;
    Ok(())
}
