//! Configuration loading for the `llm-router` binary
//!
//! The router core never touches files or the environment. This module
//! resolves a [`RouterConfig`] for it.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. Command-line flags
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! The file lives at `$XDG_CONFIG_HOME/llm-router/config.toml` (typically
//! `~/.config/llm-router/config.toml`). A missing file is fine; a file that
//! fails to parse is an error.
//!
//! # Example Configuration
//!
//! ```toml
//! [router]
//! preferred_provider = "ollama"
//! prefer_local = true
//! enable_fallback = true
//! probe_timeout_ms = 10000
//! rate_limit_ttl_secs = 60
//! request_timeout_secs = 90
//!
//! [gemini]
//! api_key = "AIza..."
//! model = "gemini-1.5-flash"
//!
//! [proxy]
//! url = "https://api.rocket-cli.dev"
//! auth_token = "..."
//!
//! [ollama]
//! url = "http://localhost:11434"
//! model = "llama3.2"
//!
//! [openai_compat]
//! url = "http://localhost:1234/v1"
//! model = "qwen2.5-7b-instruct"
//! ```

use std::path::{Path, PathBuf};

use router_core::RouterConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Where the last applied layer of configuration came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line flag
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Built-in default
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[router]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterToml {
    /// Provider to try first
    pub preferred_provider: Option<String>,
    /// Promote local providers ahead of the shared tiers
    pub prefer_local: Option<bool>,
    /// Try the next provider after a failure
    pub enable_fallback: Option<bool>,
    /// Liveness probe timeout
    pub probe_timeout_ms: Option<u64>,
    /// Quota snapshot TTL
    pub rate_limit_ttl_secs: Option<u64>,
    /// Per-call timeout applied to every adapter
    pub request_timeout_secs: Option<u64>,
}

/// `[gemini]` section
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiToml {
    /// BYOK key
    pub api_key: Option<String>,
    /// Model name
    pub model: Option<String>,
}

/// `[proxy]` section
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyToml {
    /// Register the community proxy at all
    pub enabled: Option<bool>,
    /// Base URL
    pub url: Option<String>,
    /// Elevated-tier token
    pub auth_token: Option<String>,
}

/// `[ollama]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaToml {
    /// Server URL
    pub url: Option<String>,
    /// Model name
    pub model: Option<String>,
}

/// `[openai_compat]` section
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiCompatToml {
    /// Base URL including the `/v1` prefix
    pub url: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Optional bearer token
    pub api_key: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigToml {
    /// Routing behavior
    pub router: RouterToml,
    /// BYOK Gemini adapter
    pub gemini: GeminiToml,
    /// Community proxy adapter
    pub proxy: ProxyToml,
    /// Local Ollama adapter
    pub ollama: OllamaToml,
    /// OpenAI-compatible adapter
    pub openai_compat: OpenAiCompatToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved configuration for one invocation
#[derive(Clone, Debug, Default)]
pub struct CliConfig {
    /// Settings handed to the router
    pub router: RouterConfig,
    /// Config file that was loaded, if any
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl CliConfig {
    /// The last layer that changed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }
}

/// Flag overrides from the command line
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    /// `--provider NAME`
    pub provider: Option<String>,
    /// `--prefer-local`
    pub prefer_local: bool,
    /// `--no-fallback`
    pub no_fallback: bool,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// `$XDG_CONFIG_HOME/llm-router/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("llm-router").join("config.toml"))
}

/// Load every layer for this process
///
/// An explicit `path` must exist; the default path may be missing.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed, or if the
/// resolved values are invalid.
pub fn load_config(path: Option<&Path>, overrides: &CliOverrides) -> Result<CliConfig, ConfigError> {
    let explicit = path.is_some();
    let path = path.map(Path::to_path_buf).or_else(default_config_path);

    if explicit {
        if let Some(ref p) = path {
            if !p.exists() {
                return Err(ConfigError::ReadError {
                    path: p.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
                });
            }
        }
    }

    let mut config = load_config_from_path(path, |key| std::env::var(key).ok())?;
    apply_cli_overrides(&mut config, overrides);
    validate(&config)?;
    Ok(config)
}

/// Load the file (if present) and apply environment overrides from `env`
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_from_path<F>(path: Option<PathBuf>, env: F) -> Result<CliConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = CliConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ConfigToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(path = %config_path.display(), "Config file not found, using defaults");
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

fn apply_toml_config(config: &mut CliConfig, toml: &ConfigToml) {
    let router = &mut config.router;

    if toml.router.preferred_provider.is_some() {
        router.preferred_provider.clone_from(&toml.router.preferred_provider);
    }
    if let Some(prefer_local) = toml.router.prefer_local {
        router.prefer_local = prefer_local;
    }
    if let Some(enabled) = toml.router.enable_fallback {
        router.enable_fallback = enabled;
    }
    if let Some(ms) = toml.router.probe_timeout_ms {
        router.probe_timeout_ms = ms;
    }
    if let Some(secs) = toml.router.rate_limit_ttl_secs {
        router.rate_limit_ttl_secs = secs;
    }
    if toml.router.request_timeout_secs.is_some() {
        router.providers.request_timeout_secs = toml.router.request_timeout_secs;
    }

    let providers = &mut router.providers;

    if toml.gemini.api_key.is_some() {
        providers.gemini_api_key.clone_from(&toml.gemini.api_key);
    }
    if let Some(ref model) = toml.gemini.model {
        providers.gemini_model.clone_from(model);
    }

    if let Some(enabled) = toml.proxy.enabled {
        providers.community_proxy = enabled;
    }
    if let Some(ref url) = toml.proxy.url {
        providers.proxy_url.clone_from(url);
    }
    if toml.proxy.auth_token.is_some() {
        providers.auth_token.clone_from(&toml.proxy.auth_token);
    }

    if let Some(ref url) = toml.ollama.url {
        providers.ollama_url.clone_from(url);
    }
    if let Some(ref model) = toml.ollama.model {
        providers.ollama_model.clone_from(model);
    }

    if toml.openai_compat.url.is_some() {
        providers.openai_compat_url.clone_from(&toml.openai_compat.url);
    }
    if toml.openai_compat.model.is_some() {
        providers.openai_compat_model.clone_from(&toml.openai_compat.model);
    }
    if toml.openai_compat.api_key.is_some() {
        providers.openai_compat_api_key.clone_from(&toml.openai_compat.api_key);
    }
}

fn truthy(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

fn apply_env_config<F>(config: &mut CliConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut touched = false;
    let router = &mut config.router;

    if let Some(key) = env("GEMINI_API_KEY") {
        router.providers.gemini_api_key = Some(key);
        touched = true;
    }
    if let Some(token) = env("ROUTER_AUTH_TOKEN") {
        router.providers.auth_token = Some(token);
        touched = true;
    }
    if let Some(url) = env("ROUTER_PROXY_URL") {
        router.providers.proxy_url = url;
        touched = true;
    }
    if let Some(url) = env("OLLAMA_URL") {
        router.providers.ollama_url = url;
        touched = true;
    }
    if let Some(model) = env("OLLAMA_MODEL") {
        router.providers.ollama_model = model;
        touched = true;
    }
    if let Some(url) = env("OPENAI_COMPAT_URL") {
        router.providers.openai_compat_url = Some(url);
        touched = true;
    }
    if let Some(model) = env("OPENAI_COMPAT_MODEL") {
        router.providers.openai_compat_model = Some(model);
        touched = true;
    }
    if let Some(key) = env("OPENAI_COMPAT_API_KEY") {
        router.providers.openai_compat_api_key = Some(key);
        touched = true;
    }
    if let Some(name) = env("ROUTER_PREFERRED_PROVIDER") {
        router.preferred_provider = Some(name);
        touched = true;
    }
    if let Some(value) = env("ROUTER_PREFER_LOCAL") {
        router.prefer_local = truthy(&value);
        touched = true;
    }
    if let Some(value) = env("ROUTER_NO_FALLBACK") {
        router.enable_fallback = !truthy(&value);
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
}

/// Apply command-line flags on top of everything else
pub fn apply_cli_overrides(config: &mut CliConfig, overrides: &CliOverrides) {
    if let Some(ref provider) = overrides.provider {
        config.router.preferred_provider = Some(provider.clone());
        config.source = ConfigSource::Cli;
    }
    if overrides.prefer_local {
        config.router.prefer_local = true;
        config.source = ConfigSource::Cli;
    }
    if overrides.no_fallback {
        config.router.enable_fallback = false;
        config.source = ConfigSource::Cli;
    }
}

fn validate(config: &CliConfig) -> Result<(), ConfigError> {
    let router = &config.router;

    if router.probe_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "probe_timeout_ms must be greater than zero".to_string(),
        ));
    }
    if router.providers.request_timeout_secs == Some(0) {
        return Err(ConfigError::ValidationError(
            "request_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if router
        .preferred_provider
        .as_deref()
        .is_some_and(|p| p.trim().is_empty())
    {
        return Err(ConfigError::ValidationError(
            "preferred_provider must not be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config =
            load_config_from_path(Some(PathBuf::from("/nonexistent/config.toml")), no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert_eq!(config.router, RouterConfig::default());
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_file_values_applied() {
        let file = write_toml(
            r#"
[router]
preferred_provider = "ollama"
prefer_local = true
request_timeout_secs = 30

[gemini]
api_key = "from-file"

[proxy]
enabled = false

[ollama]
model = "qwen2.5"

[openai_compat]
url = "http://localhost:1234/v1"
model = "qwen"
"#,
        );

        let config = load_config_from_path(Some(file.path().to_path_buf()), no_env).unwrap();
        let router = &config.router;

        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(router.preferred_provider.as_deref(), Some("ollama"));
        assert!(router.prefer_local);
        assert!(router.enable_fallback);
        assert_eq!(router.providers.request_timeout_secs, Some(30));
        assert_eq!(router.providers.gemini_api_key.as_deref(), Some("from-file"));
        assert!(!router.providers.community_proxy);
        assert_eq!(router.providers.ollama_model, "qwen2.5");
        assert_eq!(
            router.providers.openai_compat_url.as_deref(),
            Some("http://localhost:1234/v1")
        );
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let file = write_toml("[router\nprefer_local = ");
        let err = load_config_from_path(Some(file.path().to_path_buf()), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml("[gemini]\napi_key = \"from-file\"\n");
        let env: HashMap<&str, &str> = [
            ("GEMINI_API_KEY", "from-env"),
            ("ROUTER_NO_FALLBACK", "1"),
            ("ROUTER_PREFER_LOCAL", "false"),
            ("OLLAMA_URL", "http://gpu-box:11434"),
        ]
        .into_iter()
        .collect();

        let config = load_config_from_path(Some(file.path().to_path_buf()), |k| {
            env.get(k).map(|v| (*v).to_string())
        })
        .unwrap();

        assert_eq!(config.source(), ConfigSource::Env);
        assert_eq!(config.router.providers.gemini_api_key.as_deref(), Some("from-env"));
        assert!(!config.router.enable_fallback);
        assert!(!config.router.prefer_local);
        assert_eq!(config.router.providers.ollama_url, "http://gpu-box:11434");
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = load_config_from_path(None, |k| {
            (k == "ROUTER_PREFERRED_PROVIDER").then(|| "gemini".to_string())
        })
        .unwrap();
        assert_eq!(config.router.preferred_provider.as_deref(), Some("gemini"));

        apply_cli_overrides(
            &mut config,
            &CliOverrides {
                provider: Some("ollama".into()),
                prefer_local: true,
                no_fallback: true,
            },
        );

        assert_eq!(config.source(), ConfigSource::Cli);
        assert_eq!(config.router.preferred_provider.as_deref(), Some("ollama"));
        assert!(config.router.prefer_local);
        assert!(!config.router.enable_fallback);
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let err = load_config(
            Some(Path::new("/nonexistent/llm-router.toml")),
            &CliOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_validation() {
        let mut config = CliConfig::default();
        assert!(validate(&config).is_ok());

        config.router.probe_timeout_ms = 0;
        assert!(matches!(validate(&config), Err(ConfigError::ValidationError(_))));

        config.router.probe_timeout_ms = 100;
        config.router.preferred_provider = Some("  ".into());
        assert!(matches!(validate(&config), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::File.to_string(), "config file");
    }
}
