//! Provider construction from resolved settings
//!
//! The core never reads files or the environment; a composition root
//! resolves [`ProviderSettings`] and hands them here.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::community::{CommunityProxyProvider, DEFAULT_PROXY_URL};
use super::gemini::{GeminiProvider, DEFAULT_GEMINI_MODEL};
use super::ollama::{OllamaProvider, DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL};
use super::openai_compat::OpenAiCompatProvider;
use super::retry::RetryConfig;
use super::traits::Provider;

/// Adapter settings resolved by the caller
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// BYOK Gemini key; the Gemini provider is registered only when set
    pub gemini_api_key: Option<String>,

    /// Gemini model
    pub gemini_model: String,

    /// Retry policy for throttled Gemini calls
    pub gemini_retry: RetryConfig,

    /// Elevated-tier token for the community proxy
    pub auth_token: Option<String>,

    /// Whether to register the community proxy at all
    pub community_proxy: bool,

    /// Community proxy base URL
    pub proxy_url: String,

    /// Ollama base URL
    pub ollama_url: String,

    /// Ollama model
    pub ollama_model: String,

    /// OpenAI-compatible server base URL (e.g. `http://localhost:1234/v1`)
    pub openai_compat_url: Option<String>,

    /// OpenAI-compatible model; the provider is registered only with a URL and a model
    pub openai_compat_model: Option<String>,

    /// Optional bearer token for the OpenAI-compatible server
    pub openai_compat_api_key: Option<String>,

    /// Per-call timeout applied to every adapter, overriding their defaults
    pub request_timeout_secs: Option<u64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_retry: RetryConfig::default(),
            auth_token: None,
            community_proxy: true,
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            openai_compat_url: None,
            openai_compat_model: None,
            openai_compat_api_key: None,
            request_timeout_secs: None,
        }
    }
}

fn redact(secret: Option<&String>) -> &'static str {
    if secret.is_some() {
        "Some(<redacted>)"
    } else {
        "None"
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("gemini_api_key", &redact(self.gemini_api_key.as_ref()))
            .field("gemini_model", &self.gemini_model)
            .field("gemini_retry", &self.gemini_retry)
            .field("auth_token", &redact(self.auth_token.as_ref()))
            .field("community_proxy", &self.community_proxy)
            .field("proxy_url", &self.proxy_url)
            .field("ollama_url", &self.ollama_url)
            .field("ollama_model", &self.ollama_model)
            .field("openai_compat_url", &self.openai_compat_url)
            .field("openai_compat_model", &self.openai_compat_model)
            .field("openai_compat_api_key", &redact(self.openai_compat_api_key.as_ref()))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ProviderSettings {
    fn timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Build the Gemini adapter, if a key is configured
    #[must_use]
    pub fn gemini(&self) -> Option<GeminiProvider> {
        let key = self.gemini_api_key.clone().filter(|k| !k.trim().is_empty())?;
        let provider = GeminiProvider::new(Some(key), self.gemini_model.clone())
            .with_retry(self.gemini_retry.clone());
        Some(match self.timeout() {
            Some(t) => provider.with_timeout(t),
            None => provider,
        })
    }

    /// Build the community proxy adapter, if enabled
    #[must_use]
    pub fn community_proxy(&self) -> Option<CommunityProxyProvider> {
        if !self.community_proxy {
            return None;
        }
        let provider = CommunityProxyProvider::new(self.proxy_url.clone(), self.auth_token.clone());
        Some(match self.timeout() {
            Some(t) => provider.with_timeout(t),
            None => provider,
        })
    }

    /// Build the Ollama adapter
    #[must_use]
    pub fn ollama(&self) -> OllamaProvider {
        let provider = OllamaProvider::new(self.ollama_url.clone(), self.ollama_model.clone());
        match self.timeout() {
            Some(t) => provider.with_timeout(t),
            None => provider,
        }
    }

    /// Build the OpenAI-compatible adapter, if a URL and model are configured
    #[must_use]
    pub fn openai_compat(&self) -> Option<OpenAiCompatProvider> {
        let url = self.openai_compat_url.clone().filter(|u| !u.trim().is_empty())?;
        let model = self.openai_compat_model.clone().filter(|m| !m.trim().is_empty())?;

        let mut provider = OpenAiCompatProvider::new(url, model);
        if let Some(ref key) = self.openai_compat_api_key {
            provider = provider.with_api_key(key.clone());
        }
        Some(match self.timeout() {
            Some(t) => provider.with_timeout(t),
            None => provider,
        })
    }
}

/// Build the provider set in registration order
///
/// BYOK first (when a key is set), then the community proxy, the local
/// Ollama server, and finally the OpenAI-compatible server when configured.
#[must_use]
pub fn providers_from_settings(settings: &ProviderSettings) -> Vec<Arc<dyn Provider>> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    if let Some(gemini) = settings.gemini() {
        providers.push(Arc::new(gemini));
    }
    if let Some(proxy) = settings.community_proxy() {
        providers.push(Arc::new(proxy));
    }
    providers.push(Arc::new(settings.ollama()));
    if let Some(compat) = settings.openai_compat() {
        providers.push(Arc::new(compat));
    }

    providers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::ProviderTier;

    fn names(providers: &[Arc<dyn Provider>]) -> Vec<String> {
        providers.iter().map(|p| p.name().to_string()).collect()
    }

    #[test]
    fn test_default_settings_register_proxy_and_ollama() {
        let providers = providers_from_settings(&ProviderSettings::default());
        assert_eq!(names(&providers), vec!["community-proxy", "ollama"]);
        assert_eq!(providers[0].tier(), ProviderTier::Anonymous);
    }

    #[test]
    fn test_full_settings_register_everything_in_order() {
        let settings = ProviderSettings {
            gemini_api_key: Some("key".into()),
            auth_token: Some("tok".into()),
            openai_compat_url: Some("http://localhost:1234/v1".into()),
            openai_compat_model: Some("qwen".into()),
            ..ProviderSettings::default()
        };

        let providers = providers_from_settings(&settings);
        assert_eq!(
            names(&providers),
            vec!["gemini", "community-proxy", "ollama", "openai_compat"]
        );
        assert_eq!(providers[1].tier(), ProviderTier::Authenticated);
    }

    #[test]
    fn test_openai_compat_needs_model() {
        let settings = ProviderSettings {
            openai_compat_url: Some("http://localhost:1234/v1".into()),
            ..ProviderSettings::default()
        };
        assert!(settings.openai_compat().is_none());
    }

    #[test]
    fn test_proxy_can_be_disabled() {
        let settings = ProviderSettings {
            community_proxy: false,
            ..ProviderSettings::default()
        };
        assert_eq!(names(&providers_from_settings(&settings)), vec!["ollama"]);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = ProviderSettings {
            gemini_api_key: Some("super-secret".into()),
            ..ProviderSettings::default()
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
