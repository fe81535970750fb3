//! Service configuration.
//!
//! Loaded from an optional YAML file (`RELAY_CONFIG`) and then overridden by
//! environment variables. Every field has a default, so an empty file (or none)
//! yields a runnable proxy pointing at the default upstream.
//!
//! ```yaml
//! listen_addr: "0.0.0.0:8787"
//! upstream:
//!   base_url: "https://api.openai.com/v1"
//!   chat_path: "/chat/completions"
//! proxy:
//!   path: "/v1/chat/completions"
//!   provider_max_tokens: 40000
//!   budget_ms: 120000
//! edge:
//!   path: "/edge/chat/completions"
//!   provider_max_tokens: 8192
//!   budget_ms: 25000
//!   mode: passthrough
//! ```

use crate::normalize::{RequestNormalizer, EDGE_MAX_TOKENS, PROXY_MAX_TOKENS};
use crate::relay::RelayMode;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const SOURCE: &str = "config_loader";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub upstream: UpstreamConfig,
    pub proxy: RouteProfile,
    pub edge: RouteProfile,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8787".to_string(),
            upstream: UpstreamConfig::default(),
            proxy: RouteProfile::proxy(),
            edge: RouteProfile::edge(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub chat_path: String,
    /// Never written back out when the config is serialized.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub connect_timeout_secs: u64,
    pub proxy_url: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            chat_path: "/chat/completions".to_string(),
            api_key: None,
            connect_timeout_secs: 10,
            proxy_url: None,
        }
    }
}

impl UpstreamConfig {
    /// Full URL of the chat-completions endpoint.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.chat_path.trim_start_matches('/')
        )
    }
}

/// Settings of one relay endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteProfile {
    pub path: String,
    pub provider_max_tokens: u32,
    pub budget_ms: u64,
    #[serde(default)]
    pub mode: RelayMode,
}

impl RouteProfile {
    /// Long-lived proxy deployment.
    pub fn proxy() -> Self {
        Self {
            path: "/v1/chat/completions".to_string(),
            provider_max_tokens: PROXY_MAX_TOKENS,
            budget_ms: 120_000,
            mode: RelayMode::Lines,
        }
    }

    /// Short-timeout edge deployment.
    pub fn edge() -> Self {
        Self {
            path: "/edge/chat/completions".to_string(),
            provider_max_tokens: EDGE_MAX_TOKENS,
            budget_ms: 25_000,
            mode: RelayMode::Lines,
        }
    }

    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    pub fn normalizer(&self) -> RequestNormalizer {
        RequestNormalizer::new(self.provider_max_tokens)
    }
}

impl RelayConfig {
    /// File (if `RELAY_CONFIG` is set), then environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("RELAY_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                "cannot read config file",
                ErrorContext::new()
                    .with_field_path(path.display().to_string())
                    .with_details(e.to_string())
                    .with_source(SOURCE),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| {
            Error::configuration_with_context(
                "invalid config file",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source(SOURCE),
            )
        })
    }

    /// Apply `RELAY_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = lookup("RELAY_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(url) = lookup("RELAY_UPSTREAM_URL") {
            self.upstream.base_url = url;
        }
        if let Some(key) = lookup("RELAY_API_KEY").or_else(|| lookup("UPSTREAM_API_KEY")) {
            self.upstream.api_key = Some(key);
        }
        if let Some(proxy) = lookup("RELAY_PROXY_URL") {
            self.upstream.proxy_url = Some(proxy);
        }
        if let Some(secs) = lookup("RELAY_CONNECT_TIMEOUT_SECS") {
            self.upstream.connect_timeout_secs = parse_u64("RELAY_CONNECT_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("RELAY_PROXY_BUDGET_SECS") {
            self.proxy.budget_ms = parse_u64("RELAY_PROXY_BUDGET_SECS", &secs)?.saturating_mul(1000);
        }
        if let Some(secs) = lookup("RELAY_EDGE_BUDGET_SECS") {
            self.edge.budget_ms = parse_u64("RELAY_EDGE_BUDGET_SECS", &secs)?.saturating_mul(1000);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.upstream.base_url).map_err(|e| {
            Error::configuration_with_context(
                "upstream base_url is not a valid URL",
                ErrorContext::new()
                    .with_field_path("upstream.base_url")
                    .with_details(e.to_string())
                    .with_source(SOURCE),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::configuration_with_context(
                "upstream base_url must use http or https",
                ErrorContext::new()
                    .with_field_path("upstream.base_url")
                    .with_details(format!("scheme: {}", url.scheme()))
                    .with_source(SOURCE),
            ));
        }

        for (name, profile) in [("proxy", &self.proxy), ("edge", &self.edge)] {
            if !profile.path.starts_with('/') {
                return Err(profile_error(name, "path", "must start with '/'"));
            }
            if profile.provider_max_tokens == 0 {
                return Err(profile_error(name, "provider_max_tokens", "must be non-zero"));
            }
            if profile.budget_ms == 0 {
                return Err(profile_error(name, "budget_ms", "must be non-zero"));
            }
        }
        if self.proxy.path == self.edge.path {
            return Err(profile_error("edge", "path", "must differ from proxy.path"));
        }
        Ok(())
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|e| {
        Error::configuration_with_context(
            "environment override is not a number",
            ErrorContext::new()
                .with_field_path(key)
                .with_details(e.to_string())
                .with_source(SOURCE),
        )
    })
}

fn profile_error(profile: &str, field: &str, problem: &str) -> Error {
    Error::configuration_with_context(
        format!("{}.{} {}", profile, field, problem),
        ErrorContext::new()
            .with_field_path(format!("{}.{}", profile, field))
            .with_source(SOURCE),
    )
}
