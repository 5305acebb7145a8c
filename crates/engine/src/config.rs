//! Verifier configuration
//!
//! Policy knobs are explicit: anything without a documented default
//! (revocation cache TTL, revocation staleness, credential lifetime cap) stays
//! off until configured.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{AgentPinError, UnknownRevocationPolicy};

/// How the CLI and embedding services obtain trust evidence by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Standard `.well-known` HTTPS fetch (default).
    #[default]
    WellKnown,
    /// Pre-shared trust bundle loaded from `trust_bundle_path`.
    Bundle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// TOFU pin store file; `None` keeps pins in memory only
    #[serde(default = "default_key_store_path")]
    pub key_store_path: Option<PathBuf>,
    /// Symmetric tolerance applied to `exp`, `nbf` and `iat`
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: i64,
    /// Upper bound on `exp - iat`
    #[serde(default)]
    pub max_credential_lifetime_secs: Option<i64>,
    /// Expected `aud` claim (this service's domain)
    #[serde(default)]
    pub audience: Option<String>,
    /// Deadline for each network fetch
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Network-mode revocation cache TTL; unset or 0 disables caching
    #[serde(default)]
    pub revocation_cache_ttl_secs: Option<u64>,
    /// Revocation states older than this count as unknown (bundle staleness)
    #[serde(default)]
    pub max_revocation_age_secs: Option<u64>,
    #[serde(default)]
    pub unknown_revocation: UnknownRevocationPolicy,
    #[serde(default)]
    pub discovery_mode: DiscoveryMode,
    /// Trust bundle used when `discovery_mode = bundle`
    #[serde(default)]
    pub trust_bundle_path: Option<PathBuf>,
}

fn default_key_store_path() -> Option<PathBuf> {
    let mut p = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    p.push(".agentpin");
    p.push("pins.json");
    Some(p)
}

fn default_clock_skew_secs() -> i64 {
    60
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            key_store_path: default_key_store_path(),
            clock_skew_secs: default_clock_skew_secs(),
            max_credential_lifetime_secs: None,
            audience: None,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            revocation_cache_ttl_secs: None,
            max_revocation_age_secs: None,
            unknown_revocation: UnknownRevocationPolicy::default(),
            discovery_mode: DiscoveryMode::default(),
            trust_bundle_path: None,
        }
    }
}

impl VerifierConfig {
    /// Defaults with an in-memory pin store; the usual choice for tests and
    /// short-lived processes.
    pub fn ephemeral() -> Self {
        Self {
            key_store_path: None,
            ..Default::default()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, AgentPinError> {
        let content = std::fs::read_to_string(path).map_err(|e| AgentPinError::IoError {
            reason: format!("Failed to read config {}: {}", path.display(), e),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, AgentPinError> {
        let config: Self = toml::from_str(content).map_err(|e| AgentPinError::ConfigError {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `AGENTPIN_*` environment variables.
    pub fn from_env() -> Result<Self, AgentPinError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), AgentPinError> {
        if let Ok(path) = env::var("AGENTPIN_KEY_STORE_PATH") {
            self.key_store_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
        if let Ok(value) = env::var("AGENTPIN_CLOCK_SKEW_SECS") {
            self.clock_skew_secs = parse_env("AGENTPIN_CLOCK_SKEW_SECS", &value)?;
        }
        if let Ok(value) = env::var("AGENTPIN_MAX_CREDENTIAL_LIFETIME_SECS") {
            self.max_credential_lifetime_secs =
                Some(parse_env("AGENTPIN_MAX_CREDENTIAL_LIFETIME_SECS", &value)?);
        }
        if let Ok(audience) = env::var("AGENTPIN_AUDIENCE") {
            self.audience = Some(audience);
        }
        if let Ok(value) = env::var("AGENTPIN_FETCH_TIMEOUT_SECS") {
            self.fetch_timeout_secs = parse_env("AGENTPIN_FETCH_TIMEOUT_SECS", &value)?;
        }
        if let Ok(value) = env::var("AGENTPIN_REVOCATION_CACHE_TTL_SECS") {
            self.revocation_cache_ttl_secs =
                Some(parse_env("AGENTPIN_REVOCATION_CACHE_TTL_SECS", &value)?);
        }
        if let Ok(value) = env::var("AGENTPIN_MAX_REVOCATION_AGE_SECS") {
            self.max_revocation_age_secs =
                Some(parse_env("AGENTPIN_MAX_REVOCATION_AGE_SECS", &value)?);
        }
        if let Ok(value) = env::var("AGENTPIN_UNKNOWN_REVOCATION") {
            self.unknown_revocation = match value.to_lowercase().as_str() {
                "reject" => UnknownRevocationPolicy::Reject,
                "allow" => UnknownRevocationPolicy::Allow,
                other => {
                    return Err(AgentPinError::ConfigError {
                        reason: format!("AGENTPIN_UNKNOWN_REVOCATION: unknown policy '{}'", other),
                    })
                }
            };
        }
        if let Ok(path) = env::var("AGENTPIN_TRUST_BUNDLE") {
            self.trust_bundle_path = Some(PathBuf::from(path));
            self.discovery_mode = DiscoveryMode::Bundle;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AgentPinError> {
        if self.clock_skew_secs < 0 {
            return Err(AgentPinError::ConfigError {
                reason: "clock_skew_secs must not be negative".to_string(),
            });
        }
        if let Some(max) = self.max_credential_lifetime_secs {
            if max <= 0 {
                return Err(AgentPinError::ConfigError {
                    reason: "max_credential_lifetime_secs must be positive".to_string(),
                });
            }
        }
        if self.fetch_timeout_secs == 0 {
            return Err(AgentPinError::ConfigError {
                reason: "fetch_timeout_secs must be positive".to_string(),
            });
        }
        if self.discovery_mode == DiscoveryMode::Bundle && self.trust_bundle_path.is_none() {
            return Err(AgentPinError::ConfigError {
                reason: "discovery_mode = bundle requires trust_bundle_path".to_string(),
            });
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn revocation_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.revocation_cache_ttl_secs.unwrap_or(0))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AgentPinError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| AgentPinError::ConfigError {
        reason: format!("{}: {}", key, e),
    })
}
