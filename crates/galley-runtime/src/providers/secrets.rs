//! Credential handling for LLM providers.
//!
//! Keys are wrapped in [`SecretString`] the moment they are read, so they
//! never show up in `Debug` or `Display` output. Template placeholders
//! copied from sample env files are rejected up front instead of failing
//! later with an opaque 401.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Values that look like a key but are sample-file placeholders.
const PLACEHOLDER_KEYS: &[&str] = &[
    "your_upstage_api_key_here",
    "your_upstage_api_key",
    "your_api_key",
    "your_key",
    "change_me",
];

/// Whether `value` is empty or a known placeholder.
pub fn is_placeholder(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    value.is_empty() || PLACEHOLDER_KEYS.contains(&value.as_str())
}

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Config,
    Environment,
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A redacted API key plus where it came from.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    /// Wrap a key. Placeholders are rejected.
    pub fn new(
        value: impl Into<String>,
        source: CredentialSource,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        let value = value.into();
        if is_placeholder(&value) {
            return Err(ProviderError::NotConfigured(format!(
                "{} from {} is empty or a placeholder",
                name, source
            )));
        }
        Ok(Self {
            value: SecretString::from(value.trim().to_string()),
            source,
            name,
        })
    }

    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, ProviderError> {
        let value = std::env::var(env_var).map_err(|_| {
            ProviderError::NotConfigured(format!(
                "{} not set: configure '{}' environment variable",
                name, env_var
            ))
        })?;
        Self::new(value, CredentialSource::Environment, name)
    }

    /// Read `config_key` from provider config, falling back to `env_var`.
    ///
    /// A placeholder in the config does not shadow a real key in the
    /// environment.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        if let Some(value) = config[config_key].as_str() {
            if !is_placeholder(value) {
                return Self::new(value, CredentialSource::Config, name);
            }
        }

        if let Ok(value) = std::env::var(env_var) {
            return Self::new(value, CredentialSource::Environment, name);
        }

        Err(ProviderError::NotConfigured(format!(
            "{} required: set '{}' in config or {} environment variable",
            name, config_key, env_var
        )))
    }

    /// Expose the key at the point of use (an HTTP header).
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}
