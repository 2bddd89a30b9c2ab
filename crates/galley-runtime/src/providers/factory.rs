//! Building providers from configuration.
//!
//! A [`ProviderSpec`] names a backend and carries its options; the
//! [`ProviderRegistry`] maps the name to a factory compiled into this build.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};

/// Which backend to use, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSpec {
    pub kind: String,

    /// Backend specific, e.g. `api_key`, `base_url`
    pub options: JsonValue,
}

impl Default for ProviderSpec {
    fn default() -> Self {
        Self {
            kind: "upstage".to_string(),
            options: JsonValue::Object(Default::default()),
        }
    }
}

pub trait ProviderFactory: Send + Sync {
    fn kind(&self) -> &'static str;

    fn build(&self, options: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Reject unusable options before the first review.
    fn check(&self, options: &JsonValue) -> Result<(), ProviderError>;
}

#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<&'static str, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every backend enabled by crate features.
    #[allow(unused_mut)]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "upstage")]
        registry.register(Arc::new(super::UpstageProviderFactory));
        registry
    }

    /// Add a factory; a later registration of the same kind wins.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn build(&self, spec: &ProviderSpec) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.factory(&spec.kind)?.build(&spec.options)
    }

    pub fn check(&self, spec: &ProviderSpec) -> Result<(), ProviderError> {
        self.factory(&spec.kind)?.check(&spec.options)
    }

    fn factory(&self, kind: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(kind).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no provider named '{}' (built with: [{}])",
                kind,
                self.kinds().join(", ")
            ))
        })
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatMessage, CompletionConfig, CompletionResponse, TokenUsage};
    use async_trait::async_trait;
    use serde_json::json;

    struct Canned {
        label: String,
    }

    #[async_trait]
    impl LlmProvider for Canned {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                content: r#"{"issues": []}"#.to_string(),
                usage: TokenUsage::default(),
                model: config.model.clone(),
                stop_reason: None,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            &self.label
        }
    }

    struct CannedFactory;

    impl ProviderFactory for CannedFactory {
        fn kind(&self) -> &'static str {
            "canned"
        }

        fn build(&self, options: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
            self.check(options)?;
            let label = options["label"].as_str().unwrap_or("canned").to_string();
            Ok(Arc::new(Canned { label }))
        }

        fn check(&self, options: &JsonValue) -> Result<(), ProviderError> {
            match options.get("label") {
                Some(label) if !label.is_string() => Err(ProviderError::NotConfigured(
                    "label must be a string".to_string(),
                )),
                _ => Ok(()),
            }
        }
    }

    fn spec(kind: &str, options: JsonValue) -> ProviderSpec {
        ProviderSpec {
            kind: kind.to_string(),
            options,
        }
    }

    #[test]
    fn test_build_by_kind() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(CannedFactory));

        let provider = registry
            .build(&spec("canned", json!({"label": "solar"})))
            .unwrap();
        assert_eq!(provider.name(), "solar");
        assert_eq!(registry.kinds(), vec!["canned"]);
    }

    #[test]
    fn test_unknown_kind_lists_known() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(CannedFactory));

        match registry.build(&spec("openai", json!({}))) {
            Err(ProviderError::NotConfigured(msg)) => {
                assert!(msg.contains("'openai'"));
                assert!(msg.contains("canned"));
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("unknown kind built a provider"),
        }
    }

    #[test]
    fn test_check_runs_factory_validation() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(CannedFactory));

        assert!(registry.check(&spec("canned", json!({"label": "x"}))).is_ok());
        assert!(registry.check(&spec("canned", json!({"label": 3}))).is_err());
    }

    #[test]
    fn test_defaults_follow_features() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.contains("upstage"), cfg!(feature = "upstage"));
        assert_eq!(ProviderSpec::default().kind, "upstage");
    }
}
