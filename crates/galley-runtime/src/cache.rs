//! Cache of parsed evaluator chunk results.
//!
//! Re-reviewing an unchanged manuscript (or an unchanged chunk of an edited
//! one) skips the model call. Only successful parses are stored; degraded
//! chunks are always retried.

use moka::future::Cache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use galley_core::{EvaluatorKind, EvaluatorOutput};

use crate::config::CacheConfig;

/// Identifies one evaluator call by everything that shapes its prompt.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    kind: EvaluatorKind,
    model: String,
    chunk_hash: u64,
    context_hash: u64,
}

impl ChunkKey {
    /// `chunk` is the rendered sentence block; `context` is whatever else
    /// goes into the prompt (persona, summary).
    pub fn new(kind: EvaluatorKind, model: &str, chunk: &str, context: &[Option<&str>]) -> Self {
        Self {
            kind,
            model: model.to_string(),
            chunk_hash: hash_one(chunk),
            context_hash: hash_one(context),
        }
    }
}

fn hash_one<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Parsed chunk outputs keyed by [`ChunkKey`]. Hints are chunk-local.
pub struct EvaluationCache {
    cache: Cache<ChunkKey, EvaluatorOutput>,
}

impl EvaluationCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();

        Self { cache }
    }

    pub async fn get(&self, key: &ChunkKey) -> Option<EvaluatorOutput> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: ChunkKey, output: EvaluatorOutput) {
        if output.is_degraded() {
            return;
        }
        self.cache.insert(key, output).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for EvaluationCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galley_core::RawIssue;

    fn output() -> EvaluatorOutput {
        EvaluatorOutput {
            issues: vec![RawIssue {
                quote: "stormy".into(),
                sentence_index_hint: Some(0),
                ..Default::default()
            }],
            score: Some(70),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cache_round_trip() {
        let cache = EvaluationCache::default();
        let key = ChunkKey::new(EvaluatorKind::GenreCliche, "solar-pro2", "[0] It was stormy.", &[None]);

        assert!(cache.get(&key).await.is_none());
        cache.insert(key.clone(), output()).await;
        assert_eq!(cache.get(&key).await, Some(output()));
    }

    #[tokio::test]
    async fn test_degraded_outputs_not_cached() {
        let cache = EvaluationCache::default();
        let key = ChunkKey::new(EvaluatorKind::Tone, "solar-pro2", "[0] x", &[]);

        cache.insert(key.clone(), EvaluatorOutput::degraded("timeout")).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[test]
    fn test_key_depends_on_context() {
        let a = ChunkKey::new(EvaluatorKind::Logic, "m", "chunk", &[Some("teen reader")]);
        let b = ChunkKey::new(EvaluatorKind::Logic, "m", "chunk", &[Some("expert reader")]);
        let c = ChunkKey::new(EvaluatorKind::Tone, "m", "chunk", &[Some("teen reader")]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
