use crate::error::{EngineError, Result};
use drift_comparator::DisagreementPolicy;
use drift_protocol::{Fork, ForkScope};
use drift_reasoning::RetryPolicy;
use drift_search::RetrieverConfig;
use drift_spec_chunker::ChunkerConfig;
use drift_vector_store::HashingEmbedder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MAX_CONCURRENCY: usize = 64;

/// Engine settings. Every field has a default, so an empty TOML file is valid.
///
/// Precedence: defaults < TOML file < `DRIFT_*` environment < CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Units reasoned about at once; bounds concurrent oracle calls
    pub concurrency: usize,
    pub top_k: usize,
    pub min_relevance: f32,
    pub call_timeout_ms: u64,
    pub max_oracle_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub samples_per_unit: usize,
    pub widen_forks: Vec<Fork>,
    pub include_ancestor_forks: bool,
    pub disagreement_policy: DisagreementPolicy,
    pub chunker: ChunkerConfig,
    pub embedding_dimension: usize,
    pub store_path: Option<PathBuf>,
    pub calibration_path: Option<PathBuf>,
    pub journal_path: Option<PathBuf>,
    /// Model endpoint; the rule-based oracle is used when unset
    pub oracle_endpoint: Option<String>,
    pub oracle_model: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let retriever = RetrieverConfig::default();
        Self {
            concurrency: 4,
            top_k: retriever.top_k,
            min_relevance: retriever.min_score,
            call_timeout_ms: retry.call_timeout.as_millis() as u64,
            max_oracle_attempts: retry.max_attempts,
            backoff_base_ms: retry.backoff_base.as_millis() as u64,
            backoff_max_ms: retry.backoff_max.as_millis() as u64,
            samples_per_unit: 1,
            widen_forks: Vec::new(),
            include_ancestor_forks: false,
            disagreement_policy: DisagreementPolicy::default(),
            chunker: ChunkerConfig::default(),
            embedding_dimension: HashingEmbedder::DEFAULT_DIMENSION,
            store_path: None,
            calibration_path: None,
            journal_path: None,
            oracle_endpoint: None,
            oracle_model: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&data)
    }

    /// Apply `DRIFT_*` variables from the process environment.
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `DRIFT_*` overrides from `lookup`. Unparsable values are logged
    /// and ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        override_parsed(&get, "DRIFT_CONCURRENCY", &mut self.concurrency);
        override_parsed(&get, "DRIFT_TOP_K", &mut self.top_k);
        override_parsed(&get, "DRIFT_MIN_RELEVANCE", &mut self.min_relevance);
        override_parsed(&get, "DRIFT_CALL_TIMEOUT_MS", &mut self.call_timeout_ms);
        override_parsed(&get, "DRIFT_MAX_ORACLE_ATTEMPTS", &mut self.max_oracle_attempts);
        override_parsed(&get, "DRIFT_BACKOFF_BASE_MS", &mut self.backoff_base_ms);
        override_parsed(&get, "DRIFT_BACKOFF_MAX_MS", &mut self.backoff_max_ms);
        override_parsed(&get, "DRIFT_SAMPLES_PER_UNIT", &mut self.samples_per_unit);
        override_parsed(&get, "DRIFT_EMBEDDING_DIMENSION", &mut self.embedding_dimension);

        if let Some(raw) = get("DRIFT_INCLUDE_ANCESTOR_FORKS") {
            match parse_bool(&raw) {
                Some(value) => self.include_ancestor_forks = value,
                None => log::warn!("Ignoring DRIFT_INCLUDE_ANCESTOR_FORKS={raw}: expected a boolean"),
            }
        }
        if let Some(raw) = get("DRIFT_WIDEN_FORKS") {
            self.widen_forks = raw
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(Fork::new)
                .collect();
        }
        if let Some(raw) = get("DRIFT_DISAGREEMENT_POLICY") {
            match parse_policy(&raw) {
                Some(policy) => self.disagreement_policy = policy,
                None => log::warn!(
                    "Ignoring DRIFT_DISAGREEMENT_POLICY={raw}: expected surface or majority:<share>"
                ),
            }
        }
        if let Some(raw) = get("DRIFT_STORE_PATH") {
            self.store_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = get("DRIFT_CALIBRATION_PATH") {
            self.calibration_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = get("DRIFT_JOURNAL_PATH") {
            self.journal_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = get("DRIFT_ORACLE_ENDPOINT") {
            self.oracle_endpoint = Some(raw);
        }
        if let Some(raw) = get("DRIFT_ORACLE_MODEL") {
            self.oracle_model = Some(raw);
        }
        self
    }

    /// Clamp tunables into their supported ranges.
    pub fn normalized(mut self) -> Self {
        let retriever = RetrieverConfig::default();
        self.concurrency = self.concurrency.clamp(1, MAX_CONCURRENCY);
        self.top_k = self.top_k.clamp(1, retriever.max_k);
        self.min_relevance = if self.min_relevance.is_finite() {
            self.min_relevance.clamp(0.0, 1.0)
        } else {
            retriever.min_score
        };
        self.max_oracle_attempts = self.max_oracle_attempts.max(1);
        self.samples_per_unit = self.samples_per_unit.max(1);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.chunker.validate()?;
        if self.call_timeout_ms == 0 {
            return Err(EngineError::config("call_timeout_ms must be > 0"));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(EngineError::config(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        if self.embedding_dimension == 0 {
            return Err(EngineError::config("embedding_dimension must be > 0"));
        }
        if let DisagreementPolicy::Majority { min_share } = self.disagreement_policy {
            if !(min_share > 0.0 && min_share <= 1.0) {
                return Err(EngineError::config(format!(
                    "majority min_share must be in (0, 1], got {min_share}"
                )));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_oracle_attempts.max(1),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }

    pub fn retriever_config(&self) -> RetrieverConfig {
        RetrieverConfig {
            top_k: self.top_k,
            min_score: self.min_relevance,
            ..RetrieverConfig::default()
        }
    }

    /// Exact fork unless widening is configured
    pub fn fork_scope(&self, fork: &Fork) -> ForkScope {
        let scope = ForkScope::exact(fork.clone()).widen(self.widen_forks.iter().cloned());
        if self.include_ancestor_forks {
            scope.with_ancestors()
        } else {
            scope
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = get(key) {
        match raw.parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => log::warn!("Ignoring {key}={raw}: not a valid value"),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `surface`, `majority` (min share 0.5) or `majority:<share>`
pub fn parse_policy(raw: &str) -> Option<DisagreementPolicy> {
    let raw = raw.trim().to_ascii_lowercase();
    match raw.split_once(':') {
        None if raw == "surface" => Some(DisagreementPolicy::Surface),
        None if raw == "majority" => Some(DisagreementPolicy::Majority { min_share: 0.5 }),
        Some(("majority", share)) => share
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|s| *s > 0.0 && *s <= 1.0)
            .map(|min_share| DisagreementPolicy::Majority { min_share }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_is_all_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.top_k, 10);
        assert_eq!(config.min_relevance, 0.25);
        assert_eq!(config.call_timeout_ms, 30_000);
        assert_eq!(config.max_oracle_attempts, 3);
        assert_eq!(config.chunker.max_tokens, 512);
        assert_eq!(config.disagreement_policy, DisagreementPolicy::Surface);
    }

    #[test]
    fn toml_sets_nested_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            concurrency = 8
            widen_forks = ["shanghai"]
            disagreement_policy = { mode = "majority", min_share = 0.6 }
            store_path = "state/index.json"

            [chunker]
            max_tokens = 256
            "#,
        )
        .unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.widen_forks, vec![Fork::new("shanghai")]);
        assert_eq!(
            config.disagreement_policy,
            DisagreementPolicy::Majority { min_share: 0.6 }
        );
        assert_eq!(config.chunker.max_tokens, 256);
        assert_eq!(config.chunker.min_tokens, 16);
        assert_eq!(config.store_path, Some(PathBuf::from("state/index.json")));
    }

    #[test]
    fn env_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> = [
            ("DRIFT_CONCURRENCY", "999"),
            ("DRIFT_TOP_K", "abc"),
            ("DRIFT_WIDEN_FORKS", "shanghai, paris"),
            ("DRIFT_DISAGREEMENT_POLICY", "majority:0.75"),
            ("DRIFT_INCLUDE_ANCESTOR_FORKS", "yes"),
            ("DRIFT_SAMPLES_PER_UNIT", " "),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .normalized();

        assert_eq!(config.concurrency, MAX_CONCURRENCY);
        assert_eq!(config.top_k, 10);
        assert_eq!(config.samples_per_unit, 1);
        assert_eq!(config.widen_forks, vec![Fork::new("shanghai"), Fork::new("paris")]);
        assert_eq!(
            config.disagreement_policy,
            DisagreementPolicy::Majority { min_share: 0.75 }
        );
        assert!(config.include_ancestor_forks);
    }

    #[test]
    fn normalization_clamps() {
        let config = EngineConfig {
            concurrency: 0,
            top_k: 500,
            samples_per_unit: 0,
            min_relevance: 3.0,
            ..EngineConfig::default()
        }
        .normalized();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.top_k, 50);
        assert_eq!(config.samples_per_unit, 1);
        assert_eq!(config.min_relevance, 1.0);
    }

    #[test]
    fn validation_rejects_inconsistent_backoff() {
        let config = EngineConfig {
            backoff_base_ms: 5_000,
            backoff_max_ms: 1_000,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn policy_parsing() {
        assert_eq!(parse_policy("surface"), Some(DisagreementPolicy::Surface));
        assert_eq!(
            parse_policy("Majority"),
            Some(DisagreementPolicy::Majority { min_share: 0.5 })
        );
        assert_eq!(parse_policy("majority:1.5"), None);
        assert_eq!(parse_policy("vote"), None);
    }

    #[test]
    fn scope_follows_widening_settings() {
        let cancun = Fork::new("cancun");
        assert!(!EngineConfig::default().fork_scope(&cancun).is_widened());

        let config = EngineConfig {
            include_ancestor_forks: true,
            ..EngineConfig::default()
        };
        assert!(config.fork_scope(&cancun).admits(&Fork::new("shanghai")));
    }
}
