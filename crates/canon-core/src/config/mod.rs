//! Configuration system for canon.
//!
//! A [`CanonConfig`] is an explicit value injected at construction. The
//! engine keeps the current snapshot in a [`SharedConfig`] so that
//! `reconfigure` can swap it without disturbing operations already running
//! against the previous snapshot.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{CanonError, CanonResult};
use crate::traits::{EmbedderConfig, EmbedderProvider};

/// Hard ceiling on traversal depth.
pub const MAX_TRAVERSAL_DEPTH: u8 = 5;
/// Hard ceiling on entities admitted by one traversal.
pub const MAX_TRAVERSAL_ENTITIES: usize = 500;

/// Entity resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Number of same-type candidates requested from the vector index.
    pub top_k: usize,
    /// Candidates scoring below this are ignored.
    pub min_similarity: f32,
    /// Minimum oracle confidence for reusing an existing entity.
    pub merge_threshold: f32,
    /// Upper bound on any single embedder, vector index or oracle call.
    pub collaborator_timeout_ms: u64,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.75,
            merge_threshold: 0.85,
            collaborator_timeout_ms: 10_000,
        }
    }
}

impl ResolutionConfig {
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }
}

/// Neighbor expansion defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub default_depth: u8,
    pub default_max_entities: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            default_depth: 2,
            default_max_entities: 100,
        }
    }
}

/// Common-document query paging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntersectionConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for IntersectionConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

/// Batch ingestion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Resolutions and relation writes in flight per batch.
    pub max_concurrency: usize,
    /// Deadline for a whole batch. `None` means no deadline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            batch_timeout_ms: None,
        }
    }
}

impl PipelineConfig {
    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_ms.map(Duration::from_millis)
    }
}

/// Graph store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir().join("graph.db"),
        }
    }
}

/// Oracle provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    #[default]
    OpenAI,
    Anthropic,
    /// Offline score/name heuristic.
    Heuristic,
}

/// Disambiguation oracle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub provider: OracleProvider,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: OracleProvider::default(),
            model: "gpt-4.1-nano-2025-04-14".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.0,
            max_tokens: 512,
        }
    }
}

/// Main canon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonConfig {
    pub resolution: ResolutionConfig,
    pub traversal: TraversalConfig,
    pub intersection: IntersectionConfig,
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
    pub embedder: EmbedderConfig,
    pub oracle: OracleConfig,
}

/// `~/.canon`, or `.canon` when there is no home directory.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".canon"))
        .unwrap_or_else(|| PathBuf::from(".canon"))
}

impl CanonConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<std::path::Path>) -> CanonResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| CanonError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| CanonError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| CanonError::Configuration(e.to_string()))?,
            _ => {
                return Err(CanonError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `CANON_*` and provider key variables onto this configuration.
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = parsed(var("CANON_TOP_K")) {
            self.resolution.top_k = v;
        }
        if let Some(v) = parsed(var("CANON_MIN_SIMILARITY")) {
            self.resolution.min_similarity = v;
        }
        if let Some(v) = parsed(var("CANON_MERGE_THRESHOLD")) {
            self.resolution.merge_threshold = v;
        }
        if let Some(v) = parsed(var("CANON_COLLABORATOR_TIMEOUT_MS")) {
            self.resolution.collaborator_timeout_ms = v;
        }
        if let Some(v) = parsed(var("CANON_MAX_CONCURRENCY")) {
            self.pipeline.max_concurrency = v;
        }
        if let Some(v) = parsed(var("CANON_BATCH_TIMEOUT_MS")) {
            self.pipeline.batch_timeout_ms = Some(v);
        }
        if let Some(path) = var("CANON_DB_PATH") {
            self.store.path = PathBuf::from(path);
        }

        if let Some(provider) = var("CANON_EMBEDDER_PROVIDER") {
            self.embedder.provider = match provider.to_lowercase().as_str() {
                "ollama" => EmbedderProvider::Ollama,
                "hashing" => EmbedderProvider::Hashing,
                _ => EmbedderProvider::OpenAI,
            };
        }
        if let Some(model) = var("CANON_EMBEDDER_MODEL") {
            self.embedder.model = model;
        }
        if let Some(dims) = parsed(var("CANON_EMBEDDING_DIMS")) {
            self.embedder.embedding_dims = dims;
        }

        if let Some(provider) = var("CANON_ORACLE_PROVIDER") {
            self.oracle.provider = match provider.to_lowercase().as_str() {
                "anthropic" => OracleProvider::Anthropic,
                "heuristic" => OracleProvider::Heuristic,
                _ => OracleProvider::OpenAI,
            };
        }
        if let Some(model) = var("CANON_ORACLE_MODEL") {
            self.oracle.model = model;
        }

        if let Some(api_key) = var("OPENAI_API_KEY") {
            if self.embedder.provider == EmbedderProvider::OpenAI && self.embedder.api_key.is_none()
            {
                self.embedder.api_key = Some(api_key.clone());
            }
            if self.oracle.provider == OracleProvider::OpenAI && self.oracle.api_key.is_none() {
                self.oracle.api_key = Some(api_key);
            }
        }
        if let Some(api_key) = var("ANTHROPIC_API_KEY") {
            if self.oracle.provider == OracleProvider::Anthropic && self.oracle.api_key.is_none()
            {
                self.oracle.api_key = Some(api_key);
            }
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> CanonResult<()> {
        let r = &self.resolution;
        if r.top_k == 0 {
            return Err(config_range("resolution.top_k", r.top_k, ">= 1"));
        }
        if !(0.0..=1.0).contains(&r.min_similarity) {
            return Err(config_range(
                "resolution.min_similarity",
                r.min_similarity,
                "0.0..=1.0",
            ));
        }
        if !(0.0..=1.0).contains(&r.merge_threshold) {
            return Err(config_range(
                "resolution.merge_threshold",
                r.merge_threshold,
                "0.0..=1.0",
            ));
        }
        if r.collaborator_timeout_ms == 0 {
            return Err(config_range(
                "resolution.collaborator_timeout_ms",
                r.collaborator_timeout_ms,
                ">= 1",
            ));
        }

        let t = &self.traversal;
        if t.default_depth > MAX_TRAVERSAL_DEPTH {
            return Err(config_range(
                "traversal.default_depth",
                t.default_depth,
                "0..=5",
            ));
        }
        if t.default_max_entities == 0 || t.default_max_entities > MAX_TRAVERSAL_ENTITIES {
            return Err(config_range(
                "traversal.default_max_entities",
                t.default_max_entities,
                "1..=500",
            ));
        }

        let i = &self.intersection;
        if i.max_page_size == 0 {
            return Err(config_range("intersection.max_page_size", 0, ">= 1"));
        }
        if i.default_page_size == 0 || i.default_page_size > i.max_page_size {
            return Err(config_range(
                "intersection.default_page_size",
                i.default_page_size,
                "1..=intersection.max_page_size",
            ));
        }

        if self.pipeline.max_concurrency == 0 {
            return Err(config_range("pipeline.max_concurrency", 0, ">= 1"));
        }
        if self.pipeline.batch_timeout_ms == Some(0) {
            return Err(config_range("pipeline.batch_timeout_ms", 0, ">= 1"));
        }
        if self.embedder.embedding_dims == 0 {
            return Err(config_range("embedder.embedding_dims", 0, ">= 1"));
        }
        Ok(())
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> CanonConfigBuilder {
        CanonConfigBuilder::default()
    }
}

fn config_range(field: &str, value: impl std::fmt::Display, allowed: &str) -> CanonError {
    CanonError::Configuration(format!("{} = {} is outside {}", field, value, allowed))
}

/// Builder for CanonConfig.
#[derive(Default)]
pub struct CanonConfigBuilder {
    config: CanonConfig,
}

impl CanonConfigBuilder {
    /// Set resolution configuration.
    pub fn resolution(mut self, config: ResolutionConfig) -> Self {
        self.config.resolution = config;
        self
    }

    /// Set the oracle confidence needed to reuse an entity.
    pub fn merge_threshold(mut self, threshold: f32) -> Self {
        self.config.resolution.merge_threshold = threshold;
        self
    }

    /// Set the minimum similarity for vector candidates.
    pub fn min_similarity(mut self, similarity: f32) -> Self {
        self.config.resolution.min_similarity = similarity;
        self
    }

    /// Set the per-call collaborator timeout.
    pub fn collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.config.resolution.collaborator_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn traversal(mut self, config: TraversalConfig) -> Self {
        self.config.traversal = config;
        self
    }

    pub fn intersection(mut self, config: IntersectionConfig) -> Self {
        self.config.intersection = config;
        self
    }

    /// Set pipeline configuration.
    pub fn pipeline(mut self, config: PipelineConfig) -> Self {
        self.config.pipeline = config;
        self
    }

    /// Set the number of in-flight resolutions per batch.
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.pipeline.max_concurrency = max_concurrency;
        self
    }

    /// Set the graph database path.
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store.path = path.into();
        self
    }

    /// Set embedder configuration.
    pub fn embedder(mut self, config: EmbedderConfig) -> Self {
        self.config.embedder = config;
        self
    }

    /// Set oracle configuration.
    pub fn oracle(mut self, config: OracleConfig) -> Self {
        self.config.oracle = config;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> CanonResult<CanonConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// The live configuration snapshot.
///
/// Readers take an `Arc` snapshot and keep using it for the whole operation;
/// [`SharedConfig::replace`] only affects operations started afterwards.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<CanonConfig>>>,
}

impl SharedConfig {
    pub fn new(config: CanonConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<CanonConfig> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Validate `config` and make it the current snapshot.
    pub fn replace(&self, config: CanonConfig) -> CanonResult<()> {
        config.validate()?;
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = CanonConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolution.top_k, 5);
        assert_eq!(config.pipeline.max_concurrency, 5);
        assert_eq!(config.intersection.max_page_size, 100);
        assert!(config.store.path.ends_with("graph.db"));
    }

    #[test]
    fn test_builder_rejects_out_of_range() {
        let err = CanonConfig::builder()
            .merge_threshold(1.5)
            .build()
            .unwrap_err();
        assert!(matches!(err, CanonError::Configuration(_)));

        let err = CanonConfig::builder().max_concurrency(0).build().unwrap_err();
        assert!(err.to_string().contains("pipeline.max_concurrency"));
    }

    #[test]
    fn test_from_toml_file_keeps_unset_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[resolution]\nmerge_threshold = 0.9\n\n[pipeline]\nmax_concurrency = 2"
        )
        .unwrap();

        let config = CanonConfig::from_file(file.path()).unwrap();
        assert_eq!(config.resolution.merge_threshold, 0.9);
        assert_eq!(config.resolution.top_k, 5);
        assert_eq!(config.pipeline.max_concurrency, 2);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "oracle:\n  provider: heuristic\ntraversal:\n  default_depth: 3").unwrap();

        let config = CanonConfig::from_file(file.path()).unwrap();
        assert_eq!(config.oracle.provider, OracleProvider::Heuristic);
        assert_eq!(config.traversal.default_depth, 3);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            CanonConfig::from_file(file.path()),
            Err(CanonError::Configuration(_))
        ));
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("CANON_MERGE_THRESHOLD", "0.7"),
            ("CANON_MAX_CONCURRENCY", "not-a-number"),
            ("CANON_ORACLE_PROVIDER", "anthropic"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("OPENAI_API_KEY", "sk-oai"),
        ]
        .into_iter()
        .collect();

        let mut config = CanonConfig::default();
        config.apply_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.resolution.merge_threshold, 0.7);
        assert_eq!(config.pipeline.max_concurrency, 5);
        assert_eq!(config.oracle.provider, OracleProvider::Anthropic);
        assert_eq!(config.oracle.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.embedder.api_key.as_deref(), Some("sk-oai"));
    }

    #[test]
    fn test_shared_config_replace() {
        let shared = SharedConfig::new(CanonConfig::default());
        let before = shared.snapshot();

        let mut next = CanonConfig::default();
        next.resolution.top_k = 9;
        shared.replace(next).unwrap();

        assert_eq!(before.resolution.top_k, 5);
        assert_eq!(shared.snapshot().resolution.top_k, 9);

        let mut bad = CanonConfig::default();
        bad.resolution.top_k = 0;
        assert!(shared.replace(bad).is_err());
        assert_eq!(shared.snapshot().resolution.top_k, 9);
    }
}
