//! Layered configuration for nornic-search.
//!
//! Sources, later ones winning:
//! - Built-in defaults
//! - `.nornic/settings.toml`, found by walking up from the current directory
//! - Environment variables
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `NORNIC_` and use double
//! underscores to separate nested levels:
//! - `NORNIC_GPU__BACKEND=cpu` sets `gpu.backend`
//! - `NORNIC_KMEANS__NUM_CLUSTERS=64` sets `kmeans.num_clusters`
//! - `NORNIC_RERANK__ENABLED=true` sets `rerank.enabled`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::eval::Thresholds;
use crate::gpu::BackendKind;
use crate::search::{RerankConfig, SearchOptions};
use crate::vector::KMeansConfig;

/// Directory holding the settings file.
pub const CONFIG_DIR: &str = ".nornic";
pub const CONFIG_FILE: &str = "settings.toml";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub gpu: GpuConfig,

    #[serde(default)]
    pub kmeans: KMeansConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub rerank: RerankConfig,

    /// Default pass thresholds for `eval`
    #[serde(default)]
    pub eval: Thresholds,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct GpuConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Device ordinal used when the backend is CUDA
    #[serde(default)]
    pub device_id: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct SearchConfig {
    #[serde(flatten)]
    pub options: SearchOptions,

    /// Reweight vector and BM25 sources by query length
    #[serde(default)]
    pub adaptive_rrf: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_version() -> u32 {
    1
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            gpu: GpuConfig::default(),
            kmeans: KMeansConfig::default(),
            search: SearchConfig::default(),
            rerank: RerankConfig::default(),
            eval: Thresholds::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SearchConfig {
    /// Search options for `query`, with adaptive weights applied when enabled.
    pub fn options_for(&self, query: &str) -> SearchOptions {
        if self.adaptive_rrf {
            self.options.clone().adapt_to_query(query)
        } else {
            self.options.clone()
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honouring environment
    /// overrides. A missing file yields the defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("NORNIC_").split("__"))
            .extract()
            .map_err(Box::new)
    }

    /// Searches from the current directory up to the filesystem root.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(CONFIG_FILE))
    }

    /// Path of the settings file in effect, if one exists.
    pub fn config_path() -> Option<PathBuf> {
        Self::find_workspace_config().filter(|path| path.exists())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        Self::init_config_file_in(Path::new("."), force)
    }

    pub fn init_config_file_in(
        root: &Path,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let defaults = Settings::default();
        let template = format!(
            r#"# nornic-search configuration

# Version of the configuration schema
version = 1

[gpu]
# Similarity backend: "auto", "cpu" or "cuda"
# auto uses CUDA when a device can be opened and the CPU otherwise
backend = "auto"
device_id = 0

[kmeans]
# Number of clusters; 0 with auto_k = true derives it from the population
num_clusters = {num_clusters}
max_iterations = {max_iterations}
tolerance = {tolerance}
# "kmeans++" or "random"
init_method = "kmeans++"
auto_k = {auto_k}
# Fraction of updated embeddings that triggers re-clustering
drift_threshold = {drift_threshold}
min_cluster_size = {min_cluster_size}
# Clusters probed per query
probe_clusters = {probe_clusters}
# Re-cluster once the last run is older than this (0 disables)
max_cluster_age_secs = {max_cluster_age_secs}
# Below this many embeddings search stays brute force
min_embeddings_for_clustering = {min_embeddings}

[search]
limit = {limit}
min_similarity = {min_similarity}
rrf_k = {rrf_k}
vector_weight = 1.0
bm25_weight = 1.0
min_rrf_score = {min_rrf_score}
# Reweight sources by query length (short queries favour BM25)
adaptive_rrf = false
mmr_enabled = false
mmr_lambda = {mmr_lambda}
rerank_enabled = false
rerank_top_k = {rerank_top_k}
rerank_min_score = 0.0

[rerank]
# Cross-encoder service (Cohere, HuggingFace TEI or compatible)
enabled = false
api_url = "{api_url}"
# api_key = "..."
model = "{model}"
top_k = {top_k}
timeout_secs = {timeout_secs}
min_score = 0.0

[eval]
# Per-test pass thresholds
"precision@10" = {p10}
"recall@10" = {r10}
mrr = {mrr}
"ndcg@10" = {ndcg10}
hit_rate = {hit}

[logging]
# Overridden by RUST_LOG
level = "{level}"
"#,
            num_clusters = defaults.kmeans.num_clusters,
            max_iterations = defaults.kmeans.max_iterations,
            tolerance = defaults.kmeans.tolerance,
            auto_k = defaults.kmeans.auto_k,
            drift_threshold = defaults.kmeans.drift_threshold,
            min_cluster_size = defaults.kmeans.min_cluster_size,
            probe_clusters = defaults.kmeans.probe_clusters,
            max_cluster_age_secs = defaults.kmeans.max_cluster_age_secs,
            min_embeddings = defaults.kmeans.min_embeddings_for_clustering,
            limit = defaults.search.options.limit,
            min_similarity = defaults.search.options.min_similarity,
            rrf_k = format_float(defaults.search.options.rrf_k),
            min_rrf_score = defaults.search.options.min_rrf_score,
            mmr_lambda = defaults.search.options.mmr_lambda,
            rerank_top_k = defaults.search.options.rerank_top_k,
            api_url = defaults.rerank.api_url,
            model = defaults.rerank.model,
            top_k = defaults.rerank.top_k,
            timeout_secs = defaults.rerank.timeout_secs,
            p10 = defaults.eval.precision_10,
            r10 = defaults.eval.recall_10,
            mrr = defaults.eval.mrr,
            ndcg10 = defaults.eval.ndcg_10,
            hit = defaults.eval.hit_rate,
            level = defaults.logging.level,
        );

        std::fs::write(&config_path, template)?;
        Ok(config_path)
    }
}

/// TOML needs a decimal point to keep a float a float.
fn format_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.gpu.backend, BackendKind::Auto);
        assert_eq!(settings.search.options.limit, 50);
        assert!(!settings.rerank.enabled);
        assert_eq!(settings.eval.hit_rate, 0.8);
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
[gpu]
backend = "cpu"
device_id = 1

[kmeans]
num_clusters = 12
auto_k = false

[search]
limit = 20
mmr_enabled = true
adaptive_rrf = true

[rerank]
enabled = true
api_url = "http://rerank.internal:8080/rerank"

[eval]
"precision@10" = 0.25
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.gpu.backend, BackendKind::Cpu);
        assert_eq!(settings.gpu.device_id, 1);
        assert_eq!(settings.kmeans.num_clusters, 12);
        assert!(!settings.kmeans.auto_k);
        assert_eq!(settings.search.options.limit, 20);
        assert!(settings.search.options.mmr_enabled);
        assert!(settings.search.adaptive_rrf);
        assert!(settings.rerank.enabled);
        assert_eq!(settings.rerank.api_url, "http://rerank.internal:8080/rerank");
        assert_eq!(settings.eval.precision_10, 0.25);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[search]\nrrf_k = 30.0\n").unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.search.options.rrf_k, 30.0);
        assert_eq!(settings.search.options.min_rrf_score, 0.01);
        assert_eq!(settings.kmeans, KMeansConfig::default());
        assert_eq!(settings.rerank.top_k, RerankConfig::default().top_k);
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.kmeans.probe_clusters = 7;
        settings.rerank.api_key = Some("secret".to_string());

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.kmeans.probe_clusters, 7);
        assert_eq!(loaded.rerank.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_init_template_parses_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = Settings::init_config_file_in(temp_dir.path(), false).unwrap();
        assert!(path.ends_with(".nornic/settings.toml"));

        let loaded = Settings::load_from(&path).unwrap();
        let defaults = Settings::default();
        assert_eq!(loaded.gpu, defaults.gpu);
        assert_eq!(loaded.kmeans, defaults.kmeans);
        assert_eq!(loaded.search, defaults.search);
        assert_eq!(loaded.eval, defaults.eval);
        assert_eq!(loaded.rerank.api_url, defaults.rerank.api_url);

        assert!(Settings::init_config_file_in(temp_dir.path(), false).is_err());
        assert!(Settings::init_config_file_in(temp_dir.path(), true).is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[rerank]\nmodel = \"from-file\"\n").unwrap();

        unsafe {
            std::env::set_var("NORNIC_RERANK__MODEL", "from-env");
        }
        let settings = Settings::load_from(&config_path);
        unsafe {
            std::env::remove_var("NORNIC_RERANK__MODEL");
        }

        assert_eq!(settings.unwrap().rerank.model, "from-env");
    }

    #[test]
    fn test_adaptive_options() {
        let mut search = SearchConfig::default();
        assert_eq!(search.options_for("jwt").bm25_weight, 1.0);

        search.adaptive_rrf = true;
        let options = search.options_for("jwt");
        assert_eq!(options.vector_weight, 0.5);
        assert_eq!(options.bm25_weight, 1.5);
    }
}
