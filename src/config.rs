use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::explain::target::DEFAULT_CANDIDATE_LAYERS;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. "127.0.0.1:5000"
    pub addr: String,
    /// Number of threads pulling requests off the listener
    pub workers: usize,
    /// Requests with larger bodies are rejected before parsing
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Path to the JSON model artifact
    pub path: PathBuf,
    /// Square input resolution the model was trained at
    pub input_size: u32,
    /// Explicit Grad-CAM layer; skips candidate probing when set
    #[serde(default)]
    pub target_layer: Option<String>,
    /// Layer names tried in order before the reverse rank-4 scan
    pub candidate_layers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub heatmap_dir: PathBuf,
    /// Keep uploaded images after a successful prediction
    pub keep_uploads: bool,
    /// Newest heatmaps kept on disk; 0 keeps everything
    pub max_heatmaps: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        Self::load_with_env(config_dir.as_ref(), Self::environment())
    }

    fn load_with_env(config_dir: &Path, environment: Environment) -> Result<Self, ConfigError> {
        let candidates: Vec<String> = DEFAULT_CANDIDATE_LAYERS.iter().map(|s| s.to_string()).collect();

        let builder = Config::builder()
            // Start with default values
            .set_default("server.addr", "127.0.0.1:5000")?
            .set_default("server.workers", 4)?
            .set_default("server.max_upload_bytes", 16 * 1024 * 1024)?
            .set_default("model.path", "model/classifier.json")?
            .set_default("model.input_size", 224)?
            .set_default("model.candidate_layers", candidates)?
            .set_default("storage.upload_dir", "uploads")?
            .set_default("storage.heatmap_dir", "static/heatmaps")?
            .set_default("storage.keep_uploads", false)?
            .set_default("storage.max_heatmaps", 256)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Override with environment variables (SICKLE_CAM__MODEL__PATH, etc.)
            .add_source(environment);

        builder.build()?.try_deserialize()
    }

    /// `SICKLE_CAM__SECTION__KEY` variables. `model.candidate_layers` is a
    /// comma-separated list.
    fn environment() -> Environment {
        Environment::with_prefix("SICKLE_CAM")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("model.candidate_layers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServiceConfig::load_from(dir.path()).unwrap();
        assert_eq!(cfg.server.addr, "127.0.0.1:5000");
        assert_eq!(cfg.model.input_size, 224);
        assert_eq!(cfg.model.candidate_layers[0], "Conv_1");
        assert_eq!(cfg.model.target_layer, None);
        assert_eq!(cfg.storage.heatmap_dir, PathBuf::from("static/heatmaps"));
        assert!(!cfg.storage.keep_uploads);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "[model]\npath = \"m.json\"\ninput_size = 64\ntarget_layer = \"block_1_project\"\n\n[storage]\nmax_heatmaps = 3\n",
        )
        .unwrap();
        let cfg = ServiceConfig::load_from(dir.path()).unwrap();
        assert_eq!(cfg.model.path, PathBuf::from("m.json"));
        assert_eq!(cfg.model.input_size, 64);
        assert_eq!(cfg.model.target_layer.as_deref(), Some("block_1_project"));
        assert_eq!(cfg.storage.max_heatmaps, 3);
        assert_eq!(cfg.storage.upload_dir, PathBuf::from("uploads"));
    }

    fn env_source(vars: &[(&str, &str)]) -> Environment {
        let map = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServiceConfig::environment().source(Some(map))
    }

    #[test]
    fn test_env_overrides_candidate_list() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_source(&[
            ("SICKLE_CAM__MODEL__CANDIDATE_LAYERS", "block_1_project,Conv_1"),
            ("SICKLE_CAM__SERVER__WORKERS", "2"),
            ("SICKLE_CAM__MODEL__TARGET_LAYER", "out_relu"),
        ]);
        let cfg = ServiceConfig::load_with_env(dir.path(), env).unwrap();
        assert_eq!(cfg.model.candidate_layers, vec!["block_1_project", "Conv_1"]);
        assert_eq!(cfg.server.workers, 2);
        assert_eq!(cfg.model.target_layer.as_deref(), Some("out_relu"));
    }
}
